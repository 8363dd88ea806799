pub mod classifier;
pub mod engine;
pub mod scheduler;
pub mod validator;

pub use engine::{EngineOptions, TransferEngine, TransferEvents};
pub use scheduler::Scheduler;

use crate::fs::FsError;
use crate::rules::Rule;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// How a task selects candidate files: a bare extension, or a composite
/// rule evaluated by the rule engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskFilter {
    Extension(String),
    Rule(Rule),
}

impl TaskFilter {
    /// Short label recorded in transfer summaries: the extension, or the
    /// rule's name.
    pub fn label(&self) -> String {
        match self {
            TaskFilter::Extension(ext) => ext.clone(),
            TaskFilter::Rule(rule) => rule.name.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScheduleKind {
    Never,
    Once,
    Daily,
    Weekly,
}

impl ScheduleKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScheduleKind::Never => "never",
            ScheduleKind::Once => "once",
            ScheduleKind::Daily => "daily",
            ScheduleKind::Weekly => "weekly",
        }
    }

    pub fn parse(raw: &str) -> ScheduleKind {
        match raw {
            "once" => ScheduleKind::Once,
            "daily" => ScheduleKind::Daily,
            "weekly" => ScheduleKind::Weekly,
            _ => ScheduleKind::Never,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Schedule {
    pub kind: ScheduleKind,
    /// Next due time, epoch milliseconds. `None` for unscheduled tasks.
    pub next_run_time: Option<i64>,
}

impl Schedule {
    pub fn never() -> Self {
        Self {
            kind: ScheduleKind::Never,
            next_run_time: None,
        }
    }
}

/// A persisted user intent to move matching files from one directory to
/// another, optionally on a recurring schedule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub source: String,
    pub destination: String,
    pub filter: TaskFilter,
    pub active: bool,
    pub schedule: Schedule,
}

impl Task {
    pub fn new(source: &str, destination: &str, filter: TaskFilter) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            source: source.to_string(),
            destination: destination.to_string(),
            filter,
            active: true,
            schedule: Schedule::never(),
        }
    }
}

/// Incremental snapshot of a transfer run, owned exclusively by that run
/// and handed to the progress sink on every emission.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TransferProgress {
    pub total_files: u64,
    pub files_moved: u64,
    pub current_file_name: String,
    pub current_file_size: u64,
    pub current_bytes_transferred: u64,
    pub total_bytes_transferred: u64,
    pub total_bytes: u64,
    /// Run start, epoch milliseconds.
    pub start_time: i64,
}

/// Append-only record of one completed (possibly empty) transfer run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferSummary {
    pub source: String,
    pub destination: String,
    pub extension: String,
    pub file_count: u64,
    /// Epoch seconds.
    pub timestamp: i64,
}

/// A file that failed without stopping the batch. A `DeleteFailure` here
/// means the copy succeeded and the file now exists in both locations.
#[derive(Debug)]
pub struct FileFailure {
    pub name: String,
    pub error: TransferError,
}

/// Result of a completed transfer run: the persisted summary plus every
/// per-file failure encountered along the way.
#[derive(Debug)]
pub struct TransferOutcome {
    pub summary: TransferSummary,
    pub failures: Vec<FileFailure>,
}

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("location not found: {0}")]
    NotFound(String),

    #[error("not a directory: {0}")]
    NotADirectory(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("insufficient space: {required} bytes required, {available} available")]
    InsufficientSpace { required: u64, available: u64 },

    #[error("invalid rule: {0}")]
    InvalidRule(String),
}

#[derive(Debug, Error)]
pub enum TransferError {
    #[error("read failure: {0}")]
    ReadFailure(#[source] FsError),

    #[error("write failure: {0}")]
    WriteFailure(#[source] FsError),

    #[error("delete failure: {0}")]
    DeleteFailure(#[source] FsError),

    #[error("no files matched the task filter")]
    NoMatch,

    #[error("transfer cancelled by shutdown")]
    Cancelled,

    #[error("storage failure: {0}")]
    Storage(#[from] sqlx::Error),
}

/// Failure of a whole task run, as handed to callers: either the
/// pre-flight validation refused it, or the transfer itself failed.
#[derive(Debug, Error)]
pub enum TaskError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Transfer(#[from] TransferError),
}

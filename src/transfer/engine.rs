use super::{
    validator, FileFailure, Task, TaskError, TaskFilter, TransferError, TransferOutcome,
    TransferProgress, TransferSummary,
};
use crate::fs::{self, Entry, FsError, Location, GENERIC_MIME};
use crate::rules;
use crate::storage::Storage;
use crate::utils::config::Config;
use chrono::Utc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Tuning knobs for a transfer run.
#[derive(Debug, Clone)]
pub struct EngineOptions {
    /// Chunk size for the copy loop.
    pub copy_buffer_bytes: usize,
    /// Pause between files, pacing create/delete calls against the
    /// underlying storage provider.
    pub inter_file_pause: Duration,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            copy_buffer_bytes: 8 * 1024,
            inter_file_pause: Duration::from_millis(300),
        }
    }
}

impl From<&Config> for EngineOptions {
    fn from(config: &Config) -> Self {
        Self {
            copy_buffer_bytes: config.copy_buffer_bytes,
            inter_file_pause: Duration::from_millis(config.inter_file_pause_ms),
        }
    }
}

/// Sink for a transfer run's callbacks: incremental progress snapshots
/// and the retry request raised when a destination entry cannot be
/// created. Implementations decouple the engine from any UI technology.
pub trait TransferEvents: Send {
    fn on_progress(&mut self, progress: &TransferProgress);

    /// A destination entry could not be created for `entry`, most
    /// commonly for lack of permission. The run stops; the caller may
    /// re-request access and retry the task from the top.
    fn on_retry_needed(&mut self, entry: &Entry);
}

/// Sink that forwards progress to the log. Used by the scheduler, which
/// has no interactive caller to notify.
pub struct LogEvents;

impl TransferEvents for LogEvents {
    fn on_progress(&mut self, progress: &TransferProgress) {
        debug!(
            "Progress: {}/{} files, {}/{} bytes, current {}",
            progress.files_moved,
            progress.total_files,
            progress.total_bytes_transferred,
            progress.total_bytes,
            progress.current_file_name
        );
    }

    fn on_retry_needed(&mut self, entry: &Entry) {
        warn!(
            "Destination entry could not be created for {}; task needs re-authorization",
            entry.name
        );
    }
}

/// Discovers matching files and streams them from source to destination,
/// one file at a time, deleting each original after a full copy.
pub struct TransferEngine {
    storage: Storage,
    options: EngineOptions,
    shutdown: Option<watch::Receiver<bool>>,
}

impl TransferEngine {
    pub fn new(storage: Storage, options: EngineOptions) -> Self {
        Self {
            storage,
            options,
            shutdown: None,
        }
    }

    /// Attach a shutdown signal. A run checks it between chunks: when it
    /// fires, the current destination partial is abandoned, the source
    /// file is left in place, and the run returns `Cancelled`.
    pub fn with_shutdown(mut self, shutdown: watch::Receiver<bool>) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    fn is_shutting_down(&self) -> bool {
        self.shutdown
            .as_ref()
            .map(|rx| *rx.borrow())
            .unwrap_or(false)
    }

    /// Full task run: pre-flight validation, then the transfer. A run
    /// that matched nothing surfaces as `TransferError::NoMatch` here,
    /// distinguished from the engine-level empty summary.
    pub async fn run(
        &self,
        task: &Task,
        events: &mut dyn TransferEvents,
    ) -> Result<TransferOutcome, TaskError> {
        if let TaskFilter::Rule(rule) = &task.filter {
            validator::validate_rule(rule)?;
        }

        let source = fs::resolve_handle(&Location::parse(&task.source));
        let destination = fs::resolve_handle(&Location::parse(&task.destination));
        validator::validate(source.as_ref(), destination.as_ref()).await?;

        let outcome = self.transfer(task, events).await?;
        if outcome.summary.file_count == 0 && outcome.failures.is_empty() {
            return Err(TaskError::Transfer(TransferError::NoMatch));
        }
        Ok(outcome)
    }

    /// The transfer itself, without validation. Zero matches are not an
    /// error at this level: an empty summary is persisted and returned.
    ///
    /// Per-file failures (an unreadable source, a mid-copy error, a
    /// failed source delete) are collected in the outcome and the batch
    /// continues; only a destination-entry creation failure or a
    /// shutdown aborts the remaining batch.
    pub async fn transfer(
        &self,
        task: &Task,
        events: &mut dyn TransferEvents,
    ) -> Result<TransferOutcome, TransferError> {
        let source_location = Location::parse(&task.source);
        let dest_location = Location::parse(&task.destination);
        let source = fs::resolve_handle(&source_location);
        let destination = fs::resolve_handle(&dest_location);

        let mut candidates: Vec<Entry> = source
            .list()
            .await
            .map_err(TransferError::ReadFailure)?
            .into_iter()
            .filter(|entry| !entry.is_dir && filter_selects(&task.filter, entry))
            .collect();
        // Listing order is backend-defined; sort by name for
        // deterministic processing and progress reporting.
        candidates.sort_by(|a, b| a.name.cmp(&b.name));

        let mut progress = TransferProgress {
            total_files: candidates.len() as u64,
            start_time: Utc::now().timestamp_millis(),
            ..TransferProgress::default()
        };

        if candidates.is_empty() {
            debug!("No files matched task {} in {}", task.id, task.source);
            events.on_progress(&progress);
            return self.finish(task, 0, Vec::new()).await;
        }

        progress.total_bytes = candidates.iter().map(|e| e.size).sum();
        events.on_progress(&progress);

        info!(
            "Transferring {} files ({} bytes) from {} to {}",
            progress.total_files, progress.total_bytes, task.source, task.destination
        );

        let mut moved = 0u64;
        let mut failures: Vec<FileFailure> = Vec::new();
        let total = candidates.len();
        for (index, entry) in candidates.iter().enumerate() {
            let dest_name = repair_duplicate_extension(&entry.name);

            // Counters for the previous file reset here; totals carry on
            progress.current_file_name = dest_name.clone();
            progress.current_file_size = entry.size;
            progress.current_bytes_transferred = 0;
            events.on_progress(&progress);

            let mut writer = match destination.create_entry(&dest_name, GENERIC_MIME).await {
                Ok(writer) => writer,
                Err(err @ FsError::PermissionDenied(_)) => {
                    // Single attempt per invocation: hand the offending
                    // file to the caller and stop the batch.
                    events.on_retry_needed(entry);
                    return Err(TransferError::WriteFailure(err));
                }
                Err(err) => return Err(TransferError::WriteFailure(err)),
            };

            let mut reader = match source.open_reader(&entry.name).await {
                Ok(reader) => reader,
                Err(err) => {
                    // Vanished or unreadable since discovery: fail this
                    // file, keep going with the rest of the batch.
                    warn!("Skipping {}, source unreadable: {}", entry.name, err);
                    drop(writer);
                    if let Err(del) = destination.delete_entry(&dest_name).await {
                        debug!("Orphan destination entry {} not removed: {}", dest_name, del);
                    }
                    failures.push(FileFailure {
                        name: entry.name.clone(),
                        error: TransferError::ReadFailure(err),
                    });
                    continue;
                }
            };

            let mut copy_err: Option<TransferError> = None;
            let mut buf = vec![0u8; self.options.copy_buffer_bytes];
            loop {
                if self.is_shutting_down() {
                    info!("Shutdown during transfer, abandoning {}", dest_name);
                    return Err(TransferError::Cancelled);
                }

                let n = match reader.read(&mut buf).await {
                    Ok(n) => n,
                    Err(e) => {
                        copy_err = Some(TransferError::ReadFailure(FsError::from_io(
                            &entry.name,
                            e,
                        )));
                        break;
                    }
                };
                if n == 0 {
                    break;
                }
                if let Err(e) = writer.write_all(&buf[..n]).await {
                    copy_err = Some(TransferError::WriteFailure(FsError::from_io(&dest_name, e)));
                    break;
                }

                progress.current_bytes_transferred += n as u64;
                progress.total_bytes_transferred += n as u64;
                events.on_progress(&progress);
            }
            if copy_err.is_none() {
                if let Err(e) = writer.shutdown().await {
                    copy_err = Some(TransferError::WriteFailure(FsError::from_io(&dest_name, e)));
                }
            }
            if let Some(err) = copy_err {
                warn!("Failed to copy {}: {}", entry.name, err);
                drop(writer);
                if let Err(del) = destination.delete_entry(&dest_name).await {
                    debug!("Partial destination entry {} not removed: {}", dest_name, del);
                }
                failures.push(FileFailure {
                    name: entry.name.clone(),
                    error: err,
                });
                continue;
            }

            // The copy is complete only once the original is gone. A
            // failed delete leaves a duplicate in both locations and the
            // file counts as not moved; the destination copy is left
            // alone.
            match source.delete_entry(&entry.name).await {
                Ok(()) => {
                    moved += 1;
                    progress.files_moved = moved;
                    events.on_progress(&progress);
                }
                Err(err) => {
                    warn!(
                        "Failed to delete source {} after copy, file not moved: {}",
                        entry.name, err
                    );
                    failures.push(FileFailure {
                        name: entry.name.clone(),
                        error: TransferError::DeleteFailure(err),
                    });
                }
            }

            if index + 1 < total && !self.options.inter_file_pause.is_zero() {
                tokio::time::sleep(self.options.inter_file_pause).await;
            }
        }

        info!(
            "Transfer complete: {}/{} files moved to {}, {} failure(s)",
            moved,
            total,
            task.destination,
            failures.len()
        );
        self.finish(task, moved, failures).await
    }

    async fn finish(
        &self,
        task: &Task,
        moved: u64,
        failures: Vec<FileFailure>,
    ) -> Result<TransferOutcome, TransferError> {
        let summary = TransferSummary {
            source: task.source.clone(),
            destination: task.destination.clone(),
            extension: task.filter.label(),
            file_count: moved,
            timestamp: Utc::now().timestamp(),
        };
        self.storage.record_summary(&summary).await?;
        Ok(TransferOutcome { summary, failures })
    }
}

fn filter_selects(filter: &TaskFilter, entry: &Entry) -> bool {
    match filter {
        TaskFilter::Extension(extension) => {
            let suffix = format!(".{}", extension.to_lowercase());
            entry.name.to_lowercase().ends_with(&suffix)
        }
        TaskFilter::Rule(rule) => rules::rule_matches(entry, rule),
    }
}

/// Collapse a duplicated trailing extension (`name.ext.ext` becomes
/// `name.ext`), so repeated runs cannot accumulate extensions. The cut
/// always lands on a dot of the original name, never inside a
/// multi-byte character.
pub fn repair_duplicate_extension(name: &str) -> String {
    let mut repaired = name.to_string();
    loop {
        let Some(idx) = repaired.rfind('.') else {
            return repaired;
        };
        let ext = &repaired[idx + 1..];
        if ext.is_empty() {
            return repaired;
        }
        let stem = &repaired[..idx];
        let Some(prev) = stem.rfind('.') else {
            return repaired;
        };
        if stem[prev + 1..].to_lowercase() != ext.to_lowercase() {
            return repaired;
        }
        repaired.truncate(idx);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::{mime_hint_for, Location};

    fn entry(name: &str, size: u64) -> Entry {
        let extension = Entry::derive_extension(name);
        Entry {
            name: name.to_string(),
            mime_hint: mime_hint_for(&extension),
            extension,
            size,
            modified: 0,
            parent: Location::Memory("engine-test".to_string()),
            is_dir: false,
        }
    }

    #[test]
    fn repair_collapses_one_duplicate() {
        assert_eq!(repair_duplicate_extension("a.mp3.mp3"), "a.mp3");
    }

    #[test]
    fn repair_collapses_repeated_duplicates() {
        assert_eq!(repair_duplicate_extension("a.mp3.mp3.mp3"), "a.mp3");
    }

    #[test]
    fn repair_leaves_clean_names_alone() {
        assert_eq!(repair_duplicate_extension("a.mp3"), "a.mp3");
        assert_eq!(repair_duplicate_extension("archive.tar.gz"), "archive.tar.gz");
        assert_eq!(repair_duplicate_extension("noext"), "noext");
    }

    #[test]
    fn repair_is_case_insensitive_on_the_extension() {
        assert_eq!(repair_duplicate_extension("a.MP3.mp3"), "a.MP3");
    }

    #[test]
    fn repair_survives_multibyte_extensions() {
        // Extensions whose lowercase form has a different byte length
        // must still cut at the dot of the original name
        assert_eq!(repair_duplicate_extension("f.İ.İ"), "f.İ");
        assert_eq!(repair_duplicate_extension("f.é.é"), "f.é");
        assert_eq!(repair_duplicate_extension("f.İ.i̇"), "f.İ");
    }

    #[test]
    fn extension_filter_matches_suffix_case_insensitively() {
        let filter = TaskFilter::Extension("mp3".to_string());
        assert!(filter_selects(&filter, &entry("song.mp3", 1)));
        assert!(filter_selects(&filter, &entry("SONG.MP3", 1)));
        assert!(filter_selects(&filter, &entry("a.mp3.mp3", 1)));
        assert!(!filter_selects(&filter, &entry("photo.jpg", 1)));
        assert!(!filter_selects(&filter, &entry("mp3", 1)));
    }
}

pub mod local;
pub mod memory;

pub use local::LocalDirHandle;
pub use memory::MemoryDirHandle;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};

/// Generic MIME type used when creating destination entries.
///
/// Destination entries are always created with this type rather than the
/// source entry's own hint, so the storage layer never appends a second
/// extension based on content type.
pub const GENERIC_MIME: &str = "application/octet-stream";

/// Discriminated filesystem failure, returned directly by handle
/// operations so callers never have to inspect error message text.
#[derive(Debug, Error)]
pub enum FsError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("i/o failure at {location}: {source}")]
    Io {
        location: String,
        #[source]
        source: std::io::Error,
    },
}

impl FsError {
    /// Lift a raw `io::Error` into the typed taxonomy, keyed on its kind.
    pub fn from_io(location: impl Into<String>, err: std::io::Error) -> Self {
        let location = location.into();
        match err.kind() {
            std::io::ErrorKind::NotFound => FsError::NotFound(location),
            std::io::ErrorKind::PermissionDenied => FsError::PermissionDenied(location),
            _ => FsError::Io {
                location,
                source: err,
            },
        }
    }
}

/// A parsed location string. Bare paths are promoted to the local form,
/// aliased roots (`~`, `primary:`) are rewritten to the real home
/// directory, and the `mem:` scheme selects the in-memory backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Location {
    Local(PathBuf),
    Memory(String),
}

impl Location {
    pub fn parse(raw: &str) -> Location {
        if let Some(bucket) = raw.strip_prefix("mem:") {
            return Location::Memory(bucket.to_string());
        }

        let path = if let Some(rest) = raw.strip_prefix("file://") {
            rest.to_string()
        } else {
            raw.to_string()
        };

        // Rewrite aliased roots to the real home directory
        let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("/"));
        if let Some(rest) = path.strip_prefix("primary:") {
            return Location::Local(home.join(rest.trim_start_matches('/')));
        }
        if path == "~" {
            return Location::Local(home);
        }
        if let Some(rest) = path.strip_prefix("~/") {
            return Location::Local(home.join(rest));
        }

        Location::Local(PathBuf::from(path))
    }

    pub fn display(&self) -> String {
        match self {
            Location::Local(path) => path.to_string_lossy().to_string(),
            Location::Memory(bucket) => format!("mem:{bucket}"),
        }
    }
}

/// Build the concrete handle for a location. Handles are created on
/// demand and never cached across calls.
pub fn resolve_handle(location: &Location) -> Box<dyn DirectoryHandle> {
    match location {
        Location::Local(path) => Box::new(LocalDirHandle::new(path.clone())),
        Location::Memory(bucket) => Box::new(MemoryDirHandle::open(bucket)),
    }
}

/// Immutable snapshot of one file or sub-directory, taken at discovery
/// time. A changed underlying filesystem invalidates the snapshot;
/// operations against a stale entry fail with `FsError::NotFound`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entry {
    pub name: String,
    /// Lower-cased extension derived from the name; empty when absent.
    pub extension: String,
    pub size: u64,
    pub mime_hint: String,
    /// Last-modified time, epoch seconds.
    pub modified: i64,
    pub parent: Location,
    pub is_dir: bool,
}

impl Entry {
    pub fn derive_extension(name: &str) -> String {
        match name.rsplit_once('.') {
            Some((stem, ext)) if !stem.is_empty() && !ext.is_empty() => ext.to_lowercase(),
            _ => String::new(),
        }
    }
}

/// Best-effort MIME hint from a file extension. Unknown extensions fall
/// back to the generic binary type.
pub fn mime_hint_for(extension: &str) -> String {
    let mime = match extension {
        "mp3" => "audio/mpeg",
        "wav" => "audio/wav",
        "flac" => "audio/flac",
        "ogg" => "audio/ogg",
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "pdf" => "application/pdf",
        "txt" => "text/plain",
        "zip" => "application/zip",
        "mp4" => "video/mp4",
        "mkv" => "video/x-matroska",
        _ => GENERIC_MIME,
    };
    mime.to_string()
}

pub type EntryReader = Box<dyn AsyncRead + Send + Unpin>;
pub type EntryWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Uniform view over a directory, independent of how it is addressed.
/// Only `create_entry`, `delete_entry`, and the `can_write` access
/// probe may modify the directory.
#[async_trait]
pub trait DirectoryHandle: Send + Sync {
    fn location(&self) -> &Location;

    async fn exists(&self) -> bool;

    async fn is_directory(&self) -> bool;

    async fn can_read(&self) -> bool;

    async fn can_write(&self) -> bool;

    /// Snapshot the directory's entries. Listing order is not specified
    /// by the backend; callers that need determinism sort themselves.
    async fn list(&self) -> Result<Vec<Entry>, FsError>;

    async fn open_reader(&self, name: &str) -> Result<EntryReader, FsError>;

    /// Create a writable entry. The `mime_hint` is advisory; backends
    /// that do not track content types ignore it.
    async fn create_entry(&self, name: &str, mime_hint: &str) -> Result<EntryWriter, FsError>;

    async fn delete_entry(&self, name: &str) -> Result<(), FsError>;

    /// Recursive byte size of everything under this directory.
    async fn recursive_size(&self) -> Result<u64, FsError>;

    /// Free space at this location, or `None` when the platform cannot
    /// report it. Callers treat `None` as a pass.
    async fn available_space(&self) -> Option<u64>;
}

use super::{DirectoryHandle, Entry, EntryReader, EntryWriter, FsError, Location};
use async_trait::async_trait;
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::io::Cursor;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::io::AsyncWrite;

/// Process-wide registry of named buckets, so every handle opened on the
/// same `mem:` location observes the same contents.
static REGISTRY: Lazy<Mutex<HashMap<String, Arc<Mutex<Bucket>>>>> =
    Lazy::new(|| Mutex::new(HashMap::new()));

#[derive(Debug, Clone)]
struct MemFile {
    data: Vec<u8>,
    modified: i64,
}

#[derive(Debug, Default)]
struct Bucket {
    files: HashMap<String, MemFile>,
    capacity: Option<u64>,
    deny_read: bool,
    deny_write: bool,
    deny_create: bool,
    deny_delete: bool,
    missing: bool,
    create_calls: u64,
    read_failures: Vec<String>,
}

impl Bucket {
    fn used(&self) -> u64 {
        self.files.values().map(|f| f.data.len() as u64).sum()
    }
}

/// Opaque-handle-backed directory, held entirely in memory. The second
/// concrete `DirectoryHandle` implementation, selected via the `mem:`
/// location scheme; also serves as the failure-injection double in tests.
pub struct MemoryDirHandle {
    bucket: Arc<Mutex<Bucket>>,
    location: Location,
}

impl MemoryDirHandle {
    pub fn open(name: &str) -> Self {
        let bucket = REGISTRY
            .lock()
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(Bucket::default())))
            .clone();
        Self {
            bucket,
            location: Location::Memory(name.to_string()),
        }
    }

    /// Drop a bucket's contents and flags entirely.
    pub fn reset(name: &str) {
        REGISTRY.lock().remove(name);
    }

    pub fn put_file(&self, name: &str, data: &[u8]) {
        self.bucket.lock().files.insert(
            name.to_string(),
            MemFile {
                data: data.to_vec(),
                modified: chrono::Utc::now().timestamp(),
            },
        );
    }

    pub fn put_file_with_modified(&self, name: &str, data: &[u8], modified: i64) {
        self.bucket.lock().files.insert(
            name.to_string(),
            MemFile {
                data: data.to_vec(),
                modified,
            },
        );
    }

    pub fn read_file(&self, name: &str) -> Option<Vec<u8>> {
        self.bucket.lock().files.get(name).map(|f| f.data.clone())
    }

    pub fn file_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.bucket.lock().files.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn create_calls(&self) -> u64 {
        self.bucket.lock().create_calls
    }

    pub fn set_capacity(&self, capacity: Option<u64>) {
        self.bucket.lock().capacity = capacity;
    }

    pub fn set_missing(&self, missing: bool) {
        self.bucket.lock().missing = missing;
    }

    pub fn set_deny_read(&self, deny: bool) {
        self.bucket.lock().deny_read = deny;
    }

    pub fn set_deny_write(&self, deny: bool) {
        self.bucket.lock().deny_write = deny;
    }

    pub fn set_deny_create(&self, deny: bool) {
        self.bucket.lock().deny_create = deny;
    }

    pub fn set_deny_delete(&self, deny: bool) {
        self.bucket.lock().deny_delete = deny;
    }

    /// Make every `open_reader` on `name` fail with an i/o error.
    pub fn set_read_failure(&self, name: &str) {
        self.bucket.lock().read_failures.push(name.to_string());
    }
}

#[async_trait]
impl DirectoryHandle for MemoryDirHandle {
    fn location(&self) -> &Location {
        &self.location
    }

    async fn exists(&self) -> bool {
        !self.bucket.lock().missing
    }

    async fn is_directory(&self) -> bool {
        !self.bucket.lock().missing
    }

    async fn can_read(&self) -> bool {
        let bucket = self.bucket.lock();
        !bucket.missing && !bucket.deny_read
    }

    async fn can_write(&self) -> bool {
        let bucket = self.bucket.lock();
        !bucket.missing && !bucket.deny_write
    }

    async fn list(&self) -> Result<Vec<Entry>, FsError> {
        let bucket = self.bucket.lock();
        if bucket.missing {
            return Err(FsError::NotFound(self.location.display()));
        }
        if bucket.deny_read {
            return Err(FsError::PermissionDenied(self.location.display()));
        }

        let entries = bucket
            .files
            .iter()
            .map(|(name, file)| {
                let extension = Entry::derive_extension(name);
                let mime_hint = super::mime_hint_for(&extension);
                Entry {
                    name: name.clone(),
                    extension,
                    size: file.data.len() as u64,
                    mime_hint,
                    modified: file.modified,
                    parent: self.location.clone(),
                    is_dir: false,
                }
            })
            .collect();

        Ok(entries)
    }

    async fn open_reader(&self, name: &str) -> Result<EntryReader, FsError> {
        let bucket = self.bucket.lock();
        if bucket.deny_read {
            return Err(FsError::PermissionDenied(format!(
                "{}/{name}",
                self.location.display()
            )));
        }
        if bucket.read_failures.iter().any(|n| n == name) {
            return Err(FsError::Io {
                location: format!("{}/{name}", self.location.display()),
                source: std::io::Error::new(std::io::ErrorKind::Other, "read failed"),
            });
        }
        match bucket.files.get(name) {
            Some(file) => Ok(Box::new(Cursor::new(file.data.clone()))),
            None => Err(FsError::NotFound(format!(
                "{}/{name}",
                self.location.display()
            ))),
        }
    }

    async fn create_entry(&self, name: &str, _mime_hint: &str) -> Result<EntryWriter, FsError> {
        let mut bucket = self.bucket.lock();
        bucket.create_calls += 1;
        if bucket.missing {
            return Err(FsError::NotFound(self.location.display()));
        }
        if bucket.deny_create || bucket.deny_write {
            return Err(FsError::PermissionDenied(format!(
                "{}/{name}",
                self.location.display()
            )));
        }
        Ok(Box::new(MemWriter {
            name: name.to_string(),
            buf: Vec::new(),
            bucket: self.bucket.clone(),
        }))
    }

    async fn delete_entry(&self, name: &str) -> Result<(), FsError> {
        let mut bucket = self.bucket.lock();
        if bucket.deny_delete {
            return Err(FsError::PermissionDenied(format!(
                "{}/{name}",
                self.location.display()
            )));
        }
        match bucket.files.remove(name) {
            Some(_) => Ok(()),
            None => Err(FsError::NotFound(format!(
                "{}/{name}",
                self.location.display()
            ))),
        }
    }

    async fn recursive_size(&self) -> Result<u64, FsError> {
        let bucket = self.bucket.lock();
        if bucket.missing {
            return Err(FsError::NotFound(self.location.display()));
        }
        Ok(bucket.used())
    }

    async fn available_space(&self) -> Option<u64> {
        let bucket = self.bucket.lock();
        bucket.capacity.map(|cap| cap.saturating_sub(bucket.used()))
    }
}

/// In-memory writer. Bytes accumulate privately and are committed to the
/// bucket on shutdown, so an abandoned partial write never becomes
/// visible as a file.
struct MemWriter {
    name: String,
    buf: Vec<u8>,
    bucket: Arc<Mutex<Bucket>>,
}

impl AsyncWrite for MemWriter {
    fn poll_write(
        mut self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        data: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        self.buf.extend_from_slice(data);
        Poll::Ready(Ok(data.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(
        mut self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
    ) -> Poll<std::io::Result<()>> {
        let data = std::mem::take(&mut self.buf);
        self.bucket.lock().files.insert(
            self.name.clone(),
            MemFile {
                data,
                modified: chrono::Utc::now().timestamp(),
            },
        );
        Poll::Ready(Ok(()))
    }
}

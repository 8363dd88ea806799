use super::{DirectoryHandle, Entry, EntryReader, EntryWriter, FsError, Location};
use crate::utils::disk;
use async_trait::async_trait;
use std::path::PathBuf;
use std::time::UNIX_EPOCH;
use tokio::fs;
use tracing::debug;

/// Plain filesystem-path-backed directory handle.
pub struct LocalDirHandle {
    path: PathBuf,
    location: Location,
}

impl LocalDirHandle {
    pub fn new(path: PathBuf) -> Self {
        let location = Location::Local(path.clone());
        Self { path, location }
    }

    fn entry_path(&self, name: &str) -> PathBuf {
        self.path.join(name)
    }
}

#[async_trait]
impl DirectoryHandle for LocalDirHandle {
    fn location(&self) -> &Location {
        &self.location
    }

    async fn exists(&self) -> bool {
        fs::metadata(&self.path).await.is_ok()
    }

    async fn is_directory(&self) -> bool {
        match fs::metadata(&self.path).await {
            Ok(meta) => meta.is_dir(),
            Err(_) => false,
        }
    }

    async fn can_read(&self) -> bool {
        fs::read_dir(&self.path).await.is_ok()
    }

    async fn can_write(&self) -> bool {
        // The readonly permission bit does not cover ownership or ACLs;
        // probe effective access with a scratch entry instead.
        let probe = self
            .path
            .join(format!(".tidyflow-write-probe-{}", uuid::Uuid::new_v4()));
        match fs::File::create(&probe).await {
            Ok(file) => {
                drop(file);
                if let Err(e) = fs::remove_file(&probe).await {
                    debug!("Write probe {} not removed: {}", probe.display(), e);
                }
                true
            }
            Err(_) => false,
        }
    }

    async fn list(&self) -> Result<Vec<Entry>, FsError> {
        let mut entries = Vec::new();
        let mut dir = fs::read_dir(&self.path)
            .await
            .map_err(|e| FsError::from_io(self.location.display(), e))?;

        while let Some(item) = dir
            .next_entry()
            .await
            .map_err(|e| FsError::from_io(self.location.display(), e))?
        {
            let name = item.file_name().to_string_lossy().to_string();

            // Entries that vanish mid-listing are simply skipped
            let meta = match item.metadata().await {
                Ok(meta) => meta,
                Err(e) => {
                    debug!("Skipping unreadable entry {}: {}", name, e);
                    continue;
                }
            };

            let modified = meta
                .modified()
                .ok()
                .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
                .map(|d| d.as_secs() as i64)
                .unwrap_or(0);

            let extension = Entry::derive_extension(&name);
            let mime_hint = super::mime_hint_for(&extension);

            entries.push(Entry {
                name,
                extension,
                size: meta.len(),
                mime_hint,
                modified,
                parent: self.location.clone(),
                is_dir: meta.is_dir(),
            });
        }

        Ok(entries)
    }

    async fn open_reader(&self, name: &str) -> Result<EntryReader, FsError> {
        let path = self.entry_path(name);
        let file = fs::File::open(&path)
            .await
            .map_err(|e| FsError::from_io(path.to_string_lossy(), e))?;
        Ok(Box::new(file))
    }

    async fn create_entry(&self, name: &str, _mime_hint: &str) -> Result<EntryWriter, FsError> {
        let path = self.entry_path(name);
        let file = fs::File::create(&path)
            .await
            .map_err(|e| FsError::from_io(path.to_string_lossy(), e))?;
        Ok(Box::new(file))
    }

    async fn delete_entry(&self, name: &str) -> Result<(), FsError> {
        let path = self.entry_path(name);
        fs::remove_file(&path)
            .await
            .map_err(|e| FsError::from_io(path.to_string_lossy(), e))
    }

    async fn recursive_size(&self) -> Result<u64, FsError> {
        let root = self.path.clone();
        let location = self.location.display();
        tokio::task::spawn_blocking(move || {
            let mut total = 0u64;
            for item in walkdir::WalkDir::new(&root).into_iter().flatten() {
                if item.file_type().is_file() {
                    if let Ok(meta) = item.metadata() {
                        total += meta.len();
                    }
                }
            }
            total
        })
        .await
        .map_err(|e| FsError::Io {
            location,
            source: std::io::Error::new(std::io::ErrorKind::Other, e),
        })
    }

    async fn available_space(&self) -> Option<u64> {
        disk::available_space(&self.path).await
    }
}

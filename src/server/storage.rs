//! Shared log store backed by a single append-only file

use crate::config::StorageSettings;
use crate::{Result, SocketLogError};
use bytes::Bytes;
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tokio::sync::Mutex;
use tracing::{debug, info};

/// The single log every connection and the timestamp emitter write into.
///
/// One mutex guards the file for appends and full reads alike, so a reader
/// always sees the log either before or after any given append, never halfway.
pub struct LogStore {
    path: PathBuf,
    file: Mutex<Option<File>>,
    counters: Counters,
}

/// Snapshot of store activity
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreStats {
    /// Completed appends
    pub appends: u64,
    /// Completed full reads
    pub reads: u64,
    /// Bytes appended since open
    pub bytes_appended: u64,
    /// Highest number of tasks ever seen inside the lock at once
    pub max_concurrent_holders: usize,
}

#[derive(Default)]
struct Counters {
    appends: AtomicU64,
    reads: AtomicU64,
    bytes_appended: AtomicU64,
    holders: AtomicUsize,
    max_holders: AtomicUsize,
}

/// Marks the span during which the file lock is held
struct CriticalSection<'a> {
    counters: &'a Counters,
}

impl<'a> CriticalSection<'a> {
    fn enter(counters: &'a Counters) -> Self {
        let now = counters.holders.fetch_add(1, Ordering::SeqCst) + 1;
        counters.max_holders.fetch_max(now, Ordering::SeqCst);
        Self { counters }
    }
}

impl Drop for CriticalSection<'_> {
    fn drop(&mut self) {
        self.counters.holders.fetch_sub(1, Ordering::SeqCst);
    }
}

impl LogStore {
    /// Open the store described by the storage settings
    pub async fn open(settings: &StorageSettings) -> Result<Self> {
        Self::open_path(&settings.data_file, settings.truncate_on_start).await
    }

    /// Open (creating if needed) the data file at `path` in append mode
    pub async fn open_path<P: AsRef<Path>>(path: P, truncate: bool) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .mode(0o644)
            .open(&path)
            .await
            .map_err(|e| {
                SocketLogError::Storage(format!("Failed to open {}: {}", path.display(), e))
            })?;

        if truncate {
            file.set_len(0).await?;
        }

        let existing = file.metadata().await?.len();
        info!(path = %path.display(), existing_bytes = existing, "Log store opened");

        Ok(Self {
            path,
            file: Mutex::new(Some(file)),
            counters: Counters::default(),
        })
    }

    /// Path of the backing file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append `data` to the end of the log as one uninterrupted write
    pub async fn append(&self, data: &[u8]) -> Result<()> {
        let mut guard = self.file.lock().await;
        let _section = CriticalSection::enter(&self.counters);
        let file = guard.as_mut().ok_or_else(closed)?;

        file.write_all(data)
            .await
            .map_err(|e| failed("append to", &self.path, e))?;
        file.flush()
            .await
            .map_err(|e| failed("flush", &self.path, e))?;

        self.counters.appends.fetch_add(1, Ordering::Relaxed);
        self.counters
            .bytes_appended
            .fetch_add(data.len() as u64, Ordering::Relaxed);
        Ok(())
    }

    /// Read the whole log from the beginning
    pub async fn read_all(&self) -> Result<Bytes> {
        let mut guard = self.file.lock().await;
        let _section = CriticalSection::enter(&self.counters);
        let file = guard.as_mut().ok_or_else(closed)?;

        let mut contents = Vec::new();
        file.seek(SeekFrom::Start(0))
            .await
            .map_err(|e| failed("rewind", &self.path, e))?;
        file.read_to_end(&mut contents)
            .await
            .map_err(|e| failed("read", &self.path, e))?;

        self.counters.reads.fetch_add(1, Ordering::Relaxed);
        Ok(Bytes::from(contents))
    }

    /// Activity counters
    pub fn stats(&self) -> StoreStats {
        StoreStats {
            appends: self.counters.appends.load(Ordering::Relaxed),
            reads: self.counters.reads.load(Ordering::Relaxed),
            bytes_appended: self.counters.bytes_appended.load(Ordering::Relaxed),
            max_concurrent_holders: self.counters.max_holders.load(Ordering::SeqCst),
        }
    }

    /// Whether the store still accepts appends and reads
    pub async fn is_open(&self) -> bool {
        self.file.lock().await.is_some()
    }

    /// Close the file and optionally delete it. Later appends and reads fail.
    pub async fn close(&self, remove: bool) -> Result<()> {
        let file = self.file.lock().await.take();

        if let Some(mut file) = file {
            file.flush().await?;
            file.sync_all().await?;
            debug!(path = %self.path.display(), "Log store closed");
        }

        if remove {
            match tokio::fs::remove_file(&self.path).await {
                Ok(()) => info!(path = %self.path.display(), "Log store removed"),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    debug!(path = %self.path.display(), "Log store already removed");
                }
                Err(e) => {
                    return Err(SocketLogError::Storage(format!(
                        "Failed to remove {}: {}",
                        self.path.display(),
                        e
                    )))
                }
            }
        }

        Ok(())
    }
}

fn closed() -> SocketLogError {
    SocketLogError::Storage("log store is closed".to_string())
}

fn failed(action: &str, path: &Path, e: std::io::Error) -> SocketLogError {
    SocketLogError::Storage(format!("Failed to {} {}: {}", action, path.display(), e))
}

//! Memory shared across concurrent sessions.

use crate::store::{MemoryError, MemoryStore};
use crate::types::MemoryRecord;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};

type FileLock = Arc<tokio::sync::Mutex<()>>;

/// One async lock per memory file path for the whole process.
fn file_lock(path: &Path) -> FileLock {
    static LOCKS: OnceLock<Mutex<HashMap<PathBuf, FileLock>>> = OnceLock::new();

    let key = std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf());
    LOCKS
        .get_or_init(|| Mutex::new(HashMap::new()))
        .lock()
        .entry(key)
        .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
        .clone()
}

/// A loaded [`MemoryRecord`] plus its store, safe to share between sessions.
///
/// Reads are cheap snapshots. Every merge+save runs under the process-wide
/// lock for the backing file, so overlapping additions from concurrent
/// sessions cannot interleave their writes.
pub struct SharedMemory {
    store: MemoryStore,
    record: RwLock<MemoryRecord>,
    lock: FileLock,
}

impl SharedMemory {
    /// Load the record behind `store` once.
    pub async fn open(store: MemoryStore) -> Self {
        let lock = file_lock(store.path());
        let record = {
            let _guard = lock.lock().await;
            store.load().await
        };
        Self {
            store,
            record: RwLock::new(record),
            lock,
        }
    }

    /// In-memory only; used when persistence is not wanted.
    pub fn in_memory(store: MemoryStore, record: MemoryRecord) -> Self {
        let lock = file_lock(store.path());
        Self {
            store,
            record: RwLock::new(record),
            lock,
        }
    }

    pub fn snapshot(&self) -> MemoryRecord {
        self.record.read().clone()
    }

    pub fn store(&self) -> &MemoryStore {
        &self.store
    }

    /// Merge `additions` and persist if anything changed.
    ///
    /// The file is re-read under the lock and merged with this instance's
    /// record before the additions go in, so entries saved by another
    /// session on the same file are carried forward instead of overwritten.
    ///
    /// Returns `Ok(true)` when the file content changed and was saved,
    /// `Ok(false)` when nothing was new. On a save failure the merged record
    /// is still kept in memory for the rest of the run and the error is
    /// returned.
    pub async fn merge_and_persist(&self, additions: &MemoryRecord) -> Result<bool, MemoryError> {
        let _guard = self.lock.lock().await;

        let on_disk = self.store.load().await;
        let (current, _) = MemoryStore::merge(&on_disk, &self.record.read());
        let (merged, _) = MemoryStore::merge(&current, additions);

        *self.record.write() = merged.clone();
        if merged == on_disk {
            tracing::debug!("Memory merge produced no new entries");
            return Ok(false);
        }

        self.store.save(&merged).await?;
        tracing::info!("Memory updated, {} entries persisted", merged.len());
        Ok(true)
    }
}

use crate::types::MemoryRecord;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::fs;

#[derive(Debug, Error)]
pub enum MemoryError {
    #[error("Failed to persist memory to {path:?}: {source}")]
    Persistence {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// File-backed persistence for a single [`MemoryRecord`].
///
/// The file holds exactly one JSON object and is always rewritten whole.
#[derive(Debug, Clone)]
pub struct MemoryStore {
    path: PathBuf,
}

impl MemoryStore {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the record, falling back to an empty one.
    ///
    /// A missing file, an unreadable file and malformed content all yield
    /// `MemoryRecord::default()`; loading never fails the session.
    pub async fn load(&self) -> MemoryRecord {
        let content = match fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!("No memory file at {:?}, starting empty", self.path);
                return MemoryRecord::default();
            }
            Err(e) => {
                tracing::warn!("Unreadable memory file {:?}: {}", self.path, e);
                return MemoryRecord::default();
            }
        };

        match serde_json::from_str::<MemoryRecord>(&content) {
            Ok(record) => {
                let record = record.normalized();
                tracing::info!("Loaded {} memory entries from {:?}", record.len(), self.path);
                record
            }
            Err(e) => {
                tracing::warn!("Corrupt memory file {:?}, replacing with empty record: {}", self.path, e);
                MemoryRecord::default()
            }
        }
    }

    /// Overwrite the file with `record`.
    pub async fn save(&self, record: &MemoryRecord) -> Result<(), MemoryError> {
        let content = serde_json::to_string_pretty(record)?;
        let persistence = |source| MemoryError::Persistence {
            path: self.path.clone(),
            source,
        };

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).await.map_err(persistence)?;
            }
        }

        // Atomic write: write to temp file, then rename
        let temp_path = self.path.with_extension("tmp");
        fs::write(&temp_path, content).await.map_err(persistence)?;
        fs::rename(&temp_path, &self.path).await.map_err(persistence)?;

        tracing::debug!("Saved memory to {:?}", self.path);
        Ok(())
    }

    /// Merge proposed additions into `record`, see [`MemoryRecord::merge`].
    pub fn merge(record: &MemoryRecord, additions: &MemoryRecord) -> (MemoryRecord, bool) {
        record.merge(additions)
    }
}

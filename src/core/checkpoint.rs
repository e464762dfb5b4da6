//! Periodic durable flush of the artifact buffer

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info};

use crate::core::errors::{Result, TranslationError};
use crate::core::store::{write_atomic, ArtifactStore};

/// File names used inside an output directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputPaths {
    /// SQL artifact
    pub sql: PathBuf,
    /// Accepted responses, JSONL
    pub journal: PathBuf,
    /// Failure report
    pub error_log: PathBuf,
}

impl OutputPaths {
    /// Standard file names under `dir`
    pub fn in_dir(dir: &Path) -> Self {
        Self {
            sql: dir.join("translations_inserts.sql"),
            journal: dir.join("successful_model_responses.jsonl"),
            error_log: dir.join("processing_errors.log"),
        }
    }

    /// Directory that must exist before anything is written
    pub fn dir(&self) -> Option<&Path> {
        self.sql.parent()
    }
}

/// Writes store snapshots; concurrent flushes are serialized
#[derive(Debug, Clone)]
pub struct ProgressCheckpoint {
    store: Arc<ArtifactStore>,
    paths: OutputPaths,
    write_lock: Arc<Mutex<()>>,
    sequence: Arc<AtomicU64>,
}

impl ProgressCheckpoint {
    /// Checkpoint writing snapshots of `store` to `paths`
    pub fn new(store: Arc<ArtifactStore>, paths: OutputPaths) -> Self {
        Self {
            store,
            paths,
            write_lock: Arc::new(Mutex::new(())),
            sequence: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Files this checkpoint writes
    pub fn paths(&self) -> &OutputPaths {
        &self.paths
    }

    /// Number of completed flushes
    pub fn completed(&self) -> u64 {
        self.sequence.load(Ordering::SeqCst)
    }

    /// Snapshot the store and write every artifact; returns the sequence number
    pub async fn flush_now(&self) -> Result<u64> {
        let _guard = self.write_lock.lock().await;
        // Snapshot under the write lock so a later flush never loses to an earlier one
        let snapshot = self.store.snapshot();

        for (path, content) in [
            (&self.paths.sql, snapshot.sql()),
            (&self.paths.journal, snapshot.journal()),
            (&self.paths.error_log, snapshot.error_log()),
        ] {
            write_atomic(path, content)
                .await
                .map_err(|e| TranslationError::CheckpointWriteError {
                    path: path.display().to_string(),
                    message: e.to_string(),
                })?;
        }

        let seq = self.sequence.fetch_add(1, Ordering::SeqCst) + 1;
        debug!(
            "Checkpoint #{} written ({} statements, {} failures)",
            seq,
            snapshot.statements.len(),
            snapshot.failures.len()
        );
        Ok(seq)
    }

    /// Best-effort flush that does not hold up the caller
    pub fn flush_in_background(&self) -> tokio::task::JoinHandle<()> {
        let checkpoint = self.clone();
        tokio::spawn(async move {
            match checkpoint.flush_now().await {
                Ok(seq) => info!("Checkpoint #{} saved to {}", seq, checkpoint.paths.sql.display()),
                Err(e) => error!("{} (will retry at next checkpoint)", e),
            }
        })
    }
}

//! Job-list snapshot stores.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use tokio::sync::Mutex as AsyncMutex;
use tracing::debug;

use vela_core::{Job, JobSnapshotStore, Result};

use crate::json_file;

/// Snapshot kept as a pretty-printed JSON array in a single file.
pub struct JsonFileSnapshotStore {
    path: PathBuf,
    /// Serializes writers so two saves never interleave on the temp file.
    write_lock: AsyncMutex<()>,
}

impl JsonFileSnapshotStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: AsyncMutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl JobSnapshotStore for JsonFileSnapshotStore {
    async fn load(&self) -> Result<Vec<Job>> {
        let jobs: Vec<Job> = json_file::read(&self.path).await?.unwrap_or_default();
        debug!(path = %self.path.display(), count = jobs.len(), "Job snapshot loaded");
        Ok(jobs)
    }

    async fn save(&self, jobs: &[Job]) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        json_file::write(&self.path, jobs).await
    }
}

/// Snapshot held in memory. Counts saves so tests can assert on them.
#[derive(Default)]
pub struct MemorySnapshotStore {
    jobs: Mutex<Vec<Job>>,
    saves: AtomicUsize,
}

impl MemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from an existing snapshot, as if written by a previous session.
    pub fn with_jobs(jobs: Vec<Job>) -> Self {
        Self {
            jobs: Mutex::new(jobs),
            saves: AtomicUsize::new(0),
        }
    }

    /// The most recently saved snapshot.
    pub fn snapshot(&self) -> Vec<Job> {
        self.jobs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl JobSnapshotStore for MemorySnapshotStore {
    async fn load(&self) -> Result<Vec<Job>> {
        Ok(self.snapshot())
    }

    async fn save(&self, jobs: &[Job]) -> Result<()> {
        *self.jobs.lock().unwrap_or_else(PoisonError::into_inner) = jobs.to_vec();
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

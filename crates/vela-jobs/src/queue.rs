//! The job list, its mutation API, and its durable snapshot.
//!
//! Every mutation happens under one lock, then the resulting snapshot is
//! written to the [`JobSnapshotStore`] after the lock is released. Jobs in
//! `processing` are never written; a job interrupted by a restart is
//! therefore gone on reload rather than resumed.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::Utc;
use tokio::sync::{broadcast, Mutex as AsyncMutex};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use vela_core::{
    progress_percent, Error, EventBus, Job, JobData, JobSnapshotStore, JobStatus, JobType,
    QueueEvent, QueueStats, Result,
};
use vela_store::MemorySnapshotStore;

/// Snapshot captured under the lock, waiting to be written.
#[must_use = "a pending write must be persisted"]
pub(crate) struct PendingWrite {
    revision: u64,
    jobs: Vec<Job>,
}

struct JobList {
    jobs: Vec<Job>,
    /// Bumped on every mutation; orders snapshot writes.
    revision: u64,
}

struct QueueInner {
    list: Mutex<JobList>,
    store: Arc<dyn JobSnapshotStore>,
    events: EventBus,
    /// Revision of the last snapshot written to the store.
    persisted: AsyncMutex<u64>,
}

/// Shared handle to the job list. Cloning is cheap.
#[derive(Clone)]
pub struct JobQueue {
    inner: Arc<QueueInner>,
}

impl JobQueue {
    /// Create an empty queue persisting to `store`.
    pub fn new(store: Arc<dyn JobSnapshotStore>, events: EventBus) -> Self {
        Self::from_jobs(Vec::new(), store, events)
    }

    /// Empty queue with a throwaway in-memory store.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemorySnapshotStore::new()), EventBus::default())
    }

    /// Load the queue from the last persisted snapshot.
    ///
    /// A `processing` entry can only appear if the snapshot was written by
    /// something other than this queue; it is dropped like any other
    /// interrupted job.
    pub async fn restore(store: Arc<dyn JobSnapshotStore>, events: EventBus) -> Result<Self> {
        let loaded = store.load().await?;
        let total = loaded.len();
        let jobs: Vec<Job> = loaded
            .into_iter()
            .filter(|job| job.status != JobStatus::Processing)
            .collect();

        if jobs.len() < total {
            warn!(
                dropped = total - jobs.len(),
                "Dropped interrupted jobs from persisted snapshot"
            );
        }
        info!(
            count = jobs.len(),
            pending = jobs.iter().filter(|j| j.status == JobStatus::Pending).count(),
            "Job queue restored"
        );

        Ok(Self::from_jobs(jobs, store, events))
    }

    fn from_jobs(jobs: Vec<Job>, store: Arc<dyn JobSnapshotStore>, events: EventBus) -> Self {
        Self {
            inner: Arc::new(QueueInner {
                list: Mutex::new(JobList { jobs, revision: 0 }),
                store,
                events,
                persisted: AsyncMutex::new(0),
            }),
        }
    }

    pub fn events(&self) -> &EventBus {
        &self.inner.events
    }

    pub fn subscribe(&self) -> broadcast::Receiver<QueueEvent> {
        self.inner.events.subscribe()
    }

    // -------------------------------------------------------------------------
    // Reads
    // -------------------------------------------------------------------------

    fn lock(&self) -> MutexGuard<'_, JobList> {
        self.inner.list.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// All jobs in insertion order.
    pub fn jobs(&self) -> Vec<Job> {
        self.lock().jobs.clone()
    }

    pub fn get(&self, job_id: Uuid) -> Option<Job> {
        self.lock().jobs.iter().find(|j| j.id == job_id).cloned()
    }

    pub fn len(&self) -> usize {
        self.lock().jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn pending_count(&self) -> usize {
        self.lock()
            .jobs
            .iter()
            .filter(|j| j.status == JobStatus::Pending)
            .count()
    }

    pub fn stats(&self) -> QueueStats {
        let list = self.lock();
        let mut stats = QueueStats {
            total: list.jobs.len(),
            ..Default::default()
        };
        for job in &list.jobs {
            match job.status {
                JobStatus::Pending => stats.pending += 1,
                JobStatus::Processing => stats.processing += 1,
                JobStatus::Completed => stats.completed += 1,
                JobStatus::Failed => stats.failed += 1,
            }
        }
        stats
    }

    // -------------------------------------------------------------------------
    // Mutation plumbing
    // -------------------------------------------------------------------------

    /// Apply `f` under the lock and capture the snapshot to persist.
    pub(crate) fn mutate<R>(&self, f: impl FnOnce(&mut Vec<Job>) -> R) -> (R, PendingWrite) {
        let mut list = self.lock();
        let result = f(&mut list.jobs);
        list.revision += 1;
        let write = PendingWrite {
            revision: list.revision,
            jobs: list
                .jobs
                .iter()
                .filter(|j| j.status != JobStatus::Processing)
                .cloned()
                .collect(),
        };
        (result, write)
    }

    /// Write a captured snapshot unless a newer one has already been written.
    async fn try_persist(&self, write: PendingWrite) -> Result<()> {
        let mut persisted = self.inner.persisted.lock().await;
        if write.revision <= *persisted {
            debug!(
                revision = write.revision,
                persisted = *persisted,
                "Skipping stale job snapshot"
            );
            return Ok(());
        }
        self.inner.store.save(&write.jobs).await?;
        *persisted = write.revision;
        debug!(
            revision = write.revision,
            count = write.jobs.len(),
            "Job snapshot persisted"
        );
        Ok(())
    }

    /// [`try_persist`](Self::try_persist) for the worker's own bookkeeping.
    /// Storage failures are logged; the in-memory queue stays authoritative.
    pub(crate) async fn persist(&self, write: PendingWrite) {
        let revision = write.revision;
        if let Err(e) = self.try_persist(write).await {
            error!(error = %e, revision, "Failed to persist job snapshot");
        }
    }

    async fn apply<R>(&self, f: impl FnOnce(&mut Vec<Job>) -> R) -> R {
        let (result, write) = self.mutate(f);
        self.persist(write).await;
        result
    }

    /// Apply `f` to one job. Returns `None` when the job no longer exists.
    async fn apply_to<R>(&self, job_id: Uuid, f: impl FnOnce(&mut Job) -> R) -> Option<R> {
        self.apply(|jobs| jobs.iter_mut().find(|j| j.id == job_id).map(f))
            .await
    }

    // -------------------------------------------------------------------------
    // Public mutations
    // -------------------------------------------------------------------------

    /// Append a pending job. Does not start any worker.
    pub async fn add_job(
        &self,
        job_type: JobType,
        total_items: usize,
        data: JobData,
    ) -> Result<Uuid> {
        if !data.matches(job_type) {
            return Err(Error::InvalidInput(format!(
                "payload does not match job type {job_type}"
            )));
        }
        let job = Job::new(job_type, total_items, data);
        let job_id = job.id;

        self.apply(|jobs| jobs.push(job)).await;

        debug!(?job_id, %job_type, total_items, "Job queued");
        self.inner
            .events
            .emit(QueueEvent::JobAdded { job_id, job_type });
        Ok(job_id)
    }

    /// Remove one job. Returns whether it existed.
    ///
    /// Fails if the snapshot could not be written; the job is gone from
    /// memory either way.
    pub async fn remove_job(&self, job_id: Uuid) -> Result<bool> {
        let (removed, write) = self.mutate(|jobs| {
            let before = jobs.len();
            jobs.retain(|j| j.id != job_id);
            before != jobs.len()
        });
        let saved = self.try_persist(write).await;
        if removed {
            self.inner.events.emit(QueueEvent::JobRemoved { job_id });
        }
        saved.map(|()| removed)
    }

    /// Remove every completed job. Failed jobs stay visible.
    pub async fn clear_completed(&self) -> Result<usize> {
        self.clear_where(|j| j.status == JobStatus::Completed).await
    }

    /// Remove every job except the one currently processing.
    pub async fn clear_all(&self) -> Result<usize> {
        self.clear_where(|j| j.status != JobStatus::Processing)
            .await
    }

    async fn clear_where(&self, remove: impl Fn(&Job) -> bool) -> Result<usize> {
        let (removed, write) = self.mutate(|jobs| {
            let before = jobs.len();
            jobs.retain(|j| !remove(j));
            before - jobs.len()
        });
        let saved = self.try_persist(write).await;
        info!(removed, "Cleared jobs");
        self.inner.events.emit(QueueEvent::JobsCleared { removed });
        saved.map(|()| removed)
    }

    // -------------------------------------------------------------------------
    // Worker-facing mutations
    // -------------------------------------------------------------------------

    /// Move the oldest pending job to `processing`. Synchronous so the
    /// caller can hold its own lock across the claim.
    pub(crate) fn claim_next(&self) -> Option<(Job, PendingWrite)> {
        let (claimed, write) = self.mutate(|jobs| {
            let job = jobs.iter_mut().find(|j| j.status == JobStatus::Pending)?;
            job.status = JobStatus::Processing;
            job.started_at = Some(Utc::now());
            Some(job.clone())
        });
        claimed.map(|job| (job, write))
    }

    /// Record item progress. `progress` never moves backwards.
    pub(crate) async fn report_progress(&self, job_id: Uuid, processed: usize, total: usize) {
        let updated = self
            .apply_to(job_id, |job| {
                job.processed_items = processed;
                job.total_items = total;
                job.progress = job.progress.max(progress_percent(processed, total));
                (job.progress, job.processed_items, job.total_items)
            })
            .await;

        if let Some((progress, processed_items, total_items)) = updated {
            self.inner.events.emit(QueueEvent::JobProgress {
                job_id,
                progress,
                processed_items,
                total_items,
            });
        }
    }

    pub(crate) async fn set_total(&self, job_id: Uuid, total: usize) {
        self.apply_to(job_id, |job| job.total_items = total).await;
    }

    pub(crate) async fn update_data(&self, job_id: Uuid, f: impl FnOnce(&mut JobData)) {
        self.apply_to(job_id, |job| f(&mut job.data)).await;
    }

    /// Mark a job completed at 100% with every item processed. Returns the
    /// final job.
    pub(crate) async fn complete(&self, job_id: Uuid) -> Option<Job> {
        let (done, previous) = self
            .apply_to(job_id, |job| {
                let previous = job.progress;
                job.status = JobStatus::Completed;
                job.progress = 100;
                job.processed_items = job.total_items;
                job.completed_at = Some(Utc::now());
                (job.clone(), previous)
            })
            .await?;
        if previous < 100 {
            self.inner.events.emit(QueueEvent::JobProgress {
                job_id,
                progress: done.progress,
                processed_items: done.processed_items,
                total_items: done.total_items,
            });
        }
        Some(done)
    }

    /// Mark a job failed with `error`. Returns the final job.
    pub(crate) async fn fail(&self, job_id: Uuid, error: String) -> Option<Job> {
        self.apply_to(job_id, |job| {
            job.status = JobStatus::Failed;
            job.error = Some(error);
            job.completed_at = Some(Utc::now());
            job.clone()
        })
        .await
    }
}

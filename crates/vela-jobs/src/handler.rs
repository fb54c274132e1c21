//! Job handlers, the context they run in, and the type -> handler table.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use vela_core::{BulkLimit, Error, Job, JobData, JobType, Pacing, Result};

use crate::queue::JobQueue;

/// Context provided to job handlers.
///
/// Every pause goes through [`JobContext::pause`], which doubles as a
/// cancellation point: a stop request is observed there and before each
/// item via [`JobContext::ensure_active`].
pub struct JobContext {
    job: Job,
    queue: JobQueue,
    cancel: CancellationToken,
    pacing: Arc<dyn Pacing>,
    bulk_limit: BulkLimit,
}

impl JobContext {
    pub fn new(
        job: Job,
        queue: JobQueue,
        cancel: CancellationToken,
        pacing: Arc<dyn Pacing>,
        bulk_limit: BulkLimit,
    ) -> Self {
        Self {
            job,
            queue,
            cancel,
            pacing,
            bulk_limit,
        }
    }

    /// The job as it was when the worker claimed it.
    pub fn job(&self) -> &Job {
        &self.job
    }

    pub fn job_id(&self) -> Uuid {
        self.job.id
    }

    pub fn data(&self) -> &JobData {
        &self.job.data
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn pacing(&self) -> &dyn Pacing {
        self.pacing.as_ref()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Fail with [`Error::Cancelled`] once processing has been stopped.
    pub fn ensure_active(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        Ok(())
    }

    /// Sleep for `duration`, returning early with [`Error::Cancelled`] on stop.
    pub async fn pause(&self, duration: Duration) -> Result<()> {
        self.ensure_active()?;
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(Error::Cancelled),
            _ = self.pacing.sleep(duration) => Ok(()),
        }
    }

    /// Apply the configured bulk limit and record the resulting item count
    /// as the job's total.
    pub async fn limit<T>(&self, items: Vec<T>) -> Vec<T> {
        let before = items.len();
        let items = self.bulk_limit.apply(items);
        if items.len() < before {
            tracing::debug!(
                job_id = ?self.job.id,
                requested = before,
                kept = items.len(),
                limit = %self.bulk_limit,
                "Bulk limit truncated job items"
            );
        }
        self.queue.set_total(self.job.id, items.len()).await;
        items
    }

    pub async fn report_progress(&self, processed: usize, total: usize) {
        self.queue
            .report_progress(self.job.id, processed, total)
            .await;
    }

    /// Edit the stored payload of this job (e.g. per-item status).
    pub async fn update_data(&self, f: impl FnOnce(&mut JobData)) {
        self.queue.update_data(self.job.id, f).await;
    }

    /// Queue follow-on work. The running worker picks it up after this job.
    pub async fn enqueue(
        &self,
        job_type: JobType,
        total_items: usize,
        data: JobData,
    ) -> Result<Uuid> {
        self.queue.add_job(job_type, total_items, data).await
    }

    /// Error for a payload that does not belong to this handler.
    pub fn payload_mismatch(&self) -> Error {
        Error::InvalidInput(format!(
            "job {} of type {} carries a mismatched payload",
            self.job.id, self.job.job_type
        ))
    }
}

/// Trait for job handlers.
#[async_trait]
pub trait JobHandler: Send + Sync {
    /// The job type this handler processes.
    fn job_type(&self) -> JobType;

    /// Execute the job. An `Err` marks the job failed with its message.
    async fn execute(&self, ctx: &JobContext) -> Result<()>;

    /// Check if this handler can process the given job type.
    fn can_handle(&self, job_type: JobType) -> bool {
        self.job_type() == job_type
    }
}

/// Registry mapping job types to their handlers.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<JobType, Arc<dyn JobHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler. Replaces any existing handler for the same type.
    pub fn register(&mut self, handler: Arc<dyn JobHandler>) {
        let job_type = handler.job_type();
        self.handlers.insert(job_type, handler);
        tracing::debug!(%job_type, "Registered job handler");
    }

    pub fn get(&self, job_type: JobType) -> Option<Arc<dyn JobHandler>> {
        self.handlers.get(&job_type).cloned()
    }

    pub fn has_handler(&self, job_type: JobType) -> bool {
        self.handlers.contains_key(&job_type)
    }

    pub fn registered_types(&self) -> Vec<JobType> {
        self.handlers.keys().copied().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use vela_core::TokioPacing;

    struct RecordingPacing(Mutex<Vec<Duration>>);

    #[async_trait]
    impl Pacing for RecordingPacing {
        async fn sleep(&self, duration: Duration) {
            self.0.lock().unwrap().push(duration);
        }
    }

    struct NoOpHandler(JobType);

    #[async_trait]
    impl JobHandler for NoOpHandler {
        fn job_type(&self) -> JobType {
            self.0
        }

        async fn execute(&self, _ctx: &JobContext) -> Result<()> {
            Ok(())
        }
    }

    fn relike_job() -> Job {
        Job::new(
            JobType::Relike,
            3,
            JobData::Relike {
                post_ids: vec!["a".into(), "b".into(), "c".into()],
            },
        )
    }

    fn context(job: Job, queue: JobQueue, limit: BulkLimit) -> (JobContext, CancellationToken) {
        let cancel = CancellationToken::new();
        let ctx = JobContext::new(job, queue, cancel.clone(), Arc::new(TokioPacing), limit);
        (ctx, cancel)
    }

    #[tokio::test]
    async fn test_ensure_active_after_cancel() {
        let (ctx, cancel) = context(relike_job(), JobQueue::in_memory(), BulkLimit::Unlimited);
        assert!(ctx.ensure_active().is_ok());

        cancel.cancel();
        assert!(ctx.is_cancelled());
        assert!(matches!(ctx.ensure_active(), Err(Error::Cancelled)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_pause_returns_early_on_cancel() {
        let (ctx, cancel) = context(relike_job(), JobQueue::in_memory(), BulkLimit::Unlimited);

        let canceller = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            cancel.cancel();
        });

        let start = tokio::time::Instant::now();
        let result = ctx.pause(Duration::from_secs(3600)).await;
        canceller.await.unwrap();

        assert!(matches!(result, Err(Error::Cancelled)));
        assert!(start.elapsed() < Duration::from_secs(3600));
    }

    #[tokio::test]
    async fn test_pause_goes_through_pacing() {
        let pacing = Arc::new(RecordingPacing(Mutex::new(Vec::new())));
        let ctx = JobContext::new(
            relike_job(),
            JobQueue::in_memory(),
            CancellationToken::new(),
            pacing.clone(),
            BulkLimit::Unlimited,
        );

        ctx.pause(Duration::from_millis(250)).await.unwrap();
        assert_eq!(*pacing.0.lock().unwrap(), vec![Duration::from_millis(250)]);
    }

    #[tokio::test]
    async fn test_limit_truncates_and_sets_total() {
        let queue = JobQueue::in_memory();
        let id = queue
            .add_job(
                JobType::Relike,
                5,
                JobData::Relike {
                    post_ids: vec!["a".into(); 5],
                },
            )
            .await
            .unwrap();
        let job = queue.get(id).unwrap();
        let (ctx, _cancel) = context(job, queue.clone(), BulkLimit::Max(2));

        let kept = ctx.limit(vec![1, 2, 3, 4, 5]).await;

        assert_eq!(kept, vec![1, 2]);
        assert_eq!(queue.get(id).unwrap().total_items, 2);
    }

    #[test]
    fn test_registry_register_and_lookup() {
        let mut registry = HandlerRegistry::new();
        assert!(!registry.has_handler(JobType::Download));

        registry.register(Arc::new(NoOpHandler(JobType::Download)));

        assert!(registry.has_handler(JobType::Download));
        assert!(!registry.has_handler(JobType::Upscale));
        assert_eq!(registry.registered_types(), vec![JobType::Download]);
        assert!(registry.get(JobType::Download).unwrap().can_handle(JobType::Download));
    }
}

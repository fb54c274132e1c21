//! Job worker: the single-flight dispatcher.
//!
//! At most one job runs at a time. [`JobWorker::start_processing`] spawns the
//! dispatch loop if it is not already alive; the loop claims pending jobs in
//! insertion order until none are left or processing is stopped. Stopping is
//! cooperative: the running job observes its cancellation token at its next
//! pause or item boundary and fails with [`Error::Cancelled`].

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use tokio::sync::{broadcast, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use vela_core::{
    ArchiveStore, ConfigProvider, CurrentUserProvider, DownloadItem, Error, Job, JobData, JobType,
    LikeClient, MediaDownloader, Pacing, PostFetcher, PromptLibrary, PurgeCategory, QueueEvent,
    QueueStats, Result, TokioPacing, UpscaleRequester,
};

use crate::config::WorkerConfig;
use crate::handler::{HandlerRegistry, JobContext, JobHandler};
use crate::handlers::{
    dedupe, DownloadHandler, ProcessForUpscaleHandler, PurgeHandler, RelikeHandler, UnlikeHandler,
    UpscaleHandler,
};
use crate::poller::HdUrlPoller;
use crate::queue::JobQueue;

/// External services the job handlers call into.
#[derive(Clone)]
pub struct Collaborators {
    pub posts: Arc<dyn PostFetcher>,
    pub upscaler: Arc<dyn UpscaleRequester>,
    pub downloader: Arc<dyn MediaDownloader>,
    pub likes: Arc<dyn LikeClient>,
    pub archive: Arc<dyn ArchiveStore>,
    pub prompts: Arc<dyn PromptLibrary>,
    pub config: Arc<dyn ConfigProvider>,
    pub user: Arc<dyn CurrentUserProvider>,
}

struct DispatchState {
    /// Set by start, cleared by stop or when the queue drains.
    running: bool,
    /// A dispatch loop task exists. It may outlive `running` while it
    /// finishes the job in flight.
    loop_active: bool,
    current: Option<Uuid>,
    cancel: CancellationToken,
}

struct WorkerInner {
    queue: JobQueue,
    handlers: HandlerRegistry,
    config: Arc<dyn ConfigProvider>,
    pacing: Arc<dyn Pacing>,
    state: Mutex<DispatchState>,
    idle: watch::Sender<bool>,
}

/// Dispatcher over a [`JobQueue`]. Cloning shares the same worker.
#[derive(Clone)]
pub struct JobWorker {
    inner: Arc<WorkerInner>,
}

impl JobWorker {
    fn new(
        queue: JobQueue,
        handlers: HandlerRegistry,
        config: Arc<dyn ConfigProvider>,
        pacing: Arc<dyn Pacing>,
    ) -> Self {
        let (idle, _) = watch::channel(true);
        Self {
            inner: Arc::new(WorkerInner {
                queue,
                handlers,
                config,
                pacing,
                state: Mutex::new(DispatchState {
                    running: false,
                    loop_active: false,
                    current: None,
                    cancel: CancellationToken::new(),
                }),
                idle,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, DispatchState> {
        self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn queue(&self) -> &JobQueue {
        &self.inner.queue
    }

    pub fn subscribe(&self) -> broadcast::Receiver<QueueEvent> {
        self.inner.queue.subscribe()
    }

    pub fn jobs(&self) -> Vec<Job> {
        self.inner.queue.jobs()
    }

    pub fn stats(&self) -> QueueStats {
        self.inner.queue.stats()
    }

    pub fn is_running(&self) -> bool {
        self.lock().running
    }

    /// Job currently being processed, if any.
    pub fn current_job_id(&self) -> Option<Uuid> {
        self.lock().current
    }

    /// Queue a job and make sure the worker is running.
    pub async fn add_job(
        &self,
        job_type: JobType,
        total_items: usize,
        data: JobData,
    ) -> Result<Uuid> {
        let job_id = self.inner.queue.add_job(job_type, total_items, data).await?;
        self.start_processing();
        Ok(job_id)
    }

    pub async fn clear_completed(&self) -> Result<usize> {
        self.inner.queue.clear_completed().await
    }

    /// Remove every job except the one in flight.
    pub async fn clear_all(&self) -> Result<usize> {
        self.inner.queue.clear_all().await
    }

    pub async fn remove_job(&self, job_id: Uuid) -> Result<bool> {
        self.inner.queue.remove_job(job_id).await
    }

    /// Start dispatching. No-op while already running.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start_processing(&self) {
        let spawn_loop = {
            let mut state = self.lock();
            if state.running {
                return;
            }
            state.running = true;
            if state.cancel.is_cancelled() {
                state.cancel = CancellationToken::new();
            }
            self.inner.idle.send_replace(false);
            !std::mem::replace(&mut state.loop_active, true)
        };

        info!(pending = self.inner.queue.pending_count(), "Job worker started");
        self.inner.queue.events().emit(QueueEvent::WorkerStarted);

        if spawn_loop {
            let worker = self.clone();
            tokio::spawn(async move { worker.run_loop().await });
        }
    }

    /// Request a stop. The job in flight fails at its next suspension point;
    /// pending jobs stay pending.
    pub fn stop_processing(&self) {
        let (was_running, interrupted) = {
            let mut state = self.lock();
            let was_running = state.running;
            state.running = false;
            state.cancel.cancel();
            (was_running, state.current.take())
        };

        if was_running {
            info!(interrupted = ?interrupted, "Job worker stopping");
            self.inner.queue.events().emit(QueueEvent::WorkerStopped);
        }
    }

    /// Wait until the dispatch loop has exited.
    pub async fn wait_until_idle(&self) {
        let mut idle = self.inner.idle.subscribe();
        // The sender lives as long as `self`, so this cannot fail.
        let _ = idle.wait_for(|idle| *idle).await;
    }

    async fn run_loop(self) {
        debug!("Dispatch loop started");
        loop {
            let claimed = {
                let mut state = self.lock();
                let next = if state.running {
                    self.inner.queue.claim_next()
                } else {
                    None
                };
                match next {
                    Some((job, write)) => {
                        state.current = Some(job.id);
                        Some((job, write, state.cancel.clone()))
                    }
                    None => {
                        let drained = state.running;
                        state.running = false;
                        state.loop_active = false;
                        state.current = None;
                        self.inner.idle.send_replace(true);
                        drop(state);

                        if drained {
                            info!("Job queue drained, worker idle");
                            self.inner.queue.events().emit(QueueEvent::WorkerStopped);
                        }
                        None
                    }
                }
            };

            let Some((job, write, cancel)) = claimed else {
                break;
            };
            self.inner.queue.persist(write).await;

            let job_id = job.id;
            self.run_job(job, cancel).await;

            let mut state = self.lock();
            if state.current == Some(job_id) {
                state.current = None;
            }
        }
        debug!("Dispatch loop exited");
    }

    async fn run_job(&self, job: Job, cancel: CancellationToken) {
        let start = Instant::now();
        let job_id = job.id;
        let job_type = job.job_type;
        let events = self.inner.queue.events();

        info!(?job_id, %job_type, total_items = job.total_items, "Processing job");
        events.emit(QueueEvent::JobStarted { job_id, job_type });

        let result = match self.inner.handlers.get(job_type) {
            Some(handler) => {
                let ctx = JobContext::new(
                    job,
                    self.inner.queue.clone(),
                    cancel,
                    Arc::clone(&self.inner.pacing),
                    self.inner.config.max_bulk_limit(),
                );
                match tokio::spawn(async move { handler.execute(&ctx).await }).await {
                    Ok(result) => result,
                    Err(e) => {
                        error!(error = ?e, ?job_id, "Job task panicked");
                        Err(Error::Internal("Job task panicked".into()))
                    }
                }
            }
            None => {
                warn!(%job_type, "No handler registered for job type");
                Err(Error::Internal(format!("No handler for job type: {job_type}")))
            }
        };

        let duration_ms = start.elapsed().as_millis() as u64;
        match result {
            Ok(()) => match self.inner.queue.complete(job_id).await {
                Some(done) => {
                    info!(?job_id, %job_type, duration_ms, "Job completed successfully");
                    events.emit(QueueEvent::JobCompleted { job_id, job_type });
                    self.chain(&done).await;
                }
                None => debug!(?job_id, "Completed job was removed while running"),
            },
            Err(e) => {
                let error = e.to_string();
                if self.inner.queue.fail(job_id, error.clone()).await.is_none() {
                    debug!(?job_id, "Failed job was removed while running");
                }
                if e.is_cancelled() {
                    info!(?job_id, %job_type, duration_ms, "Job stopped");
                } else {
                    warn!(?job_id, %job_type, %error, duration_ms, "Job failed");
                }
                events.emit(QueueEvent::JobFailed {
                    job_id,
                    job_type,
                    error,
                });
            }
        }

        if job_type.invalidates_post_list() {
            events.emit(QueueEvent::PostListStale { job_type });
        }
    }

    /// Queue follow-on work for a completed job.
    async fn chain(&self, job: &Job) {
        if job.job_type != JobType::Upscale || !self.inner.config.auto_download_on_upscale() {
            return;
        }
        let JobData::Upscale {
            post_ids,
            video_ids,
            hd_url_map,
        } = &job.data
        else {
            return;
        };
        if hd_url_map.is_empty() {
            debug!(job_id = ?job.id, "No HD URLs resolved, nothing to download");
            return;
        }

        // Download in the order the videos were requested
        let items: Vec<DownloadItem> = dedupe(video_ids)
            .into_iter()
            .filter_map(|video_id| {
                let url = hd_url_map.get(&video_id)?;
                Some(DownloadItem::new(url.clone(), format!("{video_id}_hd.mp4")))
            })
            .collect();
        let count = items.len();
        let data = JobData::Download {
            post_ids: post_ids.clone(),
            items,
        };

        match self.inner.queue.add_job(JobType::Download, count, data).await {
            Ok(download_id) => {
                info!(job_id = ?job.id, ?download_id, count, "Queued auto-download");
            }
            Err(e) => {
                error!(job_id = ?job.id, error = %e, "Failed to queue auto-download");
            }
        }
    }
}

/// Builder for a [`JobWorker`] with the standard handlers registered.
pub struct WorkerBuilder {
    queue: JobQueue,
    collaborators: Collaborators,
    config: WorkerConfig,
    pacing: Arc<dyn Pacing>,
    handlers: Vec<Arc<dyn JobHandler>>,
}

impl WorkerBuilder {
    pub fn new(queue: JobQueue, collaborators: Collaborators) -> Self {
        Self {
            queue,
            collaborators,
            config: WorkerConfig::default(),
            pacing: Arc::new(TokioPacing),
            handlers: Vec::new(),
        }
    }

    pub fn with_config(mut self, config: WorkerConfig) -> Self {
        self.config = config;
        self
    }

    /// Replace the timer every handler pause goes through.
    pub fn with_pacing(mut self, pacing: Arc<dyn Pacing>) -> Self {
        self.pacing = pacing;
        self
    }

    /// Add a handler, replacing the standard one for its job type.
    pub fn with_handler<H: JobHandler + 'static>(mut self, handler: H) -> Self {
        self.handlers.push(Arc::new(handler));
        self
    }

    pub fn build(self) -> JobWorker {
        let c = &self.collaborators;
        let config = &self.config;
        let mut registry = HandlerRegistry::new();

        registry.register(Arc::new(ProcessForUpscaleHandler::new(
            Arc::clone(&c.posts),
            config.fetch_delay,
        )));
        registry.register(Arc::new(UpscaleHandler::new(
            Arc::clone(&c.upscaler),
            HdUrlPoller::new(Arc::clone(&c.posts), config.poll_max_attempts, config.poll_delay),
            config.upscale_batch_size,
            config.upscale_stagger,
            config.upscale_batch_delay,
        )));
        registry.register(Arc::new(DownloadHandler::new(
            Arc::clone(&c.downloader),
            config.download_delay,
        )));
        registry.register(Arc::new(UnlikeHandler::new(
            Arc::clone(&c.likes),
            Arc::clone(&c.archive),
            Arc::clone(&c.user),
            config.like_delay,
            config.like_yield,
        )));
        registry.register(Arc::new(RelikeHandler::new(
            Arc::clone(&c.likes),
            Arc::clone(&c.archive),
            Arc::clone(&c.user),
            config.like_delay,
            config.like_yield,
        )));
        for category in [
            PurgeCategory::LikedPosts,
            PurgeCategory::UnlikedArchive,
            PurgeCategory::PromptPacks,
        ] {
            registry.register(Arc::new(PurgeHandler::new(category, c, config)));
        }

        for handler in self.handlers {
            registry.register(handler);
        }

        debug!(
            handlers = registry.registered_types().len(),
            batch_size = config.upscale_batch_size,
            "Job worker built"
        );
        JobWorker::new(
            self.queue,
            registry,
            Arc::clone(&c.config),
            self.pacing,
        )
    }
}

//! Batched upscale requests with bounded fan-out and HD URL polling.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::task::JoinSet;
use tracing::{debug, info, trace, warn};

use vela_core::{Error, JobData, JobType, Result, UpscaleRequester};

use crate::config::DelayRange;
use crate::handler::{JobContext, JobHandler};
use crate::handlers::dedupe;
use crate::poller::HdUrlPoller;

/// Requests upscales in batches of at most `batch_size` concurrent calls.
///
/// Each batch launches its requests with a random stagger, joins them all,
/// then polls for any video whose response carried no HD URL. Videos that
/// never resolve are left out of `hd_url_map` without failing the job.
pub struct UpscaleHandler {
    requester: Arc<dyn UpscaleRequester>,
    poller: HdUrlPoller,
    batch_size: usize,
    stagger: DelayRange,
    batch_delay: DelayRange,
}

impl UpscaleHandler {
    pub fn new(
        requester: Arc<dyn UpscaleRequester>,
        poller: HdUrlPoller,
        batch_size: usize,
        stagger: DelayRange,
        batch_delay: DelayRange,
    ) -> Self {
        Self {
            requester,
            poller,
            batch_size: batch_size.max(1),
            stagger,
            batch_delay,
        }
    }

    /// Launch one request per video and wait for all of them. Returns the
    /// HD URLs that came back directly, and whether a stop cut the launches
    /// short.
    async fn request_batch(
        &self,
        ctx: &JobContext,
        batch: &[String],
    ) -> (HashMap<String, String>, bool) {
        let mut tasks = JoinSet::new();
        let mut stopped = false;

        for (index, video_id) in batch.iter().enumerate() {
            if index > 0 && ctx.pause(self.stagger.sample()).await.is_err() {
                stopped = true;
                break;
            }
            let requester = Arc::clone(&self.requester);
            let video_id = video_id.clone();
            tasks.spawn(async move {
                let response = requester.request(&video_id).await;
                (video_id, response)
            });
        }

        // Requests already sent are awaited even after a stop.
        let mut resolved = HashMap::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((video_id, Ok(response))) => match response.resolved_url {
                    Some(url) if !url.is_empty() => {
                        trace!(video_id, "HD URL returned with upscale response");
                        resolved.insert(video_id, url);
                    }
                    _ if !response.success => {
                        warn!(job_id = ?ctx.job_id(), video_id, "Upscale request rejected");
                    }
                    _ => {}
                },
                Ok((video_id, Err(e))) => {
                    warn!(job_id = ?ctx.job_id(), video_id, error = %e, "Upscale request failed");
                }
                Err(e) => {
                    warn!(job_id = ?ctx.job_id(), error = %e, "Upscale request task aborted");
                }
            }
        }

        (resolved, stopped)
    }

    /// Merge resolved URLs into the job's `hd_url_map`.
    async fn record(ctx: &JobContext, resolved: HashMap<String, String>) {
        if resolved.is_empty() {
            return;
        }
        ctx.update_data(move |data| {
            if let JobData::Upscale { hd_url_map, .. } = data {
                hd_url_map.extend(resolved);
            }
        })
        .await;
    }
}

#[async_trait]
impl JobHandler for UpscaleHandler {
    fn job_type(&self) -> JobType {
        JobType::Upscale
    }

    async fn execute(&self, ctx: &JobContext) -> Result<()> {
        let JobData::Upscale {
            post_ids,
            video_ids,
            ..
        } = ctx.data()
        else {
            return Err(ctx.payload_mismatch());
        };
        let post_ids = post_ids.clone();
        let video_ids = ctx.limit(dedupe(video_ids)).await;
        let total = video_ids.len();
        let batch_count = total.div_ceil(self.batch_size);

        debug!(
            job_id = ?ctx.job_id(),
            videos = total,
            batches = batch_count,
            batch_size = self.batch_size,
            "Starting upscale"
        );

        let mut processed = 0;
        let mut resolved_total = 0;
        for (index, batch) in video_ids.chunks(self.batch_size).enumerate() {
            ctx.ensure_active()?;
            debug!(job_id = ?ctx.job_id(), batch = index + 1, size = batch.len(), "Upscale batch");

            let (mut resolved, stopped) = self.request_batch(ctx, batch).await;
            if stopped {
                debug!(job_id = ?ctx.job_id(), kept = resolved.len(), "Upscale stopped mid-batch");
                Self::record(ctx, resolved).await;
                return Err(Error::Cancelled);
            }

            let awaited: HashSet<String> = batch
                .iter()
                .filter(|id| !resolved.contains_key(*id))
                .cloned()
                .collect();
            if !awaited.is_empty() {
                let polled = self
                    .poller
                    .poll(&post_ids, &awaited, ctx.pacing(), ctx.cancellation())
                    .await;
                resolved.extend(polled);
            }

            resolved_total += resolved.len();
            Self::record(ctx, resolved).await;
            ctx.ensure_active()?;

            processed += batch.len();
            ctx.report_progress(processed, total).await;
            if index + 1 < batch_count {
                ctx.pause(self.batch_delay.sample()).await?;
            }
        }

        info!(
            job_id = ?ctx.job_id(),
            videos = total,
            resolved = resolved_total,
            "Upscale finished"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::testing::*;
    use crate::queue::JobQueue;
    use std::collections::BTreeMap;
    use tokio_util::sync::CancellationToken;
    use vela_core::BulkLimit;

    const STAGGER_MS: u64 = 1;
    const BATCH_DELAY_MS: u64 = 3000;
    const POLL_DELAY_MS: u64 = 5000;

    fn handler(posts: Arc<StubPosts>, upscaler: Arc<StubUpscaler>, batch_size: usize) -> UpscaleHandler {
        UpscaleHandler::new(
            upscaler,
            HdUrlPoller::new(posts, 3, DelayRange::fixed(POLL_DELAY_MS)),
            batch_size,
            DelayRange::fixed(STAGGER_MS),
            DelayRange::fixed(BATCH_DELAY_MS),
        )
    }

    fn upscale_data(post_ids: Vec<String>, video_ids: Vec<String>) -> JobData {
        JobData::Upscale {
            post_ids,
            video_ids,
            hd_url_map: BTreeMap::new(),
        }
    }

    fn hd_map(data: &JobData) -> BTreeMap<String, String> {
        match data {
            JobData::Upscale { hd_url_map, .. } => hd_url_map.clone(),
            other => panic!("unexpected payload {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_batches_bound_fan_out() {
        let video_ids: Vec<String> = (0..20).map(|i| format!("v{i}")).collect();
        let media = video_ids.iter().map(|id| video(id, None)).collect();
        let posts = StubPosts::new().with_post("p1", media);
        let upscaler = StubUpscaler::new(Some(posts.clone()), &[]);
        let pacing = RecordingPacing::new();
        let handler = handler(posts, upscaler.clone(), 15);

        let (_queue, job, result) = run_handler(
            &handler,
            upscale_data(ids(&["p1"]), video_ids.clone()),
            BulkLimit::Unlimited,
            pacing.clone(),
        )
        .await;

        result.unwrap();
        assert_eq!(upscaler.requests().len(), 20);
        assert!(upscaler.max_in_flight() <= 15);
        // Two batches: one pause between them, none after the last
        assert_eq!(pacing.count_of(BATCH_DELAY_MS), 1);
        assert_eq!(pacing.count_of(STAGGER_MS), 14 + 4);
        assert_eq!(job.processed_items, 20);
        assert_eq!(job.progress, 100);
        assert_eq!(hd_map(&job.data).len(), 20);
        assert_eq!(hd_map(&job.data)["v7"], hd_url("v7"));
    }

    #[tokio::test]
    async fn test_instant_urls_skip_polling() {
        let posts = StubPosts::new().with_post("p1", vec![video("v1", None), video("v2", None)]);
        let upscaler = StubUpscaler::new(None, &["v1", "v2"]);

        let (_queue, job, result) = run_handler(
            &handler(posts.clone(), upscaler, 15),
            upscale_data(ids(&["p1"]), ids(&["v1", "v2", "v1"])),
            BulkLimit::Unlimited,
            RecordingPacing::new(),
        )
        .await;

        result.unwrap();
        assert!(posts.fetches().is_empty());
        assert_eq!(job.total_items, 2);
        assert_eq!(
            hd_map(&job.data).into_keys().collect::<Vec<_>>(),
            ids(&["v1", "v2"])
        );
    }

    #[tokio::test]
    async fn test_unresolved_videos_do_not_fail_job() {
        // No posts stub wired into the upscaler, so nothing ever resolves
        let posts = StubPosts::new().with_post("p1", vec![video("v1", None), video("v2", None)]);
        let upscaler = StubUpscaler::new(None, &["v1"]);
        let pacing = RecordingPacing::new();

        let (_queue, job, result) = run_handler(
            &handler(posts.clone(), upscaler, 15),
            upscale_data(ids(&["p1"]), ids(&["v1", "v2"])),
            BulkLimit::Unlimited,
            pacing.clone(),
        )
        .await;

        result.unwrap();
        assert_eq!(posts.fetches().len(), 3);
        assert_eq!(pacing.count_of(POLL_DELAY_MS), 2);
        assert_eq!(hd_map(&job.data).len(), 1);
        assert_eq!(job.progress, 100);
    }

    #[tokio::test]
    async fn test_progress_reported_per_batch() {
        let video_ids: Vec<String> = (0..20).map(|i| format!("v{i}")).collect();
        let instant: Vec<&str> = video_ids.iter().map(String::as_str).collect();
        let upscaler = StubUpscaler::new(None, &instant);
        let handler = handler(StubPosts::new(), upscaler, 15);

        let queue = JobQueue::in_memory();
        let mut rx = queue.subscribe();
        queue
            .add_job(JobType::Upscale, 20, upscale_data(ids(&["p1"]), video_ids.clone()))
            .await
            .unwrap();
        let (job, write) = queue.claim_next().unwrap();
        queue.persist(write).await;
        let ctx = JobContext::new(
            job,
            queue.clone(),
            CancellationToken::new(),
            RecordingPacing::new(),
            BulkLimit::Unlimited,
        );
        handler.execute(&ctx).await.unwrap();

        let mut progress = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let vela_core::QueueEvent::JobProgress { progress: p, .. } = event {
                progress.push(p);
            }
        }
        assert_eq!(progress, vec![75, 100]);
    }

    #[tokio::test]
    async fn test_bulk_limit_caps_requests() {
        let upscaler = StubUpscaler::new(None, &["v1", "v2", "v3", "v4", "v5"]);

        let (_queue, _job, result) = run_handler(
            &handler(StubPosts::new(), upscaler.clone(), 15),
            upscale_data(ids(&["p1"]), ids(&["v1", "v2", "v3", "v4", "v5"])),
            BulkLimit::Max(2),
            RecordingPacing::new(),
        )
        .await;

        result.unwrap();
        let mut requested = upscaler.requests();
        requested.sort();
        assert_eq!(requested, ids(&["v1", "v2"]));
    }

    #[tokio::test]
    async fn test_stopped_before_start_makes_no_requests() {
        let upscaler = StubUpscaler::new(None, &["v1"]);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let (_queue, _job, result) = run_handler_with_cancel(
            &handler(StubPosts::new(), upscaler.clone(), 15),
            upscale_data(ids(&["p1"]), ids(&["v1"])),
            BulkLimit::Unlimited,
            RecordingPacing::new(),
            cancel,
        )
        .await;

        assert!(matches!(result, Err(Error::Cancelled)));
        assert!(upscaler.requests().is_empty());
    }

    /// Cancels the job the first time it is asked to wait, then never wakes.
    struct StopOnFirstPause(CancellationToken);

    #[async_trait]
    impl vela_core::Pacing for StopOnFirstPause {
        async fn sleep(&self, _duration: std::time::Duration) {
            self.0.cancel();
            std::future::pending::<()>().await;
        }
    }

    #[tokio::test]
    async fn test_stop_mid_batch_keeps_returned_urls() {
        let upscaler = StubUpscaler::new(None, &["v1", "v2"]);
        let cancel = CancellationToken::new();

        let (_queue, job, result) = run_handler_with_cancel(
            &handler(StubPosts::new(), upscaler.clone(), 15),
            upscale_data(ids(&["p1"]), ids(&["v1", "v2"])),
            BulkLimit::Unlimited,
            Arc::new(StopOnFirstPause(cancel.clone())),
            cancel,
        )
        .await;

        assert!(matches!(result, Err(Error::Cancelled)));
        // The stop lands in the stagger pause after v1 is sent
        assert_eq!(upscaler.requests(), ids(&["v1"]));
        assert_eq!(
            hd_map(&job.data),
            BTreeMap::from([("v1".to_string(), hd_url("v1"))])
        );
    }
}

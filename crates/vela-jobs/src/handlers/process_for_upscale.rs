//! Scan posts for videos that still lack an HD version.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, trace, warn};

use vela_core::{JobData, JobType, PostFetcher, Result};

use crate::config::DelayRange;
use crate::handler::{JobContext, JobHandler};

/// Fetches each post, collects videos needing an upscale, and queues one
/// upscale job for all of them. Unreadable posts are skipped.
pub struct ProcessForUpscaleHandler {
    posts: Arc<dyn PostFetcher>,
    fetch_delay: DelayRange,
}

impl ProcessForUpscaleHandler {
    pub fn new(posts: Arc<dyn PostFetcher>, fetch_delay: DelayRange) -> Self {
        Self { posts, fetch_delay }
    }
}

#[async_trait]
impl JobHandler for ProcessForUpscaleHandler {
    fn job_type(&self) -> JobType {
        JobType::ProcessForUpscale
    }

    async fn execute(&self, ctx: &JobContext) -> Result<()> {
        let JobData::ProcessForUpscale { post_ids } = ctx.data() else {
            return Err(ctx.payload_mismatch());
        };
        let post_ids = ctx.limit(post_ids.clone()).await;
        let total = post_ids.len();

        let mut seen = HashSet::new();
        let mut video_ids = Vec::new();
        let mut owners = Vec::new();

        for (index, post_id) in post_ids.iter().enumerate() {
            ctx.ensure_active()?;

            match self.posts.fetch(post_id).await {
                Ok(detail) => {
                    let before = video_ids.len();
                    for video_id in detail.videos_needing_upscale() {
                        if seen.insert(video_id.to_string()) {
                            video_ids.push(video_id.to_string());
                        }
                    }
                    if video_ids.len() > before && !owners.contains(post_id) {
                        owners.push(post_id.clone());
                    }
                    trace!(post_id, found = video_ids.len() - before, "Post scanned");
                }
                Err(e) => {
                    warn!(job_id = ?ctx.job_id(), post_id, error = %e, "Skipping unreadable post");
                }
            }

            ctx.report_progress(index + 1, total).await;
            if index + 1 < total {
                ctx.pause(self.fetch_delay.sample()).await?;
            }
        }

        if video_ids.is_empty() {
            debug!(job_id = ?ctx.job_id(), posts = total, "No videos need upscaling");
            return Ok(());
        }

        let count = video_ids.len();
        let upscale_id = ctx
            .enqueue(
                JobType::Upscale,
                count,
                JobData::Upscale {
                    post_ids: owners,
                    video_ids,
                    hd_url_map: BTreeMap::new(),
                },
            )
            .await?;
        info!(
            job_id = ?ctx.job_id(),
            upscale_job_id = ?upscale_id,
            videos = count,
            "Queued upscale job"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::testing::*;
    use vela_core::{BulkLimit, JobStatus};

    fn handler(posts: Arc<StubPosts>) -> ProcessForUpscaleHandler {
        ProcessForUpscaleHandler::new(posts, DelayRange::fixed(250))
    }

    #[tokio::test]
    async fn test_collects_videos_and_queues_upscale() {
        let posts = StubPosts::new()
            .with_post("p1", vec![image("i1"), video("v1", None), video("v2", Some("https://hd"))])
            .with_post("p2", vec![image("i2")])
            .with_post("p3", vec![video("v3", None), video("v1", None)])
            .with_failing("p4");
        let pacing = RecordingPacing::new();

        let (queue, job, result) = run_handler(
            &handler(posts.clone()),
            JobData::ProcessForUpscale {
                post_ids: ids(&["p1", "p2", "p3", "p4"]),
            },
            BulkLimit::Unlimited,
            pacing.clone(),
        )
        .await;

        result.unwrap();
        assert_eq!(job.processed_items, 4);
        assert_eq!(pacing.count_of(250), 3);

        let upscale = queue
            .jobs()
            .into_iter()
            .find(|j| j.job_type == JobType::Upscale)
            .unwrap();
        assert_eq!(upscale.status, JobStatus::Pending);
        assert_eq!(upscale.total_items, 2);
        assert_eq!(
            upscale.data,
            JobData::Upscale {
                post_ids: ids(&["p1", "p3"]),
                video_ids: ids(&["v1", "v3"]),
                hd_url_map: BTreeMap::new(),
            }
        );
    }

    #[tokio::test]
    async fn test_nothing_queued_when_all_upscaled() {
        let posts = StubPosts::new().with_post("p1", vec![video("v1", Some("https://hd"))]);

        let (queue, _job, result) = run_handler(
            &handler(posts),
            JobData::ProcessForUpscale {
                post_ids: ids(&["p1"]),
            },
            BulkLimit::Unlimited,
            RecordingPacing::new(),
        )
        .await;

        result.unwrap();
        assert_eq!(queue.len(), 1);
    }

    #[tokio::test]
    async fn test_bulk_limit_skips_extra_posts() {
        let posts = StubPosts::new()
            .with_post("p1", vec![video("v1", None)])
            .with_post("p2", vec![video("v2", None)])
            .with_post("p3", vec![video("v3", None)]);

        let (_queue, job, result) = run_handler(
            &handler(posts.clone()),
            JobData::ProcessForUpscale {
                post_ids: ids(&["p1", "p2", "p3"]),
            },
            BulkLimit::Max(2),
            RecordingPacing::new(),
        )
        .await;

        result.unwrap();
        assert_eq!(posts.fetches(), ids(&["p1", "p2"]));
        assert_eq!(job.total_items, 2);
    }
}

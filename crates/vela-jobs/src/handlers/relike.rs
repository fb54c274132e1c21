//! Like archived posts again and drop them from the archive.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{error, info, trace, warn};

use vela_core::{ArchiveStore, CurrentUserProvider, Error, JobData, JobType, LikeClient, Result};

use crate::config::DelayRange;
use crate::handler::{JobContext, JobHandler};
use crate::handlers::dedupe;

/// Mirror of [`UnlikeHandler`](super::UnlikeHandler): likes each post and
/// removes exactly the ones that succeeded from the archive.
pub struct RelikeHandler {
    likes: Arc<dyn LikeClient>,
    archive: Arc<dyn ArchiveStore>,
    user: Arc<dyn CurrentUserProvider>,
    delay: DelayRange,
    yield_after: DelayRange,
}

impl RelikeHandler {
    pub fn new(
        likes: Arc<dyn LikeClient>,
        archive: Arc<dyn ArchiveStore>,
        user: Arc<dyn CurrentUserProvider>,
        delay: DelayRange,
        yield_after: DelayRange,
    ) -> Self {
        Self {
            likes,
            archive,
            user,
            delay,
            yield_after,
        }
    }

    async fn like_all(
        &self,
        ctx: &JobContext,
        post_ids: &[String],
        reliked: &mut Vec<String>,
    ) -> Result<()> {
        let total = post_ids.len();
        for (index, post_id) in post_ids.iter().enumerate() {
            ctx.ensure_active()?;

            match self.likes.like(post_id).await {
                Ok(outcome) if outcome.success => {
                    trace!(post_id, "Liked");
                    reliked.push(post_id.clone());
                }
                Ok(_) => warn!(job_id = ?ctx.job_id(), post_id, "Like was not accepted"),
                Err(e) => warn!(job_id = ?ctx.job_id(), post_id, error = %e, "Like failed"),
            }

            ctx.report_progress(index + 1, total).await;
            ctx.pause(self.yield_after.sample()).await?;
            if index + 1 < total {
                ctx.pause(self.delay.sample()).await?;
            }
        }
        Ok(())
    }

    async fn unarchive(&self, ctx: &JobContext, post_ids: Vec<String>) -> Result<()> {
        if post_ids.is_empty() {
            return Ok(());
        }
        let count = post_ids.len();
        let Some(user_id) = self.user.current_user_id() else {
            error!(job_id = ?ctx.job_id(), count, "No current user, re-liked posts left in archive");
            return Ok(());
        };
        if !self.archive.remove(&post_ids, &user_id).await? {
            return Err(Error::Archive(format!(
                "archive refused to remove {count} records for user {user_id}"
            )));
        }
        info!(job_id = ?ctx.job_id(), count, user_id, "Removed re-liked posts from archive");
        Ok(())
    }
}

#[async_trait]
impl JobHandler for RelikeHandler {
    fn job_type(&self) -> JobType {
        JobType::Relike
    }

    async fn execute(&self, ctx: &JobContext) -> Result<()> {
        let JobData::Relike { post_ids } = ctx.data() else {
            return Err(ctx.payload_mismatch());
        };
        let post_ids = ctx.limit(dedupe(post_ids)).await;

        let mut reliked = Vec::new();
        let outcome = self.like_all(ctx, &post_ids, &mut reliked).await;
        let removed = self.unarchive(ctx, reliked).await;
        outcome.and(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StaticUser;
    use crate::handlers::testing::*;
    use chrono::Utc;
    use vela_core::{BulkLimit, PostRecord};
    use vela_store::MemoryArchiveStore;

    async fn archive_with(user: &str, post_ids: &[&str]) -> Arc<MemoryArchiveStore> {
        let archive = Arc::new(MemoryArchiveStore::new());
        let records = post_ids
            .iter()
            .map(|id| PostRecord::new(*id).into_archive_record(Utc::now()))
            .collect();
        archive.add(records, user).await.unwrap();
        archive
    }

    fn handler(likes: Arc<StubLikes>, archive: Arc<MemoryArchiveStore>) -> RelikeHandler {
        RelikeHandler::new(
            likes,
            archive,
            Arc::new(StaticUser::signed_in("u1")),
            DelayRange::fixed(1200),
            DelayRange::fixed(50),
        )
    }

    #[tokio::test]
    async fn test_removes_only_successful_ids() {
        let archive = archive_with("u1", &["p1", "p2", "p3", "p4"]).await;
        let likes = StubLikes::failing(&["p2"]);

        let (_queue, job, result) = run_handler(
            &handler(likes.clone(), archive.clone()),
            JobData::Relike {
                post_ids: ids(&["p1", "p2", "p3"]),
            },
            BulkLimit::Unlimited,
            RecordingPacing::new(),
        )
        .await;

        result.unwrap();
        assert_eq!(likes.liked(), ids(&["p1", "p2", "p3"]));
        assert_eq!(job.processed_items, 3);
        let left: Vec<String> = archive.records("u1").into_iter().map(|r| r.post_id).collect();
        assert_eq!(left, ids(&["p2", "p4"]));
    }

    #[tokio::test]
    async fn test_bulk_limit_applies() {
        let archive = archive_with("u1", &["p1", "p2", "p3"]).await;
        let likes = StubLikes::new();

        let (_queue, _job, result) = run_handler(
            &handler(likes.clone(), archive.clone()),
            JobData::Relike {
                post_ids: ids(&["p1", "p2", "p3"]),
            },
            BulkLimit::Max(1),
            RecordingPacing::new(),
        )
        .await;

        result.unwrap();
        assert_eq!(likes.liked(), ids(&["p1"]));
        assert_eq!(archive.records("u1").len(), 2);
    }
}

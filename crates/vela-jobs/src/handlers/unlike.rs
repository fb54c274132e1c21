//! Unlike posts and archive them for a later re-like.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tracing::{error, info, trace, warn};

use vela_core::{
    ArchiveRecord, ArchiveStore, CurrentUserProvider, Error, JobData, JobType, LikeClient,
    PostRecord, Result,
};

use crate::config::DelayRange;
use crate::handler::{JobContext, JobHandler};
use crate::handlers::dedupe;

/// Unlikes each post, then archives the ones that succeeded under the
/// current user. Individual failures never fail the job.
pub struct UnlikeHandler {
    likes: Arc<dyn LikeClient>,
    archive: Arc<dyn ArchiveStore>,
    user: Arc<dyn CurrentUserProvider>,
    delay: DelayRange,
    yield_after: DelayRange,
}

impl UnlikeHandler {
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

    async fn unlike_all(
        &self,
        ctx: &JobContext,
        post_ids: &[String],
        known: &[PostRecord],
        archived: &mut Vec<ArchiveRecord>,
    ) -> Result<()> {
        let total = post_ids.len();
        for (index, post_id) in post_ids.iter().enumerate() {
            ctx.ensure_active()?;

            match self.likes.unlike(post_id).await {
                Ok(outcome) if outcome.success => {
                    trace!(post_id, "Unliked");
                    let record = known
                        .iter()
                        .find(|p| &p.id == post_id)
                        .cloned()
                        .unwrap_or_else(|| PostRecord::new(post_id.clone()));
                    archived.push(record.into_archive_record(Utc::now()));
                }
                Ok(_) => warn!(job_id = ?ctx.job_id(), post_id, "Unlike was not accepted"),
                Err(e) => warn!(job_id = ?ctx.job_id(), post_id, error = %e, "Unlike failed"),
            }

            ctx.report_progress(index + 1, total).await;
            ctx.pause(self.yield_after.sample()).await?;
            if index + 1 < total {
                ctx.pause(self.delay.sample()).await?;
            }
        }
        Ok(())
    }

    async fn archive_records(&self, ctx: &JobContext, records: Vec<ArchiveRecord>) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }
        let count = records.len();
        let Some(user_id) = self.user.current_user_id() else {
            error!(job_id = ?ctx.job_id(), count, "No current user, unliked posts were not archived");
            return Ok(());
        };
        if !self.archive.add(records, &user_id).await? {
            return Err(Error::Archive(format!(
                "archive rejected {count} records for user {user_id}"
            )));
        }
        info!(job_id = ?ctx.job_id(), count, user_id, "Archived unliked posts");
        Ok(())
    }
}

#[async_trait]
impl JobHandler for UnlikeHandler {
    fn job_type(&self) -> JobType {
        JobType::Unlike
    }

    async fn execute(&self, ctx: &JobContext) -> Result<()> {
        let JobData::Unlike { post_ids, posts } = ctx.data() else {
            return Err(ctx.payload_mismatch());
        };
        let post_ids = ctx.limit(dedupe(post_ids)).await;

        // Whatever was unliked before a stop still gets archived.
        let mut archived = Vec::new();
        let outcome = self.unlike_all(ctx, &post_ids, posts, &mut archived).await;
        let stored = self.archive_records(ctx, archived).await;
        outcome.and(stored)
    }
}

//! Single-action purges: liked posts, the unliked archive, prompt packs.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};

use vela_core::{
    ArchiveStore, CurrentUserProvider, Error, JobData, JobType, LikeClient, PostFetcher,
    PromptLibrary, PurgeCategory, Result,
};

use crate::config::{DelayRange, WorkerConfig};
use crate::handler::{JobContext, JobHandler};
use crate::worker::Collaborators;

/// Handler for one purge category. Registered once per purge job type.
///
/// Progress is reported as 0 before acting; the worker's completion takes
/// it straight to 100. The bulk limit does not apply.
pub struct PurgeHandler {
    category: PurgeCategory,
    posts: Arc<dyn PostFetcher>,
    likes: Arc<dyn LikeClient>,
    archive: Arc<dyn ArchiveStore>,
    prompts: Arc<dyn PromptLibrary>,
    user: Arc<dyn CurrentUserProvider>,
    feedback_delay: DelayRange,
    like_delay: DelayRange,
    page_size: usize,
}

impl PurgeHandler {
    pub fn new(category: PurgeCategory, collaborators: &Collaborators, config: &WorkerConfig) -> Self {
        Self {
            category,
            posts: Arc::clone(&collaborators.posts),
            likes: Arc::clone(&collaborators.likes),
            archive: Arc::clone(&collaborators.archive),
            prompts: Arc::clone(&collaborators.prompts),
            user: Arc::clone(&collaborators.user),
            feedback_delay: config.purge_feedback_delay,
            like_delay: config.like_delay,
            page_size: config.liked_page_size,
        }
    }

    async fn purge_liked(&self, ctx: &JobContext) -> Result<()> {
        let liked = self.posts.liked_posts(self.page_size).await?;
        let total = liked.len();
        let mut unliked = 0;

        for (index, post) in liked.iter().enumerate() {
            ctx.ensure_active()?;
            match self.likes.unlike(&post.id).await {
                Ok(outcome) if outcome.success => unliked += 1,
                Ok(_) => warn!(job_id = ?ctx.job_id(), post_id = %post.id, "Unlike was not accepted"),
                Err(e) => warn!(job_id = ?ctx.job_id(), post_id = %post.id, error = %e, "Unlike failed"),
            }
            if index + 1 < total {
                ctx.pause(self.like_delay.sample()).await?;
            }
        }

        info!(job_id = ?ctx.job_id(), unliked, total, "Purged liked posts");
        Ok(())
    }

    async fn purge_archive(&self, ctx: &JobContext) -> Result<()> {
        let user_id = self.user.current_user_id();
        if !self.archive.clear(user_id.as_deref()).await? {
            return Err(Error::Archive("archive refused to clear".into()));
        }
        info!(
            job_id = ?ctx.job_id(),
            user_id = user_id.as_deref().unwrap_or("(all)"),
            "Purged unliked archive"
        );
        Ok(())
    }

    async fn purge_prompts(&self, ctx: &JobContext) -> Result<()> {
        self.prompts.reset_to_default().await?;
        info!(job_id = ?ctx.job_id(), "Purged prompt packs");
        Ok(())
    }
}

#[async_trait]
impl JobHandler for PurgeHandler {
    fn job_type(&self) -> JobType {
        self.category.job_type()
    }

    async fn execute(&self, ctx: &JobContext) -> Result<()> {
        match ctx.data() {
            JobData::Purge { category } if *category == self.category => {}
            _ => return Err(ctx.payload_mismatch()),
        }

        ctx.report_progress(0, 1).await;
        ctx.pause(self.feedback_delay.sample()).await?;

        match self.category {
            PurgeCategory::LikedPosts => self.purge_liked(ctx).await,
            PurgeCategory::UnlikedArchive => self.purge_archive(ctx).await,
            PurgeCategory::PromptPacks => self.purge_prompts(ctx).await,
        }
    }
}

//! Collaborator traits consumed by the job queue.
//!
//! Implementations live outside this crate: the host wires in whatever
//! transport reaches the media service, plus the durable stores from
//! `vela-store`.

use std::time::Duration;

use async_trait::async_trait;

use crate::{
    ArchiveRecord, BulkLimit, DownloadOutcome, DownloadRequest, Job, LikeOutcome, PostDetail,
    PostRecord, Result, UpscaleResponse,
};

/// Reads post state from the media service.
#[async_trait]
pub trait PostFetcher: Send + Sync {
    /// Fetch full detail for one post, including its media attachments.
    async fn fetch(&self, post_id: &str) -> Result<PostDetail>;

    /// Fetch up to `limit` of the current user's liked posts.
    async fn liked_posts(&self, limit: usize) -> Result<Vec<PostRecord>>;
}

/// Requests HD upscales from the media service.
#[async_trait]
pub trait UpscaleRequester: Send + Sync {
    async fn request(&self, video_id: &str) -> Result<UpscaleResponse>;
}

/// Saves media files locally.
///
/// Returns [`crate::Error::TransportInvalidated`] once the underlying
/// transport is gone for good.
#[async_trait]
pub trait MediaDownloader: Send + Sync {
    async fn download(&self, requests: &[DownloadRequest]) -> Result<DownloadOutcome>;
}

/// Likes and unlikes posts.
#[async_trait]
pub trait LikeClient: Send + Sync {
    async fn like(&self, post_id: &str) -> Result<LikeOutcome>;
    async fn unlike(&self, post_id: &str) -> Result<LikeOutcome>;
}

/// Durable per-user archive of unliked posts.
#[async_trait]
pub trait ArchiveStore: Send + Sync {
    async fn add(&self, records: Vec<ArchiveRecord>, user_id: &str) -> Result<bool>;
    async fn remove(&self, post_ids: &[String], user_id: &str) -> Result<bool>;
    /// Clear one user's archive, or every archive when `user_id` is `None`.
    async fn clear(&self, user_id: Option<&str>) -> Result<bool>;
}

/// The user's prompt library.
#[async_trait]
pub trait PromptLibrary: Send + Sync {
    /// Replace every pack with a single empty default pack.
    async fn reset_to_default(&self) -> Result<()>;
}

/// Runtime settings read by the queue.
pub trait ConfigProvider: Send + Sync {
    /// Queue a download job when an upscale job completes.
    fn auto_download_on_upscale(&self) -> bool;

    /// Cap applied to every job's item list before processing.
    fn max_bulk_limit(&self) -> BulkLimit;
}

/// Supplies the signed-in user, if any.
pub trait CurrentUserProvider: Send + Sync {
    fn current_user_id(&self) -> Option<String>;
}

/// Durable snapshot of the job list.
#[async_trait]
pub trait JobSnapshotStore: Send + Sync {
    /// Load the last written snapshot. A store with nothing written yields an empty list.
    async fn load(&self) -> Result<Vec<Job>>;

    /// Replace the snapshot with `jobs`.
    async fn save(&self, jobs: &[Job]) -> Result<()>;
}

/// Delay seam for every pause a processor takes.
#[async_trait]
pub trait Pacing: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

/// Production pacing backed by the tokio timer.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioPacing;

#[async_trait]
impl Pacing for TokioPacing {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

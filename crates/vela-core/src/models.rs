//! Data model for queued bulk media work.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, Result};

// =============================================================================
// JOB TYPES
// =============================================================================

/// Status of a job in the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub const ALL: [JobStatus; 4] = [
        JobStatus::Pending,
        JobStatus::Processing,
        JobStatus::Completed,
        JobStatus::Failed,
    ];

    /// Completed and failed jobs never change status again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        JobStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| Error::InvalidInput(format!("unknown job status: {s}")))
    }
}

/// Kind of bulk work a job performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum JobType {
    /// Inspect posts and queue an upscale job for videos that need one
    ProcessForUpscale,
    /// Request HD upscales and wait for their URLs
    Upscale,
    /// Download media files one at a time
    Download,
    /// Unlike posts and archive them
    Unlike,
    /// Like archived posts again and drop them from the archive
    Relike,
    /// Unlike every liked post
    PurgeLiked,
    /// Empty the unliked-post archive
    PurgeArchive,
    /// Reset the prompt library
    PurgePacks,
}

impl JobType {
    pub const ALL: [JobType; 8] = [
        JobType::ProcessForUpscale,
        JobType::Upscale,
        JobType::Download,
        JobType::Unlike,
        JobType::Relike,
        JobType::PurgeLiked,
        JobType::PurgeArchive,
        JobType::PurgePacks,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobType::ProcessForUpscale => "process-for-upscale",
            JobType::Upscale => "upscale",
            JobType::Download => "download",
            JobType::Unlike => "unlike",
            JobType::Relike => "relike",
            JobType::PurgeLiked => "purge-liked",
            JobType::PurgeArchive => "purge-archive",
            JobType::PurgePacks => "purge-packs",
        }
    }

    /// Jobs of this type change the user's liked-post list.
    pub fn invalidates_post_list(&self) -> bool {
        matches!(
            self,
            JobType::Unlike | JobType::Relike | JobType::PurgeLiked
        )
    }

    /// Purge category handled by this type, if it is a purge.
    pub fn purge_category(&self) -> Option<PurgeCategory> {
        match self {
            JobType::PurgeLiked => Some(PurgeCategory::LikedPosts),
            JobType::PurgeArchive => Some(PurgeCategory::UnlikedArchive),
            JobType::PurgePacks => Some(PurgeCategory::PromptPacks),
            _ => None,
        }
    }
}

impl fmt::Display for JobType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        JobType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| Error::InvalidInput(format!("unknown job type: {s}")))
    }
}

/// What a purge job wipes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PurgeCategory {
    LikedPosts,
    UnlikedArchive,
    PromptPacks,
}

impl PurgeCategory {
    pub fn job_type(&self) -> JobType {
        match self {
            PurgeCategory::LikedPosts => JobType::PurgeLiked,
            PurgeCategory::UnlikedArchive => JobType::PurgeArchive,
            PurgeCategory::PromptPacks => JobType::PurgePacks,
        }
    }
}

/// Outcome recorded on an individual download item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemStatus {
    Completed,
    Failed,
}

/// One file of a download job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadItem {
    pub url: String,
    pub filename: String,
    /// Unset until the item has been attempted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<ItemStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl DownloadItem {
    pub fn new(url: impl Into<String>, filename: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            filename: filename.into(),
            status: None,
            error: None,
        }
    }
}

/// Post metadata known to the caller when it queues an unlike job.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostRecord {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbnail_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

impl PostRecord {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Default::default()
        }
    }

    /// Convert into the record kept in the unliked-post archive.
    pub fn into_archive_record(self, unliked_at: DateTime<Utc>) -> ArchiveRecord {
        ArchiveRecord {
            post_id: self.id,
            prompt: self.prompt,
            thumbnail_url: self.thumbnail_url,
            media_url: self.media_url,
            created_at: self.created_at,
            unliked_at,
        }
    }
}

/// A post that was unliked, kept so it can be re-liked later.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArchiveRecord {
    pub post_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbnail_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    pub unliked_at: DateTime<Utc>,
}

/// Per-type job payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum JobData {
    ProcessForUpscale {
        post_ids: Vec<String>,
    },
    Upscale {
        post_ids: Vec<String>,
        video_ids: Vec<String>,
        /// videoId -> resolved HD URL, filled in as batches finish.
        #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
        hd_url_map: BTreeMap<String, String>,
    },
    Download {
        post_ids: Vec<String>,
        items: Vec<DownloadItem>,
    },
    Unlike {
        post_ids: Vec<String>,
        posts: Vec<PostRecord>,
    },
    Relike {
        post_ids: Vec<String>,
    },
    Purge {
        category: PurgeCategory,
    },
}

impl JobData {
    /// Whether this payload is the right shape for `job_type`.
    pub fn matches(&self, job_type: JobType) -> bool {
        match self {
            JobData::ProcessForUpscale { .. } => job_type == JobType::ProcessForUpscale,
            JobData::Upscale { .. } => job_type == JobType::Upscale,
            JobData::Download { .. } => job_type == JobType::Download,
            JobData::Unlike { .. } => job_type == JobType::Unlike,
            JobData::Relike { .. } => job_type == JobType::Relike,
            JobData::Purge { category } => category.job_type() == job_type,
        }
    }

    /// Number of work items carried by the payload (purges count as one).
    pub fn item_count(&self) -> usize {
        match self {
            JobData::ProcessForUpscale { post_ids } => post_ids.len(),
            JobData::Upscale { video_ids, .. } => video_ids.len(),
            JobData::Download { items, .. } => items.len(),
            JobData::Unlike { post_ids, .. } => post_ids.len(),
            JobData::Relike { post_ids } => post_ids.len(),
            JobData::Purge { .. } => 1,
        }
    }
}

/// A job in the processing queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub job_type: JobType,
    pub status: JobStatus,
    /// Percent complete, 0-100. Never decreases.
    pub progress: u8,
    pub processed_items: usize,
    pub total_items: usize,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub data: JobData,
}

impl Job {
    /// Create a pending job with a fresh time-ordered id.
    pub fn new(job_type: JobType, total_items: usize, data: JobData) -> Self {
        Self {
            id: Uuid::now_v7(),
            job_type,
            status: JobStatus::Pending,
            progress: 0,
            processed_items: 0,
            total_items,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            error: None,
            data,
        }
    }
}

/// Integer percent of `done` out of `total`, rounded down and capped at 100.
pub fn progress_percent(done: usize, total: usize) -> u8 {
    if total == 0 {
        return 0;
    }
    ((done.min(total) * 100) / total) as u8
}

/// Queue statistics summary.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    pub pending: usize,
    pub processing: usize,
    pub completed: usize,
    pub failed: usize,
    pub total: usize,
}

// =============================================================================
// BULK LIMIT
// =============================================================================

/// Cap on how many items a single job may touch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum BulkLimit {
    #[default]
    Unlimited,
    Max(usize),
}

impl BulkLimit {
    /// Truncate `items` to the limit. Dropped items are never attempted.
    pub fn apply<T>(&self, mut items: Vec<T>) -> Vec<T> {
        if let BulkLimit::Max(max) = *self {
            items.truncate(max);
        }
        items
    }
}

impl fmt::Display for BulkLimit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BulkLimit::Unlimited => f.write_str("unlimited"),
            BulkLimit::Max(n) => write!(f, "{n}"),
        }
    }
}

impl FromStr for BulkLimit {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("unlimited") {
            return Ok(BulkLimit::Unlimited);
        }
        match s.parse::<usize>() {
            Ok(0) => Err(Error::Config("bulk limit must be positive".into())),
            Ok(n) => Ok(BulkLimit::Max(n)),
            Err(_) => Err(Error::Config(format!(
                "bulk limit must be a positive integer or \"unlimited\", got {s:?}"
            ))),
        }
    }
}

// =============================================================================
// EXTERNAL SERVICE SHAPES
// =============================================================================

/// Media type attached to a post.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Image,
    Video,
}

/// One media attachment of a post.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaItem {
    pub id: String,
    pub kind: MediaKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hd_url: Option<String>,
}

/// Upscale state of a media item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaClass<'a> {
    Image,
    NeedsUpscale,
    Upscaled { hd_url: &'a str },
}

impl MediaItem {
    pub fn classify(&self) -> MediaClass<'_> {
        match (self.kind, self.hd_url.as_deref()) {
            (MediaKind::Image, _) => MediaClass::Image,
            (MediaKind::Video, Some(url)) if !url.is_empty() => {
                MediaClass::Upscaled { hd_url: url }
            }
            (MediaKind::Video, _) => MediaClass::NeedsUpscale,
        }
    }
}

/// Full post detail as returned by the media service.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PostDetail {
    pub id: String,
    #[serde(default)]
    pub media: Vec<MediaItem>,
}

impl PostDetail {
    /// Video ids on this post that have no HD version yet.
    pub fn videos_needing_upscale(&self) -> impl Iterator<Item = &str> {
        self.media
            .iter()
            .filter(|m| m.classify() == MediaClass::NeedsUpscale)
            .map(|m| m.id.as_str())
    }

    /// `(video_id, hd_url)` pairs for videos that already have an HD version.
    pub fn resolved_hd_urls(&self) -> impl Iterator<Item = (&str, &str)> {
        self.media.iter().filter_map(|m| match m.classify() {
            MediaClass::Upscaled { hd_url } => Some((m.id.as_str(), hd_url)),
            _ => None,
        })
    }
}

/// Response to an upscale request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpscaleResponse {
    pub success: bool,
    /// Present when the service answered with the HD URL right away.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_url: Option<String>,
}

/// One file handed to the media downloader.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadRequest {
    pub url: String,
    pub filename: String,
}

impl From<&DownloadItem> for DownloadRequest {
    fn from(item: &DownloadItem) -> Self {
        Self {
            url: item.url.clone(),
            filename: item.filename.clone(),
        }
    }
}

/// Result of a download call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadOutcome {
    pub success: bool,
    pub count: usize,
}

/// Result of a like or unlike call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LikeOutcome {
    pub success: bool,
}

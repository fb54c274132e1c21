//! Stub collaborators shared by the handler unit tests.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use vela_core::{
    BulkLimit, DownloadOutcome, DownloadRequest, Error, Job, JobData, LikeClient, LikeOutcome,
    MediaDownloader, MediaItem, MediaKind, Pacing, PostDetail, PostFetcher, PostRecord, Result,
    UpscaleRequester, UpscaleResponse,
};

use crate::handler::{JobContext, JobHandler};
use crate::queue::JobQueue;

pub(crate) fn ids(values: &[&str]) -> Vec<String> {
    values.iter().map(|s| s.to_string()).collect()
}

pub(crate) fn video(id: &str, hd_url: Option<&str>) -> MediaItem {
    MediaItem {
        id: id.to_string(),
        kind: MediaKind::Video,
        url: Some(format!("https://cdn/{id}.mp4")),
        hd_url: hd_url.map(str::to_string),
    }
}

pub(crate) fn image(id: &str) -> MediaItem {
    MediaItem {
        id: id.to_string(),
        kind: MediaKind::Image,
        url: Some(format!("https://cdn/{id}.png")),
        hd_url: None,
    }
}

pub(crate) fn hd_url(video_id: &str) -> String {
    format!("https://cdn/{video_id}_hd.mp4")
}

/// Records every requested delay and returns immediately.
#[derive(Default)]
pub(crate) struct RecordingPacing {
    sleeps: Mutex<Vec<Duration>>,
}

impl RecordingPacing {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn sleeps(&self) -> Vec<Duration> {
        self.sleeps.lock().unwrap().clone()
    }

    pub(crate) fn count_of(&self, ms: u64) -> usize {
        self.sleeps()
            .iter()
            .filter(|d| **d == Duration::from_millis(ms))
            .count()
    }
}

#[async_trait]
impl Pacing for RecordingPacing {
    async fn sleep(&self, duration: Duration) {
        self.sleeps.lock().unwrap().push(duration);
        tokio::task::yield_now().await;
    }
}

/// Post details held in memory; the upscaler stub can mark videos resolved.
#[derive(Default)]
pub(crate) struct StubPosts {
    details: Mutex<HashMap<String, PostDetail>>,
    failing: Mutex<HashSet<String>>,
    liked: Mutex<Vec<PostRecord>>,
    fetches: Mutex<Vec<String>>,
}

impl StubPosts {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn with_post(self: Arc<Self>, id: &str, media: Vec<MediaItem>) -> Arc<Self> {
        self.details.lock().unwrap().insert(
            id.to_string(),
            PostDetail {
                id: id.to_string(),
                media,
            },
        );
        self
    }

    pub(crate) fn with_failing(self: Arc<Self>, id: &str) -> Arc<Self> {
        self.failing.lock().unwrap().insert(id.to_string());
        self
    }

    pub(crate) fn with_liked(self: Arc<Self>, records: Vec<PostRecord>) -> Arc<Self> {
        *self.liked.lock().unwrap() = records;
        self
    }

    /// Give `video_id` an HD URL wherever it appears.
    pub(crate) fn resolve(&self, video_id: &str) {
        for detail in self.details.lock().unwrap().values_mut() {
            for item in detail.media.iter_mut().filter(|m| m.id == video_id) {
                item.hd_url = Some(hd_url(video_id));
            }
        }
    }

    pub(crate) fn fetches(&self) -> Vec<String> {
        self.fetches.lock().unwrap().clone()
    }
}

#[async_trait]
impl PostFetcher for StubPosts {
    async fn fetch(&self, post_id: &str) -> Result<PostDetail> {
        self.fetches.lock().unwrap().push(post_id.to_string());
        if self.failing.lock().unwrap().contains(post_id) {
            return Err(Error::Request(format!("post {post_id} unavailable")));
        }
        self.details
            .lock()
            .unwrap()
            .get(post_id)
            .cloned()
            .ok_or_else(|| Error::NotFound(post_id.to_string()))
    }

    async fn liked_posts(&self, limit: usize) -> Result<Vec<PostRecord>> {
        Ok(self.liked.lock().unwrap().iter().take(limit).cloned().collect())
    }
}

/// Upscaler that answers some ids right away and resolves the rest through
/// [`StubPosts`] so the poller finds them.
pub(crate) struct StubUpscaler {
    posts: Option<Arc<StubPosts>>,
    instant: HashSet<String>,
    requests: Mutex<Vec<String>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl StubUpscaler {
    pub(crate) fn new(posts: Option<Arc<StubPosts>>, instant: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            posts,
            instant: instant.iter().map(|s| s.to_string()).collect(),
            requests: Mutex::new(Vec::new()),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        })
    }

    pub(crate) fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }

    pub(crate) fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl UpscaleRequester for StubUpscaler {
    async fn request(&self, video_id: &str) -> Result<UpscaleResponse> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        self.requests.lock().unwrap().push(video_id.to_string());
        tokio::time::sleep(Duration::from_millis(5)).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if self.instant.contains(video_id) {
            return Ok(UpscaleResponse {
                success: true,
                resolved_url: Some(hd_url(video_id)),
            });
        }
        if let Some(posts) = &self.posts {
            posts.resolve(video_id);
        }
        Ok(UpscaleResponse {
            success: true,
            resolved_url: None,
        })
    }
}

#[derive(Clone, Copy)]
pub(crate) enum Fault {
    Transport,
    Request,
    Rejected,
}

/// Downloader failing on chosen call numbers (0-based).
#[derive(Default)]
pub(crate) struct StubDownloader {
    faults: HashMap<usize, Fault>,
    calls: Mutex<Vec<DownloadRequest>>,
}

impl StubDownloader {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn failing_at(faults: &[(usize, Fault)]) -> Arc<Self> {
        Arc::new(Self {
            faults: faults.iter().copied().collect(),
            calls: Mutex::new(Vec::new()),
        })
    }

    pub(crate) fn calls(&self) -> Vec<DownloadRequest> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl MediaDownloader for StubDownloader {
    async fn download(&self, requests: &[DownloadRequest]) -> Result<DownloadOutcome> {
        let call = {
            let mut calls = self.calls.lock().unwrap();
            calls.extend_from_slice(requests);
            calls.len() - 1
        };
        match self.faults.get(&call) {
            Some(Fault::Transport) => Err(Error::TransportInvalidated("port closed".into())),
            Some(Fault::Request) => Err(Error::Request("HTTP 404".into())),
            Some(Fault::Rejected) => Ok(DownloadOutcome {
                success: false,
                count: 0,
            }),
            None => Ok(DownloadOutcome {
                success: true,
                count: requests.len(),
            }),
        }
    }
}

/// Like client failing for chosen post ids.
#[derive(Default)]
pub(crate) struct StubLikes {
    failing: HashSet<String>,
    liked: Mutex<Vec<String>>,
    unliked: Mutex<Vec<String>>,
}

impl StubLikes {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn failing(ids: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            failing: ids.iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        })
    }

    pub(crate) fn liked(&self) -> Vec<String> {
        self.liked.lock().unwrap().clone()
    }

    pub(crate) fn unliked(&self) -> Vec<String> {
        self.unliked.lock().unwrap().clone()
    }

    fn answer(&self, post_id: &str, log: &Mutex<Vec<String>>) -> Result<LikeOutcome> {
        log.lock().unwrap().push(post_id.to_string());
        if self.failing.contains(post_id) {
            return Err(Error::Request(format!("rate limited on {post_id}")));
        }
        Ok(LikeOutcome { success: true })
    }
}

#[async_trait]
impl LikeClient for StubLikes {
    async fn like(&self, post_id: &str) -> Result<LikeOutcome> {
        self.answer(post_id, &self.liked)
    }

    async fn unlike(&self, post_id: &str) -> Result<LikeOutcome> {
        self.answer(post_id, &self.unliked)
    }
}

/// Queue `data` for `handler`, claim it, and run the handler once.
/// Returns the queue and the job as stored after execution.
pub(crate) async fn run_handler(
    handler: &dyn JobHandler,
    data: JobData,
    limit: BulkLimit,
    pacing: Arc<dyn Pacing>,
) -> (JobQueue, Job, Result<()>) {
    run_handler_with_cancel(handler, data, limit, pacing, CancellationToken::new()).await
}

pub(crate) async fn run_handler_with_cancel(
    handler: &dyn JobHandler,
    data: JobData,
    limit: BulkLimit,
    pacing: Arc<dyn Pacing>,
    cancel: CancellationToken,
) -> (JobQueue, Job, Result<()>) {
    let queue = JobQueue::in_memory();
    let id = queue
        .add_job(handler.job_type(), data.item_count(), data)
        .await
        .unwrap();
    let (job, write) = queue.claim_next().unwrap();
    queue.persist(write).await;

    let ctx = JobContext::new(job, queue.clone(), cancel, pacing, limit);
    let result = handler.execute(&ctx).await;
    let job = queue.get(id).unwrap();
    (queue, job, result)
}

//! Bounded polling for HD URLs that the media service produces eventually.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace};

use vela_core::{Pacing, PostFetcher};

use crate::config::DelayRange;

/// Re-reads post detail until every awaited video has an HD URL or the
/// attempt cap is hit. Never fails: the result is whatever resolved.
pub struct HdUrlPoller {
    posts: Arc<dyn PostFetcher>,
    max_attempts: u32,
    delay: DelayRange,
}

impl HdUrlPoller {
    pub fn new(posts: Arc<dyn PostFetcher>, max_attempts: u32, delay: DelayRange) -> Self {
        Self {
            posts,
            max_attempts,
            delay,
        }
    }

    /// Poll `post_ids` for the videos in `awaited`.
    ///
    /// Returns `videoId -> hdUrl` for every video that resolved. A stop
    /// request ends polling early with the partial result.
    pub async fn poll(
        &self,
        post_ids: &[String],
        awaited: &HashSet<String>,
        pacing: &dyn Pacing,
        cancel: &CancellationToken,
    ) -> HashMap<String, String> {
        let mut resolved: HashMap<String, String> = HashMap::new();
        let mut attempts = 0;

        while resolved.len() < awaited.len() && attempts < self.max_attempts {
            attempts += 1;

            for post_id in post_ids {
                if cancel.is_cancelled() {
                    break;
                }
                let detail = match self.posts.fetch(post_id).await {
                    Ok(detail) => detail,
                    Err(e) => {
                        debug!(post_id, attempt = attempts, error = %e, "Poll fetch failed");
                        continue;
                    }
                };
                for (video_id, hd_url) in detail.resolved_hd_urls() {
                    if awaited.contains(video_id) && !resolved.contains_key(video_id) {
                        trace!(video_id, attempt = attempts, "HD URL resolved");
                        resolved.insert(video_id.to_string(), hd_url.to_string());
                    }
                }
            }

            if resolved.len() >= awaited.len() || attempts >= self.max_attempts {
                break;
            }
            if cancel.is_cancelled() {
                debug!(attempts, "Polling stopped early");
                break;
            }
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = pacing.sleep(self.delay.sample()) => {}
            }
        }

        if resolved.len() < awaited.len() {
            info!(
                attempts,
                resolved = resolved.len(),
                awaited = awaited.len(),
                "Polling ended with unresolved videos"
            );
        } else {
            debug!(attempts, resolved = resolved.len(), "All awaited HD URLs resolved");
        }
        resolved
    }
}

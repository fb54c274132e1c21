//! Worker timing configuration and the stock config/user providers.

use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{PoisonError, RwLock};
use std::time::Duration;

use rand::Rng;
use tracing::warn;

use vela_core::defaults;
use vela_core::{BulkLimit, ConfigProvider, CurrentUserProvider, Error, Result};

/// Inclusive millisecond range a pause is drawn from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DelayRange {
    pub min_ms: u64,
    pub max_ms: u64,
}

impl DelayRange {
    /// Range with `min_ms` and `max_ms` swapped into order if needed.
    pub fn new(min_ms: u64, max_ms: u64) -> Self {
        Self {
            min_ms: min_ms.min(max_ms),
            max_ms: min_ms.max(max_ms),
        }
    }

    pub fn fixed(ms: u64) -> Self {
        Self::new(ms, ms)
    }

    /// Draw a pause uniformly from the range.
    pub fn sample(&self) -> Duration {
        if self.min_ms == self.max_ms {
            return Duration::from_millis(self.min_ms);
        }
        Duration::from_millis(rand::thread_rng().gen_range(self.min_ms..=self.max_ms))
    }
}

impl fmt::Display for DelayRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.min_ms == self.max_ms {
            write!(f, "{}", self.min_ms)
        } else {
            write!(f, "{}-{}", self.min_ms, self.max_ms)
        }
    }
}

impl FromStr for DelayRange {
    type Err = Error;

    /// Accepts `"500"` or `"300-900"`.
    fn from_str(s: &str) -> Result<Self> {
        let parse = |v: &str| {
            v.trim()
                .parse::<u64>()
                .map_err(|_| Error::Config(format!("invalid delay range: {s:?}")))
        };
        match s.split_once('-') {
            Some((min, max)) => Ok(Self::new(parse(min)?, parse(max)?)),
            None => Ok(Self::fixed(parse(s)?)),
        }
    }
}

/// Configuration for the job worker and its processors.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Upscale requests launched together before joining.
    pub upscale_batch_size: usize,
    /// Stagger between upscale request launches within a batch.
    pub upscale_stagger: DelayRange,
    /// Pause between upscale batches.
    pub upscale_batch_delay: DelayRange,
    /// Poll iterations allowed while waiting for HD URLs.
    pub poll_max_attempts: u32,
    /// Pause between poll iterations.
    pub poll_delay: DelayRange,
    /// Pause between post detail fetches.
    pub fetch_delay: DelayRange,
    /// Pause between downloads.
    pub download_delay: DelayRange,
    /// Pause between like/unlike calls.
    pub like_delay: DelayRange,
    /// Yield after each like/unlike call.
    pub like_yield: DelayRange,
    /// Pause before a purge acts.
    pub purge_feedback_delay: DelayRange,
    /// Liked posts fetched by a liked-posts purge.
    pub liked_page_size: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            upscale_batch_size: defaults::UPSCALE_BATCH_SIZE,
            upscale_stagger: DelayRange::new(
                defaults::UPSCALE_STAGGER_MIN_MS,
                defaults::UPSCALE_STAGGER_MAX_MS,
            ),
            upscale_batch_delay: DelayRange::new(
                defaults::UPSCALE_BATCH_DELAY_MIN_MS,
                defaults::UPSCALE_BATCH_DELAY_MAX_MS,
            ),
            poll_max_attempts: defaults::POLL_MAX_ATTEMPTS,
            poll_delay: DelayRange::new(defaults::POLL_DELAY_MIN_MS, defaults::POLL_DELAY_MAX_MS),
            fetch_delay: DelayRange::fixed(defaults::FETCH_DELAY_MS),
            download_delay: DelayRange::fixed(defaults::DOWNLOAD_DELAY_MS),
            like_delay: DelayRange::new(defaults::LIKE_DELAY_MIN_MS, defaults::LIKE_DELAY_MAX_MS),
            like_yield: DelayRange::fixed(defaults::LIKE_YIELD_MS),
            purge_feedback_delay: DelayRange::fixed(defaults::PURGE_FEEDBACK_DELAY_MS),
            liked_page_size: defaults::LIKED_PAGE_SIZE,
        }
    }
}

fn env_parse<T: FromStr>(key: &str) -> Option<T> {
    let raw = std::env::var(key).ok()?;
    match raw.parse::<T>() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!(key, value = %raw, "Ignoring unparseable environment value");
            None
        }
    }
}

impl WorkerConfig {
    /// Create config from environment variables (with defaults).
    ///
    /// | Variable | Default | Description |
    /// |----------|---------|-------------|
    /// | `VELA_UPSCALE_BATCH_SIZE` | `15` | Upscale requests in flight together |
    /// | `VELA_UPSCALE_STAGGER_MS` | `300-900` | Stagger between launches |
    /// | `VELA_UPSCALE_BATCH_DELAY_MS` | `2000-4000` | Pause between batches |
    /// | `VELA_POLL_MAX_ATTEMPTS` | `60` | HD URL poll attempt cap |
    /// | `VELA_POLL_DELAY_MS` | `4000-6000` | Pause between poll iterations |
    /// | `VELA_FETCH_DELAY_MS` | `250` | Pause between post fetches |
    /// | `VELA_DOWNLOAD_DELAY_MS` | `1000` | Pause between downloads |
    /// | `VELA_LIKE_DELAY_MS` | `800-1600` | Pause between like/unlike calls |
    /// | `VELA_LIKE_YIELD_MS` | `50` | Yield after each like/unlike call |
    /// | `VELA_PURGE_FEEDBACK_MS` | `500` | Pause before a purge acts |
    /// | `VELA_LIKED_PAGE_SIZE` | `1000` | Liked posts fetched by a purge |
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            upscale_batch_size: env_parse::<usize>("VELA_UPSCALE_BATCH_SIZE")
                .unwrap_or(d.upscale_batch_size)
                .max(1),
            upscale_stagger: env_parse("VELA_UPSCALE_STAGGER_MS").unwrap_or(d.upscale_stagger),
            upscale_batch_delay: env_parse("VELA_UPSCALE_BATCH_DELAY_MS")
                .unwrap_or(d.upscale_batch_delay),
            poll_max_attempts: env_parse("VELA_POLL_MAX_ATTEMPTS").unwrap_or(d.poll_max_attempts),
            poll_delay: env_parse("VELA_POLL_DELAY_MS").unwrap_or(d.poll_delay),
            fetch_delay: env_parse("VELA_FETCH_DELAY_MS").unwrap_or(d.fetch_delay),
            download_delay: env_parse("VELA_DOWNLOAD_DELAY_MS").unwrap_or(d.download_delay),
            like_delay: env_parse("VELA_LIKE_DELAY_MS").unwrap_or(d.like_delay),
            like_yield: env_parse("VELA_LIKE_YIELD_MS").unwrap_or(d.like_yield),
            purge_feedback_delay: env_parse("VELA_PURGE_FEEDBACK_MS")
                .unwrap_or(d.purge_feedback_delay),
            liked_page_size: env_parse("VELA_LIKED_PAGE_SIZE").unwrap_or(d.liked_page_size),
        }
    }

    /// Set the upscale batch size (minimum 1).
    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.upscale_batch_size = size.max(1);
        self
    }

    pub fn with_upscale_stagger(mut self, range: DelayRange) -> Self {
        self.upscale_stagger = range;
        self
    }

    pub fn with_upscale_batch_delay(mut self, range: DelayRange) -> Self {
        self.upscale_batch_delay = range;
        self
    }

    pub fn with_poll(mut self, max_attempts: u32, delay: DelayRange) -> Self {
        self.poll_max_attempts = max_attempts;
        self.poll_delay = delay;
        self
    }

    pub fn with_fetch_delay(mut self, range: DelayRange) -> Self {
        self.fetch_delay = range;
        self
    }

    pub fn with_download_delay(mut self, range: DelayRange) -> Self {
        self.download_delay = range;
        self
    }

    pub fn with_like_pacing(mut self, delay: DelayRange, yield_after: DelayRange) -> Self {
        self.like_delay = delay;
        self.like_yield = yield_after;
        self
    }

    pub fn with_purge_feedback_delay(mut self, range: DelayRange) -> Self {
        self.purge_feedback_delay = range;
        self
    }

    pub fn with_liked_page_size(mut self, size: usize) -> Self {
        self.liked_page_size = size;
        self
    }
}

/// Settings held in memory and adjustable while the worker runs.
#[derive(Debug, Default)]
pub struct StaticConfig {
    auto_download: AtomicBool,
    bulk_limit: RwLock<BulkLimit>,
}

impl StaticConfig {
    pub fn new(auto_download: bool, bulk_limit: BulkLimit) -> Self {
        Self {
            auto_download: AtomicBool::new(auto_download),
            bulk_limit: RwLock::new(bulk_limit),
        }
    }

    pub fn set_auto_download(&self, enabled: bool) {
        self.auto_download.store(enabled, Ordering::SeqCst);
    }

    pub fn set_max_bulk_limit(&self, limit: BulkLimit) {
        *self
            .bulk_limit
            .write()
            .unwrap_or_else(PoisonError::into_inner) = limit;
    }
}

impl ConfigProvider for StaticConfig {
    fn auto_download_on_upscale(&self) -> bool {
        self.auto_download.load(Ordering::SeqCst)
    }

    fn max_bulk_limit(&self) -> BulkLimit {
        *self.bulk_limit.read().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Settings read once from the environment.
///
/// | Variable | Default | Description |
/// |----------|---------|-------------|
/// | `VELA_AUTO_DOWNLOAD` | `false` | Queue downloads when an upscale completes |
/// | `VELA_MAX_BULK_LIMIT` | `unlimited` | Positive integer or `unlimited` |
#[derive(Debug, Clone, Copy)]
pub struct EnvConfig {
    auto_download: bool,
    bulk_limit: BulkLimit,
}

impl EnvConfig {
    pub fn from_env() -> Result<Self> {
        let auto_download = std::env::var("VELA_AUTO_DOWNLOAD")
            .map(|v| v == "true" || v == "1")
            .unwrap_or(false);
        let bulk_limit = match std::env::var("VELA_MAX_BULK_LIMIT") {
            Ok(v) => v.parse()?,
            Err(_) => BulkLimit::Unlimited,
        };
        Ok(Self {
            auto_download,
            bulk_limit,
        })
    }
}

impl ConfigProvider for EnvConfig {
    fn auto_download_on_upscale(&self) -> bool {
        self.auto_download
    }

    fn max_bulk_limit(&self) -> BulkLimit {
        self.bulk_limit
    }
}

/// Current-user provider with a fixed answer.
#[derive(Debug, Clone, Default)]
pub struct StaticUser(pub Option<String>);

impl StaticUser {
    pub fn signed_in(user_id: impl Into<String>) -> Self {
        Self(Some(user_id.into()))
    }

    pub fn anonymous() -> Self {
        Self(None)
    }
}

impl CurrentUserProvider for StaticUser {
    fn current_user_id(&self) -> Option<String> {
        self.0.clone()
    }
}

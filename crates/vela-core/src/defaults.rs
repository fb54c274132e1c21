//! Centralized default constants for the vela job queue.
//!
//! Crates reference these constants instead of defining their own magic
//! numbers. Timing values are milliseconds unless the name says otherwise.

// =============================================================================
// UPSCALE
// =============================================================================

/// Number of upscale requests allowed in flight together.
pub const UPSCALE_BATCH_SIZE: usize = 15;

/// Lower bound of the stagger between upscale request launches.
pub const UPSCALE_STAGGER_MIN_MS: u64 = 300;

/// Upper bound of the stagger between upscale request launches.
pub const UPSCALE_STAGGER_MAX_MS: u64 = 900;

/// Lower bound of the pause between upscale batches.
pub const UPSCALE_BATCH_DELAY_MIN_MS: u64 = 2_000;

/// Upper bound of the pause between upscale batches.
pub const UPSCALE_BATCH_DELAY_MAX_MS: u64 = 4_000;

// =============================================================================
// HD URL POLLING
// =============================================================================

/// Maximum poll iterations before giving up on unresolved videos.
pub const POLL_MAX_ATTEMPTS: u32 = 60;

/// Lower bound of the pause between poll iterations.
pub const POLL_DELAY_MIN_MS: u64 = 4_000;

/// Upper bound of the pause between poll iterations.
pub const POLL_DELAY_MAX_MS: u64 = 6_000;

// =============================================================================
// PER-ITEM PACING
// =============================================================================

/// Fixed pause between post detail fetches (read-only, so short).
pub const FETCH_DELAY_MS: u64 = 250;

/// Fixed pause between downloads.
pub const DOWNLOAD_DELAY_MS: u64 = 1_000;

/// Lower bound of the pause between like/unlike calls.
pub const LIKE_DELAY_MIN_MS: u64 = 800;

/// Upper bound of the pause between like/unlike calls.
pub const LIKE_DELAY_MAX_MS: u64 = 1_600;

/// Yield after each like/unlike call so progress observers can catch up.
pub const LIKE_YIELD_MS: u64 = 50;

// =============================================================================
// PURGE
// =============================================================================

/// Visual-feedback pause before a purge acts.
pub const PURGE_FEEDBACK_DELAY_MS: u64 = 500;

/// Page size requested when purging liked posts.
pub const LIKED_PAGE_SIZE: usize = 1_000;

// =============================================================================
// QUEUE
// =============================================================================

/// Default event bus broadcast channel capacity.
pub const EVENT_BUS_CAPACITY: usize = 256;

/// Default snapshot file name used by the admin binary.
pub const STATE_FILE: &str = "vela-jobs.json";

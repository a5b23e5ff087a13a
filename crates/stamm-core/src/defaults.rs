//! Centralized default constants for the stammtisch core.
//!
//! **This module is the single source of truth** for all shared default
//! values. All crates reference these constants instead of defining their
//! own magic numbers.
//!
//! Organized by domain area. When adding new constants, place them in the
//! appropriate section and document the rationale for the chosen value.

// =============================================================================
// JOB PROCESSING
// =============================================================================

/// Maximum claim attempts before a job is terminally failed.
///
/// Inherited business constant with no documented derivation; treat as a
/// tunable, overridable via `STAMM_JOB_MAX_ATTEMPTS`.
pub const JOB_MAX_ATTEMPTS: i32 = 4;

/// Default maximum jobs claimed per queue-drain invocation.
pub const JOB_BATCH_SIZE: i64 = 10;

/// Admission ceiling: maximum PENDING+PROCESSING AI jobs per provider target.
///
/// Above this, new mentions get an immediate "busy" notice instead of a job.
/// Tunable, overridable via `STAMM_AI_QUEUE_CEILING`.
pub const AI_QUEUE_CEILING: i64 = 40;

/// Advisory lock name guarding the AI response queue drain.
pub const AI_QUEUE_LOCK: &str = "ai_response_queue";

/// Advisory lock name guarding the tagging queue drain.
pub const TAGGING_QUEUE_LOCK: &str = "tagging_queue";

// =============================================================================
// AI RESPONSE WORKER
// =============================================================================

/// History messages included in a normal provider request.
pub const AI_HISTORY_WINDOW: usize = 8;

/// History messages included after a context-window overflow.
pub const AI_HISTORY_WINDOW_REDUCED: usize = 2;

/// Timeout for generation requests in seconds.
pub const GEN_TIMEOUT_SECS: u64 = 120;

/// Timeout for GIF search and media validation fetches in seconds.
pub const GIF_TIMEOUT_SECS: u64 = 15;

// =============================================================================
// TAGGING WORKER
// =============================================================================

/// Maximum message-level tags retained after filtering.
pub const TAG_CAP: usize = 16;

/// Minimum confidence for a tag to be retained anywhere in the payload.
pub const TAG_CONFIDENCE_FLOOR: f64 = 0.55;

/// Representative still frames extracted from an animated GIF.
///
/// Vision providers cannot interpret animation; three frames (start, middle,
/// end) capture the arc of short reaction GIFs.
pub const GIF_FRAME_COUNT: usize = 3;

/// Timeout for vision classification requests in seconds.
pub const VISION_TIMEOUT_SECS: u64 = 120;

// =============================================================================
// SCORE ENGINE
// =============================================================================

/// Half-life of the member score decay in days.
pub const SCORE_HALF_LIFE_DAYS: f64 = 45.0;

/// Half-life of the message freshness signal in hours.
pub const FRESHNESS_HALF_LIFE_HOURS: f64 = 72.0;

/// Predicted-like blend weight for tag match when tagging is complete.
pub const LIKE_WEIGHT_TAGS: f64 = 0.65;

/// Predicted-like blend weight for reaction-style match when tagging is complete.
pub const LIKE_WEIGHT_REACTIONS: f64 = 0.20;

/// Predicted-like blend weight for freshness when tagging is complete.
pub const LIKE_WEIGHT_FRESHNESS: f64 = 0.15;

/// Fallback blend weight for reaction-style match (no tag signal).
pub const LIKE_FALLBACK_WEIGHT_REACTIONS: f64 = 0.55;

/// Fallback blend weight for freshness (no tag signal).
pub const LIKE_FALLBACK_WEIGHT_FRESHNESS: f64 = 0.45;

/// Calibration floor: the shown percentage never drops below this baseline.
pub const LIKE_BASELINE: f64 = 0.35;

/// Top tags kept per taste profile window.
pub const TASTE_TOP_TAGS: usize = 20;

// =============================================================================
// EVENTS
// =============================================================================

/// Default event bus broadcast channel capacity.
pub const EVENT_BUS_CAPACITY: usize = 256;

// =============================================================================
// DATABASE
// =============================================================================

/// Default maximum number of connections in the pool.
pub const DB_MAX_CONNECTIONS: u32 = 10;

//! Structured logging setup and field name constants.
//!
//! All crates use these constants for consistent structured logging fields,
//! so log aggregation tools can query by standardized names across every
//! subsystem.
//!
//! ## Log Level Contract
//!
//! | Level | Usage |
//! |-------|-------|
//! | ERROR | Degraded service, requires operator attention |
//! | WARN  | Recoverable issue, automatic fallback applied |
//! | INFO  | Lifecycle events, queue-drain completions |
//! | DEBUG | Decision points, intermediate values, config choices |
//! | TRACE | Per-item iteration (claimed jobs, tag filtering) |

use tracing_subscriber::{fmt, EnvFilter};

/// Subsystem originating the log event.
/// Values: "db", "inference", "jobs", "score"
pub const SUBSYSTEM: &str = "subsystem";

/// Component within a subsystem.
/// Examples: "ai_worker", "tagging_worker", "pool", "advisory"
pub const COMPONENT: &str = "component";

/// Logical operation name.
/// Examples: "claim_batch", "process_job", "classify"
pub const OPERATION: &str = "op";

/// Job UUID being processed.
pub const JOB_ID: &str = "job_id";

/// Message UUID being operated on.
pub const MESSAGE_ID: &str = "message_id";

/// Provider target key on a job.
pub const TARGET_KEY: &str = "target_key";

/// Wall-clock duration in milliseconds.
pub const DURATION_MS: &str = "duration_ms";

/// Error message when an operation fails.
pub const ERROR_MSG: &str = "error";

/// Initialize the global tracing subscriber from `RUST_LOG`.
///
/// Defaults to `info` when the variable is unset. Safe to call once at
/// process start; returns quietly if a subscriber is already installed.
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).try_init();
}

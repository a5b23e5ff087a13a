//! Worker configuration from environment variables.

use tracing::debug;

use stamm_core::defaults::{AI_QUEUE_CEILING, JOB_BATCH_SIZE, JOB_MAX_ATTEMPTS};

/// Tunables for enqueue hooks and queue workers.
///
/// The ceiling and attempt cap are inherited business constants with no
/// documented derivation; both are overridable rather than load-tested
/// truths.
#[derive(Debug, Clone)]
pub struct JobsConfig {
    /// Maximum claim attempts before a job is terminally failed.
    pub max_attempts: i32,
    /// Maximum jobs claimed per queue-drain invocation.
    pub batch_size: i64,
    /// Admission ceiling of PENDING+PROCESSING AI jobs per provider target.
    pub ai_queue_ceiling: i64,
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            max_attempts: JOB_MAX_ATTEMPTS,
            batch_size: JOB_BATCH_SIZE,
            ai_queue_ceiling: AI_QUEUE_CEILING,
        }
    }
}

impl JobsConfig {
    /// Load from `STAMM_JOB_MAX_ATTEMPTS`, `STAMM_JOB_BATCH_SIZE`, and
    /// `STAMM_AI_QUEUE_CEILING`, with defaults for anything unset or
    /// unparseable.
    pub fn from_env() -> Self {
        fn parse_var<T: std::str::FromStr>(name: &str, default: T) -> T {
            std::env::var(name)
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default)
        }

        let config = Self {
            max_attempts: parse_var("STAMM_JOB_MAX_ATTEMPTS", JOB_MAX_ATTEMPTS).max(1),
            batch_size: parse_var("STAMM_JOB_BATCH_SIZE", JOB_BATCH_SIZE).max(1),
            ai_queue_ceiling: parse_var("STAMM_AI_QUEUE_CEILING", AI_QUEUE_CEILING).max(1),
        };
        debug!(
            subsystem = "jobs",
            component = "config",
            max_attempts = config.max_attempts,
            batch_size = config.batch_size,
            ai_queue_ceiling = config.ai_queue_ceiling,
            "Loaded jobs configuration"
        );
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_shared_constants() {
        let config = JobsConfig::default();
        assert_eq!(config.max_attempts, JOB_MAX_ATTEMPTS);
        assert_eq!(config.batch_size, JOB_BATCH_SIZE);
        assert_eq!(config.ai_queue_ceiling, AI_QUEUE_CEILING);
    }
}

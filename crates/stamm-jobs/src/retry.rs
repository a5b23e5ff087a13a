//! Retry ladder for provider calls.
//!
//! Attempts are spent on claim, so the mode is derived from the attempt
//! number the job carries when it arrives:
//!
//! | Attempt | Mode           | Request shape                          |
//! |---------|----------------|----------------------------------------|
//! | 1       | Normal         | full history window, primary model     |
//! | 2       | ReducedContext | shrunk history window, primary model   |
//! | 3+      | DegradedModel  | shrunk history window, fallback model  |
//!
//! Exhausting `max_attempts` is terminal; the job is FAILED and the user
//! gets a failure notice instead of silence.

use stamm_core::defaults::{AI_HISTORY_WINDOW, AI_HISTORY_WINDOW_REDUCED};

/// Degradation rung for one processing attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptMode {
    Normal,
    ReducedContext,
    DegradedModel,
}

impl AttemptMode {
    /// Resolve the mode from a job's (1-based) attempt counter.
    pub fn for_attempt(attempt: i32) -> Self {
        match attempt {
            i32::MIN..=1 => AttemptMode::Normal,
            2 => AttemptMode::ReducedContext,
            _ => AttemptMode::DegradedModel,
        }
    }

    /// History messages to include at this rung.
    pub fn history_window(&self) -> usize {
        match self {
            AttemptMode::Normal => AI_HISTORY_WINDOW,
            AttemptMode::ReducedContext | AttemptMode::DegradedModel => AI_HISTORY_WINDOW_REDUCED,
        }
    }

    /// Whether the fallback model should be used.
    pub fn degraded_model(&self) -> bool {
        matches!(self, AttemptMode::DegradedModel)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ladder_order() {
        assert_eq!(AttemptMode::for_attempt(1), AttemptMode::Normal);
        assert_eq!(AttemptMode::for_attempt(2), AttemptMode::ReducedContext);
        assert_eq!(AttemptMode::for_attempt(3), AttemptMode::DegradedModel);
        assert_eq!(AttemptMode::for_attempt(4), AttemptMode::DegradedModel);
    }

    #[test]
    fn zero_or_negative_attempts_count_as_first() {
        assert_eq!(AttemptMode::for_attempt(0), AttemptMode::Normal);
        assert_eq!(AttemptMode::for_attempt(-1), AttemptMode::Normal);
    }

    #[test]
    fn history_shrinks_after_first_attempt() {
        assert_eq!(AttemptMode::Normal.history_window(), AI_HISTORY_WINDOW);
        assert_eq!(
            AttemptMode::ReducedContext.history_window(),
            AI_HISTORY_WINDOW_REDUCED
        );
        assert_eq!(
            AttemptMode::DegradedModel.history_window(),
            AI_HISTORY_WINDOW_REDUCED
        );
    }

    #[test]
    fn only_final_rung_degrades_the_model() {
        assert!(!AttemptMode::Normal.degraded_model());
        assert!(!AttemptMode::ReducedContext.degraded_model());
        assert!(AttemptMode::DegradedModel.degraded_model());
    }
}

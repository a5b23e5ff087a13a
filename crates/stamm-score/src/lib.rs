//! # stamm-score
//!
//! Pure computation layer for the stammtisch core: member score decay and
//! rank resolution, sparse-vector taste matching, and the calibrated
//! predicted-like score.
//!
//! Everything in this crate is deterministic and side-effect free: identical
//! inputs always yield identical outputs, so callers can recompute on read
//! and key incremental UI updates by message id.

pub mod decay;
pub mod like;
pub mod sparse;
pub mod taste;

pub use decay::{
    bot_limit_for_rank, decayed_score, is_upgrade, member_progress, points_to_next, rank_for_score,
};
pub use like::{compute_message_like_score, LikeScore, LikeState, MessageSignals};
pub use sparse::SparseVector;
pub use taste::aggregate_profile;

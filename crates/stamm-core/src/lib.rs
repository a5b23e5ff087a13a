//! # stamm-core
//!
//! Core types, traits, and abstractions for the stammtisch chat core.
//!
//! This crate provides the foundational data structures and trait definitions
//! that the job queue, worker, and scoring crates depend on: the job and
//! tagging models, the event bus, the tag taxonomy, and the repository seams
//! implemented by `stamm-db`.

pub mod defaults;
pub mod error;
pub mod events;
pub mod logging;
pub mod models;
pub mod tags;
pub mod traits;
pub mod uuid_utils;

// Re-export commonly used types at crate root
pub use error::{Error, Result};
pub use events::{EventBus, ServerEvent};
pub use models::*;
pub use tags::{
    category_for_tag, complexity_tier_tag, detect_language_tag, is_generic_tag, normalize_tag,
    TagCategory,
};
pub use traits::*;
pub use uuid_utils::new_v7;

//! # stamm-jobs
//!
//! The asynchronous heart of the stammtisch chat core: enqueue hooks that
//! turn user messages into queued work, the AI response and tagging queue
//! workers that drain it under advisory locks, and the progress service that
//! feeds the scoring layer.
//!
//! Delivery contract is at-most-once: duplicate enqueues are absorbed by the
//! repositories, racing drains are throttled by coordination locks, and row
//! claiming stays safe even without them. A job exhausting its attempts is
//! failed loudly (user notice, failure event) instead of looping forever.

pub mod ai_worker;
pub mod compose;
pub mod config;
pub mod enqueue;
pub mod gif_intent;
pub mod media;
pub mod poll;
pub mod progress;
pub mod retry;
pub mod runtime;
pub mod tagging_worker;
pub mod testing;

pub use ai_worker::AiResponseWorker;
pub use compose::{compose_payload, parse_classification, RawClassification};
pub use config::JobsConfig;
pub use enqueue::{scan_mentions, EnqueueHooks, EnqueueOutcome, SYSTEM_AUTHOR};
pub use gif_intent::detect_gif_query;
pub use media::MediaFetcher;
pub use poll::parse_poll;
pub use progress::ProgressService;
pub use retry::AttemptMode;
pub use runtime::JobRuntime;
pub use tagging_worker::TaggingWorker;

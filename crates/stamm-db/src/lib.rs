//! # stamm-db
//!
//! PostgreSQL persistence layer for the stammtisch core.
//!
//! This crate provides:
//! - Connection pool management
//! - Advisory-lock coordination for queue draining
//! - Job queue repositories (AI responses, tagging) with
//!   `FOR UPDATE SKIP LOCKED` batch claiming
//! - Bot message writes and tagging subtree updates
//! - Behavior event log and taste profile aggregates
//!
//! ## Example
//!
//! ```rust,ignore
//! use stamm_db::{create_pool, PgAiJobRepository};
//! use stamm_core::AiJobRepository;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let pool = create_pool("postgres://localhost/stammtisch").await?;
//!     let jobs = PgAiJobRepository::new(pool);
//!
//!     let claimed = jobs.claim_batch(10).await?;
//!     println!("claimed {} jobs", claimed.len());
//!     Ok(())
//! }
//! ```
pub mod advisory;
pub mod jobs;
pub mod members;
pub mod messages;
pub mod pool;
pub mod taste;

// Re-export core types
pub use stamm_core::*;

// Re-export repository implementations
pub use advisory::PgCoordinationLock;
pub use jobs::{PgAiJobRepository, PgTaggingJobRepository};
pub use members::PgMemberRepository;
pub use messages::PgMessageRepository;
pub use pool::{create_pool, create_pool_with_config, log_pool_metrics, PoolConfig};
pub use taste::PgTasteRepository;

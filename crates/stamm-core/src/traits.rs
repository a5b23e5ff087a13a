//! Repository and coordination trait seams implemented by `stamm-db`.
//!
//! Workers depend on these traits rather than on concrete Postgres types so
//! the drain pipelines can be exercised with in-memory fakes in tests.

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::Result;
use crate::models::{
    AiJob, AiJobPayload, BehaviorEvent, ChatLine, MemberScoreRow, NewBotMessage, QueueStats,
    TaggingJob, TaggingJobPayload, TaggingPayload, TasteProfile, TasteWindow,
};

/// Named, non-blocking mutual exclusion for queue draining.
///
/// Session-scoped advisory locking, not row locking: it protects the
/// draining *procedure* as a throughput throttle. Row claiming must be
/// independently safe (see [`AiJobRepository::claim_batch`]).
#[async_trait]
pub trait CoordinationLock: Send + Sync {
    /// Attempt to take the named lock. Returns false immediately if another
    /// session holds it; the caller skips this cycle, it does not queue up.
    async fn try_acquire(&self, name: &str) -> Result<bool>;

    /// Release a lock previously acquired by this instance.
    async fn release(&self, name: &str) -> Result<()>;
}

/// Durable queue of AI response jobs.
#[async_trait]
pub trait AiJobRepository: Send + Sync {
    /// Insert a job unless a non-FAILED job already exists for the same
    /// `(source_message_id, target_key)` pair. Returns `None` on dedup.
    async fn enqueue_deduplicated(
        &self,
        source_message_id: Uuid,
        target_key: &str,
        payload: &AiJobPayload,
    ) -> Result<Option<Uuid>>;

    /// Atomically claim up to `max_jobs` PENDING jobs, oldest first, moving
    /// them to PROCESSING and incrementing attempts. Two racing workers never
    /// both claim the same row, independent of the coordination lock.
    async fn claim_batch(&self, max_jobs: i64) -> Result<Vec<AiJob>>;

    /// Mark a claimed job COMPLETED.
    async fn complete(&self, job_id: Uuid) -> Result<()>;

    /// Return a claimed job to PENDING for a later retry, recording the error.
    async fn release_for_retry(&self, job_id: Uuid, error: &str) -> Result<()>;

    /// Terminally mark a job FAILED with the given error.
    async fn fail(&self, job_id: Uuid, error: &str) -> Result<()>;

    /// Count of PENDING + PROCESSING jobs for one provider target
    /// (admission control input).
    async fn active_count_for_target(&self, target_key: &str) -> Result<i64>;

    /// Aggregate queue counters.
    async fn queue_stats(&self) -> Result<QueueStats>;

    /// Fetch one job by id (audit/read path).
    async fn get(&self, job_id: Uuid) -> Result<Option<AiJob>>;

    /// Most recent jobs, newest first (audit/read path).
    async fn list_recent(&self, limit: i64) -> Result<Vec<AiJob>>;
}

/// Durable queue of message tagging jobs.
#[async_trait]
pub trait TaggingJobRepository: Send + Sync {
    /// Insert a job unless a non-FAILED job already exists for the same
    /// `source_message_id`. Returns `None` on dedup.
    async fn enqueue_deduplicated(
        &self,
        source_message_id: Uuid,
        payload: &TaggingJobPayload,
    ) -> Result<Option<Uuid>>;

    /// Atomically claim up to `max_jobs` PENDING jobs, oldest first.
    async fn claim_batch(&self, max_jobs: i64) -> Result<Vec<TaggingJob>>;

    async fn complete(&self, job_id: Uuid) -> Result<()>;

    async fn release_for_retry(&self, job_id: Uuid, error: &str) -> Result<()>;

    async fn fail(&self, job_id: Uuid, error: &str) -> Result<()>;

    async fn queue_stats(&self) -> Result<QueueStats>;

    async fn get(&self, job_id: Uuid) -> Result<Option<TaggingJob>>;

    async fn list_recent(&self, limit: i64) -> Result<Vec<TaggingJob>>;
}

/// Mutations the core applies to the (externally owned) message store.
#[async_trait]
pub trait MessageRepository: Send + Sync {
    /// Insert a bot-authored message (text or poll) and return its id.
    async fn insert_bot_message(&self, message: &NewBotMessage) -> Result<Uuid>;

    /// Walk reply-parent links upward and return the root ancestor of the
    /// given message (the message itself when it is not a reply).
    async fn root_ancestor(&self, message_id: Uuid) -> Result<Uuid>;

    /// Up to `limit` ancestor messages of the reply chain, oldest first,
    /// excluding the message itself. Context for generation requests.
    async fn thread_history(&self, message_id: Uuid, limit: usize) -> Result<Vec<ChatLine>>;

    /// Mark the message's tagging subtree as in flight.
    async fn mark_tagging_processing(&self, message_id: Uuid) -> Result<()>;

    /// Write the composed tagging payload and set status COMPLETED.
    async fn write_tagging(&self, message_id: Uuid, payload: &TaggingPayload) -> Result<()>;

    /// Set the tagging status to FAILED with a reason. Terminal-with-reason,
    /// never left pending.
    async fn mark_tagging_failed(&self, message_id: Uuid, error: &str) -> Result<()>;
}

/// Append-only behavior events and derived taste aggregates.
#[async_trait]
pub trait TasteRepository: Send + Sync {
    /// Append one behavior event. Events are never updated or deleted.
    async fn append_event(&self, event: &BehaviorEvent) -> Result<()>;

    /// Load the raw events for a user inside the window, for recomputation.
    async fn events_for_user(&self, user_id: Uuid, window: TasteWindow)
        -> Result<Vec<BehaviorEvent>>;

    /// Store a recomputed aggregate (idempotent upsert).
    async fn store_profile(
        &self,
        user_id: Uuid,
        window: TasteWindow,
        profile: &TasteProfile,
    ) -> Result<()>;

    /// Read the stored aggregate for a window, if present.
    async fn profile(&self, user_id: Uuid, window: TasteWindow) -> Result<Option<TasteProfile>>;
}

/// Persisted member score state.
#[async_trait]
pub trait MemberRepository: Send + Sync {
    /// Read the raw score row for a user.
    async fn score_row(&self, user_id: Uuid) -> Result<Option<MemberScoreRow>>;

    /// Add points and refresh `last_active_at`, returning the updated row.
    async fn add_points(&self, user_id: Uuid, points: i64) -> Result<MemberScoreRow>;
}

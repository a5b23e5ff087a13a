//! Shared data models for jobs, tagging, messages, and scoring.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// =============================================================================
// JOBS
// =============================================================================

/// Lifecycle status of a queued job.
///
/// Jobs are never deleted; terminal rows remain as an audit trail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    /// Database string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    /// Parse from a database string; unknown values fall back to Pending.
    pub fn from_str_loose(s: &str) -> Self {
        match s {
            "processing" => JobStatus::Processing,
            "completed" => JobStatus::Completed,
            "failed" => JobStatus::Failed,
            _ => JobStatus::Pending,
        }
    }
}

/// AI provider identity targeted by a mention.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provider {
    ChatGpt,
    Grok,
}

impl Provider {
    /// All known providers, in mention-scan order.
    pub const ALL: [Provider; 2] = [Provider::ChatGpt, Provider::Grok];

    /// Target key stored on job rows (`provider:chatgpt`, `provider:grok`).
    pub fn target_key(&self) -> &'static str {
        match self {
            Provider::ChatGpt => "provider:chatgpt",
            Provider::Grok => "provider:grok",
        }
    }

    /// Mention token that triggers this provider.
    pub fn mention(&self) -> &'static str {
        match self {
            Provider::ChatGpt => "@chatgpt",
            Provider::Grok => "@grok",
        }
    }

    /// Display name of the synthetic bot identity.
    pub fn display_name(&self) -> &'static str {
        match self {
            Provider::ChatGpt => "ChatGPT",
            Provider::Grok => "Grok",
        }
    }

    /// Author key used when the bot creates chat messages.
    pub fn author_key(&self) -> &'static str {
        match self {
            Provider::ChatGpt => "bot:chatgpt",
            Provider::Grok => "bot:grok",
        }
    }

    /// Resolve a provider from a job target key.
    pub fn from_target_key(key: &str) -> Option<Self> {
        Provider::ALL.iter().copied().find(|p| p.target_key() == key)
    }
}

/// Payload carried by an AI response job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AiJobPayload {
    /// Display name of the user who triggered the mention.
    pub username: String,
    /// The full message text, mention token included.
    pub message: String,
    /// Image attachments on the triggering message.
    #[serde(default)]
    pub image_urls: Vec<String>,
}

/// One unit of deferred AI-response work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AiJob {
    pub id: Uuid,
    pub status: JobStatus,
    /// The triggering chat message.
    pub source_message_id: Uuid,
    /// Disambiguates simultaneous targets (`provider:chatgpt` vs `provider:grok`).
    pub target_key: String,
    pub payload: AiJobPayload,
    /// Incremented on each claim; a claim spends one attempt.
    pub attempts: i32,
    pub max_attempts: i32,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Payload carried by a tagging job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaggingJobPayload {
    pub username: String,
    pub message: String,
    #[serde(default)]
    pub image_urls: Vec<String>,
}

/// One unit of deferred tag-classification work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaggingJob {
    pub id: Uuid,
    pub status: JobStatus,
    pub source_message_id: Uuid,
    pub payload: TaggingJobPayload,
    pub attempts: i32,
    pub max_attempts: i32,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Aggregate queue counters for operational visibility.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueStats {
    pub pending: i64,
    pub processing: i64,
    pub completed: i64,
    pub failed: i64,
    pub total: i64,
}

/// Summary returned by every queue-drain invocation.
///
/// `lock_skipped` is a normal outcome, not an error: another invocation held
/// the advisory lock and this call performed zero side effects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueRunSummary {
    pub processed: usize,
    pub lock_skipped: bool,
}

impl QueueRunSummary {
    /// Summary for a run that could not take the advisory lock.
    pub fn skipped() -> Self {
        Self {
            processed: 0,
            lock_skipped: true,
        }
    }
}

// =============================================================================
// TAGGING PAYLOAD TREE
// =============================================================================

/// Tagging state written onto the originating message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaggingStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl TaggingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaggingStatus::Pending => "pending",
            TaggingStatus::Processing => "processing",
            TaggingStatus::Completed => "completed",
            TaggingStatus::Failed => "failed",
        }
    }

    pub fn from_str_loose(s: &str) -> Self {
        match s {
            "processing" => TaggingStatus::Processing,
            "completed" => TaggingStatus::Completed,
            "failed" => TaggingStatus::Failed,
            _ => TaggingStatus::Pending,
        }
    }
}

/// A free-form tag with a confidence score in [0, 1].
///
/// Tag strings are normalized (trim, Unicode lowercase, whitespace collapse)
/// before comparison or storage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredTag {
    pub tag: String,
    pub score: f64,
}

impl ScoredTag {
    pub fn new(tag: impl Into<String>, score: f64) -> Self {
        Self {
            tag: tag.into(),
            score,
        }
    }
}

/// Message-level category buckets. A tag appears in at most one bucket.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TagCategories {
    #[serde(default)]
    pub themes: Vec<ScoredTag>,
    #[serde(default)]
    pub humor: Vec<ScoredTag>,
    #[serde(default)]
    pub art: Vec<ScoredTag>,
    #[serde(default)]
    pub tone: Vec<ScoredTag>,
    #[serde(default)]
    pub topics: Vec<ScoredTag>,
}

impl TagCategories {
    /// All buckets in priority order (highest first).
    pub fn buckets(&self) -> [(&'static str, &Vec<ScoredTag>); 5] {
        [
            ("themes", &self.themes),
            ("humor", &self.humor),
            ("art", &self.art),
            ("tone", &self.tone),
            ("topics", &self.topics),
        ]
    }

    /// Iterate every tag across all buckets.
    pub fn all_tags(&self) -> impl Iterator<Item = &ScoredTag> {
        self.themes
            .iter()
            .chain(&self.humor)
            .chain(&self.art)
            .chain(&self.tone)
            .chain(&self.topics)
    }
}

/// Image-level category buckets (`objects` replaces `topics`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ImageTagCategories {
    #[serde(default)]
    pub themes: Vec<ScoredTag>,
    #[serde(default)]
    pub humor: Vec<ScoredTag>,
    #[serde(default)]
    pub art: Vec<ScoredTag>,
    #[serde(default)]
    pub tone: Vec<ScoredTag>,
    #[serde(default)]
    pub objects: Vec<ScoredTag>,
}

impl ImageTagCategories {
    /// Iterate every tag across all buckets.
    pub fn all_tags(&self) -> impl Iterator<Item = &ScoredTag> {
        self.themes
            .iter()
            .chain(&self.humor)
            .chain(&self.art)
            .chain(&self.tone)
            .chain(&self.objects)
    }
}

/// Tag analysis for one attached image.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ImageTagAnalysis {
    pub url: String,
    #[serde(default)]
    pub tags: Vec<ScoredTag>,
    #[serde(default)]
    pub categories: ImageTagCategories,
}

/// The composed tagging result written onto a message.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaggingPayload {
    /// Flat, filtered, capped message-level tags.
    #[serde(default)]
    pub tags: Vec<ScoredTag>,
    #[serde(default)]
    pub categories: TagCategories,
    /// One entry per input image, in input order.
    #[serde(default)]
    pub images: Vec<ImageTagAnalysis>,
}

// =============================================================================
// MESSAGES
// =============================================================================

/// A validated poll specification extracted from provider output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollSpec {
    pub question: String,
    /// 2–15 pairwise-distinct options.
    pub options: Vec<String>,
    #[serde(default)]
    pub multi_select: bool,
}

/// Content variant of a bot-authored message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MessageKind {
    Text { body: String },
    Poll { spec: PollSpec },
}

/// One line of conversation history fed into a generation request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatLine {
    pub author_key: String,
    pub body: String,
}

/// A new chat message authored by a synthetic bot identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewBotMessage {
    /// Author key, e.g. `bot:grok` or `bot:system`.
    pub author_key: String,
    pub kind: MessageKind,
    /// Threading parent (root ancestor for polls).
    pub reply_to_id: Option<Uuid>,
    /// The mention message this is an answer to.
    pub question_message_id: Option<Uuid>,
    /// Validated media attachment (GIF replies).
    pub media_url: Option<String>,
}

// =============================================================================
// MEMBER PROGRESS
// =============================================================================

/// Member rank ladder. Ordering follows the score thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Rank {
    Bronze,
    Silber,
    Gold,
    Platin,
    Diamant,
    Onyx,
    Titan,
}

impl Rank {
    /// All ranks, lowest threshold first.
    pub const ALL: [Rank; 7] = [
        Rank::Bronze,
        Rank::Silber,
        Rank::Gold,
        Rank::Platin,
        Rank::Diamant,
        Rank::Onyx,
        Rank::Titan,
    ];

    /// Minimum decayed score required for this rank.
    pub fn threshold(&self) -> i64 {
        match self {
            Rank::Bronze => 0,
            Rank::Silber => 300,
            Rank::Gold => 900,
            Rank::Platin => 1800,
            Rank::Diamant => 4200,
            Rank::Onyx => 9000,
            Rank::Titan => 18000,
        }
    }

    /// Order index within the ladder (Bronze = 0).
    pub fn order_index(&self) -> usize {
        Rank::ALL.iter().position(|r| r == self).unwrap_or(0)
    }

    /// The next rank up, if any.
    pub fn next(&self) -> Option<Rank> {
        Rank::ALL.get(self.order_index() + 1).copied()
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Rank::Bronze => "Bronze",
            Rank::Silber => "Silber",
            Rank::Gold => "Gold",
            Rank::Platin => "Platin",
            Rank::Diamant => "Diamant",
            Rank::Onyx => "Onyx",
            Rank::Titan => "Titan",
        }
    }
}

/// Derived member progress. Never persisted as the displayed value;
/// recomputed on read from `raw_score` and `last_active_at`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberProgress {
    pub score: i64,
    pub rank: Rank,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_rank: Option<Rank>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub points_to_next: Option<i64>,
}

/// Persisted per-member score state, the input to decay computation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemberScoreRow {
    pub user_id: Uuid,
    pub raw_score: i64,
    pub last_active_at: Option<DateTime<Utc>>,
}

// =============================================================================
// TASTE PROFILE
// =============================================================================

/// Rolling aggregation window for taste profiles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TasteWindow {
    Days7,
    Days30,
    AllTime,
}

impl TasteWindow {
    /// Window length in days, None for all-time.
    pub fn days(&self) -> Option<i64> {
        match self {
            TasteWindow::Days7 => Some(7),
            TasteWindow::Days30 => Some(30),
            TasteWindow::AllTime => None,
        }
    }
}

/// Kind of append-only behavior event feeding taste aggregation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BehaviorEventKind {
    /// The user reacted to a message.
    ReactionGiven,
    /// The user's message received a reaction.
    ReactionReceived,
    /// The user engaged with tagged content (view, reply).
    ContentEngaged,
}

/// One raw behavior event. The append-only source of truth; aggregates are
/// derived views, recomputable at any time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BehaviorEvent {
    pub id: Uuid,
    pub user_id: Uuid,
    pub kind: BehaviorEventKind,
    /// Reaction type for reaction events (e.g. `heart`, `laugh`).
    pub reaction: Option<String>,
    /// Tags of the content involved, already normalized.
    #[serde(default)]
    pub tags: Vec<ScoredTag>,
    pub occurred_at: DateTime<Utc>,
}

/// Per-user taste aggregate over one window.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TasteProfile {
    /// Reaction counts by reaction type, deterministic iteration order.
    #[serde(default)]
    pub reactions: BTreeMap<String, i64>,
    /// Scored, deduplicated tags sorted descending by score.
    #[serde(default)]
    pub top_tags: Vec<ScoredTag>,
}

impl TasteProfile {
    pub fn is_empty(&self) -> bool {
        self.reactions.is_empty() && self.top_tags.is_empty()
    }
}

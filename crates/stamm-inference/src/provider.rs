//! Provider traits and request/response types.
//!
//! Workers classify failures through [`ProviderError`] to drive the retry
//! ladder; conversion into the core error type happens at the worker
//! boundary, never inside a backend.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Role of one turn in a chat generation request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// One content block inside a turn. Image blocks carry either an https URL
/// or a base64 data URL (extracted GIF frames).
#[derive(Debug, Clone, PartialEq)]
pub enum ContentBlock {
    Text(String),
    ImageUrl(String),
}

/// One turn of conversation context.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatTurn {
    pub role: Role,
    pub content: Vec<ContentBlock>,
}

impl ChatTurn {
    pub fn text(role: Role, body: impl Into<String>) -> Self {
        Self {
            role,
            content: vec![ContentBlock::Text(body.into())],
        }
    }
}

/// A generation request assembled by a worker.
#[derive(Debug, Clone, Default)]
pub struct GenerationRequest {
    pub turns: Vec<ChatTurn>,
    /// Use the backend's degraded fallback model (late retry rungs).
    pub degraded_model: bool,
    /// Ask the provider for a JSON object response (tag classification).
    pub json_response: bool,
}

/// Provider failure classification driving the retry ladder.
#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    /// The request exceeded the model's context window. Retry with reduced
    /// history, not with the same request.
    #[error("context window exceeded: {0}")]
    ContextOverflow(String),

    /// Transient provider-side failure (5xx, rate limit). Retryable as-is.
    #[error("provider server error: {0}")]
    Server(String),

    /// The backend is not configured (missing API key). Not retryable.
    #[error("provider disabled: {0}")]
    Disabled(String),

    /// Anything else: malformed response, network failure, 4xx.
    #[error("{0}")]
    Other(String),
}

impl ProviderError {
    /// Whether another attempt could plausibly succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::ContextOverflow(_) | Self::Server(_))
    }
}

/// Outcome type for provider calls.
pub type ProviderResult<T> = std::result::Result<T, ProviderError>;

/// Text / multimodal chat generation.
#[async_trait]
pub trait ChatProvider: Send + Sync {
    /// Run one generation request and return the raw assistant text.
    async fn generate(&self, request: &GenerationRequest) -> ProviderResult<String>;

    /// Whether this backend has working credentials.
    fn is_enabled(&self) -> bool;

    /// Model name used for normal (non-degraded) requests.
    fn model_name(&self) -> &str;
}

/// Structured vision classification (text + images → raw JSON string).
#[async_trait]
pub trait VisionProvider: Send + Sync {
    /// Classify the given prompt and image blocks, returning the provider's
    /// raw JSON payload. Parsing and validation are the caller's job.
    async fn classify(&self, request: &GenerationRequest) -> ProviderResult<String>;

    fn is_enabled(&self) -> bool;
}

/// GIF search (query → candidate media URLs).
///
/// Returned URLs are candidates only; callers must fetch-validate them
/// before letting one anywhere near chat.
#[async_trait]
pub trait GifProvider: Send + Sync {
    async fn search(&self, query: &str, limit: usize) -> ProviderResult<Vec<String>>;

    fn is_enabled(&self) -> bool;
}

//! OpenAI-compatible chat completion backend.
//!
//! Both provider targets speak the same wire protocol: `@chatgpt` against
//! api.openai.com and `@grok` against api.x.ai. A backend without an API key
//! is constructed as disabled rather than failing, so a half-configured
//! deployment degrades per provider instead of at startup.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use stamm_core::defaults::GEN_TIMEOUT_SECS;
use stamm_core::Provider;

use crate::provider::{
    ChatProvider, ChatTurn, ContentBlock, GenerationRequest, ProviderError, ProviderResult, Role,
    VisionProvider,
};

/// Default OpenAI API endpoint.
pub const DEFAULT_OPENAI_URL: &str = "https://api.openai.com/v1";

/// Default xAI API endpoint.
pub const DEFAULT_XAI_URL: &str = "https://api.x.ai/v1";

/// Default models per provider target.
pub const DEFAULT_CHATGPT_MODEL: &str = "gpt-4o";
pub const DEFAULT_CHATGPT_DEGRADED_MODEL: &str = "gpt-4o-mini";
pub const DEFAULT_GROK_MODEL: &str = "grok-2-latest";
pub const DEFAULT_GROK_DEGRADED_MODEL: &str = "grok-2-mini";

/// Configuration for one OpenAI-compatible backend.
#[derive(Debug, Clone)]
pub struct OpenAiCompatConfig {
    /// Base URL for the API endpoint.
    pub base_url: String,
    /// API key; None means the backend is disabled.
    pub api_key: Option<String>,
    /// Model for normal requests.
    pub model: String,
    /// Cheaper model used on the degraded retry rung.
    pub degraded_model: String,
    /// Request timeout in seconds.
    pub timeout_seconds: u64,
}

impl OpenAiCompatConfig {
    /// Defaults for a provider target, before env overrides.
    pub fn for_target(target: Provider) -> Self {
        match target {
            Provider::ChatGpt => Self {
                base_url: DEFAULT_OPENAI_URL.to_string(),
                api_key: None,
                model: DEFAULT_CHATGPT_MODEL.to_string(),
                degraded_model: DEFAULT_CHATGPT_DEGRADED_MODEL.to_string(),
                timeout_seconds: GEN_TIMEOUT_SECS,
            },
            Provider::Grok => Self {
                base_url: DEFAULT_XAI_URL.to_string(),
                api_key: None,
                model: DEFAULT_GROK_MODEL.to_string(),
                degraded_model: DEFAULT_GROK_DEGRADED_MODEL.to_string(),
                timeout_seconds: GEN_TIMEOUT_SECS,
            },
        }
    }

    /// Load configuration for a target from environment variables.
    ///
    /// `@chatgpt` reads `OPENAI_API_KEY`, `STAMM_CHATGPT_MODEL`,
    /// `STAMM_OPENAI_BASE_URL`; `@grok` reads `XAI_API_KEY`,
    /// `STAMM_GROK_MODEL`, `STAMM_XAI_BASE_URL`. A missing key yields a
    /// disabled backend, not an error.
    pub fn from_env(target: Provider) -> Self {
        let mut config = Self::for_target(target);
        let (key_var, model_var, degraded_var, url_var) = match target {
            Provider::ChatGpt => (
                "OPENAI_API_KEY",
                "STAMM_CHATGPT_MODEL",
                "STAMM_CHATGPT_DEGRADED_MODEL",
                "STAMM_OPENAI_BASE_URL",
            ),
            Provider::Grok => (
                "XAI_API_KEY",
                "STAMM_GROK_MODEL",
                "STAMM_GROK_DEGRADED_MODEL",
                "STAMM_XAI_BASE_URL",
            ),
        };

        config.api_key = std::env::var(key_var).ok().filter(|k| !k.is_empty());
        if let Ok(model) = std::env::var(model_var) {
            config.model = model;
        }
        if let Ok(model) = std::env::var(degraded_var) {
            config.degraded_model = model;
        }
        if let Ok(url) = std::env::var(url_var) {
            config.base_url = url;
        }
        if let Some(timeout) = std::env::var("STAMM_GEN_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
        {
            config.timeout_seconds = timeout;
        }
        config
    }
}

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<WireMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat>,
}

#[derive(Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    format_type: String,
}

#[derive(Serialize)]
struct WireMessage {
    role: String,
    content: Vec<WirePart>,
}

#[derive(Serialize)]
#[serde(tag = "type")]
enum WirePart {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(rename = "image_url")]
    ImageUrl { image_url: WireImageUrl },
}

#[derive(Serialize)]
struct WireImageUrl {
    url: String,
}

#[derive(Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<WireChoice>,
}

#[derive(Deserialize)]
struct WireChoice {
    message: WireResponseMessage,
}

#[derive(Deserialize)]
struct WireResponseMessage {
    content: Option<String>,
}

#[derive(Deserialize, Default)]
struct WireErrorResponse {
    #[serde(default)]
    error: WireError,
}

#[derive(Deserialize, Default)]
struct WireError {
    #[serde(default)]
    message: String,
    #[serde(rename = "type", default)]
    error_type: String,
    #[serde(default)]
    code: Option<String>,
}

fn role_str(role: Role) -> &'static str {
    match role {
        Role::System => "system",
        Role::User => "user",
        Role::Assistant => "assistant",
    }
}

fn to_wire_messages(turns: &[ChatTurn]) -> Vec<WireMessage> {
    turns
        .iter()
        .map(|turn| WireMessage {
            role: role_str(turn.role).to_string(),
            content: turn
                .content
                .iter()
                .map(|block| match block {
                    ContentBlock::Text(text) => WirePart::Text { text: text.clone() },
                    ContentBlock::ImageUrl(url) => WirePart::ImageUrl {
                        image_url: WireImageUrl { url: url.clone() },
                    },
                })
                .collect(),
        })
        .collect()
}

/// Classify a non-success HTTP response into a [`ProviderError`].
fn classify_error(status: u16, error: &WireError) -> ProviderError {
    let overflow = error.error_type.contains("context_length")
        || error
            .code
            .as_deref()
            .is_some_and(|c| c.contains("context_length"))
        || error.message.contains("context length")
        || error.message.contains("maximum context");
    if overflow {
        return ProviderError::ContextOverflow(error.message.clone());
    }
    match status {
        429 | 500..=599 => {
            ProviderError::Server(format!("HTTP {}: {}", status, error.message))
        }
        _ => ProviderError::Other(format!("HTTP {}: {}", status, error.message)),
    }
}

// ---------------------------------------------------------------------------
// Backend
// ---------------------------------------------------------------------------

/// OpenAI-compatible backend for one provider target.
pub struct OpenAiCompatBackend {
    client: Client,
    config: OpenAiCompatConfig,
    target: Provider,
}

impl OpenAiCompatBackend {
    pub fn new(target: Provider, config: OpenAiCompatConfig) -> Self {
        info!(
            subsystem = "inference",
            component = "openai_compat",
            target = target.target_key(),
            base_url = %config.base_url,
            model = %config.model,
            enabled = config.api_key.is_some(),
            "Initializing chat backend"
        );
        Self {
            client: Client::new(),
            config,
            target,
        }
    }

    /// Construct a backend for a target from the environment.
    pub fn from_env(target: Provider) -> Self {
        Self::new(target, OpenAiCompatConfig::from_env(target))
    }

    pub fn config(&self) -> &OpenAiCompatConfig {
        &self.config
    }

    async fn send_chat(&self, request: &GenerationRequest) -> ProviderResult<String> {
        let Some(api_key) = self.config.api_key.as_deref() else {
            return Err(ProviderError::Disabled(format!(
                "{} has no API key configured",
                self.target.display_name()
            )));
        };

        let model = if request.degraded_model {
            &self.config.degraded_model
        } else {
            &self.config.model
        };

        let body = ChatCompletionRequest {
            model: model.clone(),
            messages: to_wire_messages(&request.turns),
            response_format: request.json_response.then(|| ResponseFormat {
                format_type: "json_object".to_string(),
            }),
        };

        debug!(
            subsystem = "inference",
            component = "openai_compat",
            op = "generate",
            target = self.target.target_key(),
            model = %model,
            turns = request.turns.len(),
            "Sending chat completion request"
        );

        let url = format!(
            "{}/chat/completions",
            self.config.base_url.trim_end_matches('/')
        );
        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", api_key))
            .json(&body)
            .timeout(Duration::from_secs(self.config.timeout_seconds))
            .send()
            .await
            .map_err(|e| ProviderError::Other(format!("request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let wire: WireErrorResponse = response.json().await.unwrap_or_default();
            let err = classify_error(status, &wire.error);
            warn!(
                subsystem = "inference",
                component = "openai_compat",
                op = "generate",
                target = self.target.target_key(),
                status = status,
                error = %err,
                "Chat completion failed"
            );
            return Err(err);
        }

        let parsed: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::Other(format!("failed to parse response: {}", e)))?;

        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| ProviderError::Other("empty completion".to_string()))
    }
}

#[async_trait]
impl ChatProvider for OpenAiCompatBackend {
    async fn generate(&self, request: &GenerationRequest) -> ProviderResult<String> {
        self.send_chat(request).await
    }

    fn is_enabled(&self) -> bool {
        self.config.api_key.is_some()
    }

    fn model_name(&self) -> &str {
        &self.config.model
    }
}

#[async_trait]
impl VisionProvider for OpenAiCompatBackend {
    async fn classify(&self, request: &GenerationRequest) -> ProviderResult<String> {
        let mut request = request.clone();
        request.json_response = true;
        self.send_chat(&request).await
    }

    fn is_enabled(&self) -> bool {
        self.config.api_key.is_some()
    }
}

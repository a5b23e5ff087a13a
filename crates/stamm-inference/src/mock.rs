//! Scripted provider implementations for tests.
//!
//! These live in the library (not behind `cfg(test)`) so downstream crates
//! can drive the worker pipelines without network access.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::provider::{
    ChatProvider, GenerationRequest, GifProvider, ProviderError, ProviderResult, VisionProvider,
};

/// Chat provider that replays a scripted sequence of outcomes and records
/// every request it receives.
#[derive(Default)]
pub struct MockChatProvider {
    script: Mutex<VecDeque<ProviderResult<String>>>,
    requests: Mutex<Vec<GenerationRequest>>,
    disabled: bool,
}

impl MockChatProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// A provider that always reports itself disabled.
    pub fn disabled() -> Self {
        Self {
            disabled: true,
            ..Self::default()
        }
    }

    /// Queue the next outcome.
    pub fn push(&self, outcome: ProviderResult<String>) {
        self.script
            .lock()
            .expect("mock script lock")
            .push_back(outcome);
    }

    /// Queue a successful reply.
    pub fn push_reply(&self, text: impl Into<String>) {
        self.push(Ok(text.into()));
    }

    /// Requests seen so far, in order.
    pub fn requests(&self) -> Vec<GenerationRequest> {
        self.requests.lock().expect("mock requests lock").clone()
    }
}

#[async_trait]
impl ChatProvider for MockChatProvider {
    async fn generate(&self, request: &GenerationRequest) -> ProviderResult<String> {
        if self.disabled {
            return Err(ProviderError::Disabled("mock disabled".to_string()));
        }
        self.requests
            .lock()
            .expect("mock requests lock")
            .push(request.clone());
        self.script
            .lock()
            .expect("mock script lock")
            .pop_front()
            .unwrap_or_else(|| Err(ProviderError::Other("mock script exhausted".to_string())))
    }

    fn is_enabled(&self) -> bool {
        !self.disabled
    }

    fn model_name(&self) -> &str {
        "mock-chat"
    }
}

/// Vision provider that replays scripted JSON payloads.
#[derive(Default)]
pub struct MockVisionProvider {
    script: Mutex<VecDeque<ProviderResult<String>>>,
    requests: Mutex<Vec<GenerationRequest>>,
}

impl MockVisionProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, outcome: ProviderResult<String>) {
        self.script
            .lock()
            .expect("mock script lock")
            .push_back(outcome);
    }

    pub fn push_json(&self, json: impl Into<String>) {
        self.push(Ok(json.into()));
    }

    pub fn requests(&self) -> Vec<GenerationRequest> {
        self.requests.lock().expect("mock requests lock").clone()
    }
}

#[async_trait]
impl VisionProvider for MockVisionProvider {
    async fn classify(&self, request: &GenerationRequest) -> ProviderResult<String> {
        self.requests
            .lock()
            .expect("mock requests lock")
            .push(request.clone());
        self.script
            .lock()
            .expect("mock script lock")
            .pop_front()
            .unwrap_or_else(|| Err(ProviderError::Other("mock script exhausted".to_string())))
    }

    fn is_enabled(&self) -> bool {
        true
    }
}

/// GIF search that returns a fixed candidate list.
pub struct MockGifProvider {
    urls: Vec<String>,
    enabled: bool,
}

impl MockGifProvider {
    pub fn with_urls(urls: Vec<String>) -> Self {
        Self {
            urls,
            enabled: true,
        }
    }

    pub fn disabled() -> Self {
        Self {
            urls: Vec::new(),
            enabled: false,
        }
    }
}

#[async_trait]
impl GifProvider for MockGifProvider {
    async fn search(&self, _query: &str, limit: usize) -> ProviderResult<Vec<String>> {
        if !self.enabled {
            return Err(ProviderError::Disabled("mock disabled".to_string()));
        }
        Ok(self.urls.iter().take(limit).cloned().collect())
    }

    fn is_enabled(&self) -> bool {
        self.enabled
    }
}

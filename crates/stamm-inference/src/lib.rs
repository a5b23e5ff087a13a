//! # stamm-inference
//!
//! AI provider backends for the stammtisch core:
//! - OpenAI-compatible chat generation for the `@chatgpt` and `@grok`
//!   targets (same wire protocol, different endpoints)
//! - Vision classification returning raw structured-JSON payloads
//! - GIF search with mandatory fetch-validation of candidate media
//! - Representative frame extraction for animated GIFs
//!
//! Backends classify failures as [`ProviderError`] so workers can decide
//! between retrying with degraded parameters and failing terminally.

pub mod frames;
pub mod gif;
pub mod mock;
pub mod openai;
pub mod provider;

pub use frames::{extract_representative_frames, png_data_url};
pub use gif::{is_gif_bytes, MediaClient, TenorGifClient, DEFAULT_TENOR_URL, MAX_GIF_BYTES};
pub use mock::{MockChatProvider, MockGifProvider, MockVisionProvider};
pub use openai::{OpenAiCompatBackend, OpenAiCompatConfig, DEFAULT_OPENAI_URL, DEFAULT_XAI_URL};
pub use provider::{
    ChatProvider, ChatTurn, ContentBlock, GenerationRequest, GifProvider, ProviderError,
    ProviderResult, Role, VisionProvider,
};

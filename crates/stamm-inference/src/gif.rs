//! GIF search and media validation.
//!
//! Search results are never trusted: a candidate URL must be fetched and its
//! bytes magic-checked before it is allowed into chat or frame extraction.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, warn};

use stamm_core::defaults::GIF_TIMEOUT_SECS;

use crate::provider::{GifProvider, ProviderError, ProviderResult};

/// Default Tenor v2 API endpoint.
pub const DEFAULT_TENOR_URL: &str = "https://tenor.googleapis.com/v2";

/// Upper bound on fetched media size (10 MiB).
pub const MAX_GIF_BYTES: usize = 10 * 1024 * 1024;

/// Check whether a byte buffer is an actual GIF by magic bytes.
pub fn is_gif_bytes(bytes: &[u8]) -> bool {
    infer::get(bytes).is_some_and(|kind| kind.mime_type() == "image/gif")
}

// ---------------------------------------------------------------------------
// Tenor search client
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct TenorSearchResponse {
    #[serde(default)]
    results: Vec<TenorResult>,
}

#[derive(Deserialize)]
struct TenorResult {
    #[serde(default)]
    media_formats: TenorMediaFormats,
}

#[derive(Deserialize, Default)]
struct TenorMediaFormats {
    gif: Option<TenorMedia>,
}

#[derive(Deserialize)]
struct TenorMedia {
    url: String,
}

/// Tenor-backed GIF search.
pub struct TenorGifClient {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    timeout_seconds: u64,
}

impl TenorGifClient {
    pub fn new(base_url: String, api_key: Option<String>) -> Self {
        Self {
            client: Client::new(),
            base_url,
            api_key,
            timeout_seconds: GIF_TIMEOUT_SECS,
        }
    }

    /// Create from environment variables (`TENOR_API_KEY`,
    /// `STAMM_TENOR_BASE_URL`). A missing key yields a disabled client.
    pub fn from_env() -> Self {
        let api_key = std::env::var("TENOR_API_KEY").ok().filter(|k| !k.is_empty());
        let base_url = std::env::var("STAMM_TENOR_BASE_URL")
            .unwrap_or_else(|_| DEFAULT_TENOR_URL.to_string());
        Self::new(base_url, api_key)
    }
}

#[async_trait]
impl GifProvider for TenorGifClient {
    async fn search(&self, query: &str, limit: usize) -> ProviderResult<Vec<String>> {
        let Some(api_key) = self.api_key.as_deref() else {
            return Err(ProviderError::Disabled(
                "GIF search has no API key configured".to_string(),
            ));
        };

        let url = format!("{}/search", self.base_url.trim_end_matches('/'));
        let response = self
            .client
            .get(&url)
            .query(&[
                ("q", query),
                ("key", api_key),
                ("limit", &limit.to_string()),
                ("media_filter", "gif"),
            ])
            .timeout(Duration::from_secs(self.timeout_seconds))
            .send()
            .await
            .map_err(|e| ProviderError::Other(format!("GIF search request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let err = if status == 429 || (500..600).contains(&status) {
                ProviderError::Server(format!("GIF search returned HTTP {}", status))
            } else {
                ProviderError::Other(format!("GIF search returned HTTP {}", status))
            };
            return Err(err);
        }

        let parsed: TenorSearchResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::Other(format!("failed to parse search response: {}", e)))?;

        let urls: Vec<String> = parsed
            .results
            .into_iter()
            .filter_map(|r| r.media_formats.gif.map(|m| m.url))
            .collect();

        debug!(
            subsystem = "inference",
            component = "gif_search",
            op = "search",
            query = query,
            candidates = urls.len(),
            "GIF search completed"
        );
        Ok(urls)
    }

    fn is_enabled(&self) -> bool {
        self.api_key.is_some()
    }
}

// ---------------------------------------------------------------------------
// Media fetch + validation
// ---------------------------------------------------------------------------

/// Fetches candidate media and validates it is a real GIF.
pub struct MediaClient {
    client: Client,
    timeout_seconds: u64,
    max_bytes: usize,
}

impl Default for MediaClient {
    fn default() -> Self {
        Self {
            client: Client::new(),
            timeout_seconds: GIF_TIMEOUT_SECS,
            max_bytes: MAX_GIF_BYTES,
        }
    }
}

impl MediaClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_bytes(mut self, max_bytes: usize) -> Self {
        self.max_bytes = max_bytes;
        self
    }

    /// Fetch a URL and return its bytes if they are a valid, size-bounded GIF.
    ///
    /// Oversized responses are rejected before buffering: first via the
    /// declared `Content-Length`, then with a running cutoff while streaming
    /// the body, so a huge or unbounded response never lands in memory.
    pub async fn fetch_gif(&self, url: &str) -> ProviderResult<Vec<u8>> {
        let mut response = self
            .client
            .get(url)
            .timeout(Duration::from_secs(self.timeout_seconds))
            .send()
            .await
            .map_err(|e| ProviderError::Other(format!("media fetch failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(ProviderError::Other(format!(
                "media fetch returned HTTP {}",
                response.status().as_u16()
            )));
        }

        if let Some(declared) = response.content_length() {
            if declared > self.max_bytes as u64 {
                warn!(
                    subsystem = "inference",
                    component = "media",
                    op = "fetch_gif",
                    declared,
                    "Rejecting media by declared length"
                );
                return Err(ProviderError::Other(format!(
                    "media too large: {} bytes declared",
                    declared
                )));
            }
        }

        let mut bytes: Vec<u8> = Vec::new();
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| ProviderError::Other(format!("media body read failed: {}", e)))?
        {
            if bytes.len() + chunk.len() > self.max_bytes {
                warn!(
                    subsystem = "inference",
                    component = "media",
                    op = "fetch_gif",
                    received = bytes.len() + chunk.len(),
                    "Rejecting oversized media mid-stream"
                );
                return Err(ProviderError::Other(format!(
                    "media too large: over {} bytes",
                    self.max_bytes
                )));
            }
            bytes.extend_from_slice(&chunk);
        }

        if !is_gif_bytes(&bytes) {
            return Err(ProviderError::Other(
                "fetched media is not a GIF".to_string(),
            ));
        }

        Ok(bytes)
    }

    /// Validate a candidate URL without keeping the bytes.
    pub async fn validate_gif_url(&self, url: &str) -> ProviderResult<()> {
        self.fetch_gif(url).await.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const GIF_HEADER: &[u8] = b"GIF89a\x01\x00\x01\x00\x00\x00\x00;";

    #[test]
    fn test_gif_magic_detection() {
        assert!(is_gif_bytes(GIF_HEADER));
        assert!(!is_gif_bytes(b"<html>not a gif</html>"));
        assert!(!is_gif_bytes(b""));
    }

    #[tokio::test]
    async fn test_search_extracts_gif_urls() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/search"))
            .and(query_param("q", "katze"))
            .and(query_param("media_filter", "gif"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "results": [
                    {"media_formats": {"gif": {"url": "https://media.tenor.com/a.gif"}}},
                    {"media_formats": {}},
                    {"media_formats": {"gif": {"url": "https://media.tenor.com/b.gif"}}}
                ]
            })))
            .mount(&server)
            .await;

        let client = TenorGifClient::new(server.uri(), Some("k".to_string()));
        let urls = client.search("katze", 5).await.unwrap();
        assert_eq!(
            urls,
            vec![
                "https://media.tenor.com/a.gif".to_string(),
                "https://media.tenor.com/b.gif".to_string()
            ]
        );
    }

    #[tokio::test]
    async fn test_search_without_key_is_disabled() {
        let client = TenorGifClient::new(DEFAULT_TENOR_URL.to_string(), None);
        assert!(!client.is_enabled());
        let err = client.search("katze", 5).await.unwrap_err();
        assert!(matches!(err, ProviderError::Disabled(_)));
    }

    #[tokio::test]
    async fn test_fetch_gif_accepts_real_gif() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/a.gif"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(GIF_HEADER))
            .mount(&server)
            .await;

        let media = MediaClient::new();
        let bytes = media
            .fetch_gif(&format!("{}/a.gif", server.uri()))
            .await
            .unwrap();
        assert!(is_gif_bytes(&bytes));
    }

    #[tokio::test]
    async fn test_fetch_gif_rejects_non_gif_body() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/fake.gif"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>404 lol</html>"))
            .mount(&server)
            .await;

        let media = MediaClient::new();
        let err = media
            .validate_gif_url(&format!("{}/fake.gif", server.uri()))
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::Other(_)));
    }

    #[tokio::test]
    async fn test_fetch_gif_rejects_oversized_body() {
        let server = MockServer::start().await;
        let mut body = GIF_HEADER.to_vec();
        body.resize(64, 0);
        Mock::given(method("GET"))
            .and(path("/huge.gif"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(body))
            .mount(&server)
            .await;

        let media = MediaClient::new().with_max_bytes(32);
        let err = media
            .fetch_gif(&format!("{}/huge.gif", server.uri()))
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::Other(ref msg) if msg.contains("too large")));
    }

    #[tokio::test]
    async fn test_fetch_gif_rejects_http_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/gone.gif"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let media = MediaClient::new();
        assert!(media
            .validate_gif_url(&format!("{}/gone.gif", server.uri()))
            .await
            .is_err());
    }
}

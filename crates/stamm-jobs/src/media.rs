//! Fetch-validation seam for candidate media.
//!
//! Search results are candidate URLs only; a worker must fetch and
//! magic-check the bytes before a URL reaches chat or frame extraction.
//! The trait exists so the pipelines can run against canned bytes in tests.

use async_trait::async_trait;

use stamm_inference::{MediaClient, ProviderResult};

#[async_trait]
pub trait MediaFetcher: Send + Sync {
    /// Fetch a URL and return its bytes if they are a valid, size-bounded GIF.
    async fn fetch_gif(&self, url: &str) -> ProviderResult<Vec<u8>>;

    /// Validate a candidate URL without keeping the bytes.
    async fn validate_gif_url(&self, url: &str) -> ProviderResult<()> {
        self.fetch_gif(url).await.map(|_| ())
    }
}

#[async_trait]
impl MediaFetcher for MediaClient {
    async fn fetch_gif(&self, url: &str) -> ProviderResult<Vec<u8>> {
        MediaClient::fetch_gif(self, url).await
    }
}

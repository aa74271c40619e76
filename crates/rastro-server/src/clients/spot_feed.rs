use async_trait::async_trait;
use reqwest::Client;

use rastro_domain::{DomainError, DomainResult, FeedClient, FeedEntry};
use rastro_protocol::spot;

/// Fetches the per-device SPOT Trace public feed and decodes its XML body.
pub struct SpotFeedClient {
    http_client: Client,
    base_url: String,
}

impl SpotFeedClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            http_client: Client::new(),
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl FeedClient for SpotFeedClient {
    async fn fetch(&self, feed_id: &str) -> DomainResult<Vec<FeedEntry>> {
        let url = format!("{}/{}/message.xml", self.base_url, feed_id);

        let response = self
            .http_client
            .get(&url)
            .send()
            .await
            .map_err(|e| DomainError::Feed(format!("request failed: {e}")))?;

        if !response.status().is_success() {
            return Err(DomainError::Feed(format!("HTTP {}", response.status())));
        }

        let body = response
            .text()
            .await
            .map_err(|e| DomainError::Feed(format!("failed to read response: {e}")))?;

        spot::parse_feed(&body).map_err(|e| DomainError::Feed(e.to_string()))
    }
}

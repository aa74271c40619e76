use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;

use rastro_domain::{DomainError, DomainResult, Geocoder, Position};

/// Google Geocoding API client for reverse geocoding.
pub struct GoogleGeocoder {
    http_client: Client,
    base_url: String,
    api_key: String,
}

#[derive(Debug, Deserialize)]
struct GeocodeResponse {
    status: String,
    #[serde(default)]
    results: Vec<GeocodeResult>,
}

#[derive(Debug, Deserialize)]
struct GeocodeResult {
    formatted_address: String,
}

impl GoogleGeocoder {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            http_client: Client::new(),
            base_url: base_url.into(),
            api_key: api_key.into(),
        }
    }
}

#[async_trait]
impl Geocoder for GoogleGeocoder {
    async fn reverse(&self, position: Position) -> DomainResult<String> {
        let url = format!(
            "{}?latlng={},{}&key={}",
            self.base_url, position.latitude, position.longitude, self.api_key
        );

        let response = self
            .http_client
            .get(&url)
            .send()
            .await
            .map_err(|e| DomainError::Geocoding(format!("request failed: {e}")))?;

        if !response.status().is_success() {
            return Err(DomainError::Geocoding(format!(
                "HTTP {}",
                response.status()
            )));
        }

        let body: GeocodeResponse = response
            .json()
            .await
            .map_err(|e| DomainError::Geocoding(format!("failed to parse response: {e}")))?;

        if body.status != "OK" {
            return Err(DomainError::Geocoding(format!(
                "provider status {}",
                body.status
            )));
        }

        body.results
            .into_iter()
            .next()
            .map(|result| result.formatted_address)
            .ok_or_else(|| DomainError::Geocoding("empty result set".to_string()))
    }
}

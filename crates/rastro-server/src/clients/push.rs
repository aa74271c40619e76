use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;

use rastro_domain::{DomainError, DomainResult, Notification, NotificationPublisher};

/// One day, in seconds: undelivered notifications expire after that.
const TIME_TO_LIVE_SECS: u32 = 60 * 60 * 24;

/// FCM topic publisher. The topic is `<tracker_id>_<category>`; the payload
/// is the notification's flat key/value map plus the tracker id.
pub struct FcmPublisher {
    http_client: Client,
    endpoint: String,
    server_key: String,
}

#[derive(Debug, Deserialize)]
struct FcmResponse {
    #[serde(default)]
    message_id: Option<i64>,
    #[serde(default)]
    error: Option<String>,
}

impl FcmPublisher {
    pub fn new(endpoint: impl Into<String>, server_key: impl Into<String>) -> Self {
        Self {
            http_client: Client::new(),
            endpoint: endpoint.into(),
            server_key: server_key.into(),
        }
    }
}

#[async_trait]
impl NotificationPublisher for FcmPublisher {
    async fn publish(&self, tracker_id: &str, notification: Notification) -> DomainResult<()> {
        let topic = format!("{}_{}", tracker_id, notification.kind.category());

        let mut data = notification.fields;
        data.insert("id".to_string(), tracker_id.to_string());

        let body = json!({
            "to": format!("/topics/{topic}"),
            "priority": "high",
            "time_to_live": TIME_TO_LIVE_SECS,
            "collapse_key": topic,
            "data": data,
        });

        let response = self
            .http_client
            .post(&self.endpoint)
            .header("Authorization", format!("key={}", self.server_key))
            .json(&body)
            .send()
            .await
            .map_err(|e| DomainError::Notification(format!("request failed: {e}")))?;

        if !response.status().is_success() {
            return Err(DomainError::Notification(format!(
                "HTTP {}",
                response.status()
            )));
        }

        let body: FcmResponse = response
            .json()
            .await
            .map_err(|e| DomainError::Notification(format!("failed to parse response: {e}")))?;

        if let Some(error) = body.error {
            return Err(DomainError::Notification(error));
        }
        if body.message_id.is_none() {
            return Err(DomainError::Notification(
                "response carried no message id".to_string(),
            ));
        }
        Ok(())
    }
}

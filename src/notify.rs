//! Chat webhook notifications.
//!
//! Notification delivery is best-effort: failures are logged and
//! swallowed so a dead webhook never fails the operation that triggered
//! it. Disabled entirely when no URL is configured.

use reqwest::Client;
use serde_json::json;
use std::time::Duration;

use crate::config::WebhookConfig;

pub struct Notifier {
    client: Client,
    url: String,
    auth_key: String,
    space_id: String,
}

impl Notifier {
    pub fn new(config: &WebhookConfig) -> Self {
        Self {
            client: Client::builder()
                .timeout(Duration::from_secs(15))
                .build()
                .unwrap_or_default(),
            url: config.url.clone(),
            auth_key: config.auth_key.clone(),
            space_id: config.space_id.clone(),
        }
    }

    pub fn enabled(&self) -> bool {
        !self.url.is_empty()
    }

    /// Post a text message to the configured webhook.
    pub async fn send(&self, text: &str) {
        if !self.enabled() {
            return;
        }
        let mut body = json!({ "text": text });
        if !self.space_id.is_empty() {
            body["spaceId"] = json!(self.space_id);
        }

        let mut request = self.client.post(&self.url).json(&body);
        if !self.auth_key.is_empty() {
            request = request.bearer_auth(&self.auth_key);
        }

        match request.send().await {
            Ok(response) if response.status().is_success() => {
                tracing::debug!("notification delivered");
            }
            Ok(response) => {
                tracing::warn!(status = %response.status(), "notification rejected");
            }
            Err(err) => {
                tracing::warn!(error = %err, "notification failed");
            }
        }
    }
}

//! Telegram Bot API channel
//!
//! Sends HTML-formatted messages with `sendMessage`. Only HTTP 200 counts as
//! delivered.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::{Channel, ChannelError, ChannelResult, DeliveryReport};
use crate::config::ChatSettings;
use crate::notifications::DestinationClass;
use crate::utils::truncate_text;

/// Telegram channel configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramConfig {
    /// Bot API base URL
    #[serde(default = "default_api_base")]
    pub api_base: String,
    /// Bot token
    pub token: String,
    /// Request timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

fn default_api_base() -> String {
    "https://api.telegram.org".to_string()
}

fn default_timeout() -> u64 {
    10
}

impl TelegramConfig {
    /// Create a new Telegram configuration
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            api_base: default_api_base(),
            token: token.into(),
            timeout_secs: default_timeout(),
        }
    }

    pub fn from_settings(settings: &ChatSettings) -> Self {
        Self {
            api_base: settings.api_base.clone(),
            token: settings.token.clone(),
            timeout_secs: settings.timeout_secs,
        }
    }

    /// Set the API base URL
    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into();
        self
    }

    /// Set request timeout
    pub fn with_timeout(mut self, timeout_secs: u64) -> Self {
        self.timeout_secs = timeout_secs;
        self
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.token.trim().is_empty() {
            return Err("TELEGRAM_TOKEN not configured".to_string());
        }

        if !self.api_base.starts_with("http://") && !self.api_base.starts_with("https://") {
            return Err("Telegram API base must start with http:// or https://".to_string());
        }

        if self.timeout_secs == 0 {
            return Err("Timeout must be greater than 0".to_string());
        }

        Ok(())
    }
}

#[derive(Debug, Serialize)]
struct SendMessageRequest<'a> {
    chat_id: &'a str,
    text: &'a str,
    parse_mode: &'static str,
}

/// Telegram notification channel
pub struct TelegramChannel {
    config: TelegramConfig,
    client: Client,
}

impl TelegramChannel {
    /// Create a new Telegram channel
    pub fn new(config: TelegramConfig) -> ChannelResult<Self> {
        config.validate().map_err(ChannelError::InvalidConfig)?;

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self { config, client })
    }

    fn send_message_url(&self) -> String {
        format!(
            "{}/bot{}/sendMessage",
            self.config.api_base.trim_end_matches('/'),
            self.config.token
        )
    }
}

#[async_trait]
impl Channel for TelegramChannel {
    fn name(&self) -> &str {
        "telegram"
    }

    async fn send(
        &self,
        destination_id: &str,
        class: DestinationClass,
        text: &str,
    ) -> ChannelResult<DeliveryReport> {
        let request = SendMessageRequest {
            chat_id: destination_id,
            text,
            parse_mode: "HTML",
        };

        let response = match self
            .client
            .post(self.send_message_url())
            .json(&request)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                tracing::error!(chat_id = destination_id, error = %e, "Telegram request failed");
                return Ok(DeliveryReport::failure(destination_id, class, e.to_string()));
            }
        };

        let status = response.status();
        if status.as_u16() == 200 {
            tracing::info!(chat_id = destination_id, class = %class, "Telegram message sent");
            return Ok(DeliveryReport::success(destination_id, class));
        }

        let body = response.text().await.unwrap_or_default();
        tracing::warn!(
            chat_id = destination_id,
            status = status.as_u16(),
            body = %truncate_text(&body, 200),
            "Telegram rejected message"
        );
        Ok(DeliveryReport::failure(
            destination_id,
            class,
            format!("HTTP {}", status.as_u16()),
        ))
    }

    fn config(&self) -> serde_json::Value {
        serde_json::json!({
            "name": self.name(),
            "api_base": self.config.api_base,
            "timeout_secs": self.config.timeout_secs,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_config_validation() {
        assert!(TelegramConfig::new("token").validate().is_ok());
        assert!(TelegramConfig::new("").validate().is_err());
        assert!(TelegramConfig::new("t").with_api_base("ftp://x").validate().is_err());
        assert!(TelegramConfig::new("t").with_timeout(0).validate().is_err());
    }

    #[test]
    fn test_missing_token_is_invalid_config() {
        let result = TelegramChannel::new(TelegramConfig::new(" "));
        assert!(matches!(result, Err(ChannelError::InvalidConfig(_))));
    }

    #[tokio::test]
    async fn test_send_posts_html_message() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/botsecret/sendMessage"))
            .and(body_partial_json(serde_json::json!({
                "chat_id": "-100",
                "text": "<b>hi</b>",
                "parse_mode": "HTML"
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"ok": true})))
            .expect(1)
            .mount(&server)
            .await;

        let channel =
            TelegramChannel::new(TelegramConfig::new("secret").with_api_base(server.uri())).unwrap();
        let report = channel
            .send("-100", DestinationClass::Group, "<b>hi</b>")
            .await
            .unwrap();
        assert!(report.success);
    }

    #[tokio::test]
    async fn test_rejected_message_is_failed_report() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(403).set_body_string("forbidden"))
            .mount(&server)
            .await;

        let channel =
            TelegramChannel::new(TelegramConfig::new("secret").with_api_base(server.uri())).unwrap();
        let report = channel
            .send("-100", DestinationClass::Channel, "x")
            .await
            .unwrap();
        assert!(!report.success);
        assert_eq!(report.error.as_deref(), Some("HTTP 403"));
    }
}

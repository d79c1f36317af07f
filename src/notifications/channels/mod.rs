//! Chat channels for delivering broadcast messages
//!
//! A channel is the transport for one chat platform. It delivers one text to
//! one destination and reports the outcome; fan-out lives in the broadcaster.

pub mod telegram;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

use super::DestinationClass;

/// Result type for channel operations
pub type ChannelResult<T> = Result<T, ChannelError>;

/// Errors that can occur during channel operations
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    /// HTTP request failed
    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    /// Invalid channel configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Outcome of delivering to one destination
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryReport {
    pub destination_id: String,
    pub class: DestinationClass,
    /// Whether the message was accepted by the platform
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Timestamp of delivery attempt
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

impl DeliveryReport {
    /// Create a successful delivery report
    pub fn success(destination_id: impl Into<String>, class: DestinationClass) -> Self {
        Self {
            destination_id: destination_id.into(),
            class,
            success: true,
            error: None,
            timestamp: chrono::Utc::now(),
        }
    }

    /// Create a failed delivery report
    pub fn failure(
        destination_id: impl Into<String>,
        class: DestinationClass,
        error: impl Into<String>,
    ) -> Self {
        Self {
            destination_id: destination_id.into(),
            class,
            success: false,
            error: Some(error.into()),
            timestamp: chrono::Utc::now(),
        }
    }
}

impl fmt::Display for DeliveryReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let status = if self.success { "SUCCESS" } else { "FAILED" };
        write!(f, "[{status}] {} {}", self.class, self.destination_id)?;
        if let Some(err) = &self.error {
            write!(f, ": {err}")?;
        }
        Ok(())
    }
}

/// Trait for chat channels
///
/// `send` returns `Err` only when the channel itself is unusable; a rejected
/// or failed delivery is an `Ok` report with `success = false`.
#[async_trait]
pub trait Channel: Send + Sync {
    /// Get the channel name
    fn name(&self) -> &str;

    /// Deliver `text` to one destination
    async fn send(
        &self,
        destination_id: &str,
        class: DestinationClass,
        text: &str,
    ) -> ChannelResult<DeliveryReport>;

    /// Get channel configuration as JSON
    fn config(&self) -> serde_json::Value {
        serde_json::json!({
            "name": self.name(),
        })
    }
}

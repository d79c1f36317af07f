//! Chat notifications for pipeline outcomes
//!
//! Every iteration ends with one broadcast, successful or not, so a human
//! watching the chat can tell a healthy idle service from a dead one.
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────┐
//! │      ChatBroadcaster                       │
//! │  - Destination classes (group / channel)   │
//! │  - Per-destination delivery reports        │
//! │  - success = sent_count > 0                │
//! └────────────────────────────────────────────┘
//!                     │
//!                     ▼
//!               ┌──────────┐
//!               │ Telegram │
//!               │ Channel  │
//!               └──────────┘
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use pollwire::notifications::{BroadcastMessage, ChatBroadcaster};
//!
//! let broadcaster = ChatBroadcaster::from_settings(&config.chat);
//! let report = broadcaster
//!     .broadcast(&BroadcastMessage::group_only("<b>hello</b>"))
//!     .await;
//! assert!(report.sent_count <= report.total_count);
//! ```

pub mod channels;
mod broadcaster;

use serde::{Deserialize, Serialize};
use std::fmt;

// Re-exports
pub use broadcaster::ChatBroadcaster;
pub use channels::telegram::TelegramChannel;
pub use channels::{Channel, DeliveryReport};

/// Kind of chat destination; each receives its own message variant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DestinationClass {
    /// Operator groups: verbose operational message
    Group,
    /// Public channels: terse announcement
    Channel,
}

impl DestinationClass {
    /// Get string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Group => "group",
            Self::Channel => "channel",
        }
    }
}

impl fmt::Display for DestinationClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One chat to deliver to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Destination {
    pub id: String,
    pub class: DestinationClass,
}

impl Destination {
    pub fn group(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            class: DestinationClass::Group,
        }
    }

    pub fn channel(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            class: DestinationClass::Channel,
        }
    }
}

/// Message variants for one broadcast
///
/// A `None` channel variant means channel destinations are skipped and not
/// counted in the report.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BroadcastMessage {
    pub group: String,
    pub channel: Option<String>,
}

impl BroadcastMessage {
    pub fn group_only(text: impl Into<String>) -> Self {
        Self {
            group: text.into(),
            channel: None,
        }
    }

    pub fn with_channel(mut self, text: impl Into<String>) -> Self {
        self.channel = Some(text.into());
        self
    }

    /// Text for a destination class, if that class should receive anything
    pub fn text_for(&self, class: DestinationClass) -> Option<&str> {
        match class {
            DestinationClass::Group => Some(self.group.as_str()),
            DestinationClass::Channel => self.channel.as_deref(),
        }
    }
}

/// Aggregated result of one broadcast
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BroadcastReport {
    /// `sent_count > 0`
    pub success: bool,
    pub sent_count: usize,
    pub total_count: usize,
    pub per_destination: Vec<DeliveryReport>,
    /// Set for configuration errors, which produce no per-destination entries
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl BroadcastReport {
    /// Report for a broadcast that could not start
    pub fn config_error(error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Default::default()
        }
    }

    /// Build from per-destination reports
    pub fn from_deliveries(per_destination: Vec<DeliveryReport>) -> Self {
        let sent_count = per_destination.iter().filter(|d| d.success).count();
        Self {
            success: sent_count > 0,
            sent_count,
            total_count: per_destination.len(),
            per_destination,
            error: None,
        }
    }

    /// Merge another report in, recomputing the totals
    pub fn merge(self, other: BroadcastReport) -> Self {
        let mut per_destination = self.per_destination;
        per_destination.extend(other.per_destination);
        let mut merged = Self::from_deliveries(per_destination);
        merged.error = self.error.or(other.error);
        merged
    }
}

impl fmt::Display for BroadcastReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let status = if self.success { "SUCCESS" } else { "FAILED" };
        write!(f, "[{status}] {}/{} delivered", self.sent_count, self.total_count)?;
        if let Some(error) = &self.error {
            write!(f, ": {error}")?;
        }
        Ok(())
    }
}

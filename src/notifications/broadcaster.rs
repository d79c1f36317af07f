//! Fan-out of one broadcast to every configured destination

use serde_json::json;

use super::channels::telegram::{TelegramChannel, TelegramConfig};
use super::channels::{Channel, DeliveryReport};
use super::{BroadcastMessage, BroadcastReport, Destination, DestinationClass};
use crate::config::ChatSettings;
use crate::metrics;

const SEND_METRIC: &str = "pollwire.telegram.send_message";

/// Delivers a message to group and channel destinations
///
/// Each destination is attempted independently. The broadcast succeeds when at
/// least one destination accepted its message.
pub struct ChatBroadcaster {
    channel: Option<Box<dyn Channel>>,
    config_error: Option<String>,
    destinations: Vec<Destination>,
}

impl ChatBroadcaster {
    /// Create a broadcaster over an existing channel
    pub fn new(channel: Box<dyn Channel>, destinations: Vec<Destination>) -> Self {
        Self {
            channel: Some(channel),
            config_error: None,
            destinations,
        }
    }

    /// Build the Telegram broadcaster from settings
    ///
    /// A missing token does not fail here; every broadcast then reports the
    /// configuration error instead.
    pub fn from_settings(settings: &ChatSettings) -> Self {
        let destinations = settings
            .group_chat_ids
            .iter()
            .map(Destination::group)
            .chain(settings.channel_chat_ids.iter().map(Destination::channel))
            .collect();

        match TelegramChannel::new(TelegramConfig::from_settings(settings)) {
            Ok(channel) => Self::new(Box::new(channel), destinations),
            Err(e) => {
                tracing::warn!(error = %e, "Chat broadcaster disabled");
                Self {
                    channel: None,
                    config_error: Some(e.to_string()),
                    destinations,
                }
            }
        }
    }

    pub fn destinations(&self) -> &[Destination] {
        &self.destinations
    }

    /// Broadcast to the configured destinations
    pub async fn broadcast(&self, message: &BroadcastMessage) -> BroadcastReport {
        self.broadcast_to(message, &self.destinations).await
    }

    /// Broadcast to an explicit destination list
    pub async fn broadcast_to(
        &self,
        message: &BroadcastMessage,
        destinations: &[Destination],
    ) -> BroadcastReport {
        let Some(channel) = self.channel.as_deref() else {
            let error = self
                .config_error
                .clone()
                .unwrap_or_else(|| "chat channel not configured".to_string());
            metrics::log_metric(SEND_METRIC, json!({"success": false, "error": "missing_token"}));
            return BroadcastReport::config_error(error);
        };

        let targets: Vec<&Destination> = destinations
            .iter()
            .filter(|d| !d.id.trim().is_empty())
            .collect();
        if targets.is_empty() {
            metrics::log_metric(
                SEND_METRIC,
                json!({"success": false, "error": "missing_chat_ids"}),
            );
            return BroadcastReport::config_error("No chat IDs provided");
        }

        // Without any group destination the group text goes to channels, so a
        // heartbeat or failure report still reaches someone
        let has_group = targets.iter().any(|d| d.class == DestinationClass::Group);

        let mut deliveries: Vec<DeliveryReport> = Vec::with_capacity(targets.len());
        for destination in targets {
            let text = match message.text_for(destination.class) {
                Some(text) => Some(text),
                None if !has_group => Some(message.group.as_str()),
                None => None,
            };
            let Some(text) = text else {
                tracing::debug!(
                    chat_id = %destination.id,
                    class = %destination.class,
                    "No message variant for destination class, skipping"
                );
                continue;
            };

            let report = match channel.send(&destination.id, destination.class, text).await {
                Ok(report) => report,
                Err(e) => DeliveryReport::failure(&destination.id, destination.class, e.to_string()),
            };
            metrics::record_delivery(destination.class.as_str(), report.success);
            deliveries.push(report);
        }

        let mut report = BroadcastReport::from_deliveries(deliveries);
        if report.total_count == 0 {
            report.error = Some("no destination class has a message variant".to_string());
        }

        metrics::log_metric(
            SEND_METRIC,
            json!({
                "success": report.success,
                "sent_count": report.sent_count,
                "total_chats": report.total_count,
            }),
        );
        tracing::info!(
            channel = channel.name(),
            success = report.success,
            sent = report.sent_count,
            total = report.total_count,
            "Broadcast completed"
        );
        report
    }
}

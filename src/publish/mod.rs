//! Publish pipeline: chain → social post → chat broadcast
//!
//! Each candidate walks a fixed sequence of stages. Stage failures are
//! recorded in the candidate's [`PublishResult`] and never stop the
//! sequence; the closing broadcast runs in every case, including when there
//! is no candidate at all (a heartbeat).
//!
//! ```text
//! PENDING → CHAIN_ATTEMPTED → CHAIN_OK ──→ SOCIAL_ATTEMPTED → SOCIAL_OK / SOCIAL_FAILED
//!                           ↘ CHAIN_FAILED → SOCIAL_SKIPPED
//!                                                   ↓
//!                                         NOTIFIED → DONE
//! ```

pub mod cache;
pub mod chain;
pub mod message;
pub mod social;

use chrono::Utc;
use serde::Serialize;
use std::fmt;

use crate::config::Config;
use crate::error::Result;
use crate::metrics;
use crate::models::{PerAuthorStatus, PollCandidate, PublishResult, SocialOutcome, SocialStatus};
use crate::notifications::{BroadcastMessage, BroadcastReport, ChatBroadcaster};

pub use cache::FetchCache;
pub use chain::{ChainClient, ChainPublisher};
pub use social::{SocialPoster, TwitterClient};

/// Stage of one candidate's publish run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PublishStage {
    Pending,
    ChainAttempted,
    ChainOk,
    ChainFailed,
    SocialAttempted,
    SocialOk,
    SocialFailed,
    SocialSkipped,
    Notified,
    Done,
}

impl PublishStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::ChainAttempted => "CHAIN_ATTEMPTED",
            Self::ChainOk => "CHAIN_OK",
            Self::ChainFailed => "CHAIN_FAILED",
            Self::SocialAttempted => "SOCIAL_ATTEMPTED",
            Self::SocialOk => "SOCIAL_OK",
            Self::SocialFailed => "SOCIAL_FAILED",
            Self::SocialSkipped => "SOCIAL_SKIPPED",
            Self::Notified => "NOTIFIED",
            Self::Done => "DONE",
        }
    }
}

impl fmt::Display for PublishStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Build the public vote link for a contract address
///
/// A fully qualified `address` is used as-is. Otherwise its last path segment
/// is appended to `base` (trailing slashes trimmed). Returns `None` when
/// either side is missing.
pub fn build_vote_url(base: &str, address: &str) -> Option<String> {
    let address = address.trim();
    if address.is_empty() {
        return None;
    }
    if address.starts_with("http://") || address.starts_with("https://") {
        return Some(address.to_string());
    }

    let segment = address
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .filter(|s| !s.is_empty())?;
    let base = base.trim().trim_end_matches('/');
    if base.is_empty() {
        return None;
    }
    Some(format!("{base}/{segment}"))
}

/// Everything one publish run produced
#[derive(Debug, Clone, Serialize)]
pub struct PublishReport {
    /// One entry per candidate, in input order
    pub results: Vec<PublishResult>,
    /// Stage trail per candidate, index-aligned with `results`
    pub stages: Vec<Vec<PublishStage>>,
    pub broadcast: BroadcastReport,
    /// No candidate; the broadcast was a heartbeat
    pub heartbeat: bool,
}

/// Drives chain, social and broadcast for the winners of one iteration
pub struct PublishOrchestrator {
    chain: Box<dyn ChainPublisher>,
    social: Box<dyn SocialPoster>,
    broadcaster: ChatBroadcaster,
    vote_base_url: String,
}

impl PublishOrchestrator {
    pub fn new(
        chain: Box<dyn ChainPublisher>,
        social: Box<dyn SocialPoster>,
        broadcaster: ChatBroadcaster,
        vote_base_url: impl Into<String>,
    ) -> Self {
        Self {
            chain,
            social,
            broadcaster,
            vote_base_url: vote_base_url.into(),
        }
    }

    /// Wire the HTTP collaborators from configuration
    pub fn from_config(config: &Config) -> Result<Self> {
        Ok(Self::new(
            Box::new(ChainClient::from_settings(&config.chain)?),
            Box::new(TwitterClient::from_settings(&config.social)?),
            ChatBroadcaster::from_settings(&config.chat),
            config.chain.vote_url.clone(),
        ))
    }

    /// Run chain and social steps for one candidate
    pub async fn publish_candidate(
        &self,
        candidate: &PollCandidate,
    ) -> (PublishResult, Vec<PublishStage>) {
        let mut stages = vec![PublishStage::Pending, PublishStage::ChainAttempted];

        let chain_outcome = self.chain.publish(candidate).await;
        metrics::record_chain_publish(chain_outcome.success, chain_outcome.maybe_success);

        let contract_address = chain_outcome
            .contract_address
            .clone()
            .filter(|_| chain_outcome.success)
            .unwrap_or_default();
        stages.push(if chain_outcome.success {
            PublishStage::ChainOk
        } else {
            PublishStage::ChainFailed
        });

        let vote_url = build_vote_url(&self.vote_base_url, &contract_address).unwrap_or_default();

        let social_outcome = if !chain_outcome.success {
            SocialOutcome::skipped("chain publish failed")
        } else if contract_address.is_empty() {
            SocialOutcome::skipped("no contract address")
        } else if vote_url.is_empty() {
            SocialOutcome::skipped("no vote link (vote base URL not configured)")
        } else {
            stages.push(PublishStage::SocialAttempted);
            let text = social::compose_post(
                &candidate.title,
                &candidate.options,
                &vote_url,
                self.social.max_chars(),
            );
            self.social.post(&text).await
        };

        stages.push(match social_outcome.status {
            SocialStatus::Ok => PublishStage::SocialOk,
            SocialStatus::Failed => PublishStage::SocialFailed,
            SocialStatus::Skipped => PublishStage::SocialSkipped,
        });
        metrics::record_social_post(match social_outcome.status {
            SocialStatus::Ok => "ok",
            SocialStatus::Failed => "failed",
            SocialStatus::Skipped => "skipped",
        });

        tracing::info!(
            source_group = %candidate.source_group,
            title = %candidate.title,
            chain_success = chain_outcome.success,
            maybe_success = chain_outcome.maybe_success,
            social_status = ?social_outcome.status,
            vote_url = %vote_url,
            "Candidate published"
        );

        let result = PublishResult {
            source_group: candidate.source_group,
            title: candidate.title.clone(),
            contract_address,
            vote_url,
            tweet_url: social_outcome.post_url.clone().unwrap_or_default(),
            chain_outcome,
            social_outcome,
        };
        (result, stages)
    }

    /// Publish every candidate, then send one consolidated broadcast
    ///
    /// With no candidates the broadcast is a heartbeat listing author statuses.
    pub async fn publish_all(
        &self,
        candidates: &[PollCandidate],
        per_handle: &[PerAuthorStatus],
        explain: Option<&str>,
    ) -> PublishReport {
        let now = Utc::now();

        if candidates.is_empty() {
            tracing::info!(authors = per_handle.len(), "No candidate, sending heartbeat");
            let text = message::format_heartbeat(per_handle, explain, now);
            let broadcast = self
                .broadcaster
                .broadcast(&BroadcastMessage::group_only(text))
                .await;
            return PublishReport {
                results: Vec::new(),
                stages: Vec::new(),
                broadcast,
                heartbeat: true,
            };
        }

        let mut published = Vec::with_capacity(candidates.len());
        let mut stages = Vec::with_capacity(candidates.len());
        for candidate in candidates {
            let (result, trail) = self.publish_candidate(candidate).await;
            published.push((candidate.clone(), result));
            stages.push(trail);
        }

        let mut broadcast_message =
            BroadcastMessage::group_only(message::format_group_message(&published, per_handle, now));
        if let Some(announcement) = message::format_channel_message(&published) {
            broadcast_message = broadcast_message.with_channel(announcement);
        }
        let broadcast = self.broadcaster.broadcast(&broadcast_message).await;

        for trail in &mut stages {
            trail.push(PublishStage::Notified);
            trail.push(PublishStage::Done);
        }

        PublishReport {
            results: published.into_iter().map(|(_, result)| result).collect(),
            stages,
            broadcast,
            heartbeat: false,
        }
    }
}

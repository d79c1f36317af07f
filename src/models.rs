//! Core data structures for the poll pipeline
//!
//! Authors are partitioned into [`AuthorBatch`]es, each fetch yields
//! [`PerAuthorStatus`] entries and at most one [`PollCandidate`], and every
//! published candidate leaves behind a [`PublishResult`].

use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

use crate::utils::error::PublishError;

/// Default maximum number of authors per upstream fetch call
pub const DEFAULT_BATCH_SIZE: usize = 10;

/// Which author partition a candidate came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SourceGroup {
    /// Regular, publicly configured handles
    Primary,
    /// Private wire handles
    Private,
}

impl SourceGroup {
    /// All groups in fetch order
    pub const ALL: [SourceGroup; 2] = [SourceGroup::Primary, SourceGroup::Private];

    /// Get string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Primary => "PRIMARY",
            Self::Private => "PRIVATE",
        }
    }

    /// Configuration key the group's handles are read from
    pub fn config_key(&self) -> &'static str {
        match self {
            Self::Primary => "X_HANDLES",
            Self::Private => "PRIVATE_WIRES",
        }
    }

    /// Tag forced onto candidates from this group, if any
    pub fn forced_tag(&self) -> Option<&'static str> {
        match self {
            Self::Primary => None,
            Self::Private => Some("PRIVATE_WIRES"),
        }
    }
}

impl fmt::Display for SourceGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ordered, deduplicated group of handles sent in one fetch call
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuthorBatch {
    /// Position of this batch within the partition
    pub index: usize,
    /// `@`-stripped handles, at most the batch cap
    pub handles: Vec<String>,
}

impl AuthorBatch {
    /// Partition normalized handles into consecutive chunks of `batch_size`
    ///
    /// The last chunk may be shorter. A zero batch size is treated as one.
    pub fn partition(handles: &[String], batch_size: usize) -> Vec<AuthorBatch> {
        handles
            .chunks(batch_size.max(1))
            .enumerate()
            .map(|(index, chunk)| AuthorBatch {
                index,
                handles: chunk.to_vec(),
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }
}

/// Outcome for one author in one fetch
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandleStatus {
    /// A poll-worthy topic was found among this author's posts
    Found,
    /// No posts inside the time window
    NoNewPosts,
    /// Posts exist but none was suitable
    Rejected(String),
    /// Was `Found`, but another batch's topic won selection
    Superseded,
}

impl HandleStatus {
    pub const FOUND: &'static str = "poll_topic_found";
    pub const NO_NEW_POSTS: &'static str = "no_new_posts_in_window";
    pub const SUPERSEDED: &'static str = "superseded";

    /// Parse the loosely formatted status string returned by the model
    pub fn from_wire(raw: &str) -> Self {
        let trimmed = raw.trim();
        let lower = trimmed.to_ascii_lowercase();

        if lower == Self::SUPERSEDED {
            Self::Superseded
        } else if lower.starts_with("no_new_posts") {
            Self::NoNewPosts
        } else if lower == "found" || (lower.ends_with("_found") && !lower.contains("not_found")) {
            Self::Found
        } else {
            Self::Rejected(extract_reason(trimmed))
        }
    }

    /// Wire representation used in logs and messages
    pub fn as_wire(&self) -> String {
        match self {
            Self::Found => Self::FOUND.to_string(),
            Self::NoNewPosts => Self::NO_NEW_POSTS.to_string(),
            Self::Rejected(reason) if reason.is_empty() => "no_suitable_topic".to_string(),
            Self::Rejected(reason) => format!("no_suitable_topic (reason: {reason})"),
            Self::Superseded => Self::SUPERSEDED.to_string(),
        }
    }

    pub fn is_found(&self) -> bool {
        matches!(self, Self::Found)
    }
}

/// Pull `xxx` out of `no_suitable_topic (reason: xxx)`; otherwise keep the raw text
fn extract_reason(raw: &str) -> String {
    if let Some(start) = raw.find("reason:") {
        let rest = &raw[start + "reason:".len()..];
        return rest.trim().trim_end_matches(')').trim().to_string();
    }
    if raw.eq_ignore_ascii_case("no_suitable_topic") {
        return String::new();
    }
    raw.to_string()
}

impl fmt::Display for HandleStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.as_wire())
    }
}

impl Serialize for HandleStatus {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.as_wire())
    }
}

impl<'de> Deserialize<'de> for HandleStatus {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(Self::from_wire(&raw))
    }
}

/// Status of one author after a fetch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerAuthorStatus {
    pub handle: String,
    pub status: HandleStatus,
    #[serde(default)]
    pub post_count: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_group: Option<SourceGroup>,
    #[serde(default)]
    pub batch_index: usize,
}

/// Engagement numbers attached to a candidate
///
/// Every field coerces leniently: numbers, numeric strings, missing or
/// malformed values all deserialize, the latter as `0`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    #[serde(default, deserialize_with = "lenient_f64")]
    pub likes: f64,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub reposts: f64,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub replies: f64,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub views: f64,
}

impl StatsSnapshot {
    /// Deterministic engagement score: `likes + 2*reposts + 1.5*replies + views/1000`
    pub fn score(&self) -> f64 {
        finite(self.likes)
            + 2.0 * finite(self.reposts)
            + 1.5 * finite(self.replies)
            + finite(self.views) / 1000.0
    }
}

fn finite(v: f64) -> f64 {
    if v.is_finite() {
        v
    } else {
        0.0
    }
}

/// Coerce any JSON value into a number, degrading to zero
pub fn coerce_f64(value: &serde_json::Value) -> f64 {
    use serde_json::Value;

    let n = match value {
        Value::Number(n) => n.as_f64().unwrap_or(0.0),
        Value::String(s) => s.trim().replace(',', "").parse::<f64>().unwrap_or(0.0),
        _ => 0.0,
    };
    finite(n)
}

fn lenient_f64<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(coerce_f64(&value))
}

/// Post cited as evidence for a candidate
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SamplePost {
    #[serde(default)]
    pub handle: String,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub url: String,
}

/// A binary poll proposal distilled from recent posts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PollCandidate {
    pub title: String,
    pub description: String,
    pub options: Vec<String>,
    #[serde(default)]
    pub sample_posts: Vec<SamplePost>,
    #[serde(default)]
    pub rationale: String,
    #[serde(default)]
    pub stats_snapshot: StatsSnapshot,
    pub source_group: SourceGroup,
    #[serde(default)]
    pub batch_index: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
}

impl PollCandidate {
    /// Number of options every publishable poll carries
    pub const OPTION_COUNT: usize = 2;

    /// Engagement score of this candidate
    pub fn score(&self) -> f64 {
        self.stats_snapshot.score()
    }

    /// Check the binary-poll invariant: non-empty title, exactly two non-empty options
    pub fn validate(&self) -> Result<(), PublishError> {
        if self.title.trim().is_empty() {
            return Err(PublishError::Validation("title is empty".to_string()));
        }
        if self.options.len() != Self::OPTION_COUNT {
            return Err(PublishError::Validation(format!(
                "expected {} options, got {}",
                Self::OPTION_COUNT,
                self.options.len()
            )));
        }
        if self.options.iter().any(|o| o.trim().is_empty()) {
            return Err(PublishError::Validation("empty option".to_string()));
        }
        Ok(())
    }
}

/// Result of fetching one source group (possibly across several batches)
#[derive(Debug, Clone, Default, Serialize)]
pub struct FetchOutcome {
    /// One entry per author, in batch order
    pub per_handle: Vec<PerAuthorStatus>,
    /// The winning candidate, if any
    pub candidate: Option<PollCandidate>,
    /// Deterministic scores of all candidates that entered selection
    pub scores: Vec<f64>,
    /// Number of upstream fetch calls issued
    pub fetch_calls: usize,
    /// Free-text note from the model, shown in the heartbeat
    #[serde(skip_serializing_if = "Option::is_none")]
    pub explain: Option<String>,
}

/// Outcome of the chain-publish step
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChainOutcome {
    pub success: bool,
    #[serde(default)]
    pub contract_address: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    /// The request may have landed even though no confirmation arrived (read timeout)
    #[serde(default)]
    pub maybe_success: bool,
    #[serde(default)]
    pub idempotency_key: String,
}

impl ChainOutcome {
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            ..Default::default()
        }
    }
}

/// Status of the social-post step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SocialStatus {
    Ok,
    Failed,
    Skipped,
}

/// Outcome of the social-post step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SocialOutcome {
    pub status: SocialStatus,
    #[serde(default)]
    pub post_id: Option<String>,
    #[serde(default)]
    pub post_url: Option<String>,
    /// Error for `Failed`, reason for `Skipped`
    #[serde(default)]
    pub error: Option<String>,
}

impl SocialOutcome {
    pub fn posted(post_id: impl Into<String>, post_url: impl Into<String>) -> Self {
        Self {
            status: SocialStatus::Ok,
            post_id: Some(post_id.into()),
            post_url: Some(post_url.into()),
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            status: SocialStatus::Failed,
            post_id: None,
            post_url: None,
            error: Some(error.into()),
        }
    }

    pub fn skipped(reason: impl Into<String>) -> Self {
        Self {
            status: SocialStatus::Skipped,
            post_id: None,
            post_url: None,
            error: Some(reason.into()),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == SocialStatus::Ok
    }
}

/// Record of one candidate's publish attempt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublishResult {
    pub source_group: SourceGroup,
    pub title: String,
    /// Empty when the chain step produced no address
    pub contract_address: String,
    /// Empty when no vote link could be built
    pub vote_url: String,
    /// Empty unless the social post succeeded
    pub tweet_url: String,
    pub chain_outcome: ChainOutcome,
    pub social_outcome: SocialOutcome,
}

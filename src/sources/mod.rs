//! Batched candidate fetching
//!
//! Author lists larger than the batch cap are split into consecutive chunks
//! and each chunk gets its own upstream call. The calls run one after another
//! since they share the same rate-limited model endpoint. A chunk whose call
//! fails or whose reply cannot be parsed contributes nothing; the others still
//! count.

use async_trait::async_trait;
use serde::Serialize;

use crate::error::{Error, Result};
use crate::llm::parse::{parse_fetch_reply, Parsed};
use crate::models::{AuthorBatch, FetchOutcome, HandleStatus, PollCandidate, SourceGroup};
use crate::selector::{Arbiter, CandidateSelector};
use crate::utils::normalize_handles;

/// Input of one candidate-fetch call
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchRequest {
    pub handles: Vec<String>,
    pub topic_hint: String,
    pub window_seconds: u64,
    pub avoid_titles: Vec<String>,
}

/// External call that turns a batch of authors into a raw poll reply
#[async_trait]
pub trait CandidateSearch: Send + Sync {
    async fn search(&self, request: &SearchRequest) -> Result<String>;
}

/// Fetches one source group in batches and resolves a single winner
pub struct BatchedSourceFetcher<'a> {
    search: &'a dyn CandidateSearch,
    arbiter: Option<&'a dyn Arbiter>,
    batch_size: usize,
}

impl<'a> BatchedSourceFetcher<'a> {
    pub fn new(search: &'a dyn CandidateSearch, batch_size: usize) -> Self {
        Self {
            search,
            arbiter: None,
            batch_size: batch_size.max(1),
        }
    }

    /// Use an arbiter when several batches produce candidates
    pub fn with_arbiter(mut self, arbiter: &'a dyn Arbiter) -> Self {
        self.arbiter = Some(arbiter);
        self
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Fetch candidates for `handles`, issuing `ceil(n / batch_size)` calls
    ///
    /// Returns [`Error::InvalidInput`] when no handle survives normalization.
    pub async fn fetch_candidates(
        &self,
        group: SourceGroup,
        handles: &[String],
        topic_hint: &str,
        window_seconds: u64,
        avoid_titles: &[String],
    ) -> Result<FetchOutcome> {
        let handles = normalize_handles(handles);
        if handles.is_empty() {
            return Err(Error::InvalidInput(format!(
                "no handles configured for {group} ({})",
                group.config_key()
            )));
        }

        let batches = AuthorBatch::partition(&handles, self.batch_size);
        tracing::info!(
            source_group = %group,
            handles = handles.len(),
            batches = batches.len(),
            batch_size = self.batch_size,
            "Fetching poll candidates"
        );

        let mut outcome = FetchOutcome::default();
        let mut candidates: Vec<PollCandidate> = Vec::new();

        for batch in &batches {
            let request = SearchRequest {
                handles: batch.handles.clone(),
                topic_hint: topic_hint.to_string(),
                window_seconds,
                avoid_titles: avoid_titles.to_vec(),
            };

            outcome.fetch_calls += 1;
            let raw = match self.search.search(&request).await {
                Ok(raw) => raw,
                Err(e) => {
                    tracing::warn!(
                        source_group = %group,
                        batch_index = batch.index,
                        error = %e,
                        "Fetch call failed, skipping batch"
                    );
                    continue;
                }
            };

            match parse_fetch_reply(&raw, group, batch.index) {
                Parsed::Ok(reply) => {
                    tracing::debug!(
                        source_group = %group,
                        batch_index = batch.index,
                        statuses = reply.per_handle.len(),
                        has_candidate = reply.candidate.is_some(),
                        "Batch parsed"
                    );
                    outcome.per_handle.extend(reply.per_handle);
                    candidates.extend(reply.candidate);
                    if outcome.explain.is_none() {
                        outcome.explain = reply.explain;
                    }
                }
                Parsed::Malformed(_) => {
                    tracing::warn!(
                        source_group = %group,
                        batch_index = batch.index,
                        "Unparseable batch reply, contributing no candidate"
                    );
                }
            }
        }

        let selector = match self.arbiter {
            Some(arbiter) => CandidateSelector::new(arbiter),
            None => CandidateSelector::deterministic(),
        };
        let selection = selector.select(&candidates).await;
        outcome.scores = selection.scores;

        if let Some(winner) = selection.winner {
            let winning_batch = candidates[winner].batch_index;
            supersede_losers(&mut outcome, winning_batch);
            outcome.candidate = candidates.into_iter().nth(winner);
        }

        Ok(outcome)
    }
}

/// Rewrite `Found` statuses outside the winning batch to `Superseded`
pub fn supersede_losers(outcome: &mut FetchOutcome, winning_batch: usize) {
    for status in outcome
        .per_handle
        .iter_mut()
        .filter(|s| s.batch_index != winning_batch && s.status.is_found())
    {
        status.status = HandleStatus::Superseded;
    }
}

/// Per-group fetch results of one iteration
#[derive(Debug, Clone, Default, Serialize)]
pub struct AggregatedFetch {
    pub groups: Vec<(SourceGroup, FetchOutcome)>,
}

impl AggregatedFetch {
    /// Winners of every group, primary first
    pub fn candidates(&self) -> Vec<PollCandidate> {
        self.groups
            .iter()
            .filter_map(|(_, outcome)| outcome.candidate.clone())
            .collect()
    }

    /// Statuses of every author across groups
    pub fn per_handle(&self) -> Vec<crate::models::PerAuthorStatus> {
        self.groups
            .iter()
            .flat_map(|(_, outcome)| outcome.per_handle.iter().cloned())
            .collect()
    }

    pub fn explain(&self) -> Option<String> {
        self.groups
            .iter()
            .find_map(|(_, outcome)| outcome.explain.clone())
    }

    pub fn fetch_calls(&self) -> usize {
        self.groups.iter().map(|(_, o)| o.fetch_calls).sum()
    }
}

/// Fetch every group that has handles; each group picks its own winner
pub async fn fetch_all_groups(
    fetcher: &BatchedSourceFetcher<'_>,
    groups: &[(SourceGroup, Vec<String>)],
    topic_hint: &str,
    window_seconds: u64,
    avoid_titles: &[String],
) -> Result<AggregatedFetch> {
    let mut aggregated = AggregatedFetch::default();

    for (group, handles) in groups {
        if normalize_handles(handles).is_empty() {
            tracing::debug!(source_group = %group, "No handles configured, skipping group");
            continue;
        }
        let outcome = fetcher
            .fetch_candidates(*group, handles, topic_hint, window_seconds, avoid_titles)
            .await?;
        aggregated.groups.push((*group, outcome));
    }

    if aggregated.groups.is_empty() {
        return Err(Error::InvalidInput(
            "no handles configured in any source group".to_string(),
        ));
    }
    Ok(aggregated)
}

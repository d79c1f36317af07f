//! Candidate selection
//!
//! Picks a single winner among poll candidates produced by different author
//! batches. A single candidate wins outright. Several candidates are first put
//! to an [`Arbiter`]; if the arbiter gives no usable answer the deterministic
//! engagement score decides, ties going to the lowest batch index.

use async_trait::async_trait;
use serde::Serialize;

use crate::error::Result;
use crate::llm::parse::parse_winner_index;
use crate::models::{PollCandidate, StatsSnapshot};

/// Compact view of a candidate shown to the arbiter
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ShortlistEntry {
    pub index: usize,
    pub title: String,
    pub description: String,
    pub options: Vec<String>,
    pub rationale: String,
    pub stats: StatsSnapshot,
}

impl ShortlistEntry {
    pub fn from_candidate(index: usize, candidate: &PollCandidate) -> Self {
        Self {
            index,
            title: candidate.title.clone(),
            description: candidate.description.clone(),
            options: candidate.options.clone(),
            rationale: candidate.rationale.clone(),
            stats: candidate.stats_snapshot,
        }
    }
}

/// External call that picks one candidate out of a shortlist
///
/// Returns the raw reply text; it is expected to contain `{"winner_index": n}`.
#[async_trait]
pub trait Arbiter: Send + Sync {
    async fn arbitrate(&self, shortlist: &[ShortlistEntry]) -> Result<String>;
}

/// How the winner was decided
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectionMethod {
    /// Nothing to choose from
    Empty,
    /// Only one candidate
    Single,
    /// Arbiter returned a valid index
    Arbitrated,
    /// Deterministic score argmax
    Scored,
}

/// Result of one selection
#[derive(Debug, Clone, PartialEq)]
pub struct Selection {
    pub winner: Option<usize>,
    /// Deterministic scores, index-aligned with the input
    pub scores: Vec<f64>,
    pub method: SelectionMethod,
}

/// Deterministic scores for a candidate list
pub fn score_candidates(candidates: &[PollCandidate]) -> Vec<f64> {
    candidates.iter().map(PollCandidate::score).collect()
}

/// Index of the highest score; ties go to the lowest batch index, then first seen
pub fn argmax_by_score(candidates: &[PollCandidate], scores: &[f64]) -> Option<usize> {
    let mut best: Option<usize> = None;
    for (i, score) in scores.iter().enumerate().take(candidates.len()) {
        match best {
            None => best = Some(i),
            Some(b) => {
                let better = *score > scores[b]
                    || (*score == scores[b] && candidates[i].batch_index < candidates[b].batch_index);
                if better {
                    best = Some(i);
                }
            }
        }
    }
    best
}

/// Resolves a single winner among competing candidates
pub struct CandidateSelector<'a> {
    arbiter: Option<&'a dyn Arbiter>,
}

impl<'a> CandidateSelector<'a> {
    pub fn new(arbiter: &'a dyn Arbiter) -> Self {
        Self {
            arbiter: Some(arbiter),
        }
    }

    /// Selector that always falls back to the deterministic score
    pub fn deterministic() -> Self {
        Self { arbiter: None }
    }

    /// Pick a winner. Never mutates the candidates.
    pub async fn select(&self, candidates: &[PollCandidate]) -> Selection {
        match candidates.len() {
            0 => {
                return Selection {
                    winner: None,
                    scores: Vec::new(),
                    method: SelectionMethod::Empty,
                }
            }
            1 => {
                return Selection {
                    winner: Some(0),
                    scores: score_candidates(candidates),
                    method: SelectionMethod::Single,
                }
            }
            _ => {}
        }

        let scores = score_candidates(candidates);

        if let Some(index) = self.arbitrate(candidates).await {
            tracing::info!(winner = index, candidates = candidates.len(), "Arbiter picked winner");
            return Selection {
                winner: Some(index),
                scores,
                method: SelectionMethod::Arbitrated,
            };
        }

        let winner = argmax_by_score(candidates, &scores);
        tracing::info!(
            winner = ?winner,
            scores = ?scores,
            "Winner picked by engagement score"
        );
        Selection {
            winner,
            scores,
            method: SelectionMethod::Scored,
        }
    }

    /// In-range index from the arbiter, or `None` on any failure
    async fn arbitrate(&self, candidates: &[PollCandidate]) -> Option<usize> {
        let arbiter = self.arbiter?;
        let shortlist: Vec<ShortlistEntry> = candidates
            .iter()
            .enumerate()
            .map(|(i, c)| ShortlistEntry::from_candidate(i, c))
            .collect();

        let raw = match arbiter.arbitrate(&shortlist).await {
            Ok(raw) => raw,
            Err(e) => {
                tracing::warn!(error = %e, "Arbitration call failed, falling back to score");
                return None;
            }
        };

        match parse_winner_index(&raw) {
            Some(index) if index < candidates.len() => Some(index),
            Some(index) => {
                tracing::warn!(index, candidates = candidates.len(), "Arbiter index out of range");
                None
            }
            None => {
                tracing::warn!("Arbitration reply had no winner_index");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::models::SourceGroup;
    use proptest::prelude::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FixedArbiter {
        reply: Option<String>,
        calls: AtomicUsize,
    }

    impl FixedArbiter {
        fn new(reply: Option<&str>) -> Self {
            Self {
                reply: reply.map(str::to_string),
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl Arbiter for FixedArbiter {
        async fn arbitrate(&self, _shortlist: &[ShortlistEntry]) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.reply
                .clone()
                .ok_or_else(|| Error::Llm("unavailable".to_string()))
        }
    }

    fn candidate(batch_index: usize, likes: f64) -> PollCandidate {
        PollCandidate {
            title: format!("Poll {batch_index}"),
            description: String::new(),
            options: vec!["Yes".to_string(), "No".to_string()],
            sample_posts: vec![],
            rationale: String::new(),
            stats_snapshot: StatsSnapshot {
                likes,
                ..Default::default()
            },
            source_group: SourceGroup::Primary,
            batch_index,
            tag: None,
        }
    }

    #[tokio::test]
    async fn test_empty_has_no_winner() {
        let selection = CandidateSelector::deterministic().select(&[]).await;
        assert_eq!(selection.winner, None);
        assert_eq!(selection.method, SelectionMethod::Empty);
    }

    #[tokio::test]
    async fn test_single_candidate_skips_arbitration() {
        let arbiter = FixedArbiter::new(Some(r#"{"winner_index": 5}"#));
        let selection = CandidateSelector::new(&arbiter)
            .select(&[candidate(0, 1.0)])
            .await;
        assert_eq!(selection.winner, Some(0));
        assert_eq!(arbiter.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_arbiter_takes_precedence() {
        let arbiter = FixedArbiter::new(Some(r#"{"winner_index": 1}"#));
        let candidates = vec![candidate(0, 100.0), candidate(1, 1.0)];
        let selection = CandidateSelector::new(&arbiter).select(&candidates).await;
        assert_eq!(selection.winner, Some(1));
        assert_eq!(selection.method, SelectionMethod::Arbitrated);
    }

    #[tokio::test]
    async fn test_out_of_range_falls_back_to_score() {
        let arbiter = FixedArbiter::new(Some(r#"{"winner_index": 7}"#));
        let candidates = vec![candidate(0, 1.0), candidate(1, 100.0)];
        let selection = CandidateSelector::new(&arbiter).select(&candidates).await;
        assert_eq!(selection.winner, Some(1));
        assert_eq!(selection.method, SelectionMethod::Scored);
    }

    #[tokio::test]
    async fn test_failed_arbitration_falls_back_to_score() {
        let arbiter = FixedArbiter::new(None);
        let candidates = vec![candidate(0, 129.5), candidate(1, 50.0)];
        let selection = CandidateSelector::new(&arbiter).select(&candidates).await;
        assert_eq!(selection.winner, Some(0));
        assert_eq!(selection.scores, vec![129.5, 50.0]);
    }

    #[test]
    fn test_tie_goes_to_lowest_batch() {
        let candidates = vec![candidate(3, 10.0), candidate(1, 10.0), candidate(2, 10.0)];
        let scores = score_candidates(&candidates);
        assert_eq!(argmax_by_score(&candidates, &scores), Some(1));
    }

    proptest! {
        #[test]
        fn prop_deterministic_winner_has_max_score(likes in prop::collection::vec(0.0f64..1e6, 2..8)) {
            let candidates: Vec<PollCandidate> = likes
                .iter()
                .enumerate()
                .map(|(i, l)| candidate(i, *l))
                .collect();
            let runtime = tokio::runtime::Builder::new_current_thread().build().unwrap();
            let selection = runtime.block_on(CandidateSelector::deterministic().select(&candidates));
            let winner = selection.winner.unwrap();
            for score in &selection.scores {
                prop_assert!(*score <= selection.scores[winner]);
            }
        }
    }
}

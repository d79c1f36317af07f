//! Single-slot cache of the last successful fetch
//!
//! The cache is overwritten whenever a fetch produces a result and read when
//! a later stage of the same iteration needs the payload again (for example
//! after the session was re-established). Entries from an older iteration are
//! never served, so a stale poll cannot be published twice.

use chrono::{DateTime, Utc};

use crate::sources::AggregatedFetch;

/// Cached fetch with the iteration that produced it
#[derive(Debug, Clone)]
pub struct CachedFetch {
    pub iteration: u64,
    pub stored_at: DateTime<Utc>,
    pub fetch: AggregatedFetch,
}

#[derive(Debug, Default)]
pub struct FetchCache {
    slot: Option<CachedFetch>,
}

impl FetchCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Overwrite the slot
    pub fn store(&mut self, iteration: u64, fetch: AggregatedFetch) {
        tracing::debug!(iteration, candidates = fetch.candidates().len(), "Caching fetch result");
        self.slot = Some(CachedFetch {
            iteration,
            stored_at: Utc::now(),
            fetch,
        });
    }

    /// Payload stored by `iteration`, if the slot still holds it
    pub fn get_for(&self, iteration: u64) -> Option<&AggregatedFetch> {
        self.slot
            .as_ref()
            .filter(|c| c.iteration == iteration)
            .map(|c| &c.fetch)
    }

    /// Last stored entry regardless of iteration
    pub fn last(&self) -> Option<&CachedFetch> {
        self.slot.as_ref()
    }

    pub fn clear(&mut self) {
        self.slot = None;
    }
}

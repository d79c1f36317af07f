//! The poll service: one fixed iteration on a coarse interval
//!
//! ```text
//! recent titles ─→ fetch (per group, batched) ─→ cache ─→ session gate ─→ publish + broadcast
//! ```
//!
//! Each iteration runs strictly sequentially. The only state carried across
//! iterations is the fetch cache and the scheduling session.

pub mod session;

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::config::Config;
use crate::error::{Error, PollwireErrorTrait, Result};
use crate::indexer::IndexerClient;
use crate::llm::{LlmClient, LlmConfig};
use crate::metrics;
use crate::models::SourceGroup;
use crate::notifications::BroadcastReport;
use crate::publish::{FetchCache, PublishOrchestrator, PublishReport};
use crate::selector::Arbiter;
use crate::sources::{fetch_all_groups, AggregatedFetch, BatchedSourceFetcher, CandidateSearch};

pub use session::{SessionService, DEFAULT_SESSION_TTL};

/// Outcome of one iteration
#[derive(Debug, Clone, Serialize)]
pub struct IterationReport {
    pub iteration: u64,
    /// Winners handed to the publish stage
    pub candidates: usize,
    /// Candidates whose chain step succeeded
    pub published: usize,
    pub fetch_calls: usize,
    /// The session had to be re-established once
    pub session_retried: bool,
    pub publish: PublishReport,
}

impl IterationReport {
    pub fn broadcast(&self) -> &BroadcastReport {
        &self.publish.broadcast
    }
}

pub struct PollService {
    config: Config,
    search: Arc<dyn CandidateSearch>,
    arbiter: Option<Arc<dyn Arbiter>>,
    indexer: IndexerClient,
    orchestrator: PublishOrchestrator,
    cache: FetchCache,
    sessions: SessionService,
    session_id: Option<String>,
    iteration: u64,
}

impl PollService {
    /// Assemble a service from explicit collaborators
    pub fn new(
        config: Config,
        search: Arc<dyn CandidateSearch>,
        arbiter: Option<Arc<dyn Arbiter>>,
        orchestrator: PublishOrchestrator,
    ) -> Self {
        let indexer = IndexerClient::from_settings(&config.indexer);
        Self {
            config,
            search,
            arbiter,
            indexer,
            orchestrator,
            cache: FetchCache::new(),
            sessions: SessionService::default(),
            session_id: None,
            iteration: 0,
        }
    }

    /// Wire the production HTTP clients from configuration
    pub fn from_config(config: Config) -> Result<Self> {
        let llm = Arc::new(LlmClient::with_config(LlmConfig::from_settings(
            &config.llm,
            config.sources.include_trending_news,
        ))?);
        let orchestrator = PublishOrchestrator::from_config(&config)?;
        let search: Arc<dyn CandidateSearch> = llm.clone();
        let arbiter: Arc<dyn Arbiter> = llm;
        Ok(Self::new(config, search, Some(arbiter), orchestrator))
    }

    /// Replace the session store
    pub fn with_sessions(mut self, sessions: SessionService) -> Self {
        self.sessions = sessions;
        self.session_id = None;
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn iteration(&self) -> u64 {
        self.iteration
    }

    pub fn cache(&self) -> &FetchCache {
        &self.cache
    }

    pub fn sessions_mut(&mut self) -> &mut SessionService {
        &mut self.sessions
    }

    /// Current session id, if one was established
    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    /// Titles to steer the model away from; empty when the indexer is unavailable
    pub async fn recent_titles(&self) -> Vec<String> {
        if !self.indexer.is_configured() {
            tracing::debug!("Indexer endpoint not configured, no titles to avoid");
            return Vec::new();
        }
        match self.indexer.recent_titles().await {
            Ok(titles) => {
                tracing::info!(count = titles.len(), "Loaded recent poll titles");
                titles
            }
            Err(e) => {
                tracing::warn!(error = %e, "Recent titles unavailable, continuing without");
                Vec::new()
            }
        }
    }

    async fn fetch(&self, avoid_titles: &[String]) -> Result<AggregatedFetch> {
        let sources = &self.config.sources;
        let mut fetcher = BatchedSourceFetcher::new(self.search.as_ref(), sources.batch_size);
        if let Some(arbiter) = &self.arbiter {
            fetcher = fetcher.with_arbiter(arbiter.as_ref());
        }

        let groups: Vec<(SourceGroup, Vec<String>)> = SourceGroup::ALL
            .iter()
            .map(|g| (*g, sources.handles_for(*g)))
            .collect();

        let fetched = fetch_all_groups(
            &fetcher,
            &groups,
            &sources.topic_hint,
            self.config.service.poll_interval_secs,
            avoid_titles,
        )
        .await?;

        for (group, outcome) in &fetched.groups {
            metrics::record_fetch(group.as_str(), outcome.fetch_calls, outcome.candidate.is_some());
        }
        Ok(fetched)
    }

    fn ensure_session(&mut self) -> String {
        match &self.session_id {
            Some(id) => id.clone(),
            None => {
                let id = self.sessions.create();
                self.session_id = Some(id.clone());
                id
            }
        }
    }

    /// One pass through fetch and publish under the current session
    ///
    /// Returns the number of fetch calls behind the published payload.
    async fn attempt(&mut self, avoid_titles: &[String]) -> Result<(usize, PublishReport)> {
        let iteration = self.iteration;

        let fetched = match self.cache.get_for(iteration) {
            Some(cached) => {
                tracing::info!(iteration, "Reusing fetch result cached by this iteration");
                cached.clone()
            }
            None => {
                let fetched = self.fetch(avoid_titles).await?;
                self.cache.store(iteration, fetched.clone());
                fetched
            }
        };

        let session_id = self.ensure_session();
        self.sessions.touch(&session_id)?;

        let candidates = fetched.candidates();
        let explain = fetched.explain();
        let publish = self
            .orchestrator
            .publish_all(&candidates, &fetched.per_handle(), explain.as_deref())
            .await;
        Ok((fetched.fetch_calls(), publish))
    }

    /// Run one iteration, re-establishing a lost session exactly once
    pub async fn run_iteration(&mut self) -> Result<IterationReport> {
        self.iteration += 1;
        let iteration = self.iteration;
        let started = Instant::now();
        tracing::info!(iteration, "Starting iteration");

        let avoid_titles = self.recent_titles().await;

        let mut session_retried = false;
        let result = match self.attempt(&avoid_titles).await {
            Err(Error::SessionNotFound(id)) => {
                tracing::warn!(iteration, session_id = %id, "Session lost, retrying once with a fresh session");
                session_retried = true;
                self.sessions.invalidate(&id);
                self.session_id = Some(self.sessions.create());
                self.attempt(&avoid_titles).await
            }
            other => other,
        };

        let elapsed = started.elapsed().as_secs_f64();
        let (fetch_calls, publish) = match result {
            Ok(done) => done,
            Err(e) => {
                metrics::record_iteration(false, elapsed);
                tracing::error!(
                    iteration,
                    category = e.category().label(),
                    recoverable = e.is_recoverable(),
                    error = %e,
                    session_retried,
                    "Iteration failed"
                );
                return Err(e);
            }
        };

        let report = IterationReport {
            iteration,
            candidates: publish.results.len(),
            published: publish
                .results
                .iter()
                .filter(|r| r.chain_outcome.success)
                .count(),
            fetch_calls,
            session_retried,
            publish,
        };

        metrics::record_iteration(true, elapsed);
        tracing::info!(
            iteration,
            candidates = report.candidates,
            published = report.published,
            broadcast_sent = report.broadcast().sent_count,
            broadcast_total = report.broadcast().total_count,
            heartbeat = report.publish.heartbeat,
            elapsed_secs = elapsed,
            "Iteration complete"
        );
        Ok(report)
    }

    /// Run iterations on the configured interval until `run_once` or Ctrl-C
    pub async fn run_loop(&mut self) {
        let interval = self.config.poll_interval();
        let run_once = self.config.service.run_once;
        tracing::info!(
            app = %self.config.service.app_name,
            interval_secs = interval.as_secs(),
            run_once,
            "Poll service started"
        );

        loop {
            if let Err(e) = self.run_iteration().await {
                tracing::error!(error = %e.describe(), "Iteration aborted, waiting for next interval");
            }
            if run_once {
                break;
            }
            if !sleep_or_shutdown(interval).await {
                tracing::info!("Shutdown requested");
                break;
            }
        }
    }
}

/// Sleep for `interval`; false if interrupted by Ctrl-C
async fn sleep_or_shutdown(interval: Duration) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(interval) => true,
        _ = tokio::signal::ctrl_c() => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ChainOutcome, PollCandidate, SocialOutcome};
    use crate::notifications::channels::{Channel, ChannelResult, DeliveryReport};
    use crate::notifications::{ChatBroadcaster, Destination, DestinationClass};
    use crate::publish::{ChainPublisher, SocialPoster};
    use crate::sources::SearchRequest;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const REPLY: &str = r#"{
        "per_handle": [{"handle": "alice", "status": "poll_topic_found", "post_count": 2}],
        "poll": {
            "title": "Rates up?",
            "description": "The bank meets today.",
            "options": ["Yes", "No"],
            "stats_snapshot": {"likes": 10}
        }
    }"#;

    const NO_POLL_REPLY: &str = r#"{
        "per_handle": [{"handle": "alice", "status": "no_new_posts_in_window"}],
        "poll": null,
        "explain": "quiet window"
    }"#;

    struct CountingSearch {
        calls: AtomicUsize,
        reply: &'static str,
    }

    impl CountingSearch {
        fn replying(reply: &'static str) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                reply,
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl CandidateSearch for CountingSearch {
        async fn search(&self, _request: &SearchRequest) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.reply.to_string())
        }
    }

    struct OkChain;

    #[async_trait]
    impl ChainPublisher for OkChain {
        async fn publish(&self, _candidate: &PollCandidate) -> ChainOutcome {
            ChainOutcome {
                success: true,
                contract_address: Some("0xabc".to_string()),
                ..Default::default()
            }
        }
    }

    struct NoSocial;

    #[async_trait]
    impl SocialPoster for NoSocial {
        async fn post(&self, _text: &str) -> SocialOutcome {
            SocialOutcome::skipped("unconfigured")
        }
    }

    struct OkChannel;

    #[async_trait]
    impl Channel for OkChannel {
        fn name(&self) -> &str {
            "ok"
        }

        async fn send(
            &self,
            destination_id: &str,
            class: DestinationClass,
            _text: &str,
        ) -> ChannelResult<DeliveryReport> {
            Ok(DeliveryReport::success(destination_id, class))
        }
    }

    fn service(search: Arc<CountingSearch>) -> PollService {
        let mut config = Config::default();
        config.sources.handles = vec!["alice".to_string()];
        config.service.run_once = true;

        let orchestrator = PublishOrchestrator::new(
            Box::new(OkChain),
            Box::new(NoSocial),
            ChatBroadcaster::new(Box::new(OkChannel), vec![Destination::group("g")]),
            "https://vote.example",
        );
        PollService::new(config, search, None, orchestrator)
    }

    #[tokio::test]
    async fn test_iteration_publishes_and_caches() {
        let search = CountingSearch::replying(REPLY);
        let mut service = service(search.clone());

        let report = service.run_iteration().await.unwrap();
        assert_eq!(report.iteration, 1);
        assert_eq!(report.candidates, 1);
        assert_eq!(report.published, 1);
        assert_eq!(report.fetch_calls, 1);
        assert!(!report.session_retried);
        assert!(report.broadcast().success);
        assert!(service.cache().get_for(1).is_some());
        assert_eq!(search.calls(), 1);
    }

    #[tokio::test]
    async fn test_lost_session_retries_once_without_refetching() {
        let search = CountingSearch::replying(REPLY);
        let mut service = service(search.clone());
        service.run_iteration().await.unwrap();

        let old = service.session_id().unwrap().to_string();
        service.sessions_mut().invalidate(&old);

        let report = service.run_iteration().await.unwrap();
        assert!(report.session_retried);
        assert_ne!(service.session_id(), Some(old.as_str()));
        // One fetch per iteration; the retry reused the cached payload
        assert_eq!(search.calls(), 2);
    }

    #[tokio::test]
    async fn test_lost_session_after_empty_fetch_does_not_refetch() {
        let search = CountingSearch::replying(NO_POLL_REPLY);
        let mut service = service(search.clone());
        let first = service.run_iteration().await.unwrap();
        assert!(first.publish.heartbeat);
        assert!(service.cache().get_for(1).is_some());

        let old = service.session_id().unwrap().to_string();
        service.sessions_mut().invalidate(&old);

        let report = service.run_iteration().await.unwrap();
        assert!(report.session_retried);
        assert!(report.publish.heartbeat);
        assert_eq!(report.fetch_calls, 1);
        assert_eq!(search.calls(), 2);
    }

    #[tokio::test]
    async fn test_second_session_failure_is_surfaced() {
        let search = CountingSearch::replying(REPLY);
        let mut service = service(search.clone()).with_sessions(SessionService::new(Duration::ZERO));

        let err = service.run_iteration().await.unwrap_err();
        assert!(err.is_session_not_found());
        assert_eq!(search.calls(), 1);
    }

    #[tokio::test]
    async fn test_run_loop_honours_run_once() {
        let search = CountingSearch::replying(REPLY);
        let mut service = service(search.clone());
        service.run_loop().await;
        assert_eq!(service.iteration(), 1);
    }
}

//! Common test utilities

#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{json, Value};

use pollwire::error::{Error, Result};
use pollwire::models::{ChainOutcome, PollCandidate, SocialOutcome, SourceGroup, StatsSnapshot};
use pollwire::notifications::channels::{Channel, ChannelResult, DeliveryReport};
use pollwire::notifications::DestinationClass;
use pollwire::publish::{ChainPublisher, SocialPoster};
use pollwire::selector::{Arbiter, ShortlistEntry};
use pollwire::sources::{CandidateSearch, SearchRequest};

/// `n` handles named `h0..hn`
pub fn handles(n: usize) -> Vec<String> {
    (0..n).map(|i| format!("h{i}")).collect()
}

/// Fetch reply where `found` carries a poll and every other handle had nothing new
pub fn reply_with_poll(batch: &[String], found: &str, title: &str, stats: Value) -> String {
    let per_handle: Vec<Value> = batch
        .iter()
        .map(|h| {
            let status = if h == found {
                "poll_topic_found"
            } else {
                "no_new_posts_in_window"
            };
            json!({"handle": h, "status": status, "post_count": 1})
        })
        .collect();

    json!({
        "per_handle": per_handle,
        "poll": {
            "title": title,
            "description": format!("Posts by @{found} disagree."),
            "options": ["Yes", "No"],
            "sample_posts": [
                {"handle": found, "summary": "hot take", "url": format!("https://x.com/{found}/status/1")}
            ],
            "why_choose_this_poll": "timely",
            "stats_snapshot": stats
        }
    })
    .to_string()
}

/// Fetch reply with no poll; every handle gets `status`
pub fn reply_without_poll(batch: &[String], status: &str) -> String {
    let per_handle: Vec<Value> = batch
        .iter()
        .map(|h| json!({"handle": h, "status": status}))
        .collect();
    json!({"per_handle": per_handle, "poll": null, "explain": "nothing poll-worthy"}).to_string()
}

/// Search fake: replies keyed by the first handle of a batch, recording every request
pub struct ScriptedSearch {
    replies: Vec<(String, String)>,
    requests: Mutex<Vec<SearchRequest>>,
}

impl ScriptedSearch {
    pub fn new(replies: Vec<(String, String)>) -> Self {
        Self {
            replies,
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<SearchRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl CandidateSearch for ScriptedSearch {
    async fn search(&self, request: &SearchRequest) -> Result<String> {
        self.requests.lock().unwrap().push(request.clone());
        let first = request.handles.first().cloned().unwrap_or_default();
        self.replies
            .iter()
            .find(|(handle, _)| *handle == first)
            .map(|(_, reply)| reply.clone())
            .ok_or_else(|| Error::Llm(format!("no scripted reply for batch starting at {first}")))
    }
}

/// Arbiter fake returning a fixed reply
pub struct FixedArbiter(pub String);

#[async_trait]
impl Arbiter for FixedArbiter {
    async fn arbitrate(&self, _shortlist: &[ShortlistEntry]) -> Result<String> {
        Ok(self.0.clone())
    }
}

/// Chain fake returning a fixed outcome
pub struct StubChain(pub ChainOutcome);

#[async_trait]
impl ChainPublisher for StubChain {
    async fn publish(&self, _candidate: &PollCandidate) -> ChainOutcome {
        self.0.clone()
    }
}

pub fn chain_ok(address: &str) -> ChainOutcome {
    ChainOutcome {
        success: true,
        contract_address: Some(address.to_string()),
        ..Default::default()
    }
}

/// Social fake recording the posted texts
#[derive(Default)]
pub struct RecordingSocial {
    pub posts: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl SocialPoster for RecordingSocial {
    async fn post(&self, text: &str) -> SocialOutcome {
        self.posts.lock().unwrap().push(text.to_string());
        SocialOutcome::posted("42", "https://twitter.com/i/web/status/42")
    }
}

/// Chat channel fake recording every delivery
#[derive(Default, Clone)]
pub struct RecordingChannel {
    pub sent: Arc<Mutex<Vec<(String, DestinationClass, String)>>>,
}

#[async_trait]
impl Channel for RecordingChannel {
    fn name(&self) -> &str {
        "recording"
    }

    async fn send(
        &self,
        destination_id: &str,
        class: DestinationClass,
        text: &str,
    ) -> ChannelResult<DeliveryReport> {
        self.sent
            .lock()
            .unwrap()
            .push((destination_id.to_string(), class, text.to_string()));
        Ok(DeliveryReport::success(destination_id, class))
    }
}

pub fn candidate(title: &str, batch_index: usize, stats: StatsSnapshot) -> PollCandidate {
    PollCandidate {
        title: title.to_string(),
        description: "d".to_string(),
        options: vec!["Yes".to_string(), "No".to_string()],
        sample_posts: vec![],
        rationale: String::new(),
        stats_snapshot: stats,
        source_group: SourceGroup::Primary,
        batch_index,
        tag: None,
    }
}

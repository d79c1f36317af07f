//! End-to-end pipeline tests: fetch, select, publish and broadcast

mod common;

use std::sync::Arc;

use serde_json::json;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use common::*;
use pollwire::config::{ChainSettings, Config};
use pollwire::llm::parse::{parse_fetch_reply, parse_lenient};
use pollwire::models::{HandleStatus, SocialStatus, SourceGroup, StatsSnapshot};
use pollwire::notifications::{ChatBroadcaster, Destination, DestinationClass};
use pollwire::publish::{ChainClient, PublishOrchestrator, PublishStage};
use pollwire::selector::{CandidateSelector, SelectionMethod};
use pollwire::service::PollService;
use pollwire::sources::BatchedSourceFetcher;

fn engagement() -> serde_json::Value {
    json!({"likes": 100, "reposts": 10, "replies": 5, "views": 2000})
}

fn base_config(primary: Vec<String>) -> Config {
    let mut config = Config::default();
    config.sources.handles = primary;
    config.llm.api_key = "test".to_string();
    config.service.run_once = true;
    config
}

fn recording_orchestrator(channel: RecordingChannel, destinations: Vec<Destination>) -> PublishOrchestrator {
    PublishOrchestrator::new(
        Box::new(StubChain(chain_ok("0xabc"))),
        Box::new(RecordingSocial::default()),
        ChatBroadcaster::new(Box::new(channel), destinations),
        "https://vote.example/poll",
    )
}

#[tokio::test]
async fn test_single_batch_candidate_beats_lower_score() {
    let hs = handles(3);
    let search = ScriptedSearch::new(vec![(
        hs[0].clone(),
        reply_with_poll(&hs, "h1", "Rates up?", engagement()),
    )]);

    let fetcher = BatchedSourceFetcher::new(&search, 10);
    let outcome = fetcher
        .fetch_candidates(SourceGroup::Primary, &hs, "", 1800, &[])
        .await
        .unwrap();

    assert_eq!(outcome.fetch_calls, 1);
    let winner = outcome.candidate.expect("candidate expected");
    assert_eq!(winner.score(), 129.5);

    let weaker = candidate(
        "Other",
        1,
        StatsSnapshot {
            likes: 50.0,
            ..Default::default()
        },
    );
    let selection = CandidateSelector::deterministic()
        .select(&[winner, weaker])
        .await;
    assert_eq!(selection.winner, Some(0));
    assert_eq!(selection.scores, vec![129.5, 50.0]);
    assert_eq!(selection.method, SelectionMethod::Scored);
}

#[tokio::test]
async fn test_arbiter_index_takes_precedence_over_score() {
    let strong = candidate("Strong", 0, StatsSnapshot { likes: 500.0, ..Default::default() });
    let weak = candidate("Weak", 1, StatsSnapshot { likes: 1.0, ..Default::default() });

    let arbiter = FixedArbiter(r#"{"winner_index": 1}"#.to_string());
    let selection = CandidateSelector::new(&arbiter)
        .select(&[strong.clone(), weak.clone()])
        .await;
    assert_eq!(selection.winner, Some(1));
    assert_eq!(selection.method, SelectionMethod::Arbitrated);

    let confused = FixedArbiter("I like both".to_string());
    let selection = CandidateSelector::new(&confused).select(&[strong, weak]).await;
    assert_eq!(selection.winner, Some(0));
    assert_eq!(selection.method, SelectionMethod::Scored);
}

#[tokio::test]
async fn test_oversized_author_list_is_batched() {
    let hs = handles(25);
    let search = ScriptedSearch::new(vec![
        (
            "h0".to_string(),
            reply_without_poll(&hs[0..10], "no_suitable_topic (reason: off-topic)"),
        ),
        (
            "h10".to_string(),
            reply_without_poll(&hs[10..20], "no_new_posts_in_window"),
        ),
        (
            "h20".to_string(),
            reply_with_poll(&hs[20..25], "h22", "Late batch wins?", engagement()),
        ),
    ]);

    let fetcher = BatchedSourceFetcher::new(&search, 10);
    let outcome = fetcher
        .fetch_candidates(SourceGroup::Primary, &hs, "", 1800, &[])
        .await
        .unwrap();

    let sizes: Vec<usize> = search.requests().iter().map(|r| r.handles.len()).collect();
    assert_eq!(sizes, vec![10, 10, 5]);
    assert_eq!(outcome.fetch_calls, 3);

    let winner = outcome.candidate.expect("candidate expected");
    assert_eq!(winner.batch_index, 2);
    assert_eq!(winner.title, "Late batch wins?");

    for status in &outcome.per_handle {
        match status.batch_index {
            0 => assert_eq!(status.status, HandleStatus::Rejected("off-topic".to_string())),
            1 => assert_eq!(status.status, HandleStatus::NoNewPosts),
            _ => {}
        }
    }
    let h22 = outcome.per_handle.iter().find(|s| s.handle == "h22").unwrap();
    assert!(h22.status.is_found());
}

#[tokio::test]
async fn test_losing_batch_is_superseded() {
    let hs = handles(12);
    let search = ScriptedSearch::new(vec![
        (
            "h0".to_string(),
            reply_with_poll(&hs[0..10], "h3", "First", json!({"likes": 10})),
        ),
        (
            "h10".to_string(),
            reply_with_poll(&hs[10..12], "h11", "Second", json!({"likes": 1})),
        ),
    ]);
    let arbiter = FixedArbiter(r#"{"winner_index": 1}"#.to_string());

    let fetcher = BatchedSourceFetcher::new(&search, 10).with_arbiter(&arbiter);
    let outcome = fetcher
        .fetch_candidates(SourceGroup::Primary, &hs, "", 1800, &[])
        .await
        .unwrap();

    assert_eq!(outcome.candidate.unwrap().title, "Second");
    let status_of = |h: &str| {
        outcome
            .per_handle
            .iter()
            .find(|s| s.handle == h)
            .map(|s| s.status.clone())
    };
    assert_eq!(status_of("h3"), Some(HandleStatus::Superseded));
    assert_eq!(status_of("h11"), Some(HandleStatus::Found));
    assert_eq!(status_of("h0"), Some(HandleStatus::NoNewPosts));
}

#[tokio::test]
async fn test_chain_read_timeout_is_reported_in_broadcast() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(201).set_delay(std::time::Duration::from_secs(3)),
        )
        .mount(&server)
        .await;

    let chain = ChainClient::from_settings(&ChainSettings {
        endpoint: server.uri(),
        api_token: "token".to_string(),
        read_timeout_secs: 0.2,
        ..Default::default()
    })
    .unwrap();

    let channel = RecordingChannel::default();
    let social = RecordingSocial::default();
    let posts = social.posts.clone();
    let orchestrator = PublishOrchestrator::new(
        Box::new(chain),
        Box::new(social),
        ChatBroadcaster::new(
            Box::new(channel.clone()),
            vec![Destination::group("ops"), Destination::channel("@news")],
        ),
        "https://vote.example/poll",
    );

    let report = orchestrator
        .publish_all(&[candidate("Ship it?", 0, StatsSnapshot::default())], &[], None)
        .await;

    let result = &report.results[0];
    assert!(!result.chain_outcome.success);
    assert!(result.chain_outcome.maybe_success);
    assert_eq!(result.social_outcome.status, SocialStatus::Skipped);
    assert!(posts.lock().unwrap().is_empty());
    assert!(report.stages[0].contains(&PublishStage::ChainFailed));
    assert!(report.stages[0].contains(&PublishStage::Notified));

    let sent = channel.sent.lock().unwrap();
    assert_eq!(sent.len(), 1, "only the group destination gets a message");
    assert_eq!(sent[0].1, DestinationClass::Group);
    assert!(sent[0].2.contains("chain publish failed"));
    assert!(report.broadcast.success);
}

#[tokio::test]
async fn test_no_candidate_sends_heartbeat_over_telegram() {
    let telegram = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/botTEST/sendMessage"))
        .and(body_partial_json(json!({"chat_id": "100", "parse_mode": "HTML"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ok": true})))
        .expect(1)
        .mount(&telegram)
        .await;
    Mock::given(method("POST"))
        .and(path("/botTEST/sendMessage"))
        .and(body_partial_json(json!({"chat_id": "200"})))
        .respond_with(ResponseTemplate::new(403))
        .expect(1)
        .mount(&telegram)
        .await;

    let hs = handles(3);
    let mut config = base_config(hs.clone());
    config.chat.api_base = telegram.uri();
    config.chat.token = "TEST".to_string();
    config.chat.group_chat_ids = vec!["100".to_string(), "200".to_string()];

    let search = Arc::new(ScriptedSearch::new(vec![(
        hs[0].clone(),
        reply_without_poll(&hs, "no_new_posts_in_window"),
    )]));
    let orchestrator = PublishOrchestrator::new(
        Box::new(StubChain(chain_ok("0xabc"))),
        Box::new(RecordingSocial::default()),
        ChatBroadcaster::from_settings(&config.chat),
        "",
    );
    let mut service = PollService::new(config, search, None, orchestrator);

    let report = service.run_iteration().await.unwrap();
    assert!(report.publish.heartbeat);
    assert_eq!(report.candidates, 0);
    assert!(report.broadcast().success);
    assert_eq!(report.broadcast().sent_count, 1);
    assert_eq!(report.broadcast().total_count, 2);

    let requests = telegram.received_requests().await.unwrap();
    let body = String::from_utf8_lossy(&requests[0].body).to_string();
    assert!(body.contains("@h0: no_new_posts_in_window"));
    assert!(body.contains("nothing poll-worthy"));
}

#[tokio::test]
async fn test_both_groups_publish_in_one_broadcast() {
    let primary = handles(2);
    let private = vec!["wire1".to_string(), "wire2".to_string()];
    let mut config = base_config(primary.clone());
    config.sources.private_wires = private.clone();

    let search = Arc::new(ScriptedSearch::new(vec![
        (
            primary[0].clone(),
            reply_with_poll(&primary, "h0", "Public topic?", engagement()),
        ),
        (
            private[0].clone(),
            reply_with_poll(&private, "wire2", "Private topic?", json!({"likes": 3})),
        ),
    ]));

    let channel = RecordingChannel::default();
    let orchestrator = recording_orchestrator(
        channel.clone(),
        vec![Destination::group("ops"), Destination::channel("@news")],
    );
    let mut service = PollService::new(config, search.clone(), None, orchestrator);

    let report = service.run_iteration().await.unwrap();
    assert_eq!(report.candidates, 2);
    assert_eq!(report.published, 2);
    assert_eq!(report.fetch_calls, 2);
    assert_eq!(report.publish.results[1].source_group, SourceGroup::Private);
    assert_eq!(
        report.publish.results[0].vote_url,
        "https://vote.example/poll/0xabc"
    );

    let sent = channel.sent.lock().unwrap();
    assert_eq!(sent.len(), 2);
    let group_text = &sent.iter().find(|s| s.1 == DestinationClass::Group).unwrap().2;
    assert!(group_text.contains("Public topic?"));
    assert!(group_text.contains("Private topic?"));
    assert!(group_text.contains("PRIVATE_WIRES"));
    let channel_text = &sent.iter().find(|s| s.1 == DestinationClass::Channel).unwrap().2;
    assert!(channel_text.contains("Vote now: https://vote.example/poll/0xabc"));
}

#[tokio::test]
async fn test_recent_titles_steer_fetch_and_failures_are_tolerated() {
    let indexer = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": {"rounds": {"nodes": [{"roundTitle": "Old poll"}, {"roundTitle": "Old poll"}, {"roundTitle": "Older"}]}}
        })))
        .mount(&indexer)
        .await;

    let hs = handles(1);
    let mut config = base_config(hs.clone());
    config.indexer.endpoint = indexer.uri();
    config.indexer.backoff_secs = 0.0;
    config.service.poll_interval_secs = 900;

    let search = Arc::new(ScriptedSearch::new(vec![(
        hs[0].clone(),
        reply_without_poll(&hs, "no_new_posts_in_window"),
    )]));
    let mut service = PollService::new(
        config.clone(),
        search.clone(),
        None,
        recording_orchestrator(RecordingChannel::default(), vec![Destination::group("ops")]),
    );
    service.run_iteration().await.unwrap();

    let request = &search.requests()[0];
    assert_eq!(request.avoid_titles, vec!["Old poll", "Older"]);
    assert_eq!(request.window_seconds, 900);

    // Indexer down: the iteration still runs with no titles to avoid
    let broken = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500))
        .expect(2)
        .mount(&broken)
        .await;
    config.indexer.endpoint = broken.uri();
    config.indexer.max_retries = 2;

    let search = Arc::new(ScriptedSearch::new(vec![(
        hs[0].clone(),
        reply_without_poll(&hs, "no_new_posts_in_window"),
    )]));
    let mut service = PollService::new(
        config,
        search.clone(),
        None,
        recording_orchestrator(RecordingChannel::default(), vec![Destination::group("ops")]),
    );
    let report = service.run_iteration().await.unwrap();
    assert!(report.publish.heartbeat);
    assert!(search.requests()[0].avoid_titles.is_empty());
}

#[test]
fn test_messy_reply_parses_like_strict_json() {
    let strict = r#"{"per_handle": [{"handle": "alice", "status": "poll_topic_found"}], "poll": {"title": "It's close", "description": "Vote counts differ.", "options": ["Yes", "No"], "verified": true, "draft": false}}"#;
    let messy = "Sure, here you go:\n```json\n{\"per_handle\": [{\"handle\": \"alice\", \"status\": \"poll_topic_found\"}], \"poll\": {\"title\": \"It\\'s close\", \"description\": \"Vote counts differ.\", \"options\": [\"Yes\", \"No\"], \"verified\": True, \"draft\": False}}\n```";

    assert_eq!(parse_lenient(messy).unwrap(), parse_lenient(strict).unwrap());
    assert_eq!(
        parse_fetch_reply(messy, SourceGroup::Primary, 0),
        parse_fetch_reply(strict, SourceGroup::Primary, 0)
    );
}

//! Recent poll titles from the vota indexer
//!
//! The titles feed duplicate avoidance in the fetch prompt. The lookup is
//! best-effort: callers log a failure and continue with an empty list.

use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;

use crate::config::IndexerSettings;
use crate::utils::error::FetchError;
use crate::utils::retry::{with_retry_if, RetryPolicy};
use crate::utils::truncate_text;

const RECENT_ROUNDS_QUERY: &str =
    "query($n:Int!){ rounds(first:$n, orderBy: TIMESTAMP_DESC){ nodes{ roundTitle } } }";

#[derive(Debug, Default, Deserialize)]
struct GraphQlResponse {
    #[serde(default)]
    data: Option<RoundsData>,
}

#[derive(Debug, Default, Deserialize)]
struct RoundsData {
    #[serde(default)]
    rounds: Option<RoundsConnection>,
}

#[derive(Debug, Default, Deserialize)]
struct RoundsConnection {
    #[serde(default)]
    nodes: Vec<Option<RoundNode>>,
}

#[derive(Debug, Default, Deserialize)]
struct RoundNode {
    #[serde(default, rename = "roundTitle")]
    round_title: Option<String>,
}

/// Client for the recent-rounds GraphQL query
pub struct IndexerClient {
    client: Client,
    endpoint: String,
    limit: i64,
    timeout: Duration,
    policy: RetryPolicy,
}

impl IndexerClient {
    pub fn from_settings(settings: &IndexerSettings) -> Self {
        Self {
            client: Client::new(),
            endpoint: settings.endpoint.trim().to_string(),
            limit: settings.recent_rounds,
            timeout: settings.timeout(),
            policy: RetryPolicy::new(settings.max_retries, settings.backoff()),
        }
    }

    /// Override the retry policy
    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn is_configured(&self) -> bool {
        !self.endpoint.is_empty()
    }

    /// Most recent titles, newest first, deduplicated
    pub async fn recent_titles(&self) -> Result<Vec<String>, FetchError> {
        if self.endpoint.is_empty() {
            return Err(FetchError::Config("indexer endpoint is empty".to_string()));
        }
        if self.limit <= 0 {
            return Ok(Vec::new());
        }

        let response =
            with_retry_if(&self.policy, || self.query_once(), FetchError::is_recoverable).await?;

        let nodes = response
            .data
            .and_then(|d| d.rounds)
            .map(|r| r.nodes)
            .unwrap_or_default();
        let titles = dedup_titles(nodes.into_iter().flatten().filter_map(|n| n.round_title));

        tracing::info!(count = titles.len(), "Fetched recent poll titles");
        tracing::debug!(titles = ?titles, "Recent poll titles");
        Ok(titles)
    }

    async fn query_once(&self) -> Result<GraphQlResponse, FetchError> {
        let body = serde_json::json!({
            "query": RECENT_ROUNDS_QUERY,
            "variables": { "n": self.limit },
        });

        let response = self
            .client
            .post(&self.endpoint)
            .timeout(self.timeout)
            .json(&body)
            .send()
            .await
            .map_err(FetchError::from_transport)?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(FetchError::Status {
                status: status.as_u16(),
                body: truncate_text(&text, 200),
            });
        }

        let text = response.text().await.map_err(FetchError::from_transport)?;
        if text.trim().is_empty() {
            return Ok(GraphQlResponse::default());
        }
        serde_json::from_str(&text).map_err(|e| FetchError::Decode(e.to_string()))
    }
}

/// Fetch recent titles with bounded retries
///
/// An empty endpoint is a configuration error; a non-positive limit yields an
/// empty list without any request.
pub async fn fetch_recent_titles(
    endpoint: &str,
    limit: i64,
    timeout: Duration,
    max_retries: u32,
    base_backoff: Duration,
) -> Result<Vec<String>, FetchError> {
    IndexerClient {
        client: Client::new(),
        endpoint: endpoint.trim().to_string(),
        limit,
        timeout,
        policy: RetryPolicy::new(max_retries, base_backoff),
    }
    .recent_titles()
    .await
}

/// Trim, drop empties and keep the first occurrence of each title
fn dedup_titles(titles: impl IntoIterator<Item = String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for title in titles {
        let title = title.trim();
        if !title.is_empty() && !out.iter().any(|t| t == title) {
            out.push(title.to_string());
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, method};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn rounds(titles: &[&str]) -> serde_json::Value {
        let nodes: Vec<_> = titles
            .iter()
            .map(|t| serde_json::json!({ "roundTitle": t }))
            .collect();
        serde_json::json!({ "data": { "rounds": { "nodes": nodes } } })
    }

    #[test]
    fn test_dedup_titles() {
        let titles = dedup_titles(
            [" A ", "B", "", "A", "  "]
                .iter()
                .map(|s| s.to_string()),
        );
        assert_eq!(titles, vec!["A", "B"]);
    }

    #[tokio::test]
    async fn test_empty_endpoint_is_config_error() {
        let err = fetch_recent_titles("", 10, Duration::from_secs(1), 3, Duration::ZERO)
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::Config(_)));
    }

    #[tokio::test]
    async fn test_non_positive_limit_is_empty() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(rounds(&["A"])))
            .expect(0)
            .mount(&server)
            .await;

        let titles = fetch_recent_titles(&server.uri(), 0, Duration::from_secs(1), 3, Duration::ZERO)
            .await
            .unwrap();
        assert!(titles.is_empty());
    }

    #[tokio::test]
    async fn test_fetches_and_dedups_titles() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_partial_json(serde_json::json!({ "variables": { "n": 5 } })))
            .respond_with(ResponseTemplate::new(200).set_body_json(rounds(&["A", " A", "B", ""])))
            .expect(1)
            .mount(&server)
            .await;

        let titles = fetch_recent_titles(&server.uri(), 5, Duration::from_secs(2), 3, Duration::ZERO)
            .await
            .unwrap();
        assert_eq!(titles, vec!["A", "B"]);
    }

    #[tokio::test]
    async fn test_retries_then_succeeds() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(2)
            .expect(2)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(rounds(&["C"])))
            .expect(1)
            .mount(&server)
            .await;

        let titles = fetch_recent_titles(&server.uri(), 5, Duration::from_secs(2), 3, Duration::ZERO)
            .await
            .unwrap();
        assert_eq!(titles, vec!["C"]);
    }

    #[tokio::test]
    async fn test_exhausted_retries_surface_last_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500).set_body_string("down"))
            .expect(2)
            .mount(&server)
            .await;

        let err = fetch_recent_titles(&server.uri(), 5, Duration::from_secs(2), 2, Duration::ZERO)
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::Status { status: 500, .. }));
    }

    #[tokio::test]
    async fn test_client_errors_are_retried_too() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(404))
            .expect(3)
            .mount(&server)
            .await;

        let err = fetch_recent_titles(&server.uri(), 5, Duration::from_secs(2), 3, Duration::ZERO)
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::Status { status: 404, .. }));
    }

    #[tokio::test]
    async fn test_undecodable_body_is_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>oops</html>"))
            .expect(1)
            .mount(&server)
            .await;

        let err = fetch_recent_titles(&server.uri(), 5, Duration::from_secs(2), 3, Duration::ZERO)
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::Decode(_)));
    }
}

//! On-chain poll creation through the MACI HTTP API

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::config::ChainSettings;
use crate::models::{ChainOutcome, PollCandidate};
use crate::utils::error::{FetchError, PublishError};
use crate::utils::truncate_text;

/// Header carrying the content hash of the poll
pub const IDEMPOTENCY_HEADER: &str = "Idempotency-Key";

/// Header carrying the deployment-protection bypass secret
pub const BYPASS_HEADER: &str = "x-vercel-protection-bypass";

/// Content hash of a poll; identical content always gives the same key
pub fn idempotency_key(title: &str, description: &str, options: &[String]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(title.as_bytes());
    hasher.update([0x1f]);
    hasher.update(description.as_bytes());
    for option in options {
        hasher.update([0x1e]);
        hasher.update(option.as_bytes());
    }
    format!("{:x}", hasher.finalize())
}

/// Creates the voting contract for a poll
#[async_trait]
pub trait ChainPublisher: Send + Sync {
    /// Never fails; errors are carried in the outcome
    async fn publish(&self, candidate: &PollCandidate) -> ChainOutcome;
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CreatePollRequest<'a> {
    poll_title: &'a str,
    poll_description: &'a str,
    voting_options: &'a [String],
}

/// HTTP client for the poll-creation endpoint
pub struct ChainClient {
    client: Client,
    settings: ChainSettings,
}

impl ChainClient {
    pub fn from_settings(settings: &ChainSettings) -> Result<Self, PublishError> {
        let client = Client::builder()
            .connect_timeout(settings.connect_timeout())
            .timeout(settings.read_timeout())
            .build()
            .map_err(FetchError::from)?;

        Ok(Self {
            client,
            settings: settings.clone(),
        })
    }

    fn check_config(&self) -> Result<(), PublishError> {
        if self.settings.endpoint.trim().is_empty() {
            return Err(PublishError::Config(
                "World MACI API endpoint not configured".to_string(),
            ));
        }
        if self.settings.api_token.trim().is_empty() {
            return Err(PublishError::Config(
                "World MACI API token not configured".to_string(),
            ));
        }
        Ok(())
    }
}

/// Interpret a response body; the body's `success` flag wins over the status
pub fn interpret_response(status: u16, body: &str, idempotency_key: &str) -> ChainOutcome {
    let parsed: Option<Value> = serde_json::from_str(body).ok();
    let flag = parsed
        .as_ref()
        .and_then(|v| v.get("success"))
        .and_then(Value::as_bool);
    let status_ok = matches!(status, 200 | 201);

    let success = flag.unwrap_or(status_ok);
    if success {
        let contract_address = parsed
            .as_ref()
            .and_then(|v| v.pointer("/data/contractAddress"))
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string);

        return ChainOutcome {
            success: true,
            contract_address,
            error: None,
            maybe_success: false,
            idempotency_key: idempotency_key.to_string(),
        };
    }

    let error = if flag == Some(false) {
        let message = parsed
            .as_ref()
            .and_then(|v| v.pointer("/error/message"))
            .and_then(Value::as_str)
            .unwrap_or("Unknown error");
        format!("API error: {message}")
    } else {
        format!("HTTP {status}: {}", truncate_text(body, 200))
    };

    ChainOutcome {
        idempotency_key: idempotency_key.to_string(),
        ..ChainOutcome::failed(error)
    }
}

#[async_trait]
impl ChainPublisher for ChainClient {
    async fn publish(&self, candidate: &PollCandidate) -> ChainOutcome {
        let key = idempotency_key(&candidate.title, &candidate.description, &candidate.options);

        if let Err(e) = candidate.validate().and_then(|()| self.check_config()) {
            tracing::warn!(title = %candidate.title, error = %e, "Chain publish not attempted");
            return ChainOutcome {
                idempotency_key: key,
                ..ChainOutcome::failed(e.to_string())
            };
        }

        let body = CreatePollRequest {
            poll_title: &candidate.title,
            poll_description: &candidate.description,
            voting_options: &candidate.options,
        };

        let mut request = self
            .client
            .post(&self.settings.endpoint)
            .bearer_auth(&self.settings.api_token)
            .header(IDEMPOTENCY_HEADER, &key)
            .json(&body);
        if !self.settings.bypass_secret.is_empty() {
            request = request.header(BYPASS_HEADER, &self.settings.bypass_secret);
        }

        tracing::info!(
            title = %candidate.title,
            options = ?candidate.options,
            idempotency_key = %key,
            "Publishing poll on chain"
        );

        let response = match request.send().await {
            Ok(response) => response,
            Err(e) => {
                // The request was sent but no reply came back in time
                let maybe_success = e.is_timeout() && !e.is_connect();
                tracing::error!(error = %e, maybe_success, "Chain publish request failed");
                return ChainOutcome {
                    maybe_success,
                    idempotency_key: key,
                    ..ChainOutcome::failed(e.to_string())
                };
            }
        };

        let status = response.status().as_u16();
        let text = match response.text().await {
            Ok(text) => text,
            Err(e) => {
                let maybe_success = e.is_timeout();
                return ChainOutcome {
                    maybe_success,
                    idempotency_key: key,
                    ..ChainOutcome::failed(e.to_string())
                };
            }
        };

        let outcome = interpret_response(status, &text, &key);
        if outcome.success {
            tracing::info!(
                status,
                contract_address = ?outcome.contract_address,
                "Poll created on chain"
            );
        } else {
            tracing::error!(status, error = ?outcome.error, "Chain publish failed");
        }
        outcome
    }
}

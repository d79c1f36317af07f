//! LLM client for candidate discovery and arbitration
//!
//! This module talks to the xAI chat-completions API. The candidate-fetch call
//! enables live X search restricted to the batch's handles; the arbitration
//! call is a plain completion. Both return raw text, which callers parse with
//! [`parse`] since the model output is only loosely structured.

pub mod parse;
pub mod prompt;

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use governor::{
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter,
};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::num::NonZeroU32;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::config::LlmSettings;
use crate::error::{Error, Result};
use crate::selector::{Arbiter, ShortlistEntry};
use crate::sources::{CandidateSearch, SearchRequest};
use crate::utils::error::FetchError;
use crate::utils::truncate_text;

/// Configuration for LLM client
#[derive(Debug, Clone)]
pub struct LlmConfig {
    /// API base URL (default: https://api.x.ai)
    pub endpoint: String,

    /// Bearer API key
    pub api_key: String,

    /// Model name to use
    pub model: String,

    /// Request timeout in seconds
    pub timeout_secs: u64,

    /// Maximum tokens to generate
    pub max_tokens: u32,

    /// Shared request budget per minute
    pub requests_per_minute: u32,

    /// Ask the model to blend in trending topics
    pub include_trending_news: bool,

    /// Operator-provided rules appended to the fetch prompt
    pub rules_path: Option<PathBuf>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://api.x.ai".to_string(),
            api_key: String::new(),
            model: "grok-beta".to_string(),
            timeout_secs: 300,
            max_tokens: 4096,
            requests_per_minute: 30,
            include_trending_news: true,
            rules_path: None,
        }
    }
}

impl LlmConfig {
    /// Build from the loaded settings
    pub fn from_settings(settings: &LlmSettings, include_trending_news: bool) -> Self {
        Self {
            endpoint: settings.endpoint.clone(),
            api_key: settings.api_key.clone(),
            model: settings.model.clone(),
            timeout_secs: settings.timeout_secs,
            max_tokens: settings.max_tokens,
            requests_per_minute: settings.requests_per_minute,
            include_trending_news,
            rules_path: settings.rules_path.clone(),
        }
    }
}

/// Chat-completions request
#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    top_p: f32,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    search_parameters: Option<SearchParameters>,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

/// Live search restricted to X posts from the given handles
#[derive(Debug, Serialize)]
struct SearchParameters {
    mode: &'static str,
    from_date: String,
    return_citations: bool,
    sources: Vec<SearchSource>,
}

#[derive(Debug, Serialize)]
struct SearchSource {
    #[serde(rename = "type")]
    kind: &'static str,
    included_x_handles: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

/// Operator rules for the fetch prompt, read once when the client is built
fn read_rules(path: &Path) -> Option<String> {
    match std::fs::read_to_string(path) {
        Ok(rules) => {
            tracing::info!(path = %path.display(), "Loaded poll rules");
            Some(rules)
        }
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "Failed to read poll rules file");
            None
        }
    }
}

/// xAI client used for both the candidate-fetch and arbitration calls
pub struct LlmClient {
    client: Client,
    config: LlmConfig,
    rules: Option<String>,
    rate_limiter: RateLimiter<NotKeyed, InMemoryState, DefaultClock>,
}

impl LlmClient {
    /// Create a new LLM client with custom config
    pub fn with_config(config: LlmConfig) -> Result<Self> {
        if config.api_key.trim().is_empty() {
            return Err(Error::config("XAI_API_KEY is not configured"));
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(FetchError::from)?;

        let rate = NonZeroU32::new(config.requests_per_minute).unwrap_or(NonZeroU32::MIN);
        let rate_limiter = RateLimiter::direct(Quota::per_minute(rate));

        let rules = config.rules_path.as_deref().and_then(read_rules);

        Ok(Self {
            client,
            config,
            rules,
            rate_limiter,
        })
    }

    /// Model in use
    pub fn model(&self) -> &str {
        &self.config.model
    }

    /// Send one chat completion and return the message text
    async fn complete(&self, prompt: &str, search: Option<SearchParameters>) -> Result<String> {
        self.rate_limiter.until_ready().await;

        let url = format!(
            "{}/v1/chat/completions",
            self.config.endpoint.trim_end_matches('/')
        );
        let request = ChatRequest {
            model: &self.config.model,
            messages: vec![ChatMessage {
                role: "user",
                content: prompt,
            }],
            temperature: 0.0,
            top_p: 1.0,
            max_tokens: self.config.max_tokens,
            search_parameters: search,
        };

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.config.api_key)
            .json(&request)
            .send()
            .await
            .map_err(FetchError::from_transport)?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(FetchError::Status {
                status,
                body: truncate_text(&body, 200),
            }
            .into());
        }

        let chat: ChatResponse = response
            .json()
            .await
            .map_err(|e| FetchError::Decode(e.to_string()))?;

        let content = chat
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .unwrap_or_default();

        tracing::debug!(
            model = %self.config.model,
            length = content.len(),
            "Completion received"
        );

        if content.trim().is_empty() {
            return Err(Error::Llm("empty completion".to_string()));
        }
        Ok(content)
    }
}

#[async_trait]
impl CandidateSearch for LlmClient {
    async fn search(&self, request: &SearchRequest) -> Result<String> {
        let now = Utc::now();
        let prompt = prompt::fetch_prompt(
            request,
            now,
            self.config.include_trending_news,
            self.rules.as_deref(),
        );

        let since = now - ChronoDuration::seconds(request.window_seconds as i64);
        let search = SearchParameters {
            mode: "on",
            from_date: since.format("%Y-%m-%d").to_string(),
            return_citations: false,
            sources: vec![SearchSource {
                kind: "x",
                included_x_handles: request.handles.clone(),
            }],
        };

        tracing::info!(
            handles = ?request.handles,
            window_seconds = request.window_seconds,
            avoid_titles = request.avoid_titles.len(),
            "Requesting poll candidate"
        );
        self.complete(&prompt, Some(search)).await
    }
}

#[async_trait]
impl Arbiter for LlmClient {
    async fn arbitrate(&self, shortlist: &[ShortlistEntry]) -> Result<String> {
        let prompt = prompt::arbitration_prompt(shortlist)?;
        tracing::info!(candidates = shortlist.len(), "Requesting arbitration");
        self.complete(&prompt, None).await
    }
}

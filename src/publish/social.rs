//! Social announcement of a published poll (X / Twitter API v2)

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use hmac::{Hmac, Mac};
use rand::distributions::Alphanumeric;
use rand::Rng;
use reqwest::Client;
use serde_json::Value;
use sha1::Sha1;
use std::time::Duration;

use crate::config::SocialSettings;
use crate::models::SocialOutcome;
use crate::utils::error::PublishError;
use crate::utils::{char_len, truncate_text};

/// Public URL of a tweet id
pub fn tweet_url(tweet_id: &str) -> String {
    format!("https://twitter.com/i/web/status/{tweet_id}")
}

/// Compose the announcement, falling back to shorter templates to fit `max_chars`
///
/// Templates, longest first: title with options and link, title with link,
/// short title with link, then the link alone. A link that alone exceeds the
/// budget is cut.
pub fn compose_post(title: &str, options: &[String], vote_url: &str, max_chars: usize) -> String {
    let full = format!(
        "🗳️ New Poll: {title}\n\nOptions: {}\n\n🔥 Vote now: {vote_url}",
        options.join(" | ")
    );
    if char_len(&full) <= max_chars {
        return full;
    }

    let title_and_link = format!("🗳️ New Poll: {title}\n\n🔥 Vote now: {vote_url}");
    if char_len(&title_and_link) <= max_chars {
        return title_and_link;
    }

    let short_title = if char_len(title) > 200 {
        let head: String = title.chars().take(200).collect();
        format!("{head}...")
    } else {
        title.to_string()
    };
    let link_only = format!("🗳️ {short_title}\n\nVote: {vote_url}");
    if char_len(&link_only) <= max_chars {
        return link_only;
    }

    // Spend whatever room is left on the title, if a title still reads as one
    let frame = char_len("🗳️ \n\nVote: ") + char_len(vote_url);
    if max_chars.saturating_sub(frame) >= 4 {
        let title = truncate_text(title, max_chars - frame);
        return format!("🗳️ {title}\n\nVote: {vote_url}");
    }

    let vote_only = format!("Vote: {vote_url}");
    if char_len(&vote_only) <= max_chars {
        return vote_only;
    }
    truncate_text(vote_url, max_chars)
}

/// OAuth 1.0a user-context credentials
#[derive(Debug, Clone)]
pub struct OAuthCredentials {
    pub consumer_key: String,
    pub consumer_secret: String,
    pub token: String,
    pub token_secret: String,
}

impl OAuthCredentials {
    pub fn from_settings(settings: &SocialSettings) -> Self {
        Self {
            consumer_key: settings.api_key.clone(),
            consumer_secret: settings.api_secret.clone(),
            token: settings.access_token.clone(),
            token_secret: settings.access_token_secret.clone(),
        }
    }
}

fn percent_encode(s: &str) -> String {
    urlencoding::encode(s).into_owned()
}

/// Build an OAuth 1.0a `Authorization` header with an HMAC-SHA1 signature
///
/// Query parameters of `url` are signed; a JSON body is not.
pub fn oauth1_header(
    method: &str,
    url: &str,
    credentials: &OAuthCredentials,
    nonce: &str,
    timestamp: u64,
) -> Result<String, PublishError> {
    let parsed =
        url::Url::parse(url).map_err(|e| PublishError::Config(format!("invalid URL {url}: {e}")))?;
    let base_url = format!("{}{}", parsed.origin().ascii_serialization(), parsed.path());

    let timestamp = timestamp.to_string();
    let oauth_params: Vec<(&str, &str)> = vec![
        ("oauth_consumer_key", &credentials.consumer_key),
        ("oauth_nonce", nonce),
        ("oauth_signature_method", "HMAC-SHA1"),
        ("oauth_timestamp", &timestamp),
        ("oauth_token", &credentials.token),
        ("oauth_version", "1.0"),
    ];

    let mut params: Vec<(String, String)> = parsed
        .query_pairs()
        .map(|(k, v)| (percent_encode(&k), percent_encode(&v)))
        .chain(
            oauth_params
                .iter()
                .map(|(k, v)| (percent_encode(k), percent_encode(v))),
        )
        .collect();
    params.sort();

    let param_string = params
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join("&");
    let base_string = format!(
        "{}&{}&{}",
        method.to_ascii_uppercase(),
        percent_encode(&base_url),
        percent_encode(&param_string)
    );
    let signing_key = format!(
        "{}&{}",
        percent_encode(&credentials.consumer_secret),
        percent_encode(&credentials.token_secret)
    );

    let mut mac = Hmac::<Sha1>::new_from_slice(signing_key.as_bytes())
        .map_err(|e| PublishError::Config(format!("invalid signing key: {e}")))?;
    mac.update(base_string.as_bytes());
    let signature = BASE64.encode(mac.finalize().into_bytes());

    let header = oauth_params
        .iter()
        .map(|(k, v)| (*k, v.to_string()))
        .chain(std::iter::once(("oauth_signature", signature)))
        .map(|(k, v)| format!("{}=\"{}\"", percent_encode(k), percent_encode(&v)))
        .collect::<Vec<_>>()
        .join(", ");
    Ok(format!("OAuth {header}"))
}

/// Posts a short text announcement
#[async_trait]
pub trait SocialPoster: Send + Sync {
    /// Never fails; errors are carried in the outcome
    async fn post(&self, text: &str) -> SocialOutcome;

    /// Character ceiling of one post
    fn max_chars(&self) -> usize {
        280
    }
}

/// Twitter API v2 client
pub struct TwitterClient {
    client: Client,
    settings: SocialSettings,
}

impl TwitterClient {
    pub fn from_settings(settings: &SocialSettings) -> Result<Self, PublishError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs))
            .build()
            .map_err(crate::utils::error::FetchError::from)?;

        Ok(Self {
            client,
            settings: settings.clone(),
        })
    }

    fn nonce() -> String {
        rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(32)
            .map(char::from)
            .collect()
    }
}

#[async_trait]
impl SocialPoster for TwitterClient {
    async fn post(&self, text: &str) -> SocialOutcome {
        if !self.settings.is_configured() {
            tracing::info!("Twitter credentials not configured, skipping post");
            return SocialOutcome::skipped("Twitter API credentials not fully configured");
        }

        let timestamp = chrono::Utc::now().timestamp().max(0) as u64;
        let authorization = match oauth1_header(
            "POST",
            &self.settings.endpoint,
            &OAuthCredentials::from_settings(&self.settings),
            &Self::nonce(),
            timestamp,
        ) {
            Ok(header) => header,
            Err(e) => return SocialOutcome::failed(e.to_string()),
        };

        tracing::info!(chars = char_len(text), "Posting poll announcement");
        let response = match self
            .client
            .post(&self.settings.endpoint)
            .header(reqwest::header::AUTHORIZATION, authorization)
            .json(&serde_json::json!({ "text": text }))
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                tracing::error!(error = %e, "Social post request failed");
                return SocialOutcome::failed(e.to_string());
            }
        };

        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        if status != 201 {
            tracing::error!(status, body = %truncate_text(&body, 500), "Social post rejected");
            return SocialOutcome::failed(format!("HTTP {status}: {}", truncate_text(&body, 200)));
        }

        let tweet_id = serde_json::from_str::<Value>(&body)
            .ok()
            .and_then(|v| v.pointer("/data/id").and_then(Value::as_str).map(str::to_string))
            .unwrap_or_default();
        if tweet_id.is_empty() {
            return SocialOutcome::failed("HTTP 201 without a tweet id");
        }

        tracing::info!(tweet_id = %tweet_id, "Poll announcement posted");
        let url = tweet_url(&tweet_id);
        SocialOutcome::posted(tweet_id, url)
    }

    fn max_chars(&self) -> usize {
        self.settings.max_chars
    }
}

//! Configuration management for pollwire
//!
//! This module handles loading and validating configuration from environment
//! variables or a TOML file. Missing optional sections disable the matching
//! publish step; only the checks in [`Config::validate`] stop the process.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use crate::models::{SourceGroup, DEFAULT_BATCH_SIZE};
use crate::utils::{normalize_handles, split_list};

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub sources: SourcesSettings,
    pub llm: LlmSettings,
    pub indexer: IndexerSettings,
    pub chain: ChainSettings,
    pub social: SocialSettings,
    pub chat: ChatSettings,
    pub service: ServiceSettings,
    pub logging: LoggingConfig,
}

/// Author lists and fetch shaping
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SourcesSettings {
    /// Primary handles
    pub handles: Vec<String>,
    /// Private wire handles, fetched and published as a separate group
    pub private_wires: Vec<String>,
    /// Maximum authors per upstream call
    pub batch_size: usize,
    pub topic_hint: String,
    pub include_trending_news: bool,
}

impl Default for SourcesSettings {
    fn default() -> Self {
        Self {
            handles: Vec::new(),
            private_wires: Vec::new(),
            batch_size: DEFAULT_BATCH_SIZE,
            topic_hint: String::new(),
            include_trending_news: true,
        }
    }
}

impl SourcesSettings {
    /// Normalized handles configured for a group
    pub fn handles_for(&self, group: SourceGroup) -> Vec<String> {
        match group {
            SourceGroup::Primary => normalize_handles(&self.handles),
            SourceGroup::Private => normalize_handles(&self.private_wires),
        }
    }
}

/// LLM settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmSettings {
    pub endpoint: String,
    pub api_key: String,
    pub model: String,
    pub timeout_secs: u64,
    pub max_tokens: u32,
    pub requests_per_minute: u32,
    pub rules_path: Option<PathBuf>,
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            endpoint: String::from("https://api.x.ai"),
            api_key: String::new(),
            model: String::from("grok-beta"),
            timeout_secs: 300,
            max_tokens: 4096,
            requests_per_minute: 30,
            rules_path: None,
        }
    }
}

/// Recent-titles indexer settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexerSettings {
    pub endpoint: String,
    pub recent_rounds: i64,
    pub timeout_secs: f64,
    pub max_retries: u32,
    pub backoff_secs: f64,
}

impl Default for IndexerSettings {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            recent_rounds: 10,
            timeout_secs: 15.0,
            max_retries: 3,
            backoff_secs: 0.5,
        }
    }
}

impl IndexerSettings {
    pub fn timeout(&self) -> Duration {
        secs(self.timeout_secs)
    }

    pub fn backoff(&self) -> Duration {
        secs(self.backoff_secs)
    }
}

/// On-chain poll API settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChainSettings {
    pub endpoint: String,
    pub api_token: String,
    /// Base URL a contract address is appended to
    pub vote_url: String,
    pub connect_timeout_secs: f64,
    pub read_timeout_secs: f64,
    /// Sent as `x-vercel-protection-bypass` when set
    pub bypass_secret: String,
}

impl Default for ChainSettings {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            api_token: String::new(),
            vote_url: String::new(),
            connect_timeout_secs: 10.0,
            read_timeout_secs: 120.0,
            bypass_secret: String::new(),
        }
    }
}

impl ChainSettings {
    pub fn connect_timeout(&self) -> Duration {
        secs(self.connect_timeout_secs)
    }

    pub fn read_timeout(&self) -> Duration {
        secs(self.read_timeout_secs)
    }
}

/// Social post (OAuth 1.0a) settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SocialSettings {
    pub endpoint: String,
    pub api_key: String,
    pub api_secret: String,
    pub access_token: String,
    pub access_token_secret: String,
    pub max_chars: usize,
    pub timeout_secs: u64,
}

impl Default for SocialSettings {
    fn default() -> Self {
        Self {
            endpoint: String::from("https://api.twitter.com/2/tweets"),
            api_key: String::new(),
            api_secret: String::new(),
            access_token: String::new(),
            access_token_secret: String::new(),
            max_chars: 280,
            timeout_secs: 30,
        }
    }
}

impl SocialSettings {
    /// All four OAuth credentials present
    pub fn is_configured(&self) -> bool {
        [
            &self.api_key,
            &self.api_secret,
            &self.access_token,
            &self.access_token_secret,
        ]
        .iter()
        .all(|s| !s.trim().is_empty())
    }
}

/// Chat broadcast settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatSettings {
    pub api_base: String,
    pub token: String,
    /// Destinations receiving the verbose operational message
    pub group_chat_ids: Vec<String>,
    /// Destinations receiving the terse public announcement
    pub channel_chat_ids: Vec<String>,
    pub timeout_secs: u64,
}

impl Default for ChatSettings {
    fn default() -> Self {
        Self {
            api_base: String::from("https://api.telegram.org"),
            token: String::new(),
            group_chat_ids: Vec::new(),
            channel_chat_ids: Vec::new(),
            timeout_secs: 10,
        }
    }
}

/// Loop settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceSettings {
    pub app_name: String,
    pub poll_interval_secs: u64,
    pub run_once: bool,
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            app_name: String::from("pollwire"),
            poll_interval_secs: 1800,
            run_once: false,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Log format (text, json)
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: String::from("info"),
            format: String::from("text"),
        }
    }
}

/// Longest timeout or backoff a setting can ask for (one week)
const MAX_SETTING_SECS: f64 = 7.0 * 24.0 * 3600.0;

/// Seconds to a `Duration`; negative or NaN is zero, larger values are capped
fn secs(value: f64) -> Duration {
    if value.is_nan() || value <= 0.0 {
        return Duration::ZERO;
    }
    Duration::try_from_secs_f64(value.min(MAX_SETTING_SECS)).unwrap_or(Duration::ZERO)
}

fn env_string(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn env_parse<T: FromStr>(key: &str, default: T) -> T {
    env_string(key)
        .and_then(|v| v.trim().parse::<T>().ok())
        .unwrap_or(default)
}

fn env_bool(key: &str, default: bool) -> bool {
    env_string(key)
        .map(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "true" | "1" | "yes"))
        .unwrap_or(default)
}

fn env_list(key: &str) -> Vec<String> {
    env_string(key).map(|v| split_list(&v)).unwrap_or_default()
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        let group_chat_ids = {
            let ids = env_list("TELEGRAM_GROUP_CHAT_IDS");
            if ids.is_empty() {
                env_list("TELEGRAM_CHAT_IDS")
            } else {
                ids
            }
        };

        let rules_path = env_string("X_POLL_RULES_PATH")
            .or_else(|| env_string("X_POLL_PROMPT_PATH"))
            .map(PathBuf::from);

        Ok(Self {
            sources: SourcesSettings {
                handles: normalize_handles(&env_list("X_HANDLES")),
                private_wires: normalize_handles(&env_list("PRIVATE_WIRES")),
                batch_size: env_parse("BATCH_SIZE", defaults.sources.batch_size),
                topic_hint: env_string("TOPIC_HINT").unwrap_or_default(),
                include_trending_news: env_bool("INCLUDE_TRENDING_NEWS", true),
            },
            llm: LlmSettings {
                endpoint: env_string("XAI_ENDPOINT").unwrap_or(defaults.llm.endpoint),
                api_key: env_string("XAI_API_KEY").unwrap_or_default(),
                model: env_string("GROK_MODEL").unwrap_or(defaults.llm.model),
                timeout_secs: env_parse("XAI_TIMEOUT_SECONDS", defaults.llm.timeout_secs),
                max_tokens: env_parse("XAI_MAX_TOKENS", defaults.llm.max_tokens),
                requests_per_minute: env_parse(
                    "LLM_REQUESTS_PER_MINUTE",
                    defaults.llm.requests_per_minute,
                ),
                rules_path,
            },
            indexer: IndexerSettings {
                endpoint: env_string("VOTA_INDEXER_ENDPOINT").unwrap_or_default(),
                recent_rounds: env_parse("VOTA_RECENT_ROUNDS_N", defaults.indexer.recent_rounds),
                timeout_secs: env_parse(
                    "VOTA_INDEXER_TIMEOUT_SECONDS",
                    defaults.indexer.timeout_secs,
                ),
                max_retries: env_parse("VOTA_INDEXER_MAX_RETRIES", defaults.indexer.max_retries),
                backoff_secs: env_parse(
                    "VOTA_INDEXER_BACKOFF_SECONDS",
                    defaults.indexer.backoff_secs,
                ),
            },
            chain: ChainSettings {
                endpoint: env_string("WORLD_MACI_API_ENDPOINT").unwrap_or_default(),
                api_token: env_string("WORLD_MACI_API_TOKEN").unwrap_or_default(),
                vote_url: env_string("WORLD_MACI_VOTE_URL").unwrap_or_default(),
                connect_timeout_secs: env_parse(
                    "WORLD_MACI_CONNECT_TIMEOUT_SECONDS",
                    defaults.chain.connect_timeout_secs,
                ),
                read_timeout_secs: env_parse(
                    "WORLD_MACI_READ_TIMEOUT_SECONDS",
                    defaults.chain.read_timeout_secs,
                ),
                bypass_secret: env_string("VERCEL_AUTOMATION_BYPASS_SECRET").unwrap_or_default(),
            },
            social: SocialSettings {
                endpoint: env_string("TWITTER_API_ENDPOINT").unwrap_or(defaults.social.endpoint),
                api_key: env_string("TWITTER_API_KEY").unwrap_or_default(),
                api_secret: env_string("TWITTER_API_SECRET").unwrap_or_default(),
                access_token: env_string("TWITTER_ACCESS_TOKEN").unwrap_or_default(),
                access_token_secret: env_string("TWITTER_ACCESS_TOKEN_SECRET")
                    .unwrap_or_default(),
                ..defaults.social
            },
            chat: ChatSettings {
                api_base: env_string("TELEGRAM_API_BASE").unwrap_or(defaults.chat.api_base),
                token: env_string("TELEGRAM_TOKEN").unwrap_or_default(),
                group_chat_ids,
                channel_chat_ids: env_list("TELEGRAM_CHANNEL_CHAT_IDS"),
                ..defaults.chat
            },
            service: ServiceSettings {
                app_name: env_string("APP_NAME").unwrap_or(defaults.service.app_name),
                poll_interval_secs: env_parse(
                    "POLL_INTERVAL_SECONDS",
                    defaults.service.poll_interval_secs,
                ),
                run_once: env_bool("RUN_ONCE", false),
            },
            logging: LoggingConfig {
                level: env_string("POLLWIRE_LOG_LEVEL").unwrap_or(defaults.logging.level),
                format: env_string("POLLWIRE_LOG_FORMAT").unwrap_or(defaults.logging.format),
            },
        })
    }

    /// Load configuration from a file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let mut config: Self = toml::from_str(&content)
            .with_context(|| format!("Failed to parse TOML config file: {}", path.display()))?;

        config.sources.handles = normalize_handles(&config.sources.handles);
        config.sources.private_wires = normalize_handles(&config.sources.private_wires);

        Ok(config)
    }

    /// Startup checks; a failure here is fatal before the loop starts
    pub fn validate(&self) -> Result<()> {
        if self.sources.handles.is_empty() && self.sources.private_wires.is_empty() {
            anyhow::bail!("No authors configured: set X_HANDLES or PRIVATE_WIRES");
        }

        if self.sources.batch_size == 0 {
            anyhow::bail!("batch_size must be greater than 0");
        }

        if self.service.poll_interval_secs == 0 {
            anyhow::bail!("poll_interval_secs must be greater than 0");
        }

        if self.llm.api_key.trim().is_empty() {
            anyhow::bail!("Missing XAI_API_KEY");
        }

        Ok(())
    }

    /// Get the loop interval as Duration
    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.service.poll_interval_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::io::Write;

    fn valid_config() -> Config {
        let mut config = Config::default();
        config.sources.handles = vec!["alice".to_string()];
        config.llm.api_key = "key".to_string();
        config
    }

    #[test]
    fn test_valid_config() {
        assert!(valid_config().validate().is_ok());
    }

    #[test]
    fn test_no_authors_is_fatal() {
        let mut config = valid_config();
        config.sources.handles.clear();
        assert!(config.validate().is_err());

        config.sources.private_wires = vec!["wire".to_string()];
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_missing_api_key_is_fatal() {
        let mut config = valid_config();
        config.llm.api_key.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_batch_size_is_fatal() {
        let mut config = valid_config();
        config.sources.batch_size = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_durations() {
        let config = Config::default();
        assert_eq!(config.poll_interval(), Duration::from_secs(1800));
        assert_eq!(config.chain.read_timeout(), Duration::from_secs(120));
        assert_eq!(config.indexer.backoff(), Duration::from_millis(500));
    }

    #[test]
    fn test_secs_never_panics() {
        assert_eq!(secs(1.5), Duration::from_millis(1500));
        assert_eq!(secs(-3.0), Duration::ZERO);
        assert_eq!(secs(f64::NAN), Duration::ZERO);
        let week = Duration::from_secs(7 * 24 * 3600);
        assert_eq!(secs(1e30), week);
        assert_eq!(secs(f64::INFINITY), week);

        let chain = ChainSettings {
            read_timeout_secs: 1e30,
            ..Default::default()
        };
        assert_eq!(chain.read_timeout(), week);
    }

    #[test]
    fn test_social_configured() {
        let mut social = SocialSettings::default();
        assert!(!social.is_configured());
        social.api_key = "a".into();
        social.api_secret = "b".into();
        social.access_token = "c".into();
        social.access_token_secret = "d".into();
        assert!(social.is_configured());
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[sources]
handles = ["@alice", "bob", "alice"]
batch_size = 5

[llm]
api_key = "key"

[service]
poll_interval_secs = 60
"#
        )
        .unwrap();

        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.sources.handles, vec!["alice", "bob"]);
        assert_eq!(config.sources.batch_size, 5);
        assert_eq!(config.service.poll_interval_secs, 60);
        assert_eq!(config.chain.read_timeout_secs, 120.0);
        assert!(config.validate().is_ok());
    }

    #[test]
    #[serial]
    fn test_from_env_defaults() {
        for key in [
            "X_HANDLES",
            "PRIVATE_WIRES",
            "POLL_INTERVAL_SECONDS",
            "INCLUDE_TRENDING_NEWS",
            "VERCEL_AUTOMATION_BYPASS_SECRET",
            "GROK_MODEL",
        ] {
            std::env::remove_var(key);
        }

        let config = Config::from_env().unwrap();
        assert_eq!(config.llm.model, "grok-beta");
        assert_eq!(config.service.poll_interval_secs, 1800);
        assert!(config.sources.include_trending_news);
        assert!(config.sources.handles.is_empty());
        assert!(config.sources.private_wires.is_empty());
        assert_eq!(config.chain.bypass_secret, "");
    }

    #[test]
    #[serial]
    fn test_from_env_lists() {
        std::env::set_var("X_HANDLES", "alice, @bob");
        std::env::set_var("PRIVATE_WIRES", "wire_1, @wire_2");
        std::env::set_var("VERCEL_AUTOMATION_BYPASS_SECRET", "bypass-secret");
        std::env::remove_var("TELEGRAM_GROUP_CHAT_IDS");
        std::env::set_var("TELEGRAM_CHAT_IDS", "1, 2");

        let config = Config::from_env().unwrap();
        assert_eq!(config.sources.handles, vec!["alice", "bob"]);
        assert_eq!(config.sources.private_wires, vec!["wire_1", "wire_2"]);
        assert_eq!(config.chain.bypass_secret, "bypass-secret");
        assert_eq!(config.chat.group_chat_ids, vec!["1", "2"]);

        for key in [
            "X_HANDLES",
            "PRIVATE_WIRES",
            "VERCEL_AUTOMATION_BYPASS_SECRET",
            "TELEGRAM_CHAT_IDS",
        ] {
            std::env::remove_var(key);
        }
    }
}

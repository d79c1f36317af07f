//! pollwire - social posts in, binary polls out
//!
//! Harvests recent posts from configured authors, asks a model to distil a
//! poll proposal from them, and publishes the winner on-chain, on social media
//! and to chat.
//!
//! # Architecture
//!
//! The library is organized into several modules:
//!
//! - [`config`] - Configuration management and settings
//! - [`models`] - Core data structures and types
//! - [`llm`] - Model client, prompts and tolerant reply parsing
//! - [`indexer`] - Recent poll titles with retry
//! - [`sources`] - Batched candidate fetching per source group
//! - [`selector`] - Arbitration and deterministic scoring
//! - [`publish`] - Chain, social and message formatting
//! - [`notifications`] - Chat broadcast
//! - [`service`] - Iteration loop and sessions
//! - [`metrics`] - Prometheus counters and metric log lines
//! - [`utils`] - Common utilities and helpers
//!
//! # Example
//!
//! ```no_run
//! use pollwire::config::Config;
//! use pollwire::service::PollService;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::from_env()?;
//!     config.validate()?;
//!     let mut service = PollService::from_config(config)?;
//!     service.run_loop().await;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod indexer;
pub mod llm;
pub mod metrics;
pub mod models;
pub mod notifications;
pub mod publish;
pub mod selector;
pub mod service;
pub mod sources;
pub mod utils;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::Config;
    pub use crate::error::{Error, ErrorCategory, PollwireErrorTrait, Result};
    pub use crate::models::{
        FetchOutcome, HandleStatus, PerAuthorStatus, PollCandidate, PublishResult, SourceGroup,
    };
    pub use crate::notifications::{BroadcastReport, ChatBroadcaster};
    pub use crate::publish::PublishOrchestrator;
    pub use crate::service::PollService;
    pub use crate::sources::BatchedSourceFetcher;
}

// Direct re-exports for convenience
pub use models::{PerAuthorStatus, PollCandidate, PublishResult, SourceGroup};

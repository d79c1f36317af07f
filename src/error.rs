//! Unified error handling for the pollwire crate
//!
//! This module provides a unified error type that consolidates all stage-specific
//! errors into a single `Error` enum, while keeping the stage errors usable on
//! their own.
//!
//! # Architecture
//!
//! - [`PollwireErrorTrait`] - Common interface implemented by all error types
//! - [`ErrorCategory`] - Classification of errors for handling strategies
//! - [`Error`] - Unified error enum wrapping all stage-specific errors
//!
//! # Usage
//!
//! ```rust,ignore
//! use pollwire::error::{Error, PollwireErrorTrait};
//!
//! fn handle_error(err: Error) {
//!     if err.is_recoverable() {
//!         println!("Retrying: {}", err.describe());
//!     } else {
//!         eprintln!("Fatal error: {}", err);
//!     }
//! }
//! ```

use thiserror::Error;

pub use crate::notifications::channels::ChannelError;
pub use crate::utils::error::{FetchError, ParseError, PublishError};

/// Common trait for all pollwire error types
pub trait PollwireErrorTrait: std::error::Error {
    /// Check if this error is recoverable (can be retried)
    fn is_recoverable(&self) -> bool;

    /// Short description suitable for a chat status line
    fn describe(&self) -> String;

    /// Get the error category for handling strategies
    fn category(&self) -> ErrorCategory;
}

/// Classification of errors for handling strategies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Network-related errors (HTTP, timeout, non-2xx)
    Network,
    /// Malformed structured responses
    Parsing,
    /// Candidate missing required fields
    Validation,
    /// LLM call errors
    Llm,
    /// Missing credentials, endpoints or inputs
    Config,
    /// Scheduling session expired or missing
    Session,
}

impl ErrorCategory {
    /// Get a human-readable label for the category
    pub fn label(&self) -> &'static str {
        match self {
            Self::Network => "network error",
            Self::Parsing => "parse error",
            Self::Validation => "validation error",
            Self::Llm => "LLM error",
            Self::Config => "configuration error",
            Self::Session => "session error",
        }
    }
}

/// Unified error type for the pollwire crate
#[derive(Error, Debug)]
pub enum Error {
    /// Fetch-specific errors
    #[error("Fetch error: {0}")]
    Fetch(#[from] FetchError),

    /// Parse-specific errors
    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),

    /// Publish-specific errors
    #[error("Publish error: {0}")]
    Publish(#[from] PublishError),

    /// LLM call failed
    #[error("LLM error: {0}")]
    Llm(String),

    /// The scheduling session is gone and must be re-established
    #[error("Session not found: {0}")]
    SessionNotFound(String),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration errors
    #[error("Config error: {0}")]
    Config(String),

    /// Caller supplied unusable input
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl PollwireErrorTrait for Error {
    fn is_recoverable(&self) -> bool {
        match self {
            Self::Fetch(e) => e.is_recoverable(),
            Self::Parse(_) => false,
            Self::Publish(PublishError::Fetch(e)) => e.is_recoverable(),
            Self::Publish(_) => false,
            Self::Llm(_) => true,
            Self::SessionNotFound(_) => true,
            Self::Json(_) => false,
            Self::Config(_) | Self::InvalidInput(_) => false,
        }
    }

    fn describe(&self) -> String {
        format!("{}: {self}", self.category().label())
    }

    fn category(&self) -> ErrorCategory {
        match self {
            Self::Fetch(FetchError::Config(_)) => ErrorCategory::Config,
            Self::Fetch(_) => ErrorCategory::Network,
            Self::Parse(_) | Self::Json(_) => ErrorCategory::Parsing,
            Self::Publish(e) => match e {
                PublishError::Validation(_) => ErrorCategory::Validation,
                PublishError::Config(_) => ErrorCategory::Config,
                PublishError::Fetch(_) | PublishError::Remote(_) => ErrorCategory::Network,
            },
            Self::Llm(_) => ErrorCategory::Llm,
            Self::SessionNotFound(_) => ErrorCategory::Session,
            Self::Config(_) | Self::InvalidInput(_) => ErrorCategory::Config,
        }
    }
}

impl Error {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// True for the transient "session not found" condition
    pub fn is_session_not_found(&self) -> bool {
        matches!(self, Self::SessionNotFound(_))
    }
}

/// Result type alias using the unified Error type
pub type Result<T> = std::result::Result<T, Error>;

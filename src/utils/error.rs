//! Error types for the pollwire pipeline stages
//!
//! Each stage has its own error enum; stage boundaries convert these into
//! outcome structs so a single failure never stops the final broadcast.

use thiserror::Error;

/// Errors that can occur during HTTP fetching operations
#[derive(Error, Debug)]
pub enum FetchError {
    /// HTTP request error
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Non-success status from the remote side
    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },

    /// Request timeout
    #[error("Request timeout")]
    Timeout,

    /// Missing endpoint, credentials or other required setting
    #[error("Configuration error: {0}")]
    Config(String),

    /// Response body could not be decoded
    #[error("Decoding error: {0}")]
    Decode(String),
}

impl FetchError {
    /// Classify a reqwest error, separating timeouts from other transport failures
    pub fn from_transport(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout
        } else {
            Self::Http(err)
        }
    }

    /// Whether retrying the same request may succeed
    ///
    /// Transport failures and every non-2xx status are retried. A body that
    /// arrived but does not decode would decode the same way again.
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Http(_) | Self::Timeout | Self::Status { .. } => true,
            Self::Config(_) | Self::Decode(_) => false,
        }
    }
}

/// Errors that can occur while parsing model output
#[derive(Error, Debug)]
pub enum ParseError {
    /// Nothing usable in the response
    #[error("Empty response")]
    Empty,

    /// Text could not be parsed as JSON even after cleanup
    #[error("Invalid JSON: {0}")]
    InvalidJson(String),
}

/// Errors raised while validating or publishing a candidate
#[derive(Error, Debug)]
pub enum PublishError {
    /// Candidate is missing a field required before any publish attempt
    #[error("Invalid candidate: {0}")]
    Validation(String),

    /// Publish target not configured
    #[error("Configuration error: {0}")]
    Config(String),

    /// Transport-level failure
    #[error("Publish request failed: {0}")]
    Fetch(#[from] FetchError),

    /// Remote side accepted the request but reported failure
    #[error("Remote error: {0}")]
    Remote(String),
}

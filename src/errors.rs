//! Error taxonomy shared by the fetch, checkpoint and sink layers.
//!
//! Per-task and per-batch failures are swallowed at the dispatcher and
//! upserter boundaries and only surface as counts; `Config` and a
//! circuit-breaker trip are the only conditions that end a run early.

use thiserror::Error;

/// Maximum number of response-body characters kept inside an error.
pub const BODY_SNIPPET_CHARS: usize = 500;

#[derive(Error, Debug, Clone)]
pub enum EtlError {
    /// A required credential or setting is absent or invalid.
    #[error("Configuration error: {0}")]
    Config(String),

    /// HTTP 429 from a vendor or the sink.
    #[error("Rate limited (HTTP {status}): {body}")]
    RateLimited { status: u16, body: String },

    /// Any other non-success HTTP status.
    #[error("HTTP error {status}: {body}")]
    Request { status: u16, body: String },

    #[error("Network error: {0}")]
    Network(String),

    #[error("Decode error: {0}")]
    Decode(String),

    /// Checkpoint write or sink upsert failure.
    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Task was cancelled")]
    Cancelled,
}

impl EtlError {
    /// Classifies a non-success HTTP response.
    #[must_use]
    pub fn from_status(status: u16, body: &str) -> Self {
        let body = snippet(body);
        if status == 429 {
            Self::RateLimited { status, body }
        } else {
            Self::Request { status, body }
        }
    }

    #[must_use]
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, Self::RateLimited { .. })
    }

    /// HTTP status carried by the error, if any.
    #[must_use]
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::RateLimited { status, .. } | Self::Request { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for EtlError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            Self::Decode(e.to_string())
        } else {
            Self::Network(e.to_string())
        }
    }
}

impl From<serde_json::Error> for EtlError {
    fn from(e: serde_json::Error) -> Self {
        Self::Decode(e.to_string())
    }
}

/// Truncates a response body for logging and error payloads.
#[must_use]
pub fn snippet(body: &str) -> String {
    body.chars().take(BODY_SNIPPET_CHARS).collect()
}

//! Error types for deskport
//!
//! One enum covers every failure mode of export and migration. The variants
//! follow the propagation policy of the engine: configuration and
//! authentication errors abort a run, everything else is caught at the
//! smallest enclosing scope (one ticket, one sub-resource, one message).

use crate::http::retry::{RetryDecision, RetryableError};
use std::time::Duration;
use thiserror::Error;

/// Result type alias for deskport operations
pub type Result<T> = std::result::Result<T, DeskportError>;

/// Comprehensive error type for deskport operations
#[derive(Error, Debug)]
pub enum DeskportError {
    /// Missing or invalid configuration (credentials, settings file)
    #[error("Configuration error: {0}")]
    Config(String),

    /// 401/403 from a connector
    #[error("Authentication error: {0}")]
    Auth(String),

    /// 429 answered on every attempt of the retry budget
    #[error("Rate limit exceeded for {endpoint} after {attempts} attempts")]
    RateLimitExceeded { endpoint: String, attempts: u32 },

    /// Single 429 response, retried internally by the executor
    #[error("Rate limited, retry after {0} seconds")]
    RateLimited(u64),

    /// Response body could not be parsed or lacks required fields
    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    /// A sub-resource or follow-up message failed; counted, never fatal
    #[error("Partial failure: {0}")]
    PartialFailure(String),

    /// Non-2xx response other than 401/403/429
    #[error("HTTP {status} from {endpoint}: {body}")]
    Http {
        status: u16,
        endpoint: String,
        body: String,
    },

    /// Transport-level HTTP errors
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    /// A write timed out or broke after it was sent; the platform may have
    /// applied it, so it is never resent
    #[error("No response to write request {endpoint}, it may have been applied: {source}")]
    UnconfirmedWrite {
        endpoint: String,
        #[source]
        source: reqwest::Error,
    },

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML parsing errors
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// XML parsing errors
    #[error("XML error: {0}")]
    Xml(String),

    /// Unreadable line in an export file or migration map
    #[error("Parse error: {0}")]
    Parse(String),

    /// Other errors
    #[error("{0}")]
    Other(String),
}

impl DeskportError {
    /// Errors that must abort the whole connector run rather than one record
    pub fn is_fatal(&self) -> bool {
        matches!(self, DeskportError::Config(_) | DeskportError::Auth(_))
    }
}

impl From<quick_xml::Error> for DeskportError {
    fn from(e: quick_xml::Error) -> Self {
        DeskportError::Xml(e.to_string())
    }
}

impl RetryableError for DeskportError {
    fn retry_decision(&self) -> RetryDecision {
        match self {
            DeskportError::RateLimited(secs) => {
                RetryDecision::RetryAfter(Duration::from_secs(*secs))
            }
            DeskportError::Network(e) => {
                if e.is_connect() || e.is_timeout() {
                    RetryDecision::Retry
                } else {
                    RetryDecision::NoRetry
                }
            }
            _ => RetryDecision::NoRetry,
        }
    }
}

// src/core/error.rs

//! Error types for the scan pipeline.
//!
//! Only [`Error::InvalidTarget`] and [`Error::RateLimitExceeded`] can abort a
//! scan. Everything that goes wrong inside a probe is a [`ProbeError`] and is
//! recorded in that probe's `ProbeResult` instead of being propagated.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Result type alias using the pipeline [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// Fatal pipeline errors.
#[derive(Debug, Error)]
pub enum Error {
    /// The target string is not a valid domain name or IP address.
    #[error("invalid target '{input}': {reason}")]
    InvalidTarget { input: String, reason: String },

    /// The client exceeded its request quota for the current window.
    #[error("rate limit exceeded for client '{client}', retry after {retry_after:?}")]
    RateLimitExceeded { client: String, retry_after: Duration },

    #[error("configuration error: {0}")]
    Config(String),

    /// Operational data (signatures, rules, server tables) failed to load.
    #[error("failed to load {what}: {reason}")]
    Data { what: String, reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    pub fn invalid_target(input: &str, reason: impl Into<String>) -> Self {
        Error::InvalidTarget {
            input: input.to_string(),
            reason: reason.into(),
        }
    }

    pub fn data(what: impl Into<String>, reason: impl ToString) -> Self {
        Error::Data {
            what: what.into(),
            reason: reason.to_string(),
        }
    }

    /// Get an error code for logging.
    pub fn code(&self) -> &'static str {
        match self {
            Error::InvalidTarget { .. } => "INVALID_TARGET",
            Error::RateLimitExceeded { .. } => "RATE_LIMITED",
            Error::Config(_) => "CONFIG_ERROR",
            Error::Data { .. } => "DATA_ERROR",
            Error::Io(_) => "IO_ERROR",
        }
    }
}

/// A classified failure local to one probe.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "type", content = "detail", rename_all = "snake_case")]
pub enum ProbeError {
    /// Connection, resolution, or I/O failure. Retried a bounded number of times.
    #[error("network error: {0}")]
    Network(String),

    /// The response arrived but could not be (fully) understood.
    #[error("parse error: {0}")]
    Parse(String),

    /// The probe exceeded its time budget.
    #[error("timed out after {0} ms")]
    TimedOut(u64),

    /// The TLS handshake was rejected.
    #[error("TLS handshake failed: {0}")]
    Handshake(String),

    /// The probe cannot run against this kind of target.
    #[error("unsupported target: {0}")]
    Unsupported(String),

    /// The probe panicked or its task was lost.
    #[error("probe crashed: {0}")]
    Crashed(String),
}

impl ProbeError {
    /// Transient errors worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ProbeError::Network(_))
    }

    pub fn code(&self) -> &'static str {
        match self {
            ProbeError::Network(_) => "NETWORK_ERROR",
            ProbeError::Parse(_) => "PARSE_ERROR",
            ProbeError::TimedOut(_) => "TIMED_OUT",
            ProbeError::Handshake(_) => "HANDSHAKE_FAILED",
            ProbeError::Unsupported(_) => "UNSUPPORTED_TARGET",
            ProbeError::Crashed(_) => "PROBE_CRASHED",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_network_errors_are_retryable() {
        assert!(ProbeError::Network("reset".into()).is_retryable());
        assert!(!ProbeError::Parse("bad".into()).is_retryable());
        assert!(!ProbeError::TimedOut(100).is_retryable());
        assert!(!ProbeError::Handshake("expired".into()).is_retryable());
        assert!(!ProbeError::Unsupported("ip".into()).is_retryable());
    }

    #[test]
    fn probe_error_serializes_with_its_kind() {
        let json = serde_json::to_string(&ProbeError::TimedOut(250)).unwrap();
        assert_eq!(json, r#"{"type":"timed_out","detail":250}"#);
    }
}

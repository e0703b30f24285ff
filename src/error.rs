//! Error types for liquidity-dl
//!
//! This module provides the error taxonomy for the ingestion pipeline:
//! - Setup errors (configuration, output directory, authentication) that abort a run
//! - Per-item errors (fetch, transform) that are classified and recorded by the workers
//! - Shutdown errors (consumer join timeout) that make the process exit non-zero
//!
//! Worker-local failures never escape their worker loop; only setup- and
//! shutdown-phase errors reach the caller of [`crate::Pipeline::run`].

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Result type alias for liquidity-dl operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for liquidity-dl
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "pipeline.consumers")
        key: Option<String>,
    },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Output directory could not be created
    #[error("failed to create output directory {path}: {source}")]
    OutputDir {
        /// The directory that could not be created
        path: PathBuf,
        /// Underlying I/O error
        source: std::io::Error,
    },

    /// Network error
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Output file could not be parsed back
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// Token acquisition failed
    #[error("authentication error: {0}")]
    Auth(#[from] AuthError),

    /// Remote retrieval failed
    #[error("fetch error: {0}")]
    Fetch(#[from] FetchError),

    /// Payload could not be turned into rows
    #[error("transform error: {0}")]
    Transform(#[from] TransformError),

    /// A partition writer's drain loop has already stopped
    #[error("partition writer {partition} is closed")]
    WriterClosed {
        /// The month key of the closed writer
        partition: String,
    },

    /// Consumers did not terminate within the shutdown timeout
    #[error("consumers did not terminate within {waited:?}")]
    ShutdownTimeout {
        /// How long the orchestrator waited
        waited: Duration,
    },

    /// A worker task or thread panicked or was aborted
    #[error("worker join failed: {0}")]
    TaskJoin(String),

    /// Other error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Build a configuration error for a specific key
    pub fn config(key: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Config {
            message: message.into(),
            key: Some(key.into()),
        }
    }

    /// Process exit code used by the binary when this error ends a run
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::Config { .. } => 2,
            Error::Auth(_) => 3,
            Error::OutputDir { .. } | Error::Io(_) => 4,
            Error::ShutdownTimeout { .. } => 5,
            _ => 1,
        }
    }

    /// Short code written to the error log for a recorded failure
    ///
    /// HTTP failures use the numeric status, everything else a stable word.
    pub fn error_code(&self) -> String {
        match self {
            Error::Fetch(FetchError::Status { code, .. }) => code.to_string(),
            Error::Fetch(FetchError::TooManyPages { .. }) => "pagination".to_string(),
            Error::Fetch(FetchError::InvalidUrl(_)) => "url".to_string(),
            Error::Network(_) | Error::Io(_) => "network".to_string(),
            Error::Auth(_) => "auth".to_string(),
            Error::Serialization(_) | Error::Transform(_) => "payload".to_string(),
            _ => "error".to_string(),
        }
    }
}

/// Token acquisition errors
#[derive(Debug, Error)]
pub enum AuthError {
    /// The token endpoint could not be reached
    #[error("token request failed: {0}")]
    TokenRequest(String),

    /// The identity provider answered with a non-success status
    #[error("token request rejected with status {status}: {body}")]
    Rejected {
        /// HTTP status returned by the identity provider
        status: u16,
        /// Response body (truncated)
        body: String,
    },

    /// The identity provider answered with an unreadable token document
    #[error("invalid token response: {0}")]
    InvalidResponse(String),
}

/// Remote retrieval errors
#[derive(Debug, Error)]
pub enum FetchError {
    /// Unclassified non-2xx status
    #[error("GET failed with status {code}: {body}")]
    Status {
        /// HTTP status code
        code: u16,
        /// Response body (truncated)
        body: String,
    },

    /// Pagination did not terminate within the configured page limit
    #[error("pagination exceeded {limit} pages")]
    TooManyPages {
        /// The configured page limit
        limit: usize,
    },

    /// A request or next-page URL could not be built
    #[error("invalid URL: {0}")]
    InvalidUrl(String),
}

/// Row transformation errors
#[derive(Debug, Error)]
pub enum TransformError {
    /// Payload is not valid JSON
    #[error("payload is not valid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),

    /// Payload is JSON but neither an object nor an array of objects
    #[error("unexpected payload shape: {0}")]
    UnexpectedShape(String),
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_failures_log_their_numeric_code() {
        let err = Error::Fetch(FetchError::Status {
            code: 503,
            body: "busy".to_string(),
        });
        assert_eq!(err.error_code(), "503");
    }

    #[test]
    fn non_http_failures_log_stable_words() {
        assert_eq!(
            Error::Fetch(FetchError::TooManyPages { limit: 10 }).error_code(),
            "pagination"
        );
        assert_eq!(
            Error::Auth(AuthError::TokenRequest("down".into())).error_code(),
            "auth"
        );
        assert_eq!(
            Error::Io(std::io::Error::from(std::io::ErrorKind::TimedOut)).error_code(),
            "network"
        );
    }

    #[test]
    fn fatal_errors_map_to_distinct_exit_codes() {
        assert_eq!(Error::config("pipeline.consumers", "must be > 0").exit_code(), 2);
        assert_eq!(
            Error::Auth(AuthError::InvalidResponse("no token".into())).exit_code(),
            3
        );
        assert_eq!(
            Error::ShutdownTimeout {
                waited: Duration::from_secs(1)
            }
            .exit_code(),
            5
        );
        assert_eq!(Error::Other("boom".into()).exit_code(), 1);
    }

    #[test]
    fn config_helper_records_the_key() {
        match Error::config("source.base_url", "must not be empty") {
            Error::Config { key, message } => {
                assert_eq!(key.as_deref(), Some("source.base_url"));
                assert_eq!(message, "must not be empty");
            }
            other => panic!("unexpected variant: {other:?}"),
        }
    }

    #[test]
    fn transform_error_wraps_json_error() {
        let json_err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let err: Error = TransformError::from(json_err).into();
        assert!(err.to_string().starts_with("transform error: payload is not valid JSON"));
    }
}

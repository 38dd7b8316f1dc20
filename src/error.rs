//! Error types for gmail-dl
//!
//! This module provides the error handling for the library, including:
//! - The crate-wide [`Error`] type and [`Result`] alias
//! - Credential errors raised before any retrieval begins ([`AuthError`])
//! - Process exit status mapping for the command line front end ([`ToExitCode`])

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for gmail-dl operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for gmail-dl
///
/// Each variant carries enough context to diagnose the failure from the log line alone.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "api.page_size")
        key: Option<String>,
    },

    /// Credential could not be loaded or renewed
    #[error("authentication error: {0}")]
    Auth(#[from] AuthError),

    /// The remote API answered a listing or batch call with a non-success status
    #[error("API error (HTTP {status}): {message}")]
    Api {
        /// HTTP status code returned by the remote API
        status: u16,
        /// Error message extracted from the response body
        message: String,
    },

    /// Network error
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// The batch response could not be decoded
    #[error("malformed batch response: {0}")]
    BatchProtocol(String),

    /// The listing cursor chain was violated
    #[error("pagination error: {0}")]
    Pagination(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The run was interrupted before the page sequence was exhausted
    #[error("retrieval cancelled")]
    Cancelled,

    /// Other error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Shorthand for a configuration error bound to a specific key
    pub fn config(key: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Config {
            message: message.into(),
            key: Some(key.into()),
        }
    }
}

/// Credential-related errors
#[derive(Debug, Error)]
pub enum AuthError {
    /// No token file exists at the configured location
    #[error(
        "no authorized token at {path}; complete the OAuth consent flow and save the token there"
    )]
    MissingToken {
        /// Location that was searched
        path: PathBuf,
    },

    /// The token file exists but could not be parsed
    #[error("invalid token file {path}: {reason}")]
    InvalidToken {
        /// Location of the token file
        path: PathBuf,
        /// Parser error detail
        reason: String,
    },

    /// The token is expired and there is no refresh token to renew it
    #[error("access token expired and no refresh token is available")]
    NoRefreshToken,

    /// The token is expired and the client id/secret needed to renew it are absent
    #[error("access token expired and no client credentials are available to refresh it")]
    MissingClientCredentials,

    /// The token endpoint rejected the refresh request
    #[error("token refresh rejected (HTTP {status}): {body}")]
    RefreshRejected {
        /// HTTP status returned by the token endpoint
        status: u16,
        /// Raw response body
        body: String,
    },

    /// The token endpoint could not be reached
    #[error("token refresh failed: {0}")]
    RefreshFailed(String),

    /// The remote API kept rejecting a freshly renewed token
    #[error("credential rejected by the API after renewal")]
    Rejected,
}

/// Map errors to process exit statuses
///
/// Each class of failure gets its own status so wrapper scripts can tell a bad
/// config from an expired credential from a remote outage.
pub trait ToExitCode {
    /// Get the process exit status for this error
    fn exit_code(&self) -> i32;

    /// Get the machine-readable error code
    fn error_code(&self) -> &str;
}

impl ToExitCode for Error {
    fn exit_code(&self) -> i32 {
        match self {
            Error::Config { .. } => 2,
            Error::Auth(_) => 3,

            // Remote side
            Error::Api { .. } => 4,
            Error::Network(_) => 4,
            Error::BatchProtocol(_) => 4,
            Error::Pagination(_) => 4,

            // Local side
            Error::Io(_) => 5,
            Error::Serialization(_) => 5,

            // 128 + SIGINT, matching what a shell reports for Ctrl+C
            Error::Cancelled => 130,

            Error::Other(_) => 1,
        }
    }

    fn error_code(&self) -> &str {
        match self {
            Error::Config { .. } => "config_error",
            Error::Auth(e) => match e {
                AuthError::MissingToken { .. } => "missing_token",
                AuthError::InvalidToken { .. } => "invalid_token",
                AuthError::NoRefreshToken => "no_refresh_token",
                AuthError::MissingClientCredentials => "missing_client_credentials",
                AuthError::RefreshRejected { .. } => "refresh_rejected",
                AuthError::RefreshFailed(_) => "refresh_failed",
                AuthError::Rejected => "credential_rejected",
            },
            Error::Api { .. } => "api_error",
            Error::Network(_) => "network_error",
            Error::BatchProtocol(_) => "batch_protocol_error",
            Error::Pagination(_) => "pagination_error",
            Error::Io(_) => "io_error",
            Error::Serialization(_) => "serialization_error",
            Error::Cancelled => "cancelled",
            Error::Other(_) => "internal_error",
        }
    }
}

//! Unified error type for the pipeline
//!
//! Every fallible operation returns [`DigestError`]. Variants are grouped by
//! origin so callers can decide whether to retry:
//! - `Busy` is a store-level conflict the caller may retry at a higher layer
//! - `Transient` / `Permanent` mirror the summarization call classification
//! - `Malformed` marks a single bad archive entry (skipped, never fatal)

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Error, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "message")]
pub enum DigestError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Database busy: {0}")]
    Busy(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Malformed entry: {0}")]
    Malformed(String),

    #[error("IO error: {0}")]
    Io(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Transient summarization failure: {0}")]
    Transient(String),

    #[error("Summarization rejected: {0}")]
    Permanent(String),

    #[error("Invalid summarization response: {0}")]
    InvalidResponse(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Summarization gateway is shut down")]
    ShutDown,

    #[error("Operation cancelled")]
    Cancelled,
}

impl DigestError {
    /// Whether a later attempt of the same operation may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            DigestError::Busy(_) | DigestError::Network(_) | DigestError::Transient(_)
        )
    }
}

impl From<rusqlite::Error> for DigestError {
    fn from(e: rusqlite::Error) -> Self {
        match e {
            rusqlite::Error::SqliteFailure(ref err, _)
                if matches!(
                    err.code,
                    rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
                ) =>
            {
                DigestError::Busy(e.to_string())
            }
            _ => DigestError::Database(e.to_string()),
        }
    }
}

impl From<r2d2::Error> for DigestError {
    fn from(e: r2d2::Error) -> Self {
        DigestError::Database(e.to_string())
    }
}

impl From<std::io::Error> for DigestError {
    fn from(err: std::io::Error) -> Self {
        DigestError::Io(err.to_string())
    }
}

impl From<toml::de::Error> for DigestError {
    fn from(err: toml::de::Error) -> Self {
        DigestError::Config(err.to_string())
    }
}

impl From<serde_json::Error> for DigestError {
    fn from(err: serde_json::Error) -> Self {
        DigestError::Parse(err.to_string())
    }
}

impl From<mailparse::MailParseError> for DigestError {
    fn from(err: mailparse::MailParseError) -> Self {
        DigestError::Malformed(err.to_string())
    }
}

impl From<quick_xml::Error> for DigestError {
    fn from(err: quick_xml::Error) -> Self {
        DigestError::Parse(err.to_string())
    }
}

/// Result type alias using DigestError
pub type Result<T> = std::result::Result<T, DigestError>;

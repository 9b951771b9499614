//! Error types for the master data cache.
//!
//! Errors fall into three groups:
//! - answers (`NotFound`): the record is confirmed absent upstream
//! - upstream failures (`UpstreamUnavailable`, `TransientSyncFailure`, `Upstream`)
//! - cache faults (`CorruptRecord`, `Io`, `Json`): local storage problems that
//!   the facade repairs by resyncing instead of surfacing them

use crate::kind::EntityKind;
use std::path::PathBuf;
use thiserror::Error;

/// Main error type for the master data engine.
#[derive(Debug, Error)]
pub enum MasterDataError {
    // Lookup answers
    #[error("No {kind} record with id {id}")]
    NotFound { kind: EntityKind, id: u64 },

    // Upstream errors
    #[error("Upstream unavailable while syncing {kind}: {message}")]
    UpstreamUnavailable { kind: EntityKind, message: String },

    #[error("Sync of {kind} failed after {attempts} attempts: {message}")]
    TransientSyncFailure {
        kind: EntityKind,
        attempts: u32,
        message: String,
    },

    #[error("Upstream error: {message}")]
    Upstream { message: String },

    // Record errors
    #[error("Invalid record: {message}")]
    InvalidRecord { message: String },

    #[error("Corrupt cache file {path:?}: {message}")]
    CorruptRecord { path: PathBuf, message: String },

    // File system errors
    #[error("IO error at {path:?}: {message}")]
    Io {
        message: String,
        path: Option<PathBuf>,
        #[source]
        source: Option<std::io::Error>,
    },

    #[error("Cache directory is not writable: {path:?}: {message}")]
    StoreUnwritable { path: PathBuf, message: String },

    // Serialization errors
    #[error("JSON error: {message}")]
    Json {
        message: String,
        #[source]
        source: Option<serde_json::Error>,
    },

    // Configuration errors
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Unknown entity kind: {0}")]
    UnknownKind(String),

    #[error("Operation was cancelled")]
    Cancelled,

    // Generic errors
    #[error("{0}")]
    Other(String),
}

/// Result type alias for master data operations.
pub type Result<T> = std::result::Result<T, MasterDataError>;

impl From<std::io::Error> for MasterDataError {
    fn from(err: std::io::Error) -> Self {
        MasterDataError::Io {
            message: err.to_string(),
            path: None,
            source: Some(err),
        }
    }
}

impl From<serde_json::Error> for MasterDataError {
    fn from(err: serde_json::Error) -> Self {
        MasterDataError::Json {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl MasterDataError {
    /// Create an IO error with path context.
    pub fn io_with_path(err: std::io::Error, path: impl Into<PathBuf>) -> Self {
        MasterDataError::Io {
            message: err.to_string(),
            path: Some(path.into()),
            source: Some(err),
        }
    }

    /// Create an upstream error from any displayable cause.
    pub fn upstream(message: impl std::fmt::Display) -> Self {
        MasterDataError::Upstream {
            message: message.to_string(),
        }
    }

    /// Check if this error is worth retrying against the upstream.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            MasterDataError::Upstream { .. }
                | MasterDataError::UpstreamUnavailable { .. }
                | MasterDataError::TransientSyncFailure { .. }
                | MasterDataError::Io { .. }
        )
    }

    /// Check if this error comes from the local cache rather than the data.
    ///
    /// Cache faults are treated like a cache miss: the kind is resynced.
    pub fn is_cache_fault(&self) -> bool {
        matches!(
            self,
            MasterDataError::CorruptRecord { .. }
                | MasterDataError::Io { .. }
                | MasterDataError::Json { .. }
        )
    }

    /// Check if this error is a confirmed absence.
    pub fn is_not_found(&self) -> bool {
        matches!(self, MasterDataError::NotFound { .. })
    }
}

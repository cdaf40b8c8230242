//! Error types for the shared store and configuration layers.
//!
//! Nothing in the sync subsystem is fatal to a tab: store failures are
//! logged and the tab keeps its last known state. Identity-provider errors
//! are plain `anyhow::Error`s and pass through untouched.

use thiserror::Error;

/// Failure writing to the underlying storage primitive.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The backend refused the write (quota exceeded, private mode, ...).
    #[error("storage write rejected for key '{key}': {reason}")]
    Rejected { key: String, reason: String },

    /// The value could not be serialized to JSON.
    #[error("failed to serialize value for key '{key}'")]
    Serialize {
        key: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Invalid configuration values.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{field} must be greater than zero")]
    Zero { field: &'static str },

    #[error("storage key '{field}' must not be empty")]
    EmptyKey { field: &'static str },

    #[error("storage keys must be distinct ('{0}' used twice)")]
    DuplicateKey(String),
}

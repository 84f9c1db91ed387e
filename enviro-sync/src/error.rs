//! Error types for the sync primitives and their configuration layer.
//!
//! Lock and buffer operations report contention, timeouts and end-of-stream
//! through plain booleans.  [`SyncError`] only covers the places where a
//! caller hands us something unusable: a zero capacity or a broken config.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Errors produced while building primitives or loading their configuration.
#[derive(Debug, Error)]
pub enum SyncError {
    /// A ring buffer needs at least one slot.
    #[error("ring buffer capacity must be greater than zero")]
    InvalidCapacity,

    /// The config file could not be read.
    #[error("failed to read config file {path:?}")]
    ConfigRead {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The config file is not valid JSON for [`SyncConfig`](crate::config::SyncConfig).
    #[error("failed to parse config")]
    ConfigParse(#[from] serde_json::Error),

    /// The config parsed but holds values the primitives cannot honour.
    #[error("invalid config: {0}")]
    InvalidConfig(String),
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, SyncError>;

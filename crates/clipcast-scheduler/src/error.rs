//! Error types for the scheduler.

use thiserror::Error;

/// Errors from the durable state layer.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("state IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed state file: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Errors surfaced by scheduler operations.
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("unknown platform: {0}")]
    UnknownPlatform(String),

    #[error("invalid upload request: {0}")]
    InvalidRequest(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

//! The publisher capability: the seam between the scheduler and the
//! platform-specific upload mechanics.

use async_trait::async_trait;
use thiserror::Error;

use crate::types::{ClipRef, Platform, PublishMetadata};

/// Errors from a publish attempt.
#[derive(Debug, Error)]
pub enum PublishError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("no upload command configured for platform {0}")]
    NotConfigured(Platform),

    #[error("upload command not found: {0}")]
    CommandNotFound(String),

    #[error("upload rejected: {0}")]
    Rejected(String),
}

/// Performs the platform-specific upload of one clip.
///
/// Implementations are expected to be slow (seconds to tens of seconds) and
/// may block on external services. The scheduler runs them on worker tasks
/// under its own execution timeout and treats every error here as a failed
/// attempt, never as a reason to stop scheduling.
#[async_trait]
pub trait Publisher: Send + Sync {
    async fn publish(
        &self,
        platform: &Platform,
        clip: &ClipRef,
        metadata: &PublishMetadata,
    ) -> Result<(), PublishError>;
}

//! Core job model for the upload scheduler.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use clipcast_publish::{ClipRef, Platform, PublishMetadata};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Stable identifier for a scheduled upload.
///
/// Minted once at submission and carried unchanged through retries; a retry
/// reschedules the same job rather than creating a new one.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct JobId(Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for JobId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Where a job sits in its lifecycle.
///
/// `Pending` and `Dispatched` live in the queue snapshot; `Succeeded` and
/// `Failed` only ever appear in history records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Dispatched,
    Succeeded,
    Failed,
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JobStatus::Pending => "pending",
            JobStatus::Dispatched => "dispatched",
            JobStatus::Succeeded => "succeeded",
            JobStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// A request to publish one clip to one platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadRequest {
    pub platform: Platform,
    pub clip: ClipRef,
    #[serde(default)]
    pub metadata: PublishMetadata,
    /// Higher runs first among jobs due at the same time.
    #[serde(default)]
    pub priority: i32,
}

impl UploadRequest {
    pub fn new(platform: Platform, clip: ClipRef) -> Self {
        Self {
            platform,
            clip,
            metadata: PublishMetadata::default(),
            priority: 0,
        }
    }
}

/// One scheduled upload: a clip, a platform, and the time it may run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub platform: Platform,
    pub clip: ClipRef,
    #[serde(default)]
    pub metadata: PublishMetadata,
    /// Earliest time this job may be dispatched.
    pub due_at: DateTime<Utc>,
    #[serde(default)]
    pub priority: i32,
    /// Execution attempts started so far.
    pub attempt: u32,
    pub max_attempts: u32,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_attempt_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl Job {
    pub fn new(
        request: UploadRequest,
        due_at: DateTime<Utc>,
        max_attempts: u32,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: JobId::new(),
            platform: request.platform,
            clip: request.clip,
            metadata: request.metadata,
            due_at,
            priority: request.priority,
            attempt: 0,
            max_attempts,
            status: JobStatus::Pending,
            created_at: now,
            last_attempt_at: None,
            last_error: None,
        }
    }
}

/// Terminal outcome of a job, appended to the history log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryRecord {
    pub job_id: JobId,
    pub platform: Platform,
    pub clip: ClipRef,
    #[serde(default)]
    pub metadata: PublishMetadata,
    /// Always `Succeeded` or `Failed`.
    pub status: JobStatus,
    /// Execution attempts the job consumed in total.
    pub attempts: u32,
    pub completed_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl HistoryRecord {
    pub fn succeeded(job: &Job, completed_at: DateTime<Utc>) -> Self {
        Self {
            job_id: job.id,
            platform: job.platform.clone(),
            clip: job.clip.clone(),
            metadata: job.metadata.clone(),
            status: JobStatus::Succeeded,
            attempts: job.attempt,
            completed_at,
            error: None,
        }
    }

    pub fn failed(job: &Job, error: impl Into<String>, completed_at: DateTime<Utc>) -> Self {
        Self {
            job_id: job.id,
            platform: job.platform.clone(),
            clip: job.clip.clone(),
            metadata: job.metadata.clone(),
            status: JobStatus::Failed,
            attempts: job.attempt,
            completed_at,
            error: Some(error.into()),
        }
    }
}

/// Dispatch preference among jobs: earliest due first, then higher priority,
/// then id so ties break the same way every time.
pub fn dispatch_order(a: &Job, b: &Job) -> Ordering {
    a.due_at
        .cmp(&b.due_at)
        .then_with(|| b.priority.cmp(&a.priority))
        .then_with(|| a.id.cmp(&b.id))
}

/// `at + delay`, saturating at the far future instead of overflowing.
pub(crate) fn advance(at: DateTime<Utc>, delay: Duration) -> DateTime<Utc> {
    let delta = TimeDelta::from_std(delay).unwrap_or(TimeDelta::MAX);
    at.checked_add_signed(delta)
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

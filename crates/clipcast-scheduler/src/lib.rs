//! Durable delayed-upload scheduler for clipcast.
//!
//! This crate provides a persistent scheduler that:
//! - Stores the pending set as an atomically-replaced JSON snapshot
//! - Records terminal outcomes in an append-only history log
//! - Survives crashes and restarts without losing or duplicating jobs
//! - Paces uploads per platform and staggers batch submissions
//! - Retries failures on a fixed or exponential delay, up to a ceiling

mod config;
mod error;
mod pacing;
mod retry;
mod scheduler;
mod store;
mod types;

pub use config::{PlatformLimits, SchedulerConfig};
pub use error::{SchedulerError, StorageError};
pub use pacing::Pacer;
pub use retry::{Backoff, Outcome, RetryPolicy};
pub use scheduler::Scheduler;
pub use store::{HistoryFilter, JobStore};
pub use types::{HistoryRecord, Job, JobId, JobStatus, UploadRequest};

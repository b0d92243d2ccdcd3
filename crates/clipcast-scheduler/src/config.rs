//! Scheduler configuration.

use std::collections::BTreeMap;
use std::time::Duration;

use clipcast_publish::Platform;

use crate::error::SchedulerError;
use crate::retry::Backoff;

const DEFAULT_MIN_UPLOAD_DELAY: Duration = Duration::from_secs(60 * 60);
const DEFAULT_STAGGER_DELAY: Duration = Duration::from_secs(5 * 60);
const DEFAULT_STARTUP_GRACE: Duration = Duration::from_secs(10);
const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(15 * 60);
const DEFAULT_MAX_ATTEMPTS: u32 = 3;
const DEFAULT_WORKERS: usize = 2;
const DEFAULT_PUBLISH_TIMEOUT: Duration = Duration::from_secs(300);
const DEFAULT_DRAIN_GRACE: Duration = Duration::from_secs(30);

/// Per-platform overrides of the global pacing limits.
#[derive(Debug, Clone, Default)]
pub struct PlatformLimits {
    /// Minimum spacing between successful uploads on this platform, when it
    /// differs from the global `min_upload_delay`.
    pub min_delay: Option<Duration>,
}

/// Tunables for a [`Scheduler`](crate::Scheduler).
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Platforms accepted by `submit`. Submissions naming anything else are
    /// rejected before touching storage.
    pub platforms: BTreeMap<Platform, PlatformLimits>,
    /// Minimum spacing between successful uploads on one platform.
    pub min_upload_delay: Duration,
    /// Whether batch submissions get spread-out due times.
    pub stagger_uploads: bool,
    /// Spacing of the stagger ladder across a batch.
    pub stagger_delay: Duration,
    /// Floor on fresh due times, so a cold start cannot fire everything the
    /// instant it lands.
    pub startup_grace: Duration,
    /// Execution attempts allowed per job.
    pub max_attempts: u32,
    /// Base delay before a failed job becomes due again.
    pub retry_delay: Duration,
    /// Shape of the retry delay curve.
    pub retry_backoff: Backoff,
    /// Upload workers running publisher calls in parallel.
    pub workers: usize,
    /// Hard timeout on a single publisher call.
    pub publish_timeout: Duration,
    /// How long `stop()` waits for in-flight uploads before giving up.
    pub drain_grace: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            platforms: BTreeMap::new(),
            min_upload_delay: DEFAULT_MIN_UPLOAD_DELAY,
            stagger_uploads: true,
            stagger_delay: DEFAULT_STAGGER_DELAY,
            startup_grace: DEFAULT_STARTUP_GRACE,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            retry_delay: DEFAULT_RETRY_DELAY,
            retry_backoff: Backoff::Fixed,
            workers: DEFAULT_WORKERS,
            publish_timeout: DEFAULT_PUBLISH_TIMEOUT,
            drain_grace: DEFAULT_DRAIN_GRACE,
        }
    }
}

impl SchedulerConfig {
    /// Register a platform with default limits.
    pub fn with_platform(mut self, name: impl Into<String>) -> Self {
        self.platforms
            .insert(Platform::new(name), PlatformLimits::default());
        self
    }

    /// Effective minimum upload spacing for one platform.
    pub fn min_delay_for(&self, platform: &Platform) -> Duration {
        self.platforms
            .get(platform)
            .and_then(|limits| limits.min_delay)
            .unwrap_or(self.min_upload_delay)
    }

    pub fn validate(&self) -> Result<(), SchedulerError> {
        if self.workers == 0 {
            return Err(SchedulerError::InvalidConfig(
                "workers must be at least 1".to_string(),
            ));
        }
        if self.max_attempts == 0 {
            return Err(SchedulerError::InvalidConfig(
                "max_attempts must be at least 1".to_string(),
            ));
        }
        if self.publish_timeout.is_zero() {
            return Err(SchedulerError::InvalidConfig(
                "publish_timeout must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

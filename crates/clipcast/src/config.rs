//! Settings file for the daemon and CLI.
//!
//! Settings live in one JSON file (default `clipcast.json`). Every field has
//! a default; a missing file means the stock platform set with no upload
//! commands configured yet.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use miette::Result;
use serde::Deserialize;
use tracing::info;

use clipcast_publish::Platform;
use clipcast_scheduler::{Backoff, PlatformLimits, SchedulerConfig};

/// State directory used when neither the CLI nor the config names one.
const DEFAULT_STATE_DIR: &str = "clipcast-state";

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    /// Directory holding the queue snapshot and history log.
    pub state_dir: Option<PathBuf>,
    /// Directory watched for submission request files. Defaults to
    /// `<state_dir>/intake`.
    pub intake_dir: Option<PathBuf>,
    pub scheduling: Scheduling,
    /// Platforms uploads may target, keyed by name.
    pub platforms: BTreeMap<String, PlatformSettings>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            state_dir: None,
            intake_dir: None,
            scheduling: Scheduling::default(),
            platforms: ["instagram", "youtube", "tiktok"]
                .into_iter()
                .map(|name| (name.to_string(), PlatformSettings::default()))
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Scheduling {
    /// Minimum minutes between successful uploads on one platform.
    pub min_upload_delay_mins: u64,
    /// Whether batch submissions get spread-out due times.
    pub stagger_uploads: bool,
    /// Minutes between batch rungs.
    pub stagger_delay_mins: u64,
    /// Seconds before a fresh submission may dispatch.
    pub startup_grace_secs: u64,
    pub max_retry_attempts: u32,
    pub retry_delay_mins: u64,
    pub retry_backoff: RetryBackoff,
    /// Cap on the exponential retry delay, in minutes.
    pub retry_delay_cap_mins: u64,
    /// Uploads running in parallel.
    pub workers: usize,
    /// Seconds before a stuck upload counts as failed.
    pub publish_timeout_secs: u64,
    /// Seconds shutdown waits for in-flight uploads.
    pub drain_grace_secs: u64,
}

impl Default for Scheduling {
    fn default() -> Self {
        Self {
            min_upload_delay_mins: 60,
            stagger_uploads: true,
            stagger_delay_mins: 5,
            startup_grace_secs: 10,
            max_retry_attempts: 3,
            retry_delay_mins: 15,
            retry_backoff: RetryBackoff::Fixed,
            retry_delay_cap_mins: 60,
            workers: 2,
            publish_timeout_secs: 300,
            drain_grace_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryBackoff {
    #[default]
    Fixed,
    Exponential,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PlatformSettings {
    /// Upload command argv. `{clip}`, `{platform}`, `{title}`, `{caption}`
    /// and `{tags}` expand per job; the full job payload also arrives as
    /// JSON on stdin.
    pub command: Vec<String>,
    /// Override of the global minimum upload delay, in minutes.
    pub min_upload_delay_mins: Option<u64>,
}

impl Settings {
    /// Load settings from `path`. A missing file is not an error.
    pub async fn load(path: &Path) -> Result<Self> {
        let contents = match tokio::fs::read_to_string(path).await {
            Ok(contents) => contents,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
                info!(path = %path.display(), "no config file, using defaults");
                return Ok(Self::default());
            }
            Err(error) => {
                return Err(miette::miette!(
                    "failed to read config {}: {}",
                    path.display(),
                    error
                ));
            }
        };
        serde_json::from_str(&contents)
            .map_err(|error| miette::miette!("invalid config {}: {}", path.display(), error))
    }

    pub fn resolve_state_dir(&self, cli_override: Option<&Path>) -> PathBuf {
        cli_override
            .map(Path::to_path_buf)
            .or_else(|| self.state_dir.clone())
            .unwrap_or_else(|| PathBuf::from(DEFAULT_STATE_DIR))
    }

    pub fn resolve_intake_dir(&self, state_dir: &Path) -> PathBuf {
        self.intake_dir
            .clone()
            .unwrap_or_else(|| state_dir.join("intake"))
    }

    /// Scheduler tunables derived from these settings.
    pub fn scheduler_config(&self) -> SchedulerConfig {
        let scheduling = &self.scheduling;
        let retry_backoff = match scheduling.retry_backoff {
            RetryBackoff::Fixed => Backoff::Fixed,
            RetryBackoff::Exponential => Backoff::Exponential {
                cap: Duration::from_secs(scheduling.retry_delay_cap_mins * 60),
            },
        };

        let platforms = self
            .platforms
            .iter()
            .map(|(name, platform)| {
                (
                    Platform::new(name.clone()),
                    PlatformLimits {
                        min_delay: platform
                            .min_upload_delay_mins
                            .map(|mins| Duration::from_secs(mins * 60)),
                    },
                )
            })
            .collect();

        SchedulerConfig {
            platforms,
            min_upload_delay: Duration::from_secs(scheduling.min_upload_delay_mins * 60),
            stagger_uploads: scheduling.stagger_uploads,
            stagger_delay: Duration::from_secs(scheduling.stagger_delay_mins * 60),
            startup_grace: Duration::from_secs(scheduling.startup_grace_secs),
            max_attempts: scheduling.max_retry_attempts,
            retry_delay: Duration::from_secs(scheduling.retry_delay_mins * 60),
            retry_backoff,
            workers: scheduling.workers,
            publish_timeout: Duration::from_secs(scheduling.publish_timeout_secs),
            drain_grace: Duration::from_secs(scheduling.drain_grace_secs),
        }
    }

    /// Upload commands keyed by platform, for the command publisher.
    /// Platforms without a command are left out; their uploads fail with a
    /// not-configured error instead of silently succeeding.
    pub fn upload_commands(&self) -> BTreeMap<Platform, Vec<String>> {
        self.platforms
            .iter()
            .filter(|(_, platform)| !platform.command.is_empty())
            .map(|(name, platform)| (Platform::new(name.clone()), platform.command.clone()))
            .collect()
    }
}

//! File-drop intake for submissions from other processes.
//!
//! The daemon is the only writer of the state files, so the CLI (and any
//! other tool, like the clip render pipeline) never touches them directly.
//! Instead they drop small JSON request files into the intake directory;
//! the daemon sweeps it on a short interval and applies each file through
//! the scheduler. Request files are written atomically (temp + rename), so
//! a sweep never sees half a request.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::{error, info, warn};
use uuid::Uuid;

use clipcast_publish::{ClipRef, Platform, PublishMetadata};
use clipcast_scheduler::{JobId, Scheduler, SchedulerError, StorageError, UploadRequest};

/// One request file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum IntakeRequest {
    /// Queue one clip for one or more platforms as a staggered batch.
    Publish {
        platforms: Vec<String>,
        clip: String,
        #[serde(default)]
        title: Option<String>,
        #[serde(default)]
        caption: Option<String>,
        #[serde(default)]
        tags: Vec<String>,
        #[serde(default)]
        priority: i32,
    },
    /// Remove a pending upload.
    Cancel { job_id: JobId },
}

/// Atomically drop one request file into `dir`, creating it if needed.
/// Names start with a timestamp so sweeps apply requests in drop order.
pub async fn enqueue(dir: &Path, request: &IntakeRequest) -> Result<PathBuf, StorageError> {
    fs::create_dir_all(dir).await?;

    let name = format!(
        "{}-{}.json",
        Utc::now().format("%Y%m%dT%H%M%S%3f"),
        Uuid::new_v4().simple()
    );
    let path = dir.join(&name);
    let temp = dir.join(format!(".{name}.tmp"));

    let contents = serde_json::to_vec_pretty(request)?;
    fs::write(&temp, &contents).await?;
    fs::rename(&temp, &path).await?;
    Ok(path)
}

/// Sweep the intake directory once, applying request files in name order.
/// Returns how many requests were accepted.
///
/// Accepted files are deleted. Files the scheduler can never accept (bad
/// JSON, unknown platform, empty clip) are renamed aside with a `.rejected`
/// suffix. Storage failures leave the file in place for the next sweep.
pub async fn drain(dir: &Path, scheduler: &Scheduler) -> usize {
    let mut entries = match fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(error) if error.kind() == ErrorKind::NotFound => return 0,
        Err(error) => {
            warn!(dir = %dir.display(), error = %error, "failed to read intake directory");
            return 0;
        }
    };

    let mut files = Vec::new();
    while let Ok(Some(entry)) = entries.next_entry().await {
        let path = entry.path();
        if path.extension().is_some_and(|ext| ext == "json") {
            files.push(path);
        }
    }
    files.sort();

    let mut accepted = 0;
    for path in &files {
        let contents = match fs::read_to_string(path).await {
            Ok(contents) => contents,
            Err(error) => {
                warn!(path = %path.display(), error = %error, "failed to read intake file");
                continue;
            }
        };

        let request: IntakeRequest = match serde_json::from_str(&contents) {
            Ok(request) => request,
            Err(error) => {
                warn!(path = %path.display(), error = %error, "setting aside malformed intake file");
                set_aside(path).await;
                continue;
            }
        };

        match apply(scheduler, request).await {
            Ok(()) => {
                accepted += 1;
                if let Err(error) = fs::remove_file(path).await {
                    warn!(path = %path.display(), error = %error, "failed to remove accepted intake file");
                }
            }
            // These never become valid on a later sweep.
            Err(error @ (SchedulerError::UnknownPlatform(_) | SchedulerError::InvalidRequest(_))) => {
                warn!(path = %path.display(), error = %error, "setting aside rejected intake request");
                set_aside(path).await;
            }
            // Storage trouble may be transient; the file stays put.
            Err(error) => {
                error!(path = %path.display(), error = %error, "failed to apply intake request, keeping it for the next sweep");
            }
        }
    }
    accepted
}

async fn apply(scheduler: &Scheduler, request: IntakeRequest) -> Result<(), SchedulerError> {
    match request {
        IntakeRequest::Publish {
            platforms,
            clip,
            title,
            caption,
            tags,
            priority,
        } => {
            if platforms.is_empty() {
                return Err(SchedulerError::InvalidRequest(
                    "no platforms named".to_string(),
                ));
            }

            let metadata = PublishMetadata {
                title,
                caption,
                hashtags: tags,
            };
            let requests: Vec<UploadRequest> = platforms
                .iter()
                .map(|platform| UploadRequest {
                    platform: Platform::new(platform.clone()),
                    clip: ClipRef::new(clip.clone()),
                    metadata: metadata.clone(),
                    priority,
                })
                .collect();

            let ids = scheduler.submit_batch(requests).await?;
            info!(jobs = ids.len(), clip = %clip, "intake request queued");
            Ok(())
        }
        IntakeRequest::Cancel { job_id } => {
            if scheduler.cancel(job_id).await? {
                info!(%job_id, "intake cancel applied");
            } else {
                info!(%job_id, "intake cancel was a no-op");
            }
            Ok(())
        }
    }
}

async fn set_aside(path: &Path) {
    let target = path.with_extension("json.rejected");
    if let Err(error) = fs::rename(path, &target).await {
        warn!(path = %path.display(), error = %error, "failed to set intake file aside");
    }
}

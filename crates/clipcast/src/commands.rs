//! One-shot CLI subcommands.
//!
//! `submit` and `cancel` only drop request files for the daemon to pick up.
//! `queue` and `history` read the state files directly; they are read-only,
//! so it is safe to run them while the daemon holds the same directory.

use std::path::Path;

use clipcast_publish::Platform;
use clipcast_scheduler::{HistoryFilter, JobId, JobStatus, JobStore};

use crate::intake::{self, IntakeRequest};

pub async fn submit(
    intake_dir: &Path,
    clip: &str,
    platforms: &[String],
    title: Option<String>,
    caption: Option<String>,
    tags: Vec<String>,
    priority: i32,
) -> miette::Result<()> {
    if clip.trim().is_empty() {
        return Err(miette::miette!("clip reference must not be empty"));
    }
    if platforms.is_empty() {
        return Err(miette::miette!("at least one --platform is required"));
    }

    let request = IntakeRequest::Publish {
        platforms: platforms.to_vec(),
        clip: clip.to_string(),
        title,
        caption,
        tags,
        priority,
    };
    let path = intake::enqueue(intake_dir, &request)
        .await
        .map_err(|e| miette::miette!("failed to write request file: {}", e))?;

    println!(
        "queued {} for {} (request file: {})",
        clip,
        platforms.join(", "),
        path.display()
    );
    Ok(())
}

pub async fn cancel(intake_dir: &Path, job_id: &str) -> miette::Result<()> {
    let job_id: JobId = job_id
        .parse()
        .map_err(|e| miette::miette!("invalid job id: {}", e))?;

    intake::enqueue(intake_dir, &IntakeRequest::Cancel { job_id })
        .await
        .map_err(|e| miette::miette!("failed to write request file: {}", e))?;

    println!("cancel requested for {job_id}");
    Ok(())
}

pub async fn queue(state_dir: &Path, platform: Option<&str>) -> miette::Result<()> {
    let store = JobStore::open(state_dir)
        .await
        .map_err(|e| miette::miette!("failed to open state directory: {}", e))?;
    let mut jobs = store
        .load_queue()
        .await
        .map_err(|e| miette::miette!("failed to read upload queue: {}", e))?;

    if let Some(platform) = platform.map(Platform::from) {
        jobs.retain(|job| job.platform == platform);
    }
    jobs.sort_by_key(|job| job.due_at);

    if jobs.is_empty() {
        println!("no pending uploads");
        return Ok(());
    }

    println!(
        "{:<36}  {:<12}  {:<10}  {:<23}  CLIP",
        "ID", "PLATFORM", "STATUS", "DUE"
    );
    for job in &jobs {
        println!(
            "{:<36}  {:<12}  {:<10}  {:<23}  {}",
            job.id.to_string(),
            job.platform.to_string(),
            job.status.to_string(),
            job.due_at.format("%Y-%m-%d %H:%M:%S UTC"),
            job.clip
        );
    }
    Ok(())
}

pub async fn history(
    state_dir: &Path,
    platform: Option<&str>,
    status: Option<&str>,
    limit: usize,
) -> miette::Result<()> {
    let status = match status {
        None => None,
        Some("succeeded") => Some(JobStatus::Succeeded),
        Some("failed") => Some(JobStatus::Failed),
        Some(other) => {
            return Err(miette::miette!(
                "unknown status {:?}, expected \"succeeded\" or \"failed\"",
                other
            ));
        }
    };

    let store = JobStore::open(state_dir)
        .await
        .map_err(|e| miette::miette!("failed to open state directory: {}", e))?;
    let filter = HistoryFilter {
        platform: platform.map(Platform::from),
        status,
        limit: Some(limit),
    };
    let records = store
        .history(&filter)
        .await
        .map_err(|e| miette::miette!("failed to read upload history: {}", e))?;

    if records.is_empty() {
        println!("no upload history");
        return Ok(());
    }

    println!(
        "{:<36}  {:<12}  {:<10}  {:>8}  {:<23}  CLIP",
        "ID", "PLATFORM", "STATUS", "ATTEMPTS", "COMPLETED"
    );
    for record in &records {
        println!(
            "{:<36}  {:<12}  {:<10}  {:>8}  {:<23}  {}",
            record.job_id.to_string(),
            record.platform.to_string(),
            record.status.to_string(),
            record.attempts,
            record.completed_at.format("%Y-%m-%d %H:%M:%S UTC"),
            record.clip
        );
        if let Some(error) = &record.error {
            println!("    error: {error}");
        }
    }
    Ok(())
}

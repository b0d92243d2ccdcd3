//! Durable state for the upload scheduler.
//!
//! Two files live under one state directory:
//!
//! - `upload_queue.json` holds the pending set as a single snapshot,
//!   replaced atomically on every change (write a temp file, fsync, rename).
//!   A crash leaves either the old snapshot or the new one, never a torn mix.
//! - `upload_history.jsonl` is an append-only log of terminal outcomes, one
//!   JSON record per line. Earlier lines are already on disk, so a crash
//!   mid-append can only damage the final line.
//!
//! The queue file is strict: it is only ever produced by an atomic replace,
//! so a parse failure means real corruption and surfaces as an error. The
//! history log tolerates a torn tail and heals it on open.

use std::collections::{HashMap, HashSet};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use clipcast_publish::Platform;

use crate::error::StorageError;
use crate::types::{HistoryRecord, Job, JobId, JobStatus};

const QUEUE_FILE: &str = "upload_queue.json";
const HISTORY_FILE: &str = "upload_history.jsonl";

/// On-disk shape of the queue snapshot.
#[derive(Debug, Default, Serialize, Deserialize)]
struct QueueSnapshot {
    jobs: Vec<Job>,
    #[serde(default)]
    updated_at: Option<DateTime<Utc>>,
}

/// Filter for history queries. Empty means everything.
#[derive(Debug, Clone, Default)]
pub struct HistoryFilter {
    pub platform: Option<Platform>,
    pub status: Option<JobStatus>,
    pub limit: Option<usize>,
}

/// Crash-consistent storage for the pending set and the history log.
///
/// Opening a store scans the history once to seed two caches: the latest
/// successful upload per platform (for pacing) and the set of job ids that
/// already reached a terminal state (for crash recovery). Appends keep both
/// caches current, so reads never rescan the log.
pub struct JobStore {
    queue_path: PathBuf,
    history_path: PathBuf,
    last_success: RwLock<HashMap<Platform, DateTime<Utc>>>,
    terminal_ids: RwLock<HashSet<JobId>>,
}

impl JobStore {
    /// Open a store rooted at `dir`, creating the directory if needed.
    pub async fn open(dir: impl AsRef<Path>) -> Result<Self, StorageError> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir).await?;

        let store = Self {
            queue_path: dir.join(QUEUE_FILE),
            history_path: dir.join(HISTORY_FILE),
            last_success: RwLock::new(HashMap::new()),
            terminal_ids: RwLock::new(HashSet::new()),
        };

        store.heal_torn_tail().await?;

        let records = store.read_history().await?;
        {
            let mut last_success = store.last_success.write().await;
            let mut terminal_ids = store.terminal_ids.write().await;
            for record in &records {
                terminal_ids.insert(record.job_id);
                if record.status == JobStatus::Succeeded {
                    note_success(&mut last_success, record);
                }
            }
        }
        debug!(records = records.len(), "history scan complete");

        Ok(store)
    }

    /// Load the pending-set snapshot. A store that has never persisted
    /// anything reads as empty. A parse failure gets one short retry, in
    /// case another process is mid-replace, before surfacing as an error.
    pub async fn load_queue(&self) -> Result<Vec<Job>, StorageError> {
        match self.try_load_queue().await {
            Err(StorageError::Malformed(error)) => {
                warn!(%error, "queue snapshot unreadable, retrying once");
                tokio::time::sleep(std::time::Duration::from_millis(50)).await;
                self.try_load_queue().await
            }
            other => other,
        }
    }

    async fn try_load_queue(&self) -> Result<Vec<Job>, StorageError> {
        let contents = match fs::read_to_string(&self.queue_path).await {
            Ok(contents) => contents,
            Err(error) if error.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(error) => return Err(error.into()),
        };
        let snapshot: QueueSnapshot = serde_json::from_str(&contents)?;
        Ok(snapshot.jobs)
    }

    /// Atomically replace the pending-set snapshot.
    pub async fn replace_queue(&self, jobs: &[Job]) -> Result<(), StorageError> {
        let snapshot = QueueSnapshot {
            jobs: jobs.to_vec(),
            updated_at: Some(Utc::now()),
        };
        let contents = serde_json::to_string_pretty(&snapshot)?;

        // Write to a temp file first, then rename for atomicity
        let temp_path = self.queue_path.with_extension("tmp");
        let mut file = fs::File::create(&temp_path).await?;
        file.write_all(contents.as_bytes()).await?;
        file.sync_all().await?;
        drop(file);

        fs::rename(&temp_path, &self.queue_path).await?;
        Ok(())
    }

    /// Append one terminal record to the history log and fsync it.
    pub async fn append_history(&self, record: &HistoryRecord) -> Result<(), StorageError> {
        let mut line = serde_json::to_string(record)?;
        line.push('\n');

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.history_path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.sync_all().await?;

        self.terminal_ids.write().await.insert(record.job_id);
        if record.status == JobStatus::Succeeded {
            note_success(&mut *self.last_success.write().await, record);
        }
        Ok(())
    }

    /// Terminal outcomes matching `filter`, most recent first.
    pub async fn history(&self, filter: &HistoryFilter) -> Result<Vec<HistoryRecord>, StorageError> {
        let mut records = self.read_history().await?;
        // Appended in completion order, so newest records sit at the end.
        records.reverse();

        let matches = records.into_iter().filter(|record| {
            filter
                .platform
                .as_ref()
                .is_none_or(|platform| record.platform == *platform)
                && filter.status.is_none_or(|status| record.status == status)
        });
        Ok(match filter.limit {
            Some(limit) => matches.take(limit).collect(),
            None => matches.collect(),
        })
    }

    /// When `platform` last completed an upload successfully, if ever.
    pub async fn last_success(&self, platform: &Platform) -> Option<DateTime<Utc>> {
        self.last_success.read().await.get(platform).copied()
    }

    /// Whether a terminal record already exists for this job id.
    pub async fn has_terminal(&self, id: &JobId) -> bool {
        self.terminal_ids.read().await.contains(id)
    }

    async fn read_history(&self) -> Result<Vec<HistoryRecord>, StorageError> {
        let contents = match fs::read_to_string(&self.history_path).await {
            Ok(contents) => contents,
            Err(error) if error.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(error) => return Err(error.into()),
        };

        let mut records = Vec::new();
        for (index, line) in contents.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<HistoryRecord>(line) {
                Ok(record) => records.push(record),
                Err(error) => {
                    warn!(line = index + 1, %error, "skipping malformed history line");
                }
            }
        }
        Ok(records)
    }

    /// A crash mid-append can leave the final line without its newline.
    /// Terminate it so the next append starts on a fresh line; the damaged
    /// line itself is skipped by the tolerant reader.
    async fn heal_torn_tail(&self) -> Result<(), StorageError> {
        let contents = match fs::read(&self.history_path).await {
            Ok(contents) => contents,
            Err(error) if error.kind() == ErrorKind::NotFound => return Ok(()),
            Err(error) => return Err(error.into()),
        };
        if contents.last().is_some_and(|byte| *byte != b'\n') {
            info!("history log missing its trailing newline, terminating the torn line");
            let mut file = OpenOptions::new().append(true).open(&self.history_path).await?;
            file.write_all(b"\n").await?;
            file.sync_all().await?;
        }
        Ok(())
    }
}

fn note_success(last_success: &mut HashMap<Platform, DateTime<Utc>>, record: &HistoryRecord) {
    let entry = last_success
        .entry(record.platform.clone())
        .or_insert(record.completed_at);
    if record.completed_at > *entry {
        *entry = record.completed_at;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeDelta;
    use clipcast_publish::ClipRef;
    use pretty_assertions::assert_eq;
    use tempfile::tempdir;

    use crate::types::UploadRequest;

    fn pending_job(platform: &str, clip: &str) -> Job {
        let now = Utc::now();
        let request = UploadRequest::new(Platform::from(platform), ClipRef::from(clip));
        Job::new(request, now, 3, now)
    }

    fn record(platform: &str, status: JobStatus, completed_at: DateTime<Utc>) -> HistoryRecord {
        let mut job = pending_job(platform, "clips/a.mp4");
        job.attempt = 1;
        match status {
            JobStatus::Succeeded => HistoryRecord::succeeded(&job, completed_at),
            _ => HistoryRecord::failed(&job, "boom", completed_at),
        }
    }

    #[tokio::test]
    async fn missing_queue_reads_as_empty() {
        let dir = tempdir().unwrap();
        let store = JobStore::open(dir.path()).await.unwrap();
        assert_eq!(store.load_queue().await.unwrap(), Vec::new());
    }

    #[tokio::test]
    async fn queue_round_trips_and_leaves_no_temp_file() {
        let dir = tempdir().unwrap();
        let store = JobStore::open(dir.path()).await.unwrap();

        let jobs = vec![
            pending_job("youtube", "clips/a.mp4"),
            pending_job("tiktok", "clips/b.mp4"),
        ];
        store.replace_queue(&jobs).await.unwrap();

        assert_eq!(store.load_queue().await.unwrap(), jobs);
        assert!(!dir.path().join("upload_queue.tmp").exists());
    }

    #[tokio::test]
    async fn replace_overwrites_the_previous_snapshot() {
        let dir = tempdir().unwrap();
        let store = JobStore::open(dir.path()).await.unwrap();

        store
            .replace_queue(&[pending_job("youtube", "clips/a.mp4")])
            .await
            .unwrap();
        let second = vec![pending_job("tiktok", "clips/b.mp4")];
        store.replace_queue(&second).await.unwrap();

        assert_eq!(store.load_queue().await.unwrap(), second);
    }

    #[tokio::test]
    async fn queue_survives_reopening_the_store() {
        let dir = tempdir().unwrap();
        let jobs = vec![pending_job("youtube", "clips/a.mp4")];

        {
            let store = JobStore::open(dir.path()).await.unwrap();
            store.replace_queue(&jobs).await.unwrap();
        }

        // Simulates a process restart: fresh store over the same directory.
        let store = JobStore::open(dir.path()).await.unwrap();
        assert_eq!(store.load_queue().await.unwrap(), jobs);
    }

    #[tokio::test]
    async fn corrupt_queue_surfaces_an_error() {
        let dir = tempdir().unwrap();
        let store = JobStore::open(dir.path()).await.unwrap();

        fs::write(dir.path().join(QUEUE_FILE), b"{ not json")
            .await
            .unwrap();

        assert!(matches!(
            store.load_queue().await,
            Err(StorageError::Malformed(_))
        ));
    }

    #[tokio::test]
    async fn history_reads_most_recent_first() {
        let dir = tempdir().unwrap();
        let store = JobStore::open(dir.path()).await.unwrap();
        let base = Utc::now();

        for offset in 0..3 {
            let at = base + TimeDelta::seconds(offset);
            store
                .append_history(&record("youtube", JobStatus::Succeeded, at))
                .await
                .unwrap();
        }

        let records = store.history(&HistoryFilter::default()).await.unwrap();
        assert_eq!(records.len(), 3);
        assert!(records[0].completed_at > records[2].completed_at);
    }

    #[tokio::test]
    async fn history_filters_by_platform_status_and_limit() {
        let dir = tempdir().unwrap();
        let store = JobStore::open(dir.path()).await.unwrap();
        let now = Utc::now();

        store
            .append_history(&record("youtube", JobStatus::Succeeded, now))
            .await
            .unwrap();
        store
            .append_history(&record("tiktok", JobStatus::Failed, now))
            .await
            .unwrap();
        store
            .append_history(&record("youtube", JobStatus::Failed, now))
            .await
            .unwrap();

        let youtube = store
            .history(&HistoryFilter {
                platform: Some(Platform::from("youtube")),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(youtube.len(), 2);

        let failed = store
            .history(&HistoryFilter {
                status: Some(JobStatus::Failed),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(failed.len(), 2);

        let limited = store
            .history(&HistoryFilter {
                limit: Some(1),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(limited.len(), 1);
    }

    #[tokio::test]
    async fn history_survives_reopening_the_store() {
        let dir = tempdir().unwrap();
        let now = Utc::now();

        {
            let store = JobStore::open(dir.path()).await.unwrap();
            store
                .append_history(&record("youtube", JobStatus::Succeeded, now))
                .await
                .unwrap();
        }

        let store = JobStore::open(dir.path()).await.unwrap();
        let records = store.history(&HistoryFilter::default()).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].status, JobStatus::Succeeded);
    }

    #[tokio::test]
    async fn last_success_cache_seeds_from_disk_and_tracks_appends() {
        let dir = tempdir().unwrap();
        let platform = Platform::from("youtube");
        let earlier = Utc::now() - TimeDelta::seconds(100);
        let later = Utc::now();

        {
            let store = JobStore::open(dir.path()).await.unwrap();
            store
                .append_history(&record("youtube", JobStatus::Succeeded, earlier))
                .await
                .unwrap();
        }

        let store = JobStore::open(dir.path()).await.unwrap();
        assert_eq!(store.last_success(&platform).await, Some(earlier));

        store
            .append_history(&record("youtube", JobStatus::Succeeded, later))
            .await
            .unwrap();
        assert_eq!(store.last_success(&platform).await, Some(later));
    }

    #[tokio::test]
    async fn failures_do_not_advance_last_success() {
        let dir = tempdir().unwrap();
        let store = JobStore::open(dir.path()).await.unwrap();
        let platform = Platform::from("youtube");

        store
            .append_history(&record("youtube", JobStatus::Failed, Utc::now()))
            .await
            .unwrap();

        assert_eq!(store.last_success(&platform).await, None);
    }

    #[tokio::test]
    async fn out_of_order_appends_keep_the_latest_success() {
        let dir = tempdir().unwrap();
        let store = JobStore::open(dir.path()).await.unwrap();
        let platform = Platform::from("youtube");
        let later = Utc::now();
        let earlier = later - TimeDelta::seconds(60);

        store
            .append_history(&record("youtube", JobStatus::Succeeded, later))
            .await
            .unwrap();
        store
            .append_history(&record("youtube", JobStatus::Succeeded, earlier))
            .await
            .unwrap();

        assert_eq!(store.last_success(&platform).await, Some(later));
    }

    #[tokio::test]
    async fn terminal_ids_answer_has_terminal() {
        let dir = tempdir().unwrap();
        let store = JobStore::open(dir.path()).await.unwrap();

        let done = record("youtube", JobStatus::Succeeded, Utc::now());
        store.append_history(&done).await.unwrap();

        assert!(store.has_terminal(&done.job_id).await);
        assert!(!store.has_terminal(&JobId::new()).await);
    }

    #[tokio::test]
    async fn torn_final_line_heals_on_open() {
        let dir = tempdir().unwrap();
        let now = Utc::now();

        {
            let store = JobStore::open(dir.path()).await.unwrap();
            store
                .append_history(&record("youtube", JobStatus::Succeeded, now))
                .await
                .unwrap();
        }

        // Simulates a crash mid-append: a truncated record with no newline.
        let history = dir.path().join(HISTORY_FILE);
        let mut contents = fs::read(&history).await.unwrap();
        contents.extend_from_slice(b"{\"job_id\":\"2c5");
        fs::write(&history, &contents).await.unwrap();

        let store = JobStore::open(dir.path()).await.unwrap();
        let after = record("tiktok", JobStatus::Succeeded, now);
        store.append_history(&after).await.unwrap();

        let records = store.history(&HistoryFilter::default()).await.unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].platform, Platform::from("tiktok"));
    }
}

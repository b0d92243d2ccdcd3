//! Integration tests for the clipcast upload pipeline.
//!
//! These run the real scheduler against the real command publisher, with
//! uploads delegated to short shell scripts writing into a temp directory.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;
use tokio::time::sleep;

use clipcast_publish::{ClipRef, CommandPublisher, Platform, PublishMetadata};
use clipcast_scheduler::{
    HistoryFilter, HistoryRecord, JobStatus, JobStore, Scheduler, SchedulerConfig, UploadRequest,
};

// Helper to build a config with test-friendly timings
fn test_config() -> SchedulerConfig {
    SchedulerConfig {
        min_upload_delay: Duration::ZERO,
        stagger_uploads: true,
        stagger_delay: Duration::from_millis(50),
        startup_grace: Duration::from_millis(10),
        max_attempts: 5,
        retry_delay: Duration::from_millis(30),
        workers: 2,
        publish_timeout: Duration::from_secs(5),
        drain_grace: Duration::from_secs(2),
        ..SchedulerConfig::default()
    }
    .with_platform("youtube")
    .with_platform("tiktok")
}

// Helper to build a publisher that runs one shell script for one platform
fn shell_publisher(platform: &str, script: String) -> Arc<CommandPublisher> {
    let mut commands = BTreeMap::new();
    commands.insert(
        Platform::from(platform),
        vec!["sh".to_string(), "-c".to_string(), script],
    );
    Arc::new(CommandPublisher::new(commands))
}

async fn open_scheduler(
    state: &TempDir,
    publisher: Arc<CommandPublisher>,
    config: SchedulerConfig,
) -> (Arc<JobStore>, Scheduler) {
    let store = Arc::new(JobStore::open(state.path()).await.unwrap());
    let scheduler = Scheduler::open(store.clone(), publisher, config)
        .await
        .unwrap();
    (store, scheduler)
}

// Poll the history log until it holds `count` records.
async fn wait_for_history(store: &JobStore, count: usize) -> Vec<HistoryRecord> {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    loop {
        let records = store.history(&HistoryFilter::default()).await.unwrap();
        if records.len() >= count {
            return records;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting for {count} history records, have {}",
            records.len()
        );
        sleep(Duration::from_millis(20)).await;
    }
}

#[tokio::test]
async fn upload_runs_the_configured_command_and_lands_in_history() {
    let state = TempDir::new().unwrap();
    let log = state.path().join("uploads.log");
    let publisher = shell_publisher(
        "youtube",
        format!("echo {{platform}} {{clip}} >> {}", log.display()),
    );
    let (store, scheduler) = open_scheduler(&state, publisher, test_config()).await;

    let mut request = UploadRequest::new(
        Platform::from("youtube"),
        ClipRef::from("clips/intro.mp4"),
    );
    request.metadata = PublishMetadata {
        title: Some("Opening hook".to_string()),
        caption: None,
        hashtags: vec!["shorts".to_string()],
    };
    scheduler.submit(request).await.unwrap();
    scheduler.start().await;

    let records = wait_for_history(&store, 1).await;
    scheduler.stop().await;

    assert_eq!(records[0].status, JobStatus::Succeeded);
    assert_eq!(records[0].attempts, 1);
    assert_eq!(records[0].platform, Platform::from("youtube"));
    assert_eq!(records[0].clip, ClipRef::from("clips/intro.mp4"));
    assert!(records[0].error.is_none());

    let log = tokio::fs::read_to_string(&log).await.unwrap();
    assert_eq!(log.trim(), "youtube clips/intro.mp4");
}

#[tokio::test]
async fn failing_uploads_retry_until_the_command_succeeds() {
    let state = TempDir::new().unwrap();
    let counter = state.path().join("attempts");
    // Fails twice, succeeds on the third run.
    let publisher = shell_publisher(
        "youtube",
        format!(
            "echo . >> {c}; test $(wc -l < {c}) -ge 3",
            c = counter.display()
        ),
    );
    let (store, scheduler) = open_scheduler(&state, publisher, test_config()).await;

    scheduler
        .submit(UploadRequest::new(
            Platform::from("youtube"),
            ClipRef::from("clips/retry.mp4"),
        ))
        .await
        .unwrap();
    scheduler.start().await;

    let records = wait_for_history(&store, 1).await;
    scheduler.stop().await;

    assert_eq!(records[0].status, JobStatus::Succeeded);
    assert_eq!(records[0].attempts, 3);

    let runs = tokio::fs::read_to_string(&counter).await.unwrap();
    assert_eq!(runs.lines().count(), 3);
}

#[tokio::test]
async fn rejected_uploads_exhaust_their_attempts_and_keep_stderr() {
    let state = TempDir::new().unwrap();
    let publisher = shell_publisher("youtube", "echo quota exceeded >&2; exit 3".to_string());
    let mut config = test_config();
    config.max_attempts = 2;
    let (store, scheduler) = open_scheduler(&state, publisher, config).await;

    scheduler
        .submit(UploadRequest::new(
            Platform::from("youtube"),
            ClipRef::from("clips/doomed.mp4"),
        ))
        .await
        .unwrap();
    scheduler.start().await;

    let records = wait_for_history(&store, 1).await;
    scheduler.stop().await;

    assert_eq!(records.len(), 1);
    assert_eq!(records[0].status, JobStatus::Failed);
    assert_eq!(records[0].attempts, 2);
    let error = records[0].error.as_deref().unwrap();
    assert!(error.contains("quota exceeded"), "error was {error:?}");
}

#[tokio::test]
async fn platforms_without_commands_fail_cleanly() {
    let state = TempDir::new().unwrap();
    let publisher = Arc::new(CommandPublisher::new(BTreeMap::new()));
    let mut config = test_config();
    config.max_attempts = 1;
    let (store, scheduler) = open_scheduler(&state, publisher, config).await;

    scheduler
        .submit(UploadRequest::new(
            Platform::from("youtube"),
            ClipRef::from("clips/nowhere.mp4"),
        ))
        .await
        .unwrap();
    scheduler.start().await;

    let records = wait_for_history(&store, 1).await;
    scheduler.stop().await;

    assert_eq!(records[0].status, JobStatus::Failed);
    let error = records[0].error.as_deref().unwrap();
    assert!(error.contains("no upload command"), "error was {error:?}");
}

#[tokio::test]
async fn pending_uploads_survive_a_restart() {
    let state = TempDir::new().unwrap();
    let publisher = shell_publisher("youtube", "exit 0".to_string());

    let (_, scheduler) = open_scheduler(&state, publisher.clone(), test_config()).await;
    let batch = vec![
        UploadRequest::new(Platform::from("youtube"), ClipRef::from("clips/a.mp4")),
        UploadRequest::new(Platform::from("tiktok"), ClipRef::from("clips/b.mp4")),
    ];
    let ids = scheduler.submit_batch(batch).await.unwrap();
    drop(scheduler);

    // A fresh process sees the same queue.
    let (_, scheduler) = open_scheduler(&state, publisher, test_config()).await;
    let pending = scheduler.list_pending(None).await;
    assert_eq!(pending.len(), 2);
    assert_eq!(pending[0].id, ids[0]);
    assert_eq!(pending[1].id, ids[1]);
    assert_eq!(pending[0].status, JobStatus::Pending);
}

#[tokio::test]
async fn batch_uploads_run_in_stagger_order() {
    let state = TempDir::new().unwrap();
    let log = state.path().join("uploads.log");
    let mut commands = BTreeMap::new();
    for platform in ["youtube", "tiktok"] {
        commands.insert(
            Platform::from(platform),
            vec![
                "sh".to_string(),
                "-c".to_string(),
                format!("echo {{platform}} >> {}", log.display()),
            ],
        );
    }
    let publisher = Arc::new(CommandPublisher::new(commands));

    let mut config = test_config();
    config.workers = 1;
    let (store, scheduler) = open_scheduler(&state, publisher, config).await;

    scheduler
        .submit_batch(vec![
            UploadRequest::new(Platform::from("youtube"), ClipRef::from("clips/a.mp4")),
            UploadRequest::new(Platform::from("tiktok"), ClipRef::from("clips/a.mp4")),
        ])
        .await
        .unwrap();
    scheduler.start().await;

    wait_for_history(&store, 2).await;
    scheduler.stop().await;

    let log = tokio::fs::read_to_string(&log).await.unwrap();
    let order: Vec<&str> = log.lines().collect();
    assert_eq!(order, vec!["youtube", "tiktok"]);
}

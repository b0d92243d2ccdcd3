//! Scheduler core: owns the pending set, dispatches due uploads to a bounded
//! worker pool, and applies retry and pacing rules to every outcome.
//!
//! All queue mutations flow through one code path: take the pending lock,
//! build the next snapshot, persist it, then swap it in. A job is never
//! handed to a worker before its `Dispatched` transition is on disk, so a
//! crash can orphan at most work that is already durable.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, Notify, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use clipcast_publish::{Platform, Publisher};

use crate::config::SchedulerConfig;
use crate::error::SchedulerError;
use crate::pacing::Pacer;
use crate::retry::{Outcome, RetryPolicy};
use crate::store::{HistoryFilter, JobStore};
use crate::types::{
    HistoryRecord, Job, JobId, JobStatus, UploadRequest, advance, dispatch_order,
};

/// Smallest bounded wait between scheduling passes.
const MIN_SLEEP: Duration = Duration::from_millis(50);
/// Largest bounded wait; submissions, completions, and stop all interrupt it.
const MAX_SLEEP: Duration = Duration::from_secs(30);

/// What a worker sends back after one publish attempt.
#[derive(Debug)]
struct AttemptReport {
    job_id: JobId,
    delivered: Result<(), String>,
}

struct RunState {
    shutdown_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

/// Durable delayed-upload scheduler.
///
/// Open one per state directory. Submissions and cancellations work whether
/// or not the dispatch loop is running, so work queued while stopped is
/// simply picked up by the next [`start`](Self::start).
pub struct Scheduler {
    inner: Arc<Inner>,
    run_state: Mutex<Option<RunState>>,
}

struct Inner {
    store: Arc<JobStore>,
    publisher: Arc<dyn Publisher>,
    config: SchedulerConfig,
    pacer: Pacer,
    retry: RetryPolicy,
    pending: Mutex<Vec<Job>>,
    wake: Notify,
}

impl Scheduler {
    /// Open a scheduler over `store`, recovering whatever a previous process
    /// left behind. The repaired pending set is persisted before returning.
    pub async fn open(
        store: Arc<JobStore>,
        publisher: Arc<dyn Publisher>,
        config: SchedulerConfig,
    ) -> Result<Self, SchedulerError> {
        config.validate()?;

        let loaded = store.load_queue().await?;
        let jobs = recover(&store, loaded, &config).await?;
        store.replace_queue(&jobs).await?;
        info!(jobs = jobs.len(), "pending uploads loaded");

        let retry = RetryPolicy::new(config.retry_delay, config.retry_backoff);
        let pacer = Pacer::new(Arc::clone(&store), config.clone());
        Ok(Self {
            inner: Arc::new(Inner {
                store,
                publisher,
                config,
                pacer,
                retry,
                pending: Mutex::new(jobs),
                wake: Notify::new(),
            }),
            run_state: Mutex::new(None),
        })
    }

    /// Queue one upload. The due time comes from the platform's pacing;
    /// the call returns as soon as the new pending set is durable and never
    /// waits on the publisher.
    pub async fn submit(&self, request: UploadRequest) -> Result<JobId, SchedulerError> {
        self.inner.check_request(&request)?;

        let now = Utc::now();
        let due_at = self.inner.pacer.next_slot(&request.platform, now).await;
        let platform = request.platform.clone();
        let clip = request.clip.clone();
        let job = Job::new(request, due_at, self.inner.config.max_attempts, now);
        let id = job.id;

        let mut pending = self.inner.pending.lock().await;
        let mut next = pending.clone();
        next.push(job);
        self.inner.store.replace_queue(&next).await?;
        *pending = next;
        drop(pending);

        info!(job_id = %id, %platform, %clip, due_at = %due_at, "upload scheduled");
        self.inner.wake.notify_one();
        Ok(id)
    }

    /// Queue several uploads together, staggering their due times across the
    /// batch. Validation covers the whole batch before anything persists, so
    /// a bad request rejects the batch without queueing its neighbors.
    pub async fn submit_batch(
        &self,
        requests: Vec<UploadRequest>,
    ) -> Result<Vec<JobId>, SchedulerError> {
        if requests.is_empty() {
            return Ok(Vec::new());
        }
        for request in &requests {
            self.inner.check_request(request)?;
        }

        let now = Utc::now();
        let platforms: Vec<Platform> = requests
            .iter()
            .map(|request| request.platform.clone())
            .collect();
        let due_times = self.inner.pacer.plan_batch(&platforms, now).await;

        let mut ids = Vec::with_capacity(requests.len());
        let mut pending = self.inner.pending.lock().await;
        let mut next = pending.clone();
        for (request, due_at) in requests.into_iter().zip(due_times) {
            let job = Job::new(request, due_at, self.inner.config.max_attempts, now);
            info!(job_id = %job.id, platform = %job.platform, due_at = %due_at, "upload scheduled");
            ids.push(job.id);
            next.push(job);
        }
        self.inner.store.replace_queue(&next).await?;
        *pending = next;
        drop(pending);

        self.inner.wake.notify_one();
        Ok(ids)
    }

    /// Remove a job that has not been dispatched yet. Returns false when the
    /// job is unknown, already running, or already finished; an in-flight
    /// upload is never interrupted.
    pub async fn cancel(&self, id: JobId) -> Result<bool, SchedulerError> {
        let mut pending = self.inner.pending.lock().await;
        let Some(position) = pending
            .iter()
            .position(|job| job.id == id && job.status == JobStatus::Pending)
        else {
            debug!(job_id = %id, "cancel is a no-op");
            return Ok(false);
        };

        let mut next = pending.clone();
        let job = next.remove(position);
        self.inner.store.replace_queue(&next).await?;
        *pending = next;
        drop(pending);

        info!(job_id = %job.id, platform = %job.platform, "upload cancelled");
        self.inner.wake.notify_one();
        Ok(true)
    }

    /// Snapshot of the pending set, optionally narrowed to one platform,
    /// sorted by dispatch order.
    pub async fn list_pending(&self, platform: Option<&Platform>) -> Vec<Job> {
        let pending = self.inner.pending.lock().await;
        let mut jobs: Vec<Job> = pending
            .iter()
            .filter(|job| platform.is_none_or(|platform| job.platform == *platform))
            .cloned()
            .collect();
        drop(pending);

        jobs.sort_by(dispatch_order);
        jobs
    }

    /// Terminal outcomes matching `filter`, most recent first.
    pub async fn list_history(
        &self,
        filter: &HistoryFilter,
    ) -> Result<Vec<HistoryRecord>, SchedulerError> {
        Ok(self.inner.store.history(filter).await?)
    }

    /// Start the dispatch loop and its worker pool. Idempotent.
    pub async fn start(&self) {
        let mut run_state = self.run_state.lock().await;
        if run_state.is_some() {
            debug!("scheduler already running");
            return;
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let workers = self.inner.config.workers;
        let (work_tx, work_rx) = mpsc::channel::<Job>(workers);
        let (report_tx, report_rx) = mpsc::channel::<AttemptReport>(workers);
        let work_rx = Arc::new(Mutex::new(work_rx));

        let mut worker_handles = Vec::with_capacity(workers);
        for worker_id in 0..workers {
            worker_handles.push(tokio::spawn(worker_loop(
                worker_id,
                Arc::clone(&self.inner),
                Arc::clone(&work_rx),
                report_tx.clone(),
                shutdown_rx.clone(),
            )));
        }
        drop(report_tx);

        let handle = tokio::spawn(run_loop(
            Arc::clone(&self.inner),
            shutdown_rx,
            work_tx,
            report_rx,
            worker_handles,
        ));

        *run_state = Some(RunState {
            shutdown_tx,
            handle,
        });
        info!(workers, "scheduler started");
    }

    /// Stop dispatching and drain in-flight uploads, bounded by the drain
    /// grace period. Idempotent. Pending jobs stay durable and run on the
    /// next start; an upload that outlives the grace is recovered then too.
    pub async fn stop(&self) {
        let Some(run_state) = self.run_state.lock().await.take() else {
            debug!("scheduler already stopped");
            return;
        };

        let _ = run_state.shutdown_tx.send(true);
        let _ = run_state.handle.await;
        info!("scheduler stopped");
    }
}

impl Inner {
    fn check_request(&self, request: &UploadRequest) -> Result<(), SchedulerError> {
        if !self.config.platforms.contains_key(&request.platform) {
            return Err(SchedulerError::UnknownPlatform(
                request.platform.to_string(),
            ));
        }
        if request.clip.is_empty() {
            return Err(SchedulerError::InvalidRequest(
                "clip reference is empty".to_string(),
            ));
        }
        Ok(())
    }

    /// Claim due jobs up to `capacity`, persist their `Dispatched`
    /// transition, then hand them to the worker pool. Returns how many went
    /// out. A job whose platform floor moved past its due time (a success
    /// landed since it was scheduled) is pushed out instead of dispatched.
    async fn dispatch_due(&self, capacity: usize, work_tx: &mpsc::Sender<Job>) -> usize {
        if capacity == 0 {
            return 0;
        }

        let mut claimed = Vec::new();
        {
            let mut pending = self.pending.lock().await;
            let mut next = pending.clone();
            let now = Utc::now();
            let mut deferred = false;

            while claimed.len() < capacity {
                let Some(index) = next_due_index(&next, now) else {
                    break;
                };

                if let Some(floor) = self.pacer.success_floor(&next[index].platform).await {
                    if floor > now {
                        debug!(
                            job_id = %next[index].id,
                            platform = %next[index].platform,
                            floor = %floor,
                            "pacing floor moved, deferring upload"
                        );
                        next[index].due_at = next[index].due_at.max(floor);
                        deferred = true;
                        continue;
                    }
                }

                let job = &mut next[index];
                job.status = JobStatus::Dispatched;
                job.attempt += 1;
                job.last_attempt_at = Some(now);
                claimed.push(job.clone());
            }

            if claimed.is_empty() && !deferred {
                return 0;
            }
            if let Err(err) = self.store.replace_queue(&next).await {
                // Nothing may run without a durable Dispatched mark.
                error!(error = %err, "failed to persist dispatch transition, holding jobs back");
                return 0;
            }
            *pending = next;
        }

        let handed = claimed.len();
        for job in claimed {
            debug!(
                job_id = %job.id,
                platform = %job.platform,
                attempt = job.attempt,
                "dispatching upload"
            );
            if work_tx.send(job).await.is_err() {
                // Worker pool is gone; the job stays Dispatched in the store
                // and recovery requeues it on the next start.
                warn!("worker pool closed while dispatching");
                break;
            }
        }
        handed
    }

    /// Run one publish attempt, bounded by the configured timeout.
    async fn attempt_publish(&self, job: Job) -> Result<(), String> {
        info!(
            job_id = %job.id,
            platform = %job.platform,
            clip = %job.clip,
            attempt = job.attempt,
            "publishing clip"
        );
        let publish = self
            .publisher
            .publish(&job.platform, &job.clip, &job.metadata);
        match tokio::time::timeout(self.config.publish_timeout, publish).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(error)) => Err(error.to_string()),
            Err(_) => Err(format!(
                "publish timed out after {:?}",
                self.config.publish_timeout
            )),
        }
    }

    /// Apply one attempt report: retry decision, history append, snapshot
    /// persist. The attempt already happened, so the in-memory set adopts
    /// the outcome even when a persist fails; the next successful persist
    /// repairs the snapshot, and history-append failures are logged loudly
    /// rather than resurrecting a job that already ran.
    async fn settle(&self, report: AttemptReport) {
        let mut pending = self.pending.lock().await;
        let Some(position) = pending.iter().position(|job| job.id == report.job_id) else {
            warn!(job_id = %report.job_id, "attempt report for an unknown job");
            return;
        };

        let now = Utc::now();
        let mut next = pending.clone();
        let succeeded = report.delivered.is_ok();

        match self.retry.decide(&next[position], succeeded, now) {
            Outcome::Completed => {
                let job = next.remove(position);
                info!(
                    job_id = %job.id,
                    platform = %job.platform,
                    attempts = job.attempt,
                    "clip published"
                );
                let record = HistoryRecord::succeeded(&job, now);
                if let Err(err) = self.store.append_history(&record).await {
                    error!(job_id = %job.id, error = %err, "failed to record completed upload");
                }
            }
            Outcome::Retry { at } => {
                let detail = report
                    .delivered
                    .err()
                    .unwrap_or_else(|| "unknown error".to_string());
                let job = &mut next[position];
                job.status = JobStatus::Pending;
                job.due_at = job.due_at.max(at);
                job.last_error = Some(detail.clone());
                warn!(
                    job_id = %job.id,
                    platform = %job.platform,
                    attempt = job.attempt,
                    retry_at = %job.due_at,
                    error = %detail,
                    "upload failed, retry scheduled"
                );
            }
            Outcome::Exhausted => {
                let detail = report
                    .delivered
                    .err()
                    .unwrap_or_else(|| "unknown error".to_string());
                let job = next.remove(position);
                error!(
                    job_id = %job.id,
                    platform = %job.platform,
                    attempts = job.attempt,
                    error = %detail,
                    "upload failed permanently"
                );
                let record = HistoryRecord::failed(&job, detail, now);
                if let Err(err) = self.store.append_history(&record).await {
                    error!(job_id = %job.id, error = %err, "failed to record exhausted upload");
                }
            }
        }

        if let Err(err) = self.store.replace_queue(&next).await {
            error!(error = %err, "failed to persist pending set after attempt");
        }
        *pending = next;
    }

    /// Wait out stragglers after the dispatch loop exits.
    async fn drain(&self, mut in_flight: usize, reports: &mut mpsc::Receiver<AttemptReport>) {
        if in_flight == 0 {
            return;
        }
        info!(in_flight, "draining in-flight uploads");

        let deadline = tokio::time::Instant::now() + self.config.drain_grace;
        while in_flight > 0 {
            match tokio::time::timeout_at(deadline, reports.recv()).await {
                Ok(Some(report)) => {
                    in_flight -= 1;
                    self.settle(report).await;
                }
                // Every worker is gone; nothing left can report.
                Ok(None) => break,
                // Grace expired.
                Err(_) => break,
            }
        }

        if in_flight > 0 {
            let pending = self.pending.lock().await;
            for job in pending.iter().filter(|job| job.status == JobStatus::Dispatched) {
                warn!(
                    job_id = %job.id,
                    platform = %job.platform,
                    "upload still in flight at shutdown, it will be recovered on the next start"
                );
            }
        }
    }

    /// How long the dispatch loop may sleep before the next pass.
    async fn next_wait(&self) -> Duration {
        let pending = self.pending.lock().await;
        let next_due = pending
            .iter()
            .filter(|job| job.status == JobStatus::Pending)
            .map(|job| job.due_at)
            .min();
        drop(pending);

        match next_due {
            Some(due) => {
                let until = due
                    .signed_duration_since(Utc::now())
                    .to_std()
                    .unwrap_or(Duration::ZERO);
                until.clamp(MIN_SLEEP, MAX_SLEEP)
            }
            None => MAX_SLEEP,
        }
    }
}

/// Resolve jobs left over from a previous process. A job that already has a
/// terminal record is dropped (the crash landed between the history append
/// and the queue persist). An interrupted `Dispatched` job returns to
/// `Pending` with its attempt kept, or goes terminal when that attempt was
/// its last. The attempt counts as consumed either way, so a crash loop
/// cannot retry forever.
async fn recover(
    store: &JobStore,
    loaded: Vec<Job>,
    config: &SchedulerConfig,
) -> Result<Vec<Job>, SchedulerError> {
    let now = Utc::now();
    let mut jobs = Vec::with_capacity(loaded.len());

    for mut job in loaded {
        if store.has_terminal(&job.id).await {
            info!(job_id = %job.id, "dropping job that already reached a terminal state");
            continue;
        }
        match job.status {
            JobStatus::Pending => jobs.push(job),
            JobStatus::Dispatched if job.attempt >= job.max_attempts => {
                warn!(
                    job_id = %job.id,
                    platform = %job.platform,
                    attempt = job.attempt,
                    "final attempt interrupted, recording failure"
                );
                let record = HistoryRecord::failed(&job, "interrupted during execution", now);
                store.append_history(&record).await?;
            }
            JobStatus::Dispatched => {
                info!(
                    job_id = %job.id,
                    platform = %job.platform,
                    attempt = job.attempt,
                    "requeueing interrupted upload"
                );
                job.status = JobStatus::Pending;
                job.due_at = job.due_at.max(advance(now, config.startup_grace));
                jobs.push(job);
            }
            JobStatus::Succeeded | JobStatus::Failed => {
                warn!(job_id = %job.id, status = %job.status, "dropping terminal job found in the queue snapshot");
            }
        }
    }
    Ok(jobs)
}

async fn run_loop(
    inner: Arc<Inner>,
    mut shutdown_rx: watch::Receiver<bool>,
    work_tx: mpsc::Sender<Job>,
    mut reports: mpsc::Receiver<AttemptReport>,
    worker_handles: Vec<JoinHandle<()>>,
) {
    let mut in_flight = 0usize;

    loop {
        let capacity = inner.config.workers.saturating_sub(in_flight);
        in_flight += inner.dispatch_due(capacity, &work_tx).await;

        let wait = if in_flight >= inner.config.workers {
            // Saturated; a completion report wakes us before this expires.
            MAX_SLEEP
        } else {
            inner.next_wait().await
        };

        tokio::select! {
            biased;
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow_and_update() {
                    break;
                }
            }
            Some(report) = reports.recv() => {
                in_flight = in_flight.saturating_sub(1);
                inner.settle(report).await;
            }
            _ = inner.wake.notified() => {}
            _ = tokio::time::sleep(wait) => {}
        }
    }

    // Closing the queue lets idle workers fall out of recv.
    drop(work_tx);
    inner.drain(in_flight, &mut reports).await;
    for handle in worker_handles {
        let _ = handle.await;
    }
}

async fn worker_loop(
    worker_id: usize,
    inner: Arc<Inner>,
    work_rx: Arc<Mutex<mpsc::Receiver<Job>>>,
    report_tx: mpsc::Sender<AttemptReport>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    debug!(worker_id, "upload worker started");
    loop {
        let job = tokio::select! {
            biased;
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow_and_update() {
                    break;
                }
                continue;
            }
            job = recv_work(&work_rx) => match job {
                Some(job) => job,
                None => break,
            },
        };

        let job_id = job.id;
        let delivered = inner.attempt_publish(job).await;
        if report_tx
            .send(AttemptReport { job_id, delivered })
            .await
            .is_err()
        {
            break;
        }
    }
    debug!(worker_id, "upload worker stopped");
}

/// Scopes the receiver lock so dropping out of a `select!` releases it.
async fn recv_work(work_rx: &Arc<Mutex<mpsc::Receiver<Job>>>) -> Option<Job> {
    work_rx.lock().await.recv().await
}

fn next_due_index(jobs: &[Job], now: DateTime<Utc>) -> Option<usize> {
    jobs.iter()
        .enumerate()
        .filter(|(_, job)| job.status == JobStatus::Pending && job.due_at <= now)
        .min_by(|(_, a), (_, b)| dispatch_order(a, b))
        .map(|(index, _)| index)
}

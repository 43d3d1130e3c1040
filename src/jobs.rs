//! Async job tracker.
//!
//! Providers with submit-now, fetch-later APIs get a synchronous-looking submit:
//! [`JobTracker::submit`] registers a job and returns its local id at once, and a
//! background loop polls the provider with capped exponential backoff until the
//! job completes, fails, runs out of attempts or time, or is cancelled.
//! Callers only ever see [`JobSnapshot`] copies.
//!
//! The registry is a sharded [`DashMap`], so poll loops for unrelated jobs and the
//! periodic sweep never contend on one lock.

use crate::config::JobsConfig;
use crate::error::{RelayError, Result};

use async_trait::async_trait;
use backoff::backoff::Backoff;
use backoff::{ExponentialBackoff, ExponentialBackoffBuilder};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Backoff schedule for one job. Fixed once the job's loop starts.
#[derive(Debug, Clone, PartialEq)]
pub struct PollPolicy {
    pub max_attempts: u32,
    pub initial_interval: Duration,
    pub max_interval: Duration,
    pub backoff_factor: f64,
    pub timeout: Duration,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 30,
            initial_interval: Duration::from_millis(1_500),
            max_interval: Duration::from_secs(30),
            backoff_factor: 1.5,
            timeout: Duration::from_secs(10 * 60),
        }
    }
}

/// Horizon used when a timeout is too large to add to the current instant.
const FAR_FUTURE: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

impl PollPolicy {
    /// Waits between polls: `initial_interval` first, then growing by
    /// `backoff_factor` until capped at `max_interval`. No jitter.
    #[must_use]
    pub fn intervals(&self) -> ExponentialBackoff {
        ExponentialBackoffBuilder::new()
            .with_initial_interval(self.initial_interval)
            .with_randomization_factor(0.0)
            .with_multiplier(self.backoff_factor)
            .with_max_interval(self.max_interval)
            // The deadline runs on the tokio clock instead.
            .with_max_elapsed_time(None)
            .build()
    }

    fn deadline(&self) -> Instant {
        let now = Instant::now();
        now.checked_add(self.timeout)
            .or_else(|| now.checked_add(FAR_FUTURE))
            .unwrap_or(now)
    }
}

/// Next wait, clipped to the deadline. `None` once the schedule is exhausted.
fn next_wait(intervals: &mut ExponentialBackoff, deadline: Instant) -> Option<Duration> {
    let remaining = deadline.saturating_duration_since(Instant::now());
    intervals.next_backoff().map(|wait| wait.min(remaining))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl JobState {
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, JobState::Completed | JobState::Failed)
    }
}

/// Result of one provider poll.
#[derive(Debug, Clone, Default)]
pub struct PollOutcome {
    pub completed: bool,
    /// Latest provider view of the job; stored even when not yet complete.
    pub result: Option<serde_json::Value>,
}

impl PollOutcome {
    pub fn pending() -> Self {
        Self::default()
    }

    pub fn in_progress(result: serde_json::Value) -> Self {
        Self {
            completed: false,
            result: Some(result),
        }
    }

    pub fn completed(result: serde_json::Value) -> Self {
        Self {
            completed: true,
            result: Some(result),
        }
    }
}

/// One provider status check.
///
/// Return [`RelayError::PollFatal`] when the provider reports the job as failed
/// or cancelled; every other error is retried.
#[async_trait]
pub trait Poller: Send + Sync {
    async fn poll(&self) -> Result<PollOutcome>;
}

#[async_trait]
impl<F, Fut> Poller for F
where
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = Result<PollOutcome>> + Send,
{
    async fn poll(&self) -> Result<PollOutcome> {
        (self)().await
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct JobSnapshot {
    pub id: String,
    pub external_id: String,
    pub state: JobState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub attempts: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    pub stopped: bool,
    pub metadata: HashMap<String, String>,
    /// Every state the job has been in, in order.
    pub history: Vec<JobState>,
}

struct JobEntry {
    job: JobSnapshot,
    stop: CancellationToken,
    touched: Instant,
}

impl JobEntry {
    fn touch(&mut self) {
        self.job.updated_at = Utc::now();
        self.touched = Instant::now();
    }

    /// Move forward in the lifecycle. Backward or repeated transitions are refused.
    fn advance(&mut self, next: JobState) -> bool {
        if self.job.state.is_terminal() || next <= self.job.state {
            return false;
        }
        if next.is_terminal() && self.job.state != JobState::Processing {
            return false;
        }
        self.job.state = next;
        self.job.history.push(next);
        if next.is_terminal() {
            self.job.completed_at = Some(Utc::now());
            self.stop.cancel();
        }
        self.touch();
        true
    }

    fn snapshot(&self) -> JobSnapshot {
        let mut job = self.job.clone();
        job.stopped = self.stop.is_cancelled();
        job
    }

    fn reclaimable(&self, now: Instant, ttl: Duration) -> bool {
        let finished = self.job.state.is_terminal() || self.stop.is_cancelled();
        finished && now.saturating_duration_since(self.touched) >= ttl
    }
}

#[derive(Debug, Clone)]
pub struct TrackerOptions {
    /// Retention of finished (or cancelled) jobs after their last update.
    pub ttl: Duration,
    pub sweep_interval: Duration,
    pub policy: PollPolicy,
}

impl Default for TrackerOptions {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(24 * 60 * 60),
            sweep_interval: Duration::from_secs(60),
            policy: PollPolicy::default(),
        }
    }
}

impl TrackerOptions {
    #[must_use]
    pub fn from_config(config: &JobsConfig) -> Self {
        Self {
            ttl: Duration::from_secs(config.ttl_secs),
            sweep_interval: Duration::from_secs(config.sweep_interval_secs.max(1)),
            policy: config.poll.policy(),
        }
    }
}

struct Inner {
    jobs: DashMap<String, JobEntry>,
    options: TrackerOptions,
    shutdown: CancellationToken,
}

impl Inner {
    /// Apply `f` to a live job. Returns false once the job has been reclaimed.
    fn with_job(&self, id: &str, f: impl FnOnce(&mut JobEntry)) -> bool {
        match self.jobs.get_mut(id) {
            Some(mut entry) => {
                f(&mut entry);
                true
            }
            None => false,
        }
    }

    fn complete(&self, id: &str, result: Option<serde_json::Value>) {
        self.with_job(id, |entry| {
            if result.is_some() {
                entry.job.result = result;
            }
            entry.advance(JobState::Completed);
        });
    }

    fn fail(&self, id: &str, reason: String) {
        tracing::info!(job = %id, %reason, "job failed");
        self.with_job(id, |entry| {
            entry.job.reason = Some(reason);
            entry.advance(JobState::Failed);
        });
    }

    fn sweep(&self) -> usize {
        let now = Instant::now();
        let ttl = self.options.ttl;
        let mut removed = 0;
        self.jobs.retain(|_, entry| {
            if entry.reclaimable(now, ttl) {
                entry.stop.cancel();
                removed += 1;
                false
            } else {
                true
            }
        });
        removed
    }
}

/// Registry of asynchronous provider jobs. Cloning shares the registry.
///
/// Must be created inside a Tokio runtime; call [`JobTracker::shutdown`] to stop
/// every background task.
#[derive(Clone)]
pub struct JobTracker {
    inner: Arc<Inner>,
}

impl JobTracker {
    pub fn new(options: TrackerOptions) -> Self {
        let inner = Arc::new(Inner {
            jobs: DashMap::new(),
            shutdown: CancellationToken::new(),
            options,
        });
        spawn_sweeper(Arc::downgrade(&inner));
        Self { inner }
    }

    #[must_use]
    pub fn options(&self) -> &TrackerOptions {
        &self.inner.options
    }

    /// Register a job under a fresh local id and start its poll loop with the
    /// tracker's default policy.
    pub fn submit(
        &self,
        external_id: impl Into<String>,
        poller: Arc<dyn Poller>,
        metadata: HashMap<String, String>,
    ) -> String {
        let policy = self.inner.options.policy.clone();
        self.submit_with_policy(external_id, poller, metadata, policy)
    }

    pub fn submit_with_policy(
        &self,
        external_id: impl Into<String>,
        poller: Arc<dyn Poller>,
        metadata: HashMap<String, String>,
        policy: PollPolicy,
    ) -> String {
        let id = uuid::Uuid::new_v4().to_string();
        let external_id = external_id.into();
        let now = Utc::now();
        let stop = self.inner.shutdown.child_token();

        self.inner.jobs.insert(
            id.clone(),
            JobEntry {
                job: JobSnapshot {
                    id: id.clone(),
                    external_id: external_id.clone(),
                    state: JobState::Pending,
                    result: None,
                    reason: None,
                    attempts: 0,
                    created_at: now,
                    updated_at: now,
                    completed_at: None,
                    stopped: false,
                    metadata,
                    history: vec![JobState::Pending],
                },
                stop: stop.clone(),
                touched: Instant::now(),
            },
        );

        tracing::info!(job = %id, external = %external_id, "job submitted");
        tokio::spawn(run_job(Arc::clone(&self.inner), id.clone(), poller, policy, stop));
        id
    }

    /// Current view of a job, or `None` if it is unknown or already reclaimed.
    #[must_use]
    pub fn get_result(&self, id: &str) -> Option<JobSnapshot> {
        self.inner.jobs.get(id).map(|entry| entry.snapshot())
    }

    /// Ask a job's loop to stop at its next check. The job keeps its last
    /// observed state.
    ///
    /// Returns `false` for unknown or already finished jobs, which are left
    /// untouched.
    pub fn cancel(&self, id: &str) -> bool {
        let Some(mut entry) = self.inner.jobs.get_mut(id) else {
            return false;
        };
        if entry.job.state.is_terminal() {
            return false;
        }
        if !entry.stop.is_cancelled() {
            entry.stop.cancel();
            entry.touch();
            tracing::info!(job = %id, "job cancelled");
        }
        true
    }

    /// Drop finished jobs whose last update is older than the TTL.
    pub fn sweep(&self) -> usize {
        self.inner.sweep()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.jobs.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.jobs.is_empty()
    }

    /// Stop every poll loop and the sweeper, and forget all jobs.
    pub fn shutdown(&self) {
        self.inner.shutdown.cancel();
        self.inner.jobs.clear();
        tracing::info!("job tracker shut down");
    }
}

fn spawn_sweeper(inner: Weak<Inner>) {
    let Some(strong) = inner.upgrade() else {
        return;
    };
    let period = strong.options.sweep_interval;
    let shutdown = strong.shutdown.clone();
    drop(strong);

    tokio::spawn(async move {
        let start = Instant::now().checked_add(period).unwrap_or_else(Instant::now);
        let mut ticker = tokio::time::interval_at(start, period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }
            let Some(inner) = inner.upgrade() else {
                break;
            };
            let removed = inner.sweep();
            if removed > 0 {
                tracing::debug!(removed, remaining = inner.jobs.len(), "swept expired jobs");
            }
        }
    });
}

/// Sleep unless `stop` fires first. Returns false when stopped.
async fn pause(stop: &CancellationToken, duration: Duration) -> bool {
    tokio::select! {
        biased;
        _ = stop.cancelled() => false,
        _ = tokio::time::sleep(duration) => true,
    }
}

async fn run_job(
    inner: Arc<Inner>,
    id: String,
    poller: Arc<dyn Poller>,
    policy: PollPolicy,
    stop: CancellationToken,
) {
    let deadline = policy.deadline();
    let mut intervals = policy.intervals();
    let first = next_wait(&mut intervals, deadline).unwrap_or(policy.initial_interval);

    if !pause(&stop, first).await {
        tracing::debug!(job = %id, "job stopped before first poll");
        return;
    }
    if !inner.with_job(&id, |entry| {
        entry.advance(JobState::Processing);
    }) {
        return;
    }

    let mut attempts = 0u32;
    loop {
        if stop.is_cancelled() {
            tracing::debug!(job = %id, attempts, "job loop stopped");
            return;
        }
        if attempts >= policy.max_attempts {
            inner.fail(&id, format!("no result after {attempts} poll attempts"));
            return;
        }
        if Instant::now() >= deadline {
            inner.fail(&id, format!("no result within {:?}", policy.timeout));
            return;
        }

        attempts += 1;
        // An in-flight poll finishes even if the job is cancelled meanwhile;
        // only tracker shutdown abandons it.
        let outcome = tokio::select! {
            biased;
            _ = inner.shutdown.cancelled() => return,
            outcome = poller.poll() => outcome,
        };

        let alive = inner.with_job(&id, |entry| {
            entry.job.attempts = attempts;
            entry.touch();
        });
        if !alive {
            return;
        }

        match outcome {
            Ok(outcome) if outcome.completed => {
                tracing::info!(job = %id, attempts, "job completed");
                inner.complete(&id, outcome.result);
                return;
            }
            Ok(outcome) => {
                if let Some(result) = outcome.result {
                    inner.with_job(&id, |entry| entry.job.result = Some(result));
                }
            }
            Err(RelayError::PollFatal { reason }) => {
                inner.fail(&id, reason);
                return;
            }
            Err(e) => {
                tracing::warn!(job = %id, attempt = attempts, error = %e, "poll attempt failed, will retry");
            }
        }

        let Some(wait) = next_wait(&mut intervals, deadline) else {
            inner.fail(&id, format!("no result within {:?}", policy.timeout));
            return;
        };
        if !pause(&stop, wait).await {
            tracing::debug!(job = %id, attempts, "job loop stopped");
            return;
        }
    }
}

/// Poll inline with the same backoff rules, for providers whose synchronous
/// operations are backed by a queue. Returns the completed result payload.
pub async fn poll_until_complete<F, Fut>(
    policy: &PollPolicy,
    cancel: &CancellationToken,
    mut poll: F,
) -> Result<serde_json::Value>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<PollOutcome>>,
{
    let deadline = policy.deadline();
    let mut intervals = policy.intervals();
    let mut last_error: Option<RelayError> = None;

    let first = next_wait(&mut intervals, deadline).unwrap_or(policy.initial_interval);
    if !pause(cancel, first).await {
        return Err(RelayError::transport("request cancelled while waiting for provider"));
    }

    for attempt in 1..=policy.max_attempts {
        if Instant::now() >= deadline {
            break;
        }
        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                return Err(RelayError::transport("request cancelled while waiting for provider"));
            }
            outcome = poll() => outcome,
        };
        match outcome {
            Ok(outcome) if outcome.completed => {
                return Ok(outcome.result.unwrap_or(serde_json::Value::Null));
            }
            Ok(_) => {}
            Err(e @ RelayError::PollFatal { .. }) => return Err(e),
            Err(e) => {
                tracing::warn!(attempt, error = %e, "inline poll failed, will retry");
                last_error = Some(e);
            }
        }

        let Some(wait) = next_wait(&mut intervals, deadline) else {
            break;
        };
        if !pause(cancel, wait).await {
            return Err(RelayError::transport("request cancelled while waiting for provider"));
        }
    }

    Err(RelayError::Timeout(match last_error {
        Some(e) => format!("provider did not finish in time (last error: {e})"),
        None => "provider did not finish in time".to_string(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    fn options(ttl_secs: u64) -> TrackerOptions {
        TrackerOptions {
            ttl: Duration::from_secs(ttl_secs),
            sweep_interval: Duration::from_secs(1),
            policy: PollPolicy {
                max_attempts: 10,
                initial_interval: Duration::from_secs(1),
                max_interval: Duration::from_secs(4),
                backoff_factor: 2.0,
                timeout: Duration::from_secs(120),
            },
        }
    }

    /// Poller that reports "not yet" `pending` times, then completes.
    fn completes_after(pending: u32, calls: Arc<AtomicU32>) -> Arc<dyn Poller> {
        Arc::new(move || {
            let calls = Arc::clone(&calls);
            async move {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                if n > pending {
                    Ok(PollOutcome::completed(json!({"url": "https://cdn/video.mp4"})))
                } else {
                    Ok(PollOutcome::in_progress(json!({"progress": n})))
                }
            }
        })
    }

    #[tokio::test(start_paused = true)]
    async fn submit_returns_pending_immediately() {
        let tracker = JobTracker::new(options(60));
        let calls = Arc::new(AtomicU32::new(0));
        let id = tracker.submit("ext-1", completes_after(0, Arc::clone(&calls)), HashMap::new());

        let snap = tracker.get_result(&id).unwrap();
        assert_eq!(snap.state, JobState::Pending);
        assert_eq!(snap.external_id, "ext-1");
        assert_ne!(snap.id, "ext-1");
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        tracker.shutdown();
    }

    #[tokio::test(start_paused = true)]
    async fn job_walks_pending_processing_completed() {
        let tracker = JobTracker::new(options(3600));
        let calls = Arc::new(AtomicU32::new(0));
        let id = tracker.submit("ext", completes_after(2, Arc::clone(&calls)), HashMap::new());

        tokio::time::sleep(Duration::from_secs(30)).await;

        let snap = tracker.get_result(&id).unwrap();
        assert_eq!(snap.state, JobState::Completed);
        assert_eq!(
            snap.history,
            vec![JobState::Pending, JobState::Processing, JobState::Completed]
        );
        assert_eq!(snap.attempts, 3);
        assert_eq!(snap.result, Some(json!({"url": "https://cdn/video.mp4"})));
        assert!(snap.stopped);
        assert!(snap.completed_at.is_some());
        tracker.shutdown();
    }

    #[tokio::test(start_paused = true)]
    async fn partial_results_are_visible_while_processing() {
        let tracker = JobTracker::new(options(3600));
        let calls = Arc::new(AtomicU32::new(0));
        let id = tracker.submit("ext", completes_after(100, Arc::clone(&calls)), HashMap::new());

        // First poll at t=1s, second at t=3s.
        tokio::time::sleep(Duration::from_millis(3_500)).await;
        let snap = tracker.get_result(&id).unwrap();
        assert_eq!(snap.state, JobState::Processing);
        assert_eq!(snap.result, Some(json!({"progress": 2})));
        tracker.shutdown();
    }

    #[tokio::test(start_paused = true)]
    async fn backoff_grows_and_caps() {
        let tracker = JobTracker::new(options(3600));
        let start = Instant::now();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_in_poller = Arc::clone(&seen);
        let poller: Arc<dyn Poller> = Arc::new(move || {
            let seen = Arc::clone(&seen_in_poller);
            async move {
                let mut seen = seen.lock().unwrap();
                seen.push(Instant::now().duration_since(start).as_secs());
                if seen.len() == 5 {
                    Ok(PollOutcome::completed(json!(null)))
                } else {
                    Ok(PollOutcome::pending())
                }
            }
        });
        tracker.submit("ext", poller, HashMap::new());

        tokio::time::sleep(Duration::from_secs(60)).await;
        // 1s initial delay, then gaps of 2, 4, 4, 4 (capped).
        assert_eq!(*seen.lock().unwrap(), vec![1, 3, 7, 11, 15]);
        tracker.shutdown();
    }

    #[tokio::test(start_paused = true)]
    async fn unbounded_factor_caps_at_max_interval() {
        let mut opts = options(5);
        opts.policy.backoff_factor = f64::INFINITY;
        opts.policy.max_attempts = 5;
        opts.policy.timeout = Duration::from_secs(20);
        let tracker = JobTracker::new(opts);
        let calls = Arc::new(AtomicU32::new(0));
        let id = tracker.submit("ext", completes_after(1_000, Arc::clone(&calls)), HashMap::new());

        // Polls at 1, 5, 9, 13 and 17s; the job fails when the 20s deadline hits.
        tokio::time::sleep(Duration::from_secs(21)).await;
        let snap = tracker.get_result(&id).unwrap();
        assert_eq!(snap.state, JobState::Failed);
        assert_eq!(calls.load(Ordering::SeqCst), 5);

        tokio::time::sleep(Duration::from_secs(600)).await;
        assert!(tracker.get_result(&id).is_none());
        tracker.shutdown();
    }

    #[tokio::test(start_paused = true)]
    async fn huge_timeout_still_hits_attempt_ceiling() {
        let mut opts = options(3600);
        opts.policy.max_attempts = 3;
        opts.policy.timeout = Duration::from_secs(u64::MAX);
        let tracker = JobTracker::new(opts);
        let calls = Arc::new(AtomicU32::new(0));
        let id = tracker.submit("ext", completes_after(1_000, Arc::clone(&calls)), HashMap::new());

        tokio::time::sleep(Duration::from_secs(60)).await;
        let snap = tracker.get_result(&id).unwrap();
        assert_eq!(snap.state, JobState::Failed);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        tracker.shutdown();
    }

    #[tokio::test(start_paused = true)]
    async fn transient_errors_are_retried() {
        let tracker = JobTracker::new(options(3600));
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        let poller: Arc<dyn Poller> = Arc::new(move || {
            let counter = Arc::clone(&counter);
            async move {
                if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(RelayError::transport("connection refused"))
                } else {
                    Ok(PollOutcome::completed(json!("done")))
                }
            }
        });
        let id = tracker.submit("ext", poller, HashMap::new());

        tokio::time::sleep(Duration::from_secs(60)).await;
        let snap = tracker.get_result(&id).unwrap();
        assert_eq!(snap.state, JobState::Completed);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        tracker.shutdown();
    }

    #[tokio::test(start_paused = true)]
    async fn fatal_poll_fails_job_with_reason() {
        let tracker = JobTracker::new(options(3600));
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        let poller: Arc<dyn Poller> = Arc::new(move || {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(RelayError::poll_fatal("content policy violation"))
            }
        });
        let id = tracker.submit("ext", poller, HashMap::new());

        tokio::time::sleep(Duration::from_secs(60)).await;
        let snap = tracker.get_result(&id).unwrap();
        assert_eq!(snap.state, JobState::Failed);
        assert_eq!(snap.reason.as_deref(), Some("content policy violation"));
        assert_eq!(
            snap.history,
            vec![JobState::Pending, JobState::Processing, JobState::Failed]
        );
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        tracker.shutdown();
    }

    #[tokio::test(start_paused = true)]
    async fn attempt_ceiling_forces_failure() {
        let mut opts = options(3600);
        opts.policy.max_attempts = 3;
        let tracker = JobTracker::new(opts);
        let calls = Arc::new(AtomicU32::new(0));
        let id = tracker.submit("ext", completes_after(100, Arc::clone(&calls)), HashMap::new());

        tokio::time::sleep(Duration::from_secs(60)).await;
        let snap = tracker.get_result(&id).unwrap();
        assert_eq!(snap.state, JobState::Failed);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(snap.reason.unwrap().contains("3 poll attempts"));
        tracker.shutdown();
    }

    #[tokio::test(start_paused = true)]
    async fn wall_clock_timeout_forces_failure() {
        let mut opts = options(3600);
        opts.policy.max_attempts = 1_000;
        opts.policy.timeout = Duration::from_secs(10);
        let tracker = JobTracker::new(opts);
        let calls = Arc::new(AtomicU32::new(0));
        let id = tracker.submit("ext", completes_after(1_000, Arc::clone(&calls)), HashMap::new());

        tokio::time::sleep(Duration::from_secs(30)).await;
        let snap = tracker.get_result(&id).unwrap();
        assert_eq!(snap.state, JobState::Failed);
        assert!(calls.load(Ordering::SeqCst) < 10);
        tracker.shutdown();
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_stops_polling_and_keeps_state() {
        let tracker = JobTracker::new(options(3600));
        let calls = Arc::new(AtomicU32::new(0));
        let id = tracker.submit("ext", completes_after(0, Arc::clone(&calls)), HashMap::new());

        assert!(tracker.cancel(&id));
        tokio::time::sleep(Duration::from_secs(30)).await;

        let snap = tracker.get_result(&id).unwrap();
        assert_eq!(snap.state, JobState::Pending);
        assert_eq!(snap.history, vec![JobState::Pending]);
        assert!(snap.stopped);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        tracker.shutdown();
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_on_terminal_job_is_a_no_op() {
        let tracker = JobTracker::new(options(3600));
        let calls = Arc::new(AtomicU32::new(0));
        let id = tracker.submit("ext", completes_after(0, Arc::clone(&calls)), HashMap::new());
        tokio::time::sleep(Duration::from_secs(5)).await;

        let before = tracker.get_result(&id).unwrap();
        assert_eq!(before.state, JobState::Completed);

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(!tracker.cancel(&id));
        let after = tracker.get_result(&id).unwrap();
        assert_eq!(after.updated_at, before.updated_at);
        assert_eq!(after.state, JobState::Completed);

        assert!(!tracker.cancel("no-such-job"));
        tracker.shutdown();
    }

    #[tokio::test(start_paused = true)]
    async fn finished_jobs_expire_after_ttl() {
        let tracker = JobTracker::new(options(10));
        let calls = Arc::new(AtomicU32::new(0));
        let id = tracker.submit("ext", completes_after(0, Arc::clone(&calls)), HashMap::new());

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(tracker.get_result(&id).unwrap().state, JobState::Completed);

        tokio::time::sleep(Duration::from_secs(15)).await;
        assert!(tracker.get_result(&id).is_none());
        assert!(tracker.is_empty());
        tracker.shutdown();
    }

    #[tokio::test(start_paused = true)]
    async fn running_jobs_survive_the_sweep() {
        let tracker = JobTracker::new(options(2));
        let calls = Arc::new(AtomicU32::new(0));
        let id = tracker.submit("ext", completes_after(1_000, Arc::clone(&calls)), HashMap::new());

        tokio::time::sleep(Duration::from_secs(20)).await;
        assert_eq!(tracker.get_result(&id).unwrap().state, JobState::Processing);
        tracker.shutdown();
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_forgets_everything() {
        let tracker = JobTracker::new(options(3600));
        let calls = Arc::new(AtomicU32::new(0));
        let id = tracker.submit("ext", completes_after(1_000, Arc::clone(&calls)), HashMap::new());
        tokio::time::sleep(Duration::from_secs(3)).await;

        tracker.shutdown();
        assert!(tracker.get_result(&id).is_none());
        let polled = calls.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(calls.load(Ordering::SeqCst), polled);
    }

    #[tokio::test(start_paused = true)]
    async fn inline_polling_returns_completed_payload() {
        let policy = options(0).policy;
        let calls = Arc::new(AtomicU32::new(0));
        let poller = completes_after(2, Arc::clone(&calls));
        let value = poll_until_complete(&policy, &CancellationToken::new(), || poller.poll())
            .await
            .unwrap();
        assert_eq!(value["url"], "https://cdn/video.mp4");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn inline_polling_stops_on_fatal_and_times_out() {
        let policy = options(0).policy;
        let err = poll_until_complete(&policy, &CancellationToken::new(), || async {
            Err::<PollOutcome, _>(RelayError::poll_fatal("task was canceled"))
        })
        .await
        .unwrap_err();
        assert_eq!(err.kind(), "poll_fatal");

        let mut short = policy.clone();
        short.max_attempts = 2;
        let err = poll_until_complete(&short, &CancellationToken::new(), || async {
            Ok(PollOutcome::pending())
        })
        .await
        .unwrap_err();
        assert_eq!(err.kind(), "timeout");
    }

    #[tokio::test(start_paused = true)]
    async fn inline_polling_survives_extreme_policy() {
        let policy = PollPolicy {
            max_attempts: 3,
            initial_interval: Duration::from_millis(10),
            max_interval: Duration::from_secs(1),
            backoff_factor: f64::INFINITY,
            timeout: Duration::from_secs(u64::MAX),
        };
        let err = poll_until_complete(&policy, &CancellationToken::new(), || async {
            Ok(PollOutcome::pending())
        })
        .await
        .unwrap_err();
        assert_eq!(err.kind(), "timeout");
    }
}

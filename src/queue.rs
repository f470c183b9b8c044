//! Bounded-concurrency FIFO job runner.
//!
//! Scheduling policy: a failed attempt is pushed back onto the *tail* of the
//! queue rather than retried in place, so every other pending job gets a turn
//! before the retry. Retries are bounded by `max_retries`; after that the job
//! is recorded as a terminal failure and its handle is rejected.

use std::collections::VecDeque;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use tracing::{error, info, warn};

use crate::config::QueueSettings;
use crate::error::QueueError;

pub type JobFuture<T> = Pin<Box<dyn Future<Output = anyhow::Result<T>> + Send>>;

/// A re-invocable job: each attempt calls the factory for a fresh future.
pub type Job<T> = Arc<dyn Fn() -> JobFuture<T> + Send + Sync>;

type Reply<T> = oneshot::Sender<Result<T, QueueError>>;

/// Wrap an async closure as a [`Job`].
pub fn job<T, F, Fut>(f: F) -> Job<T>
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
{
    Arc::new(move || Box::pin(f()) as JobFuture<T>)
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobMeta {
    pub name: String,
    pub url: String,
    pub index: usize,
    pub total: usize,
}

#[derive(Debug, Clone)]
pub struct CompletedJob<T> {
    pub metadata: JobMeta,
    pub result: T,
    pub retries: u32,
}

/// A job that exhausted its retries. Serialized as-is into the failed-targets report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailedJob {
    pub metadata: JobMeta,
    pub error: String,
    pub attempts: u32,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueSummary {
    pub total: usize,
    pub successful: usize,
    pub failed: usize,
    /// Percentage, 0 when nothing ran.
    pub success_rate: f64,
}

impl fmt::Display for QueueSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{} succeeded, {} failed ({:.2}%)",
            self.successful, self.total, self.failed, self.success_rate
        )
    }
}

struct QueueItem<T> {
    job: Job<T>,
    metadata: JobMeta,
    retry_count: u32,
    max_retries: u32,
    reply: Reply<T>,
}

struct QueueState<T> {
    pending: VecDeque<QueueItem<T>>,
    running: usize,
    completed: Vec<CompletedJob<T>>,
    failed: Vec<FailedJob>,
}

struct Shared<T> {
    concurrency: usize,
    max_retries: u32,
    poll_interval: Duration,
    state: Mutex<QueueState<T>>,
}

impl<T> Shared<T> {
    fn state(&self) -> MutexGuard<'_, QueueState<T>> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Resolves once the submitted job succeeds or is terminally failed.
pub struct JobHandle<T> {
    name: String,
    rx: oneshot::Receiver<Result<T, QueueError>>,
}

impl<T> JobHandle<T> {
    pub async fn wait(self) -> Result<T, QueueError> {
        let JobHandle { name, rx } = self;
        rx.await.unwrap_or_else(|_| Err(QueueError::Dropped(name)))
    }
}

pub struct TaskQueue<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for TaskQueue<T> {
    fn clone(&self) -> Self {
        TaskQueue {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T: Clone + Send + 'static> TaskQueue<T> {
    pub fn new(concurrency: usize, max_retries: u32) -> Self {
        Self::build(concurrency, max_retries, Duration::from_millis(100))
    }

    pub fn from_settings(settings: &QueueSettings) -> Self {
        Self::build(
            settings.concurrency,
            settings.max_retries,
            Duration::from_millis(settings.poll_interval_ms),
        )
    }

    pub fn with_poll_interval(self, poll_interval: Duration) -> Self {
        Self::build(self.shared.concurrency, self.shared.max_retries, poll_interval)
    }

    fn build(concurrency: usize, max_retries: u32, poll_interval: Duration) -> Self {
        TaskQueue {
            shared: Arc::new(Shared {
                concurrency: concurrency.max(1),
                max_retries,
                poll_interval,
                state: Mutex::new(QueueState {
                    pending: VecDeque::new(),
                    running: 0,
                    completed: Vec::new(),
                    failed: Vec::new(),
                }),
            }),
        }
    }

    /// Enqueue a job at the tail. Must be called from within a Tokio runtime.
    pub fn submit(&self, job: Job<T>, metadata: JobMeta) -> JobHandle<T> {
        let (reply, rx) = oneshot::channel();
        let name = metadata.name.clone();
        {
            let mut state = self.shared.state();
            state.pending.push_back(QueueItem {
                job,
                metadata,
                retry_count: 0,
                max_retries: self.shared.max_retries,
                reply,
            });
        }
        advance(&self.shared);
        JobHandle { name, rx }
    }

    /// Block until nothing is pending or running.
    pub async fn wait_for_completion(&self) {
        while !self.is_idle() {
            tokio::time::sleep(self.shared.poll_interval).await;
        }
    }

    pub fn is_idle(&self) -> bool {
        let state = self.shared.state();
        state.running == 0 && state.pending.is_empty()
    }

    pub fn summary(&self) -> QueueSummary {
        let state = self.shared.state();
        let successful = state.completed.len();
        let failed = state.failed.len();
        let total = successful + failed;
        let success_rate = if total == 0 {
            0.0
        } else {
            successful as f64 / total as f64 * 100.0
        };
        QueueSummary {
            total,
            successful,
            failed,
            success_rate,
        }
    }

    pub fn completed(&self) -> Vec<CompletedJob<T>> {
        self.shared.state().completed.clone()
    }

    pub fn failures(&self) -> Vec<FailedJob> {
        self.shared.state().failed.clone()
    }

    /// Forget accumulated outcomes. Pending work is left alone.
    pub fn reset(&self) {
        let mut state = self.shared.state();
        state.completed.clear();
        state.failed.clear();
    }
}

fn advance<T: Clone + Send + 'static>(shared: &Arc<Shared<T>>) {
    let mut to_start = Vec::new();
    {
        let mut state = shared.state();
        while state.running < shared.concurrency {
            let Some(item) = state.pending.pop_front() else {
                break;
            };
            state.running += 1;
            to_start.push(item);
        }
    }
    for item in to_start {
        tokio::spawn(run_item(Arc::clone(shared), item));
    }
}

fn run_item<T: Clone + Send + 'static>(
    shared: Arc<Shared<T>>,
    mut item: QueueItem<T>,
) -> Pin<Box<dyn Future<Output = ()> + Send>> {
    Box::pin(async move {
        let remaining = shared.state().pending.len();
        info!(
            job = %item.metadata.name,
            attempt = item.retry_count + 1,
            remaining,
            "Running job"
        );

        // Run on its own task so a panic surfaces as a JoinError instead of
        // leaving `running` permanently incremented.
        let outcome = match tokio::spawn((item.job)()).await {
            Ok(result) => result,
            Err(join_err) => Err(anyhow::anyhow!("job panicked: {}", join_err)),
        };

        {
            let mut state = shared.state();
            state.running -= 1;
            match outcome {
                Ok(result) => {
                    info!(job = %item.metadata.name, retries = item.retry_count, "Job succeeded");
                    state.completed.push(CompletedJob {
                        metadata: item.metadata,
                        result: result.clone(),
                        retries: item.retry_count,
                    });
                    let _ = item.reply.send(Ok(result));
                }
                Err(err) if item.retry_count < item.max_retries => {
                    item.retry_count += 1;
                    warn!(
                        job = %item.metadata.name,
                        retry = item.retry_count,
                        max_retries = item.max_retries,
                        error = %err,
                        "Job failed, requeued at tail"
                    );
                    state.pending.push_back(item);
                }
                Err(err) => {
                    let attempts = item.retry_count + 1;
                    let reason = format!("{:#}", err);
                    error!(job = %item.metadata.name, attempts, error = %reason, "Job failed permanently");
                    state.failed.push(FailedJob {
                        metadata: item.metadata.clone(),
                        error: reason.clone(),
                        attempts,
                        timestamp: Utc::now(),
                    });
                    let _ = item.reply.send(Err(QueueError::Exhausted {
                        name: item.metadata.name,
                        attempts,
                        reason,
                    }));
                }
            }
        }

        advance(&shared);
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};

    fn meta(name: &str) -> JobMeta {
        JobMeta {
            name: name.to_string(),
            url: format!("https://example.com/{}", name),
            index: 0,
            total: 0,
        }
    }

    fn queue(concurrency: usize, max_retries: u32) -> TaskQueue<u32> {
        TaskQueue::new(concurrency, max_retries).with_poll_interval(Duration::from_millis(5))
    }

    /// A job that fails its first `failures` attempts, then returns `value`.
    fn flaky(attempts: Arc<AtomicU32>, failures: u32, value: u32) -> Job<u32> {
        job(move || {
            let attempts = Arc::clone(&attempts);
            async move {
                let n = attempts.fetch_add(1, Ordering::SeqCst);
                if n < failures {
                    anyhow::bail!("attempt {} failed", n + 1);
                }
                Ok(value)
            }
        })
    }

    #[tokio::test]
    async fn always_failing_job_is_attempted_max_retries_plus_one() {
        let q = queue(1, 2);
        let attempts = Arc::new(AtomicU32::new(0));
        let handle = q.submit(flaky(Arc::clone(&attempts), u32::MAX, 0), meta("broken"));

        let err = handle.wait().await.unwrap_err();
        q.wait_for_completion().await;

        assert_eq!(attempts.load(Ordering::SeqCst), 3);
        assert!(matches!(err, QueueError::Exhausted { attempts: 3, .. }));
        let summary = q.summary();
        assert_eq!((summary.total, summary.successful, summary.failed), (1, 0, 1));
        assert_eq!(q.failures()[0].attempts, 3);
    }

    #[tokio::test]
    async fn fail_once_then_succeed_records_one_retry() {
        let q = queue(1, 2);
        let attempts = Arc::new(AtomicU32::new(0));
        let handle = q.submit(flaky(Arc::clone(&attempts), 1, 7), meta("flaky"));

        assert_eq!(handle.wait().await.unwrap(), 7);
        q.wait_for_completion().await;

        let completed = q.completed();
        assert_eq!(completed.len(), 1);
        assert_eq!(completed[0].retries, 1);
        assert_eq!(q.summary().success_rate, 100.0);
    }

    #[tokio::test]
    async fn one_failure_does_not_block_siblings() {
        let q = queue(1, 1);
        let bad = q.submit(flaky(Arc::new(AtomicU32::new(0)), u32::MAX, 0), meta("bad"));
        let good = q.submit(flaky(Arc::new(AtomicU32::new(0)), 0, 42), meta("good"));

        assert!(bad.wait().await.is_err());
        assert_eq!(good.wait().await.unwrap(), 42);
        q.wait_for_completion().await;

        let summary = q.summary();
        assert_eq!((summary.successful, summary.failed), (1, 1));
        assert_eq!(summary.success_rate, 50.0);
    }

    #[tokio::test]
    async fn retries_go_to_the_tail() {
        let q = queue(1, 1);
        let order = Arc::new(Mutex::new(Vec::new()));
        let mut handles = Vec::new();
        for name in ["a", "b", "c"] {
            let order = Arc::clone(&order);
            let attempts = Arc::new(AtomicU32::new(0));
            let task = job(move || {
                let order = Arc::clone(&order);
                let attempts = Arc::clone(&attempts);
                async move {
                    order.lock().unwrap().push(name);
                    if name == "a" && attempts.fetch_add(1, Ordering::SeqCst) == 0 {
                        anyhow::bail!("first try of a");
                    }
                    Ok(1)
                }
            });
            handles.push(q.submit(task, meta(name)));
        }
        for h in handles {
            h.wait().await.unwrap();
        }
        assert_eq!(*order.lock().unwrap(), vec!["a", "b", "c", "a"]);
    }

    #[tokio::test]
    async fn concurrency_is_bounded() {
        let q = queue(2, 0);
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let mut handles = Vec::new();
        for i in 0..6 {
            let running = Arc::clone(&running);
            let peak = Arc::clone(&peak);
            let task = job(move || {
                let running = Arc::clone(&running);
                let peak = Arc::clone(&peak);
                async move {
                    let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    running.fetch_sub(1, Ordering::SeqCst);
                    Ok(i)
                }
            });
            handles.push(q.submit(task, meta(&format!("job{}", i))));
        }
        for h in handles {
            h.wait().await.unwrap();
        }
        assert_eq!(peak.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn panicking_job_counts_as_failure() {
        let q = queue(1, 0);
        let task: Job<u32> = job(|| async {
            if true {
                panic!("boom");
            }
            Ok(0)
        });
        let handle = q.submit(task, meta("panics"));
        assert!(handle.wait().await.is_err());
        q.wait_for_completion().await;
        assert!(q.is_idle());
        assert_eq!(q.summary().failed, 1);
    }

    #[tokio::test]
    async fn reset_clears_outcomes() {
        let q = queue(1, 0);
        q.submit(flaky(Arc::new(AtomicU32::new(0)), 0, 1), meta("one"))
            .wait()
            .await
            .unwrap();
        q.wait_for_completion().await;
        assert_eq!(q.summary().total, 1);
        q.reset();
        assert_eq!(q.summary(), QueueSummary::default());
    }
}

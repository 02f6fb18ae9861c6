//! Task Broker (TB): a durable, in-process FIFO queue carrying accepted
//! jobs from the admission core to a pool of workers, with a reply channel
//! keyed by job id.
//!
//! Generic over a job payload `P` and its terminal outcome `O` so this
//! crate never needs to know what a query job or its result look like —
//! that lives in the core, which is the only thing that imports both this
//! crate and the backend registry.

pub mod backoff;

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot, Mutex as AsyncMutex};
use uuid::Uuid;

use lomas_error::BrokerError;

/// Job lifecycle. Transitions `New -> Queued` and `Queued -> Running` are
/// broker-driven; the terminal transition is worker-driven.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    New,
    Queued,
    Running,
    Ok,
    LibFail,
    InternalFail,
}

impl JobState {
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Ok | Self::LibFail | Self::InternalFail)
    }
}

struct JobRecord {
    state: JobState,
    running_since: Option<Instant>,
}

/// Configuration for a `TaskBroker`.
#[derive(Debug, Clone, Copy)]
pub struct BrokerConfig {
    /// Bounded queue capacity; an `enqueue` beyond this returns
    /// `BrokerError::Backpressure` before any budget is debited.
    pub high_water_mark: usize,
    /// How long a job may stay `Running` before the sweep declares its
    /// worker lost and surfaces a visible `INTERNAL_FAIL`.
    pub visibility_timeout: Duration,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self { high_water_mark: 256, visibility_timeout: Duration::from_secs(30) }
    }
}

/// Durable (for the lifetime of the process) FIFO job queue with
/// at-least-once delivery and job-id deduplication of terminal replies.
pub struct TaskBroker<P, O> {
    sender: mpsc::Sender<(Uuid, P)>,
    receiver: AsyncMutex<mpsc::Receiver<(Uuid, P)>>,
    jobs: DashMap<Uuid, JobRecord>,
    replies: DashMap<Uuid, oneshot::Sender<O>>,
    depth: AtomicUsize,
    config: BrokerConfig,
}

impl<P: Send + 'static, O: Send + 'static> TaskBroker<P, O> {
    #[must_use]
    pub fn new(config: BrokerConfig) -> Self {
        let (sender, receiver) = mpsc::channel(config.high_water_mark);
        Self {
            sender,
            receiver: AsyncMutex::new(receiver),
            jobs: DashMap::new(),
            replies: DashMap::new(),
            depth: AtomicUsize::new(0),
            config,
        }
    }

    /// Accept `payload` for execution, returning its job id and a receiver
    /// for the terminal outcome. Fails with `BrokerError::Backpressure`
    /// when the backlog is at `high_water_mark` — the caller (ABE) must
    /// reject the admission before debiting any budget.
    ///
    /// # Errors
    ///
    /// Returns `BrokerError::Backpressure` if the queue is full.
    pub fn enqueue(&self, payload: P) -> Result<(Uuid, oneshot::Receiver<O>), BrokerError> {
        let job_id = Uuid::new_v4();
        self.sender
            .try_send((job_id, payload))
            .map_err(|_| BrokerError::Backpressure)?;

        let (tx, rx) = oneshot::channel();
        self.jobs.insert(job_id, JobRecord { state: JobState::Queued, running_since: None });
        self.replies.insert(job_id, tx);
        self.depth.fetch_add(1, Ordering::SeqCst);
        Ok((job_id, rx))
    }

    /// Pull the next job for a worker to run, transitioning it to
    /// `Running`. Returns `None` once the broker has been shut down (every
    /// sender dropped).
    pub async fn dequeue(&self) -> Option<(Uuid, P)> {
        let next = self.receiver.lock().await.recv().await;
        if let Some((job_id, _)) = &next {
            self.depth.fetch_sub(1, Ordering::SeqCst);
            if let Some(mut record) = self.jobs.get_mut(job_id) {
                record.state = JobState::Running;
                record.running_since = Some(Instant::now());
            }
        }
        next
    }

    /// Record a terminal outcome and deliver it through the job's reply
    /// channel. A second `complete` for an already-terminal job is a no-op
    /// (deduplicates at-least-once redelivery).
    pub fn complete(&self, job_id: Uuid, state: JobState, outcome: O) {
        debug_assert!(state.is_terminal());
        if !self.mark_terminal(job_id, state) {
            return;
        }
        if let Some((_, tx)) = self.replies.remove(&job_id) {
            let _ = tx.send(outcome);
        }
    }

    /// Declare a job's worker lost (panicked, or ran past the visibility
    /// timeout) without an outcome value. The reply sender is dropped, so
    /// the caller's receiver resolves to a `RecvError` it treats the same
    /// as a dispatch timeout.
    pub fn fail_lost(&self, job_id: Uuid) {
        if !self.mark_terminal(job_id, JobState::InternalFail) {
            return;
        }
        self.replies.remove(&job_id);
    }

    fn mark_terminal(&self, job_id: Uuid, state: JobState) -> bool {
        match self.jobs.get_mut(&job_id) {
            Some(mut record) if !record.state.is_terminal() => {
                record.state = state;
                true
            },
            _ => false,
        }
    }

    #[must_use]
    pub fn status(&self, job_id: Uuid) -> Option<JobState> {
        self.jobs.get(&job_id).map(|r| r.state)
    }

    #[must_use]
    pub fn queue_depth(&self) -> usize {
        self.depth.load(Ordering::SeqCst)
    }

    /// Non-blocking, best-effort check of whether `enqueue` would currently
    /// succeed. Used by the caller to reject an admission *before* it
    /// debits any budget (spec.md §4.4, "ABE rejects new admissions with a
    /// retryable signal before debiting"). Racy by nature — a concurrent
    /// enqueue can still observe `Backpressure` immediately after this
    /// returns `true` — so callers that already debited must compensate on
    /// that rare loss.
    #[must_use]
    pub fn has_capacity(&self) -> bool {
        self.sender.capacity() > 0
    }

    /// Mark as lost any job that has been `Running` longer than
    /// `visibility_timeout`. Intended to be called periodically by a
    /// background sweep task.
    pub fn sweep_lost_jobs(&self) {
        let stale: Vec<Uuid> = self
            .jobs
            .iter()
            .filter(|entry| {
                let record = entry.value();
                record.state == JobState::Running
                    && record.running_since.is_some_and(|t| t.elapsed() > self.config.visibility_timeout)
            })
            .map(|entry| *entry.key())
            .collect();

        for job_id in stale {
            tracing::warn!(%job_id, "worker visibility timeout exceeded, marking job lost");
            self.fail_lost(job_id);
        }
    }
}

/// A pool of workers pulling jobs from a `TaskBroker` and running them
/// through a caller-supplied handler. Each dequeued job runs in its own
/// `tokio::spawn`, so a handler panic is isolated to that job instead of
/// taking down the worker loop.
pub struct WorkerPool;

impl WorkerPool {
    /// Spawn `workers` worker loops against `broker`, each calling
    /// `handler` for every dequeued job.
    pub fn spawn<P, O, F, Fut>(broker: Arc<TaskBroker<P, O>>, workers: usize, handler: F) -> Self
    where
        P: Send + 'static,
        O: Send + 'static,
        F: Fn(P) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = (JobState, O)> + Send + 'static,
    {
        let handler = Arc::new(handler);
        for _ in 0..workers {
            let broker = broker.clone();
            let handler = handler.clone();
            tokio::spawn(async move {
                while let Some((job_id, payload)) = broker.dequeue().await {
                    let fut = handler(payload);
                    match tokio::spawn(fut).await {
                        Ok((state, outcome)) => broker.complete(job_id, state, outcome),
                        Err(join_error) => {
                            tracing::error!(%job_id, %join_error, "worker task lost mid-job");
                            broker.fail_lost(job_id);
                        },
                    }
                }
            });
        }
        Self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration as StdDuration;

    #[tokio::test]
    async fn enqueue_dequeue_complete_round_trip() {
        let broker = Arc::new(TaskBroker::<&'static str, u32>::new(BrokerConfig::default()));
        let (job_id, rx) = broker.enqueue("payload").unwrap();

        let (dequeued_id, payload) = broker.dequeue().await.unwrap();
        assert_eq!(dequeued_id, job_id);
        assert_eq!(payload, "payload");
        assert_eq!(broker.status(job_id), Some(JobState::Running));

        broker.complete(job_id, JobState::Ok, 42);
        assert_eq!(rx.await.unwrap(), 42);
        assert_eq!(broker.status(job_id), Some(JobState::Ok));
    }

    #[tokio::test]
    async fn backpressure_rejects_beyond_high_water_mark() {
        let broker = TaskBroker::<u32, u32>::new(BrokerConfig { high_water_mark: 1, ..Default::default() });
        broker.enqueue(1).unwrap();
        let err = broker.enqueue(2).unwrap_err();
        assert!(matches!(err, BrokerError::Backpressure));
    }

    #[tokio::test]
    async fn duplicate_completion_is_ignored() {
        let broker = Arc::new(TaskBroker::<u32, u32>::new(BrokerConfig::default()));
        let (job_id, rx) = broker.enqueue(1).unwrap();
        broker.dequeue().await.unwrap();

        broker.complete(job_id, JobState::Ok, 1);
        broker.complete(job_id, JobState::LibFail, 2);

        assert_eq!(rx.await.unwrap(), 1);
        assert_eq!(broker.status(job_id), Some(JobState::Ok));
    }

    #[tokio::test]
    async fn sweep_marks_stale_running_job_lost() {
        let broker = Arc::new(TaskBroker::<u32, u32>::new(BrokerConfig {
            high_water_mark: 16,
            visibility_timeout: StdDuration::from_millis(10),
        }));
        let (job_id, rx) = broker.enqueue(1).unwrap();
        broker.dequeue().await.unwrap();

        tokio::time::sleep(StdDuration::from_millis(30)).await;
        broker.sweep_lost_jobs();

        assert_eq!(broker.status(job_id), Some(JobState::InternalFail));
        assert!(rx.await.is_err());
    }

    #[tokio::test]
    async fn worker_pool_drives_jobs_through_handler() {
        let broker = Arc::new(TaskBroker::<u32, u32>::new(BrokerConfig::default()));
        let _pool = WorkerPool::spawn(broker.clone(), 2, |payload: u32| async move {
            (JobState::Ok, payload * 2)
        });

        let (_job_id, rx) = broker.enqueue(21).unwrap();
        assert_eq!(rx.await.unwrap(), 42);
    }
}

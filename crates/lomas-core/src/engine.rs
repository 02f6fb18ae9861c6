//! Admission & Budget Engine (ABE): the eight-step admission protocol
//! binding the Administration Store, the Data Connector Cache, the DP
//! Backend Registry, and the Task Broker together.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use serde_json::Value;
use tokio::sync::Semaphore;
use uuid::Uuid;

use lomas_broker::backoff::{calculate_backoff, BackoffStrategy};
use lomas_broker::{JobState, TaskBroker, WorkerPool};
use lomas_cache::{ConnectorCache, TabularView};
use lomas_dbr::{BackendRegistry, LibraryTag, QueryOutcome, Querier};
use lomas_error::{CoreError, InvalidQueryReason, StoreError, UnauthorizedReason};
use lomas_store::{AdminStore, Archive, ArchiveStatus, Budget, MetadataStore};

use crate::job::{JobOutcome, QueryJob};
use crate::timing::TimingShaper;

/// Tuning knobs for the admission protocol, independent of any one
/// `(user, dataset)` pair.
#[derive(Debug, Clone, Copy)]
pub struct AdmissionConfig {
    /// Process-wide cap on in-flight admissions (spec.md §4.1 gate 1).
    pub submit_limit: usize,
    /// How many times a lost CAS race is retried before the admission
    /// fails with `INTERNAL_ERROR`.
    pub cas_retry_limit: u32,
    /// Delay curve applied between CAS retries (debit and compensate) so a
    /// busy `(user, dataset)` pair doesn't spin the store with back-to-back
    /// re-reads.
    pub cas_backoff_strategy: BackoffStrategy,
    /// First retry's delay, in milliseconds.
    pub cas_backoff_initial_ms: u64,
    /// Delay cap, in milliseconds.
    pub cas_backoff_max_ms: u64,
    /// How long `execute_query` waits on the worker reply before treating
    /// the job as a timeout (no compensation — spec.md §7).
    pub dispatch_timeout: Duration,
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            submit_limit: 64,
            cas_retry_limit: 5,
            cas_backoff_strategy: BackoffStrategy::Exponential,
            cas_backoff_initial_ms: 5,
            cas_backoff_max_ms: 200,
            dispatch_timeout: Duration::from_secs(30),
        }
    }
}

/// `{initial, spent, remaining}` projection of one `(user, dataset)` budget
/// row, the shape `get_budget` returns to callers.
#[derive(Debug, Clone, Copy, serde::Serialize)]
pub struct BudgetView {
    pub initial: Budget,
    pub spent: Budget,
    pub remaining: Budget,
}

/// The result of an accepted, executed query.
#[derive(Debug, Clone, serde::Serialize)]
pub struct QueryResult {
    pub epsilon: f64,
    pub delta: f64,
    pub requested_by: String,
    pub result: QueryOutcome,
}

/// Binds every collaborator the admission protocol needs. Constructed once
/// by the HTTP surface at startup and shared behind an `Arc`; holds no
/// process-wide global itself beyond the in-flight gauge `submit_gate`
/// implements (spec.md §5, "ABE itself is stateless across requests apart
/// from an in-memory in-flight count gauge").
pub struct AdmissionEngine {
    admin_store: Arc<dyn AdminStore>,
    metadata_store: Arc<dyn MetadataStore>,
    cache: Arc<ConnectorCache>,
    registry: Arc<BackendRegistry>,
    broker: Arc<TaskBroker<QueryJob, JobOutcome>>,
    shaper: TimingShaper,
    submit_gate: Arc<Semaphore>,
    config: AdmissionConfig,
}

impl AdmissionEngine {
    #[must_use]
    pub fn new(
        admin_store: Arc<dyn AdminStore>,
        metadata_store: Arc<dyn MetadataStore>,
        cache: Arc<ConnectorCache>,
        registry: Arc<BackendRegistry>,
        broker: Arc<TaskBroker<QueryJob, JobOutcome>>,
        shaper: TimingShaper,
        config: AdmissionConfig,
    ) -> Self {
        let submit_gate = Arc::new(Semaphore::new(config.submit_limit));
        Self { admin_store, metadata_store, cache, registry, broker, shaper, submit_gate, config }
    }

    /// Spawn `workers` worker loops pulling from this engine's broker,
    /// dispatching each job to its `Querier` via the shared registry.
    #[must_use]
    pub fn spawn_workers(&self, workers: usize) -> WorkerPool {
        let registry = self.registry.clone();
        WorkerPool::spawn(self.broker.clone(), workers, move |job: QueryJob| {
            let registry = registry.clone();
            async move { run_job(&registry, job).await }
        })
    }

    /// Pure cost estimation: resolves the backend, validates the payload,
    /// and returns its measured cost without touching any budget.
    ///
    /// # Errors
    ///
    /// `UNAUTHORIZED` if the user is unknown, may not query, or lacks a
    /// grant on `dataset`; `INVALID_QUERY` on an unknown dataset or a
    /// payload that fails schema validation; `EXTERNAL_LIB` if the backend
    /// itself refuses the payload.
    #[tracing::instrument(skip(self, payload), fields(user = %user, dataset = %dataset))]
    pub async fn estimate_cost(
        &self,
        user: &str,
        dataset: &str,
        library: LibraryTag,
        payload: &Value,
    ) -> Result<Budget, CoreError> {
        self.authorize(user, dataset).await?;
        let metadata = self.resolve_metadata(dataset).await?;
        let querier = self.resolve_querier(library)?;
        querier.validate(&metadata, payload)?;
        querier.estimate_cost(&metadata, payload)
    }

    /// The core admission protocol: gate checks, payload normalization,
    /// cost estimation, an atomic budget debit, dispatch to a worker, and
    /// a terminal disposition that compensates only on a confirmed
    /// library failure (spec.md §4.1, §7).
    ///
    /// # Errors
    ///
    /// See the four-kind `CoreError` taxonomy; the budget effect of each
    /// kind is documented on the variant.
    #[tracing::instrument(skip(self, payload), fields(user = %user, dataset = %dataset, job_id = tracing::field::Empty))]
    pub async fn execute_query(
        &self,
        user: &str,
        dataset: &str,
        library: LibraryTag,
        payload: Value,
    ) -> Result<QueryResult, CoreError> {
        let admit_time = Instant::now();
        let outcome = self.execute_query_inner(user, dataset, library, payload, admit_time).await;
        self.shaper.shape(admit_time, outcome).await
    }

    async fn execute_query_inner(
        &self,
        user: &str,
        dataset: &str,
        library: LibraryTag,
        payload: Value,
        admit_time: Instant,
    ) -> Result<QueryResult, CoreError> {
        // Step 1: gate checks.
        self.authorize(user, dataset).await?;
        let _permit = self
            .submit_gate
            .try_acquire()
            .map_err(|_| CoreError::internal("submit_limit exceeded, retry later"))?;

        // Step 2: payload normalization.
        let metadata = self.resolve_metadata(dataset).await?;
        let querier = self.resolve_querier(library)?;
        querier.validate(&metadata, &payload)?;

        let connector = self
            .cache
            .acquire(self.metadata_store.as_ref(), dataset)
            .await
            .map_err(|e| CoreError::internal(e.to_string()))?;
        let view = connector.as_tabular().clone();

        // Step 3: cost estimation. The measured cost, not the caller's
        // requested cost, is always what gets charged.
        let measured_cost = querier.estimate_cost(&metadata, &payload)?;

        // Step 4 (part of the ordering rule): reject on backlog before any
        // debit happens. `has_capacity` is best-effort; a concurrent
        // `enqueue` can still lose the race immediately after this check
        // returns `true`, so the real `enqueue` below still has its own
        // post-debit compensation fallback.
        if !self.broker.has_capacity() {
            return Err(CoreError::internal("backlog at high-water mark, retry later"));
        }

        // Steps 4-5: budget pre-check and atomic CAS debit, retried on a
        // lost race up to `cas_retry_limit` attempts.
        let version = self.debit_with_retry(user, dataset, measured_cost).await?;

        // Step 6: enqueue. The capacity check above already rejected the
        // common case before debiting; this loses only to a genuine race
        // against a concurrent enqueue, so the debit is reversed
        // immediately rather than holding a debit for a job never admitted.
        let job = QueryJob { user: user.to_string(), dataset: dataset.to_string(), library, payload: payload.clone(), view };
        let (job_id, reply_rx) = match self.broker.enqueue(job) {
            Ok(v) => v,
            Err(_backpressure) => {
                self.compensate(user, dataset, measured_cost, version).await;
                return Err(CoreError::internal("backlog at high-water mark, retry later"));
            },
        };
        tracing::Span::current().record("job_id", tracing::field::display(job_id));

        let submitted_at = Utc::now();

        // Step 7: await, bounded by the configured dispatch timeout.
        // Cancellation of the surrounding request context does not reverse
        // the debit; the worker may still run to completion.
        let dispatch = tokio::time::timeout(self.config.dispatch_timeout, reply_rx).await;

        // Step 8: terminal disposition.
        match dispatch {
            Ok(Ok(JobOutcome::Ok(result))) => {
                self.archive(job_id, user, dataset, library, &payload, measured_cost, ArchiveStatus::Ok, submitted_at)
                    .await;
                Ok(QueryResult {
                    epsilon: measured_cost.epsilon,
                    delta: measured_cost.delta,
                    requested_by: user.to_string(),
                    result,
                })
            },
            Ok(Ok(JobOutcome::LibFail(message))) => {
                self.compensate(user, dataset, measured_cost, version).await;
                self.archive(
                    job_id,
                    user,
                    dataset,
                    library,
                    &payload,
                    measured_cost,
                    ArchiveStatus::Compensated,
                    submitted_at,
                )
                .await;
                Err(CoreError::external_lib(message))
            },
            Ok(Ok(JobOutcome::InternalFail(message))) => {
                self.archive(
                    job_id,
                    user,
                    dataset,
                    library,
                    &payload,
                    measured_cost,
                    ArchiveStatus::InternalFail,
                    submitted_at,
                )
                .await;
                Err(CoreError::internal(message))
            },
            Ok(Err(_recv_closed)) => {
                self.archive(
                    job_id,
                    user,
                    dataset,
                    library,
                    &payload,
                    measured_cost,
                    ArchiveStatus::InternalFail,
                    submitted_at,
                )
                .await;
                Err(CoreError::internal("worker lost before replying"))
            },
            Err(_elapsed) => {
                self.archive(
                    job_id,
                    user,
                    dataset,
                    library,
                    &payload,
                    measured_cost,
                    ArchiveStatus::InternalFail,
                    submitted_at,
                )
                .await;
                Err(CoreError::internal("dispatch timed out"))
            },
        }
    }

    /// Bypasses the Administration Store entirely: validates the payload
    /// and access grant, then executes against a deterministic synthetic
    /// frame instead of the real connector. Never debits, never appends an
    /// archive row.
    ///
    /// # Errors
    ///
    /// Same authorization/validation errors as `execute_query`; never
    /// `EXTERNAL_LIB` arising from budget state, since no budget is
    /// touched.
    #[tracing::instrument(skip(self, payload), fields(user = %user, dataset = %dataset))]
    pub async fn execute_dummy_query(
        &self,
        user: &str,
        dataset: &str,
        library: LibraryTag,
        payload: &Value,
        nb_rows: u64,
        seed: u64,
    ) -> Result<QueryOutcome, CoreError> {
        self.authorize(user, dataset).await?;
        let metadata = self.resolve_metadata(dataset).await?;
        let querier = self.resolve_querier(library)?;
        querier.validate(&metadata, payload)?;

        let frame = lomas_dummy::generate(&metadata, nb_rows, seed);
        let dummy_view =
            TabularView { dataset_name: dataset.to_string(), row_count: nb_rows, column_names: frame.columns };
        querier.execute(&dummy_view, payload, Some(&dummy_view)).await
    }

    /// Read-only projection of one `(user, dataset)` budget row.
    ///
    /// # Errors
    ///
    /// `UNAUTHORIZED` if the user is unknown or has no grant on `dataset`.
    pub async fn get_budget(&self, user: &str, dataset: &str) -> Result<BudgetView, CoreError> {
        let user_record = self.admin_store.get_user(user).await.map_err(|e| map_store_err(&e, user))?;
        let entry = user_record
            .budget_for(dataset)
            .ok_or_else(|| CoreError::unauthorized(UnauthorizedReason::NoGrant(dataset.to_string())))?;
        Ok(BudgetView { initial: entry.initial, spent: entry.spent, remaining: entry.remaining() })
    }

    /// Full archive history for `user`.
    ///
    /// # Errors
    ///
    /// `INTERNAL_ERROR` on a store failure.
    pub async fn get_archives(&self, user: &str) -> Result<Vec<Archive>, CoreError> {
        self.admin_store.get_archives(user).await.map_err(|e| CoreError::internal(e.to_string()))
    }

    async fn authorize(&self, user: &str, dataset: &str) -> Result<(), CoreError> {
        let user_record = self.admin_store.get_user(user).await.map_err(|e| map_store_err(&e, user))?;
        if !user_record.may_query {
            return Err(CoreError::unauthorized(UnauthorizedReason::MayNotQuery));
        }
        user_record
            .budget_for(dataset)
            .ok_or_else(|| CoreError::unauthorized(UnauthorizedReason::NoGrant(dataset.to_string())))?;
        Ok(())
    }

    async fn resolve_metadata(&self, dataset: &str) -> Result<lomas_store::Metadata, CoreError> {
        self.metadata_store
            .get_metadata(dataset)
            .await
            .map_err(|_| CoreError::invalid_query(InvalidQueryReason::UnknownDataset(dataset.to_string())))
    }

    fn resolve_querier(&self, library: LibraryTag) -> Result<Arc<dyn Querier>, CoreError> {
        self.registry
            .get(library)
            .ok_or_else(|| CoreError::internal(format!("no backend registered for {}", library.as_str())))
    }

    /// Steps 4-5 of the admission protocol: read the current budget and its
    /// version together, then attempt a CAS debit keyed on that exact
    /// version. A lost race (someone else's debit committed between the
    /// read and the CAS) returns `CasConflict`; this loop backs off, re-reads
    /// the now-current budget, and re-validates it against `cost` before
    /// retrying, so a race can only ever resolve into a fresh
    /// `BudgetExceeded` or a fresh attempt — never into an overspend.
    async fn debit_with_retry(&self, user: &str, dataset: &str, cost: Budget) -> Result<i64, CoreError> {
        for attempt in 0..self.config.cas_retry_limit {
            let user_record = self.admin_store.get_user(user).await.map_err(|e| map_store_err(&e, user))?;
            let entry = user_record.budget_for(dataset).ok_or_else(|| {
                CoreError::unauthorized(UnauthorizedReason::NoGrant(dataset.to_string()))
            })?;
            if !cost.fits_within(entry.remaining()) {
                return Err(CoreError::invalid_query(InvalidQueryReason::BudgetExceeded {
                    dataset: dataset.to_string(),
                }));
            }
            match self.admin_store.cas_debit(user, dataset, cost, entry.version).await {
                Ok(version) => return Ok(version),
                Err(StoreError::CasConflict { .. }) => {
                    self.backoff(attempt + 1).await;
                    continue;
                },
                Err(e) => return Err(CoreError::internal(e.to_string())),
            }
        }
        Err(CoreError::internal("cas retries exhausted on budget debit"))
    }

    /// Reverse a debit of exactly `cost`, retrying against the freshest
    /// version on a lost race. A discrepancy is logged (never panics) if
    /// retries are exhausted, per spec.md §7's "prefers to over-debit
    /// rather than under-debit" rationale extended to a failed reversal.
    async fn compensate(&self, user: &str, dataset: &str, cost: Budget, version: i64) {
        let mut expected_version = version;
        for attempt in 0..self.config.cas_retry_limit {
            match self.admin_store.cas_restore(user, dataset, cost, expected_version).await {
                Ok(()) => return,
                Err(StoreError::CasConflict { .. }) => {
                    match self.admin_store.get_user(user).await {
                        Ok(u) => match u.budget_for(dataset) {
                            Some(entry) => expected_version = entry.version,
                            None => break,
                        },
                        Err(_) => break,
                    }
                    self.backoff(attempt + 1).await;
                },
                Err(_) => break,
            }
        }
        tracing::error!(%user, %dataset, ?cost, "compensation failed, spent is over-debited relative to measured cost");
    }

    async fn backoff(&self, attempt: u32) {
        let delay = calculate_backoff(
            self.config.cas_backoff_strategy,
            attempt,
            self.config.cas_backoff_initial_ms,
            self.config.cas_backoff_max_ms,
        );
        tokio::time::sleep(delay).await;
    }

    #[allow(clippy::too_many_arguments)]
    async fn archive(
        &self,
        job_id: Uuid,
        user: &str,
        dataset: &str,
        library: LibraryTag,
        payload: &Value,
        measured_cost: Budget,
        status: ArchiveStatus,
        submitted_at: chrono::DateTime<Utc>,
    ) {
        let payload_bytes = serde_json::to_vec(payload).unwrap_or_default();
        let archive = Archive {
            job_id,
            user: user.to_string(),
            dataset: dataset.to_string(),
            library: library.as_str().to_string(),
            payload_hash: lomas_store::hash_payload(&payload_bytes),
            measured_cost,
            status,
            submitted_at,
            completed_at: Utc::now(),
        };
        if let Err(e) = self.admin_store.append_archive(archive).await {
            tracing::error!(%job_id, error = %e, "failed to append archive row");
        }
    }
}

async fn run_job(registry: &BackendRegistry, job: QueryJob) -> (JobState, JobOutcome) {
    let Some(querier) = registry.get(job.library) else {
        return (JobState::InternalFail, JobOutcome::InternalFail(format!("no backend for {}", job.library.as_str())));
    };
    match querier.execute(&job.view, &job.payload, None).await {
        Ok(outcome) => (JobState::Ok, JobOutcome::Ok(outcome)),
        Err(CoreError::ExternalLib { message }) => (JobState::LibFail, JobOutcome::LibFail(message)),
        Err(e) => (JobState::InternalFail, JobOutcome::InternalFail(e.to_string())),
    }
}

fn map_store_err(e: &StoreError, user: &str) -> CoreError {
    match e {
        StoreError::UserNotFound(_) => CoreError::unauthorized(UnauthorizedReason::UnknownUser(user.to_string())),
        other => CoreError::internal(other.to_string()),
    }
}

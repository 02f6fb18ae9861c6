//! End-to-end admission scenarios and the cross-cutting properties that
//! only show up once the Administration Store, the connector cache, the
//! backend registry, and the broker are wired together.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use lomas_broker::{BrokerConfig, TaskBroker};
use lomas_cache::{CacheConfig, ConnectorCache};
use lomas_dbr::{BackendRegistry, LibraryTag};
use lomas_error::{CoreError, InvalidQueryReason};
use lomas_store::{
    AccessKind, Budget, BudgetEntry, ColumnSpec, Dataset, MemoryStore, Metadata, User,
};

use lomas_core::{AdmissionConfig, AdmissionEngine, JobOutcome, QueryJob, TimingShaper};

const USER: &str = "Dr. Antartica";
const DATASET: &str = "PENGUIN";

fn penguin_store() -> Arc<MemoryStore> {
    let store = Arc::new(MemoryStore::new());
    store.put_user(User {
        name: USER.to_string(),
        may_query: true,
        datasets: vec![BudgetEntry {
            dataset_name: DATASET.to_string(),
            initial: Budget::new(10.0, 0.005),
            spent: Budget::zero(),
            version: 0,
        }],
    });

    let mut access_params = BTreeMap::new();
    access_params.insert("path".to_string(), "/data/penguin.csv".to_string());
    let dataset = Dataset {
        dataset_name: DATASET.to_string(),
        access_kind: AccessKind::Path,
        access_params,
        metadata_ref: "penguin.meta".to_string(),
        credentials_name: None,
    };
    let metadata = Metadata {
        max_ids: 1,
        rows: 344,
        columns: vec![(
            "bill_length_mm".to_string(),
            ColumnSpec::Numeric { lower: 30.0, upper: 60.0, integer: false, nullable_probability: 0.0 },
        )],
    };
    store.put_dataset(dataset, metadata);
    store
}

fn build_engine(store: Arc<MemoryStore>, config: AdmissionConfig) -> Arc<AdmissionEngine> {
    let cache = Arc::new(ConnectorCache::new(CacheConfig::default()));
    let registry = Arc::new(BackendRegistry::new());
    let broker: Arc<TaskBroker<QueryJob, JobOutcome>> = Arc::new(TaskBroker::new(BrokerConfig::default()));
    let engine = Arc::new(AdmissionEngine::new(
        store.clone(),
        store,
        cache,
        registry,
        broker,
        TimingShaper::disabled(),
        config,
    ));
    engine.spawn_workers(2);
    engine
}

fn default_config() -> AdmissionConfig {
    AdmissionConfig { dispatch_timeout: Duration::from_secs(5), ..AdmissionConfig::default() }
}

fn sql_payload(epsilon: f64, delta: f64) -> serde_json::Value {
    serde_json::json!({
        "query": "SELECT AVG(bill_length_mm) FROM df",
        "mechanism_overrides": [{"epsilon": epsilon, "delta": delta}],
    })
}

#[tokio::test]
async fn e1_measured_cost_is_charged_even_when_larger_than_requested() {
    let engine = build_engine(penguin_store(), default_config());

    let result = engine.execute_query(USER, DATASET, LibraryTag::Sql, sql_payload(1.0, 5e-5)).await.unwrap();
    assert!((result.epsilon - 1.0).abs() < 1e-9);
    assert!((result.delta - 5e-5).abs() < 1e-12);

    let budget = engine.get_budget(USER, DATASET).await.unwrap();
    assert!((budget.spent.epsilon - 1.0).abs() < 1e-9);
    assert!((budget.spent.delta - 5e-5).abs() < 1e-12);
    assert!((budget.remaining.epsilon - 9.0).abs() < 1e-9);
    assert!((budget.remaining.delta - 0.00495).abs() < 1e-9);

    let archives = engine.get_archives(USER).await.unwrap();
    assert_eq!(archives.len(), 1);
    assert_eq!(archives[0].status, lomas_store::ArchiveStatus::Ok);
}

#[tokio::test]
async fn e2_eleventh_identical_query_exceeds_budget() {
    let engine = build_engine(penguin_store(), default_config());
    let payload = sql_payload(1.0, 5e-5);

    for _ in 0..10 {
        engine.execute_query(USER, DATASET, LibraryTag::Sql, payload.clone()).await.unwrap();
    }

    let err = engine.execute_query(USER, DATASET, LibraryTag::Sql, payload).await.unwrap_err();
    assert!(matches!(
        err,
        CoreError::InvalidQuery { reason: InvalidQueryReason::BudgetExceeded { .. } }
    ));

    let budget = engine.get_budget(USER, DATASET).await.unwrap();
    assert!(budget.spent.epsilon <= 10.0 + 1e-9);
    assert!(budget.spent.delta <= 0.005 + 1e-12);
}

#[tokio::test]
async fn e3_transformation_pipeline_is_rejected_without_a_debit() {
    let engine = build_engine(penguin_store(), default_config());
    let payload = serde_json::json!({"declared_epsilon": 1.0, "is_measurement": false});

    let err = engine.execute_query(USER, DATASET, LibraryTag::Pipeline, payload).await.unwrap_err();
    assert!(matches!(err, CoreError::ExternalLib { .. }));

    let budget = engine.get_budget(USER, DATASET).await.unwrap();
    assert!((budget.spent.epsilon).abs() < 1e-12);
    assert!(engine.get_archives(USER).await.unwrap().is_empty());
}

#[tokio::test]
async fn e4_dummy_query_never_touches_budget_or_archive() {
    let engine = build_engine(penguin_store(), default_config());
    let payload = sql_payload(0.5, 1e-4);

    let outcome = engine.execute_dummy_query(USER, DATASET, LibraryTag::Sql, &payload, 100, 42).await.unwrap();
    match outcome {
        lomas_dbr::QueryOutcome::Tabular { rows, .. } => assert_eq!(rows.len(), 1),
        lomas_dbr::QueryOutcome::Scalar(_) => panic!("sql backend returns tabular results"),
    }

    let budget = engine.get_budget(USER, DATASET).await.unwrap();
    assert!((budget.spent.epsilon).abs() < 1e-12);
    assert!(engine.get_archives(USER).await.unwrap().is_empty());
}

#[tokio::test]
async fn e5_stall_shaper_pads_a_fast_response_to_its_target() {
    use lomas_core::TimeAttackMode;

    let store = penguin_store();
    let cache = Arc::new(ConnectorCache::new(CacheConfig::default()));
    let registry = Arc::new(BackendRegistry::new());
    let broker: Arc<TaskBroker<QueryJob, JobOutcome>> = Arc::new(TaskBroker::new(BrokerConfig::default()));
    let shaper = TimingShaper::new(Some(TimeAttackMode::Stall { target: Duration::from_millis(200) }));
    let engine = Arc::new(AdmissionEngine::new(
        store.clone(),
        store,
        cache,
        registry,
        broker,
        shaper,
        default_config(),
    ));
    engine.spawn_workers(1);

    let start = std::time::Instant::now();
    engine.execute_query(USER, DATASET, LibraryTag::Sql, sql_payload(0.1, 0.0)).await.unwrap();
    assert!(start.elapsed() >= Duration::from_millis(200));
}

#[tokio::test]
async fn e6_unanswered_job_debits_stand_and_archives_internal_fail() {
    // No workers are spawned, so the job is enqueued but never dequeued —
    // the same externally-visible shape as a worker crashing mid-job:
    // the debit already happened and nothing replies before the deadline.
    let store = penguin_store();
    let cache = Arc::new(ConnectorCache::new(CacheConfig::default()));
    let registry = Arc::new(BackendRegistry::new());
    let broker: Arc<TaskBroker<QueryJob, JobOutcome>> = Arc::new(TaskBroker::new(BrokerConfig::default()));
    let config = AdmissionConfig { dispatch_timeout: Duration::from_millis(100), ..default_config() };
    let engine = Arc::new(AdmissionEngine::new(
        store.clone(),
        store,
        cache,
        registry,
        broker,
        TimingShaper::disabled(),
        config,
    ));

    let err = engine.execute_query(USER, DATASET, LibraryTag::Sql, sql_payload(1.0, 5e-5)).await.unwrap_err();
    assert!(matches!(err, CoreError::InternalError { .. }));

    let budget = engine.get_budget(USER, DATASET).await.unwrap();
    assert!((budget.spent.epsilon - 1.0).abs() < 1e-9, "debit must stand after a timeout");

    let archives = engine.get_archives(USER).await.unwrap();
    assert_eq!(archives.len(), 1);
    assert_eq!(archives[0].status, lomas_store::ArchiveStatus::InternalFail);
}

#[tokio::test]
async fn backlog_at_high_water_mark_rejects_before_debiting() {
    // No workers, so the first admission fills the single queue slot and
    // is never drained. The second admission must be rejected by the
    // capacity pre-check before it touches the budget at all.
    let store = penguin_store();
    let cache = Arc::new(ConnectorCache::new(CacheConfig::default()));
    let registry = Arc::new(BackendRegistry::new());
    let broker: Arc<TaskBroker<QueryJob, JobOutcome>> =
        Arc::new(TaskBroker::new(BrokerConfig { high_water_mark: 1, ..BrokerConfig::default() }));
    let config = AdmissionConfig { dispatch_timeout: Duration::from_millis(50), ..default_config() };
    let engine = Arc::new(AdmissionEngine::new(
        store.clone(),
        store,
        cache,
        registry,
        broker,
        TimingShaper::disabled(),
        config,
    ));

    let first = tokio::spawn({
        let engine = engine.clone();
        let payload = sql_payload(1.0, 5e-5);
        async move { engine.execute_query(USER, DATASET, LibraryTag::Sql, payload).await }
    });
    // Give the first admission time to clear its own debit and land in the
    // queue before the second one runs.
    tokio::time::sleep(Duration::from_millis(10)).await;

    let second = engine.execute_query(USER, DATASET, LibraryTag::Sql, sql_payload(1.0, 5e-5)).await;
    assert!(matches!(second, Err(CoreError::InternalError { .. })));

    let _ = first.await.unwrap();

    let budget = engine.get_budget(USER, DATASET).await.unwrap();
    assert!(
        (budget.spent.epsilon - 1.0).abs() < 1e-9,
        "the rejected second admission must not have debited, got spent={}",
        budget.spent.epsilon
    );
}

#[tokio::test]
async fn e7_two_concurrent_admissions_exhaust_budget_exactly() {
    let engine = build_engine(penguin_store(), default_config());

    let payload = serde_json::json!({"estimator": "count", "declared_epsilon": 5.0});
    let (a, b) = tokio::join!(
        engine.execute_query(USER, DATASET, LibraryTag::Classical, payload.clone()),
        engine.execute_query(USER, DATASET, LibraryTag::Classical, payload.clone())
    );
    a.unwrap();
    b.unwrap();

    let budget = engine.get_budget(USER, DATASET).await.unwrap();
    assert!((budget.remaining.epsilon).abs() < 1e-9);

    let third = engine.execute_query(USER, DATASET, LibraryTag::Classical, payload).await.unwrap_err();
    assert!(matches!(
        third,
        CoreError::InvalidQuery { reason: InvalidQueryReason::BudgetExceeded { .. } }
    ));
}

#[tokio::test]
async fn property_concurrent_debits_never_overspend_past_initial() {
    // Two admissions whose combined cost (6 + 6) exceeds the 10-epsilon
    // grant if both were allowed to commit against the budget each of them
    // separately pre-checked as sufficient. Only one may land; the other
    // must see the post-commit state and be rejected.
    let engine = build_engine(penguin_store(), default_config());
    let payload = serde_json::json!({"estimator": "count", "declared_epsilon": 6.0});

    let (a, b) = tokio::join!(
        engine.execute_query(USER, DATASET, LibraryTag::Classical, payload.clone()),
        engine.execute_query(USER, DATASET, LibraryTag::Classical, payload)
    );
    let outcomes = [a, b];
    let ok_count = outcomes.iter().filter(|r| r.is_ok()).count();
    let exceeded_count = outcomes
        .iter()
        .filter(|r| {
            matches!(
                r,
                Err(CoreError::InvalidQuery { reason: InvalidQueryReason::BudgetExceeded { .. } })
            )
        })
        .count();
    assert_eq!(ok_count, 1);
    assert_eq!(exceeded_count, 1);

    let budget = engine.get_budget(USER, DATASET).await.unwrap();
    assert!(budget.spent.epsilon <= 10.0 + 1e-9);
    assert!((budget.spent.epsilon - 6.0).abs() < 1e-9);
}

#[tokio::test]
async fn property_compensation_restores_exactly_on_execution_failure() {
    let engine = build_engine(penguin_store(), default_config());

    let before = engine.get_budget(USER, DATASET).await.unwrap();
    let payload = serde_json::json!({"declared_epsilon": 2.0, "simulate_execution_failure": true});
    let err = engine.execute_query(USER, DATASET, LibraryTag::Pipeline, payload).await.unwrap_err();
    assert!(matches!(err, CoreError::ExternalLib { .. }));

    let after = engine.get_budget(USER, DATASET).await.unwrap();
    assert!((after.spent.epsilon - before.spent.epsilon).abs() < 1e-9);
    assert!((after.spent.delta - before.spent.delta).abs() < 1e-12);

    let archives = engine.get_archives(USER).await.unwrap();
    assert_eq!(archives.len(), 1);
    assert_eq!(archives[0].status, lomas_store::ArchiveStatus::Compensated);
}

#[tokio::test]
async fn property_invalid_query_never_debits() {
    let engine = build_engine(penguin_store(), default_config());
    let before = engine.get_budget(USER, DATASET).await.unwrap();

    let err = engine
        .execute_query(USER, DATASET, LibraryTag::Sql, serde_json::json!({"query": "SELECT 1"}))
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::InvalidQuery { .. }));

    let after = engine.get_budget(USER, DATASET).await.unwrap();
    assert!((after.spent.epsilon - before.spent.epsilon).abs() < 1e-12);
}

#[tokio::test]
async fn property_unauthorized_user_is_rejected_before_any_store_mutation() {
    let engine = build_engine(penguin_store(), default_config());

    let err = engine
        .execute_query("nobody", DATASET, LibraryTag::Sql, sql_payload(0.1, 0.0))
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::Unauthorized { .. }));
    assert!(engine.get_archives(USER).await.unwrap().is_empty());
}

#[tokio::test]
async fn property_serial_linearization_sums_to_total_spent() {
    let engine = build_engine(penguin_store(), default_config());
    let before = engine.get_budget(USER, DATASET).await.unwrap();

    let payload = serde_json::json!({"estimator": "count", "declared_epsilon": 0.4});
    let mut handles = Vec::new();
    for _ in 0..5 {
        let engine = engine.clone();
        let payload = payload.clone();
        handles.push(tokio::spawn(
            async move { engine.execute_query(USER, DATASET, LibraryTag::Classical, payload).await },
        ));
    }
    for h in handles {
        h.await.unwrap().unwrap();
    }

    let after = engine.get_budget(USER, DATASET).await.unwrap();
    let archives = engine.get_archives(USER).await.unwrap();
    let archived_total: f64 = archives.iter().map(|a| a.measured_cost.epsilon).sum();

    assert!((after.spent.epsilon - before.spent.epsilon - archived_total).abs() < 1e-9);
    assert!((archived_total - 2.0).abs() < 1e-9);
}

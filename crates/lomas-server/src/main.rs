//! lomas-server binary: loads configuration and secrets, wires the
//! Administration/Metadata stores, the cache, the backend registry, the
//! broker and its worker pool, and the admission engine behind them, then
//! serves the HTTP surface.

mod config;
mod middleware;
mod routes;
mod state;

use std::env;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use lomas_broker::{BrokerConfig, TaskBroker};
use lomas_cache::{CacheConfig, ConnectorCache};
use lomas_core::{AdmissionConfig, AdmissionEngine, TimingShaper};
use lomas_dbr::BackendRegistry;
use lomas_secrets::{AdminStoreCredential, Secrets};
use lomas_store::{AdminStore, MemoryStore, MetadataStore, PostgresStore};

use config::{DbType, RuntimeConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let runtime_config = load_config()?;
    init_tracing(&runtime_config.server.log_level);

    tracing::info!("lomas-server v{}", env!("CARGO_PKG_VERSION"));

    let secrets = load_secrets(runtime_config.develop_mode)?;

    let metadata_memory = Arc::new(MemoryStore::new());
    if let Some(yaml_path) = &runtime_config.admin_database.yaml_path {
        let yaml = std::fs::read_to_string(yaml_path)
            .map_err(|e| anyhow::anyhow!("reading {yaml_path}: {e}"))?;
        lomas_store::bulk_load::load_into(&metadata_memory, &yaml)?;
    } else if runtime_config.develop_mode {
        tracing::warn!("develop_mode with no admin_database.yaml_path: serving an empty catalog");
    }

    let admin_store: Arc<dyn AdminStore> = match runtime_config.admin_database.db_type {
        DbType::Yaml => metadata_memory.clone(),
        DbType::Postgres => {
            let connection_string = resolve_connection_string(&runtime_config, &secrets)?;
            let pool_size = runtime_config.admin_database.pool_size as usize;
            Arc::new(PostgresStore::with_pool_size(&connection_string, pool_size).await?)
        },
    };
    let metadata_store: Arc<dyn MetadataStore> = metadata_memory;

    let cache = Arc::new(ConnectorCache::new(CacheConfig::default()));
    let registry = Arc::new(BackendRegistry::new());
    let broker_config = BrokerConfig::default();
    let visibility_timeout = broker_config.visibility_timeout;
    let broker = Arc::new(TaskBroker::new(broker_config));
    let sweep_broker = broker.clone();
    let shaper = runtime_config
        .server
        .time_attack
        .map_or_else(TimingShaper::disabled, |t| TimingShaper::new(Some(t.to_mode())));

    let admission_config = AdmissionConfig {
        submit_limit: runtime_config.submit_limit,
        dispatch_timeout: Duration::from_secs(30),
        ..AdmissionConfig::default()
    };
    let engine = Arc::new(AdmissionEngine::new(
        admin_store,
        metadata_store.clone(),
        cache,
        registry,
        broker,
        shaper,
        admission_config,
    ));

    let workers = runtime_config.server.workers.unwrap_or_else(num_cpus_or_default);
    let _worker_pool = engine.spawn_workers(workers);
    spawn_sweep(sweep_broker, visibility_timeout);

    let app_state = state::AppState::new(engine, metadata_store);
    let app = routes::build_router(app_state);

    let bind_addr = format!("{}:{}", runtime_config.server.host_ip, runtime_config.server.host_port);
    let listener = TcpListener::bind(&bind_addr).await?;
    tracing::info!(%bind_addr, "lomas-server listening");

    axum::serve(listener, app).await?;
    Ok(())
}

fn load_config() -> anyhow::Result<RuntimeConfig> {
    Ok(RuntimeConfig::load()?)
}

fn load_secrets(develop_mode: bool) -> anyhow::Result<Secrets> {
    if let Ok(path) = env::var("LOMAS_SECRETS") {
        return Ok(Secrets::from_file(path)?);
    }
    if develop_mode {
        tracing::warn!("develop_mode with no LOMAS_SECRETS: using an empty admin store credential");
        return Ok(Secrets {
            admin_store: AdminStoreCredential { connection_string: String::new() },
            datasets: std::collections::HashMap::new(),
        });
    }
    Err(lomas_error::ConfigError::SecretsUnavailable("LOMAS_SECRETS not set".to_string()).into())
}

fn resolve_connection_string(config: &RuntimeConfig, secrets: &Secrets) -> anyhow::Result<String> {
    if !secrets.admin_store.connection_string.is_empty() {
        return Ok(secrets.admin_store.connection_string.clone());
    }
    let env_var = config
        .admin_database
        .connection_string_env
        .as_ref()
        .ok_or_else(|| anyhow::anyhow!("admin_database.connection_string_env not set"))?;
    env::var(env_var).map_err(|_| anyhow::anyhow!("environment variable {env_var} is not set"))
}

fn num_cpus_or_default() -> usize {
    std::thread::available_parallelism().map(std::num::NonZeroUsize::get).unwrap_or(4)
}

/// Spawn the periodic sweep that declares lost any job stuck `Running`
/// past the broker's visibility timeout, so a worker dying mid-job
/// actually surfaces as an `INTERNAL_FAIL` instead of hanging the caller
/// until `dispatch_timeout`. Runs on a fraction of the visibility timeout
/// so a lost job is caught well before a caller's own deadline.
fn spawn_sweep<P, O>(broker: Arc<TaskBroker<P, O>>, visibility_timeout: Duration)
where
    P: Send + 'static,
    O: Send + 'static,
{
    let period = (visibility_timeout / 4).max(Duration::from_secs(1));
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        loop {
            ticker.tick().await;
            broker.sweep_lost_jobs();
        }
    });
}

fn init_tracing(log_level: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("lomas_server={log_level},tower_http={log_level}").into());
    tracing_subscriber::registry().with(filter).with(tracing_subscriber::fmt::layer()).init();
}

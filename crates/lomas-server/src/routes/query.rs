//! `/estimate_{lib}_cost`, `/{lib}_query`, `/dummy_{lib}_query` for the
//! four library tags the registry recognizes (spec.md §6). The path
//! vocabulary (`smartnoise_sql`, `opendp`, `smartnoise_synth`,
//! `diffprivlib`) is kept at the HTTP boundary only; internally the
//! registry dispatches on the generalized `LibraryTag` (see `DESIGN.md`).

use axum::extract::State;
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use lomas_dbr::LibraryTag;
use lomas_error::RuntimeError;
use lomas_store::Budget;

use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub(crate) struct CostRequest {
    pub user_name: String,
    pub dataset_name: String,
    #[serde(flatten)]
    pub payload: Value,
}

#[derive(Debug, Serialize)]
pub(crate) struct CostResponse {
    pub epsilon: f64,
    pub delta: f64,
}

impl From<Budget> for CostResponse {
    fn from(budget: Budget) -> Self {
        Self { epsilon: budget.epsilon, delta: budget.delta }
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct QueryRequest {
    pub user_name: String,
    pub dataset_name: String,
    /// Carried for API fidelity; the engine always charges the measured
    /// cost, never the caller's requested cost (spec.md §4.1 step 3).
    #[serde(default)]
    pub requested_epsilon: Option<f64>,
    #[serde(default)]
    pub requested_delta: Option<f64>,
    #[serde(flatten)]
    pub payload: Value,
}

#[derive(Debug, Deserialize)]
pub(crate) struct DummyQueryRequest {
    pub user_name: String,
    pub dataset_name: String,
    pub nb_rows: u64,
    pub seed: u64,
    #[serde(flatten)]
    pub payload: Value,
}

async fn estimate_cost(
    state: &AppState,
    library: LibraryTag,
    req: CostRequest,
) -> Result<Json<CostResponse>, RuntimeError> {
    let cost = state.engine.estimate_cost(&req.user_name, &req.dataset_name, library, &req.payload).await?;
    Ok(Json(cost.into()))
}

async fn run_query(
    state: &AppState,
    library: LibraryTag,
    req: QueryRequest,
) -> Result<Json<lomas_core::QueryResult>, RuntimeError> {
    if req.requested_epsilon.is_some() || req.requested_delta.is_some() {
        tracing::debug!(
            user = %req.user_name,
            dataset = %req.dataset_name,
            "requested cost supplied but ignored, measured cost is always what is charged"
        );
    }
    let result = state.engine.execute_query(&req.user_name, &req.dataset_name, library, req.payload).await?;
    Ok(Json(result))
}

async fn run_dummy_query(
    state: &AppState,
    library: LibraryTag,
    req: DummyQueryRequest,
) -> Result<Json<lomas_dbr::QueryOutcome>, RuntimeError> {
    let outcome = state
        .engine
        .execute_dummy_query(&req.user_name, &req.dataset_name, library, &req.payload, req.nb_rows, req.seed)
        .await?;
    Ok(Json(outcome))
}

macro_rules! library_endpoints {
    ($lib:ident, $estimate_fn:ident, $query_fn:ident, $dummy_fn:ident) => {
        pub(crate) async fn $estimate_fn(
            State(state): State<AppState>,
            Json(req): Json<CostRequest>,
        ) -> Result<Json<CostResponse>, RuntimeError> {
            estimate_cost(&state, LibraryTag::$lib, req).await
        }

        pub(crate) async fn $query_fn(
            State(state): State<AppState>,
            Json(req): Json<QueryRequest>,
        ) -> Result<Json<lomas_core::QueryResult>, RuntimeError> {
            run_query(&state, LibraryTag::$lib, req).await
        }

        pub(crate) async fn $dummy_fn(
            State(state): State<AppState>,
            Json(req): Json<DummyQueryRequest>,
        ) -> Result<Json<lomas_dbr::QueryOutcome>, RuntimeError> {
            run_dummy_query(&state, LibraryTag::$lib, req).await
        }
    };
}

library_endpoints!(Sql, estimate_smartnoise_sql_cost, smartnoise_sql_query, dummy_smartnoise_sql_query);
library_endpoints!(Pipeline, estimate_opendp_cost, opendp_query, dummy_opendp_query);
library_endpoints!(Synth, estimate_smartnoise_synth_cost, smartnoise_synth_query, dummy_smartnoise_synth_query);
library_endpoints!(Classical, estimate_diffprivlib_cost, diffprivlib_query, dummy_diffprivlib_query);

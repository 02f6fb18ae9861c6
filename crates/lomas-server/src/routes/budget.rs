//! `GET /get_{initial,total_spent,remaining}_budget`, `GET
//! /get_previous_queries`.

use axum::extract::{Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};

use lomas_error::RuntimeError;
use lomas_store::Archive;

use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub(crate) struct BudgetQuery {
    pub user_name: String,
    pub dataset_name: String,
}

#[derive(Debug, Serialize)]
pub(crate) struct BudgetResponse {
    pub epsilon: f64,
    pub delta: f64,
}

pub(crate) async fn get_initial_budget(
    State(state): State<AppState>,
    Query(q): Query<BudgetQuery>,
) -> Result<Json<BudgetResponse>, RuntimeError> {
    let view = state.engine.get_budget(&q.user_name, &q.dataset_name).await?;
    Ok(Json(BudgetResponse { epsilon: view.initial.epsilon, delta: view.initial.delta }))
}

pub(crate) async fn get_total_spent_budget(
    State(state): State<AppState>,
    Query(q): Query<BudgetQuery>,
) -> Result<Json<BudgetResponse>, RuntimeError> {
    let view = state.engine.get_budget(&q.user_name, &q.dataset_name).await?;
    Ok(Json(BudgetResponse { epsilon: view.spent.epsilon, delta: view.spent.delta }))
}

pub(crate) async fn get_remaining_budget(
    State(state): State<AppState>,
    Query(q): Query<BudgetQuery>,
) -> Result<Json<BudgetResponse>, RuntimeError> {
    let view = state.engine.get_budget(&q.user_name, &q.dataset_name).await?;
    Ok(Json(BudgetResponse { epsilon: view.remaining.epsilon, delta: view.remaining.delta }))
}

#[derive(Debug, Deserialize)]
pub(crate) struct PreviousQueriesQuery {
    pub user_name: String,
    #[serde(default)]
    pub dataset_name: Option<String>,
}

pub(crate) async fn get_previous_queries(
    State(state): State<AppState>,
    Query(q): Query<PreviousQueriesQuery>,
) -> Result<Json<Vec<Archive>>, RuntimeError> {
    let mut archives = state.engine.get_archives(&q.user_name).await?;
    if let Some(dataset_name) = &q.dataset_name {
        archives.retain(|a| &a.dataset == dataset_name);
    }
    Ok(Json(archives))
}

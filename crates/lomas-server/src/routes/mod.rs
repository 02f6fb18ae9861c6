//! Router assembly: one route per row of spec.md §6's HTTP surface table.

mod budget;
mod health;
mod metadata;
mod query;

use axum::routing::{get, post};
use axum::Router;

use crate::middleware::trace_layer;
use crate::state::AppState;

pub(crate) fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/state", get(health::state_handler))
        .route("/get_dataset_metadata", get(metadata::get_dataset_metadata))
        .route("/get_dummy_dataset", get(metadata::get_dummy_dataset))
        .route("/get_initial_budget", get(budget::get_initial_budget))
        .route("/get_total_spent_budget", get(budget::get_total_spent_budget))
        .route("/get_remaining_budget", get(budget::get_remaining_budget))
        .route("/get_previous_queries", get(budget::get_previous_queries))
        .route("/estimate_smartnoise_sql_cost", post(query::estimate_smartnoise_sql_cost))
        .route("/estimate_opendp_cost", post(query::estimate_opendp_cost))
        .route("/estimate_smartnoise_synth_cost", post(query::estimate_smartnoise_synth_cost))
        .route("/estimate_diffprivlib_cost", post(query::estimate_diffprivlib_cost))
        .route("/smartnoise_sql_query", post(query::smartnoise_sql_query))
        .route("/opendp_query", post(query::opendp_query))
        .route("/smartnoise_synth_query", post(query::smartnoise_synth_query))
        .route("/diffprivlib_query", post(query::diffprivlib_query))
        .route("/dummy_smartnoise_sql_query", post(query::dummy_smartnoise_sql_query))
        .route("/dummy_opendp_query", post(query::dummy_opendp_query))
        .route("/dummy_smartnoise_synth_query", post(query::dummy_smartnoise_synth_query))
        .route("/dummy_diffprivlib_query", post(query::dummy_diffprivlib_query))
        .with_state(state)
        .layer(trace_layer())
}

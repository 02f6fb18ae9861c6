//! `GET /get_dataset_metadata`, `GET /get_dummy_dataset`. Both are
//! catalog-level reads: no grant or budget is consulted, matching the rest
//! of the HTTP surface table's treatment of these two rows as metadata
//! exploration rather than privacy-consuming operations.

use axum::extract::{Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use lomas_error::{CoreError, InvalidQueryReason, RuntimeError};
use lomas_store::Metadata;

use crate::state::AppState;

fn unknown_dataset(dataset_name: &str) -> RuntimeError {
    CoreError::invalid_query(InvalidQueryReason::UnknownDataset(dataset_name.to_string())).into()
}

#[derive(Debug, Deserialize)]
pub(crate) struct DatasetMetadataQuery {
    pub dataset_name: String,
}

pub(crate) async fn get_dataset_metadata(
    State(state): State<AppState>,
    Query(q): Query<DatasetMetadataQuery>,
) -> Result<Json<Metadata>, RuntimeError> {
    let metadata =
        state.metadata_store.get_metadata(&q.dataset_name).await.map_err(|_| unknown_dataset(&q.dataset_name))?;
    Ok(Json(metadata))
}

#[derive(Debug, Deserialize)]
pub(crate) struct DummyDatasetQuery {
    pub dataset_name: String,
    pub nb_rows: u64,
    pub seed: u64,
}

#[derive(Debug, Serialize)]
pub(crate) struct TabularResponse {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

pub(crate) async fn get_dummy_dataset(
    State(state): State<AppState>,
    Query(q): Query<DummyDatasetQuery>,
) -> Result<Json<TabularResponse>, RuntimeError> {
    let metadata =
        state.metadata_store.get_metadata(&q.dataset_name).await.map_err(|_| unknown_dataset(&q.dataset_name))?;
    let frame = lomas_dummy::generate(&metadata, q.nb_rows, q.seed);
    Ok(Json(TabularResponse { columns: frame.columns, rows: frame.rows }))
}

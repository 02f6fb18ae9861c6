//! `GET /state`.

use axum::Json;
use serde::Serialize;

#[derive(Debug, Serialize)]
pub(crate) struct StateResponse {
    pub status: &'static str,
    pub message: String,
}

pub(crate) async fn state_handler() -> Json<StateResponse> {
    Json(StateResponse {
        status: "LIVE",
        message: format!("lomas-server {}", env!("CARGO_PKG_VERSION")),
    })
}

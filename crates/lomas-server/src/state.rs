//! Shared state handed to every axum handler.

use std::sync::Arc;

use lomas_core::AdmissionEngine;
use lomas_store::MetadataStore;

/// Binds the admission engine and a direct read-only handle to the
/// Metadata & Credentials Store for the two endpoints that need catalog
/// access without going through any `Querier` (`/get_dataset_metadata`,
/// `/get_dummy_dataset`).
#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) engine: Arc<AdmissionEngine>,
    pub(crate) metadata_store: Arc<dyn MetadataStore>,
}

impl AppState {
    pub(crate) fn new(engine: Arc<AdmissionEngine>, metadata_store: Arc<dyn MetadataStore>) -> Self {
        Self { engine, metadata_store }
    }
}

//! Connector capability: the materialized, read-only handle a DCC entry
//! hands out. Physical loaders for `PATH`/`S3`/`IN_MEMORY` kinds are an
//! external collaborator; this crate only defines the shape the rest of
//! the core depends on.

use lomas_store::{AccessKind, Dataset, Metadata};

/// A logical, scan-only view of a materialized dataset. The core does not
/// specify the physical shape; Queriers treat it as an opaque handle.
#[derive(Debug, Clone)]
pub struct TabularView {
    pub dataset_name: String,
    pub row_count: u64,
    pub column_names: Vec<String>,
}

/// A materialized, shareable handle to one dataset's storage backend.
///
/// Cloning is cheap: it bumps the `Arc` this connector is wrapped in by the
/// cache, which is also how the cache counts in-flight holds for eviction.
#[derive(Debug, Clone)]
pub struct Connector {
    metadata: Metadata,
    view: TabularView,
}

impl Connector {
    #[must_use]
    pub const fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    #[must_use]
    pub fn as_tabular(&self) -> &TabularView {
        &self.view
    }
}

/// Materialize a `Connector` for `dataset` from its catalog entry and
/// schema. Real physical loaders (CSV reader, S3 client) live behind this
/// seam; for now the connector surfaces exactly the schema metadata
/// already describes, since the core never reads raw bytes itself.
///
/// # Errors
///
/// Returns an error message if `dataset.access_kind` requires access
/// parameters this dataset does not declare.
pub fn materialize(dataset: &Dataset, metadata: Metadata) -> Result<Connector, String> {
    match dataset.access_kind {
        AccessKind::Path => {
            if !dataset.access_params.contains_key("path") {
                return Err(format!("dataset {} declares PATH access with no path param", dataset.dataset_name));
            }
        }
        AccessKind::S3 => {
            if !dataset.access_params.contains_key("bucket") {
                return Err(format!("dataset {} declares S3 access with no bucket param", dataset.dataset_name));
            }
        }
    }

    let column_names = metadata.column_names().into_iter().map(str::to_string).collect();
    let view =
        TabularView { dataset_name: dataset.dataset_name.clone(), row_count: metadata.rows, column_names };
    Ok(Connector { metadata, view })
}

//! Bulk-load a `MemoryStore` (or the initial rows for a Postgres instance)
//! from a single YAML document — the `admin_database.db_type = "yaml"`
//! deployment shape, for demos and `develop_mode`.

use std::collections::BTreeMap;

use serde::Deserialize;

use lomas_error::ConfigError;

use crate::memory::MemoryStore;
use crate::types::{AccessKind, Budget, BudgetEntry, ColumnSpec, Dataset, Metadata, User};

#[derive(Debug, Deserialize)]
struct BulkFile {
    users: Vec<BulkUser>,
    datasets: Vec<BulkDataset>,
}

#[derive(Debug, Deserialize)]
struct BulkUser {
    name: String,
    #[serde(default = "default_may_query")]
    may_query: bool,
    budgets: Vec<BulkBudget>,
}

const fn default_may_query() -> bool {
    true
}

#[derive(Debug, Deserialize)]
struct BulkBudget {
    dataset_name: String,
    initial_epsilon: f64,
    initial_delta: f64,
}

#[derive(Debug, Deserialize)]
struct BulkDataset {
    dataset_name: String,
    access_kind: AccessKind,
    #[serde(default)]
    access_params: BTreeMap<String, String>,
    #[serde(default)]
    credentials_name: Option<String>,
    metadata: BulkMetadata,
}

#[derive(Debug, Deserialize)]
struct BulkMetadata {
    max_ids: u32,
    rows: u64,
    columns: Vec<(String, ColumnSpec)>,
}

/// Parse a YAML document and populate `store` with its users and datasets.
///
/// # Errors
///
/// Returns `ConfigError::ParseError` wrapped via `ConfigError::Invalid` if
/// the document does not match the expected shape.
pub fn load_into(store: &MemoryStore, yaml: &str) -> Result<(), ConfigError> {
    let parsed: BulkFile =
        serde_yaml::from_str(yaml).map_err(|e| ConfigError::Invalid(format!("bulk load: {e}")))?;

    for dataset in parsed.datasets {
        let metadata_ref = format!("{}.metadata", dataset.dataset_name);
        store.put_dataset(
            Dataset {
                dataset_name: dataset.dataset_name.clone(),
                access_kind: dataset.access_kind,
                access_params: dataset.access_params,
                metadata_ref,
                credentials_name: dataset.credentials_name,
            },
            Metadata { max_ids: dataset.metadata.max_ids, rows: dataset.metadata.rows, columns: dataset.metadata.columns },
        );
    }

    for user in parsed.users {
        let datasets = user
            .budgets
            .into_iter()
            .map(|b| BudgetEntry {
                dataset_name: b.dataset_name,
                initial: Budget::new(b.initial_epsilon, b.initial_delta),
                spent: Budget::zero(),
                version: 0,
            })
            .collect();
        store.put_user(User { name: user.name, may_query: user.may_query, datasets });
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::{AdminStore, MetadataStore};

    const SAMPLE: &str = r#"
users:
  - name: "Dr. Antartica"
    budgets:
      - dataset_name: "PENGUIN"
        initial_epsilon: 10.0
        initial_delta: 0.005
datasets:
  - dataset_name: "PENGUIN"
    access_kind: path
    access_params:
      path: "/data/penguin.csv"
    metadata:
      max_ids: 1
      rows: 344
      columns:
        - - "bill_length_mm"
          - kind: numeric
            lower: 30.0
            upper: 60.0
            integer: false
"#;

    #[tokio::test]
    async fn loads_users_and_datasets() {
        let store = MemoryStore::new();
        load_into(&store, SAMPLE).unwrap();

        let dataset = store.get_dataset("PENGUIN").await.unwrap();
        assert_eq!(dataset.access_kind, AccessKind::Path);

        let budget = store.get_budget("Dr. Antartica", "PENGUIN").await.unwrap();
        assert!((budget.epsilon - 10.0).abs() < 1e-9);
    }

    #[test]
    fn rejects_malformed_document() {
        let err = load_into(&MemoryStore::new(), "not: [valid, - yaml structure for this schema");
        assert!(err.is_err());
    }
}

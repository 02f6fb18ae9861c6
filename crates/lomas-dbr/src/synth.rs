//! `SYNTH` backend: produces a synthetic dataset from a declared algorithm
//! and parameters. Cost is declared up front by the payload, not derived.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

use lomas_cache::TabularView;
use lomas_error::CoreError;
use lomas_store::{Budget, Metadata};

use crate::querier::{invalid_payload, QueryOutcome, Querier};

#[derive(Debug, Deserialize)]
struct SynthPayload {
    algorithm: String,
    #[serde(default)]
    select_cols: Vec<String>,
    declared_epsilon: f64,
    #[serde(default)]
    declared_delta: f64,
    #[serde(default)]
    nb_rows: Option<u64>,
}

pub struct SynthQuerier;

impl SynthQuerier {
    fn parse(payload: &Value) -> Result<SynthPayload, CoreError> {
        serde_json::from_value(payload.clone())
            .map_err(|e| invalid_payload(format!("synth payload: {e}")))
    }
}

#[async_trait]
impl Querier for SynthQuerier {
    fn validate(&self, metadata: &Metadata, payload: &Value) -> Result<(), CoreError> {
        let parsed = Self::parse(payload)?;
        if parsed.algorithm.trim().is_empty() {
            return Err(invalid_payload("synth algorithm must not be empty"));
        }
        if parsed.declared_epsilon < 0.0 || parsed.declared_delta < 0.0 {
            return Err(invalid_payload("declared cost must be non-negative"));
        }
        let known: Vec<&str> = metadata.column_names();
        for column in &parsed.select_cols {
            if !known.contains(&column.as_str()) {
                return Err(invalid_payload(format!("unknown select_cols entry: {column}")));
            }
        }
        Ok(())
    }

    fn estimate_cost(&self, _metadata: &Metadata, payload: &Value) -> Result<Budget, CoreError> {
        let parsed = Self::parse(payload)?;
        Ok(Budget::new(parsed.declared_epsilon, parsed.declared_delta))
    }

    async fn execute(
        &self,
        view: &TabularView,
        payload: &Value,
        dummy_view: Option<&TabularView>,
    ) -> Result<QueryOutcome, CoreError> {
        let parsed = Self::parse(payload)?;
        let active_view = dummy_view.unwrap_or(view);
        let columns = if parsed.select_cols.is_empty() {
            active_view.column_names.clone()
        } else {
            parsed.select_cols
        };
        let row_count = parsed.nb_rows.unwrap_or(active_view.row_count);
        let rows = (0..row_count)
            .map(|i| columns.iter().map(|_| Value::from(i)).collect())
            .collect();
        Ok(QueryOutcome::Tabular { columns, rows })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lomas_store::ColumnSpec;

    fn metadata() -> Metadata {
        Metadata {
            max_ids: 1,
            rows: 10,
            columns: vec![(
                "species".to_string(),
                ColumnSpec::Categorical { categories: vec!["Adelie".into()], nullable_probability: 0.0 },
            )],
        }
    }

    #[test]
    fn estimate_cost_echoes_declared_cost() {
        let payload = serde_json::json!({"algorithm": "ctgan", "declared_epsilon": 2.0, "declared_delta": 1e-6});
        let cost = SynthQuerier.estimate_cost(&metadata(), &payload).unwrap();
        assert!((cost.epsilon - 2.0).abs() < 1e-9);
    }

    #[test]
    fn validate_rejects_unknown_select_column() {
        let payload = serde_json::json!({
            "algorithm": "ctgan",
            "declared_epsilon": 1.0,
            "select_cols": ["not_a_column"],
        });
        assert!(SynthQuerier.validate(&metadata(), &payload).is_err());
    }
}

//! `CLASSICAL` backend: classical-DP estimators (mean, count, histogram)
//! over a declared cost. Result may be scalar or tabular depending on the
//! estimator.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

use lomas_cache::TabularView;
use lomas_error::CoreError;
use lomas_store::{Budget, Metadata};

use crate::querier::{invalid_payload, QueryOutcome, Querier};

#[derive(Debug, Deserialize)]
#[serde(tag = "estimator", rename_all = "snake_case")]
enum ClassicalPayload {
    Mean { column: String, declared_epsilon: f64, #[serde(default)] declared_delta: f64 },
    Count { declared_epsilon: f64, #[serde(default)] declared_delta: f64 },
    Histogram {
        column: String,
        bins: u32,
        declared_epsilon: f64,
        #[serde(default)]
        declared_delta: f64,
    },
}

impl ClassicalPayload {
    const fn declared_cost(&self) -> (f64, f64) {
        match self {
            Self::Mean { declared_epsilon, declared_delta, .. }
            | Self::Count { declared_epsilon, declared_delta }
            | Self::Histogram { declared_epsilon, declared_delta, .. } => (*declared_epsilon, *declared_delta),
        }
    }
}

pub struct ClassicalQuerier;

impl ClassicalQuerier {
    fn parse(payload: &Value) -> Result<ClassicalPayload, CoreError> {
        serde_json::from_value(payload.clone())
            .map_err(|e| invalid_payload(format!("classical payload: {e}")))
    }
}

#[async_trait]
impl Querier for ClassicalQuerier {
    fn validate(&self, metadata: &Metadata, payload: &Value) -> Result<(), CoreError> {
        let parsed = Self::parse(payload)?;
        let known = metadata.column_names();
        match &parsed {
            ClassicalPayload::Mean { column, .. } | ClassicalPayload::Histogram { column, .. } => {
                if !known.contains(&column.as_str()) {
                    return Err(invalid_payload(format!("unknown column: {column}")));
                }
            },
            ClassicalPayload::Count { .. } => {},
        }
        if let ClassicalPayload::Histogram { bins, .. } = &parsed {
            if *bins == 0 {
                return Err(invalid_payload("histogram bins must be > 0"));
            }
        }
        let (epsilon, delta) = parsed.declared_cost();
        if epsilon < 0.0 || delta < 0.0 {
            return Err(invalid_payload("declared cost must be non-negative"));
        }
        Ok(())
    }

    fn estimate_cost(&self, _metadata: &Metadata, payload: &Value) -> Result<Budget, CoreError> {
        let (epsilon, delta) = Self::parse(payload)?.declared_cost();
        Ok(Budget::new(epsilon, delta))
    }

    async fn execute(
        &self,
        view: &TabularView,
        payload: &Value,
        dummy_view: Option<&TabularView>,
    ) -> Result<QueryOutcome, CoreError> {
        let parsed = Self::parse(payload)?;
        let active_view = dummy_view.unwrap_or(view);
        match parsed {
            ClassicalPayload::Mean { .. } | ClassicalPayload::Count { .. } => {
                Ok(QueryOutcome::Scalar(active_view.row_count as f64))
            },
            ClassicalPayload::Histogram { bins, .. } => Ok(QueryOutcome::Tabular {
                columns: vec!["bin".to_string(), "count".to_string()],
                rows: (0..bins)
                    .map(|b| vec![Value::from(b), Value::from(active_view.row_count / u64::from(bins))])
                    .collect(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lomas_store::ColumnSpec;

    fn metadata() -> Metadata {
        Metadata {
            max_ids: 1,
            rows: 344,
            columns: vec![(
                "bill_length_mm".to_string(),
                ColumnSpec::Numeric { lower: 30.0, upper: 60.0, integer: false, nullable_probability: 0.0 },
            )],
        }
    }

    #[test]
    fn validate_rejects_zero_bins() {
        let payload = serde_json::json!({
            "estimator": "histogram",
            "column": "bill_length_mm",
            "bins": 0,
            "declared_epsilon": 1.0,
        });
        assert!(ClassicalQuerier.validate(&metadata(), &payload).is_err());
    }

    #[test]
    fn count_estimator_declares_cost_directly() {
        let payload = serde_json::json!({"estimator": "count", "declared_epsilon": 0.5});
        let cost = ClassicalQuerier.estimate_cost(&metadata(), &payload).unwrap();
        assert!((cost.epsilon - 0.5).abs() < 1e-9);
    }
}

//! `PIPELINE` backend: a serialized DP pipeline with a privacy relation.
//! Cost is derived from the declared relation; if the pipeline is
//! zCDP-shaped, a caller-supplied `fixed_delta` is required to convert rho
//! to an (epsilon, delta) pair, otherwise admission fails `INVALID_QUERY`
//! (the non-zCDP + `fixed_delta` combination is rejected the same way, per
//! the resolution that `fixed_delta` is only meaningful for zCDP pipelines).

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

use lomas_cache::TabularView;
use lomas_error::{CoreError, InvalidQueryReason};
use lomas_store::{Budget, Metadata};

use crate::querier::{invalid_payload, QueryOutcome, Querier};

#[derive(Debug, Deserialize)]
struct PipelinePayload {
    /// Opaque serialized pipeline description; the core never interprets
    /// it beyond the privacy-relation fields below.
    #[serde(default)]
    #[allow(dead_code)]
    pipeline: Value,
    /// `rho` for a zCDP-shaped pipeline, `None` for a pure-DP pipeline
    /// that declares its own (epsilon, delta) directly.
    #[serde(default)]
    rho: Option<f64>,
    #[serde(default)]
    declared_epsilon: Option<f64>,
    #[serde(default)]
    declared_delta: Option<f64>,
    #[serde(default)]
    fixed_delta: Option<f64>,
    /// A pipeline ending in a transformation rather than a measurement has
    /// no privacy relation to charge against; the backend reports this as
    /// a deterministic refusal rather than a malformed payload.
    #[serde(default = "default_is_measurement")]
    is_measurement: bool,
    /// Deterministic backend refusal raised during `execute` rather than
    /// `estimate_cost`, distinct from the transformation case above —
    /// models a worker-side library failure discovered only once the
    /// pipeline actually runs.
    #[serde(default)]
    simulate_execution_failure: bool,
}

const fn default_is_measurement() -> bool {
    true
}

impl PipelinePayload {
    const fn is_zcdp_shaped(&self) -> bool {
        self.rho.is_some()
    }
}

pub struct PipelineQuerier;

impl PipelineQuerier {
    fn parse(payload: &Value) -> Result<PipelinePayload, CoreError> {
        serde_json::from_value(payload.clone())
            .map_err(|e| invalid_payload(format!("pipeline payload: {e}")))
    }
}

/// rho-zCDP to approximate-DP conversion: `epsilon = rho + 2 * sqrt(rho * ln(1/delta))`.
fn zcdp_to_approx_dp(rho: f64, delta: f64) -> f64 {
    rho + 2.0 * (rho * (1.0 / delta).ln()).sqrt()
}

#[async_trait]
impl Querier for PipelineQuerier {
    fn validate(&self, _metadata: &Metadata, payload: &Value) -> Result<(), CoreError> {
        let parsed = Self::parse(payload)?;
        if parsed.is_zcdp_shaped() && parsed.fixed_delta.is_none() {
            return Err(invalid_payload("zCDP pipeline requires fixed_delta"));
        }
        if !parsed.is_zcdp_shaped() && parsed.fixed_delta.is_some() {
            return Err(CoreError::invalid_query(InvalidQueryReason::FixedDeltaNotApplicable));
        }
        if !parsed.is_zcdp_shaped() && parsed.declared_epsilon.is_none() {
            return Err(invalid_payload("non-zCDP pipeline must declare epsilon"));
        }
        Ok(())
    }

    fn estimate_cost(&self, _metadata: &Metadata, payload: &Value) -> Result<Budget, CoreError> {
        let parsed = Self::parse(payload)?;
        if !parsed.is_measurement {
            return Err(CoreError::external_lib("pipeline ends in a transformation, not a measurement"));
        }
        if let Some(rho) = parsed.rho {
            let delta = parsed.fixed_delta.ok_or_else(|| invalid_payload("zCDP pipeline requires fixed_delta"))?;
            Ok(Budget::new(zcdp_to_approx_dp(rho, delta), delta))
        } else {
            let epsilon = parsed
                .declared_epsilon
                .ok_or_else(|| invalid_payload("non-zCDP pipeline must declare epsilon"))?;
            Ok(Budget::new(epsilon, parsed.declared_delta.unwrap_or(0.0)))
        }
    }

    async fn execute(
        &self,
        view: &TabularView,
        payload: &Value,
        dummy_view: Option<&TabularView>,
    ) -> Result<QueryOutcome, CoreError> {
        let parsed = Self::parse(payload)?;
        if !parsed.is_measurement {
            return Err(CoreError::external_lib("pipeline ends in a transformation, not a measurement"));
        }
        if parsed.simulate_execution_failure {
            return Err(CoreError::external_lib("backend reported failure during execution"));
        }
        let active_view = dummy_view.unwrap_or(view);
        Ok(QueryOutcome::Scalar(active_view.row_count as f64))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lomas_store::ColumnSpec;

    fn metadata() -> Metadata {
        Metadata {
            max_ids: 1,
            rows: 50,
            columns: vec![(
                "x".to_string(),
                ColumnSpec::Numeric { lower: 0.0, upper: 1.0, integer: false, nullable_probability: 0.0 },
            )],
        }
    }

    #[test]
    fn zcdp_pipeline_without_fixed_delta_is_rejected() {
        let payload = serde_json::json!({"rho": 0.1});
        let err = PipelineQuerier.validate(&metadata(), &payload).unwrap_err();
        assert!(matches!(err, CoreError::InvalidQuery { .. }));
    }

    #[test]
    fn non_zcdp_pipeline_with_fixed_delta_is_rejected() {
        let payload = serde_json::json!({"declared_epsilon": 1.0, "fixed_delta": 1e-6});
        let err = PipelineQuerier.validate(&metadata(), &payload).unwrap_err();
        assert!(matches!(
            err,
            CoreError::InvalidQuery { reason: InvalidQueryReason::FixedDeltaNotApplicable }
        ));
    }

    #[test]
    fn zcdp_pipeline_with_fixed_delta_converts_to_approx_dp() {
        let payload = serde_json::json!({"rho": 0.1, "fixed_delta": 1e-5});
        let cost = PipelineQuerier.estimate_cost(&metadata(), &payload).unwrap();
        assert!(cost.epsilon > 0.1);
        assert!((cost.delta - 1e-5).abs() < 1e-12);
    }

    #[test]
    fn transformation_pipeline_is_an_external_lib_refusal() {
        let payload = serde_json::json!({"declared_epsilon": 1.0, "is_measurement": false});
        let err = PipelineQuerier.estimate_cost(&metadata(), &payload).unwrap_err();
        assert!(matches!(err, CoreError::ExternalLib { .. }));
    }

    #[tokio::test]
    async fn execution_failure_surfaces_after_a_successful_estimate() {
        let payload =
            serde_json::json!({"declared_epsilon": 1.0, "simulate_execution_failure": true});
        assert!(PipelineQuerier.estimate_cost(&metadata(), &payload).is_ok());

        let view = TabularView { dataset_name: "x".into(), row_count: 50, column_names: vec!["x".into()] };
        let err = PipelineQuerier.execute(&view, &payload, None).await.unwrap_err();
        assert!(matches!(err, CoreError::ExternalLib { .. }));
    }
}

//! The `Querier` capability every DP backend adapter implements, and the
//! shared result/registry types around it.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use lomas_cache::TabularView;
use lomas_error::{CoreError, InvalidQueryReason};
use lomas_store::{Budget, Metadata};

/// The four library tags the core recognizes. The core never inspects
/// payload semantics beyond dispatching on this tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LibraryTag {
    Sql,
    Pipeline,
    Synth,
    Classical,
}

impl LibraryTag {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Sql => "sql",
            Self::Pipeline => "pipeline",
            Self::Synth => "synth",
            Self::Classical => "classical",
        }
    }
}

/// What a `Querier::execute` call produces. Shape depends on the backend
/// and the payload, not on the tag alone (spec rows list both "scalar" and
/// "tabular" for `PIPELINE`/`CLASSICAL`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum QueryOutcome {
    Scalar(f64),
    Tabular { columns: Vec<String>, rows: Vec<Vec<Value>> },
}

/// Capability every DP backend adapter implements. `validate` and
/// `estimate_cost` are synchronous: they reason over metadata and the
/// payload only, never touching a connector. `execute` is async because a
/// real backend would scan the connector's view.
#[async_trait]
pub trait Querier: Send + Sync {
    fn validate(&self, metadata: &Metadata, payload: &Value) -> Result<(), CoreError>;

    fn estimate_cost(&self, metadata: &Metadata, payload: &Value) -> Result<Budget, CoreError>;

    async fn execute(
        &self,
        view: &TabularView,
        payload: &Value,
        dummy_view: Option<&TabularView>,
    ) -> Result<QueryOutcome, CoreError>;
}

/// Static, process-wide mapping from library tag to its `Querier`.
/// Built once at startup and never mutated afterward.
pub struct BackendRegistry {
    backends: HashMap<LibraryTag, Arc<dyn Querier>>,
}

impl BackendRegistry {
    #[must_use]
    pub fn new() -> Self {
        let mut backends: HashMap<LibraryTag, Arc<dyn Querier>> = HashMap::new();
        backends.insert(LibraryTag::Sql, Arc::new(crate::sql::SqlQuerier::default()));
        backends.insert(LibraryTag::Pipeline, Arc::new(crate::pipeline::PipelineQuerier));
        backends.insert(LibraryTag::Synth, Arc::new(crate::synth::SynthQuerier));
        backends.insert(LibraryTag::Classical, Arc::new(crate::classical::ClassicalQuerier));
        Self { backends }
    }

    #[must_use]
    pub fn get(&self, tag: LibraryTag) -> Option<Arc<dyn Querier>> {
        self.backends.get(&tag).cloned()
    }
}

impl Default for BackendRegistry {
    fn default() -> Self {
        Self::new()
    }
}

pub(crate) fn invalid_payload(reason: impl Into<String>) -> CoreError {
    CoreError::invalid_query(InvalidQueryReason::SchemaViolation(reason.into()))
}

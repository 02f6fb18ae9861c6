//! Data model owned by the Metadata & Credentials Store (MCS) and the
//! Administration Store (AS): Dataset, Metadata, User, `BudgetEntry`,
//! Archive.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A privacy-loss budget pair: epsilon controls privacy loss, delta
/// controls the failure probability of that guarantee.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Budget {
    pub epsilon: f64,
    pub delta: f64,
}

impl Budget {
    #[must_use]
    pub const fn new(epsilon: f64, delta: f64) -> Self {
        Self { epsilon, delta }
    }

    #[must_use]
    pub const fn zero() -> Self {
        Self { epsilon: 0.0, delta: 0.0 }
    }

    /// Sum-composition: `spent <- spent + cost`. The engine performs no
    /// advanced composition (spec.md §4.1, "Budget composition").
    #[must_use]
    pub fn add(self, other: Self) -> Self {
        Self { epsilon: self.epsilon + other.epsilon, delta: self.delta + other.delta }
    }

    #[must_use]
    pub fn sub(self, other: Self) -> Self {
        Self { epsilon: self.epsilon - other.epsilon, delta: self.delta - other.delta }
    }

    /// True iff both coordinates of `self` are `<= other`'s.
    #[must_use]
    pub fn fits_within(self, other: Self) -> bool {
        self.epsilon <= other.epsilon && self.delta <= other.delta
    }
}

/// A registered user and their ordered set of per-dataset budgets.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub name: String,
    pub may_query: bool,
    pub datasets: Vec<BudgetEntry>,
}

impl User {
    #[must_use]
    pub fn budget_for(&self, dataset: &str) -> Option<&BudgetEntry> {
        self.datasets.iter().find(|b| b.dataset_name == dataset)
    }
}

/// One (user, dataset) budget row, with the optimistic-concurrency stamp
/// the Administration Store's CAS primitive reads and writes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BudgetEntry {
    pub dataset_name: String,
    pub initial: Budget,
    pub spent: Budget,
    pub version: i64,
}

impl BudgetEntry {
    #[must_use]
    pub fn remaining(&self) -> Budget {
        self.initial.sub(self.spent)
    }
}

/// How a dataset's bytes are fetched. Physical storage drivers are an
/// external collaborator (spec.md §1); the core only needs to know which
/// kind of descriptor a `Dataset` carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessKind {
    Path,
    S3,
}

/// Catalog entry owned by the MCS; read-only to the core.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Dataset {
    pub dataset_name: String,
    pub access_kind: AccessKind,
    pub access_params: BTreeMap<String, String>,
    pub metadata_ref: String,
    pub credentials_name: Option<String>,
}

/// Numeric, categorical, or datetime sub-schema for one column.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ColumnSpec {
    Numeric {
        lower: f64,
        upper: f64,
        integer: bool,
        #[serde(default)]
        nullable_probability: f64,
    },
    Categorical {
        categories: Vec<String>,
        #[serde(default)]
        nullable_probability: f64,
    },
    Datetime {
        lower: DateTime<Utc>,
        upper: DateTime<Utc>,
        #[serde(default)]
        nullable_probability: f64,
    },
}

impl ColumnSpec {
    #[must_use]
    pub const fn nullable_probability(&self) -> f64 {
        match self {
            Self::Numeric { nullable_probability, .. }
            | Self::Categorical { nullable_probability, .. }
            | Self::Datetime { nullable_probability, .. } => *nullable_probability,
        }
    }
}

/// Dataset schema: row bound, id-unit bound, and an ordered column schema.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Metadata {
    pub max_ids: u32,
    pub rows: u64,
    pub columns: Vec<(String, ColumnSpec)>,
}

impl Metadata {
    #[must_use]
    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|(name, _)| name.as_str()).collect()
    }
}

/// Terminal disposition of an accepted job, recorded in the archive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArchiveStatus {
    Ok,
    LibFail,
    InternalFail,
    Compensated,
}

/// Append-only record of an accepted job's outcome. Payloads are hashed,
/// never stored in full, to avoid leaking embedded credentials through the
/// archive (spec.md §9, "Archive projection").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Archive {
    pub job_id: Uuid,
    pub user: String,
    pub dataset: String,
    pub library: String,
    pub payload_hash: String,
    pub measured_cost: Budget,
    pub status: ArchiveStatus,
    pub submitted_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
}

#[must_use]
pub fn hash_payload(payload: &[u8]) -> String {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(payload);
    hex_encode(&hasher.finalize())
}

fn hex_encode(bytes: &[u8]) -> String {
    use std::fmt::Write as _;
    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        let _ = write!(out, "{byte:02x}");
    }
    out
}

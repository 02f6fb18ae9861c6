//! Store seams: `MetadataStore` (MCS, read-only) and `AdminStore` (AS,
//! transactional with CAS).

use async_trait::async_trait;
use uuid::Uuid;

use lomas_error::StoreError;

use crate::types::{Archive, Budget, Dataset, Metadata, User};

/// Resolution of a dataset name to its access descriptor and schema.
/// Owned by the MCS; read-only to every other component.
#[async_trait]
pub trait MetadataStore: Send + Sync {
    async fn get_dataset(&self, dataset_name: &str) -> Result<Dataset, StoreError>;
    async fn get_metadata(&self, dataset_name: &str) -> Result<Metadata, StoreError>;
}

/// Transactional store of user records and the append-only query archive.
///
/// `cas_debit`/`cas_restore` are the only writes to budget fields; both are
/// optimistic (read current version, write iff it still matches) per
/// spec.md §4.1 step 5 and §7's compensation rule.
#[async_trait]
pub trait AdminStore: Send + Sync {
    async fn get_user(&self, user: &str) -> Result<User, StoreError>;

    async fn get_budget(&self, user: &str, dataset: &str) -> Result<Budget, StoreError>;

    /// Attempt one compare-and-swap debit: `spent <- spent + cost` iff the
    /// stored version still equals `expected_version` — the version the
    /// caller observed during its own budget pre-check, not a version read
    /// fresh inside this call. Returns `Err(StoreError::CasConflict)` on a
    /// lost race so the caller (ABE) can re-read the budget and retry from
    /// its own bounded loop.
    async fn cas_debit(
        &self,
        user: &str,
        dataset: &str,
        cost: Budget,
        expected_version: i64,
    ) -> Result<i64, StoreError>;

    /// Restore a debit of exactly `cost` after a confirmed `LIB_FAIL`
    /// (spec.md §4.1 step 8, "compensate"). `expected_version` is the
    /// version returned by the `cas_debit` being reversed.
    async fn cas_restore(
        &self,
        user: &str,
        dataset: &str,
        cost: Budget,
        expected_version: i64,
    ) -> Result<(), StoreError>;

    async fn append_archive(&self, archive: Archive) -> Result<(), StoreError>;

    async fn get_archives(&self, user: &str) -> Result<Vec<Archive>, StoreError>;

    async fn get_archive(&self, job_id: Uuid) -> Result<Option<Archive>, StoreError>;
}

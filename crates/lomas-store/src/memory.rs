//! In-memory `AdminStore`/`MetadataStore` test double.
//!
//! Used by the property/integration test suites in `lomas-core` and by
//! `develop_mode` (spec.md §6), which seeds a demo dataset on startup
//! without standing up Postgres.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use uuid::Uuid;

use lomas_error::StoreError;

use crate::traits::{AdminStore, MetadataStore};
use crate::types::{Archive, Budget, BudgetEntry, Dataset, Metadata, User};

#[derive(Default)]
struct Inner {
    users: HashMap<String, User>,
    datasets: HashMap<String, Dataset>,
    metadata: HashMap<String, Metadata>,
    archives: HashMap<Uuid, Archive>,
}

/// A single-process, `RwLock`-guarded store. CAS is implemented by reading
/// the stamped version and writing back only if it still matches — the
/// same contract a real `UPDATE ... WHERE version = $1` enforces in
/// Postgres, just without the network round-trip.
pub struct MemoryStore {
    inner: Arc<RwLock<Inner>>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self { inner: Arc::new(RwLock::new(Inner::default())) }
    }

    pub fn put_user(&self, user: User) {
        self.inner.write().users.insert(user.name.clone(), user);
    }

    pub fn put_dataset(&self, dataset: Dataset, metadata: Metadata) {
        let mut inner = self.inner.write();
        inner.metadata.insert(dataset.dataset_name.clone(), metadata);
        inner.datasets.insert(dataset.dataset_name.clone(), dataset);
    }
}

#[async_trait]
impl MetadataStore for MemoryStore {
    async fn get_dataset(&self, dataset_name: &str) -> Result<Dataset, StoreError> {
        self.inner
            .read()
            .datasets
            .get(dataset_name)
            .cloned()
            .ok_or_else(|| StoreError::DatasetNotFound(dataset_name.to_string()))
    }

    async fn get_metadata(&self, dataset_name: &str) -> Result<Metadata, StoreError> {
        self.inner
            .read()
            .metadata
            .get(dataset_name)
            .cloned()
            .ok_or_else(|| StoreError::DatasetNotFound(dataset_name.to_string()))
    }
}

#[async_trait]
impl AdminStore for MemoryStore {
    async fn get_user(&self, user: &str) -> Result<User, StoreError> {
        self.inner.read().users.get(user).cloned().ok_or_else(|| StoreError::UserNotFound(user.to_string()))
    }

    async fn get_budget(&self, user: &str, dataset: &str) -> Result<Budget, StoreError> {
        let inner = self.inner.read();
        let u = inner.users.get(user).ok_or_else(|| StoreError::UserNotFound(user.to_string()))?;
        let entry = u.budget_for(dataset).ok_or_else(|| StoreError::NoBudgetEntry {
            user: user.to_string(),
            dataset: dataset.to_string(),
        })?;
        Ok(entry.remaining())
    }

    async fn cas_debit(
        &self,
        user: &str,
        dataset: &str,
        cost: Budget,
        expected_version: i64,
    ) -> Result<i64, StoreError> {
        let mut inner = self.inner.write();
        let u = inner.users.get_mut(user).ok_or_else(|| StoreError::UserNotFound(user.to_string()))?;
        let entry = u.datasets.iter_mut().find(|b| b.dataset_name == dataset).ok_or_else(|| {
            StoreError::NoBudgetEntry { user: user.to_string(), dataset: dataset.to_string() }
        })?;
        if entry.version != expected_version {
            return Err(StoreError::CasConflict {
                user: user.to_string(),
                dataset: dataset.to_string(),
                expected: expected_version,
            });
        }
        let attempted = entry.spent.add(cost);
        if !attempted.fits_within(entry.initial) {
            return Err(StoreError::CasConflict {
                user: user.to_string(),
                dataset: dataset.to_string(),
                expected: expected_version,
            });
        }
        entry.spent = attempted;
        entry.version += 1;
        Ok(entry.version)
    }

    async fn cas_restore(
        &self,
        user: &str,
        dataset: &str,
        cost: Budget,
        expected_version: i64,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.write();
        let u = inner.users.get_mut(user).ok_or_else(|| StoreError::UserNotFound(user.to_string()))?;
        let entry = u.datasets.iter_mut().find(|b| b.dataset_name == dataset).ok_or_else(|| {
            StoreError::NoBudgetEntry { user: user.to_string(), dataset: dataset.to_string() }
        })?;
        if entry.version != expected_version {
            return Err(StoreError::CasConflict {
                user: user.to_string(),
                dataset: dataset.to_string(),
                expected: expected_version,
            });
        }
        entry.spent = entry.spent.sub(cost);
        entry.version += 1;
        Ok(())
    }

    async fn append_archive(&self, archive: Archive) -> Result<(), StoreError> {
        self.inner.write().archives.insert(archive.job_id, archive);
        Ok(())
    }

    async fn get_archives(&self, user: &str) -> Result<Vec<Archive>, StoreError> {
        let mut rows: Vec<Archive> =
            self.inner.read().archives.values().filter(|a| a.user == user).cloned().collect();
        rows.sort_by_key(|a| a.submitted_at);
        Ok(rows)
    }

    async fn get_archive(&self, job_id: Uuid) -> Result<Option<Archive>, StoreError> {
        Ok(self.inner.read().archives.get(&job_id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_user() -> User {
        User {
            name: "Dr. Antartica".into(),
            may_query: true,
            datasets: vec![BudgetEntry {
                dataset_name: "PENGUIN".into(),
                initial: Budget::new(10.0, 0.005),
                spent: Budget::zero(),
                version: 0,
            }],
        }
    }

    #[tokio::test]
    async fn cas_debit_then_restore_is_exact() {
        let store = MemoryStore::new();
        store.put_user(sample_user());

        let version =
            store.cas_debit("Dr. Antartica", "PENGUIN", Budget::new(1.0, 5e-5), 0).await.unwrap();
        let budget = store.get_budget("Dr. Antartica", "PENGUIN").await.unwrap();
        assert!((budget.epsilon - 9.0).abs() < 1e-9);

        store.cas_restore("Dr. Antartica", "PENGUIN", Budget::new(1.0, 5e-5), version).await.unwrap();
        let budget = store.get_budget("Dr. Antartica", "PENGUIN").await.unwrap();
        assert!((budget.epsilon - 10.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn stale_restore_conflicts() {
        let store = MemoryStore::new();
        store.put_user(sample_user());

        let version =
            store.cas_debit("Dr. Antartica", "PENGUIN", Budget::new(1.0, 0.0), 0).await.unwrap();
        store.cas_debit("Dr. Antartica", "PENGUIN", Budget::new(1.0, 0.0), version).await.unwrap();

        let err = store.cas_restore("Dr. Antartica", "PENGUIN", Budget::new(1.0, 0.0), version).await;
        assert!(matches!(err, Err(StoreError::CasConflict { .. })));
    }

    #[tokio::test]
    async fn cas_debit_rejects_stale_version() {
        let store = MemoryStore::new();
        store.put_user(sample_user());

        store.cas_debit("Dr. Antartica", "PENGUIN", Budget::new(1.0, 0.0), 0).await.unwrap();
        let err = store.cas_debit("Dr. Antartica", "PENGUIN", Budget::new(1.0, 0.0), 0).await;
        assert!(matches!(err, Err(StoreError::CasConflict { .. })));
    }

    #[tokio::test]
    async fn cas_debit_rejects_overspend_even_with_fresh_version() {
        let store = MemoryStore::new();
        store.put_user(sample_user());

        let version =
            store.cas_debit("Dr. Antartica", "PENGUIN", Budget::new(6.0, 0.0), 0).await.unwrap();
        // A concurrent debit of equal size pre-checked against the same
        // starting remaining budget; by the time it reaches the CAS the
        // version has moved, so it must not spend past `initial` even if
        // the caller (incorrectly) re-read a fresh version.
        let err = store.cas_debit("Dr. Antartica", "PENGUIN", Budget::new(6.0, 0.0), version).await;
        assert!(matches!(err, Err(StoreError::CasConflict { .. })));
    }
}

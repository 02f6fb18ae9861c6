//! Data Connector Cache (DCC): bounded mapping from dataset name to a
//! materialized `Connector`, with cooperative single-flight loads and LRU
//! eviction gated on zero in-flight holds.

pub mod connector;

use std::num::NonZeroUsize;
use std::sync::Arc;

use dashmap::DashMap;
use lru::LruCache;
use parking_lot::Mutex;
use tokio::sync::Mutex as AsyncMutex;

use lomas_error::StoreError;
use lomas_store::MetadataStore;

pub use connector::{Connector, TabularView};

/// Configuration for a `ConnectorCache`.
#[derive(Debug, Clone, Copy)]
pub struct CacheConfig {
    /// Maximum number of materialized connectors kept resident.
    pub max_entries: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self { max_entries: 128 }
    }
}

/// Bounded `dataset_name -> Connector` cache with cooperative lazy
/// materialization.
///
/// A second concurrent `acquire` on a cold key awaits the first loader's
/// per-key lock instead of issuing a second load; entries are evicted only
/// when their hold count (the `Arc` strong count, which counts the cache's
/// own reference plus every handle still held by a caller) is exactly one.
pub struct ConnectorCache {
    entries: Mutex<LruCache<String, Arc<Connector>>>,
    load_locks: DashMap<String, Arc<AsyncMutex<()>>>,
    config: CacheConfig,
}

impl ConnectorCache {
    #[must_use]
    pub fn new(config: CacheConfig) -> Self {
        let capacity = NonZeroUsize::new(config.max_entries).unwrap_or(NonZeroUsize::MIN);
        Self { entries: Mutex::new(LruCache::new(capacity)), load_locks: DashMap::new(), config }
    }

    /// Return a shared handle to `dataset_name`'s connector, materializing
    /// it if absent. At most one load runs per dataset at a time; other
    /// callers racing on a cold key await that load's result.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::DatasetNotFound` if the metadata store has no
    /// such dataset, or `StoreError::Query` if materialization fails. A
    /// failed load never populates the cache.
    pub async fn acquire(
        &self,
        metadata_store: &dyn MetadataStore,
        dataset_name: &str,
    ) -> Result<Arc<Connector>, StoreError> {
        if let Some(hit) = self.entries.lock().get(dataset_name).cloned() {
            return Ok(hit);
        }

        let load_lock = self
            .load_locks
            .entry(dataset_name.to_string())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone();
        let _guard = load_lock.lock().await;

        // Re-check: the loader that held this lock before us may have
        // already materialized the entry.
        if let Some(hit) = self.entries.lock().get(dataset_name).cloned() {
            return Ok(hit);
        }

        let dataset = metadata_store.get_dataset(dataset_name).await?;
        let metadata = metadata_store.get_metadata(dataset_name).await?;
        let connector = connector::materialize(&dataset, metadata)
            .map_err(|reason| StoreError::Query(format!("connector materialization failed: {reason}")))?;
        let connector = Arc::new(connector);

        self.insert_with_eviction(dataset_name.to_string(), connector.clone());
        self.load_locks.remove(dataset_name);
        Ok(connector)
    }

    /// Drop `dataset_name`'s cached entry, if any. The next `acquire`
    /// rebuilds it from the metadata store.
    pub fn invalidate(&self, dataset_name: &str) {
        self.entries.lock().pop(dataset_name);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn insert_with_eviction(&self, key: String, value: Arc<Connector>) {
        let mut entries = self.entries.lock();
        entries.put(key, value);

        // `lru::LruCache` already holds `max_entries` here but its own
        // eviction doesn't know about in-flight holds, so if capacity is
        // exceeded we walk from the LRU end and evict the first entry
        // nobody else is holding, skipping any still-held entries.
        while entries.len() > self.config.max_entries {
            let candidate = entries
                .iter()
                .rev()
                .find(|(_, v)| Arc::strong_count(v) == 1)
                .map(|(k, _)| k.clone());
            match candidate {
                Some(k) => {
                    entries.pop(&k);
                }
                None => break,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use lomas_store::{AccessKind, ColumnSpec, Dataset, Metadata};
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingStore {
        loads: AtomicUsize,
    }

    #[async_trait]
    impl MetadataStore for CountingStore {
        async fn get_dataset(&self, dataset_name: &str) -> Result<Dataset, StoreError> {
            self.loads.fetch_add(1, Ordering::SeqCst);
            let mut access_params = BTreeMap::new();
            access_params.insert("path".to_string(), "/data/x.csv".to_string());
            Ok(Dataset {
                dataset_name: dataset_name.to_string(),
                access_kind: AccessKind::Path,
                access_params,
                metadata_ref: format!("{dataset_name}.meta"),
                credentials_name: None,
            })
        }

        async fn get_metadata(&self, _dataset_name: &str) -> Result<Metadata, StoreError> {
            Ok(Metadata {
                max_ids: 1,
                rows: 10,
                columns: vec![(
                    "x".to_string(),
                    ColumnSpec::Numeric { lower: 0.0, upper: 1.0, integer: false, nullable_probability: 0.0 },
                )],
            })
        }
    }

    #[tokio::test]
    async fn second_acquire_hits_cache_without_reloading() {
        let store = CountingStore { loads: AtomicUsize::new(0) };
        let cache = ConnectorCache::new(CacheConfig::default());

        cache.acquire(&store, "PENGUIN").await.unwrap();
        cache.acquire(&store, "PENGUIN").await.unwrap();

        assert_eq!(store.loads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn concurrent_acquires_single_flight() {
        let store = Arc::new(CountingStore { loads: AtomicUsize::new(0) });
        let cache = Arc::new(ConnectorCache::new(CacheConfig::default()));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let store = store.clone();
            let cache = cache.clone();
            handles.push(tokio::spawn(async move { cache.acquire(store.as_ref(), "PENGUIN").await }));
        }
        for h in handles {
            h.await.unwrap().unwrap();
        }

        assert_eq!(store.loads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn invalidate_forces_reload() {
        let store = CountingStore { loads: AtomicUsize::new(0) };
        let cache = ConnectorCache::new(CacheConfig::default());

        cache.acquire(&store, "PENGUIN").await.unwrap();
        cache.invalidate("PENGUIN");
        cache.acquire(&store, "PENGUIN").await.unwrap();

        assert_eq!(store.loads.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn eviction_skips_held_entries() {
        let store = CountingStore { loads: AtomicUsize::new(0) };
        let cache = ConnectorCache::new(CacheConfig { max_entries: 1 });

        let held = cache.acquire(&store, "A").await.unwrap();
        cache.acquire(&store, "B").await.unwrap();

        // "A" is still externally held, so eviction must have skipped it
        // even though it is the less-recently-used entry overall.
        assert_eq!(Arc::strong_count(&held), 2);
        assert!(cache.len() >= 1);
    }
}

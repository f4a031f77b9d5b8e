//! Local storage engine seam.
//!
//! The read path issues keyed byte-blob gets against a per-resource engine.
//! Engines are registered by `<store>_v<n>` resource name in a repository;
//! the in-memory engine backs tests and local mode, while production wires
//! a persistent engine behind the same trait.

use crate::core::error::{StrataError, StrataResult};
use bytes::Bytes;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

/// Keyed byte-blob storage for one store version.
pub trait StorageEngine: Send + Sync {
    /// Point lookup within a physical sub-partition.
    fn get(&self, partition: u32, key: &[u8]) -> StrataResult<Option<Bytes>>;
}

/// In-memory storage engine, partitioned.
#[derive(Debug, Default)]
pub struct MemoryStorageEngine {
    partitions: RwLock<HashMap<u32, HashMap<Vec<u8>, Bytes>>>,
}

impl MemoryStorageEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a value. The write path lives outside this crate; tests and
    /// local tooling use this to materialize fixtures.
    pub fn put(&self, partition: u32, key: impl Into<Vec<u8>>, value: impl Into<Bytes>) {
        self.partitions
            .write()
            .entry(partition)
            .or_default()
            .insert(key.into(), value.into());
    }

    /// Remove a value.
    pub fn delete(&self, partition: u32, key: &[u8]) {
        if let Some(map) = self.partitions.write().get_mut(&partition) {
            map.remove(key);
        }
    }
}

impl StorageEngine for MemoryStorageEngine {
    fn get(&self, partition: u32, key: &[u8]) -> StrataResult<Option<Bytes>> {
        Ok(self
            .partitions
            .read()
            .get(&partition)
            .and_then(|map| map.get(key))
            .cloned())
    }
}

/// Repository of locally hosted storage engines, keyed by resource name.
#[derive(Default)]
pub struct StorageEngineRepository {
    engines: RwLock<HashMap<String, Arc<dyn StorageEngine>>>,
}

impl StorageEngineRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an engine for a resource.
    pub fn register(&self, resource: &str, engine: Arc<dyn StorageEngine>) {
        self.engines.write().insert(resource.to_string(), engine);
    }

    /// Remove an engine, e.g. when a store version is retired.
    pub fn remove(&self, resource: &str) {
        self.engines.write().remove(resource);
    }

    /// The engine hosting a resource.
    pub fn local_engine(&self, resource: &str) -> StrataResult<Arc<dyn StorageEngine>> {
        self.engines
            .read()
            .get(resource)
            .cloned()
            .ok_or_else(|| StrataError::EngineNotFound {
                resource: resource.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_engine_get_put() {
        let engine = MemoryStorageEngine::new();
        assert!(engine.get(0, b"k").unwrap().is_none());

        engine.put(0, b"k".to_vec(), Bytes::from_static(b"v"));
        assert_eq!(engine.get(0, b"k").unwrap().unwrap(), Bytes::from_static(b"v"));

        // Same key in another partition is independent.
        assert!(engine.get(1, b"k").unwrap().is_none());

        engine.delete(0, b"k");
        assert!(engine.get(0, b"k").unwrap().is_none());
    }

    #[test]
    fn test_repository_lookup() {
        let repo = StorageEngineRepository::new();
        assert!(repo.local_engine("orders_v1").is_err());

        repo.register("orders_v1", Arc::new(MemoryStorageEngine::new()));
        assert!(repo.local_engine("orders_v1").is_ok());

        repo.remove("orders_v1");
        assert!(repo.local_engine("orders_v1").is_err());
    }
}

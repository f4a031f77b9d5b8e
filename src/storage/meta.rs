//! Store-version metadata seam.
//!
//! The read path consults ingestion metadata per resource: whether values
//! are chunked, the compression strategy and dictionary, per-partition
//! ingestion offsets, the partitioner configuration, and introspection
//! snapshots for the server admin surface.

use crate::core::error::StrataResult;
use bytes::Bytes;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Compression applied to a store version's values.
///
/// The strategy and dictionary are passthrough metadata for clients;
/// decompression happens router-side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum CompressionStrategy {
    #[default]
    NoOp,
    Gzip,
    Zstd,
}

/// Partitioner configuration attached to a store version.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PartitionerConfig {
    /// Sub-partition multiplication factor. 1 disables sub-partitioning.
    pub amplification_factor: u32,
    /// Partitioner implementation name.
    pub partitioner: String,
    /// Free-form partitioner parameters.
    #[serde(default)]
    pub params: HashMap<String, String>,
}

impl Default for PartitionerConfig {
    fn default() -> Self {
        Self {
            amplification_factor: 1,
            partitioner: "xxhash".to_string(),
            params: HashMap::new(),
        }
    }
}

/// Per-partition ingestion snapshot for server admin introspection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestionSnapshot {
    pub partition: u32,
    pub offset: u64,
    pub bytes_consumed: u64,
    pub records_consumed: u64,
}

/// Ingestion and serving metadata per store version.
pub trait MetadataRetriever: Send + Sync {
    /// Whether values of this store version may be chunked.
    fn is_store_version_chunked(&self, resource: &str) -> bool;

    /// Compression strategy for this store version.
    fn compression_strategy(&self, resource: &str) -> CompressionStrategy;

    /// Shared compression dictionary, if the strategy uses one.
    fn compression_dictionary(&self, resource: &str) -> Option<Bytes>;

    /// Last ingested offset for a sub-partition.
    fn offset(&self, resource: &str, partition: u32) -> Option<u64>;

    /// Partitioner configuration, if one is attached.
    fn partitioner_config(&self, resource: &str) -> StrataResult<Option<PartitionerConfig>>;

    /// Ingestion snapshots for introspection; all partitions when
    /// `partition` is `None`.
    fn ingestion_snapshots(
        &self,
        resource: &str,
        partition: Option<u32>,
    ) -> Vec<IngestionSnapshot>;
}

/// In-memory metadata retriever used by tests and local mode.
#[derive(Debug, Default)]
pub struct MemoryMetadata {
    inner: RwLock<MemoryMetadataInner>,
}

#[derive(Debug, Default)]
struct MemoryMetadataInner {
    chunked: HashMap<String, bool>,
    compression: HashMap<String, CompressionStrategy>,
    dictionaries: HashMap<String, Bytes>,
    offsets: HashMap<(String, u32), u64>,
    partitioners: HashMap<String, PartitionerConfig>,
    snapshots: HashMap<String, BTreeMap<u32, IngestionSnapshot>>,
}

impl MemoryMetadata {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_chunked(&self, resource: &str, chunked: bool) {
        self.inner.write().chunked.insert(resource.to_string(), chunked);
    }

    pub fn set_compression(&self, resource: &str, strategy: CompressionStrategy) {
        self.inner
            .write()
            .compression
            .insert(resource.to_string(), strategy);
    }

    pub fn set_dictionary(&self, resource: &str, dictionary: Bytes) {
        self.inner
            .write()
            .dictionaries
            .insert(resource.to_string(), dictionary);
    }

    pub fn set_offset(&self, resource: &str, partition: u32, offset: u64) {
        self.inner
            .write()
            .offsets
            .insert((resource.to_string(), partition), offset);
    }

    pub fn set_partitioner_config(&self, resource: &str, config: PartitionerConfig) {
        self.inner
            .write()
            .partitioners
            .insert(resource.to_string(), config);
    }

    pub fn set_snapshot(&self, resource: &str, snapshot: IngestionSnapshot) {
        self.inner
            .write()
            .snapshots
            .entry(resource.to_string())
            .or_default()
            .insert(snapshot.partition, snapshot);
    }
}

impl MetadataRetriever for MemoryMetadata {
    fn is_store_version_chunked(&self, resource: &str) -> bool {
        self.inner.read().chunked.get(resource).copied().unwrap_or(false)
    }

    fn compression_strategy(&self, resource: &str) -> CompressionStrategy {
        self.inner
            .read()
            .compression
            .get(resource)
            .copied()
            .unwrap_or_default()
    }

    fn compression_dictionary(&self, resource: &str) -> Option<Bytes> {
        self.inner.read().dictionaries.get(resource).cloned()
    }

    fn offset(&self, resource: &str, partition: u32) -> Option<u64> {
        self.inner
            .read()
            .offsets
            .get(&(resource.to_string(), partition))
            .copied()
    }

    fn partitioner_config(&self, resource: &str) -> StrataResult<Option<PartitionerConfig>> {
        Ok(self.inner.read().partitioners.get(resource).cloned())
    }

    fn ingestion_snapshots(
        &self,
        resource: &str,
        partition: Option<u32>,
    ) -> Vec<IngestionSnapshot> {
        let inner = self.inner.read();
        let Some(snapshots) = inner.snapshots.get(resource) else {
            return Vec::new();
        };
        match partition {
            Some(p) => snapshots.get(&p).cloned().into_iter().collect(),
            None => snapshots.values().cloned().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_for_unknown_resource() {
        let meta = MemoryMetadata::new();
        assert!(!meta.is_store_version_chunked("orders_v1"));
        assert_eq!(meta.compression_strategy("orders_v1"), CompressionStrategy::NoOp);
        assert!(meta.compression_dictionary("orders_v1").is_none());
        assert!(meta.offset("orders_v1", 0).is_none());
        assert!(meta.partitioner_config("orders_v1").unwrap().is_none());
        assert!(meta.ingestion_snapshots("orders_v1", None).is_empty());
    }

    #[test]
    fn test_snapshot_filtering() {
        let meta = MemoryMetadata::new();
        for partition in 0..3 {
            meta.set_snapshot(
                "orders_v1",
                IngestionSnapshot {
                    partition,
                    offset: 100 + partition as u64,
                    bytes_consumed: 0,
                    records_consumed: 0,
                },
            );
        }
        assert_eq!(meta.ingestion_snapshots("orders_v1", None).len(), 3);
        let one = meta.ingestion_snapshots("orders_v1", Some(1));
        assert_eq!(one.len(), 1);
        assert_eq!(one[0].offset, 101);
    }
}

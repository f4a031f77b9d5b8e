//! User-partition to sub-partition resolution.
//!
//! Store versions written with an amplification factor spread each user
//! partition across `amplification_factor` physical sub-partitions; the
//! key decides which one via the store's configured partitioner. Resolved
//! partitioner instances are cached per resource. A missing or broken
//! partitioner configuration resolves as the default configuration
//! (amplification factor 1), so the user partition is served unamplified.

use crate::storage::meta::{MetadataRetriever, PartitionerConfig};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::hash::Hasher;
use std::sync::Arc;
use twox_hash::XxHash64;

/// Maps a key to one of `partition_count` partitions.
pub trait Partitioner: Send + Sync {
    fn partition_for_key(&self, key: &[u8], partition_count: u32) -> u32;
}

/// Default partitioner: 64-bit xxHash modulo the partition count.
#[derive(Debug, Default)]
pub struct XxHashPartitioner {
    seed: u64,
}

impl XxHashPartitioner {
    pub fn new(seed: u64) -> Self {
        Self { seed }
    }
}

impl Partitioner for XxHashPartitioner {
    fn partition_for_key(&self, key: &[u8], partition_count: u32) -> u32 {
        let mut hasher = XxHash64::with_seed(self.seed);
        hasher.write(key);
        (hasher.finish() % u64::from(partition_count.max(1))) as u32
    }
}

/// Instantiate a partitioner by configured name.
fn create_partitioner(config: &PartitionerConfig) -> Option<Arc<dyn Partitioner>> {
    match config.partitioner.as_str() {
        "xxhash" => {
            let seed = config
                .params
                .get("seed")
                .and_then(|s| s.parse().ok())
                .unwrap_or(0);
            Some(Arc::new(XxHashPartitioner::new(seed)))
        }
        _ => None,
    }
}

/// Per-resource partition resolver with a partitioner instance cache.
pub struct PartitionResolver {
    meta: Arc<dyn MetadataRetriever>,
    cache: RwLock<HashMap<String, Arc<dyn Partitioner>>>,
}

impl PartitionResolver {
    pub fn new(meta: Arc<dyn MetadataRetriever>) -> Self {
        Self {
            meta,
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Resolve the physical sub-partition for `(user_partition, key)`.
    ///
    /// A missing or broken partitioner configuration resolves as the
    /// default configuration: amplification factor 1, so the user
    /// partition is the sub-partition.
    pub fn sub_partition(&self, resource: &str, user_partition: u32, key: &[u8]) -> u32 {
        let config = match self.meta.partitioner_config(resource) {
            Ok(Some(config)) => config,
            Ok(None) => return user_partition,
            Err(error) => {
                tracing::error!(resource = %resource, error = %error, "cannot acquire partitioner config");
                return user_partition;
            }
        };
        if config.amplification_factor <= 1 {
            return user_partition;
        }

        let Some(partitioner) = self.partitioner_for(resource, &config) else {
            return user_partition;
        };
        let sub_offset = partitioner.partition_for_key(key, config.amplification_factor);
        user_partition * config.amplification_factor + sub_offset
    }

    fn partitioner_for(
        &self,
        resource: &str,
        config: &PartitionerConfig,
    ) -> Option<Arc<dyn Partitioner>> {
        if let Some(cached) = self.cache.read().get(resource) {
            return Some(cached.clone());
        }
        let Some(partitioner) = create_partitioner(config) else {
            tracing::error!(
                resource = %resource,
                partitioner = %config.partitioner,
                "unknown partitioner, falling back to the default partitioner config"
            );
            return None;
        };
        self.cache
            .write()
            .insert(resource.to_string(), partitioner.clone());
        Some(partitioner)
    }
}

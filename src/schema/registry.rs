//! Schema registry collaborator.
//!
//! Value schemas are registered per store under small integer ids. The read
//! path resolves the schema named by a request's `value_schema_id`, or the
//! latest registered schema when the request does not pin one.

use crate::core::error::{StrataError, StrataResult};
use crate::schema::record::RecordSchema;
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// A registered schema with its id.
#[derive(Debug, Clone)]
pub struct SchemaEntry {
    pub id: i32,
    pub schema: Arc<RecordSchema>,
}

/// Read-only schema registry.
pub trait SchemaRegistry: Send + Sync {
    /// The value schema registered for `store` under `id`.
    fn value_schema(&self, store: &str, id: i32) -> StrataResult<Arc<RecordSchema>>;

    /// The latest (highest-id) value schema registered for `store`.
    fn latest_value_schema(&self, store: &str) -> StrataResult<SchemaEntry>;
}

/// In-memory schema registry used by tests and local mode.
#[derive(Debug, Default)]
pub struct MemorySchemaRegistry {
    stores: RwLock<HashMap<String, BTreeMap<i32, Arc<RecordSchema>>>>,
}

impl MemorySchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a value schema for a store.
    pub fn register(&self, store: &str, id: i32, schema: RecordSchema) {
        self.stores
            .write()
            .entry(store.to_string())
            .or_default()
            .insert(id, Arc::new(schema));
    }
}

impl SchemaRegistry for MemorySchemaRegistry {
    fn value_schema(&self, store: &str, id: i32) -> StrataResult<Arc<RecordSchema>> {
        self.stores
            .read()
            .get(store)
            .and_then(|schemas| schemas.get(&id))
            .cloned()
            .ok_or_else(|| StrataError::SchemaNotFound {
                store: store.to_string(),
                schema_id: id,
            })
    }

    fn latest_value_schema(&self, store: &str) -> StrataResult<SchemaEntry> {
        self.stores
            .read()
            .get(store)
            .and_then(|schemas| schemas.iter().next_back())
            .map(|(id, schema)| SchemaEntry {
                id: *id,
                schema: schema.clone(),
            })
            .ok_or_else(|| StrataError::SchemaNotFound {
                store: store.to_string(),
                schema_id: -1,
            })
    }
}

//! Durable admin consumption progress.
//!
//! Progress lives in the coordination store under cluster-scoped keys:
//!
//! - `/clusters/<c>/admin/lastSucceededExecutionId`
//! - `/clusters/<c>/admin/executionIdByStore`
//! - `/clusters/<c>/admin/offset`
//!
//! The cluster-wide execution id and offset advance only at the end of a
//! fully successful cycle; the per-store map advances after each applied
//! operation so that timed-out stores can be told apart from stuck ones.

use crate::control::coordination::CoordinationStore;
use crate::core::error::{StrataError, StrataResult};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// Durably persisted admin-log position.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdminOffsetRecord {
    /// Last admin-log offset durably applied, if any cycle completed.
    pub offset: Option<u64>,
    /// Free-form metadata recorded with the offset.
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

/// Accessor for durable admin consumption progress of one cluster.
pub struct ProgressStore {
    coordination: Arc<dyn CoordinationStore>,
    cluster: String,
}

impl ProgressStore {
    pub fn new(coordination: Arc<dyn CoordinationStore>, cluster: &str) -> Self {
        Self {
            coordination,
            cluster: cluster.to_string(),
        }
    }

    fn key(&self, leaf: &str) -> String {
        format!("/clusters/{}/admin/{leaf}", self.cluster)
    }

    fn read<T: DeserializeOwned>(&self, leaf: &str) -> StrataResult<Option<T>> {
        match self.coordination.get(&self.key(leaf))? {
            None => Ok(None),
            Some(bytes) => serde_json::from_slice(&bytes).map(Some).map_err(|e| {
                StrataError::internal(format!("corrupt progress entry {leaf}: {e}"))
            }),
        }
    }

    fn write<T: Serialize>(&self, leaf: &str, value: &T) -> StrataResult<()> {
        let bytes = serde_json::to_vec(value)
            .map_err(|e| StrataError::internal(format!("progress encode failed: {e}")))?;
        self.coordination.put(&self.key(leaf), bytes)
    }

    /// Largest execution id applied successfully cluster-wide.
    pub fn last_succeeded_execution_id(&self) -> StrataResult<Option<u64>> {
        Ok(self.read::<Option<u64>>("lastSucceededExecutionId")?.flatten())
    }

    /// Persist the cluster-wide execution id.
    pub fn update_last_succeeded_execution_id(&self, id: Option<u64>) -> StrataResult<()> {
        self.write("lastSucceededExecutionId", &id)
    }

    /// Per-store execution-id progress map.
    pub fn execution_id_by_store(&self) -> StrataResult<HashMap<String, u64>> {
        Ok(self
            .read::<HashMap<String, u64>>("executionIdByStore")?
            .unwrap_or_default())
    }

    /// Record a successfully applied execution id for one store.
    pub fn update_execution_id_for_store(&self, store: &str, id: u64) -> StrataResult<()> {
        let mut map = self.execution_id_by_store()?;
        map.insert(store.to_string(), id);
        self.write("executionIdByStore", &map)
    }

    /// Last durably applied admin-log offset.
    pub fn last_offset(&self) -> StrataResult<AdminOffsetRecord> {
        Ok(self.read("offset")?.unwrap_or_default())
    }

    /// Persist the admin-log offset.
    pub fn update_last_offset(&self, record: &AdminOffsetRecord) -> StrataResult<()> {
        self.write("offset", record)
    }
}

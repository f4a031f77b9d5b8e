//! Admin operations.
//!
//! Control operations carried by the admin log. Each operation has a stable
//! type tag, a producer-assigned, strictly monotonic cluster-wide execution
//! id, and a derivable store name. Store-name derivation is compile-time
//! dispatch: every payload variant carries a typed `store_name` field,
//! except `KillOfflinePush`, whose target is named by its push topic
//! (`<store>_v<n>`).
//!
//! Payloads are serialized with a schema-id tag so that the envelope's
//! schema id selects the writer schema on decode; the consumer treats the
//! payloads themselves as opaque and hands them to the admin handler.

use crate::core::error::{StrataError, StrataResult};
use crate::core::version;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Current admin operation writer schema id.
pub const ADMIN_OPERATION_SCHEMA_ID: i32 = 1;

/// One admin operation: execution id plus typed payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdminOperation {
    /// Strictly monotonic cluster-wide execution id.
    pub execution_id: u64,
    /// Typed control payload.
    pub payload: AdminPayload,
}

impl AdminOperation {
    pub fn new(execution_id: u64, payload: AdminPayload) -> Self {
        Self {
            execution_id,
            payload,
        }
    }

    /// Stable operation type tag.
    pub fn operation_type(&self) -> &'static str {
        self.payload.operation_type()
    }

    /// The store this operation targets.
    pub fn store_name(&self) -> StrataResult<String> {
        self.payload.store_name()
    }
}

/// Typed admin operation payloads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AdminPayload {
    StoreCreation(StoreCreation),
    ValueSchemaCreation(ValueSchemaCreation),
    PauseStore(PauseStore),
    ResumeStore(ResumeStore),
    KillOfflinePush(KillOfflinePush),
    DeleteStore(DeleteStore),
    SetStoreCurrentVersion(SetStoreCurrentVersion),
    UpdateStore(UpdateStore),
    DeleteAllVersions(DeleteAllVersions),
    DeleteOldVersion(DeleteOldVersion),
}

impl AdminPayload {
    /// Stable operation type tag.
    pub fn operation_type(&self) -> &'static str {
        match self {
            Self::StoreCreation(_) => "STORE_CREATION",
            Self::ValueSchemaCreation(_) => "VALUE_SCHEMA_CREATION",
            Self::PauseStore(_) => "PAUSE_STORE",
            Self::ResumeStore(_) => "RESUME_STORE",
            Self::KillOfflinePush(_) => "KILL_OFFLINE_PUSH",
            Self::DeleteStore(_) => "DELETE_STORE",
            Self::SetStoreCurrentVersion(_) => "SET_STORE_CURRENT_VERSION",
            Self::UpdateStore(_) => "UPDATE_STORE",
            Self::DeleteAllVersions(_) => "DELETE_ALL_VERSIONS",
            Self::DeleteOldVersion(_) => "DELETE_OLD_VERSION",
        }
    }

    /// The store this payload targets. Kill-push payloads derive it from
    /// their `<store>_v<n>` push topic; every other variant carries it.
    pub fn store_name(&self) -> StrataResult<String> {
        match self {
            Self::StoreCreation(p) => Ok(p.store_name.clone()),
            Self::ValueSchemaCreation(p) => Ok(p.store_name.clone()),
            Self::PauseStore(p) => Ok(p.store_name.clone()),
            Self::ResumeStore(p) => Ok(p.store_name.clone()),
            Self::KillOfflinePush(p) => version::store_from_resource_name(&p.push_topic),
            Self::DeleteStore(p) => Ok(p.store_name.clone()),
            Self::SetStoreCurrentVersion(p) => Ok(p.store_name.clone()),
            Self::UpdateStore(p) => Ok(p.store_name.clone()),
            Self::DeleteAllVersions(p) => Ok(p.store_name.clone()),
            Self::DeleteOldVersion(p) => Ok(p.store_name.clone()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreCreation {
    pub store_name: String,
    pub owner: String,
    pub key_schema: String,
    pub value_schema: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValueSchemaCreation {
    pub store_name: String,
    pub schema: String,
    pub schema_id: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PauseStore {
    pub store_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResumeStore {
    pub store_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KillOfflinePush {
    /// Push topic of the version being killed, `<store>_v<n>`.
    pub push_topic: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeleteStore {
    pub store_name: String,
    /// Largest version number being deleted with the store.
    pub largest_used_version: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SetStoreCurrentVersion {
    pub store_name: String,
    pub version: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateStore {
    pub store_name: String,
    /// Partial update of store properties, keyed by property name.
    pub properties: HashMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeleteAllVersions {
    pub store_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeleteOldVersion {
    pub store_name: String,
    pub version: u32,
}

/// Schema-id-tagged codec for admin operations.
#[derive(Debug, Default)]
pub struct AdminOperationCodec;

impl AdminOperationCodec {
    pub fn new() -> Self {
        Self
    }

    /// Serialize an operation under the current writer schema.
    pub fn encode(&self, operation: &AdminOperation) -> StrataResult<(i32, Vec<u8>)> {
        let payload = bincode::serialize(operation)
            .map_err(|e| StrataError::internal(format!("admin operation encode failed: {e}")))?;
        Ok((ADMIN_OPERATION_SCHEMA_ID, payload))
    }

    /// Deserialize an operation written under `schema_id`.
    pub fn decode(&self, schema_id: i32, payload: &[u8], offset: u64) -> StrataResult<AdminOperation> {
        if schema_id != ADMIN_OPERATION_SCHEMA_ID {
            return Err(StrataError::Deserialization {
                offset,
                reason: format!("unknown admin operation schema id {schema_id}"),
            });
        }
        bincode::deserialize(payload).map_err(|e| StrataError::Deserialization {
            offset,
            reason: format!("admin operation decode failed: {e}"),
        })
    }
}

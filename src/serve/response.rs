//! Read responses.
//!
//! Every response carries execution stats (submission wait, queue depth,
//! lookup and compute latencies) so routers can attribute tail latency.
//! Multi-key responses additionally carry per-sub-partition ingestion
//! offsets for staleness tracking.

use crate::core::error::{ReadErrorMapping, ReadStatus, StrataError};
use crate::storage::chunking::ValueRecord;
use crate::storage::meta::CompressionStrategy;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Schema id marking a streaming sentinel for a non-existing key.
pub const NON_EXISTING_KEY_SCHEMA_ID: i32 = -1000;

/// Per-request execution stats attached to responses.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct ResponseStats {
    /// Time the request waited for a worker, in milliseconds.
    pub submission_wait_ms: f64,
    /// Worker-queue depth observed at task start.
    pub queue_depth: u64,
    /// Storage engine lookup time, in milliseconds.
    pub db_lookup_ms: f64,
    /// Compute evaluation time, in milliseconds.
    pub compute_ms: f64,
    /// Compute result serialization time, in milliseconds.
    pub compute_serialize_ms: f64,
}

/// Point-get response.
#[derive(Debug, Clone)]
pub struct PointGetResponse {
    pub value: Option<ValueRecord>,
    pub compression: CompressionStrategy,
    /// Last ingested offset of the serving sub-partition.
    pub offset: Option<u64>,
    /// Key sizes, present when key/value profiling is enabled.
    pub key_sizes: Option<Vec<usize>>,
    /// Value sizes, present when key/value profiling is enabled.
    pub value_sizes: Option<Vec<usize>>,
    pub stats: ResponseStats,
}

impl PointGetResponse {
    pub fn found(&self) -> bool {
        self.value.is_some()
    }
}

/// One record of a batch-get response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchGetRecord {
    /// Caller-side key index; negated for streaming missing-key sentinels.
    pub key_index: i32,
    pub schema_id: i32,
    pub value: Bytes,
}

impl BatchGetRecord {
    /// Streaming sentinel for a key that does not exist, so partial
    /// responses still account for every requested key.
    pub fn non_existing(key_index: i32) -> Self {
        Self {
            key_index: key_index.wrapping_neg(),
            schema_id: NON_EXISTING_KEY_SCHEMA_ID,
            value: Bytes::new(),
        }
    }
}

/// Batch-get response.
#[derive(Debug, Clone)]
pub struct BatchGetResponse {
    pub records: Vec<BatchGetRecord>,
    /// Last ingested offset per touched sub-partition.
    pub partition_offsets: Vec<(u32, u64)>,
    pub compression: CompressionStrategy,
    pub key_sizes: Option<Vec<usize>>,
    pub value_sizes: Option<Vec<usize>>,
    pub stats: ResponseStats,
}

/// One record of a compute response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComputeResponseRecord {
    /// Caller-side key index; negated for streaming missing-key sentinels.
    pub key_index: i32,
    /// Serialized projected result record; empty for sentinels.
    pub value: Bytes,
}

impl ComputeResponseRecord {
    pub fn non_existing(key_index: i32) -> Self {
        Self {
            key_index: key_index.wrapping_neg(),
            value: Bytes::new(),
        }
    }
}

/// Compute response.
#[derive(Debug, Clone)]
pub struct ComputeResponse {
    pub records: Vec<ComputeResponseRecord>,
    pub partition_offsets: Vec<(u32, u64)>,
    pub stats: ResponseStats,
}

/// Short status-only response.
#[derive(Debug, Clone)]
pub struct ShortcutResponse {
    pub status: ReadStatus,
    pub message: String,
}

/// Raw binary response, e.g. a compression dictionary.
#[derive(Debug, Clone)]
pub struct BinaryResponse {
    pub body: Bytes,
}

/// Server admin introspection response.
#[derive(Debug, Clone)]
pub struct ServerAdminResponse {
    pub error: bool,
    pub message: Option<String>,
    pub body: serde_json::Value,
}

/// A read response produced by the dispatcher.
#[derive(Debug, Clone)]
pub enum ReadResponse {
    PointGet(PointGetResponse),
    BatchGet(BatchGetResponse),
    Compute(ComputeResponse),
    Shortcut(ShortcutResponse),
    Binary(BinaryResponse),
    ServerAdmin(ServerAdminResponse),
}

impl ReadResponse {
    /// Short error response for a failed request.
    pub fn from_error(error: &StrataError) -> Self {
        Self::Shortcut(ShortcutResponse {
            status: ReadErrorMapping::to_status(error),
            message: error.to_string(),
        })
    }

    /// Short OK response.
    pub fn ok(message: impl Into<String>) -> Self {
        Self::Shortcut(ShortcutResponse {
            status: ReadStatus::Ok,
            message: message.into(),
        })
    }
}

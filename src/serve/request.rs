//! Typed read requests.
//!
//! The network front-end decodes frames into these request types on the
//! accepting task and hands them to the dispatcher; all storage work then
//! happens on a worker pool. Router-originated requests carry an
//! early-termination signal armed by the upstream deadline tracker.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Cooperative cancellation signal for one request.
///
/// Set by the deadline tracker once the router has given up; checked before
/// queueing and again at task start so no storage work is wasted.
#[derive(Debug, Clone, Default)]
pub struct EarlyTerminationSignal {
    triggered: Arc<AtomicBool>,
}

impl EarlyTerminationSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trigger(&self) {
        self.triggered.store(true, Ordering::Release);
    }

    pub fn is_triggered(&self) -> bool {
        self.triggered.load(Ordering::Acquire)
    }
}

/// Request metadata common to router-originated requests.
#[derive(Debug, Clone, Default)]
pub struct RequestMeta {
    /// Streaming responses tolerate per-key sentinels for missing keys.
    pub streaming: bool,
    /// Deadline-tracker cancellation signal.
    pub early_termination: EarlyTerminationSignal,
}

/// One key of a multi-key request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterKey {
    /// User partition the key routes to.
    pub partition: u32,
    /// Key bytes.
    pub key: Bytes,
    /// Caller-side index used to correlate responses to the input key set.
    pub key_index: i32,
}

/// Point lookup of a single key.
#[derive(Debug, Clone)]
pub struct PointGetRequest {
    pub resource: String,
    pub partition: u32,
    pub key: Bytes,
    pub meta: RequestMeta,
}

/// Batch lookup of many keys.
#[derive(Debug, Clone)]
pub struct BatchGetRequest {
    pub resource: String,
    pub keys: Vec<RouterKey>,
    pub meta: RequestMeta,
}

/// Typed compute operations applied server-side over decoded records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ComputeOperation {
    DotProduct {
        field: String,
        param: Vec<f32>,
        result_field: String,
    },
    CosineSimilarity {
        field: String,
        param: Vec<f32>,
        result_field: String,
    },
    HadamardProduct {
        field: String,
        param: Vec<f32>,
        result_field: String,
    },
    Count {
        field: String,
        result_field: String,
    },
}

impl ComputeOperation {
    /// Input field the operation reads.
    pub fn field(&self) -> &str {
        match self {
            Self::DotProduct { field, .. }
            | Self::CosineSimilarity { field, .. }
            | Self::HadamardProduct { field, .. }
            | Self::Count { field, .. } => field,
        }
    }

    /// Result field the operation writes.
    pub fn result_field(&self) -> &str {
        match self {
            Self::DotProduct { result_field, .. }
            | Self::CosineSimilarity { result_field, .. }
            | Self::HadamardProduct { result_field, .. }
            | Self::Count { result_field, .. } => result_field,
        }
    }
}

/// The schema-driven part of a compute request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComputeRequest {
    /// Value schema the caller serialized its expectations against;
    /// -1 selects the store's latest value schema.
    pub value_schema_id: i32,
    /// Declared result schema, as a schema string.
    pub result_schema: String,
    /// Operations applied in order.
    pub operations: Vec<ComputeOperation>,
}

/// Compute over a set of keys.
#[derive(Debug, Clone)]
pub struct ComputeRouterRequest {
    pub resource: String,
    pub keys: Vec<RouterKey>,
    pub compute: ComputeRequest,
    pub meta: RequestMeta,
}

/// Server-side introspection actions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ServerAdminAction {
    /// Dump per-partition ingestion snapshots for a store version.
    DumpIngestionState {
        resource: String,
        partition: Option<u32>,
    },
    /// Dump the server's effective configuration.
    DumpServerConfigs,
}

/// A read request accepted by the dispatcher.
#[derive(Debug, Clone)]
pub enum ReadRequest {
    PointGet(PointGetRequest),
    BatchGet(BatchGetRequest),
    Compute(ComputeRouterRequest),
    HealthCheck,
    DictionaryFetch { resource: String },
    ServerAdmin(ServerAdminAction),
}

impl ReadRequest {
    /// Resource the request targets, when it targets one.
    pub fn resource(&self) -> Option<&str> {
        match self {
            Self::PointGet(r) => Some(&r.resource),
            Self::BatchGet(r) => Some(&r.resource),
            Self::Compute(r) => Some(&r.resource),
            Self::DictionaryFetch { resource } => Some(resource),
            Self::HealthCheck | Self::ServerAdmin(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_early_termination_signal() {
        let signal = EarlyTerminationSignal::new();
        assert!(!signal.is_triggered());

        let shared = signal.clone();
        shared.trigger();
        assert!(signal.is_triggered());
    }

    #[test]
    fn test_operation_field_accessors() {
        let op = ComputeOperation::DotProduct {
            field: "embedding".into(),
            param: vec![1.0],
            result_field: "score".into(),
        };
        assert_eq!(op.field(), "embedding");
        assert_eq!(op.result_field(), "score");

        let count = ComputeOperation::Count {
            field: "tags".into(),
            result_field: "tag_count".into(),
        };
        assert_eq!(count.field(), "tags");
        assert_eq!(count.result_field(), "tag_count");
    }

    #[test]
    fn test_request_resource() {
        let request = ReadRequest::DictionaryFetch {
            resource: "orders_v2".into(),
        };
        assert_eq!(request.resource(), Some("orders_v2"));
        assert_eq!(ReadRequest::HealthCheck.resource(), None);
    }
}

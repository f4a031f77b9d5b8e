//! Error types and read-path status mapping.
//!
//! Strata defines common error conditions shared by the admin consumer and
//! the storage execution path. Read-path errors map to wire status codes;
//! admin-side errors determine whether consumption stalls (failing offset)
//! or retries on the next cycle.

use thiserror::Error;

/// Common Strata error conditions.
#[derive(Debug, Error)]
pub enum StrataError {
    /// Transport failure while polling the admin log or reaching a
    /// collaborator service. The consumer unsubscribes and retries next tick.
    #[error("transport error: {message}")]
    Transport { message: String },

    /// A record or payload could not be deserialized. Fatal to the message;
    /// consumption stalls at the failing offset until an operator skip.
    #[error("deserialization failed at offset {offset}: {reason}")]
    Deserialization { offset: u64, reason: String },

    /// A record arrived from an unexpected topic or partition.
    #[error("log mismatch: expected {expected}, received {received}")]
    LogMismatch { expected: String, received: String },

    /// The record envelope carried a message type other than Put.
    #[error("unexpected message type: {message_type}")]
    UnexpectedMessageType { message_type: String },

    /// An execution-id gap was detected by data integrity validation.
    #[error("execution id gap: last delegated {last_delegated}, incoming {incoming}")]
    ExecutionIdGap { last_delegated: u64, incoming: u64 },

    /// An admin operation of a non-exempt type did not carry a store name.
    #[error("operation {operation_type} does not carry a store name")]
    MissingStoreName { operation_type: &'static str },

    /// An operator skip was requested for an offset that is not the
    /// currently failing one.
    #[error("cannot skip offset {requested}; first failing offset is {failing:?}")]
    SkipRejected {
        requested: u64,
        failing: Option<u64>,
    },

    /// A store-version name did not match `<store>_v<n>`.
    #[error("invalid store version name: {name}")]
    InvalidStoreVersion { name: String },

    /// The request was cancelled by the upstream deadline tracker before
    /// any storage work was done.
    #[error("request for {resource} terminated early")]
    EarlyTerminated { resource: String },

    /// A chunk named by a manifest was absent from the storage engine.
    #[error("chunk {chunk_index} of {chunk_count} missing for resource {resource}")]
    MissingChunk {
        resource: String,
        chunk_index: usize,
        chunk_count: usize,
    },

    /// No storage engine is hosted for the requested resource.
    #[error("no local storage engine for resource {resource}")]
    EngineNotFound { resource: String },

    /// A schema lookup failed.
    #[error("schema {schema_id} not found for store {store}")]
    SchemaNotFound { store: String, schema_id: i32 },

    /// A compute result schema failed validation against the value schema
    /// and the requested operations.
    #[error("invalid compute result schema: {reason}")]
    ComputeSchema { reason: String },

    /// The request was malformed.
    #[error("malformed request: {reason}")]
    MalformedRequest { reason: String },

    /// The admin handler rejected an operation.
    #[error("admin handler failed for store {store}: {reason}")]
    HandlerFailed { store: String, reason: String },

    /// Internal error.
    #[error("internal error: {message}")]
    Internal { message: String },
}

impl StrataError {
    /// Create a transport error.
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Create a malformed-request error.
    pub fn malformed(reason: impl Into<String>) -> Self {
        Self::MalformedRequest {
            reason: reason.into(),
        }
    }

    /// Whether the admin consumer should stall at the failing offset
    /// (operator intervention required) rather than retry next cycle.
    pub fn blocks_consumption(&self) -> bool {
        matches!(
            self,
            Self::Deserialization { .. } | Self::ExecutionIdGap { .. }
        )
    }
}

/// Result type using StrataError.
pub type StrataResult<T> = Result<T, StrataError>;

// ============================================================================
// Read-path status mapping
// ============================================================================

/// Wire status codes for read responses, HTTP-flavored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadStatus {
    Ok = 200,
    BadRequest = 400,
    NotFound = 404,
    RequestTimeout = 408,
    InternalError = 500,
    ServiceUnavailable = 503,
}

impl ReadStatus {
    /// Numeric code carried on the wire.
    pub fn code(self) -> u16 {
        self as u16
    }
}

/// Maps StrataError to a read-path status code.
pub struct ReadErrorMapping;

impl ReadErrorMapping {
    pub fn to_status(error: &StrataError) -> ReadStatus {
        match error {
            StrataError::EarlyTerminated { .. } => ReadStatus::RequestTimeout,
            StrataError::MalformedRequest { .. }
            | StrataError::InvalidStoreVersion { .. }
            | StrataError::ComputeSchema { .. }
            | StrataError::EngineNotFound { .. }
            | StrataError::SchemaNotFound { .. } => ReadStatus::BadRequest,
            StrataError::Transport { .. } => ReadStatus::ServiceUnavailable,
            _ => ReadStatus::InternalError,
        }
    }
}

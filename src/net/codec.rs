//! Wire protocol for the read path.
//!
//! Frames are a four-byte big-endian length prefix followed by a binary
//! body. Wire request/response types mirror the dispatcher's typed
//! requests, minus process-local state: the early-termination signal is
//! created server-side and armed from the request's deadline.

use crate::core::error::{StrataError, StrataResult};
use crate::serve::request::{
    BatchGetRequest, ComputeRequest, ComputeRouterRequest, EarlyTerminationSignal,
    PointGetRequest, ReadRequest, RequestMeta, RouterKey, ServerAdminAction,
};
use crate::serve::response::{
    BatchGetRecord, ComputeResponseRecord, ReadResponse, ResponseStats,
};
use crate::storage::meta::CompressionStrategy;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Length of the frame header.
pub const FRAME_HEADER_LEN: usize = 4;

/// Upper bound on a single frame body.
pub const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

/// Result of a streaming decode attempt.
#[derive(Debug)]
pub enum DecodeResult<T> {
    /// A full frame was decoded and consumed from the buffer.
    Complete(T),
    /// More data is needed.
    Incomplete,
    /// The stream is malformed; the connection should be closed.
    Invalid(String),
}

/// A read request as it appears on the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum WireRequest {
    PointGet {
        resource: String,
        partition: u32,
        key: Bytes,
        streaming: bool,
        timeout_ms: Option<u64>,
    },
    BatchGet {
        resource: String,
        keys: Vec<RouterKey>,
        streaming: bool,
        timeout_ms: Option<u64>,
    },
    Compute {
        resource: String,
        keys: Vec<RouterKey>,
        compute: ComputeRequest,
        streaming: bool,
        timeout_ms: Option<u64>,
    },
    HealthCheck,
    DictionaryFetch {
        resource: String,
    },
    ServerAdmin(ServerAdminAction),
}

impl WireRequest {
    /// Build the dispatcher request plus the deadline after which the
    /// server arms the early-termination signal.
    pub fn into_read_request(self) -> (ReadRequest, Option<Duration>) {
        fn meta(streaming: bool) -> RequestMeta {
            RequestMeta {
                streaming,
                early_termination: EarlyTerminationSignal::new(),
            }
        }
        match self {
            Self::PointGet {
                resource,
                partition,
                key,
                streaming,
                timeout_ms,
            } => (
                ReadRequest::PointGet(PointGetRequest {
                    resource,
                    partition,
                    key,
                    meta: meta(streaming),
                }),
                timeout_ms.map(Duration::from_millis),
            ),
            Self::BatchGet {
                resource,
                keys,
                streaming,
                timeout_ms,
            } => (
                ReadRequest::BatchGet(BatchGetRequest {
                    resource,
                    keys,
                    meta: meta(streaming),
                }),
                timeout_ms.map(Duration::from_millis),
            ),
            Self::Compute {
                resource,
                keys,
                compute,
                streaming,
                timeout_ms,
            } => (
                ReadRequest::Compute(ComputeRouterRequest {
                    resource,
                    keys,
                    compute,
                    meta: meta(streaming),
                }),
                timeout_ms.map(Duration::from_millis),
            ),
            Self::HealthCheck => (ReadRequest::HealthCheck, None),
            Self::DictionaryFetch { resource } => {
                (ReadRequest::DictionaryFetch { resource }, None)
            }
            Self::ServerAdmin(action) => (ReadRequest::ServerAdmin(action), None),
        }
    }
}

/// A read response as it appears on the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum WireResponse {
    PointGet {
        found: bool,
        schema_id: Option<i32>,
        value: Bytes,
        compression: CompressionStrategy,
        offset: Option<u64>,
        stats: ResponseStats,
    },
    BatchGet {
        records: Vec<BatchGetRecord>,
        partition_offsets: Vec<(u32, u64)>,
        compression: CompressionStrategy,
        stats: ResponseStats,
    },
    Compute {
        records: Vec<ComputeResponseRecord>,
        partition_offsets: Vec<(u32, u64)>,
        stats: ResponseStats,
    },
    Shortcut {
        status: u16,
        message: String,
    },
    Binary {
        body: Bytes,
    },
    ServerAdmin {
        error: bool,
        message: Option<String>,
        /// Introspection body as a JSON string.
        body: String,
    },
}

impl From<ReadResponse> for WireResponse {
    fn from(response: ReadResponse) -> Self {
        match response {
            ReadResponse::PointGet(r) => {
                let (schema_id, value) = match r.value {
                    Some(v) => (Some(v.schema_id), v.data),
                    None => (None, Bytes::new()),
                };
                Self::PointGet {
                    found: schema_id.is_some(),
                    schema_id,
                    value,
                    compression: r.compression,
                    offset: r.offset,
                    stats: r.stats,
                }
            }
            ReadResponse::BatchGet(r) => Self::BatchGet {
                records: r.records,
                partition_offsets: r.partition_offsets,
                compression: r.compression,
                stats: r.stats,
            },
            ReadResponse::Compute(r) => Self::Compute {
                records: r.records,
                partition_offsets: r.partition_offsets,
                stats: r.stats,
            },
            ReadResponse::Shortcut(r) => Self::Shortcut {
                status: r.status.code(),
                message: r.message,
            },
            ReadResponse::Binary(r) => Self::Binary { body: r.body },
            ReadResponse::ServerAdmin(r) => Self::ServerAdmin {
                error: r.error,
                message: r.message,
                body: r.body.to_string(),
            },
        }
    }
}

/// Length-prefixed frame codec.
#[derive(Debug, Default)]
pub struct FrameCodec;

impl FrameCodec {
    pub fn new() -> Self {
        Self
    }

    fn decode_frame(&self, buffer: &mut BytesMut) -> DecodeResult<Bytes> {
        if buffer.len() < FRAME_HEADER_LEN {
            return DecodeResult::Incomplete;
        }
        let mut header = [0u8; FRAME_HEADER_LEN];
        header.copy_from_slice(&buffer[..FRAME_HEADER_LEN]);
        let body_len = u32::from_be_bytes(header) as usize;
        if body_len > MAX_FRAME_LEN {
            return DecodeResult::Invalid(format!("frame of {body_len} bytes exceeds limit"));
        }
        if buffer.len() < FRAME_HEADER_LEN + body_len {
            return DecodeResult::Incomplete;
        }
        buffer.advance(FRAME_HEADER_LEN);
        DecodeResult::Complete(buffer.split_to(body_len).freeze())
    }

    fn encode_frame(&self, body: &[u8]) -> StrataResult<Bytes> {
        if body.len() > MAX_FRAME_LEN {
            return Err(StrataError::internal(format!(
                "frame of {} bytes exceeds limit",
                body.len()
            )));
        }
        let mut out = BytesMut::with_capacity(FRAME_HEADER_LEN + body.len());
        out.put_u32(body.len() as u32);
        out.put_slice(body);
        Ok(out.freeze())
    }

    /// Attempt to decode one request frame from the buffer.
    pub fn decode_request(&self, buffer: &mut BytesMut) -> DecodeResult<WireRequest> {
        match self.decode_frame(buffer) {
            DecodeResult::Complete(body) => match bincode::deserialize(&body) {
                Ok(request) => DecodeResult::Complete(request),
                Err(e) => DecodeResult::Invalid(format!("undecodable request: {e}")),
            },
            DecodeResult::Incomplete => DecodeResult::Incomplete,
            DecodeResult::Invalid(reason) => DecodeResult::Invalid(reason),
        }
    }

    /// Encode one request frame (client side).
    pub fn encode_request(&self, request: &WireRequest) -> StrataResult<Bytes> {
        let body = bincode::serialize(request)
            .map_err(|e| StrataError::internal(format!("request encode failed: {e}")))?;
        self.encode_frame(&body)
    }

    /// Attempt to decode one response frame from the buffer (client side).
    pub fn decode_response(&self, buffer: &mut BytesMut) -> DecodeResult<WireResponse> {
        match self.decode_frame(buffer) {
            DecodeResult::Complete(body) => match bincode::deserialize(&body) {
                Ok(response) => DecodeResult::Complete(response),
                Err(e) => DecodeResult::Invalid(format!("undecodable response: {e}")),
            },
            DecodeResult::Incomplete => DecodeResult::Incomplete,
            DecodeResult::Invalid(reason) => DecodeResult::Invalid(reason),
        }
    }

    /// Encode one response frame.
    pub fn encode_response(&self, response: &WireResponse) -> StrataResult<Bytes> {
        let body = bincode::serialize(response)
            .map_err(|e| StrataError::internal(format!("response encode failed: {e}")))?;
        self.encode_frame(&body)
    }
}

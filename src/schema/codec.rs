//! Stored-value encoding.
//!
//! Every value in the storage engine starts with a four-byte big-endian
//! schema id. Positive ids name a registered value schema; the reserved
//! negative ids mark chunk manifests and individual chunks, which lets the
//! read path distinguish a manifest from a plain value on a chunked store
//! version without any out-of-band signal.

use crate::core::error::{StrataError, StrataResult};
use crate::schema::record::{Record, Value};

/// Length of the schema-id header on every stored value.
pub const VALUE_HEADER_LEN: usize = 4;

/// Reserved schema id marking a chunked-value manifest.
pub const CHUNK_MANIFEST_SCHEMA_ID: i32 = -20;

/// Reserved schema id marking an individual value chunk.
pub const CHUNK_SCHEMA_ID: i32 = -10;

/// Prepend the schema-id header to a payload.
pub fn encode_with_header(schema_id: i32, payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(VALUE_HEADER_LEN + payload.len());
    out.extend_from_slice(&schema_id.to_be_bytes());
    out.extend_from_slice(payload);
    out
}

/// Read the schema id from a stored value.
pub fn read_schema_id(bytes: &[u8]) -> StrataResult<i32> {
    if bytes.len() < VALUE_HEADER_LEN {
        return Err(StrataError::internal(format!(
            "stored value too short for schema-id header: {} bytes",
            bytes.len()
        )));
    }
    let mut header = [0u8; VALUE_HEADER_LEN];
    header.copy_from_slice(&bytes[..VALUE_HEADER_LEN]);
    Ok(i32::from_be_bytes(header))
}

/// The payload of a stored value, past the schema-id header.
pub fn value_payload(bytes: &[u8]) -> StrataResult<&[u8]> {
    if bytes.len() < VALUE_HEADER_LEN {
        return Err(StrataError::internal(
            "stored value too short for schema-id header".to_string(),
        ));
    }
    Ok(&bytes[VALUE_HEADER_LEN..])
}

/// Encode a record as a stored value: header plus binary field values.
pub fn encode_record(schema_id: i32, record: &Record) -> StrataResult<Vec<u8>> {
    let payload = bincode::serialize(record.values())
        .map_err(|e| StrataError::internal(format!("record serialization failed: {e}")))?;
    Ok(encode_with_header(schema_id, &payload))
}

/// Record decoder with reusable scratch state.
///
/// One decoder lives in each worker's scratch space so that repeated
/// decodes during a batch or compute request share allocations.
#[derive(Debug, Default)]
pub struct RecordDecoder {
    scratch: Vec<Value>,
}

impl RecordDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode a value payload (without header) into a reusable record.
    ///
    /// The record's schema determines the expected field count; a mismatch
    /// means the payload was written with an incompatible schema.
    pub fn decode_into(&mut self, record: &mut Record, payload: &[u8]) -> StrataResult<()> {
        self.scratch = bincode::deserialize(payload)
            .map_err(|e| StrataError::internal(format!("record deserialization failed: {e}")))?;
        record.replace_values(std::mem::take(&mut self.scratch))
    }
}

/// Record serializer writing into a reusable buffer.
#[derive(Debug, Default)]
pub struct RecordSerializer;

impl RecordSerializer {
    pub fn new() -> Self {
        Self
    }

    /// Serialize a record's field values into `buffer`, replacing its
    /// contents. The buffer is the worker's reusable scratch buffer.
    pub fn serialize_into(&self, record: &Record, buffer: &mut Vec<u8>) -> StrataResult<()> {
        buffer.clear();
        bincode::serialize_into(&mut *buffer, record.values())
            .map_err(|e| StrataError::internal(format!("record serialization failed: {e}")))
    }
}

//! Chunked-value reassembly.
//!
//! Values larger than the write path's chunking threshold are stored as one
//! manifest record plus N chunk records. The manifest names the chunk keys
//! in order, the schema id of the reassembled value, and its declared total
//! size. The read path issues N+1 gets and reconstructs the value through a
//! [`ChunkingAdapter`], so each query path controls the shape its value is
//! assembled into without re-reading or copying more than once.
//!
//! A chunked store version may still hold small, unchunked values; the
//! schema-id header distinguishes a manifest from a plain value.

use crate::core::error::{StrataError, StrataResult};
use crate::schema::codec::{self, RecordDecoder, CHUNK_MANIFEST_SCHEMA_ID, CHUNK_SCHEMA_ID};
use crate::schema::record::Record;
use crate::storage::engine::StorageEngine;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Manifest describing a value stored across multiple chunk records.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkedValueManifest {
    /// Chunk keys in assembly order.
    pub chunk_keys: Vec<Vec<u8>>,
    /// Schema id of the reassembled value.
    pub schema_id: i32,
    /// Declared size of the reassembled value payload in bytes.
    pub total_size: u32,
}

impl ChunkedValueManifest {
    /// Encode the manifest as a stored value (manifest header included).
    pub fn encode(&self) -> StrataResult<Vec<u8>> {
        let payload = bincode::serialize(self)
            .map_err(|e| StrataError::internal(format!("manifest serialization failed: {e}")))?;
        Ok(codec::encode_with_header(CHUNK_MANIFEST_SCHEMA_ID, &payload))
    }

    /// Decode a manifest from a stored-value payload (header stripped).
    pub fn decode(payload: &[u8]) -> StrataResult<Self> {
        bincode::deserialize(payload)
            .map_err(|e| StrataError::internal(format!("manifest deserialization failed: {e}")))
    }
}

/// Encode a chunk record (chunk header included).
pub fn encode_chunk(payload: &[u8]) -> Vec<u8> {
    codec::encode_with_header(CHUNK_SCHEMA_ID, payload)
}

/// Adapter that shapes reassembled values for one query path.
///
/// Non-chunked values skip the container entirely; chunked values are
/// accumulated chunk by chunk and finalized once complete. A missing chunk
/// is a hard error: partial values are never surfaced.
pub trait ChunkingAdapter {
    /// Temporary accumulation type for chunked values.
    type Container;
    /// Final value type consumed by the query path.
    type Value;

    /// Wrap a small, unchunked value payload.
    fn construct_from_bytes(&mut self, schema_id: i32, payload: &[u8])
        -> StrataResult<Self::Value>;

    /// Allocate the container for a chunked value.
    fn construct_container(&mut self, manifest: &ChunkedValueManifest) -> Self::Container;

    /// Add one chunk payload to the container.
    fn add_chunk_into_container(
        &mut self,
        container: &mut Self::Container,
        chunk_index: usize,
        chunk: &[u8],
    ) -> StrataResult<()>;

    /// Finalize the container into the value.
    fn construct_from_container(
        &mut self,
        schema_id: i32,
        container: Self::Container,
    ) -> StrataResult<Self::Value>;
}

/// Read a value through an adapter, transparently reassembling chunks.
pub fn get_with_adapter<A: ChunkingAdapter>(
    adapter: &mut A,
    engine: &dyn StorageEngine,
    resource: &str,
    partition: u32,
    key: &[u8],
    chunked: bool,
) -> StrataResult<Option<A::Value>> {
    let Some(stored) = engine.get(partition, key)? else {
        return Ok(None);
    };
    let schema_id = codec::read_schema_id(&stored)?;
    let payload = codec::value_payload(&stored)?;

    if !(chunked && schema_id == CHUNK_MANIFEST_SCHEMA_ID) {
        return adapter.construct_from_bytes(schema_id, payload).map(Some);
    }

    let manifest = ChunkedValueManifest::decode(payload)?;
    let chunk_count = manifest.chunk_keys.len();
    let mut container = adapter.construct_container(&manifest);
    let mut assembled = 0usize;

    for (chunk_index, chunk_key) in manifest.chunk_keys.iter().enumerate() {
        let Some(chunk) = engine.get(partition, chunk_key)? else {
            return Err(StrataError::MissingChunk {
                resource: resource.to_string(),
                chunk_index,
                chunk_count,
            });
        };
        let chunk_schema_id = codec::read_schema_id(&chunk)?;
        if chunk_schema_id != CHUNK_SCHEMA_ID {
            return Err(StrataError::internal(format!(
                "record at chunk key {chunk_index} of {resource} is not a chunk (schema id {chunk_schema_id})"
            )));
        }
        let chunk_payload = codec::value_payload(&chunk)?;
        assembled += chunk_payload.len();
        adapter.add_chunk_into_container(&mut container, chunk_index, chunk_payload)?;
    }

    if assembled != manifest.total_size as usize {
        return Err(StrataError::internal(format!(
            "chunked value for {resource} assembled to {assembled} bytes, manifest declared {}",
            manifest.total_size
        )));
    }

    adapter
        .construct_from_container(manifest.schema_id, container)
        .map(Some)
}

/// A raw value with its schema id, as served by point-get.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValueRecord {
    pub schema_id: i32,
    pub data: Bytes,
}

/// Byte-record adapter for the point-get path.
#[derive(Debug, Default)]
pub struct SingleGetAdapter;

impl ChunkingAdapter for SingleGetAdapter {
    type Container = Vec<u8>;
    type Value = ValueRecord;

    fn construct_from_bytes(&mut self, schema_id: i32, payload: &[u8]) -> StrataResult<ValueRecord> {
        Ok(ValueRecord {
            schema_id,
            data: Bytes::copy_from_slice(payload),
        })
    }

    fn construct_container(&mut self, manifest: &ChunkedValueManifest) -> Vec<u8> {
        Vec::with_capacity(manifest.total_size as usize)
    }

    fn add_chunk_into_container(
        &mut self,
        container: &mut Vec<u8>,
        _chunk_index: usize,
        chunk: &[u8],
    ) -> StrataResult<()> {
        container.extend_from_slice(chunk);
        Ok(())
    }

    fn construct_from_container(
        &mut self,
        schema_id: i32,
        container: Vec<u8>,
    ) -> StrataResult<ValueRecord> {
        Ok(ValueRecord {
            schema_id,
            data: Bytes::from(container),
        })
    }
}

/// A batch-get value record, later paired with its request key index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchValue {
    pub schema_id: i32,
    pub value: Bytes,
}

/// Typed-record adapter for the batch-get path.
#[derive(Debug, Default)]
pub struct BatchGetAdapter;

impl ChunkingAdapter for BatchGetAdapter {
    type Container = Vec<u8>;
    type Value = BatchValue;

    fn construct_from_bytes(&mut self, schema_id: i32, payload: &[u8]) -> StrataResult<BatchValue> {
        Ok(BatchValue {
            schema_id,
            value: Bytes::copy_from_slice(payload),
        })
    }

    fn construct_container(&mut self, manifest: &ChunkedValueManifest) -> Vec<u8> {
        Vec::with_capacity(manifest.total_size as usize)
    }

    fn add_chunk_into_container(
        &mut self,
        container: &mut Vec<u8>,
        _chunk_index: usize,
        chunk: &[u8],
    ) -> StrataResult<()> {
        container.extend_from_slice(chunk);
        Ok(())
    }

    fn construct_from_container(
        &mut self,
        schema_id: i32,
        container: Vec<u8>,
    ) -> StrataResult<BatchValue> {
        Ok(BatchValue {
            schema_id,
            value: Bytes::from(container),
        })
    }
}

/// Decoded-record adapter for the compute path.
///
/// Decodes into a reusable record with a reusable decoder so that per-key
/// compute work allocates nothing on the value side. The caller reads the
/// populated record after a successful get.
pub struct DecodedRecordAdapter<'a> {
    pub record: &'a mut Record,
    pub decoder: &'a mut RecordDecoder,
}

impl ChunkingAdapter for DecodedRecordAdapter<'_> {
    type Container = Vec<u8>;
    type Value = ();

    fn construct_from_bytes(&mut self, _schema_id: i32, payload: &[u8]) -> StrataResult<()> {
        self.decoder.decode_into(self.record, payload)
    }

    fn construct_container(&mut self, manifest: &ChunkedValueManifest) -> Vec<u8> {
        Vec::with_capacity(manifest.total_size as usize)
    }

    fn add_chunk_into_container(
        &mut self,
        container: &mut Vec<u8>,
        _chunk_index: usize,
        chunk: &[u8],
    ) -> StrataResult<()> {
        container.extend_from_slice(chunk);
        Ok(())
    }

    fn construct_from_container(&mut self, _schema_id: i32, container: Vec<u8>) -> StrataResult<()> {
        self.decoder.decode_into(self.record, &container)
    }
}

/// Split an encoded value into a manifest plus chunk records.
///
/// This is the writer-side convention, exposed here so that tests and local
/// tooling can materialize chunked fixtures the same way the ingestion path
/// does: the value payload (header stripped) is split into `chunk_size`
/// slices stored under derived chunk keys.
pub fn chunk_value(
    key: &[u8],
    encoded_value: &[u8],
    chunk_size: usize,
) -> StrataResult<(ChunkedValueManifest, Vec<(Vec<u8>, Vec<u8>)>)> {
    let schema_id = codec::read_schema_id(encoded_value)?;
    let payload = codec::value_payload(encoded_value)?;

    let mut chunk_keys = Vec::new();
    let mut chunks = Vec::new();
    for (index, piece) in payload.chunks(chunk_size.max(1)).enumerate() {
        let mut chunk_key = key.to_vec();
        chunk_key.extend_from_slice(b"/chunk/");
        chunk_key.extend_from_slice(index.to_string().as_bytes());
        chunk_keys.push(chunk_key.clone());
        chunks.push((chunk_key, encode_chunk(piece)));
    }

    let manifest = ChunkedValueManifest {
        chunk_keys,
        schema_id,
        total_size: payload.len() as u32,
    };
    Ok((manifest, chunks))
}

//! Chunked-value round-trip tests.
//!
//! A value split into K chunks by the writer convention must come back
//! byte-identical through the read path, and a torn value (missing chunk)
//! must surface as a hard error, never as partial data.

mod common;

use bytes::Bytes;
use common::ServeFixture;
use strata::config::ServeConfig;
use strata::error::ReadStatus;
use strata::request::{PointGetRequest, ReadRequest, RequestMeta};
use strata::response::ReadResponse;
use strata::schema::codec as value_codec;
use strata::storage::chunking;

async fn point_get(fixture: &ServeFixture, key: &[u8]) -> ReadResponse {
    fixture
        .dispatcher
        .handle(ReadRequest::PointGet(PointGetRequest {
            resource: fixture.resource.clone(),
            partition: 0,
            key: Bytes::copy_from_slice(key),
            meta: RequestMeta::default(),
        }))
        .await
}

fn store_chunked(fixture: &ServeFixture, key: &[u8], payload: &[u8], chunk_size: usize) -> usize {
    let encoded = value_codec::encode_with_header(5, payload);
    let (manifest, chunks) = chunking::chunk_value(key, &encoded, chunk_size).unwrap();
    let count = chunks.len();
    fixture
        .engine
        .put(0, key.to_vec(), Bytes::from(manifest.encode().unwrap()));
    for (chunk_key, chunk) in chunks {
        fixture.engine.put(0, chunk_key, Bytes::from(chunk));
    }
    count
}

#[tokio::test(flavor = "multi_thread")]
async fn chunked_values_round_trip_byte_identical() {
    let fixture = ServeFixture::new(ServeConfig::default());

    // Deterministic payload, split at several different chunk sizes
    // including one that divides the payload evenly and one that doesn't.
    let payload: Vec<u8> = (0..4096u32).map(|i| (i % 251) as u8).collect();
    for (key, chunk_size) in [
        (b"one".as_slice(), payload.len()),
        (b"even".as_slice(), 1024),
        (b"ragged".as_slice(), 1000),
        (b"tiny".as_slice(), 7),
    ] {
        let count = store_chunked(&fixture, key, &payload, chunk_size);
        assert_eq!(count, payload.len().div_ceil(chunk_size));

        match point_get(&fixture, key).await {
            ReadResponse::PointGet(r) => {
                let value = r.value.expect("value found");
                assert_eq!(value.schema_id, 5);
                assert_eq!(value.data, Bytes::copy_from_slice(&payload));
            }
            other => panic!("unexpected response: {other:?}"),
        }
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn missing_chunk_is_a_hard_error() {
    let fixture = ServeFixture::new(ServeConfig::default());
    let payload = vec![0xabu8; 512];
    store_chunked(&fixture, b"torn", &payload, 128);
    fixture.engine.delete(0, b"torn/chunk/2");

    match point_get(&fixture, b"torn").await {
        ReadResponse::Shortcut(shortcut) => {
            assert_eq!(shortcut.status, ReadStatus::InternalError);
            assert!(shortcut.message.contains("chunk"));
        }
        other => panic!("unexpected response: {other:?}"),
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn manifest_size_mismatch_is_a_hard_error() {
    let fixture = ServeFixture::new(ServeConfig::default());
    let payload = vec![0x11u8; 256];
    let encoded = value_codec::encode_with_header(5, &payload);
    let (mut manifest, chunks) = chunking::chunk_value(b"lying", &encoded, 64).unwrap();
    manifest.total_size -= 1;
    fixture
        .engine
        .put(0, b"lying".to_vec(), Bytes::from(manifest.encode().unwrap()));
    for (chunk_key, chunk) in chunks {
        fixture.engine.put(0, chunk_key, Bytes::from(chunk));
    }

    match point_get(&fixture, b"lying").await {
        ReadResponse::Shortcut(shortcut) => {
            assert_eq!(shortcut.status, ReadStatus::InternalError);
        }
        other => panic!("unexpected response: {other:?}"),
    }
}

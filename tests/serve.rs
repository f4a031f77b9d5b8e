//! Storage execution handler integration tests.
//!
//! Exercises the dispatcher end to end against in-memory collaborators:
//! point and batch gets over chunked and plain values, schema-driven
//! compute with projection and streaming sentinels, early termination,
//! health checks, and the introspection surface.

mod common;

use bytes::Bytes;
use common::{profile_record, profile_value_schema, ServeFixture};
use std::collections::BTreeMap;
use std::sync::Arc;
use strata::compute::COMPUTATION_ERROR_MAP_FIELD;
use strata::config::ServeConfig;
use strata::error::ReadStatus;
use strata::metrics::names;
use strata::record::{FieldSchema, FieldType, Record, RecordSchema, Value};
use strata::request::{
    BatchGetRequest, ComputeOperation, ComputeRequest, ComputeRouterRequest, PointGetRequest,
    ReadRequest, RequestMeta, RouterKey, ServerAdminAction,
};
use strata::response::{ReadResponse, NON_EXISTING_KEY_SCHEMA_ID};
use strata::schema::codec as value_codec;

fn router_key(partition: u32, key: &[u8], key_index: i32) -> RouterKey {
    RouterKey {
        partition,
        key: Bytes::copy_from_slice(key),
        key_index,
    }
}

fn result_schema_json() -> String {
    RecordSchema::new(
        "profile_projection",
        vec![
            FieldSchema::new("id", FieldType::Long),
            FieldSchema::new("name", FieldType::Str),
            FieldSchema::new("score", FieldType::Double),
            FieldSchema::nullable(COMPUTATION_ERROR_MAP_FIELD, FieldType::StringMap),
        ],
    )
    .to_json()
}

fn compute_request(
    fixture: &ServeFixture,
    keys: Vec<RouterKey>,
    operations: Vec<ComputeOperation>,
    streaming: bool,
) -> ReadRequest {
    ReadRequest::Compute(ComputeRouterRequest {
        resource: fixture.resource.clone(),
        keys,
        compute: ComputeRequest {
            value_schema_id: 5,
            result_schema: result_schema_json(),
            operations,
        },
        meta: RequestMeta {
            streaming,
            ..RequestMeta::default()
        },
    })
}

#[tokio::test(flavor = "multi_thread")]
async fn point_get_round_trips_plain_and_chunked_values() {
    let fixture = ServeFixture::new(ServeConfig::default());
    let schema = Arc::new(profile_value_schema());

    let plain = profile_record(schema.clone(), 1, vec![1.0, 2.0]);
    fixture.put_record(0, b"plain", &plain);

    let big = profile_record(schema.clone(), 2, vec![0.5; 64]);
    let chunks = fixture.put_chunked_record(0, b"big", &big, 64);
    assert!(chunks > 1, "fixture must actually chunk");

    for (key, expected) in [(b"plain".as_slice(), &plain), (b"big".as_slice(), &big)] {
        let response = fixture
            .dispatcher
            .handle(ReadRequest::PointGet(PointGetRequest {
                resource: fixture.resource.clone(),
                partition: 0,
                key: Bytes::copy_from_slice(key),
                meta: RequestMeta::default(),
            }))
            .await;
        match response {
            ReadResponse::PointGet(r) => {
                let value = r.value.expect("value found");
                assert_eq!(value.schema_id, 5);
                let expected_bytes = value_codec::encode_record(5, expected).unwrap();
                assert_eq!(
                    value.data,
                    Bytes::copy_from_slice(value_codec::value_payload(&expected_bytes).unwrap())
                );
            }
            other => panic!("unexpected response: {other:?}"),
        }
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn point_get_missing_key_is_not_found() {
    let fixture = ServeFixture::new(ServeConfig::default());
    let response = fixture
        .dispatcher
        .handle(ReadRequest::PointGet(PointGetRequest {
            resource: fixture.resource.clone(),
            partition: 0,
            key: Bytes::from_static(b"missing"),
            meta: RequestMeta::default(),
        }))
        .await;
    match response {
        ReadResponse::PointGet(r) => assert!(!r.found()),
        other => panic!("unexpected response: {other:?}"),
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn point_get_attaches_profiling_sizes_when_enabled() {
    let fixture = ServeFixture::new(ServeConfig {
        key_value_profiling: true,
        ..ServeConfig::default()
    });
    let schema = Arc::new(profile_value_schema());
    fixture.put_record(0, b"k", &profile_record(schema, 1, vec![1.0]));

    let response = fixture
        .dispatcher
        .handle(ReadRequest::PointGet(PointGetRequest {
            resource: fixture.resource.clone(),
            partition: 0,
            key: Bytes::from_static(b"k"),
            meta: RequestMeta::default(),
        }))
        .await;
    match response {
        ReadResponse::PointGet(r) => {
            assert_eq!(r.key_sizes, Some(vec![1]));
            assert_eq!(r.value_sizes.unwrap().len(), 1);
        }
        other => panic!("unexpected response: {other:?}"),
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn batch_get_streaming_marks_missing_keys() {
    let fixture = ServeFixture::new(ServeConfig::default());
    let schema = Arc::new(profile_value_schema());
    fixture.put_record(0, b"k0", &profile_record(schema.clone(), 0, vec![1.0]));
    fixture.put_record(1, b"k2", &profile_record(schema.clone(), 2, vec![2.0]));

    let request = BatchGetRequest {
        resource: fixture.resource.clone(),
        keys: vec![
            router_key(0, b"k0", 0),
            router_key(0, b"k1", 1),
            router_key(1, b"k2", 2),
        ],
        meta: RequestMeta {
            streaming: true,
            ..RequestMeta::default()
        },
    };
    let response = fixture
        .dispatcher
        .handle(ReadRequest::BatchGet(request))
        .await;

    match response {
        ReadResponse::BatchGet(r) => {
            assert_eq!(r.records.len(), 3);
            let sentinel = r
                .records
                .iter()
                .find(|record| record.key_index < 0)
                .expect("missing key sentinel present");
            assert_eq!(sentinel.key_index, -1);
            assert_eq!(sentinel.schema_id, NON_EXISTING_KEY_SCHEMA_ID);
            assert!(sentinel.value.is_empty());
            // Touched sub-partitions are reported.
            let partitions: Vec<u32> = r.partition_offsets.iter().map(|(p, _)| *p).collect();
            assert_eq!(partitions, vec![0, 1]);
        }
        other => panic!("unexpected response: {other:?}"),
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn batch_get_non_streaming_omits_missing_keys() {
    let fixture = ServeFixture::new(ServeConfig::default());
    let schema = Arc::new(profile_value_schema());
    fixture.put_record(0, b"k0", &profile_record(schema, 0, vec![1.0]));

    let request = BatchGetRequest {
        resource: fixture.resource.clone(),
        keys: vec![router_key(0, b"k0", 0), router_key(0, b"gone", 1)],
        meta: RequestMeta::default(),
    };
    let response = fixture
        .dispatcher
        .handle(ReadRequest::BatchGet(request))
        .await;
    match response {
        ReadResponse::BatchGet(r) => {
            assert_eq!(r.records.len(), 1);
            assert_eq!(r.records[0].key_index, 0);
        }
        other => panic!("unexpected response: {other:?}"),
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn parallel_batch_get_matches_serial_results() {
    let fixture = ServeFixture::new(ServeConfig {
        parallel_batch_get: true,
        parallel_chunk_size: 2,
        ..ServeConfig::default()
    });
    let schema = Arc::new(profile_value_schema());
    let mut keys = Vec::new();
    for i in 0..7i64 {
        let key = format!("k{i}");
        fixture.put_record(0, key.as_bytes(), &profile_record(schema.clone(), i, vec![i as f32]));
        keys.push(router_key(0, key.as_bytes(), i as i32));
    }
    keys.push(router_key(0, b"missing", 7));

    let request = BatchGetRequest {
        resource: fixture.resource.clone(),
        keys,
        meta: RequestMeta {
            streaming: true,
            ..RequestMeta::default()
        },
    };
    let response = fixture
        .dispatcher
        .handle(ReadRequest::BatchGet(request))
        .await;

    match response {
        ReadResponse::BatchGet(r) => {
            assert_eq!(r.records.len(), 8);
            let mut indices: Vec<i32> = r.records.iter().map(|rec| rec.key_index).collect();
            indices.sort_unstable();
            assert_eq!(indices, vec![-7, 0, 1, 2, 3, 4, 5, 6]);
        }
        other => panic!("unexpected response: {other:?}"),
    }
}

/// Chunked compute: dot product over a value reassembled from chunks
/// equals the dot product over the original record, untouched fields
/// project through, and a streaming request marks the missing key with a
/// negated key index and an empty value.
#[tokio::test(flavor = "multi_thread")]
async fn compute_over_chunked_values_with_streaming_sentinel() {
    let fixture = ServeFixture::new(ServeConfig::default());
    let schema = Arc::new(profile_value_schema());

    let embedding: Vec<f32> = (0..24).map(|i| i as f32 * 0.25).collect();
    let param: Vec<f32> = (0..24).map(|i| (24 - i) as f32 * 0.5).collect();
    let expected_dot: f64 = embedding
        .iter()
        .zip(param.iter())
        .map(|(a, b)| f64::from(*a) * f64::from(*b))
        .sum();

    let mut keys = Vec::new();
    for i in 0..5i64 {
        let key = format!("key-{i}");
        let record = profile_record(schema.clone(), i, embedding.clone());
        let chunks = fixture.put_chunked_record(0, key.as_bytes(), &record, 48);
        assert!(chunks >= 3, "values must span several chunks");
        keys.push(router_key(0, key.as_bytes(), i as i32));
    }
    keys.push(router_key(0, b"absent", 5));

    let request = compute_request(
        &fixture,
        keys,
        vec![ComputeOperation::DotProduct {
            field: "embedding".into(),
            param: param.clone(),
            result_field: "score".into(),
        }],
        true,
    );
    let response = fixture.dispatcher.handle(request).await;

    let result_schema = Arc::new(RecordSchema::parse(&result_schema_json()).unwrap());
    match response {
        ReadResponse::Compute(r) => {
            assert_eq!(r.records.len(), 6);
            let mut decoder = value_codec::RecordDecoder::new();
            for record in &r.records {
                if record.key_index < 0 {
                    assert_eq!(record.key_index, -5);
                    assert!(record.value.is_empty());
                    continue;
                }
                let mut decoded = Record::new(result_schema.clone());
                decoder.decode_into(&mut decoded, &record.value).unwrap();
                match decoded.get("score") {
                    Some(Value::Double(score)) => {
                        assert!((score - expected_dot).abs() < 1e-6);
                    }
                    other => panic!("unexpected score: {other:?}"),
                }
                // Projected fields equal the value record's fields.
                assert_eq!(
                    decoded.get("id"),
                    Some(&Value::Long(i64::from(record.key_index)))
                );
                assert_eq!(
                    decoded.get("name"),
                    Some(&Value::Str(format!("profile-{}", record.key_index)))
                );
                // No computation errors.
                assert_eq!(
                    decoded.get(COMPUTATION_ERROR_MAP_FIELD),
                    Some(&Value::StringMap(BTreeMap::new()))
                );
            }
        }
        other => panic!("unexpected response: {other:?}"),
    }
    assert_eq!(
        fixture.metrics.counter_get(names::SERVE_OP_DOT_PRODUCT_TOTAL),
        5
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn compute_null_field_lands_in_error_map() {
    let fixture = ServeFixture::new(ServeConfig::default());
    let schema = Arc::new(profile_value_schema());
    // optional_vector is left null.
    fixture.put_record(0, b"k", &profile_record(schema, 1, vec![1.0]));

    let request = compute_request(
        &fixture,
        vec![router_key(0, b"k", 0)],
        vec![ComputeOperation::DotProduct {
            field: "optional_vector".into(),
            param: vec![1.0],
            result_field: "score".into(),
        }],
        false,
    );
    let response = fixture.dispatcher.handle(request).await;

    let result_schema = Arc::new(RecordSchema::parse(&result_schema_json()).unwrap());
    match response {
        ReadResponse::Compute(r) => {
            let mut decoded = Record::new(result_schema);
            let mut decoder = value_codec::RecordDecoder::new();
            decoder.decode_into(&mut decoded, &r.records[0].value).unwrap();
            assert_eq!(decoded.get("score"), Some(&Value::Double(0.0)));
            match decoded.get(COMPUTATION_ERROR_MAP_FIELD) {
                Some(Value::StringMap(map)) => {
                    assert!(map.get("score").unwrap().contains("null"));
                }
                other => panic!("unexpected error map: {other:?}"),
            }
        }
        other => panic!("unexpected response: {other:?}"),
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn compute_rejects_invalid_result_schema() {
    let fixture = ServeFixture::new(ServeConfig::default());
    let schema = Arc::new(profile_value_schema());
    fixture.put_record(0, b"k", &profile_record(schema, 1, vec![1.0]));

    let request = ReadRequest::Compute(ComputeRouterRequest {
        resource: fixture.resource.clone(),
        keys: vec![router_key(0, b"k", 0)],
        compute: ComputeRequest {
            value_schema_id: 5,
            result_schema: RecordSchema::new(
                "bad",
                vec![FieldSchema::new("unrelated", FieldType::Long)],
            )
            .to_json(),
            operations: vec![],
        },
        meta: RequestMeta::default(),
    });
    let response = fixture.dispatcher.handle(request).await;
    match response {
        ReadResponse::Shortcut(shortcut) => {
            assert_eq!(shortcut.status, ReadStatus::BadRequest);
        }
        other => panic!("unexpected response: {other:?}"),
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn early_terminated_request_never_touches_storage() {
    let fixture = ServeFixture::new(ServeConfig::default());
    let meta = RequestMeta::default();
    meta.early_termination.trigger();

    let response = fixture
        .dispatcher
        .handle(ReadRequest::PointGet(PointGetRequest {
            resource: fixture.resource.clone(),
            partition: 0,
            key: Bytes::from_static(b"k"),
            meta,
        }))
        .await;

    match response {
        ReadResponse::Shortcut(shortcut) => {
            assert_eq!(shortcut.status, ReadStatus::RequestTimeout);
        }
        other => panic!("unexpected response: {other:?}"),
    }
    assert_eq!(
        fixture
            .metrics
            .counter_get(names::SERVE_EARLY_TERMINATION_TOTAL),
        1
    );
    // No lookup latency was recorded: storage was never touched.
    assert!(fixture
        .metrics
        .histogram_get(names::SERVE_DB_LOOKUP_MS)
        .is_none());
}

#[tokio::test(flavor = "multi_thread")]
async fn health_check_reflects_disk_state() {
    let fixture = ServeFixture::new(ServeConfig::default());

    match fixture.dispatcher.handle(ReadRequest::HealthCheck).await {
        ReadResponse::Shortcut(shortcut) => assert_eq!(shortcut.status, ReadStatus::Ok),
        other => panic!("unexpected response: {other:?}"),
    }

    fixture.health.set_healthy(false);
    fixture.health.set_error_message("probe failed");
    match fixture.dispatcher.handle(ReadRequest::HealthCheck).await {
        ReadResponse::Shortcut(shortcut) => {
            assert_eq!(shortcut.status, ReadStatus::InternalError);
        }
        other => panic!("unexpected response: {other:?}"),
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn dictionary_fetch_returns_stored_dictionary() {
    let fixture = ServeFixture::new(ServeConfig::default());
    fixture
        .meta
        .set_dictionary(&fixture.resource, Bytes::from_static(b"dict-bytes"));

    let response = fixture
        .dispatcher
        .handle(ReadRequest::DictionaryFetch {
            resource: fixture.resource.clone(),
        })
        .await;
    match response {
        ReadResponse::Binary(binary) => {
            assert_eq!(binary.body, Bytes::from_static(b"dict-bytes"));
        }
        other => panic!("unexpected response: {other:?}"),
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn server_admin_dumps_ingestion_state_and_configs() {
    let fixture = ServeFixture::new(ServeConfig::default());
    fixture.meta.set_snapshot(
        &fixture.resource,
        strata::meta::IngestionSnapshot {
            partition: 0,
            offset: 41,
            bytes_consumed: 1024,
            records_consumed: 10,
        },
    );

    let response = fixture
        .dispatcher
        .handle(ReadRequest::ServerAdmin(ServerAdminAction::DumpIngestionState {
            resource: fixture.resource.clone(),
            partition: None,
        }))
        .await;
    match response {
        ReadResponse::ServerAdmin(admin) => {
            assert!(!admin.error);
            assert_eq!(admin.body[0]["offset"], 41);
        }
        other => panic!("unexpected response: {other:?}"),
    }

    let response = fixture
        .dispatcher
        .handle(ReadRequest::ServerAdmin(ServerAdminAction::DumpServerConfigs))
        .await;
    match response {
        ReadResponse::ServerAdmin(admin) => {
            assert!(!admin.error);
            assert_eq!(admin.body["cluster"], common::CLUSTER);
        }
        other => panic!("unexpected response: {other:?}"),
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn responses_carry_submission_and_lookup_stats() {
    let fixture = ServeFixture::new(ServeConfig::default());
    let schema = Arc::new(profile_value_schema());
    fixture.put_record(0, b"k", &profile_record(schema, 1, vec![1.0]));

    let response = fixture
        .dispatcher
        .handle(ReadRequest::PointGet(PointGetRequest {
            resource: fixture.resource.clone(),
            partition: 0,
            key: Bytes::from_static(b"k"),
            meta: RequestMeta::default(),
        }))
        .await;
    match response {
        ReadResponse::PointGet(r) => {
            assert!(r.stats.submission_wait_ms >= 0.0);
            assert!(r.stats.db_lookup_ms >= 0.0);
        }
        other => panic!("unexpected response: {other:?}"),
    }
    assert!(fixture
        .metrics
        .histogram_get(names::SERVE_SUBMISSION_WAIT_MS)
        .is_some());
    assert_eq!(
        fixture
            .metrics
            .counter_get_labeled(names::SERVE_REQUESTS_TOTAL, &[("kind", "point_get")]),
        1
    );
}

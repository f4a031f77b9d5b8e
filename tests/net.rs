//! Read-path wire protocol tests.
//!
//! Boots the read listener on an ephemeral port and exercises the framed
//! request/response cycle over a real TCP connection.

mod common;

use bytes::{Bytes, BytesMut};
use common::{profile_record, profile_value_schema, ServeFixture};
use std::sync::Arc;
use strata::config::ServeConfig;
use strata::server::ReadServer;
use strata::wire::{DecodeResult, FrameCodec, WireRequest, WireResponse};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::watch;

struct WireClient {
    stream: TcpStream,
    codec: FrameCodec,
    buffer: BytesMut,
}

impl WireClient {
    async fn connect(addr: std::net::SocketAddr) -> Self {
        Self {
            stream: TcpStream::connect(addr).await.expect("connect"),
            codec: FrameCodec::new(),
            buffer: BytesMut::with_capacity(4096),
        }
    }

    async fn roundtrip(&mut self, request: &WireRequest) -> WireResponse {
        let frame = self.codec.encode_request(request).expect("encode");
        self.stream.write_all(&frame).await.expect("write");
        loop {
            match self.codec.decode_response(&mut self.buffer) {
                DecodeResult::Complete(response) => return response,
                DecodeResult::Incomplete => {
                    let read = self.stream.read_buf(&mut self.buffer).await.expect("read");
                    assert!(read > 0, "connection closed before response");
                }
                DecodeResult::Invalid(reason) => panic!("malformed response: {reason}"),
            }
        }
    }
}

async fn boot(fixture: &ServeFixture) -> (std::net::SocketAddr, watch::Sender<bool>) {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind");
    let addr = listener.local_addr().expect("local addr");
    let server = ReadServer::new(fixture.dispatcher.clone(), shutdown_rx);
    tokio::spawn(async move {
        let _ = server.serve(listener).await;
    });
    (addr, shutdown_tx)
}

#[tokio::test(flavor = "multi_thread")]
async fn health_check_and_point_get_over_tcp() {
    let fixture = ServeFixture::new(ServeConfig::default());
    let schema = Arc::new(profile_value_schema());
    fixture.put_record(0, b"k", &profile_record(schema, 9, vec![1.0, 2.0]));

    let (addr, shutdown_tx) = boot(&fixture).await;
    let mut client = WireClient::connect(addr).await;

    match client.roundtrip(&WireRequest::HealthCheck).await {
        WireResponse::Shortcut { status, message } => {
            assert_eq!(status, 200);
            assert_eq!(message, "OK");
        }
        other => panic!("unexpected response: {other:?}"),
    }

    match client
        .roundtrip(&WireRequest::PointGet {
            resource: fixture.resource.clone(),
            partition: 0,
            key: Bytes::from_static(b"k"),
            streaming: false,
            timeout_ms: None,
        })
        .await
    {
        WireResponse::PointGet {
            found,
            schema_id,
            value,
            ..
        } => {
            assert!(found);
            assert_eq!(schema_id, Some(5));
            assert!(!value.is_empty());
        }
        other => panic!("unexpected response: {other:?}"),
    }

    match client
        .roundtrip(&WireRequest::PointGet {
            resource: fixture.resource.clone(),
            partition: 0,
            key: Bytes::from_static(b"missing"),
            streaming: false,
            timeout_ms: None,
        })
        .await
    {
        WireResponse::PointGet { found, .. } => assert!(!found),
        other => panic!("unexpected response: {other:?}"),
    }

    let _ = shutdown_tx.send(true);
}

#[tokio::test(flavor = "multi_thread")]
async fn multiple_requests_pipeline_on_one_connection() {
    let fixture = ServeFixture::new(ServeConfig::default());
    let (addr, shutdown_tx) = boot(&fixture).await;

    let codec = FrameCodec::new();
    let mut stream = TcpStream::connect(addr).await.expect("connect");

    // Write two requests back to back before reading anything.
    let mut frames = BytesMut::new();
    frames.extend_from_slice(&codec.encode_request(&WireRequest::HealthCheck).unwrap());
    frames.extend_from_slice(
        &codec
            .encode_request(&WireRequest::DictionaryFetch {
                resource: fixture.resource.clone(),
            })
            .unwrap(),
    );
    stream.write_all(&frames).await.expect("write");

    let mut buffer = BytesMut::new();
    let mut responses = Vec::new();
    while responses.len() < 2 {
        match codec.decode_response(&mut buffer) {
            DecodeResult::Complete(response) => responses.push(response),
            DecodeResult::Incomplete => {
                let read = stream.read_buf(&mut buffer).await.expect("read");
                assert!(read > 0, "connection closed early");
            }
            DecodeResult::Invalid(reason) => panic!("malformed response: {reason}"),
        }
    }

    assert!(matches!(
        responses[0],
        WireResponse::Shortcut { status: 200, .. }
    ));
    assert!(matches!(responses[1], WireResponse::Binary { .. }));

    let _ = shutdown_tx.send(true);
}

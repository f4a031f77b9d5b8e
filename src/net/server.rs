//! Read-path TCP listener.
//!
//! Accepts framed requests and hands them to the dispatcher. The accept
//! loop and each connection task watch the shutdown channel; requests
//! carrying a deadline get a watcher task that arms their
//! early-termination signal when the deadline passes.

use crate::core::error::StrataResult;
use crate::net::codec::{DecodeResult, FrameCodec, WireResponse};
use crate::serve::dispatcher::ReadDispatcher;
use crate::serve::request::ReadRequest;
use bytes::BytesMut;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;

/// Read-path server.
pub struct ReadServer {
    dispatcher: Arc<ReadDispatcher>,
    shutdown_rx: watch::Receiver<bool>,
}

impl ReadServer {
    pub fn new(dispatcher: Arc<ReadDispatcher>, shutdown_rx: watch::Receiver<bool>) -> Self {
        Self {
            dispatcher,
            shutdown_rx,
        }
    }

    /// Bind and serve until the shutdown channel flips.
    pub async fn run(self, bind: SocketAddr) -> StrataResult<()> {
        let listener = TcpListener::bind(bind).await.map_err(|e| {
            crate::core::error::StrataError::transport(format!("bind {bind} failed: {e}"))
        })?;
        tracing::info!(bind = %bind, "read listener started");
        self.serve(listener).await
    }

    /// Serve on an already-bound listener.
    pub async fn serve(self, listener: TcpListener) -> StrataResult<()> {
        let mut shutdown_rx = self.shutdown_rx.clone();
        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    match accepted {
                        Ok((stream, peer)) => {
                            tracing::debug!(peer = %peer, "read connection accepted");
                            let dispatcher = self.dispatcher.clone();
                            let shutdown_rx = self.shutdown_rx.clone();
                            tokio::spawn(async move {
                                if let Err(error) =
                                    handle_connection(stream, dispatcher, shutdown_rx).await
                                {
                                    tracing::debug!(peer = %peer, error = %error, "read connection closed");
                                }
                            });
                        }
                        Err(error) => {
                            tracing::warn!(error = %error, "accept failed");
                        }
                    }
                }
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        tracing::info!("read listener stopping");
                        return Ok(());
                    }
                }
            }
        }
    }
}

async fn handle_connection(
    mut stream: TcpStream,
    dispatcher: Arc<ReadDispatcher>,
    mut shutdown_rx: watch::Receiver<bool>,
) -> std::io::Result<()> {
    let codec = FrameCodec::new();
    let mut buffer = BytesMut::with_capacity(8 * 1024);

    loop {
        // Drain complete frames before reading more bytes.
        loop {
            match codec.decode_request(&mut buffer) {
                DecodeResult::Complete(wire_request) => {
                    let (request, deadline) = wire_request.into_read_request();
                    arm_deadline(&request, deadline);
                    let response = dispatcher.handle(request).await;
                    let wire_response = WireResponse::from(response);
                    match codec.encode_response(&wire_response) {
                        Ok(frame) => stream.write_all(&frame).await?,
                        Err(error) => {
                            tracing::error!(error = %error, "response encode failed");
                            return Ok(());
                        }
                    }
                }
                DecodeResult::Incomplete => break,
                DecodeResult::Invalid(reason) => {
                    tracing::warn!(reason = %reason, "malformed request frame");
                    return Ok(());
                }
            }
        }

        tokio::select! {
            read = stream.read_buf(&mut buffer) => {
                if read? == 0 {
                    return Ok(());
                }
            }
            _ = shutdown_rx.changed() => {
                if *shutdown_rx.borrow() {
                    return Ok(());
                }
            }
        }
    }
}

/// Spawn the deadline watcher that arms a request's early-termination
/// signal once the router has given up on it.
fn arm_deadline(request: &ReadRequest, deadline: Option<std::time::Duration>) {
    let Some(deadline) = deadline else {
        return;
    };
    let signal = match request {
        ReadRequest::PointGet(r) => r.meta.early_termination.clone(),
        ReadRequest::BatchGet(r) => r.meta.early_termination.clone(),
        ReadRequest::Compute(r) => r.meta.early_termination.clone(),
        _ => return,
    };
    tokio::spawn(async move {
        tokio::time::sleep(deadline).await;
        signal.trigger();
    });
}

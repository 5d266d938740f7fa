//! Minimal HTTP/1.1 client for posting batches to the collector.

use std::time::Duration;

use bytes::Bytes;
use http::{Method, StatusCode, header};
use http_body_util::{BodyExt, Full};
use hyper_util::rt::TokioIo;
use runmetrics_core::wire::{BATCH_PATH, EncodedBatch, HASH_HEADER};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum SendError {
    #[error("cannot reach collector at {address}: {reason}")]
    Connect { address: String, reason: String },

    #[error("failed to build request: {0}")]
    Build(#[from] http::Error),

    #[error("request failed: {0}")]
    Request(#[from] hyper::Error),

    #[error("collector answered {0}")]
    Status(StatusCode),

    #[error("collector did not answer within {0:?}")]
    Timeout(Duration),
}

/// POST one encoded batch to `address` (`host:port`).
///
/// Succeeds only on a 2xx answer. The whole exchange, connect included, is
/// bounded by `timeout`.
pub async fn post_batch(
    address: &str,
    batch: &EncodedBatch,
    timeout: Duration,
) -> Result<(), SendError> {
    tokio::time::timeout(timeout, send(address, batch))
        .await
        .map_err(|_| SendError::Timeout(timeout))?
}

async fn send(address: &str, batch: &EncodedBatch) -> Result<(), SendError> {
    let connect_err = |reason: String| SendError::Connect {
        address: address.to_string(),
        reason,
    };

    let stream = tokio::net::TcpStream::connect(address)
        .await
        .map_err(|e| connect_err(e.to_string()))?;
    let io = TokioIo::new(stream);
    let (mut sender, conn) = hyper::client::conn::http1::handshake(io)
        .await
        .map_err(|e| connect_err(e.to_string()))?;

    // Drive the connection in the background.
    tokio::spawn(async move {
        if let Err(e) = conn.await {
            debug!(error = %e, "collector connection closed with error");
        }
    });

    let mut builder = http::Request::builder()
        .method(Method::POST)
        .uri(BATCH_PATH)
        .header(header::HOST, address)
        .header(header::CONTENT_TYPE, "application/json")
        .header(header::CONTENT_ENCODING, "gzip")
        .header(header::ACCEPT_ENCODING, "gzip")
        .header(
            header::USER_AGENT,
            concat!("runmetrics-agent/", env!("CARGO_PKG_VERSION")),
        );
    if let Some(signature) = &batch.signature {
        builder = builder.header(HASH_HEADER, signature.as_str());
    }
    let req = builder.body(Full::new(Bytes::copy_from_slice(&batch.body)))?;

    let resp = sender.send_request(req).await?;
    let status = resp.status();
    // Drain so the connection shuts down cleanly.
    let _ = resp.into_body().collect().await;

    if status.is_success() {
        debug!(%status, bytes = batch.body.len(), "batch accepted");
        Ok(())
    } else {
        Err(SendError::Status(status))
    }
}

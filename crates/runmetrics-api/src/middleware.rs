//! Request/response transforms wrapped around every route.

use std::time::Instant;

use axum::body::{Body, HttpBody};
use axum::extract::{Request, State};
use axum::http::{HeaderName, HeaderValue, Method, StatusCode, header};
use axum::middleware::Next;
use axum::response::Response;
use bytes::Bytes;
use runmetrics_core::wire::{self, HASH_HEADER};
use tracing::{error, info, warn};

use crate::ApiState;
use crate::handlers::error_response;

/// Largest request or response body the middleware will buffer.
const MAX_BODY_BYTES: usize = 16 * 1024 * 1024;

async fn collect(body: Body) -> Result<Bytes, axum::Error> {
    axum::body::to_bytes(body, MAX_BODY_BYTES).await
}

fn header_contains(headers: &axum::http::HeaderMap, name: header::HeaderName, needle: &str) -> bool {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.contains(needle))
}

/// Log method, URI, status, latency, and response size for every request.
pub async fn log_requests(req: Request, next: Next) -> Response {
    let method = req.method().clone();
    let uri = req.uri().clone();
    let start = Instant::now();

    let response = next.run(req).await;

    let size = response.body().size_hint().exact();
    info!(
        %method,
        %uri,
        status = response.status().as_u16(),
        elapsed_ms = start.elapsed().as_secs_f64() * 1000.0,
        size,
        "request handled"
    );
    response
}

/// Decompress gzip request bodies and compress responses for clients that
/// accept gzip.
pub async fn gzip(req: Request, next: Next) -> Response {
    let accepts_gzip = header_contains(req.headers(), header::ACCEPT_ENCODING, "gzip");

    let req = if header_contains(req.headers(), header::CONTENT_ENCODING, "gzip") {
        let (mut parts, body) = req.into_parts();
        let compressed = match collect(body).await {
            Ok(bytes) => bytes,
            Err(e) => return error_response(&format!("failed to read body: {e}"), StatusCode::BAD_REQUEST),
        };
        let plain = match wire::gunzip_bounded(&compressed, MAX_BODY_BYTES) {
            Ok(plain) => plain,
            Err(e) if e.kind() == std::io::ErrorKind::FileTooLarge => {
                warn!(error = %e, "gzip request body too large");
                return error_response("request body too large", StatusCode::PAYLOAD_TOO_LARGE);
            }
            Err(e) => {
                warn!(error = %e, "corrupt gzip request body");
                return error_response("failed to decompress request", StatusCode::BAD_REQUEST);
            }
        };
        parts.headers.remove(header::CONTENT_ENCODING);
        parts.headers.remove(header::CONTENT_LENGTH);
        Request::from_parts(parts, Body::from(plain))
    } else {
        req
    };

    let response = next.run(req).await;
    if !accepts_gzip || response.headers().contains_key(header::CONTENT_ENCODING) {
        return response;
    }

    let (mut parts, body) = response.into_parts();
    let plain = match collect(body).await {
        Ok(bytes) => bytes,
        Err(e) => {
            error!(error = %e, "failed to buffer response body");
            return error_response("internal error", StatusCode::INTERNAL_SERVER_ERROR);
        }
    };
    if plain.is_empty() {
        return Response::from_parts(parts, Body::empty());
    }
    match wire::gzip(&plain) {
        Ok(compressed) => {
            parts
                .headers
                .insert(header::CONTENT_ENCODING, HeaderValue::from_static("gzip"));
            parts.headers.remove(header::CONTENT_LENGTH);
            Response::from_parts(parts, Body::from(compressed))
        }
        Err(e) => {
            error!(error = %e, "failed to compress response");
            Response::from_parts(parts, Body::from(plain))
        }
    }
}

/// Check the HMAC of signed requests and sign every response.
///
/// Only active when a key is configured. Requests without a digest header
/// pass through unsigned. Runs inside [`gzip`], so digests cover the
/// uncompressed bodies.
pub async fn verify_hash(State(state): State<ApiState>, req: Request, next: Next) -> Response {
    let Some(key) = state.key.clone() else {
        return next.run(req).await;
    };

    let req = match req.headers().get(HASH_HEADER).cloned() {
        Some(digest) => {
            let (parts, body) = req.into_parts();
            let body = match collect(body).await {
                Ok(bytes) => bytes,
                Err(e) => {
                    return error_response(&format!("failed to read body: {e}"), StatusCode::BAD_REQUEST);
                }
            };
            let digest = digest.to_str().unwrap_or_default();
            if !wire::verify(key.as_bytes(), &body, digest) {
                warn!(uri = %parts.uri, "request signature mismatch");
                return error_response("hash mismatch", StatusCode::BAD_REQUEST);
            }
            Request::from_parts(parts, Body::from(body))
        }
        None => req,
    };

    let response = next.run(req).await;
    let (mut parts, body) = response.into_parts();
    let body = match collect(body).await {
        Ok(bytes) => bytes,
        Err(e) => {
            error!(error = %e, "failed to buffer response body");
            return error_response("internal error", StatusCode::INTERNAL_SERVER_ERROR);
        }
    };
    let signature = wire::sign(key.as_bytes(), &body);
    if let (Ok(name), Ok(value)) = (
        HeaderName::try_from(HASH_HEADER),
        HeaderValue::from_str(&signature),
    ) {
        parts.headers.insert(name, value);
    }
    Response::from_parts(parts, Body::from(body))
}

fn is_update_path(path: &str) -> bool {
    path == "/updates/" || path.starts_with("/update/")
}

/// Persist the store after every successful update. Failures are logged and
/// never change the response.
pub async fn flush_on_write(State(state): State<ApiState>, req: Request, next: Next) -> Response {
    let is_write = req.method() == Method::POST && is_update_path(req.uri().path());
    let response = next.run(req).await;

    if state.flush_on_write && is_write && response.status().is_success() {
        if let Err(e) = state.store.flush().await {
            error!(error = %e, "flush after write failed");
        }
    }
    response
}

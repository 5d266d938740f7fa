//! Update and read handlers.
//!
//! Every handler talks to the store through [`SharedStore`] and maps store
//! errors onto status codes: client mistakes are 400, everything else 500.

use axum::Json;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use runmetrics_core::{
    MetricEnvelope, MetricKind, MetricUpdate, format_counter, format_gauge, parse_value,
};
use runmetrics_store::{StoreError, StoreResult};
use serde::de::DeserializeOwned;
use tracing::{debug, error, warn};

use crate::ApiState;

pub(crate) fn error_response(msg: &str, status: StatusCode) -> Response {
    (status, msg.to_string()).into_response()
}

fn store_error(e: StoreError) -> Response {
    if e.is_client_error() {
        warn!(error = %e, "rejected update");
        error_response(&e.to_string(), StatusCode::BAD_REQUEST)
    } else {
        error!(error = %e, "store operation failed");
        error_response("internal storage error", StatusCode::INTERNAL_SERVER_ERROR)
    }
}

fn parse_kind(kind: &str) -> Result<MetricKind, Response> {
    kind.parse::<MetricKind>()
        .map_err(|e| error_response(&e.to_string(), StatusCode::BAD_REQUEST))
}

fn require_json(headers: &HeaderMap) -> Result<(), Response> {
    let is_json = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.trim_start().starts_with("application/json"));
    if is_json {
        Ok(())
    } else {
        Err(error_response("JSON content type is required", StatusCode::BAD_REQUEST))
    }
}

fn decode_body<T: DeserializeOwned>(body: &[u8]) -> Result<T, Response> {
    if body.is_empty() {
        return Err(error_response("empty body", StatusCode::BAD_REQUEST));
    }
    serde_json::from_slice(body)
        .map_err(|e| error_response(&format!("malformed body: {e}"), StatusCode::BAD_REQUEST))
}

async fn apply_update(state: &ApiState, update: &MetricUpdate) -> StoreResult<()> {
    match update {
        MetricUpdate::Gauge { name, value } => state.store.add_gauge(name, *value).await,
        MetricUpdate::Counter { name, delta } => state.store.add_counter(name, *delta).await,
    }
}

/// Current value of `name` as an envelope, or `None` when unknown.
async fn read_back(
    state: &ApiState,
    kind: MetricKind,
    name: &str,
) -> StoreResult<Option<MetricEnvelope>> {
    Ok(match kind {
        MetricKind::Gauge => state
            .store
            .get_gauge(name)
            .await?
            .map(|v| MetricEnvelope::gauge(name, v)),
        MetricKind::Counter => state
            .store
            .get_counter(name)
            .await?
            .map(|d| MetricEnvelope::counter(name, d)),
    })
}

// ── Updates ─────────────────────────────────────────────────────

/// POST /update/{kind}/{name}/{value}
pub async fn update_positional(
    State(state): State<ApiState>,
    Path((kind, name, value)): Path<(String, String, String)>,
) -> Response {
    let kind = match parse_kind(&kind) {
        Ok(kind) => kind,
        Err(resp) => return resp,
    };
    let update = match parse_value(kind, &name, &value) {
        Ok(update) => update,
        Err(e) => return error_response(&e.to_string(), StatusCode::BAD_REQUEST),
    };

    match apply_update(&state, &update).await {
        Ok(()) => {
            debug!(%kind, %name, "metric updated");
            StatusCode::OK.into_response()
        }
        Err(e) => store_error(e),
    }
}

/// POST /update/{kind} and /update/{kind}/
pub async fn missing_name(Path(_kind): Path<String>) -> Response {
    error_response("metric name is required", StatusCode::NOT_FOUND)
}

/// POST /update/{kind}/{name}
pub async fn missing_value(Path((kind, _name)): Path<(String, String)>) -> Response {
    match parse_kind(&kind) {
        Ok(_) => error_response("metric value is required", StatusCode::BAD_REQUEST),
        Err(resp) => resp,
    }
}

/// POST /update/
pub async fn update_json(State(state): State<ApiState>, headers: HeaderMap, body: Bytes) -> Response {
    if let Err(resp) = require_json(&headers) {
        return resp;
    }
    let envelope: MetricEnvelope = match decode_body(&body) {
        Ok(envelope) => envelope,
        Err(resp) => return resp,
    };
    let update = match envelope.to_update() {
        Ok(update) => update,
        Err(e) => return error_response(&e.to_string(), StatusCode::BAD_REQUEST),
    };

    if let Err(e) = apply_update(&state, &update).await {
        return store_error(e);
    }
    match read_back(&state, update.kind(), update.name()).await {
        Ok(Some(stored)) => Json(stored).into_response(),
        Ok(None) => error_response("metric not found", StatusCode::NOT_FOUND),
        Err(e) => store_error(e),
    }
}

/// POST /updates/
pub async fn update_batch(State(state): State<ApiState>, headers: HeaderMap, body: Bytes) -> Response {
    if let Err(resp) = require_json(&headers) {
        return resp;
    }
    let batch: Vec<MetricEnvelope> = match decode_body(&body) {
        Ok(batch) => batch,
        Err(resp) => return resp,
    };

    match state.store.apply_batch(&batch).await {
        Ok(()) => {
            debug!(count = batch.len(), "batch applied");
            Json(batch).into_response()
        }
        Err(e) => store_error(e),
    }
}

// ── Reads ───────────────────────────────────────────────────────

/// GET /value/{kind}/{name}
pub async fn value_text(
    State(state): State<ApiState>,
    Path((kind, name)): Path<(String, String)>,
) -> Response {
    let kind = match parse_kind(&kind) {
        Ok(kind) => kind,
        Err(resp) => return resp,
    };

    let text = match kind {
        MetricKind::Gauge => state.store.get_gauge(&name).await.map(|v| v.map(format_gauge)),
        MetricKind::Counter => state
            .store
            .get_counter(&name)
            .await
            .map(|v| v.map(format_counter)),
    };
    match text {
        Ok(Some(text)) => ([(header::CONTENT_TYPE, "text/plain; charset=utf-8")], text).into_response(),
        Ok(None) => error_response("metric not found", StatusCode::NOT_FOUND),
        Err(e) => store_error(e),
    }
}

/// POST /value/
pub async fn value_json(State(state): State<ApiState>, body: Bytes) -> Response {
    let query: MetricEnvelope = match decode_body(&body) {
        Ok(query) => query,
        Err(resp) => return resp,
    };
    if query.id.is_empty() {
        return error_response("metric name is required", StatusCode::BAD_REQUEST);
    }

    match read_back(&state, query.kind, &query.id).await {
        Ok(Some(found)) => Json(found).into_response(),
        Ok(None) => error_response("metric not found", StatusCode::NOT_FOUND),
        Err(e) => store_error(e),
    }
}

/// GET /ping
pub async fn ping(State(state): State<ApiState>) -> Response {
    match state.store.ping().await {
        Ok(()) => StatusCode::OK.into_response(),
        Err(e) => {
            error!(error = %e, "storage ping failed");
            error_response("storage unavailable", StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

//! HTML dump of every stored metric.

use askama::Template;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Response};
use runmetrics_core::{MetricEnvelope, MetricKind, format_counter, format_gauge};
use tracing::error;

use crate::ApiState;

pub struct MetricRow {
    pub name: String,
    pub value: String,
}

#[derive(Template)]
#[template(path = "metrics.html")]
struct MetricsTemplate {
    gauges: Vec<MetricRow>,
    counters: Vec<MetricRow>,
}

impl MetricsTemplate {
    fn from_snapshot(snapshot: Vec<MetricEnvelope>) -> Self {
        let mut gauges = Vec::new();
        let mut counters = Vec::new();
        for envelope in snapshot {
            match envelope.kind {
                MetricKind::Gauge => gauges.push(MetricRow {
                    value: format_gauge(envelope.value.unwrap_or_default()),
                    name: envelope.id,
                }),
                MetricKind::Counter => counters.push(MetricRow {
                    value: format_counter(envelope.delta.unwrap_or_default()),
                    name: envelope.id,
                }),
            }
        }
        gauges.sort_by(|a, b| a.name.cmp(&b.name));
        counters.sort_by(|a, b| a.name.cmp(&b.name));
        Self { gauges, counters }
    }
}

/// GET / and GET /value/
pub async fn list_metrics(State(state): State<ApiState>) -> Response {
    let snapshot = match state.store.snapshot().await {
        Ok(snapshot) => snapshot,
        Err(e) => {
            error!(error = %e, "snapshot for metrics page failed");
            return (StatusCode::INTERNAL_SERVER_ERROR, "internal storage error").into_response();
        }
    };

    match MetricsTemplate::from_snapshot(snapshot).render() {
        Ok(html) => Html(html).into_response(),
        Err(e) => {
            error!(error = %e, "metrics page render failed");
            (StatusCode::INTERNAL_SERVER_ERROR, "template error").into_response()
        }
    }
}

//! runmetrics-api — collector HTTP surface.
//!
//! # Routes
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | POST | `/update/{kind}/{name}/{value}` | Positional single update |
//! | POST | `/update/` | JSON single update, echoes the stored metric |
//! | POST | `/updates/` | JSON batch update, echoes the batch |
//! | GET | `/value/{kind}/{name}` | Plain-text value |
//! | POST | `/value/` | JSON value lookup |
//! | GET | `/value/`, `/` | HTML dump of every metric |
//! | GET | `/ping` | Storage liveness |
//!
//! Middleware, outermost first: request logging, gzip, HMAC, flush on write.

pub mod handlers;
pub mod middleware;
pub mod page;

use std::sync::Arc;

use axum::Router;
use axum::middleware::{from_fn, from_fn_with_state};
use axum::routing::{get, post};
use runmetrics_store::SharedStore;

/// Shared state for handlers and middleware.
#[derive(Clone)]
pub struct ApiState {
    pub store: SharedStore,
    /// HMAC key; `None` disables signing and verification.
    pub key: Option<Arc<str>>,
    /// Flush the store after every successful POST.
    pub flush_on_write: bool,
}

impl ApiState {
    pub fn new(store: SharedStore) -> Self {
        Self {
            store,
            key: None,
            flush_on_write: false,
        }
    }

    pub fn with_key(mut self, key: Option<&str>) -> Self {
        self.key = key.map(Arc::from);
        self
    }

    pub fn with_flush_on_write(mut self, enabled: bool) -> Self {
        self.flush_on_write = enabled;
        self
    }
}

/// Build the collector router.
pub fn build_router(state: ApiState) -> Router {
    Router::new()
        .route("/", get(page::list_metrics))
        .route("/ping", get(handlers::ping))
        .route("/update/", post(handlers::update_json))
        .route("/updates/", post(handlers::update_batch))
        .route("/update/{kind}", post(handlers::missing_name))
        .route("/update/{kind}/", post(handlers::missing_name))
        .route("/update/{kind}/{name}", post(handlers::missing_value))
        .route("/update/{kind}/{name}/{value}", post(handlers::update_positional))
        .route("/value/", get(page::list_metrics).post(handlers::value_json))
        .route("/value/{kind}/{name}", get(handlers::value_text))
        .layer(from_fn_with_state(state.clone(), middleware::flush_on_write))
        .layer(from_fn_with_state(state.clone(), middleware::verify_hash))
        .layer(from_fn(middleware::gzip))
        .layer(from_fn(middleware::log_requests))
        .with_state(state)
}

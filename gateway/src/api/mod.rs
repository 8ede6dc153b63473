//! HTTP surface of the gateway.
//!
//! ```text
//! GET  /                                        service info (no API key)
//! GET  /databases                               via the routing endpoint
//! GET  /databases/{db}/collections
//! POST /query /aggregate /sample
//! POST /insert /update /delete /command
//! GET  /collection/{db}/{collection}/count
//! GET  /collection/{db}/{collection}/indexes
//! GET  /shards                                  fan-out to every shard
//! GET  /databases/available
//! GET  /databases/{db}/collections/available
//! POST /shard/{id}/query                        one shard, directly
//! GET  /shard/{id}/databases
//! GET  /shard/{id}/databases/{db}/collections
//! ```

pub mod databases;
pub mod documents;
pub mod extract;
pub mod health;
pub mod shards;


use crate::auth::require_api_key;
use crate::errors::GatewayError;
use crate::metrics_defs::{REQUEST_DURATION, REQUESTS_TOTAL};
use crate::state::AppState;
use axum::Router;
use axum::extract::{MatchedPath, Request};
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::{get, post};
use shared::{counter, histogram};
use std::time::Instant;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(health::index))
        .route("/databases", get(databases::list_databases))
        .route("/databases/available", get(shards::available_databases))
        .route("/databases/{db}/collections", get(databases::list_collections))
        .route(
            "/databases/{db}/collections/available",
            get(shards::available_collections),
        )
        .route("/query", post(documents::query))
        .route("/aggregate", post(documents::aggregate))
        .route("/sample", post(documents::sample))
        .route("/insert", post(documents::insert))
        .route("/update", post(documents::update))
        .route("/delete", post(documents::delete))
        .route("/command", post(documents::command))
        .route("/collection/{db}/{collection}/count", get(documents::count))
        .route(
            "/collection/{db}/{collection}/indexes",
            get(documents::indexes),
        )
        .route("/shards", get(shards::list_shards))
        .route("/shard/{id}/query", post(shards::shard_query))
        .route("/shard/{id}/databases", get(shards::shard_databases))
        .route(
            "/shard/{id}/databases/{db}/collections",
            get(shards::shard_collections),
        )
        .fallback(route_not_found)
        // Authentication runs inside the metrics layer so rejected requests are counted.
        .layer(middleware::from_fn_with_state(
            state.clone(),
            require_api_key,
        ))
        .layer(middleware::from_fn(record_metrics))
        .with_state(state)
}

async fn route_not_found() -> GatewayError {
    GatewayError::RouteNotFound
}

async fn record_metrics(request: Request, next: Next) -> Response {
    let route = request
        .extensions()
        .get::<MatchedPath>()
        .map(|path| path.as_str().to_string())
        .unwrap_or_else(|| "unmatched".to_string());
    let started = Instant::now();

    let response = next.run(request).await;

    let status = response.status().as_u16().to_string();
    counter!(REQUESTS_TOTAL, "route" => route.clone(), "status" => status.clone()).increment(1);
    histogram!(REQUEST_DURATION, "route" => route, "status" => status)
        .record(started.elapsed().as_secs_f64());

    response
}

use axum::Json;
use serde::Serialize;

const ENDPOINTS: &[&str] = &[
    "GET  /databases",
    "GET  /databases/available  (shard-aware)",
    "GET  /databases/{db}/collections",
    "GET  /databases/{db}/collections/available  (shard-aware)",
    "GET  /shards  (list shards and status)",
    "POST /shard/{id}/query",
    "GET  /shard/{id}/databases",
    "GET  /shard/{id}/databases/{db}/collections",
    "POST /query",
    "POST /aggregate",
    "POST /insert",
    "POST /update",
    "POST /delete",
    "POST /command",
    "POST /sample",
    "GET  /collection/{db}/{collection}/count",
    "GET  /collection/{db}/{collection}/indexes",
];

#[derive(Serialize)]
pub struct ServiceInfo {
    service: &'static str,
    version: &'static str,
    status: &'static str,
    auth_required: bool,
    endpoints: &'static [&'static str],
}

/// Static service description. The only route that needs no API key.
pub async fn index() -> Json<ServiceInfo> {
    Json(ServiceInfo {
        service: "docbridge",
        version: env!("CARGO_PKG_VERSION"),
        status: "running",
        auth_required: true,
        endpoints: ENDPOINTS,
    })
}

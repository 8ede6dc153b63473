use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use crate::tls::TlsError;
use backend::{ConnectionStringError, StoreError};
use serde::Serialize;
use shards::ShardError;
use thiserror::Error;

/// Errors that end a request. Each maps to exactly one status code.
#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("Unauthorized - Invalid or missing API key")]
    Unauthorized,

    #[error("{0}")]
    BadRequest(String),

    #[error("Shard '{0}' not found")]
    ShardNotFound(String),

    #[error("Not found")]
    RouteNotFound,

    #[error(transparent)]
    Backend(StoreError),

    #[error(transparent)]
    Shard(ShardError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid connection string: {0}")]
    ConnectionString(#[from] ConnectionStringError),

    #[error("TLS setup failed: {0}")]
    Tls(#[from] TlsError),
}

impl GatewayError {
    pub fn status(&self) -> StatusCode {
        match self {
            GatewayError::Unauthorized => StatusCode::UNAUTHORIZED,
            GatewayError::BadRequest(_) => StatusCode::BAD_REQUEST,
            GatewayError::ShardNotFound(_) | GatewayError::RouteNotFound => StatusCode::NOT_FOUND,
            GatewayError::Backend(_)
            | GatewayError::Shard(_)
            | GatewayError::Io(_)
            | GatewayError::ConnectionString(_)
            | GatewayError::Tls(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Malformed input is the caller's fault; everything else the database reports is ours.
impl From<StoreError> for GatewayError {
    fn from(err: StoreError) -> Self {
        if err.is_client_error() {
            GatewayError::BadRequest(err.to_string())
        } else {
            GatewayError::Backend(err)
        }
    }
}

impl From<ShardError> for GatewayError {
    fn from(err: ShardError) -> Self {
        match err {
            ShardError::Store(store) => store.into(),
            other => GatewayError::Shard(other),
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "Request failed");
        }

        let body = Json(ErrorBody {
            error: self.to_string(),
        });
        (status, body).into_response()
    }
}

//! Shared-secret authentication.
//!
//! Every request except `GET /` must carry the configured secret in the
//! `X-API-Key` header. The secret is kept as a SHA-256 digest and compared in
//! constant time.

use crate::errors::GatewayError;
use crate::state::AppState;
use axum::extract::{Request, State};
use axum::http::Method;
use axum::middleware::Next;
use axum::response::Response;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::RngCore;
use sha2::{Digest, Sha256};

pub const API_KEY_HEADER: &str = "x-api-key";

const GENERATED_KEY_BYTES: usize = 32;

#[derive(Clone)]
pub struct ApiKey {
    digest: [u8; 32],
}

impl ApiKey {
    pub fn new(secret: &str) -> Self {
        Self {
            digest: Sha256::digest(secret.as_bytes()).into(),
        }
    }

    pub fn verify(&self, presented: Option<&str>) -> bool {
        let Some(presented) = presented else {
            return false;
        };
        let presented: [u8; 32] = Sha256::digest(presented.as_bytes()).into();
        constant_time_eq(&presented, &self.digest)
    }
}

impl std::fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("ApiKey(..)")
    }
}

/// A random URL-safe secret for deployments that do not configure one.
pub fn generate_secret() -> String {
    let mut bytes = [0u8; GENERATED_KEY_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

fn is_exempt(method: &Method, path: &str) -> bool {
    method == Method::GET && path == "/"
}

pub async fn require_api_key(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, GatewayError> {
    if is_exempt(request.method(), request.uri().path()) {
        return Ok(next.run(request).await);
    }

    let presented = request
        .headers()
        .get(API_KEY_HEADER)
        .and_then(|value| value.to_str().ok());

    if !state.api_key().verify(presented) {
        tracing::debug!(path = %request.uri().path(), "Rejected request without a valid API key");
        return Err(GatewayError::Unauthorized);
    }

    Ok(next.run(request).await)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verify() {
        let key = ApiKey::new("open sesame");
        assert!(key.verify(Some("open sesame")));
        assert!(!key.verify(Some("open sesame ")));
        assert!(!key.verify(Some("")));
        assert!(!key.verify(None));
    }

    #[test]
    fn test_generated_secrets() {
        let a = generate_secret();
        let b = generate_secret();
        assert_ne!(a, b);
        assert_eq!(a.len(), 43);
        assert!(
            a.chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        );
    }

    #[test]
    fn test_only_root_get_is_exempt() {
        assert!(is_exempt(&Method::GET, "/"));
        assert!(!is_exempt(&Method::POST, "/"));
        assert!(!is_exempt(&Method::GET, "/databases"));
        assert!(!is_exempt(&Method::GET, "/nope"));
    }
}

use crate::errors::GatewayError;
use axum::body::Bytes;
use axum::extract::{FromRequest, Request};
use serde::de::DeserializeOwned;
use serde_json::Value;

const BODY_REQUIRED: &str = "Request body required";

/// JSON request body whose rejections are reported as `{"error": ...}`.
///
/// A missing body, `null` and `{}` are all treated as "no body".
pub struct JsonBody<T>(pub T);

impl<S, T> FromRequest<S> for JsonBody<T>
where
    S: Send + Sync,
    T: DeserializeOwned,
{
    type Rejection = GatewayError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let bytes = Bytes::from_request(req, state)
            .await
            .map_err(|e| GatewayError::BadRequest(e.body_text()))?;

        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Err(GatewayError::BadRequest(BODY_REQUIRED.to_string()));
        }

        let value: Value = serde_json::from_slice(&bytes)
            .map_err(|e| GatewayError::BadRequest(format!("Invalid JSON body: {e}")))?;

        match &value {
            Value::Null => return Err(GatewayError::BadRequest(BODY_REQUIRED.to_string())),
            Value::Object(fields) if fields.is_empty() => {
                return Err(GatewayError::BadRequest(BODY_REQUIRED.to_string()));
            }
            Value::Object(_) => {}
            _ => {
                return Err(GatewayError::BadRequest(
                    "Request body must be a JSON object".to_string(),
                ));
            }
        }

        serde_json::from_value(value)
            .map(JsonBody)
            .map_err(|e| GatewayError::BadRequest(format!("Invalid request: {e}")))
    }
}

//! Conversion between JSON payloads and BSON values.
//!
//! Incoming payloads may embed database-native types using Extended JSON
//! (`{"$oid": ...}`, `{"$date": ...}`, `{"$binary": ...}`,
//! `{"$regularExpression": ...}`). Results are rendered back as relaxed
//! Extended JSON, so anything decoded here encodes to the same JSON.

use crate::errors::StoreError;
use mongodb::bson::{Bson, Document};
use serde_json::Value;

/// Decodes any JSON value, interpreting Extended JSON wrappers.
pub fn decode_value(value: Value) -> Result<Bson, StoreError> {
    Bson::try_from(value).map_err(|e| StoreError::Decode(e.to_string()))
}

/// Decodes a JSON object into a document. `null` decodes to an empty document.
pub fn decode_document(value: Value) -> Result<Document, StoreError> {
    match decode_value(value)? {
        Bson::Document(doc) => Ok(doc),
        Bson::Null => Ok(Document::new()),
        other => Err(StoreError::Decode(format!(
            "expected an object, found {}",
            type_name(&other)
        ))),
    }
}

/// Decodes a JSON array of objects into documents.
pub fn decode_documents(value: Value) -> Result<Vec<Document>, StoreError> {
    match value {
        Value::Array(items) => items.into_iter().map(decode_document).collect(),
        other => Err(StoreError::Decode(format!(
            "expected an array of objects, found {}",
            json_type_name(&other)
        ))),
    }
}

pub fn encode_value(value: Bson) -> Value {
    value.into_relaxed_extjson()
}

pub fn encode_document(doc: Document) -> Value {
    Bson::Document(doc).into_relaxed_extjson()
}

pub fn encode_documents(docs: Vec<Document>) -> Value {
    Value::Array(docs.into_iter().map(encode_document).collect())
}

fn type_name(value: &Bson) -> &'static str {
    match value {
        Bson::Array(_) => "an array",
        Bson::String(_) => "a string",
        Bson::Boolean(_) => "a boolean",
        Bson::Int32(_) | Bson::Int64(_) | Bson::Double(_) | Bson::Decimal128(_) => "a number",
        _ => "a non-document value",
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

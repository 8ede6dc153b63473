//! Turns JSON request bodies into store calls and store results into JSON.
//!
//! Every request type deserializes leniently (missing fields become
//! defaults) and is then checked by its `into_*` method, so the caller gets
//! the same message whether a required field is absent, null or empty.

use crate::errors::GatewayError;
use backend::bson::{Bson, Document, doc};
use backend::extjson::{
    decode_document, decode_documents, decode_value, encode_documents, encode_value,
};
use backend::{DocumentStore, FindSpec, StoreError, UpdateBody, UpdateSpec};
use serde::Deserialize;
use serde_json::{Map, Value, json};

pub const DEFAULT_LIMIT: i64 = 100;
pub const DEFAULT_SAMPLE_SIZE: i64 = 5;
pub const DEFAULT_COMMAND_DATABASE: &str = "admin";

const TARGET_REQUIRED: &str = "database and collection are required";

/// A `database`/`collection` pair, both non-empty.
#[derive(Clone, Debug, PartialEq)]
pub struct Namespace {
    pub database: String,
    pub collection: String,
}

impl Namespace {
    fn require(
        database: Option<String>,
        collection: Option<String>,
        message: &str,
    ) -> Result<Self, GatewayError> {
        match (database, collection) {
            (Some(database), Some(collection))
                if !database.is_empty() && !collection.is_empty() =>
            {
                Ok(Namespace {
                    database,
                    collection,
                })
            }
            _ => Err(GatewayError::BadRequest(message.to_string())),
        }
    }

    fn tag(&self, mut body: Map<String, Value>) -> Value {
        let mut tagged = Map::new();
        tagged.insert("database".into(), Value::String(self.database.clone()));
        tagged.insert("collection".into(), Value::String(self.collection.clone()));
        tagged.append(&mut body);
        Value::Object(tagged)
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct QueryRequest {
    pub database: Option<String>,
    pub collection: Option<String>,
    #[serde(default)]
    pub filter: Value,
    #[serde(default)]
    pub projection: Value,
    #[serde(default)]
    pub sort: Value,
    pub limit: Option<i64>,
    pub skip: Option<u64>,
}

impl QueryRequest {
    pub fn into_find(self) -> Result<(Namespace, FindSpec), GatewayError> {
        let namespace = Namespace::require(self.database, self.collection, TARGET_REQUIRED)?;

        let limit = self.limit.unwrap_or(DEFAULT_LIMIT);
        let skip = self.skip.unwrap_or(0);
        let spec = FindSpec {
            filter: decode_document(self.filter)?,
            projection: optional_document(self.projection)?,
            sort: parse_sort(self.sort)?,
            skip: (skip > 0).then_some(skip),
            limit: (limit != 0).then_some(limit),
        };
        Ok((namespace, spec))
    }
}

/// Accepts `[["a", 1], ["b", -1]]`, `{"a": 1, "b": -1}`, `"a"` or a list of names.
pub fn parse_sort(sort: Value) -> Result<Option<Document>, GatewayError> {
    let keys = match sort {
        Value::Null => return Ok(None),
        Value::String(field) => {
            let mut keys = Document::new();
            keys.insert(field, 1);
            keys
        }
        Value::Object(fields) => decode_document(Value::Object(fields))?,
        Value::Array(entries) => {
            let mut keys = Document::new();
            for entry in entries {
                match entry {
                    Value::String(field) => {
                        keys.insert(field, 1);
                    }
                    Value::Array(pair) if pair.len() == 2 => {
                        let mut pair = pair.into_iter();
                        let (Some(Value::String(field)), Some(direction)) = (pair.next(), pair.next())
                        else {
                            return Err(invalid_sort());
                        };
                        keys.insert(field, decode_value(direction)?);
                    }
                    _ => return Err(invalid_sort()),
                }
            }
            keys
        }
        _ => return Err(invalid_sort()),
    };
    Ok((!keys.is_empty()).then_some(keys))
}

fn invalid_sort() -> GatewayError {
    GatewayError::BadRequest(
        "sort must be an object or a list of [field, direction] pairs".to_string(),
    )
}

fn optional_document(value: Value) -> Result<Option<Document>, GatewayError> {
    let doc = decode_document(value)?;
    Ok((!doc.is_empty()).then_some(doc))
}

#[derive(Debug, Default, Deserialize)]
pub struct AggregateRequest {
    pub database: Option<String>,
    pub collection: Option<String>,
    #[serde(default)]
    pub pipeline: Value,
}

impl AggregateRequest {
    pub fn into_pipeline(self) -> Result<(Namespace, Vec<Document>), GatewayError> {
        let namespace = Namespace::require(self.database, self.collection, TARGET_REQUIRED)?;
        let pipeline = match self.pipeline {
            Value::Null => Vec::new(),
            pipeline => decode_documents(pipeline)?,
        };
        Ok((namespace, pipeline))
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct SampleRequest {
    pub database: Option<String>,
    pub collection: Option<String>,
    pub size: Option<i64>,
}

impl SampleRequest {
    pub fn into_pipeline(self) -> Result<(Namespace, Vec<Document>), GatewayError> {
        let namespace = Namespace::require(self.database, self.collection, TARGET_REQUIRED)?;
        let size = self.size.unwrap_or(DEFAULT_SAMPLE_SIZE);
        Ok((namespace, vec![doc! { "$sample": { "size": size } }]))
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct InsertRequest {
    pub database: Option<String>,
    pub collection: Option<String>,
    #[serde(default)]
    pub documents: Value,
    pub ordered: Option<bool>,
}

#[derive(Debug)]
pub struct Insert {
    pub documents: Vec<Document>,
    pub ordered: bool,
}

impl InsertRequest {
    pub fn into_insert(self) -> Result<(Namespace, Insert), GatewayError> {
        const REQUIRED: &str = "database, collection, and documents are required";
        let namespace = Namespace::require(self.database, self.collection, REQUIRED)?;

        let documents = match self.documents {
            Value::Object(fields) if !fields.is_empty() => {
                vec![decode_document(Value::Object(fields))?]
            }
            Value::Array(items) if !items.is_empty() => decode_documents(Value::Array(items))?,
            Value::Null | Value::Object(_) | Value::Array(_) => {
                return Err(GatewayError::BadRequest(REQUIRED.to_string()));
            }
            _ => {
                return Err(GatewayError::BadRequest(
                    "documents must be an object or an array of objects".to_string(),
                ));
            }
        };

        Ok((
            namespace,
            Insert {
                documents,
                ordered: self.ordered.unwrap_or(true),
            },
        ))
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct UpdateRequest {
    pub database: Option<String>,
    pub collection: Option<String>,
    #[serde(default)]
    pub filter: Value,
    #[serde(default)]
    pub update: Value,
    pub many: Option<bool>,
    pub upsert: Option<bool>,
}

impl UpdateRequest {
    pub fn into_update(self) -> Result<(Namespace, UpdateSpec), GatewayError> {
        const REQUIRED: &str = "database, collection, and update are required";
        let namespace = Namespace::require(self.database, self.collection, REQUIRED)?;

        let update = match self.update {
            Value::Object(fields) if !fields.is_empty() => {
                UpdateBody::Modifications(decode_document(Value::Object(fields))?)
            }
            Value::Array(stages) if !stages.is_empty() => {
                UpdateBody::Pipeline(decode_documents(Value::Array(stages))?)
            }
            _ => return Err(GatewayError::BadRequest(REQUIRED.to_string())),
        };

        Ok((
            namespace,
            UpdateSpec {
                filter: decode_document(self.filter)?,
                update,
                many: self.many.unwrap_or(false),
                upsert: self.upsert.unwrap_or(false),
            },
        ))
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct DeleteRequest {
    pub database: Option<String>,
    pub collection: Option<String>,
    #[serde(default)]
    pub filter: Value,
    pub many: Option<bool>,
}

impl DeleteRequest {
    pub fn into_delete(self) -> Result<(Namespace, Document, bool), GatewayError> {
        let namespace = Namespace::require(self.database, self.collection, TARGET_REQUIRED)?;
        Ok((
            namespace,
            decode_document(self.filter)?,
            self.many.unwrap_or(false),
        ))
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct CommandRequest {
    pub database: Option<String>,
    #[serde(default)]
    pub command: Value,
}

impl CommandRequest {
    pub fn into_command(self) -> Result<(String, Document), GatewayError> {
        let database = self
            .database
            .filter(|db| !db.is_empty())
            .unwrap_or_else(|| DEFAULT_COMMAND_DATABASE.to_string());

        match self.command {
            Value::Object(fields) if !fields.is_empty() => {
                Ok((database, decode_document(Value::Object(fields))?))
            }
            _ => Err(GatewayError::BadRequest("command is required".to_string())),
        }
    }
}

pub async fn find(
    store: &dyn DocumentStore,
    namespace: Namespace,
    spec: FindSpec,
) -> Result<Value, StoreError> {
    let documents = store
        .find(&namespace.database, &namespace.collection, spec)
        .await?;
    Ok(namespace.tag(documents_body("documents", documents)))
}

/// Runs `pipeline` and lists its output under `key`.
pub async fn aggregate(
    store: &dyn DocumentStore,
    namespace: Namespace,
    pipeline: Vec<Document>,
    key: &str,
) -> Result<Value, StoreError> {
    let results = store
        .aggregate(&namespace.database, &namespace.collection, pipeline)
        .await?;
    Ok(namespace.tag(documents_body(key, results)))
}

pub async fn insert(
    store: &dyn DocumentStore,
    namespace: Namespace,
    insert: Insert,
) -> Result<Value, StoreError> {
    let ids = store
        .insert(
            &namespace.database,
            &namespace.collection,
            insert.documents,
            insert.ordered,
        )
        .await?;

    let mut body = Map::new();
    body.insert("inserted_count".into(), json!(ids.len()));
    body.insert(
        "inserted_ids".into(),
        Value::Array(ids.into_iter().map(encode_value).collect()),
    );
    Ok(namespace.tag(body))
}

pub async fn update(
    store: &dyn DocumentStore,
    namespace: Namespace,
    spec: UpdateSpec,
) -> Result<Value, StoreError> {
    let outcome = store
        .update(&namespace.database, &namespace.collection, spec)
        .await?;

    let mut body = Map::new();
    body.insert("matched_count".into(), json!(outcome.matched_count));
    body.insert("modified_count".into(), json!(outcome.modified_count));
    body.insert(
        "upserted_id".into(),
        outcome.upserted_id.map(encode_value).unwrap_or(Value::Null),
    );
    Ok(namespace.tag(body))
}

pub async fn delete(
    store: &dyn DocumentStore,
    namespace: Namespace,
    filter: Document,
    many: bool,
) -> Result<Value, StoreError> {
    let deleted = store
        .delete(&namespace.database, &namespace.collection, filter, many)
        .await?;

    let mut body = Map::new();
    body.insert("deleted_count".into(), json!(deleted));
    Ok(namespace.tag(body))
}

pub async fn command(
    store: &dyn DocumentStore,
    database: String,
    command: Document,
) -> Result<Value, StoreError> {
    let result = store.run_command(&database, command).await?;
    Ok(json!({
        "database": database,
        "result": encode_value(Bson::Document(result)),
    }))
}

pub async fn count(store: &dyn DocumentStore, namespace: Namespace) -> Result<Value, StoreError> {
    let count = store
        .estimated_count(&namespace.database, &namespace.collection)
        .await?;
    let mut body = Map::new();
    body.insert("count".into(), json!(count));
    Ok(namespace.tag(body))
}

pub async fn indexes(store: &dyn DocumentStore, namespace: Namespace) -> Result<Value, StoreError> {
    let indexes = store
        .list_indexes(&namespace.database, &namespace.collection)
        .await?;
    let mut body = Map::new();
    body.insert("indexes".into(), encode_documents(indexes));
    Ok(namespace.tag(body))
}

/// `[{name, sizeOnDisk, empty}]` for every database on `store`.
pub async fn databases(store: &dyn DocumentStore) -> Result<Vec<Value>, StoreError> {
    Ok(store
        .list_databases()
        .await?
        .into_iter()
        .map(|db| json!({"name": db.name, "sizeOnDisk": db.size_on_disk, "empty": db.empty}))
        .collect())
}

/// Which `collStats` fields to report per collection.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum StatsDetail {
    /// `count`, `size` and `avgObjSize`.
    Full,
    /// `count` and `size`.
    Basic,
}

/// Collections of `database` with their statistics.
///
/// Statistics are best effort: a collection whose `collStats` fails is
/// listed by name only.
pub async fn collections(
    store: &dyn DocumentStore,
    database: &str,
    detail: StatsDetail,
) -> Result<Vec<Value>, StoreError> {
    let names = store.list_collection_names(database).await?;
    let mut collections = Vec::with_capacity(names.len());

    for name in names {
        let entry = match store
            .run_command(database, doc! { "collStats": name.as_str() })
            .await
        {
            Ok(stats) => {
                let mut entry = json!({
                    "name": name,
                    "count": stat(&stats, "count"),
                    "size": stat(&stats, "size"),
                });
                if detail == StatsDetail::Full {
                    entry["avgObjSize"] = stat(&stats, "avgObjSize");
                }
                entry
            }
            Err(e) => {
                tracing::debug!(database, collection = %name, error = %e, "collStats failed");
                json!({ "name": name })
            }
        };
        collections.push(entry);
    }
    Ok(collections)
}

fn stat(stats: &Document, key: &str) -> Value {
    stats
        .get(key)
        .cloned()
        .map(encode_value)
        .unwrap_or_else(|| json!(0))
}

fn documents_body(key: &str, documents: Vec<Document>) -> Map<String, Value> {
    let mut body = Map::new();
    body.insert("count".into(), json!(documents.len()));
    body.insert(key.into(), encode_documents(documents));
    body
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;
    use backend::bson::oid::ObjectId;
    use backend::memory::MemoryStore;

    fn query(body: Value) -> QueryRequest {
        serde_json::from_value(body).unwrap()
    }

    #[test]
    fn test_query_defaults() {
        let (namespace, spec) = query(json!({"database": "d", "collection": "c"}))
            .into_find()
            .unwrap();
        assert_eq!(namespace.database, "d");
        assert_eq!(
            spec,
            FindSpec {
                limit: Some(DEFAULT_LIMIT),
                ..FindSpec::default()
            }
        );
    }

    #[test]
    fn test_query_zero_limit_is_unbounded() {
        let (_, spec) = query(json!({"database": "d", "collection": "c", "limit": 0, "skip": 3}))
            .into_find()
            .unwrap();
        assert_eq!(spec.limit, None);
        assert_eq!(spec.skip, Some(3));
    }

    #[test]
    fn test_query_requires_namespace() {
        for body in [
            json!({"collection": "c"}),
            json!({"database": "", "collection": "c"}),
            json!({"database": "d", "collection": null}),
        ] {
            let err = query(body).into_find().unwrap_err();
            assert_eq!(err.to_string(), TARGET_REQUIRED);
        }
    }

    #[test]
    fn test_query_decodes_extended_filter() {
        let id = ObjectId::new();
        let (_, spec) = query(json!({
            "database": "d",
            "collection": "c",
            "filter": {"_id": {"$oid": id.to_hex()}},
        }))
        .into_find()
        .unwrap();
        assert_eq!(spec.filter, doc! {"_id": id});

        let err = query(json!({"database": "d", "collection": "c", "filter": [1]}))
            .into_find()
            .unwrap_err();
        assert!(matches!(err, GatewayError::BadRequest(_)));
    }

    #[test]
    fn test_sort_forms() {
        assert_eq!(
            parse_sort(json!([["a", 1], ["b", -1]])).unwrap(),
            Some(doc! {"a": 1, "b": -1})
        );
        assert_eq!(
            parse_sort(json!({"a": -1})).unwrap(),
            Some(doc! {"a": -1})
        );
        assert_eq!(parse_sort(json!("a")).unwrap(), Some(doc! {"a": 1}));
        assert_eq!(parse_sort(json!([])).unwrap(), None);
        assert_eq!(parse_sort(Value::Null).unwrap(), None);
        assert!(parse_sort(json!([["a"]])).is_err());
        assert!(parse_sort(json!(7)).is_err());
    }

    #[test]
    fn test_insert_normalizes_single_document() {
        let request: InsertRequest = serde_json::from_value(json!({
            "database": "d", "collection": "c", "documents": {"a": 1}
        }))
        .unwrap();
        let (_, insert) = request.into_insert().unwrap();
        assert_eq!(insert.documents, vec![doc! {"a": 1}]);
        assert!(insert.ordered);

        for documents in [json!([]), json!({}), json!(null)] {
            let empty: InsertRequest = serde_json::from_value(json!({
                "database": "d", "collection": "c", "documents": documents
            }))
            .unwrap();
            let err = empty.into_insert().unwrap_err();
            assert_eq!(err.status(), StatusCode::BAD_REQUEST, "{documents}");
            assert_eq!(
                err.to_string(),
                "database, collection, and documents are required"
            );
        }
    }

    #[test]
    fn test_update_accepts_pipeline() {
        let request: UpdateRequest = serde_json::from_value(json!({
            "database": "d", "collection": "c",
            "update": [{"$set": {"a": 1}}],
            "many": true,
        }))
        .unwrap();
        let (_, spec) = request.into_update().unwrap();
        assert_eq!(spec.update, UpdateBody::Pipeline(vec![doc! {"$set": {"a": 1}}]));
        assert!(spec.many);
        assert!(!spec.upsert);

        let missing: UpdateRequest =
            serde_json::from_value(json!({"database": "d", "collection": "c"})).unwrap();
        assert_eq!(
            missing.into_update().unwrap_err().to_string(),
            "database, collection, and update are required"
        );
    }

    #[test]
    fn test_command_defaults_to_admin() {
        let request: CommandRequest =
            serde_json::from_value(json!({"command": {"ping": 1}})).unwrap();
        assert_eq!(
            request.into_command().unwrap(),
            ("admin".to_string(), doc! {"ping": 1})
        );

        let missing: CommandRequest = serde_json::from_value(json!({"database": "x"})).unwrap();
        assert_eq!(
            missing.into_command().unwrap_err().to_string(),
            "command is required"
        );
    }

    #[tokio::test]
    async fn test_sample_default_size() {
        let docs = (0..8).map(|i| doc! {"i": i}).collect();
        let store = MemoryStore::new().with_documents("d", "c", docs);
        let request: SampleRequest =
            serde_json::from_value(json!({"database": "d", "collection": "c"})).unwrap();

        let (namespace, pipeline) = request.into_pipeline().unwrap();
        let body = aggregate(&store, namespace, pipeline, "documents").await.unwrap();
        assert_eq!(body["count"], json!(5));
        assert_eq!(body["documents"].as_array().unwrap().len(), 5);
        assert_eq!(body["database"], json!("d"));
    }

    #[tokio::test]
    async fn test_find_encodes_results() {
        let id = ObjectId::new();
        let store = MemoryStore::new().with_documents("d", "c", vec![doc! {"_id": id, "n": 1}]);

        let (namespace, spec) = query(json!({"database": "d", "collection": "c"}))
            .into_find()
            .unwrap();
        let body = find(&store, namespace, spec).await.unwrap();
        assert_eq!(
            body,
            json!({
                "database": "d",
                "collection": "c",
                "count": 1,
                "documents": [{"_id": {"$oid": id.to_hex()}, "n": 1}],
            })
        );
    }

    #[tokio::test]
    async fn test_collection_stats() {
        let store = MemoryStore::new()
            .with_documents("d", "a", vec![doc! {"x": 1}, doc! {"x": 2}])
            .with_documents("d", "b", vec![]);

        let full = collections(&store, "d", StatsDetail::Full).await.unwrap();
        assert_eq!(full[0]["name"], json!("a"));
        assert_eq!(full[0]["count"], json!(2));
        assert!(full[0]["avgObjSize"].as_i64().unwrap() > 0);
        assert_eq!(full[1]["count"], json!(0));

        let basic = collections(&store, "d", StatsDetail::Basic).await.unwrap();
        assert!(basic[0].get("avgObjSize").is_none());
        assert!(basic[0].get("size").is_some());
    }
}

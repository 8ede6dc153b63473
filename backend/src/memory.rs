//! In-memory [`DocumentStore`] and [`Connector`] for tests.
//!
//! Supports the subset of query language the gateway tests exercise:
//! equality and comparison filters (`$eq`, `$ne`, `$gt`, `$gte`, `$lt`,
//! `$lte`, `$in`, `$nin`, `$exists`, `$and`, `$or`), inclusion/exclusion
//! projections, multi-key sorts, `$set`/`$unset`/`$inc` updates, and the
//! `$match`, `$sort`, `$skip`, `$limit`, `$project`, `$count` and `$sample`
//! pipeline stages. `$sample` returns the first `size` documents.

use crate::connection::ConnectionConfig;
use crate::errors::StoreError;
use crate::store::{
    Connector, DatabaseInfo, DocumentStore, FindSpec, UpdateBody, UpdateOutcome, UpdateSpec,
};
use async_trait::async_trait;
use mongodb::bson::oid::ObjectId;
use mongodb::bson::{self, Bson, Document, doc};
use parking_lot::{Mutex, RwLock};
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

type Collections = BTreeMap<String, Vec<Document>>;

#[derive(Default)]
pub struct MemoryStore {
    databases: RwLock<BTreeMap<String, Collections>>,
    closed: Mutex<bool>,
    query_delay: Option<Duration>,
    command_delay: Option<Duration>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds a collection, creating the database if needed. Documents are stored as given.
    pub fn with_documents(self, database: &str, collection: &str, documents: Vec<Document>) -> Self {
        self.databases
            .write()
            .entry(database.to_string())
            .or_default()
            .entry(collection.to_string())
            .or_default()
            .extend(documents);
        self
    }

    /// Makes `find` and `aggregate` wait `delay` before answering.
    pub fn with_query_delay(mut self, delay: Duration) -> Self {
        self.query_delay = Some(delay);
        self
    }

    /// Makes `run_command`, and with it `ping`, wait `delay` before answering.
    pub fn with_command_delay(mut self, delay: Duration) -> Self {
        self.command_delay = Some(delay);
        self
    }

    pub fn documents(&self, database: &str, collection: &str) -> Vec<Document> {
        self.databases
            .read()
            .get(database)
            .and_then(|colls| colls.get(collection))
            .cloned()
            .unwrap_or_default()
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.lock()
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn find(
        &self,
        database: &str,
        collection: &str,
        spec: FindSpec,
    ) -> Result<Vec<Document>, StoreError> {
        delay(self.query_delay).await;
        let mut docs = filter_documents(&self.documents(database, collection), &spec.filter)?;
        if let Some(sort) = &spec.sort {
            sort_documents(&mut docs, sort);
        }

        let skip = spec.skip.unwrap_or(0) as usize;
        let limit = match spec.limit {
            Some(0) | None => usize::MAX,
            Some(n) => n.unsigned_abs() as usize,
        };
        let docs = docs.into_iter().skip(skip).take(limit);

        Ok(match &spec.projection {
            Some(projection) => docs.map(|d| project(&d, projection)).collect(),
            None => docs.collect(),
        })
    }

    async fn find_one(
        &self,
        database: &str,
        collection: &str,
        filter: Document,
    ) -> Result<Option<Document>, StoreError> {
        Ok(filter_documents(&self.documents(database, collection), &filter)?
            .into_iter()
            .next())
    }

    async fn aggregate(
        &self,
        database: &str,
        collection: &str,
        pipeline: Vec<Document>,
    ) -> Result<Vec<Document>, StoreError> {
        delay(self.query_delay).await;
        let mut docs = self.documents(database, collection);
        for stage in pipeline {
            let (name, arg) = stage
                .iter()
                .next()
                .ok_or_else(|| StoreError::Command("empty pipeline stage".into()))?;
            docs = match (name.as_str(), arg) {
                ("$match", Bson::Document(filter)) => filter_documents(&docs, filter)?,
                ("$sort", Bson::Document(sort)) => {
                    sort_documents(&mut docs, sort);
                    docs
                }
                ("$skip", n) => docs.into_iter().skip(as_count(n)?).collect(),
                ("$limit", n) => docs.into_iter().take(as_count(n)?).collect(),
                ("$project", Bson::Document(projection)) => {
                    docs.iter().map(|d| project(d, projection)).collect()
                }
                ("$count", Bson::String(field)) => {
                    let mut counted = Document::new();
                    counted.insert(field.as_str(), docs.len() as i32);
                    vec![counted]
                }
                ("$sample", Bson::Document(options)) => {
                    let size = options
                        .get("size")
                        .ok_or_else(|| StoreError::Command("$sample requires size".into()))?;
                    docs.into_iter().take(as_count(size)?).collect()
                }
                (other, _) => {
                    return Err(StoreError::Command(format!(
                        "Unrecognized pipeline stage name: '{other}'"
                    )));
                }
            };
        }
        Ok(docs)
    }

    async fn insert(
        &self,
        database: &str,
        collection: &str,
        documents: Vec<Document>,
        ordered: bool,
    ) -> Result<Vec<Bson>, StoreError> {
        let mut databases = self.databases.write();
        let stored = databases
            .entry(database.to_string())
            .or_default()
            .entry(collection.to_string())
            .or_default();

        let mut ids = Vec::with_capacity(documents.len());
        let mut duplicate = None;
        for mut document in documents {
            let id = document
                .entry("_id".to_string())
                .or_insert_with(|| Bson::ObjectId(ObjectId::new()))
                .clone();

            if stored.iter().any(|d| d.get("_id") == Some(&id)) {
                duplicate.get_or_insert(id);
                if ordered {
                    break;
                }
                continue;
            }
            stored.push(document);
            ids.push(id);
        }

        match duplicate {
            Some(id) => Err(StoreError::Command(format!(
                "E11000 duplicate key error collection: {database}.{collection} dup key: {{ _id: {id} }}"
            ))),
            None => Ok(ids),
        }
    }

    async fn update(
        &self,
        database: &str,
        collection: &str,
        spec: UpdateSpec,
    ) -> Result<UpdateOutcome, StoreError> {
        let UpdateBody::Modifications(update) = spec.update else {
            return Err(StoreError::Command(
                "pipeline updates are not supported by the in-memory store".into(),
            ));
        };

        let mut databases = self.databases.write();
        let stored = databases
            .entry(database.to_string())
            .or_default()
            .entry(collection.to_string())
            .or_default();

        let mut outcome = UpdateOutcome::default();
        for document in stored.iter_mut() {
            if !matches_filter(document, &spec.filter)? {
                continue;
            }
            outcome.matched_count += 1;
            let updated = apply_update(document, &update)?;
            if &updated != document {
                *document = updated;
                outcome.modified_count += 1;
            }
            if !spec.many {
                break;
            }
        }

        if outcome.matched_count == 0 && spec.upsert {
            let seed: Document = spec
                .filter
                .iter()
                .filter(|(k, v)| !k.starts_with('$') && !is_operator_document(v))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect();
            let mut created = apply_update(&seed, &update)?;
            let id = created
                .entry("_id".to_string())
                .or_insert_with(|| Bson::ObjectId(ObjectId::new()))
                .clone();
            stored.push(created);
            outcome.upserted_id = Some(id);
        }

        Ok(outcome)
    }

    async fn delete(
        &self,
        database: &str,
        collection: &str,
        filter: Document,
        many: bool,
    ) -> Result<u64, StoreError> {
        let mut databases = self.databases.write();
        let Some(stored) = databases
            .get_mut(database)
            .and_then(|colls| colls.get_mut(collection))
        else {
            return Ok(0);
        };

        let mut deleted = 0;
        let mut kept = Vec::with_capacity(stored.len());
        for document in stored.drain(..) {
            if (many || deleted == 0) && matches_filter(&document, &filter)? {
                deleted += 1;
            } else {
                kept.push(document);
            }
        }
        *stored = kept;
        Ok(deleted)
    }

    async fn run_command(
        &self,
        database: &str,
        command: Document,
    ) -> Result<Document, StoreError> {
        delay(self.command_delay).await;
        let (name, arg) = command
            .iter()
            .next()
            .ok_or_else(|| StoreError::Command("empty command".into()))?;

        match name.as_str() {
            "ping" => Ok(doc! { "ok": 1.0 }),
            "collStats" => {
                let collection = arg.as_str().unwrap_or_default();
                let databases = self.databases.read();
                let docs = databases
                    .get(database)
                    .and_then(|colls| colls.get(collection))
                    .ok_or_else(|| {
                        StoreError::Command(format!(
                            "Collection [{database}.{collection}] not found."
                        ))
                    })?;
                let size: i64 = docs.iter().map(encoded_size).sum();
                let count = docs.len() as i64;
                let avg_obj_size = if count > 0 { size / count } else { 0 };
                Ok(doc! {
                    "ns": format!("{database}.{collection}"),
                    "count": count,
                    "size": size,
                    "avgObjSize": avg_obj_size,
                    "ok": 1.0,
                })
            }
            other => Err(StoreError::Command(format!("no such command: '{other}'"))),
        }
    }

    async fn list_databases(&self) -> Result<Vec<DatabaseInfo>, StoreError> {
        Ok(self
            .databases
            .read()
            .iter()
            .map(|(name, colls)| DatabaseInfo {
                name: name.clone(),
                size_on_disk: colls.values().flatten().map(encoded_size).sum::<i64>() as u64,
                empty: colls.values().all(Vec::is_empty),
            })
            .collect())
    }

    async fn list_collection_names(&self, database: &str) -> Result<Vec<String>, StoreError> {
        Ok(self
            .databases
            .read()
            .get(database)
            .map(|colls| colls.keys().cloned().collect())
            .unwrap_or_default())
    }

    async fn list_indexes(
        &self,
        database: &str,
        collection: &str,
    ) -> Result<Vec<Document>, StoreError> {
        let exists = self
            .databases
            .read()
            .get(database)
            .is_some_and(|colls| colls.contains_key(collection));
        if !exists {
            return Err(StoreError::Command(format!(
                "ns does not exist: {database}.{collection}"
            )));
        }
        Ok(vec![doc! { "v": 2, "key": { "_id": 1 }, "name": "_id_" }])
    }

    async fn estimated_count(&self, database: &str, collection: &str) -> Result<u64, StoreError> {
        Ok(self.documents(database, collection).len() as u64)
    }

    async fn close(&self) {
        *self.closed.lock() = true;
    }
}

/// Hands out [`MemoryStore`]s keyed by the first host of the requested connection.
#[derive(Default)]
pub struct MemoryConnector {
    stores: HashMap<String, Arc<MemoryStore>>,
    stalled: HashSet<String>,
    connections: Mutex<Vec<ConnectionConfig>>,
}

impl MemoryConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the store reachable at `host` (formatted as `host:port`).
    pub fn with_store(mut self, host: &str, store: Arc<MemoryStore>) -> Self {
        self.stores.insert(host.to_string(), store);
        self
    }

    /// Makes connections to `host` hang forever.
    pub fn with_stalled_host(mut self, host: &str) -> Self {
        self.stalled.insert(host.to_string());
        self
    }

    /// Every connection config passed to `connect`, in call order.
    pub fn connections(&self) -> Vec<ConnectionConfig> {
        self.connections.lock().clone()
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn connect(
        &self,
        config: &ConnectionConfig,
    ) -> Result<Arc<dyn DocumentStore>, StoreError> {
        self.connections.lock().push(config.clone());

        let host = config
            .hosts()
            .first()
            .map(ToString::to_string)
            .unwrap_or_default();

        if self.stalled.contains(&host) {
            std::future::pending::<()>().await;
        }

        match self.stores.get(&host) {
            Some(store) => Ok(store.clone()),
            None => Err(StoreError::Unavailable(format!(
                "No servers available for {host}: connection refused"
            ))),
        }
    }
}

async fn delay(duration: Option<Duration>) {
    if let Some(duration) = duration {
        tokio::time::sleep(duration).await;
    }
}

fn encoded_size(doc: &Document) -> i64 {
    bson::to_vec(doc).map(|bytes| bytes.len() as i64).unwrap_or(0)
}

fn as_count(value: &Bson) -> Result<usize, StoreError> {
    match value {
        Bson::Int32(n) if *n >= 0 => Ok(*n as usize),
        Bson::Int64(n) if *n >= 0 => Ok(*n as usize),
        Bson::Double(n) if *n >= 0.0 => Ok(*n as usize),
        other => Err(StoreError::Command(format!(
            "expected a non-negative number, found {other}"
        ))),
    }
}

fn is_operator_document(value: &Bson) -> bool {
    match value {
        Bson::Document(doc) => doc.keys().next().is_some_and(|k| k.starts_with('$')),
        _ => false,
    }
}

fn filter_documents(docs: &[Document], filter: &Document) -> Result<Vec<Document>, StoreError> {
    let mut matched = Vec::new();
    for doc in docs {
        if matches_filter(doc, filter)? {
            matched.push(doc.clone());
        }
    }
    Ok(matched)
}

fn matches_filter(doc: &Document, filter: &Document) -> Result<bool, StoreError> {
    for (key, condition) in filter {
        let matched = match key.as_str() {
            "$and" | "$or" => {
                let clauses = condition
                    .as_array()
                    .ok_or_else(|| StoreError::Command(format!("{key} must be an array")))?;
                let mut results = Vec::with_capacity(clauses.len());
                for clause in clauses {
                    let clause = clause.as_document().ok_or_else(|| {
                        StoreError::Command(format!("{key} entries must be objects"))
                    })?;
                    results.push(matches_filter(doc, clause)?);
                }
                if key == "$and" {
                    results.iter().all(|r| *r)
                } else {
                    results.iter().any(|r| *r)
                }
            }
            other if other.starts_with('$') => {
                return Err(StoreError::Command(format!(
                    "unknown top level operator: {other}"
                )));
            }
            path => matches_condition(lookup(doc, path), condition)?,
        };
        if !matched {
            return Ok(false);
        }
    }
    Ok(true)
}

fn matches_condition(value: Option<&Bson>, condition: &Bson) -> Result<bool, StoreError> {
    let Bson::Document(operators) = condition else {
        return Ok(value.is_some_and(|v| values_equal(v, condition)));
    };
    if !is_operator_document(condition) {
        return Ok(value.is_some_and(|v| values_equal(v, condition)));
    }

    for (op, arg) in operators {
        let ordering = value.and_then(|v| compare(v, arg));
        let matched = match op.as_str() {
            "$eq" => value.is_some_and(|v| values_equal(v, arg)),
            "$ne" => !value.is_some_and(|v| values_equal(v, arg)),
            "$gt" => ordering == Some(Ordering::Greater),
            "$gte" => matches!(ordering, Some(Ordering::Greater | Ordering::Equal)),
            "$lt" => ordering == Some(Ordering::Less),
            "$lte" => matches!(ordering, Some(Ordering::Less | Ordering::Equal)),
            "$in" | "$nin" => {
                let candidates = arg
                    .as_array()
                    .ok_or_else(|| StoreError::Command(format!("{op} needs an array")))?;
                let found = value.is_some_and(|v| candidates.iter().any(|c| values_equal(v, c)));
                if op == "$in" { found } else { !found }
            }
            "$exists" => value.is_some() == truthy(arg),
            other => {
                return Err(StoreError::Command(format!("unknown operator: {other}")));
            }
        };
        if !matched {
            return Ok(false);
        }
    }
    Ok(true)
}

fn lookup<'a>(doc: &'a Document, path: &str) -> Option<&'a Bson> {
    let mut segments = path.split('.');
    let mut current = doc.get(segments.next()?)?;
    for segment in segments {
        current = current.as_document()?.get(segment)?;
    }
    Some(current)
}

fn as_f64(value: &Bson) -> Option<f64> {
    match value {
        Bson::Int32(n) => Some(*n as f64),
        Bson::Int64(n) => Some(*n as f64),
        Bson::Double(n) => Some(*n),
        _ => None,
    }
}

fn compare(a: &Bson, b: &Bson) -> Option<Ordering> {
    if let (Some(x), Some(y)) = (as_f64(a), as_f64(b)) {
        return x.partial_cmp(&y);
    }
    match (a, b) {
        (Bson::String(x), Bson::String(y)) => Some(x.cmp(y)),
        (Bson::DateTime(x), Bson::DateTime(y)) => Some(x.cmp(y)),
        (Bson::ObjectId(x), Bson::ObjectId(y)) => Some(x.cmp(y)),
        (Bson::Boolean(x), Bson::Boolean(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

fn values_equal(a: &Bson, b: &Bson) -> bool {
    match (as_f64(a), as_f64(b)) {
        (Some(x), Some(y)) => x == y,
        _ => a == b,
    }
}

fn truthy(value: &Bson) -> bool {
    match value {
        Bson::Boolean(b) => *b,
        Bson::Null => false,
        other => as_f64(other).is_none_or(|n| n != 0.0),
    }
}

fn sort_documents(docs: &mut [Document], sort: &Document) {
    docs.sort_by(|a, b| {
        for (field, direction) in sort {
            let ordering = match (lookup(a, field), lookup(b, field)) {
                (None, None) => Ordering::Equal,
                (None, Some(_)) => Ordering::Less,
                (Some(_), None) => Ordering::Greater,
                (Some(x), Some(y)) => compare(x, y).unwrap_or(Ordering::Equal),
            };
            let ordering = if as_f64(direction).is_some_and(|d| d < 0.0) {
                ordering.reverse()
            } else {
                ordering
            };
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        Ordering::Equal
    });
}

fn project(doc: &Document, projection: &Document) -> Document {
    let inclusive = projection
        .iter()
        .any(|(field, flag)| field != "_id" && truthy(flag));

    if !inclusive {
        let mut projected = doc.clone();
        for (field, flag) in projection {
            if !truthy(flag) {
                projected.remove(field);
            }
        }
        return projected;
    }

    let keep_id = projection.get("_id").is_none_or(truthy);
    doc.iter()
        .filter(|(field, _)| {
            if field.as_str() == "_id" {
                keep_id
            } else {
                projection.get(field.as_str()).is_some_and(truthy)
            }
        })
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

fn apply_update(doc: &Document, update: &Document) -> Result<Document, StoreError> {
    if !update.keys().any(|k| k.starts_with('$')) {
        // Replacement keeps the original identity.
        let mut replaced = update.clone();
        if let Some(id) = doc.get("_id") {
            replaced.insert("_id", id.clone());
        }
        return Ok(replaced);
    }

    let mut updated = doc.clone();
    for (op, fields) in update {
        let fields = fields
            .as_document()
            .ok_or_else(|| StoreError::Command(format!("{op} requires an object")))?;
        for (field, value) in fields {
            match op.as_str() {
                "$set" => {
                    updated.insert(field.clone(), value.clone());
                }
                "$unset" => {
                    updated.remove(field);
                }
                "$inc" => {
                    let current = updated.get(field).cloned().unwrap_or(Bson::Int32(0));
                    let sum = match (&current, value) {
                        (Bson::Int32(a), Bson::Int32(b)) => Bson::Int32(a + b),
                        (Bson::Int64(a), Bson::Int64(b)) => Bson::Int64(a + b),
                        (Bson::Int32(a), Bson::Int64(b)) | (Bson::Int64(b), Bson::Int32(a)) => {
                            Bson::Int64(*a as i64 + b)
                        }
                        (a, b) => match (as_f64(a), as_f64(b)) {
                            (Some(a), Some(b)) => Bson::Double(a + b),
                            _ => {
                                return Err(StoreError::Command(format!(
                                    "Cannot apply $inc to a value of non-numeric type: {field}"
                                )));
                            }
                        },
                    };
                    updated.insert(field.clone(), sum);
                }
                other => {
                    return Err(StoreError::Command(format!(
                        "Unknown modifier: {other}"
                    )));
                }
            }
        }
    }
    Ok(updated)
}

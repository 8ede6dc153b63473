//! Shard-aware endpoints.
//!
//! Cluster-wide listings probe every shard over a direct connection and
//! merge what the reachable ones report. An unreachable shard shows up in
//! the per-shard details with its error and is left out of the merged view;
//! it never fails the request.
//!
//! The `/shard/{id}/...` variants talk to a single shard and return its
//! result as is.

use crate::api::extract::JsonBody;
use crate::errors::GatewayError;
use crate::state::AppState;
use crate::translator::{self, QueryRequest, StatsDetail};
use axum::Json;
use axum::extract::{Path, State};
use serde::Serialize;
use serde_json::{Value, json};
use shards::{FanOutReport, MergedName, NameUnion, ShardRecord};

#[derive(Serialize)]
struct ShardCounts {
    total_shards: usize,
    online_shards: usize,
    offline_shards: usize,
}

impl<T> From<&FanOutReport<T>> for ShardCounts {
    fn from(report: &FanOutReport<T>) -> Self {
        Self {
            total_shards: report.total(),
            online_shards: report.online(),
            offline_shards: report.offline(),
        }
    }
}

#[derive(Serialize)]
pub struct ShardStatus {
    id: String,
    host: String,
    state: i64,
    online: bool,
    error: Option<String>,
}

#[derive(Serialize)]
pub struct ShardList {
    #[serde(flatten)]
    counts: ShardCounts,
    shards: Vec<ShardStatus>,
}

pub async fn list_shards(State(state): State<AppState>) -> Result<Json<ShardList>, GatewayError> {
    let records = state.directory().await?.list().await?;
    let report = state
        .fanout()
        .execute(records, |store| async move { store.ping().await })
        .await;

    let counts = ShardCounts::from(&report);
    let shards = report
        .outcomes
        .into_iter()
        .map(|outcome| ShardStatus {
            online: outcome.result.is_ok(),
            error: outcome.result.err().map(|e| e.to_string()),
            id: outcome.shard.id,
            host: outcome.shard.host,
            state: outcome.shard.state,
        })
        .collect();

    Ok(Json(ShardList { counts, shards }))
}

#[derive(Serialize)]
pub struct DatabaseDetail {
    shard_id: String,
    online: bool,
    databases: Vec<String>,
    error: Option<String>,
}

#[derive(Serialize)]
pub struct AvailableDatabases {
    databases: Vec<MergedName>,
    #[serde(flatten)]
    counts: ShardCounts,
    shard_details: Vec<DatabaseDetail>,
}

pub async fn available_databases(
    State(state): State<AppState>,
) -> Result<Json<AvailableDatabases>, GatewayError> {
    let records = state.directory().await?.list().await?;
    let report = state
        .fanout()
        .execute(records, |store| async move { store.list_database_names().await })
        .await;

    let counts = ShardCounts::from(&report);
    let mut union = NameUnion::new();
    for (shard, names) in report.successes() {
        union.add(&shard.id, names.iter().cloned());
    }

    let shard_details = report
        .outcomes
        .into_iter()
        .map(|outcome| {
            let (databases, error) = split(outcome.result);
            DatabaseDetail {
                shard_id: outcome.shard.id,
                online: error.is_none(),
                databases,
                error,
            }
        })
        .collect();

    Ok(Json(AvailableDatabases {
        databases: union.into_merged(),
        counts,
        shard_details,
    }))
}

#[derive(Serialize)]
pub struct CollectionDetail {
    shard_id: String,
    online: bool,
    collections: Vec<String>,
    error: Option<String>,
}

#[derive(Serialize)]
pub struct AvailableCollections {
    database: String,
    collections: Vec<MergedName>,
    #[serde(flatten)]
    counts: ShardCounts,
    shard_details: Vec<CollectionDetail>,
}

pub async fn available_collections(
    State(state): State<AppState>,
    Path(database): Path<String>,
) -> Result<Json<AvailableCollections>, GatewayError> {
    let records = state.directory().await?.list().await?;

    let target = database.clone();
    let report = state
        .fanout()
        .execute(records, move |store| {
            let database = target.clone();
            async move {
                // A shard without the database is reachable, it just has nothing to report.
                if !store.list_database_names().await?.contains(&database) {
                    return Ok(Vec::new());
                }
                store.list_collection_names(&database).await
            }
        })
        .await;

    let counts = ShardCounts::from(&report);
    let mut union = NameUnion::new();
    for (shard, names) in report.successes() {
        union.add(&shard.id, names.iter().cloned());
    }

    let shard_details = report
        .outcomes
        .into_iter()
        .map(|outcome| {
            let (collections, error) = split(outcome.result);
            CollectionDetail {
                shard_id: outcome.shard.id,
                online: error.is_none(),
                collections,
                error,
            }
        })
        .collect();

    Ok(Json(AvailableCollections {
        database,
        collections: union.into_merged(),
        counts,
        shard_details,
    }))
}

fn split<E: ToString>(result: Result<Vec<String>, E>) -> (Vec<String>, Option<String>) {
    match result {
        Ok(names) => (names, None),
        Err(e) => (Vec::new(), Some(e.to_string())),
    }
}

async fn lookup(state: &AppState, shard_id: String) -> Result<ShardRecord, GatewayError> {
    state
        .directory()
        .await?
        .find(&shard_id)
        .await?
        .ok_or(GatewayError::ShardNotFound(shard_id))
}

pub async fn shard_query(
    State(state): State<AppState>,
    Path(shard_id): Path<String>,
    JsonBody(request): JsonBody<QueryRequest>,
) -> Result<Json<Value>, GatewayError> {
    let (namespace, spec) = request.into_find()?;
    let shard = lookup(&state, shard_id).await?;

    let mut body = state
        .direct()
        .execute_one(&shard, move |store| async move {
            translator::find(store.as_ref(), namespace, spec).await
        })
        .await?;
    body["shard"] = json!(shard.id);
    Ok(Json(body))
}

pub async fn shard_databases(
    State(state): State<AppState>,
    Path(shard_id): Path<String>,
) -> Result<Json<Value>, GatewayError> {
    let shard = lookup(&state, shard_id).await?;

    let databases = state
        .direct()
        .execute_one(&shard, |store| async move {
            translator::databases(store.as_ref()).await
        })
        .await?;

    Ok(Json(json!({
        "shard": shard.id,
        "databases": databases,
    })))
}

pub async fn shard_collections(
    State(state): State<AppState>,
    Path((shard_id, database)): Path<(String, String)>,
) -> Result<Json<Value>, GatewayError> {
    let shard = lookup(&state, shard_id).await?;

    let target = database.clone();
    let collections = state
        .direct()
        .execute_one(&shard, move |store| async move {
            translator::collections(store.as_ref(), &target, StatsDetail::Basic).await
        })
        .await?;

    Ok(Json(json!({
        "shard": shard.id,
        "database": database,
        "collections": collections,
    })))
}

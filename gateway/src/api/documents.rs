//! Routing-endpoint passthrough: CRUD, raw commands and per-collection metadata.

use crate::api::extract::JsonBody;
use crate::errors::GatewayError;
use crate::state::AppState;
use crate::translator::{
    self, AggregateRequest, CommandRequest, DeleteRequest, InsertRequest, Namespace,
    QueryRequest, SampleRequest, UpdateRequest,
};
use axum::Json;
use axum::extract::{Path, State};
use serde_json::Value;

type JsonResult = Result<Json<Value>, GatewayError>;

pub async fn query(
    State(state): State<AppState>,
    JsonBody(request): JsonBody<QueryRequest>,
) -> JsonResult {
    let (namespace, spec) = request.into_find()?;
    let store = state.primary().await?;
    Ok(Json(translator::find(store.as_ref(), namespace, spec).await?))
}

pub async fn aggregate(
    State(state): State<AppState>,
    JsonBody(request): JsonBody<AggregateRequest>,
) -> JsonResult {
    let (namespace, pipeline) = request.into_pipeline()?;
    let store = state.primary().await?;
    Ok(Json(
        translator::aggregate(store.as_ref(), namespace, pipeline, "results").await?,
    ))
}

pub async fn sample(
    State(state): State<AppState>,
    JsonBody(request): JsonBody<SampleRequest>,
) -> JsonResult {
    let (namespace, pipeline) = request.into_pipeline()?;
    let store = state.primary().await?;
    Ok(Json(
        translator::aggregate(store.as_ref(), namespace, pipeline, "documents").await?,
    ))
}

pub async fn insert(
    State(state): State<AppState>,
    JsonBody(request): JsonBody<InsertRequest>,
) -> JsonResult {
    let (namespace, insert) = request.into_insert()?;
    let store = state.primary().await?;
    Ok(Json(translator::insert(store.as_ref(), namespace, insert).await?))
}

pub async fn update(
    State(state): State<AppState>,
    JsonBody(request): JsonBody<UpdateRequest>,
) -> JsonResult {
    let (namespace, spec) = request.into_update()?;
    let store = state.primary().await?;
    Ok(Json(translator::update(store.as_ref(), namespace, spec).await?))
}

pub async fn delete(
    State(state): State<AppState>,
    JsonBody(request): JsonBody<DeleteRequest>,
) -> JsonResult {
    let (namespace, filter, many) = request.into_delete()?;
    let store = state.primary().await?;
    Ok(Json(
        translator::delete(store.as_ref(), namespace, filter, many).await?,
    ))
}

pub async fn command(
    State(state): State<AppState>,
    JsonBody(request): JsonBody<CommandRequest>,
) -> JsonResult {
    let (database, command) = request.into_command()?;
    let store = state.primary().await?;
    Ok(Json(
        translator::command(store.as_ref(), database, command).await?,
    ))
}

pub async fn count(
    State(state): State<AppState>,
    Path((database, collection)): Path<(String, String)>,
) -> JsonResult {
    let store = state.primary().await?;
    let namespace = Namespace {
        database,
        collection,
    };
    Ok(Json(translator::count(store.as_ref(), namespace).await?))
}

pub async fn indexes(
    State(state): State<AppState>,
    Path((database, collection)): Path<(String, String)>,
) -> JsonResult {
    let store = state.primary().await?;
    let namespace = Namespace {
        database,
        collection,
    };
    Ok(Json(translator::indexes(store.as_ref(), namespace).await?))
}

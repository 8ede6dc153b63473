use crate::errors::GatewayError;
use crate::state::AppState;
use crate::translator::{self, StatsDetail};
use axum::Json;
use axum::extract::{Path, State};
use serde_json::{Value, json};

pub async fn list_databases(State(state): State<AppState>) -> Result<Json<Value>, GatewayError> {
    let store = state.primary().await?;
    let databases = translator::databases(store.as_ref()).await?;
    Ok(Json(json!({ "databases": databases })))
}

pub async fn list_collections(
    State(state): State<AppState>,
    Path(database): Path<String>,
) -> Result<Json<Value>, GatewayError> {
    let store = state.primary().await?;
    let collections = translator::collections(store.as_ref(), &database, StatsDetail::Full).await?;
    Ok(Json(json!({
        "database": database,
        "collections": collections,
    })))
}

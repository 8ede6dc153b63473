use crate::errors::ShardError;
use crate::host_spec::HostSpec;
use backend::bson::{Bson, Document, doc};
use backend::{ConnectionConfig, DocumentStore, FindSpec, StoreError};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

const CONFIG_DATABASE: &str = "config";
const SHARDS_COLLECTION: &str = "shards";

/// One entry of `config.shards`.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ShardRecord {
    pub id: String,
    pub host: String,
    pub state: i64,
}

impl ShardRecord {
    pub fn from_document(doc: &Document) -> Self {
        let id = match doc.get("_id") {
            Some(Bson::String(id)) => id.clone(),
            Some(other) => other.to_string(),
            None => String::new(),
        };
        let host = doc.get_str("host").unwrap_or_default().to_string();
        let state = match doc.get("state") {
            Some(Bson::Int32(n)) => i64::from(*n),
            Some(Bson::Int64(n)) => *n,
            Some(Bson::Double(n)) => *n as i64,
            _ => 1,
        };
        ShardRecord { id, host, state }
    }

    pub fn host_spec(&self) -> Result<HostSpec, ShardError> {
        HostSpec::parse(&self.host).map_err(|source| ShardError::HostSpec {
            host: self.host.clone(),
            source,
        })
    }
}

/// Reads shard records through the cluster's routing endpoint.
#[derive(Clone)]
pub struct ShardDirectory {
    store: Arc<dyn DocumentStore>,
}

impl ShardDirectory {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    /// All shards, in the order the cluster metadata returns them.
    pub async fn list(&self) -> Result<Vec<ShardRecord>, StoreError> {
        let docs = self
            .store
            .find(CONFIG_DATABASE, SHARDS_COLLECTION, FindSpec::default())
            .await?;
        Ok(docs.iter().map(ShardRecord::from_document).collect())
    }

    pub async fn find(&self, shard_id: &str) -> Result<Option<ShardRecord>, StoreError> {
        let doc = self
            .store
            .find_one(CONFIG_DATABASE, SHARDS_COLLECTION, doc! { "_id": shard_id })
            .await?;
        Ok(doc.as_ref().map(ShardRecord::from_document))
    }
}

/// Connection settings for talking to `shard` directly, reusing the primary's credentials.
pub fn direct_target(
    shard: &ShardRecord,
    primary: &ConnectionConfig,
    timeout: Duration,
) -> Result<ConnectionConfig, ShardError> {
    let spec = shard.host_spec()?;
    Ok(primary.direct_to(spec.primary_candidate(), timeout))
}

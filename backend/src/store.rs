use crate::connection::ConnectionConfig;
use crate::errors::StoreError;
use async_trait::async_trait;
use mongodb::bson::{Bson, Document, doc};
use std::sync::Arc;

/// Parameters of a `find` call.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FindSpec {
    pub filter: Document,
    pub projection: Option<Document>,
    pub sort: Option<Document>,
    pub skip: Option<u64>,
    /// `None` returns every matching document.
    pub limit: Option<i64>,
}

/// The update to apply: either operator/replacement document or an aggregation pipeline.
#[derive(Clone, Debug, PartialEq)]
pub enum UpdateBody {
    Modifications(Document),
    Pipeline(Vec<Document>),
}

#[derive(Clone, Debug, PartialEq)]
pub struct UpdateSpec {
    pub filter: Document,
    pub update: UpdateBody,
    /// Apply to every match instead of the first one.
    pub many: bool,
    pub upsert: bool,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct UpdateOutcome {
    pub matched_count: u64,
    pub modified_count: u64,
    pub upserted_id: Option<Bson>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct DatabaseInfo {
    pub name: String,
    pub size_on_disk: u64,
    pub empty: bool,
}

/// A handle to one deployment: a routing endpoint or a single shard.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn find(
        &self,
        database: &str,
        collection: &str,
        spec: FindSpec,
    ) -> Result<Vec<Document>, StoreError>;

    async fn find_one(
        &self,
        database: &str,
        collection: &str,
        filter: Document,
    ) -> Result<Option<Document>, StoreError>;

    async fn aggregate(
        &self,
        database: &str,
        collection: &str,
        pipeline: Vec<Document>,
    ) -> Result<Vec<Document>, StoreError>;

    /// Inserts `documents` and returns their ids in input order.
    async fn insert(
        &self,
        database: &str,
        collection: &str,
        documents: Vec<Document>,
        ordered: bool,
    ) -> Result<Vec<Bson>, StoreError>;

    async fn update(
        &self,
        database: &str,
        collection: &str,
        spec: UpdateSpec,
    ) -> Result<UpdateOutcome, StoreError>;

    /// Deletes the first match, or every match when `many` is set.
    async fn delete(
        &self,
        database: &str,
        collection: &str,
        filter: Document,
        many: bool,
    ) -> Result<u64, StoreError>;

    async fn run_command(&self, database: &str, command: Document)
    -> Result<Document, StoreError>;

    async fn list_databases(&self) -> Result<Vec<DatabaseInfo>, StoreError>;

    async fn list_database_names(&self) -> Result<Vec<String>, StoreError> {
        Ok(self
            .list_databases()
            .await?
            .into_iter()
            .map(|db| db.name)
            .collect())
    }

    async fn list_collection_names(&self, database: &str) -> Result<Vec<String>, StoreError>;

    async fn list_indexes(
        &self,
        database: &str,
        collection: &str,
    ) -> Result<Vec<Document>, StoreError>;

    async fn estimated_count(&self, database: &str, collection: &str) -> Result<u64, StoreError>;

    async fn ping(&self) -> Result<(), StoreError> {
        self.run_command("admin", doc! { "ping": 1 }).await.map(|_| ())
    }

    /// Releases the underlying connections. The handle must not be used afterwards.
    async fn close(&self);
}

/// Opens store handles from connection configurations.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, config: &ConnectionConfig)
    -> Result<Arc<dyn DocumentStore>, StoreError>;
}

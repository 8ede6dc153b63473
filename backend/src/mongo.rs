//! [`DocumentStore`] backed by the official `mongodb` driver.

use crate::connection::ConnectionConfig;
use crate::errors::StoreError;
use crate::store::{
    Connector, DatabaseInfo, DocumentStore, FindSpec, UpdateBody, UpdateOutcome, UpdateSpec,
};
use async_trait::async_trait;
use futures::TryStreamExt;
use mongodb::bson::{self, Bson, Document};
use mongodb::options::{
    ClientOptions, FindOptions, InsertManyOptions, UpdateModifications, UpdateOptions,
};
use mongodb::{Client, Collection, IndexModel};
use std::sync::Arc;

const APP_NAME: &str = "docbridge";

pub struct MongoStore {
    client: Client,
}

impl MongoStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn collection(&self, database: &str, collection: &str) -> Collection<Document> {
        self.client.database(database).collection(collection)
    }
}

#[async_trait]
impl DocumentStore for MongoStore {
    async fn find(
        &self,
        database: &str,
        collection: &str,
        spec: FindSpec,
    ) -> Result<Vec<Document>, StoreError> {
        let options = FindOptions::builder()
            .projection(spec.projection)
            .sort(spec.sort)
            .skip(spec.skip)
            .limit(spec.limit)
            .build();

        let cursor = self
            .collection(database, collection)
            .find(spec.filter)
            .with_options(options)
            .await?;
        Ok(cursor.try_collect().await?)
    }

    async fn find_one(
        &self,
        database: &str,
        collection: &str,
        filter: Document,
    ) -> Result<Option<Document>, StoreError> {
        Ok(self.collection(database, collection).find_one(filter).await?)
    }

    async fn aggregate(
        &self,
        database: &str,
        collection: &str,
        pipeline: Vec<Document>,
    ) -> Result<Vec<Document>, StoreError> {
        let cursor = self.collection(database, collection).aggregate(pipeline).await?;
        Ok(cursor.try_collect().await?)
    }

    async fn insert(
        &self,
        database: &str,
        collection: &str,
        documents: Vec<Document>,
        ordered: bool,
    ) -> Result<Vec<Bson>, StoreError> {
        let options = InsertManyOptions::builder().ordered(ordered).build();
        let result = self
            .collection(database, collection)
            .insert_many(documents)
            .with_options(options)
            .await?;

        let mut ids: Vec<(usize, Bson)> = result.inserted_ids.into_iter().collect();
        ids.sort_by_key(|(index, _)| *index);
        Ok(ids.into_iter().map(|(_, id)| id).collect())
    }

    async fn update(
        &self,
        database: &str,
        collection: &str,
        spec: UpdateSpec,
    ) -> Result<UpdateOutcome, StoreError> {
        let options = UpdateOptions::builder().upsert(spec.upsert).build();
        let update = match spec.update {
            UpdateBody::Modifications(doc) => UpdateModifications::Document(doc),
            UpdateBody::Pipeline(stages) => UpdateModifications::Pipeline(stages),
        };

        let coll = self.collection(database, collection);
        let result = if spec.many {
            coll.update_many(spec.filter, update)
                .with_options(options)
                .await?
        } else {
            coll.update_one(spec.filter, update)
                .with_options(options)
                .await?
        };

        Ok(UpdateOutcome {
            matched_count: result.matched_count,
            modified_count: result.modified_count,
            upserted_id: result.upserted_id,
        })
    }

    async fn delete(
        &self,
        database: &str,
        collection: &str,
        filter: Document,
        many: bool,
    ) -> Result<u64, StoreError> {
        let coll = self.collection(database, collection);
        let result = if many {
            coll.delete_many(filter).await?
        } else {
            coll.delete_one(filter).await?
        };
        Ok(result.deleted_count)
    }

    async fn run_command(
        &self,
        database: &str,
        command: Document,
    ) -> Result<Document, StoreError> {
        Ok(self.client.database(database).run_command(command).await?)
    }

    async fn list_databases(&self) -> Result<Vec<DatabaseInfo>, StoreError> {
        let specs = self.client.list_databases().await?;
        Ok(specs
            .into_iter()
            .map(|spec| DatabaseInfo {
                name: spec.name,
                size_on_disk: spec.size_on_disk,
                empty: spec.empty,
            })
            .collect())
    }

    async fn list_database_names(&self) -> Result<Vec<String>, StoreError> {
        Ok(self.client.list_database_names().await?)
    }

    async fn list_collection_names(&self, database: &str) -> Result<Vec<String>, StoreError> {
        Ok(self.client.database(database).list_collection_names().await?)
    }

    async fn list_indexes(
        &self,
        database: &str,
        collection: &str,
    ) -> Result<Vec<Document>, StoreError> {
        let cursor = self.collection(database, collection).list_indexes().await?;
        let models: Vec<IndexModel> = cursor.try_collect().await?;
        models
            .iter()
            .map(|model| bson::to_document(model).map_err(|e| StoreError::Command(e.to_string())))
            .collect()
    }

    async fn estimated_count(&self, database: &str, collection: &str) -> Result<u64, StoreError> {
        Ok(self
            .collection(database, collection)
            .estimated_document_count()
            .await?)
    }

    async fn close(&self) {
        self.client.clone().shutdown().await;
    }
}

/// Opens driver clients. Creating a client does not touch the network; the
/// first operation does, bounded by `serverSelectionTimeoutMS`.
#[derive(Clone, Copy, Debug, Default)]
pub struct MongoConnector;

#[async_trait]
impl Connector for MongoConnector {
    async fn connect(
        &self,
        config: &ConnectionConfig,
    ) -> Result<Arc<dyn DocumentStore>, StoreError> {
        tracing::debug!(uri = %config.redacted(), "Opening database client");

        let mut options = ClientOptions::parse(config.connection_string().clone()).await?;
        options.app_name.get_or_insert_with(|| APP_NAME.to_string());

        let client = Client::with_options(options)?;
        Ok(Arc::new(MongoStore::new(client)))
    }
}

use crate::auth::ApiKey;
use crate::config::Timeouts;
use backend::{ConnectionConfig, Connector, DocumentStore, StoreError};
use shards::{ShardDirectory, ShardExecutor};
use shared::admin_service::ReadinessProbe;
use std::sync::Arc;
use tokio::sync::OnceCell;

struct StateInner {
    connector: Arc<dyn Connector>,
    primary_config: Arc<ConnectionConfig>,
    /// Created on first use and shared by every request afterwards.
    primary: OnceCell<Arc<dyn DocumentStore>>,
    api_key: ApiKey,
    timeouts: Timeouts,
}

/// Handler state. Cloning is cheap.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<StateInner>,
}

impl AppState {
    pub fn new(
        connector: Arc<dyn Connector>,
        primary_config: ConnectionConfig,
        api_key: ApiKey,
        timeouts: Timeouts,
    ) -> Self {
        Self {
            inner: Arc::new(StateInner {
                connector,
                primary_config: Arc::new(primary_config),
                primary: OnceCell::new(),
                api_key,
                timeouts,
            }),
        }
    }

    pub fn api_key(&self) -> &ApiKey {
        &self.inner.api_key
    }

    /// The client for the cluster's routing endpoint, connecting on first call.
    ///
    /// Concurrent first calls share a single connection attempt. A failed
    /// attempt is not cached; the next request tries again.
    pub async fn primary(&self) -> Result<Arc<dyn DocumentStore>, StoreError> {
        self.inner
            .primary
            .get_or_try_init(|| async {
                tracing::info!(uri = %self.inner.primary_config.redacted(), "Connecting to database");
                self.inner.connector.connect(&self.inner.primary_config).await
            })
            .await
            .cloned()
    }

    pub async fn directory(&self) -> Result<ShardDirectory, StoreError> {
        Ok(ShardDirectory::new(self.primary().await?))
    }

    /// Executor for cluster-wide fan-out, bounded by the probe timeout.
    pub fn fanout(&self) -> ShardExecutor {
        ShardExecutor::new(
            self.inner.connector.clone(),
            self.inner.primary_config.clone(),
            self.inner.timeouts.probe(),
        )
    }

    /// Executor for single-shard operations, bounded by the direct timeout.
    pub fn direct(&self) -> ShardExecutor {
        self.fanout().with_timeout(self.inner.timeouts.direct())
    }

    pub async fn close(&self) {
        if let Some(primary) = self.inner.primary.get() {
            primary.close().await;
        }
    }
}

impl ReadinessProbe for AppState {
    fn is_ready(&self) -> bool {
        self.inner.primary.initialized()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use backend::memory::{MemoryConnector, MemoryStore};

    fn state(connector: MemoryConnector) -> AppState {
        AppState::new(
            Arc::new(connector),
            ConnectionConfig::parse("mongodb://mongos:27017").unwrap(),
            ApiKey::new("k"),
            Timeouts::default(),
        )
    }

    #[tokio::test]
    async fn test_primary_is_created_once() {
        let connector =
            Arc::new(MemoryConnector::new().with_store("mongos:27017", Arc::new(MemoryStore::new())));
        let state = AppState::new(
            connector.clone(),
            ConnectionConfig::parse("mongodb://mongos:27017").unwrap(),
            ApiKey::new("k"),
            Timeouts::default(),
        );

        assert!(!state.is_ready());
        let (a, b) = tokio::join!(state.primary(), state.primary());
        assert!(Arc::ptr_eq(&a.unwrap(), &b.unwrap()));
        state.primary().await.unwrap();

        assert!(state.is_ready());
        assert_eq!(connector.connections().len(), 1);
    }

    #[tokio::test]
    async fn test_failed_connection_is_retried() {
        let state = state(MemoryConnector::new());
        assert!(state.primary().await.is_err());
        assert!(state.primary().await.is_err());
        assert!(!state.is_ready());
    }
}

use crate::directory::{ShardRecord, direct_target};
use crate::errors::ShardError;
use crate::metrics_defs::{SHARD_PROBE_DURATION, SHARD_PROBE_FAILURES};
use backend::{ConnectionConfig, Connector, DocumentStore, StoreError};
use shared::{counter, histogram};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinSet;

/// Extra time allowed on top of the driver's server selection timeout, so an
/// unreachable shard reports the driver's error rather than a bare timeout.
/// Applies to connecting and the initial ping, never to the operation itself.
const SELECTION_GRACE: Duration = Duration::from_millis(500);

/// The result of running one operation against one shard.
#[derive(Debug)]
pub struct ShardOutcome<T> {
    pub shard: ShardRecord,
    pub result: Result<T, ShardError>,
}

impl<T> ShardOutcome<T> {
    pub fn is_online(&self) -> bool {
        self.result.is_ok()
    }
}

/// Per-shard outcomes in directory order.
#[derive(Debug)]
pub struct FanOutReport<T> {
    pub outcomes: Vec<ShardOutcome<T>>,
}

impl<T> FanOutReport<T> {
    pub fn total(&self) -> usize {
        self.outcomes.len()
    }

    pub fn online(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_online()).count()
    }

    pub fn offline(&self) -> usize {
        self.total() - self.online()
    }

    /// Successful results with the shard that produced them.
    pub fn successes(&self) -> impl Iterator<Item = (&ShardRecord, &T)> {
        self.outcomes
            .iter()
            .filter_map(|o| o.result.as_ref().ok().map(|value| (&o.shard, value)))
    }
}

/// Runs operations against shards over direct connections.
///
/// Each call opens a fresh connection per shard and closes it afterwards.
#[derive(Clone)]
pub struct ShardExecutor {
    connector: Arc<dyn Connector>,
    primary: Arc<ConnectionConfig>,
    timeout: Duration,
}

impl ShardExecutor {
    pub fn new(
        connector: Arc<dyn Connector>,
        primary: Arc<ConnectionConfig>,
        timeout: Duration,
    ) -> Self {
        Self {
            connector,
            primary,
            timeout,
        }
    }

    /// Same executor with a different per-shard timeout.
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        Self {
            timeout,
            ..self.clone()
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Runs `op` against every shard in parallel.
    ///
    /// A shard that fails or exceeds the timeout is reported in its outcome;
    /// it never affects the other shards.
    pub async fn execute<T, F, Fut>(&self, shards: Vec<ShardRecord>, op: F) -> FanOutReport<T>
    where
        T: Send + 'static,
        F: Fn(Arc<dyn DocumentStore>) -> Fut + Clone + Send + Sync + 'static,
        Fut: Future<Output = Result<T, StoreError>> + Send + 'static,
    {
        let mut join_set = JoinSet::new();
        let mut task_index = HashMap::new();

        for (index, shard) in shards.iter().enumerate() {
            let executor = self.clone();
            let shard = shard.clone();
            let op = op.clone();
            let abort_handle = join_set.spawn(async move { executor.run_on_shard(&shard, op).await });
            task_index.insert(abort_handle.id(), index);
        }

        let mut results: Vec<Option<Result<T, ShardError>>> =
            std::iter::repeat_with(|| None).take(shards.len()).collect();

        while let Some(joined) = join_set.join_next_with_id().await {
            let (task_id, result) = match joined {
                Ok((id, result)) => (id, result),
                Err(e) => {
                    tracing::error!("Shard task panicked: {}", e);
                    (e.id(), Err(ShardError::Task(e.to_string())))
                }
            };
            if let Some(index) = task_index.remove(&task_id) {
                results[index] = Some(result);
            }
        }

        let outcomes = shards
            .into_iter()
            .zip(results)
            .map(|(shard, result)| ShardOutcome {
                shard,
                result: result.unwrap_or_else(|| Err(ShardError::Task("task lost".into()))),
            })
            .collect();

        FanOutReport { outcomes }
    }

    /// Runs `op` against a single shard.
    pub async fn execute_one<T, F, Fut>(&self, shard: &ShardRecord, op: F) -> Result<T, ShardError>
    where
        F: FnOnce(Arc<dyn DocumentStore>) -> Fut,
        Fut: Future<Output = Result<T, StoreError>>,
    {
        self.run_on_shard(shard, op).await
    }

    async fn run_on_shard<T, F, Fut>(&self, shard: &ShardRecord, op: F) -> Result<T, ShardError>
    where
        F: FnOnce(Arc<dyn DocumentStore>) -> Fut,
        Fut: Future<Output = Result<T, StoreError>>,
    {
        let started = Instant::now();

        let result = match direct_target(shard, &self.primary, self.timeout) {
            Ok(target) => self.run_direct(&target, op).await,
            Err(e) => Err(e),
        };

        let outcome = if result.is_ok() { "ok" } else { "error" };
        histogram!(SHARD_PROBE_DURATION, "shard" => shard.id.clone(), "outcome" => outcome)
            .record(started.elapsed().as_secs_f64());

        if let Err(e) = &result {
            counter!(SHARD_PROBE_FAILURES, "shard" => shard.id.clone()).increment(1);
            tracing::warn!(shard = %shard.id, host = %shard.host, error = %e, "Shard unreachable");
        }

        result
    }

    /// Connects to `target`, then runs `op` without a time limit.
    ///
    /// Only reaching the shard is bounded by the timeout. The store is
    /// closed on every path once it has been opened.
    async fn run_direct<T, F, Fut>(&self, target: &ConnectionConfig, op: F) -> Result<T, ShardError>
    where
        F: FnOnce(Arc<dyn DocumentStore>) -> Fut,
        Fut: Future<Output = Result<T, StoreError>>,
    {
        let store = self.connect(target).await?;
        let result = op(store.clone()).await;
        store.close().await;
        Ok(result?)
    }

    async fn connect(&self, target: &ConnectionConfig) -> Result<Arc<dyn DocumentStore>, ShardError> {
        let deadline = tokio::time::Instant::now() + self.timeout + SELECTION_GRACE;

        let store = tokio::time::timeout_at(deadline, self.connector.connect(target))
            .await
            .map_err(|_| ShardError::Timeout(self.timeout))??;

        let reachable = match tokio::time::timeout_at(deadline, store.ping()).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(ShardError::from(e)),
            Err(_) => Err(ShardError::Timeout(self.timeout)),
        };
        if let Err(e) = reachable {
            store.close().await;
            return Err(e);
        }

        Ok(store)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use backend::bson::doc;
    use backend::FindSpec;
    use backend::memory::{MemoryConnector, MemoryStore};
    use parking_lot::Mutex;
    use shared::testutils::CapturingRecorder;

    fn shard(id: &str, host: &str) -> ShardRecord {
        ShardRecord {
            id: id.into(),
            host: host.into(),
            state: 1,
        }
    }

    fn executor(connector: MemoryConnector, timeout: Duration) -> ShardExecutor {
        let primary = ConnectionConfig::parse("mongodb://root:pw@mongos:27017").unwrap();
        ShardExecutor::new(Arc::new(connector), Arc::new(primary), timeout)
    }

    #[tokio::test]
    async fn test_partial_failure_keeps_directory_order() {
        let a = Arc::new(MemoryStore::new().with_documents("sales", "orders", vec![doc! {}]));
        let c = Arc::new(MemoryStore::new().with_documents("hr", "people", vec![doc! {}]));
        let connector = MemoryConnector::new()
            .with_store("a1:27018", a)
            .with_store("c1:27018", c);

        let report = executor(connector, Duration::from_secs(1))
            .execute(
                vec![
                    shard("shardA", "rsA/a1:27018"),
                    shard("shardB", "rsB/b1:27018"),
                    shard("shardC", "rsC/c1:27018,c2:27018"),
                ],
                |store| async move { store.list_database_names().await },
            )
            .await;

        let ids: Vec<_> = report.outcomes.iter().map(|o| o.shard.id.as_str()).collect();
        assert_eq!(ids, vec!["shardA", "shardB", "shardC"]);
        assert_eq!((report.total(), report.online(), report.offline()), (3, 2, 1));
        assert!(matches!(
            report.outcomes[1].result,
            Err(ShardError::Store(StoreError::Unavailable(_)))
        ));
        assert_eq!(report.outcomes[2].result.as_ref().unwrap(), &vec!["hr".to_string()]);
    }

    #[tokio::test]
    async fn test_connections_reuse_primary_credentials() {
        let connector = Arc::new(
            MemoryConnector::new().with_store("a1:27018", Arc::new(MemoryStore::new())),
        );
        let primary = ConnectionConfig::parse("mongodb://root:pw@mongos:27017").unwrap();
        let executor =
            ShardExecutor::new(connector.clone(), Arc::new(primary), Duration::from_secs(3));

        executor
            .execute_one(&shard("shardA", "a1:27018"), |store| async move {
                store.ping().await
            })
            .await
            .unwrap();

        let connections = connector.connections();
        assert_eq!(connections.len(), 1);
        let target = &connections[0];
        assert_eq!(target.hosts(), &[backend::parse_address("a1:27018").unwrap()]);
        assert!(target.is_direct());
        assert_eq!(target.server_selection_timeout(), Some(Duration::from_secs(3)));

        let credential = target.credential().unwrap();
        assert_eq!(credential.username.as_deref(), Some("root"));
        assert_eq!(credential.password.as_deref(), Some("pw"));
        assert_eq!(credential.source.as_deref(), Some("admin"));
    }

    #[tokio::test]
    async fn test_stalled_shard_times_out_without_blocking_others() {
        let connector = MemoryConnector::new()
            .with_store("a1:27018", Arc::new(MemoryStore::new()))
            .with_stalled_host("b1:27018");

        let started = Instant::now();
        let report = executor(connector, Duration::from_millis(100))
            .execute(
                vec![shard("shardA", "a1:27018"), shard("shardB", "b1:27018")],
                |store| async move { store.ping().await },
            )
            .await;

        assert!(report.outcomes[0].is_online());
        assert!(matches!(
            report.outcomes[1].result,
            Err(ShardError::Timeout(t)) if t == Duration::from_millis(100)
        ));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_bad_host_spec_is_a_shard_error() {
        let report = executor(MemoryConnector::new(), Duration::from_secs(1))
            .execute(vec![shard("shardX", "rsX/")], |store| async move {
                store.ping().await
            })
            .await;

        assert_eq!(report.offline(), 1);
        assert!(matches!(
            report.outcomes[0].result,
            Err(ShardError::HostSpec { .. })
        ));
    }

    #[tokio::test]
    async fn test_shard_connections_are_closed() {
        let store = Arc::new(MemoryStore::new());
        let connector = MemoryConnector::new().with_store("a1:27018", store.clone());

        executor(connector, Duration::from_secs(1))
            .execute_one(&shard("shardA", "a1:27018"), |store| async move {
                store.list_database_names().await
            })
            .await
            .unwrap();

        assert!(store.is_closed());
    }

    #[tokio::test]
    async fn test_slow_query_outlives_connect_timeout() {
        let store = MemoryStore::new()
            .with_documents("sales", "orders", vec![doc! {"n": 1}])
            .with_query_delay(Duration::from_millis(800));
        let connector = MemoryConnector::new().with_store("a1:27018", Arc::new(store));

        let docs = executor(connector, Duration::from_millis(100))
            .execute_one(&shard("shardA", "a1:27018"), |store| async move {
                store.find("sales", "orders", FindSpec::default()).await
            })
            .await
            .unwrap();

        assert_eq!(docs, vec![doc! {"n": 1}]);
    }

    #[tokio::test]
    async fn test_unresponsive_shard_is_closed_after_timeout() {
        let store =
            Arc::new(MemoryStore::new().with_command_delay(Duration::from_secs(30)));
        let connector = MemoryConnector::new().with_store("a1:27018", store.clone());

        let result = executor(connector, Duration::from_millis(100))
            .execute_one(&shard("shardA", "a1:27018"), |store| async move {
                store.list_database_names().await
            })
            .await;

        assert!(matches!(result, Err(ShardError::Timeout(_))));
        assert!(store.is_closed());
    }

    #[tokio::test]
    async fn test_bad_host_spec_is_counted_and_logged() {
        let logs = LogBuffer::default();
        let subscriber = tracing_subscriber::fmt()
            .with_ansi(false)
            .with_writer(logs.clone())
            .finish();
        let _log_guard = tracing::subscriber::set_default(subscriber);
        let recorder = CapturingRecorder::new();
        let _metrics_guard = metrics::set_default_local_recorder(&recorder);

        let result = executor(MemoryConnector::new(), Duration::from_secs(1))
            .execute_one(&shard("shardX", "rsX/"), |store| async move {
                store.ping().await
            })
            .await;

        assert!(matches!(result, Err(ShardError::HostSpec { .. })));
        assert_eq!(
            recorder.registered(),
            vec![
                "shard.probe.duration{shard=shardX,outcome=error}",
                "shard.probe.failures{shard=shardX}",
            ]
        );
        let output = logs.contents();
        assert!(output.contains("Shard unreachable"), "{output}");
        assert!(output.contains("shardX"), "{output}");
    }

    #[derive(Clone, Default)]
    struct LogBuffer(Arc<Mutex<Vec<u8>>>);

    impl LogBuffer {
        fn contents(&self) -> String {
            String::from_utf8_lossy(&self.0.lock()).into_owned()
        }
    }

    impl std::io::Write for LogBuffer {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for LogBuffer {
        type Writer = LogBuffer;

        fn make_writer(&'a self) -> Self::Writer {
            self.clone()
        }
    }
}

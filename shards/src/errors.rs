use crate::host_spec::HostSpecError;
use backend::StoreError;
use std::time::Duration;

/// Why a single shard could not be reached or queried.
///
/// These never fail a fan-out request; they end up in that shard's entry.
#[derive(thiserror::Error, Debug)]
pub enum ShardError {
    #[error("invalid host specification '{host}': {source}")]
    HostSpec {
        host: String,
        #[source]
        source: HostSpecError,
    },

    #[error("timed out after {}ms", .0.as_millis())]
    Timeout(Duration),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("shard task failed: {0}")]
    Task(String),
}

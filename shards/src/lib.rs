//! Shard discovery and fan-out for sharded clusters.
//!
//! The [`directory`] reads the cluster's shard records through the routing
//! endpoint, [`host_spec`] turns each record's host string into addresses,
//! [`fanout`] talks to every shard directly, and [`merger`] folds the
//! per-shard name lists into one view.

pub mod directory;
pub mod errors;
pub mod fanout;
pub mod host_spec;
pub mod merger;
pub mod metrics_defs;

pub use directory::{ShardDirectory, ShardRecord, direct_target};
pub use errors::ShardError;
pub use fanout::{FanOutReport, ShardExecutor, ShardOutcome};
pub use host_spec::{HostSpec, HostSpecError};
pub use merger::{MergedName, NameUnion};

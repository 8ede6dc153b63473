//! Document database access for the bridge.
//!
//! Everything above this crate talks to the database through the
//! [`DocumentStore`] and [`Connector`] traits. The production implementation
//! wraps the `mongodb` driver; an in-memory implementation is available behind
//! the `testutils` feature.

pub mod connection;
pub mod errors;
pub mod extjson;
pub mod mongo;
pub mod store;

#[cfg(any(test, feature = "testutils"))]
pub mod memory;

pub use connection::{ConnectionConfig, ConnectionStringError, parse_address};
pub use errors::StoreError;
pub use store::{
    Connector, DatabaseInfo, DocumentStore, FindSpec, UpdateBody, UpdateOutcome, UpdateSpec,
};

pub use mongodb::bson;
pub use mongodb::options::ServerAddress;

use crate::connection::ConnectionStringError;
use thiserror::Error;

/// Errors raised while talking to a document store.
#[derive(Error, Debug)]
pub enum StoreError {
    /// The driver reported a network, query or server-side failure.
    #[error("{0}")]
    Driver(#[from] mongodb::error::Error),

    /// A payload could not be decoded from Extended JSON.
    #[error("invalid extended JSON: {0}")]
    Decode(String),

    #[error("invalid connection string: {0}")]
    ConnectionString(#[from] ConnectionStringError),

    /// The target host could not be reached.
    #[error("{0}")]
    Unavailable(String),

    /// The store rejected a command or operation.
    #[error("{0}")]
    Command(String),
}

impl StoreError {
    /// True when the failure was caused by the caller's input rather than the backend.
    pub fn is_client_error(&self) -> bool {
        matches!(self, StoreError::Decode(_))
    }
}

//! Connection settings for the routing endpoint and for individual shards.
//!
//! Connection strings are parsed once, by the driver, into a
//! [`ConnectionString`]. The client for a string is built from that same
//! value, so a string accepted at startup is never re-interpreted later.
//! Direct shard targets are derived from the primary by copying its
//! credential and TLS settings field by field.

use mongodb::options::{ConnectionString, Credential, HostInfo, ServerAddress};
use std::time::Duration;

/// Authentication database used for direct connections when the primary names none.
const DEFAULT_AUTH_SOURCE: &str = "admin";

#[derive(thiserror::Error, Debug)]
#[error("{0}")]
pub struct ConnectionStringError(#[from] mongodb::error::Error);

/// Parses a single `host[:port]` member address.
pub fn parse_address(address: &str) -> Result<ServerAddress, ConnectionStringError> {
    Ok(ServerAddress::parse(address.trim())?)
}

/// A parsed `mongodb://` or `mongodb+srv://` connection string.
#[derive(Clone, Debug, PartialEq)]
pub struct ConnectionConfig {
    inner: ConnectionString,
}

impl ConnectionConfig {
    pub fn parse(uri: &str) -> Result<Self, ConnectionStringError> {
        Ok(Self {
            inner: ConnectionString::parse(uri.trim())?,
        })
    }

    pub fn connection_string(&self) -> &ConnectionString {
        &self.inner
    }

    /// Seed hosts. Empty for `mongodb+srv://` strings, whose hosts come from DNS.
    pub fn hosts(&self) -> &[ServerAddress] {
        match &self.inner.host_info {
            HostInfo::HostIdentifiers(hosts) => hosts.as_slice(),
            _ => &[],
        }
    }

    pub fn credential(&self) -> Option<&Credential> {
        self.inner.credential.as_ref()
    }

    pub fn is_direct(&self) -> bool {
        self.inner.direct_connection == Some(true)
    }

    pub fn server_selection_timeout(&self) -> Option<Duration> {
        self.inner.server_selection_timeout
    }

    /// Settings for talking to `host` directly, bypassing the routing layer.
    ///
    /// The credential is copied unmodified, except that it authenticates
    /// against `admin` when the primary does not name an auth source. TLS
    /// settings and the application name carry over. Nothing else does.
    pub fn direct_to(&self, host: &ServerAddress, selection_timeout: Duration) -> ConnectionConfig {
        let mut target = ConnectionString::default();
        target.host_info = HostInfo::HostIdentifiers(vec![host.clone()]);
        target.direct_connection = Some(true);
        target.server_selection_timeout = Some(selection_timeout);
        target.credential = self.inner.credential.clone().map(|mut credential| {
            credential
                .source
                .get_or_insert_with(|| DEFAULT_AUTH_SOURCE.to_string());
            credential
        });
        target.tls = self.inner.tls.clone();
        target.app_name = self.inner.app_name.clone();

        ConnectionConfig { inner: target }
    }

    /// The connection string with the password masked, for logs.
    pub fn redacted(&self) -> String {
        let mut copy = self.inner.clone();
        if let Some(password) = copy
            .credential
            .as_mut()
            .and_then(|credential| credential.password.as_mut())
        {
            *password = "REDACTED".to_string();
        }
        copy.to_string()
    }
}

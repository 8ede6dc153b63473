//! Shard host specifications.
//!
//! A shard record's `host` field has the form
//! `[replicaSetName/]host1:port1[,host2:port2...]`.

use backend::{ConnectionStringError, ServerAddress, parse_address};
use std::fmt;

#[derive(thiserror::Error, Debug)]
pub enum HostSpecError {
    #[error("no hosts listed")]
    NoHosts,

    #[error(transparent)]
    Host(#[from] ConnectionStringError),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HostSpec {
    pub replica_set: Option<String>,
    /// Members in the order the cluster metadata lists them. Never empty.
    pub hosts: Vec<ServerAddress>,
}

impl HostSpec {
    pub fn parse(spec: &str) -> Result<Self, HostSpecError> {
        let (replica_set, members) = match spec.split_once('/') {
            Some((name, members)) => (Some(name.trim()).filter(|n| !n.is_empty()), members),
            None => (None, spec),
        };

        let hosts = members
            .split(',')
            .map(str::trim)
            .filter(|member| !member.is_empty())
            .map(parse_address)
            .collect::<Result<Vec<_>, _>>()?;

        if hosts.is_empty() {
            return Err(HostSpecError::NoHosts);
        }

        Ok(HostSpec {
            replica_set: replica_set.map(str::to_string),
            hosts,
        })
    }

    /// The member a direct connection is made to: always the first listed one.
    ///
    /// The first member is not necessarily the replica set primary, but any
    /// member answers the read-only listing and ping operations used here.
    pub fn primary_candidate(&self) -> &ServerAddress {
        &self.hosts[0]
    }
}

impl fmt::Display for HostSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(name) = &self.replica_set {
            write!(f, "{name}/")?;
        }
        for (i, host) in self.hosts.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{host}")?;
        }
        Ok(())
    }
}

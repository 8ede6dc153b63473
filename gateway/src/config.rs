use crate::tls::{self, TlsError};
use backend::{ConnectionConfig, ConnectionStringError};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

pub const MONGO_URI_ENV: &str = "MONGO_URI";
pub const API_KEY_ENV: &str = "API_KEY";

#[derive(Error, Debug)]
pub enum ValidationError {
    #[error("Port cannot be 0")]
    InvalidPort,

    #[error("mongo_uri is not set (configure it or export MONGO_URI)")]
    MissingMongoUri,

    #[error("Invalid mongo_uri: {0}")]
    InvalidMongoUri(#[from] ConnectionStringError),

    #[error("Timeout {0} cannot be 0")]
    ZeroTimeout(&'static str),

    #[error("api_key cannot be empty")]
    EmptyApiKey,

    #[error("Invalid tls settings: {0}")]
    Tls(#[from] TlsError),
}

/// Gateway configuration
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Config {
    /// Listener for the HTTP API
    #[serde(default)]
    pub listener: Listener,
    /// Optional listener serving `/health` and `/ready`
    pub admin_listener: Option<Listener>,
    /// Connection string of the cluster's routing endpoint
    #[serde(default)]
    pub mongo_uri: String,
    /// Shared secret expected in the `X-API-Key` header. Generated at startup when absent.
    pub api_key: Option<String>,
    #[serde(default)]
    pub timeouts: Timeouts,
    /// Serves the HTTP API over HTTPS when set
    pub tls: Option<TlsConfig>,
}

/// PEM files for the HTTPS listener
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct TlsConfig {
    /// Certificate chain, leaf first
    pub cert: PathBuf,
    pub key: PathBuf,
}

impl Config {
    /// Applies `MONGO_URI` and `API_KEY` overrides from `lookup`.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(uri) = lookup(MONGO_URI_ENV) {
            self.mongo_uri = uri;
        }
        if let Some(key) = lookup(API_KEY_ENV) {
            self.api_key = Some(key);
        }
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        self.listener.validate()?;
        if let Some(admin) = &self.admin_listener {
            admin.validate()?;
        }

        if self.mongo_uri.trim().is_empty() {
            return Err(ValidationError::MissingMongoUri);
        }
        ConnectionConfig::parse(&self.mongo_uri)?;

        if self.api_key.as_deref().is_some_and(|key| key.trim().is_empty()) {
            return Err(ValidationError::EmptyApiKey);
        }

        if let Some(tls) = &self.tls {
            tls::server_config(tls)?;
        }

        self.timeouts.validate()
    }
}

/// Network listener configuration
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Listener {
    pub host: String,
    pub port: u16,
}

impl Default for Listener {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 80,
        }
    }
}

impl Listener {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.port == 0 {
            return Err(ValidationError::InvalidPort);
        }
        Ok(())
    }
}

/// Per-shard timeouts, in milliseconds.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq)]
pub struct Timeouts {
    /// Budget for reaching each shard during cluster-wide fan-out.
    #[serde(default = "default_probe_timeout_ms")]
    pub probe_timeout_ms: u64,
    /// Budget for reaching a shard addressed directly. Operations themselves are not capped.
    #[serde(default = "default_direct_timeout_ms")]
    pub direct_timeout_ms: u64,
}

fn default_probe_timeout_ms() -> u64 {
    3000
}

fn default_direct_timeout_ms() -> u64 {
    5000
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            probe_timeout_ms: default_probe_timeout_ms(),
            direct_timeout_ms: default_direct_timeout_ms(),
        }
    }
}

impl Timeouts {
    pub fn probe(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    pub fn direct(&self) -> Duration {
        Duration::from_millis(self.direct_timeout_ms)
    }

    fn validate(&self) -> Result<(), ValidationError> {
        if self.probe_timeout_ms == 0 {
            return Err(ValidationError::ZeroTimeout("probe_timeout_ms"));
        }
        if self.direct_timeout_ms == 0 {
            return Err(ValidationError::ZeroTimeout("direct_timeout_ms"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(yaml: &str) -> Config {
        serde_yaml::from_str(yaml).unwrap()
    }

    #[test]
    fn test_parse_full_config() {
        let config = parse(
            r#"
listener:
    host: "127.0.0.1"
    port: 8080
admin_listener:
    host: "127.0.0.1"
    port: 8081
mongo_uri: "mongodb://ops:pw@mongos:27017"
api_key: "s3cret"
timeouts:
    probe_timeout_ms: 1500
"#,
        );

        assert_eq!(config.listener.port, 8080);
        assert_eq!(config.admin_listener.unwrap().port, 8081);
        assert_eq!(config.api_key.as_deref(), Some("s3cret"));
        assert_eq!(config.timeouts.probe(), Duration::from_millis(1500));
        assert_eq!(config.timeouts.direct(), Duration::from_secs(5));
    }

    #[test]
    fn test_defaults() {
        let config = parse("mongo_uri: mongodb://localhost");
        assert_eq!(config.listener, Listener::default());
        assert_eq!(config.listener.port, 80);
        assert!(config.admin_listener.is_none());
        assert!(config.api_key.is_none());
        assert_eq!(config.timeouts, Timeouts::default());
        config.validate().unwrap();
    }

    #[test]
    fn test_env_overrides() {
        let mut config = parse("mongo_uri: mongodb://from-file");
        config.apply_env(|name| match name {
            MONGO_URI_ENV => Some("mongodb://from-env:27017".to_string()),
            API_KEY_ENV => Some("env-key".to_string()),
            _ => None,
        });
        assert_eq!(config.mongo_uri, "mongodb://from-env:27017");
        assert_eq!(config.api_key.as_deref(), Some("env-key"));

        let mut untouched = parse("mongo_uri: mongodb://from-file");
        untouched.apply_env(|_| None);
        assert_eq!(untouched.mongo_uri, "mongodb://from-file");
    }

    #[test]
    fn test_validation_errors() {
        let invalid_port = parse("{listener: {host: 0.0.0.0, port: 0}, mongo_uri: 'mongodb://h'}");
        assert!(matches!(
            invalid_port.validate(),
            Err(ValidationError::InvalidPort)
        ));

        let missing_uri = parse("api_key: k");
        assert!(matches!(
            missing_uri.validate(),
            Err(ValidationError::MissingMongoUri)
        ));

        let bad_uri = parse("mongo_uri: http://nope");
        assert!(matches!(
            bad_uri.validate(),
            Err(ValidationError::InvalidMongoUri(_))
        ));

        let empty_key = parse("{mongo_uri: 'mongodb://h', api_key: ''}");
        assert!(matches!(
            empty_key.validate(),
            Err(ValidationError::EmptyApiKey)
        ));

        let zero_timeout = parse("{mongo_uri: 'mongodb://h', timeouts: {direct_timeout_ms: 0}}");
        assert!(matches!(
            zero_timeout.validate(),
            Err(ValidationError::ZeroTimeout("direct_timeout_ms"))
        ));
    }

    #[test]
    fn test_uri_is_checked_by_driver_rules() {
        for uri in [
            "mongodb://mongos:notaport",
            "mongodb+srv://cluster.example.net:27017",
            "mongodb+srv://cluster.example.net/?directConnection=true",
        ] {
            let config = Config {
                mongo_uri: uri.to_string(),
                ..parse("mongo_uri: mongodb://placeholder")
            };
            assert!(
                matches!(config.validate(), Err(ValidationError::InvalidMongoUri(_))),
                "{uri}"
            );
        }
    }

    #[test]
    fn test_tls_settings() {
        let fixtures = concat!(env!("CARGO_MANIFEST_DIR"), "/tests/fixtures");
        let config = parse(&format!(
            "{{mongo_uri: 'mongodb://h', tls: {{cert: '{fixtures}/localhost.crt', key: '{fixtures}/localhost.key'}}}}"
        ));
        assert_eq!(
            config.tls.as_ref().unwrap().cert,
            PathBuf::from(fixtures).join("localhost.crt")
        );
        config.validate().unwrap();

        let missing_key = parse(&format!(
            "{{mongo_uri: 'mongodb://h', tls: {{cert: '{fixtures}/localhost.crt', key: '{fixtures}/nope.key'}}}}"
        ));
        assert!(matches!(
            missing_key.validate(),
            Err(ValidationError::Tls(TlsError::PrivateKey { .. }))
        ));
    }
}

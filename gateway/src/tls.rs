//! HTTPS for the API listener.
//!
//! Handshakes run on their own tasks so a slow client cannot hold up the
//! accept loop. Finished connections are handed to `axum::serve` through
//! [`TlsListener`].

use crate::config::TlsConfig;
use std::io;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_rustls::TlsAcceptor;
use tokio_rustls::rustls::{self, ServerConfig};
use tokio_rustls::rustls::pki_types::pem::{self, PemObject};
use tokio_rustls::rustls::pki_types::{CertificateDer, PrivateKeyDer};
use tokio_rustls::server::TlsStream;

const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);
const ACCEPT_RETRY_DELAY: Duration = Duration::from_secs(1);
const PENDING_CONNECTIONS: usize = 128;

#[derive(thiserror::Error, Debug)]
pub enum TlsError {
    #[error("could not read certificates from {}: {source}", .path.display())]
    Certificates {
        path: PathBuf,
        #[source]
        source: pem::Error,
    },

    #[error("no certificates found in {}", .0.display())]
    NoCertificates(PathBuf),

    #[error("could not read private key from {}: {source}", .path.display())]
    PrivateKey {
        path: PathBuf,
        #[source]
        source: pem::Error,
    },

    #[error("rustls error: {0}")]
    Rustls(#[from] rustls::Error),
}

/// Loads the certificate chain and key named by `tls`.
pub fn server_config(tls: &TlsConfig) -> Result<ServerConfig, TlsError> {
    let certs = CertificateDer::pem_file_iter(&tls.cert)
        .and_then(|certs| certs.collect::<Result<Vec<_>, _>>())
        .map_err(|source| TlsError::Certificates {
            path: tls.cert.clone(),
            source,
        })?;
    if certs.is_empty() {
        return Err(TlsError::NoCertificates(tls.cert.clone()));
    }

    let key = PrivateKeyDer::from_pem_file(&tls.key).map_err(|source| TlsError::PrivateKey {
        path: tls.key.clone(),
        source,
    })?;

    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let mut config = ServerConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()?
        .with_no_client_auth()
        .with_single_cert(certs, key)?;
    config.alpn_protocols = vec![b"http/1.1".to_vec()];

    Ok(config)
}

/// A listener yielding connections that completed a TLS handshake.
pub struct TlsListener {
    incoming: mpsc::Receiver<(TlsStream<TcpStream>, SocketAddr)>,
    local_addr: SocketAddr,
    accept_task: JoinHandle<()>,
}

impl TlsListener {
    pub fn new(tcp: TcpListener, config: ServerConfig) -> io::Result<Self> {
        let local_addr = tcp.local_addr()?;
        let (sender, incoming) = mpsc::channel(PENDING_CONNECTIONS);
        let acceptor = TlsAcceptor::from(Arc::new(config));
        let accept_task = tokio::spawn(accept_loop(tcp, acceptor, sender));

        Ok(Self {
            incoming,
            local_addr,
            accept_task,
        })
    }
}

impl Drop for TlsListener {
    fn drop(&mut self) {
        self.accept_task.abort();
    }
}

impl axum::serve::Listener for TlsListener {
    type Io = TlsStream<TcpStream>;
    type Addr = SocketAddr;

    async fn accept(&mut self) -> (Self::Io, Self::Addr) {
        match self.incoming.recv().await {
            Some(connection) => connection,
            // The accept loop only stops once this listener is dropped.
            None => std::future::pending().await,
        }
    }

    fn local_addr(&self) -> io::Result<Self::Addr> {
        Ok(self.local_addr)
    }
}

async fn accept_loop(
    tcp: TcpListener,
    acceptor: TlsAcceptor,
    sender: mpsc::Sender<(TlsStream<TcpStream>, SocketAddr)>,
) {
    while !sender.is_closed() {
        let (stream, peer) = match tcp.accept().await {
            Ok(connection) => connection,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to accept connection");
                tokio::time::sleep(ACCEPT_RETRY_DELAY).await;
                continue;
            }
        };
        let _ = stream.set_nodelay(true);

        let acceptor = acceptor.clone();
        let sender = sender.clone();
        tokio::spawn(async move {
            match tokio::time::timeout(HANDSHAKE_TIMEOUT, acceptor.accept(stream)).await {
                Ok(Ok(tls_stream)) => {
                    let _ = sender.send((tls_stream, peer)).await;
                }
                Ok(Err(e)) => tracing::debug!(peer = %peer, error = %e, "TLS handshake failed"),
                Err(_) => tracing::debug!(peer = %peer, "TLS handshake timed out"),
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::Router;
    use axum::routing::get;
    use std::path::Path;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio_rustls::TlsConnector;
    use tokio_rustls::rustls::pki_types::ServerName;
    use tokio_rustls::rustls::{ClientConfig, RootCertStore};

    fn fixture(name: &str) -> PathBuf {
        Path::new(env!("CARGO_MANIFEST_DIR"))
            .join("tests/fixtures")
            .join(name)
    }

    fn localhost_tls() -> TlsConfig {
        TlsConfig {
            cert: fixture("localhost.crt"),
            key: fixture("localhost.key"),
        }
    }

    fn client_config() -> ClientConfig {
        let mut roots = RootCertStore::empty();
        for cert in CertificateDer::pem_file_iter(fixture("localhost.crt")).unwrap() {
            roots.add(cert.unwrap()).unwrap();
        }
        ClientConfig::builder_with_provider(Arc::new(rustls::crypto::ring::default_provider()))
            .with_safe_default_protocol_versions()
            .unwrap()
            .with_root_certificates(roots)
            .with_no_client_auth()
    }

    #[test]
    fn test_server_config_loads_fixture() {
        let config = server_config(&localhost_tls()).unwrap();
        assert_eq!(config.alpn_protocols, vec![b"http/1.1".to_vec()]);
    }

    #[test]
    fn test_server_config_errors() {
        let missing = TlsConfig {
            cert: fixture("missing.crt"),
            key: fixture("localhost.key"),
        };
        assert!(matches!(
            server_config(&missing),
            Err(TlsError::Certificates { .. })
        ));

        let key_as_cert = TlsConfig {
            cert: fixture("localhost.key"),
            key: fixture("localhost.key"),
        };
        assert!(matches!(
            server_config(&key_as_cert),
            Err(TlsError::NoCertificates(_))
        ));

        let cert_as_key = TlsConfig {
            cert: fixture("localhost.crt"),
            key: fixture("localhost.crt"),
        };
        assert!(matches!(
            server_config(&cert_as_key),
            Err(TlsError::PrivateKey { .. })
        ));
    }

    #[tokio::test]
    async fn test_serves_https() {
        let tcp = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let listener = TlsListener::new(tcp, server_config(&localhost_tls()).unwrap()).unwrap();
        let addr = axum::serve::Listener::local_addr(&listener).unwrap();

        let app = Router::new().route("/ping", get(|| async { "pong" }));
        tokio::spawn(async move { axum::serve(listener, app).await });

        // A plain-text client is dropped during the handshake without affecting others.
        let mut plain = TcpStream::connect(addr).await.unwrap();
        plain
            .write_all(b"GET /ping HTTP/1.1\r\nHost: localhost\r\n\r\n")
            .await
            .unwrap();

        let connector = TlsConnector::from(Arc::new(client_config()));
        let stream = TcpStream::connect(addr).await.unwrap();
        let server_name = ServerName::try_from("localhost").unwrap();
        let mut tls_stream = connector.connect(server_name, stream).await.unwrap();

        tls_stream
            .write_all(b"GET /ping HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
            .await
            .unwrap();
        let mut response = Vec::new();
        let mut buf = [0u8; 1024];
        while !response.ends_with(b"pong") {
            match tls_stream.read(&mut buf).await {
                Ok(0) | Err(_) => break,
                Ok(n) => response.extend_from_slice(&buf[..n]),
            }
        }
        let response = String::from_utf8_lossy(&response);

        assert!(response.starts_with("HTTP/1.1 200 OK"), "{response}");
        assert!(response.ends_with("pong"), "{response}");
    }
}

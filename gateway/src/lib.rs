pub mod api;
pub mod auth;
pub mod config;
pub mod errors;
pub mod metrics_defs;
pub mod state;
pub mod tls;
pub mod translator;

pub use errors::GatewayError;

use auth::ApiKey;
use backend::ConnectionConfig;
use backend::mongo::MongoConnector;
use shared::admin_service::AdminService;
use shared::http::run_http_service;
use state::AppState;
use std::io::Write;
use std::sync::Arc;
use tls::TlsListener;
use tokio::net::TcpListener;

/// Serves the gateway until either listener fails or the process is asked to stop.
pub async fn run(config: config::Config) -> Result<(), GatewayError> {
    let primary = ConnectionConfig::parse(&config.mongo_uri)?;
    tracing::info!(uri = %primary.redacted(), "Using database");

    let api_key = resolve_api_key(config.api_key.as_deref(), std::io::stderr());

    let state = AppState::new(Arc::new(MongoConnector), primary, api_key, config.timeouts);
    let app = api::router(state.clone());

    let tls_config = config.tls.as_ref().map(tls::server_config).transpose()?;
    let listener =
        TcpListener::bind(format!("{}:{}", config.listener.host, config.listener.port)).await?;
    tracing::info!(
        host = %config.listener.host,
        port = config.listener.port,
        tls = tls_config.is_some(),
        "Listening"
    );
    let api_task = async {
        let served = match tls_config {
            Some(tls_config) => {
                let listener = TlsListener::new(listener, tls_config)?;
                axum::serve(listener, app)
                    .with_graceful_shutdown(shutdown_signal())
                    .await
            }
            None => {
                axum::serve(listener, app)
                    .with_graceful_shutdown(shutdown_signal())
                    .await
            }
        };
        served.map_err(GatewayError::from)
    };

    let result = match &config.admin_listener {
        Some(admin) => {
            let admin_service = AdminService::<GatewayError>::new(Arc::new(state.clone()));
            let admin_task = run_http_service(&admin.host, admin.port, admin_service);
            tokio::select! {
                result = api_task => result,
                result = admin_task => result,
            }
        }
        None => api_task.await,
    };

    state.close().await;
    result
}

/// The configured API key, or a fresh one for this run.
///
/// A generated secret is written to `console` once and never logged, so it
/// stays out of log aggregation and error reporting.
fn resolve_api_key(configured: Option<&str>, mut console: impl Write) -> ApiKey {
    if let Some(secret) = configured {
        return ApiKey::new(secret);
    }

    let secret = auth::generate_secret();
    tracing::warn!("No API key configured, generated one for this run");
    let _ = writeln!(console, "Generated API key for this run: {secret}");
    ApiKey::new(&secret)
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutting down");
}

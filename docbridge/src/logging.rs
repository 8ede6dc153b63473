use tracing_subscriber::EnvFilter;
use tracing_subscriber::prelude::*;

const DEFAULT_FILTER: &str = "info";

/// Installs the global subscriber: `RUST_LOG` filtering, human-readable
/// output and, when a DSN is given, error reporting to Sentry.
///
/// The returned guard flushes pending Sentry events when dropped and must be
/// kept alive for the lifetime of the process.
pub fn init(sentry_dsn: Option<&str>) -> Option<sentry::ClientInitGuard> {
    let guard = sentry_dsn.map(|dsn| {
        sentry::init((
            dsn,
            sentry::ClientOptions {
                release: sentry::release_name!(),
                ..Default::default()
            },
        ))
    });

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .with(guard.as_ref().map(|_| sentry::integrations::tracing::layer()))
        .init();

    guard
}

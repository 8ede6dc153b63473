use clap::{Args, Parser};
use config::{Config, ConfigError};
use gateway::GatewayError;
use gateway::config::TlsConfig;
use std::path::PathBuf;
use std::process::ExitCode;

mod config;
mod logging;
mod statsd;

#[derive(Parser)]
#[command(name = "docbridge", version, about = "HTTP gateway for a sharded MongoDB cluster")]
enum CliCommand {
    /// Serve the HTTP API
    Run(RunArgs),
    /// Validate a config file and exit
    CheckConfig(ConfigArgs),
}

#[derive(Args)]
struct ConfigArgs {
    #[arg(long, short)]
    config: PathBuf,
}

#[derive(Args)]
struct RunArgs {
    #[command(flatten)]
    config: ConfigArgs,
    /// Overrides `gateway.listener.host`
    #[arg(long)]
    host: Option<String>,
    /// Overrides `gateway.listener.port`
    #[arg(long)]
    port: Option<u16>,
    /// Serve HTTPS with this PEM certificate chain. Overrides `gateway.tls.cert`
    #[arg(long, requires = "tls_key")]
    tls_cert: Option<PathBuf>,
    /// PEM private key for `--tls-cert`. Overrides `gateway.tls.key`
    #[arg(long, requires = "tls_cert")]
    tls_key: Option<PathBuf>,
}

#[derive(thiserror::Error, Debug)]
enum BridgeError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Metrics(#[from] statsd::MetricsError),
    #[error("could not start runtime: {0}")]
    Runtime(#[from] std::io::Error),
    #[error(transparent)]
    Gateway(#[from] GatewayError),
}

fn main() -> ExitCode {
    let cli = CliCommand::parse();

    let result = match cli {
        CliCommand::Run(args) => run(args),
        CliCommand::CheckConfig(args) => check_config(args),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn env_lookup(key: &str) -> Option<String> {
    std::env::var(key).ok()
}

fn load_config(args: &RunArgs) -> Result<Config, ConfigError> {
    let mut config = Config::load(&args.config.config, env_lookup)?;
    if let Some(host) = &args.host {
        config.gateway.listener.host = host.clone();
    }
    if let Some(port) = args.port {
        config.gateway.listener.port = port;
    }
    if let (Some(cert), Some(key)) = (&args.tls_cert, &args.tls_key) {
        config.gateway.tls = Some(TlsConfig {
            cert: cert.clone(),
            key: key.clone(),
        });
    }
    config.validate()?;
    Ok(config)
}

fn run(args: RunArgs) -> Result<(), BridgeError> {
    let config = load_config(&args)?;

    let _sentry = logging::init(config.sentry_dsn());
    statsd::init(config.common.metrics.as_ref())?;
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "Starting docbridge");

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    rt.block_on(gateway::run(config.gateway))?;

    tracing::info!("Stopped");
    Ok(())
}

fn check_config(args: ConfigArgs) -> Result<(), BridgeError> {
    let config = Config::load(&args.config, env_lookup)?;
    config.validate()?;
    println!("{}: OK", args.config.display());
    Ok(())
}

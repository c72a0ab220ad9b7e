//! esign-agent local HTTP API
//!
//! Serves the signing endpoints browser front ends call on the user's
//! machine. Binds to loopback by default.

use clap::Parser;
use esign_agent::adapters::server::routes;
use esign_agent::{ConfigManager, SigningOrchestrator};
use miette::{Context, IntoDiagnostic, Result};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "esign-agent-server")]
#[command(about = "Local HTTP signing API for PKCS#11 smart cards")]
#[command(version)]
struct Cli {
    /// Address to bind to (overrides server.bind_address)
    #[arg(short, long)]
    bind: Option<String>,

    /// Configuration file (defaults to the user config directory)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level)).init();

    let manager = match &cli.config {
        Some(path) => ConfigManager::with_path(path),
        None => ConfigManager::new().into_diagnostic()?,
    };
    let config = manager
        .load_or_create_default()
        .into_diagnostic()
        .wrap_err("failed to load configuration")?;

    let bind = cli.bind.unwrap_or_else(|| config.server.bind_address.clone());
    let addr: SocketAddr = bind
        .parse()
        .into_diagnostic()
        .wrap_err_with(|| format!("invalid bind address {bind}"))?;
    let allowed_origins = config.server.allowed_origins.clone();

    let orchestrator = SigningOrchestrator::from_config(config)
        .into_diagnostic()
        .wrap_err("failed to initialise the PKCS#11 token driver")?;
    let routes = routes(Arc::new(orchestrator), &allowed_origins);

    log::info!("esign-agent listening on http://{addr}");
    log::info!(
        "Endpoints: GET /health, GET /devices, GET /get-subject, POST /sign-xml, \
         POST /sign-pdf, POST /trust-setup, POST /validate-pdf"
    );
    if !addr.ip().is_loopback() {
        log::warn!("Bound to a non-loopback address; the API has no authentication");
    }

    let (_, server) = warp::serve(routes)
        .try_bind_with_graceful_shutdown(addr, async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                log::error!("Failed to listen for shutdown signal: {e}");
            }
            log::info!("Shutting down");
        })
        .into_diagnostic()
        .wrap_err_with(|| format!("failed to bind {addr}"))?;
    server.await;
    Ok(())
}

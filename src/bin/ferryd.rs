//! ferryd: the Ferry daemon.
//!
//! Serves a storage directory over gRPC with TLS and bearer-token auth.

use std::net::SocketAddr;

use clap::Parser;
use tracing::{info, warn};

use ferry::server::config::{Config, Secrets};
use ferry::server::transport::load_identity;
use ferry::server::{ServerOptions, serve};
use ferry::{Credential, LocalStore, TransferEngine, TransferError};

/// Ferry daemon: authenticated file transfer service.
#[derive(Parser)]
#[command(name = "ferryd")]
#[command(version = ferry::PKG_VERSION)]
#[command(about = "Ferry file transfer daemon")]
struct Args {
    /// Path to configuration file.
    #[arg(short, long)]
    config: Option<std::path::PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialise tracing (default: info for the daemon; override with RUST_LOG).
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    // Load configuration
    let config = Config::load(args.config.as_deref())?;
    let token = Secrets::load()?.token()?;

    // Parse address
    let addr: SocketAddr = config
        .server
        .address
        .parse()
        .map_err(|e| TransferError::Configuration(format!("Invalid address: {e}")))?;

    let engine = TransferEngine::with_policy(
        LocalStore::new(&config.storage.root),
        config.transfer.policy()?,
    );

    let mut options = ServerOptions::new(Credential::new(token))
        .call_timeout(config.server.limits.call_timeout())
        .concurrency_limit(config.server.limits.max_concurrent_calls);
    if let Some(tls) = &config.tls {
        options = options.identity(load_identity(&tls.cert, &tls.key)?);
    }

    info!(
        version = ferry::version_string(),
        %addr,
        storage = %config.storage.root.display(),
        "ferryd starting"
    );

    serve(addr, engine, options, shutdown_signal()).await?;

    Ok(())
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("shutdown requested"),
        Err(e) => {
            // Without a signal handler, run until killed.
            warn!(error = %e, "cannot listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    }
}

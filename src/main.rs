use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;
use tokio::signal;
use tracing::info;
use tracing_subscriber::EnvFilter;

use turnstile::config::TurnstileConfig;
use turnstile::grpc::GrpcServer;
use turnstile::pipeline::Pipeline;

/// Request governance service: rate limits, sessions, CSRF and cache invalidation.
#[derive(Debug, Parser)]
#[command(name = "turnstile", version, about)]
struct Cli {
    /// YAML configuration file; TURNSTILE_* environment variables override it
    #[arg(short, long, env = "TURNSTILE_CONFIG")]
    config: Option<PathBuf>,

    /// Override the gRPC listen address
    #[arg(long)]
    grpc_addr: Option<SocketAddr>,

    /// Emit logs as JSON
    #[arg(long, env = "TURNSTILE_LOG_JSON")]
    log_json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if cli.log_json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_thread_ids(true)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_thread_ids(true)
            .init();
    }

    info!("Starting Turnstile Request Governance Service");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let mut config = TurnstileConfig::load(cli.config.as_deref())?;
    if let Some(addr) = cli.grpc_addr {
        config.server.grpc_addr = addr;
    }
    info!(grpc_addr = %config.server.grpc_addr, "Configuration loaded");

    let pipeline = Pipeline::start(&config).await?;

    let grpc_server = GrpcServer::new(config.server.grpc_addr, pipeline.clone());

    // Run the server with graceful shutdown on Ctrl+C
    grpc_server.serve_with_shutdown(shutdown_signal()).await?;

    pipeline.shutdown().await;

    info!("Turnstile Request Governance Service stopped");
    Ok(())
}

/// Wait for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown");
        }
    }
}

//! Browser Task Engine — server entry point.
//!
//! Parses CLI arguments, loads configuration from the environment,
//! initializes telemetry, and serves the Request Surface until the
//! process receives a shutdown signal.

mod config;
mod dispatcher;
mod engine;
mod errors;
mod limits;
mod link;
mod llm;
mod observer;
mod planner;
mod prompt;
mod protocol;
mod registry;
mod retry;
mod server;
mod telemetry;
mod validation;

use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing::{error, info};

use config::AppConfig;
use link::ActionLink;
use registry::TaskRegistry;
use server::AppState;
use telemetry::{init_telemetry, shutdown_telemetry, TelemetryConfig};

#[derive(Parser)]
#[command(name = "runner")]
#[command(about = "Browser Task Engine — drives a browser through an LLM planner/verifier loop", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Starts the HTTP + WebSocket server.
    Serve {
        /// Overrides the `PORT` environment variable.
        #[arg(long)]
        port: Option<u16>,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let telemetry_config = TelemetryConfig::from_env();
    if let Err(e) = init_telemetry(telemetry_config) {
        eprintln!("warning: failed to initialize telemetry: {e}");
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .try_init();
    }

    match &cli.command {
        Commands::Serve { port } => {
            if let Some(port) = port {
                std::env::set_var("PORT", port.to_string());
            }

            match run_server().await {
                Ok(()) => {}
                Err(e) => {
                    error!(error = %e, "server exited with an error");
                    shutdown_telemetry();
                    std::process::exit(1);
                }
            }
        }
    }

    shutdown_telemetry();
}

/// How long shutdown waits for in-flight tasks to reach a terminal
/// state after they're cancelled, before exiting anyway.
const SHUTDOWN_DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

async fn run_server() -> anyhow::Result<()> {
    let config = AppConfig::from_env()?;
    info!(%config, "starting browser task engine");

    let link = ActionLink::new(Arc::new(config.limits.clone()));
    let registry = TaskRegistry::new(link.clone(), config.clone());
    let registry_for_shutdown = registry.clone();
    let state = AppState { registry, link };
    let router = server::build_router(state);

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", config.port)).await?;
    info!(port = config.port, "listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    let cancelled = registry_for_shutdown.cancel_all().await;
    info!(cancelled, "cancelling in-flight tasks before exit");
    registry_for_shutdown.wait_for_drain(SHUTDOWN_DRAIN_TIMEOUT).await;

    info!("server shut down cleanly");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    info!("shutdown signal received, draining in-flight tasks");
}

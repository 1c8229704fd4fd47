//! vigil-daemon - proctored assessment HTTP daemon
//!
//! Loads `vigil.toml` (defaults when the file is absent), builds the event
//! store and question pipeline, and serves the HTTP API until SIGINT or
//! SIGTERM.

use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal::unix::{SignalKind, signal};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use vigil_core::VigilConfig;
use vigil_daemon::{AppState, router};

/// vigil daemon - proctor event ingestion and question generation
#[derive(Parser, Debug)]
#[command(name = "vigil-daemon")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "vigil.toml")]
    config: PathBuf,

    /// Address to listen on (overrides `server.listen`)
    #[arg(long)]
    listen: Option<SocketAddr>,

    /// Log level (trace, debug, info, warn, error) or a full filter directive
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Log to file instead of stdout
    #[arg(long)]
    log_file: Option<PathBuf>,

    /// Print the effective configuration as TOML and exit
    #[arg(long)]
    print_config: bool,
}

fn init_logging(args: &Args) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&args.log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    if let Some(log_file) = &args.log_file {
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(log_file)
            .with_context(|| format!("failed to open log file {}", log_file.display()))?;
        tracing_subscriber::registry()
            .with(filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .with_writer(file)
                    .with_ansi(false),
            )
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
    Ok(())
}

fn load_config(args: &Args) -> Result<VigilConfig> {
    let mut config = if args.config.exists() {
        VigilConfig::from_file(&args.config)
            .with_context(|| format!("failed to load {}", args.config.display()))?
    } else {
        VigilConfig::default()
    };
    if let Some(listen) = args.listen {
        config.server.listen = listen;
    }
    Ok(config)
}

async fn shutdown_signal() {
    let terminate = async {
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            },
            Err(e) => {
                warn!(error = %e, "failed to register SIGTERM handler");
                std::future::pending::<()>().await;
            },
        }
    };
    let interrupt = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to register SIGINT handler");
            std::future::pending::<()>().await;
        }
    };

    tokio::select! {
        () = terminate => info!("Received SIGTERM"),
        () = interrupt => info!("Received SIGINT"),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = load_config(&args)?;
    if args.print_config {
        print!("{}", config.to_toml().context("failed to render configuration")?);
        return Ok(());
    }
    init_logging(&args)?;

    if !args.config.exists() {
        info!(path = %args.config.display(), "configuration file not found; using defaults");
    }
    let listen = config.server.listen;
    if config.generation.endpoint.is_none() {
        info!("no generation endpoint configured; questions come from the fallback bank");
    }
    let state = AppState::from_config(config).context("failed to initialise daemon state")?;

    let listener = tokio::net::TcpListener::bind(listen)
        .await
        .with_context(|| format!("failed to bind {listen}"))?;
    info!(addr = %listen, "vigil-daemon listening");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    info!("vigil-daemon shutdown complete");
    Ok(())
}

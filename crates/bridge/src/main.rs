//! xterm-bridge
//!
//! Headless service attaching container shells to a remote terminal relay.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use bridge::config::Config;
use bridge::host::{self, ROUTE_TABLE_PATH};
use bridge::server::{self, AppState};
use bridge::{PtySpawner, SessionRegistry, WebSocketDialer};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

/// How long shutdown waits for running sessions to tear down.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

/// xterm-bridge - attaches container shells to a remote terminal relay.
#[derive(Parser, Debug)]
#[command(name = "xterm-bridge")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Subcommand to execute (defaults to `serve`)
    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Available commands.
#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Commands {
    /// Listen for session requests
    Serve {
        /// Port to listen on (overrides the config file)
        #[arg(long, short)]
        port: Option<u16>,

        /// Relay host (overrides the config file and host discovery)
        #[arg(long)]
        relay_host: Option<String>,
    },

    /// Print the effective configuration as TOML
    PrintConfig,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(config_path) => Config::load(config_path)?,
        None => Config::load_default()?,
    };
    config.apply_env_overrides();

    let command = cli.command.clone().unwrap_or(Commands::Serve {
        port: None,
        relay_host: None,
    });
    if let Commands::Serve { port, relay_host } = &command {
        if let Some(port) = port {
            config.server.port = *port;
        }
        if let Some(host) = relay_host {
            config.relay.host = host.clone();
        }
    }

    // Initialize tracing
    let level = if cli.verbose {
        "debug".to_string()
    } else {
        config.server.log_level.to_lowercase()
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    if let Some(config_path) = &cli.config {
        tracing::info!("Using config file: {:?}", config_path);
    }

    config.validate()?;

    match command {
        Commands::Serve { .. } => run(config).await,
        Commands::PrintConfig => {
            print!("{}", config.to_toml()?);
            Ok(())
        }
    }
}

/// Run the service until SIGINT or SIGTERM.
async fn run(config: Config) -> anyhow::Result<()> {
    let relay_host = if config.relay.host.is_empty() {
        let gateway = host::default_gateway(ROUTE_TABLE_PATH)
            .context("Failed to discover the container host address")?;
        tracing::info!(host = %gateway, "Discovered relay host from default route");
        gateway.to_string()
    } else {
        config.relay.host.clone()
    };

    let relay = config.relay_endpoint(&relay_host);
    let shell = config.shell_config();
    let shutdown = CancellationToken::new();
    let registry = Arc::new(SessionRegistry::new());

    let state = AppState {
        registry: Arc::clone(&registry),
        spawner: Arc::new(PtySpawner::new(shell)),
        dialer: Arc::new(WebSocketDialer),
        relay: Arc::new(relay),
        settings: config.session_settings(),
        shutdown: shutdown.clone(),
    };

    let addr: SocketAddr = format!("{}:{}", config.server.listen_addr, config.server.port)
        .parse()
        .with_context(|| format!("Invalid listen address: {}", config.server.listen_addr))?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    tracing::info!(
        addr = %addr,
        relay = %format!("{}://{}:{}", config.relay.scheme, relay_host, config.relay.port),
        shell = %config.session.shell,
        "xterm-bridge listening"
    );

    let server = tokio::spawn(server::serve(listener, state));

    wait_for_shutdown_signal().await?;
    tracing::info!(active = registry.count(), "Shutting down");
    shutdown.cancel();

    if !registry.wait_idle(DRAIN_TIMEOUT).await {
        tracing::warn!(
            remaining = registry.count(),
            "Sessions did not terminate within {:?}",
            DRAIN_TIMEOUT
        );
    }

    server.await.context("Server task panicked")??;
    tracing::info!("xterm-bridge stopped");
    Ok(())
}

/// Wait for a shutdown signal (SIGTERM or SIGINT).
async fn wait_for_shutdown_signal() -> anyhow::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm =
        signal(SignalKind::terminate()).context("Failed to register SIGTERM handler")?;
    let mut sigint =
        signal(SignalKind::interrupt()).context("Failed to register SIGINT handler")?;

    tokio::select! {
        _ = sigterm.recv() => {
            tracing::info!("Received SIGTERM");
        }
        _ = sigint.recv() => {
            tracing::info!("Received SIGINT");
        }
    }
    Ok(())
}

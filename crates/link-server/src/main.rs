//! link-server entry point.
//!
//! Loads the device catalog, binds the command socket and runs the reactor
//! until SIGINT or SIGTERM.
//!
//! # Usage
//!
//! ```text
//! link-server [OPTIONS]
//!
//! Options:
//!   --config <PATH>       Configuration file [default: /etc/link-server.toml]
//!   --poll-time <SECS>    Seconds between status broadcasts (overrides the file)
//!   --debug               Log at debug level
//!   --log-level <LEVEL>   Log level (overrides the file)
//! ```
//!
//! `RUST_LOG`, when set, takes precedence over both `--log-level` and the
//! configuration file.
//!
//! # Architecture
//!
//! ```text
//! main()
//!  └─ load_config()          -- TOML file, defaults if missing
//!  └─ UdpTransport::bind()   -- one socket for commands, replies, broadcasts
//!  └─ Broker::new()          -- registry + state machine + sweeper
//!  └─ Reactor::run()         -- until the shutdown watch flips
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use link_server::application::Broker;
use link_server::infrastructure::activator::ShellActivator;
use link_server::infrastructure::network::reactor::Reactor;
use link_server::infrastructure::network::transport::UdpTransport;
use link_server::infrastructure::storage::config::{load_config, DEFAULT_CONFIG_PATH};

// ── CLI argument definitions ──────────────────────────────────────────────────

/// Shares named physical links between transient UDP clients.
#[derive(Debug, Parser)]
#[command(name = "link-server", version)]
struct Cli {
    /// Path of the TOML configuration file.
    #[arg(long, default_value = DEFAULT_CONFIG_PATH, env = "LINK_SERVER_CONFIG")]
    config: PathBuf,

    /// Seconds between status broadcasts and timeout sweeps.
    #[arg(long, env = "LINK_SERVER_POLL_TIME")]
    poll_time: Option<u64>,

    /// Log at debug level.
    #[arg(long, short = 'd')]
    debug: bool,

    /// Log level (`error`, `warn`, `info`, `debug`, `trace`).
    #[arg(long)]
    log_level: Option<String>,
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // The level can only be known once the file is read, so logging starts
    // after loading; a missing-file warning is replayed below.
    let config_missing = !cli.config.exists();
    let mut config = load_config(&cli.config)
        .with_context(|| format!("failed to load {}", cli.config.display()))?;

    if let Some(secs) = cli.poll_time {
        config.server.poll_time_secs = secs;
    }
    if let Some(level) = cli.log_level {
        config.server.log_level = level;
    }
    if cli.debug {
        config.server.log_level = "debug".to_string();
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.server.log_level)),
        )
        .init();

    info!("link-server starting");
    if config_missing {
        warn!("no config file at {}; using defaults", cli.config.display());
    }

    config.validate().context("invalid configuration")?;
    let registry = config
        .build_registry()
        .context("invalid device catalog")?;
    let settings = config.broker_settings()?;
    info!(
        "{} device(s) configured; broadcasting to {}",
        registry.device_count(),
        settings.multicast_group
    );

    let listen_addr = config.server.listen_addr()?;
    let transport = Arc::new(
        UdpTransport::bind(listen_addr, config.server.multicast_ttl)
            .await
            .context("failed to bind command socket")?,
    );

    let broker = Broker::new(
        registry,
        Arc::new(ShellActivator::new()),
        transport.clone(),
        settings,
    );

    // ── Shutdown signal ───────────────────────────────────────────────────────
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        wait_for_signal().await;
        info!("shutdown signal received");
        let _ = shutdown_tx.send(true);
    });

    let poll_interval = config.server.poll_interval();
    Reactor::new(transport, broker, poll_interval, shutdown_rx)
        .run()
        .await
        .context("reactor failed")?;

    info!("link-server stopped");
    Ok(())
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut term) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = term.recv() => {}
            }
        }
        Err(_) => {
            let _ = tokio::signal::ctrl_c().await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    let _ = tokio::signal::ctrl_c().await;
}

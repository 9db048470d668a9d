//! starfaild — the multi-interface WAN failover daemon.
//!
//! Runs three concurrent surfaces alongside the Supervisor tick loop: the
//! `starfail` RPC namespace, the optional `/health`+`/metrics` HTTP
//! surface, and a config-file watcher that triggers hot reload on write.

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;
use tokio::sync::{mpsc, watch};
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

use starfail_core::config::Config;

use starfail_daemon::rpc;
use starfail_daemon::state::{AppState, Command};
use starfail_daemon::supervisor::Supervisor;
use starfail_daemon::{http, watch_config};

/// Multi-interface WAN failover daemon.
#[derive(Parser, Debug)]
#[command(name = "starfaild", about = "Multi-interface WAN failover daemon")]
struct Cli {
    /// Path to the TOML config file.
    #[arg(long, default_value = "/etc/starfail/starfail.toml")]
    config: PathBuf,

    /// Stay attached to the controlling terminal instead of detaching.
    #[arg(long, default_value_t = true)]
    foreground: bool,

    /// Run against simulated probers instead of real ICMP/interface state.
    #[arg(long, default_value_t = false)]
    simulate: bool,

    /// Write a PID file at this path, overriding `main.pid_file`.
    #[arg(long)]
    pid_file: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let (filter_layer, reload_handle) =
        tracing_subscriber::reload::Layer::new(EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter_layer)
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::load(&cli.config).unwrap_or_else(|e| {
        tracing::warn!(path = %cli.config.display(), error = %e, "using default config");
        Config::default()
    });
    reload_handle
        .reload(EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info")))
        .ok();

    if !cli.foreground {
        tracing::info!("daemonizing is left to the host service manager (systemd Type=simple)");
    }

    let pid_path = cli.pid_file.clone().or_else(|| config.pid_file.clone().map(PathBuf::from));
    if let Some(path) = &pid_path {
        std::fs::write(path, std::process::id().to_string())?;
    }

    tracing::info!(
        members = config.members.len(),
        simulate = cli.simulate,
        "starfaild starting"
    );

    let (command_tx, command_rx) = mpsc::channel::<Command>(64);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let state = AppState::new(config.clone(), cli.simulate, command_tx, reload_handle);

    let watcher_state = state.clone();
    let watcher_path = cli.config.clone();
    let _watch_handle = tokio::spawn(async move {
        watch_config(watcher_state, watcher_path).await;
    });

    let rpc_addr: SocketAddr = ([0, 0, 0, 0], config.rpc_port).into();
    let rpc_state = state.clone();
    let rpc_handle = tokio::spawn(async move {
        let app = rpc::router(rpc_state);
        let listener = tokio::net::TcpListener::bind(rpc_addr).await?;
        tracing::info!(addr = %rpc_addr, "rpc surface listening");
        axum::serve(listener, app).await
    });

    let health_addr: SocketAddr = ([0, 0, 0, 0], config.health_port).into();
    let http_state = state.clone();
    let http_handle = tokio::spawn(async move {
        let app = http::router(http_state);
        let listener = tokio::net::TcpListener::bind(health_addr).await?;
        tracing::info!(addr = %health_addr, "health/metrics surface listening");
        axum::serve(listener, app).await
    });

    let supervisor = Supervisor::new(state, cli.simulate, command_rx, shutdown_rx);
    let supervisor_handle = tokio::spawn(supervisor.run());

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("received SIGINT, shutting down");
        }
        result = supervisor_handle => {
            if let Err(e) = result {
                tracing::error!("supervisor task failed: {e}");
            }
        }
    }

    let _ = shutdown_tx.send(true);
    rpc_handle.abort();
    http_handle.abort();

    if let Some(path) = &pid_path {
        let _ = std::fs::remove_file(path);
    }

    tracing::info!("starfaild stopped");
    Ok(())
}

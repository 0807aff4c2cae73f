//! stormd — the StormStack control-plane daemon.
//!
//! Single binary that assembles the control plane:
//! - Shared state store (redb)
//! - Node / match / module registries
//! - Scheduler and match router
//! - Module distributor and auth broker
//! - Background workers: node reaper, orphan sweeper, autoscaler
//! - Admin REST API
//!
//! # Usage
//!
//! ```text
//! stormd serve --port 7300 --data-dir /var/lib/stormstack
//! ```
//!
//! Everything else is configured through the environment (AUTH_SERVICE_URL,
//! CONTROL_PLANE_TOKEN, NODE_TTL_SECONDS, AUTOSCALER_*, MAX_CONTAINERS, …).

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio::sync::{mpsc, watch};
use tracing::info;

use storm_core::ControlPlaneConfig;

/// Removal messages queued between reaper/admin-delete and the sweeper.
const REMOVAL_CHANNEL_CAPACITY: usize = 64;

#[derive(Parser)]
#[command(name = "stormd", about = "StormStack control-plane daemon")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the control plane.
    Serve {
        /// Port to listen on.
        #[arg(long, default_value = "7300")]
        port: u16,

        /// Data directory for the state store (overrides STORM_STATE_DIR).
        #[arg(long)]
        data_dir: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,stormd=debug,storm=debug".parse().unwrap()),
        )
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Serve { port, data_dir } => {
            let mut config = ControlPlaneConfig::from_env();
            if let Some(dir) = data_dir {
                config.state_dir = dir;
            }
            serve(port, config).await
        }
    }
}

async fn serve(port: u16, config: ControlPlaneConfig) -> anyhow::Result<()> {
    info!("StormStack control plane starting");

    std::fs::create_dir_all(&config.state_dir)?;
    let db_path = config.state_dir.join("control-plane.redb");

    // ── Wiring: leaves first, handles passed by value ──────────────

    let store = storm_state::KvStore::open(&db_path)?;
    info!(path = ?db_path, "state store opened");

    let nodes = storm_registry::NodeRegistry::new(
        store.clone(),
        config.node_ttl_seconds,
        config.node_grace_factor,
    );
    let matches = storm_registry::MatchRegistry::new(store.clone());
    let modules = storm_registry::ModuleRegistry::new(store.clone());
    let scheduler = storm_scheduler::Scheduler::new(nodes.clone(), matches.clone());

    let engine = storm_engine::EngineClient::new(
        &config.http,
        config.control_plane_token.clone(),
    )?;
    let distributor = storm_distributor::ModuleDistributor::new(
        modules.clone(),
        nodes.clone(),
        engine.clone(),
    );
    let auth = storm_auth::AuthBroker::new(&config);
    if auth.validation_enabled() {
        info!("auth broker enabled, match tokens will be requested");
    } else {
        info!("no auth service configured, matches are issued without tokens");
    }

    let router = storm_router::MatchRouter::new(
        nodes.clone(),
        matches.clone(),
        modules.clone(),
        scheduler.clone(),
        distributor.clone(),
        engine,
        auth,
        config.max_containers,
    );
    let view = storm_view::ClusterView::new(nodes.clone(), matches.clone(), store.clone());
    let autoscaler = storm_autoscale::Autoscaler::new(
        scheduler,
        store.clone(),
        config.autoscaler.clone(),
    );

    // ── Background workers ─────────────────────────────────────────

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (removal_tx, removal_rx) = mpsc::channel(REMOVAL_CHANNEL_CAPACITY);

    // Reap at a fraction of the TTL so expiry is noticed promptly.
    let reap_interval = Duration::from_secs(config.node_ttl_seconds.max(3) / 3);
    let reaper = storm_router::NodeReaper::new(nodes.clone(), removal_tx.clone(), reap_interval);
    let reaper_handle = tokio::spawn(reaper.run(shutdown_rx.clone()));

    let sweeper = storm_router::OrphanSweeper::new(
        matches.clone(),
        nodes.clone(),
        config.match_retention_seconds,
        removal_rx,
    );
    let sweeper_handle = tokio::spawn(sweeper.run(shutdown_rx.clone()));

    let autoscaler_handle = tokio::spawn(autoscaler.run(shutdown_rx.clone()));

    // ── Admin API ──────────────────────────────────────────────────

    let api_state = storm_api::ApiState {
        nodes,
        modules,
        router,
        distributor,
        view,
        removals: removal_tx,
        api_secret: config.api_secret.clone(),
    };
    let app = storm_api::build_router(api_state);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "admin API listening");

    let server = axum::serve(listener, app).with_graceful_shutdown(async move {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install CTRL+C handler");
        info!("shutdown signal received");
        let _ = shutdown_tx.send(true);
    });
    server.await?;

    let _ = reaper_handle.await;
    let _ = sweeper_handle.await;
    let _ = autoscaler_handle.await;

    info!("StormStack control plane stopped");
    Ok(())
}

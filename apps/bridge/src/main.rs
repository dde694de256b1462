//! # SmartQueue Bridge
//!
//! Wires the queue store, the display peer link and the observer server into
//! one process.
//!
//! ## Startup
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  1. Load BridgeConfig (defaults → bridge.toml → QUEUE_* env)            │
//! │  2. Open SQLite, run migrations, read the configuration row             │
//! │     (missing row = refuse to start)                                     │
//! │  3. Subscribe to the change feed (bridge + publisher)                   │
//! │  4. Spawn SerialLink, ReconciliationBridge, LivePublisher               │
//! │  5. Serve HTTP + /ws until Ctrl+C / SIGTERM                             │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//! ```bash
//! smartqueue-bridge --config ./bridge.toml
//! QUEUE_COM_PORT=/dev/ttyACM0 RUST_LOG=debug smartqueue-bridge
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use smartqueue_db::{Database, DbConfig, QueueStore};
use smartqueue_sync::publisher::DEFAULT_OBSERVER_CAPACITY;
use smartqueue_sync::{
    BridgeConfig, LivePublisher, ObserverServer, QueueStateMachine, ReconciliationBridge,
    SerialLink, SerialLinkConfig, SerialPortConnector,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config_path = match parse_args() {
        Some(path) => path,
        None => return Ok(()),
    };

    info!("Starting SmartQueue bridge...");

    let config = BridgeConfig::load(config_path).context("Failed to load bridge config")?;
    info!(
        port = %config.serial.path,
        baud = config.serial.baud_rate,
        database = %config.store.database_path.display(),
        http = %config.server.bind_address(),
        "Configuration loaded"
    );

    // Store
    let db = Database::new(
        DbConfig::new(&config.store.database_path)
            .config_id(config.store.config_id.clone())
            .max_connections(config.store.max_connections),
    )
    .await
    .context("Failed to open queue database")?;

    let queue = db
        .ensure_configuration()
        .await
        .context("Queue configuration is missing; run the seeder first")?;
    info!(
        current = queue.current_number,
        next = queue.next_number,
        "Queue configuration loaded"
    );

    let store: Arc<dyn QueueStore> = Arc::new(db.clone());
    let machine = QueueStateMachine::new(store.clone());

    // Subscribe before anything reads, so no commit slips between
    let bridge_changes = store.subscribe();
    let publisher_changes = store.subscribe();

    // Display peer
    let connector = Arc::new(SerialPortConnector::from_settings(&config.serial));
    let (link, link_events) = SerialLink::spawn(connector, SerialLinkConfig::from(&config.serial));

    let bridge = ReconciliationBridge::new(machine.clone(), link.clone()).spawn(
        bridge_changes,
        link_events,
        config.bridge.heartbeat_interval(),
    );

    // Observers
    let publisher = LivePublisher::new(machine, DEFAULT_OBSERVER_CAPACITY);
    let publisher_handle = publisher.clone().spawn(publisher_changes);

    let server = ObserverServer::new(config.server.clone(), publisher)
        .start()
        .await
        .context("Failed to start observer server")?;
    info!(addr = %server.local_addr(), "Bridge running");

    shutdown_signal().await;

    if let Err(e) = server.shutdown().await {
        warn!(error = %e, "Observer server already stopped");
    }
    if let Err(e) = publisher_handle.shutdown().await {
        warn!(error = %e, "Publisher already stopped");
    }
    if let Err(e) = bridge.shutdown().await {
        warn!(error = %e, "Bridge already stopped");
    }
    if let Err(e) = link.shutdown().await {
        warn!(error = %e, "Serial link already stopped");
    }
    db.close().await;

    info!("Bridge shutdown complete");
    Ok(())
}

/// Initializes the tracing subscriber.
///
/// `RUST_LOG` overrides the default filter.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,smartqueue=debug,sqlx=warn"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();
}

/// Reads `--config <PATH>`. Returns `None` when only help was requested.
fn parse_args() -> Option<Option<PathBuf>> {
    let args: Vec<String> = std::env::args().collect();
    let mut config_path = None;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--config" | "-c" => {
                if i + 1 < args.len() {
                    config_path = Some(PathBuf::from(&args[i + 1]));
                    i += 1;
                }
            }
            "--help" | "-h" => {
                println!("SmartQueue Bridge");
                println!();
                println!("Usage: smartqueue-bridge [OPTIONS]");
                println!();
                println!("Options:");
                println!("  -c, --config <PATH>  Config file (default: platform config dir/bridge.toml)");
                println!("  -h, --help           Show this help message");
                println!();
                println!("Environment:");
                println!("  QUEUE_COM_PORT, QUEUE_BAUD_RATE, QUEUE_RECONNECT_DELAY_MS,");
                println!("  QUEUE_DATABASE_PATH, QUEUE_CONFIG_ID, QUEUE_HTTP_BIND, QUEUE_HTTP_PORT");
                return None;
            }
            other => warn!(arg = %other, "Ignoring unknown argument"),
        }
        i += 1;
    }

    Some(config_path)
}

/// Resolves on Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received, starting graceful shutdown...");
}

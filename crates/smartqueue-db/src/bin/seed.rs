//! # Queue Seeder
//!
//! Prepares a queue database for deployment: applies migrations and creates
//! the configuration singleton (`current = 0`, `next = 1`) if it is absent.
//!
//! ## Usage
//! ```bash
//! # Seed the default database
//! cargo run -p smartqueue-db --bin seed
//!
//! # Specify database path and configuration id
//! cargo run -p smartqueue-db --bin seed -- --db ./data/queue.db --id <uuid>
//!
//! # Also clear every ticket and rewind the counters
//! cargo run -p smartqueue-db --bin seed -- --reset
//! ```

use std::env;

use smartqueue_core::{ConfigPatch, QueueMutation, QUEUE_CONFIG_ID};
use smartqueue_db::{Database, DbConfig, QueueStore};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args: Vec<String> = env::args().collect();

    let mut db_path = env::var("QUEUE_DATABASE_PATH").unwrap_or_else(|_| "./smartqueue.db".to_string());
    let mut config_id = env::var("QUEUE_CONFIG_ID").unwrap_or_else(|_| QUEUE_CONFIG_ID.to_string());
    let mut reset = false;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--db" | "-d" => {
                if i + 1 < args.len() {
                    db_path = args[i + 1].clone();
                    i += 1;
                }
            }
            "--id" => {
                if i + 1 < args.len() {
                    config_id = args[i + 1].clone();
                    i += 1;
                }
            }
            "--reset" => reset = true,
            "--help" | "-h" => {
                println!("SmartQueue Seeder");
                println!();
                println!("Usage: seed [OPTIONS]");
                println!();
                println!("Options:");
                println!("  -d, --db <PATH>    Database file path (default: ./smartqueue.db)");
                println!("      --id <ID>      Configuration row id");
                println!("      --reset        Delete all tickets and rewind the counters");
                println!("  -h, --help         Show this help message");
                return Ok(());
            }
            other => warn!(arg = %other, "Ignoring unknown argument"),
        }
        i += 1;
    }

    let db = Database::new(DbConfig::new(&db_path).config_id(&config_id)).await?;
    info!(path = %db_path, "Connected to database, migrations applied");

    if db.seed_configuration().await? {
        info!(config_id = %config_id, "Created queue configuration");
    } else {
        info!(config_id = %config_id, "Queue configuration already present");
    }

    if reset {
        let outcome = db
            .commit(
                QueueMutation::new()
                    .delete_all()
                    .patch(ConfigPatch::default().current(0).next(1)),
            )
            .await?;
        info!(deleted = outcome.deleted, "Queue reset");
    }

    let config = db.get_configuration().await?;
    let waiting = db.list_waiting_tickets().await?;
    info!(
        current = config.current_number,
        next = config.next_number,
        waiting = waiting.len(),
        "Seed complete"
    );

    db.close().await;
    Ok(())
}

//! # smartqueue-db: Queue Store for SmartQueue
//!
//! This crate owns the persisted queue (configuration singleton and tickets)
//! and the change feed every synchronizer listens to.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        SmartQueue Data Flow                             │
//! │                                                                         │
//! │  QueueStateMachine (take / call-next / reset / peer ticket)            │
//! │       │ commit(QueueMutation)                                           │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                 smartqueue-db (THIS CRATE)                      │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────────┐   ┌────────────────┐   ┌───────────────┐   │   │
//! │  │   │  QueueStore   │   │   Bindings     │   │  ChangeFeed   │   │   │
//! │  │   │  (store.rs)   │◄──│ Database (SQL) │──►│  (feed.rs)    │   │   │
//! │  │   │               │   │ MemoryStore    │   │  broadcast    │   │   │
//! │  │   └───────────────┘   └────────────────┘   └───────┬───────┘   │   │
//! │  │                                                     │           │   │
//! │  └─────────────────────────────────────────────────────┼───────────┘   │
//! │                                                        │               │
//! │                         ┌──────────────────────────────┼─────────┐     │
//! │                         ▼                              ▼         │     │
//! │                ReconciliationBridge             LivePublisher    │     │
//! │                (display peer)                   (observers)      │     │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//!
//! - [`store`] - The `QueueStore` capability trait
//! - [`feed`] - Change notifications (`ChangeSubscription`, `ChangeNotice`)
//! - [`pool`] - SQLite connection pool and `Database`
//! - [`migrations`] - Embedded database migrations
//! - [`repository`] - SQL for configuration and tickets
//! - [`memory`] - In-memory binding
//! - [`error`] - Store error types
//!
//! ## Usage
//!
//! ```rust,ignore
//! use smartqueue_db::{Database, DbConfig, QueueStore};
//!
//! let db = Database::new(DbConfig::new("queue.db")).await?;
//! db.seed_configuration().await?;
//!
//! let mut changes = db.subscribe();
//! let ticket = db.insert_ticket(1).await?;
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod feed;
pub mod memory;
pub mod migrations;
pub mod pool;
pub mod repository;
mod sqlite;
pub mod store;

// =============================================================================
// Re-exports
// =============================================================================

pub use error::{DbError, DbResult};
pub use feed::{ChangeFeed, ChangeNotice, ChangeSubscription};
pub use memory::MemoryQueueStore;
pub use pool::{Database, DbConfig};
pub use store::QueueStore;

// Repository re-exports for convenience
pub use repository::{ConfigRepository, TicketRepository};

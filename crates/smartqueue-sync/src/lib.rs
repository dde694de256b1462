//! # smartqueue-sync: Synchronization Layer for SmartQueue
//!
//! Keeps three sources of truth converged: the queue store, the display peer
//! on the serial line, and every live observer.
//!
//! ## Architecture Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        SmartQueue Sync Layer                            │
//! │                                                                         │
//! │   HTTP observers           display peer (serial)                        │
//! │        │                          │   ▲                                 │
//! │        │ take / call / reset      │   │ STATE CALL TAKE QUEUE RESET     │
//! │        ▼                          ▼   │                                 │
//! │  ┌──────────────┐  REQ / ticket ┌──────────────────────┐               │
//! │  │ QueueState-  │◄──────────────│ ReconciliationBridge │               │
//! │  │ Machine      │               │ (SentCache)          │               │
//! │  └──────┬───────┘               └──────────▲───────────┘               │
//! │         │ commit                           │                            │
//! │         ▼                                  │                            │
//! │  ┌──────────────┐    change feed           │                            │
//! │  │  QueueStore  │──────────────────────────┤                            │
//! │  └──────────────┘                          ▼                            │
//! │                                   ┌──────────────────┐                  │
//! │                                   │  LivePublisher   │──► /ws observers │
//! │                                   └──────────────────┘                  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//! - [`machine`] - `QueueStateMachine` (take / call-next / reset / observe)
//! - [`serial`] - `SerialLink` driver with fixed-interval reconnection
//! - [`bridge`] - `ReconciliationBridge` (store ⇄ display peer)
//! - [`publisher`] - `LivePublisher` (store → observers)
//! - [`server`] - Axum HTTP + WebSocket surface
//! - [`config`] - Bridge configuration (TOML + environment)
//! - [`error`] - Sync error types
//!
//! ## Usage
//!
//! ```rust,ignore
//! use smartqueue_sync::{QueueStateMachine, ReconciliationBridge, SerialLink};
//!
//! let machine = QueueStateMachine::new(store.clone());
//! let (link, link_events) = SerialLink::spawn(connector, SerialLinkConfig::default());
//! let changes = store.subscribe();
//! let bridge = ReconciliationBridge::new(machine, link).spawn(changes, link_events, heartbeat);
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod bridge;
pub mod config;
pub mod error;
pub mod machine;
pub mod publisher;
pub mod serial;
pub mod server;

// =============================================================================
// Re-exports
// =============================================================================

pub use bridge::{BridgeHandle, CommandSink, ReconciliationBridge};
pub use config::{BridgeConfig, BridgeSettings, SerialSettings, ServerSettings, StoreSettings};
pub use error::{ErrorKind, SyncError, SyncResult};
pub use machine::QueueStateMachine;
pub use publisher::{LivePublisher, ObserverFrame, PublisherHandle, QueueUpdate};
pub use serial::{
    LinkConnector, LinkEvent, LinkState, LinkStream, SerialLink, SerialLinkConfig,
    SerialLinkHandle, SerialPortConnector,
};
pub use server::{ObserverServer, ServerHandle, TakeResponse};

//! # smartqueue-core: Pure Queue Logic for SmartQueue
//!
//! This crate is the **heart** of the ticket queue. It contains every rule
//! that decides what the queue looks like and what the hardware display must
//! be told, as pure functions with zero I/O dependencies.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       SmartQueue Architecture                           │
//! │                                                                         │
//! │  ┌──────────────────────┐        ┌──────────────────────────────────┐  │
//! │  │ Observers (UI)       │        │ Display peer (serial line)       │  │
//! │  │ customer/staff/public│        │ CALL / TAKE / QUEUE / STATE      │  │
//! │  └──────────┬───────────┘        └───────────────┬──────────────────┘  │
//! │             │ WebSocket                          │ tokio-serial        │
//! │  ┌──────────▼────────────────────────────────────▼──────────────────┐  │
//! │  │                 smartqueue-sync (bridge, publisher)              │  │
//! │  └─────────────────────────────┬────────────────────────────────────┘  │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │            ★ smartqueue-core (THIS CRATE) ★                     │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────┐  ┌───────────┐  ┌───────────┐  ┌───────────┐  │   │
//! │  │   │   types   │  │  status   │  │ protocol  │  │ reconcile │  │   │
//! │  │   │  Ticket   │  │  Derived  │  │ HostCmd   │  │ SentCache │  │   │
//! │  │   │  Config   │  │  status   │  │ PeerEvent │  │ plan()    │  │   │
//! │  │   └───────────┘  └───────────┘  └───────────┘  └───────────┘  │   │
//! │  │                                                                 │   │
//! │  │   NO I/O • NO DATABASE • NO SERIAL PORT • PURE FUNCTIONS        │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │                 smartqueue-db (QueueStore)                      │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`types`] - Data model (configuration, tickets, mutations, change events)
//! - [`status`] - `DerivedQueueStatus` computation
//! - [`protocol`] - Serial line protocol and line framing
//! - [`reconcile`] - Minimal-diff planning against the last-sent cache
//! - [`validation`] - Ticket number and configuration rules
//! - [`error`] - Domain error types
//!
//! ## Example Usage
//!
//! ```rust
//! use smartqueue_core::protocol::HostCommand;
//! use smartqueue_core::reconcile::{plan_update, SentCache};
//! use smartqueue_core::DerivedQueueStatus;
//!
//! let status = DerivedQueueStatus {
//!     current_number: 3,
//!     total_issued: 5,
//!     waiting_numbers: vec![4],
//!     waiting_count: 1,
//! };
//!
//! let cache = SentCache { current: 3, next: 6, waiting_count: 2 };
//! let plan = plan_update(&cache, 6, &status);
//!
//! assert_eq!(plan.commands, vec![HostCommand::Queue(1)]);
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod protocol;
pub mod reconcile;
pub mod status;
pub mod types;
pub mod validation;

// =============================================================================
// Re-exports for Convenience
// =============================================================================

pub use error::{CoreError, CoreResult, ValidationError};
pub use protocol::{HostCommand, LineFramer, PeerEvent};
pub use reconcile::{ReconcilePlan, SentCache};
pub use status::derive_status;
pub use types::*;

// =============================================================================
// Crate-Level Constants
// =============================================================================

/// Identifier of the queue configuration singleton row.
///
/// The deployment has exactly one counter, so the configuration row is
/// addressed by a fixed id. It must be seeded before the bridge starts.
pub const QUEUE_CONFIG_ID: &str = "00000000-0000-0000-0000-000000000001";

/// Number handed to the first ticket of an epoch.
pub const FIRST_TICKET_NUMBER: i64 = 1;

/// Largest ticket number the queue issues or accepts from the peer.
pub const MAX_TICKET_NUMBER: i64 = 999_999;

/// Maximum accepted length of a single line on the serial link.
pub const MAX_PEER_LINE_LEN: usize = 256;

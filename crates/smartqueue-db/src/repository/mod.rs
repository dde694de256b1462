//! # Repository Module
//!
//! SQL for the SQLite binding of [`crate::QueueStore`].
//!
//! ## Layout
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │  Database (QueueStore impl, sqlite.rs)                                 │
//! │       │                                                                 │
//! │       ├── reads   ──► ConfigRepository / TicketRepository (pool)       │
//! │       │                                                                 │
//! │       └── commit  ──► config::* / ticket::* helpers (one transaction)  │
//! │                            │                                            │
//! │                            ▼                                            │
//! │                     SQLite Database                                    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Available Repositories
//!
//! - [`ConfigRepository`] - Configuration singleton read and seed
//! - [`TicketRepository`] - Ticket reads

pub mod config;
pub mod ticket;

pub use config::ConfigRepository;
pub use ticket::TicketRepository;

//! # Domain Types
//!
//! Core domain types used throughout SmartQueue.
//!
//! ## Type Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Domain Types                                    │
//! │                                                                         │
//! │  ┌────────────────────┐   ┌─────────────────┐   ┌────────────────────┐ │
//! │  │ QueueConfiguration │   │     Ticket      │   │ DerivedQueueStatus │ │
//! │  │  ────────────────  │   │  ─────────────  │   │  ────────────────  │ │
//! │  │  id (fixed)        │   │  id (UUID)      │   │  current_number    │ │
//! │  │  current_number    │   │  ticket_number  │   │  total_issued      │ │
//! │  │  next_number       │   │  status         │   │  waiting_numbers   │ │
//! │  │  version           │   │  served_at      │   │  waiting_count     │ │
//! │  └────────────────────┘   └─────────────────┘   └────────────────────┘ │
//! │                                                                         │
//! │  ┌────────────────────┐   ┌─────────────────┐                          │
//! │  │  QueueMutation     │   │  ChangeEvent    │                          │
//! │  │  ────────────────  │   │  ─────────────  │                          │
//! │  │  expected_version  │   │  entity         │                          │
//! │  │  config patch      │   │  kind           │                          │
//! │  │  ticket writes     │   │  row image      │                          │
//! │  └────────────────────┘   └─────────────────┘                          │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Ticket Identity
//! Every ticket has:
//! - `id`: UUID v4 - immutable, used for status updates
//! - `ticket_number`: what the customer holds; unique only among
//!   non-completed tickets, reused after a reset

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;

// =============================================================================
// Queue Configuration
// =============================================================================

/// The queue configuration singleton.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct QueueConfiguration {
    /// Fixed identifier of the singleton row.
    pub id: String,

    /// Ticket presently being served (0 = none).
    pub current_number: i64,

    /// Number the next new ticket will receive.
    pub next_number: i64,

    /// Optimistic-concurrency token, bumped on every committed mutation.
    pub version: i64,

    /// When the numbers last changed.
    #[ts(as = "String")]
    pub updated_at: DateTime<Utc>,
}

impl QueueConfiguration {
    /// Creates a fresh configuration at the start of an epoch.
    pub fn initial(id: impl Into<String>, now: DateTime<Utc>) -> Self {
        QueueConfiguration {
            id: id.into(),
            current_number: 0,
            next_number: crate::FIRST_TICKET_NUMBER,
            version: 0,
            updated_at: now,
        }
    }

    /// Number of tickets issued in this epoch.
    #[inline]
    pub fn total_issued(&self) -> i64 {
        self.next_number - 1
    }

    /// True when the numbers look exactly like a freshly reset queue.
    #[inline]
    pub fn is_reset_signature(&self) -> bool {
        self.current_number == 0 && self.next_number == crate::FIRST_TICKET_NUMBER
    }

    /// Returns a copy with the patch applied.
    pub fn patched(&self, patch: &ConfigPatch) -> Self {
        QueueConfiguration {
            id: self.id.clone(),
            current_number: patch.current_number.unwrap_or(self.current_number),
            next_number: patch.next_number.unwrap_or(self.next_number),
            version: self.version,
            updated_at: self.updated_at,
        }
    }
}

// =============================================================================
// Ticket Status
// =============================================================================

/// Lifecycle state of a ticket.
///
/// ```text
///   waiting ──call──► serving ──next call / reset──► completed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum TicketStatus {
    /// In line, not yet called.
    Waiting,
    /// At the counter right now.
    Serving,
    /// Done. Never mutated again except by a reset.
    Completed,
}

impl TicketStatus {
    /// Column value used by the store.
    pub const fn as_str(&self) -> &'static str {
        match self {
            TicketStatus::Waiting => "waiting",
            TicketStatus::Serving => "serving",
            TicketStatus::Completed => "completed",
        }
    }

    /// The timestamp column stamped when a ticket enters this status.
    pub const fn timestamp_field(&self) -> Option<TimestampField> {
        match self {
            TicketStatus::Waiting => None,
            TicketStatus::Serving => Some(TimestampField::ServedAt),
            TicketStatus::Completed => Some(TimestampField::CompletedAt),
        }
    }
}

impl fmt::Display for TicketStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TicketStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "waiting" => Ok(TicketStatus::Waiting),
            "serving" => Ok(TicketStatus::Serving),
            "completed" => Ok(TicketStatus::Completed),
            other => Err(format!("unknown ticket status: {other}")),
        }
    }
}

/// Ticket timestamp columns that track status transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimestampField {
    ServedAt,
    CompletedAt,
}

// =============================================================================
// Ticket
// =============================================================================

/// One customer's position in the queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct Ticket {
    /// Unique identifier (UUID v4).
    pub id: String,

    /// The number printed on / shown for the ticket.
    pub ticket_number: i64,

    /// Current lifecycle state.
    pub status: TicketStatus,

    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,

    #[ts(as = "Option<String>")]
    pub served_at: Option<DateTime<Utc>>,

    #[ts(as = "Option<String>")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl Ticket {
    /// Creates a waiting ticket.
    pub fn waiting(id: impl Into<String>, ticket_number: i64, now: DateTime<Utc>) -> Self {
        Ticket {
            id: id.into(),
            ticket_number,
            status: TicketStatus::Waiting,
            created_at: now,
            served_at: None,
            completed_at: None,
        }
    }

    /// Moves the ticket to `status`, stamping the matching timestamp.
    pub fn transition(&mut self, status: TicketStatus, now: DateTime<Utc>) {
        self.status = status;
        match status.timestamp_field() {
            Some(TimestampField::ServedAt) => self.served_at = Some(now),
            Some(TimestampField::CompletedAt) => self.completed_at = Some(now),
            None => {}
        }
    }

    #[inline]
    pub fn is_active(&self) -> bool {
        self.status != TicketStatus::Completed
    }
}

// =============================================================================
// Derived Status
// =============================================================================

/// The canonical queue view pushed to the display peer and every observer.
///
/// Computed from store reads, never persisted and never cached beyond a call.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct DerivedQueueStatus {
    /// Ticket being served (0 = none).
    pub current_number: i64,

    /// `next_number - 1`.
    pub total_issued: i64,

    /// Waiting ticket numbers, ascending.
    pub waiting_numbers: Vec<i64>,

    /// `waiting_numbers.len()`.
    pub waiting_count: i64,
}

// =============================================================================
// Mutations
// =============================================================================

/// Partial update of the configuration singleton.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConfigPatch {
    pub current_number: Option<i64>,
    pub next_number: Option<i64>,
}

impl ConfigPatch {
    pub fn current(mut self, current_number: i64) -> Self {
        self.current_number = Some(current_number);
        self
    }

    pub fn next(mut self, next_number: i64) -> Self {
        self.next_number = Some(next_number);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.current_number.is_none() && self.next_number.is_none()
    }
}

/// A single ticket write inside a [`QueueMutation`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TicketWrite {
    /// Insert a waiting ticket with this number.
    Insert { number: i64 },
    /// Move an existing ticket to a new status.
    SetStatus { id: String, status: TicketStatus },
    /// Delete every ticket (reset).
    DeleteAll,
}

/// A batch of writes the store applies atomically.
///
/// ## Optimistic Concurrency
/// ```text
/// read config (version = 7)
///      │
///      ▼
/// build mutation expecting version 7
///      │
///      ▼
/// store.commit() ── version still 7? ── yes ──► apply all, version = 8
///                                    └─ no ───► VersionConflict, nothing written
/// ```
///
/// Writes are applied in order: ticket writes first, then the configuration
/// patch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueueMutation {
    /// Commit only if the configuration version still equals this.
    pub expected_version: Option<i64>,

    /// Configuration patch, if any.
    pub config: Option<ConfigPatch>,

    /// Ticket writes, in order.
    pub tickets: Vec<TicketWrite>,
}

impl QueueMutation {
    pub fn new() -> Self {
        Self::default()
    }

    /// Guards the commit on the configuration version read earlier.
    pub fn expecting(mut self, version: i64) -> Self {
        self.expected_version = Some(version);
        self
    }

    pub fn patch(mut self, patch: ConfigPatch) -> Self {
        self.config = Some(patch);
        self
    }

    pub fn insert(mut self, number: i64) -> Self {
        self.tickets.push(TicketWrite::Insert { number });
        self
    }

    pub fn set_status(mut self, id: impl Into<String>, status: TicketStatus) -> Self {
        self.tickets.push(TicketWrite::SetStatus {
            id: id.into(),
            status,
        });
        self
    }

    pub fn delete_all(mut self) -> Self {
        self.tickets.push(TicketWrite::DeleteAll);
        self
    }

    /// Returns the configuration patch if it changes anything.
    pub fn effective_patch(&self) -> Option<&ConfigPatch> {
        self.config.as_ref().filter(|patch| !patch.is_empty())
    }
}

/// What a successful commit produced.
#[derive(Debug, Clone)]
pub struct CommitOutcome {
    /// Configuration after the commit.
    pub configuration: QueueConfiguration,

    /// Tickets created by `TicketWrite::Insert`, in order.
    pub inserted: Vec<Ticket>,

    /// Rows removed by `TicketWrite::DeleteAll`.
    pub deleted: u64,
}

// =============================================================================
// Change Notifications
// =============================================================================

/// Which table a change touched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Configuration,
    Tickets,
}

impl EntityKind {
    pub const fn table_name(&self) -> &'static str {
        match self {
            EntityKind::Configuration => "queue_config",
            EntityKind::Tickets => "queue_tickets",
        }
    }
}

/// What happened to the row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

/// New row image carried by a change event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "table", content = "row", rename_all = "snake_case")]
pub enum RowImage {
    Configuration(QueueConfiguration),
    Ticket(Ticket),
}

/// A store change notification.
///
/// Consumers treat it only as a "something changed, re-read" trigger; the
/// row image is informational.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub entity: EntityKind,
    pub kind: ChangeKind,
    pub row: Option<RowImage>,
}

impl ChangeEvent {
    pub fn configuration_updated(config: &QueueConfiguration) -> Self {
        ChangeEvent {
            entity: EntityKind::Configuration,
            kind: ChangeKind::Update,
            row: Some(RowImage::Configuration(config.clone())),
        }
    }

    pub fn ticket(kind: ChangeKind, ticket: &Ticket) -> Self {
        ChangeEvent {
            entity: EntityKind::Tickets,
            kind,
            row: Some(RowImage::Ticket(ticket.clone())),
        }
    }

    /// Bulk delete; there is no single row image.
    pub fn tickets_cleared() -> Self {
        ChangeEvent {
            entity: EntityKind::Tickets,
            kind: ChangeKind::Delete,
            row: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reset_signature() {
        let mut config = QueueConfiguration::initial(crate::QUEUE_CONFIG_ID, Utc::now());
        assert!(config.is_reset_signature());
        assert_eq!(config.total_issued(), 0);

        config.next_number = 4;
        assert!(!config.is_reset_signature());
        assert_eq!(config.total_issued(), 3);
    }

    #[test]
    fn test_patch_keeps_unset_fields() {
        let config = QueueConfiguration {
            id: "cfg".into(),
            current_number: 2,
            next_number: 6,
            version: 9,
            updated_at: Utc::now(),
        };
        let patched = config.patched(&ConfigPatch::default().next(7));
        assert_eq!(patched.current_number, 2);
        assert_eq!(patched.next_number, 7);
        assert_eq!(patched.version, 9);
    }

    #[test]
    fn test_transition_stamps_timestamps() {
        let now = Utc::now();
        let mut ticket = Ticket::waiting("t1", 5, now);
        assert!(ticket.served_at.is_none());

        ticket.transition(TicketStatus::Serving, now);
        assert_eq!(ticket.served_at, Some(now));
        assert!(ticket.completed_at.is_none());

        ticket.transition(TicketStatus::Completed, now);
        assert_eq!(ticket.completed_at, Some(now));
        assert!(!ticket.is_active());
    }

    #[test]
    fn test_ticket_status_round_trip_strings() {
        for status in [TicketStatus::Waiting, TicketStatus::Serving, TicketStatus::Completed] {
            assert_eq!(status.as_str().parse::<TicketStatus>(), Ok(status));
        }
        assert!("called".parse::<TicketStatus>().is_err());
    }

    #[test]
    fn test_empty_patch_is_ignored() {
        let mutation = QueueMutation::new().patch(ConfigPatch::default()).insert(3);
        assert!(mutation.effective_patch().is_none());
        assert_eq!(mutation.tickets, vec![TicketWrite::Insert { number: 3 }]);
    }

    #[test]
    fn test_derived_status_json_shape() {
        let status = DerivedQueueStatus {
            current_number: 1,
            total_issued: 3,
            waiting_numbers: vec![2, 3],
            waiting_count: 2,
        };
        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["currentNumber"], 1);
        assert_eq!(json["waitingNumbers"], serde_json::json!([2, 3]));
    }
}

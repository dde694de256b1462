//! # QueueStore Capability
//!
//! The one interface every other component uses to read, write and watch the
//! queue. Two bindings implement it: [`crate::Database`] (SQLite) and
//! [`crate::MemoryQueueStore`] (in-process).
//!
//! ## Contract
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                          QueueStore                                     │
//! │                                                                         │
//! │  READ                                                                   │
//! │  ├── get_configuration()    → NotFound if the singleton is not seeded   │
//! │  ├── list_waiting_tickets() → ascending by number                       │
//! │  └── get_serving_ticket()   → at most one                               │
//! │                                                                         │
//! │  WRITE (all go through commit)                                          │
//! │  ├── commit(mutation)       → atomic, optional version guard            │
//! │  ├── update_configuration() ├── insert_ticket()                         │
//! │  ├── set_ticket_status()    └── delete_all_tickets()                    │
//! │                                                                         │
//! │  WATCH                                                                  │
//! │  └── subscribe()            → ChangeSubscription (drop = unsubscribe)   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Every successful commit bumps the configuration `version`, so a version
//! guard detects any concurrent write. Notifications for a commit are
//! published only after it is durable.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use smartqueue_core::{
    ChangeEvent, ChangeKind, CommitOutcome, ConfigPatch, QueueConfiguration, QueueMutation,
    Ticket, TicketStatus,
};

use crate::error::{DbError, DbResult};
use crate::feed::ChangeSubscription;

/// Storage capability for the queue.
#[async_trait]
pub trait QueueStore: Send + Sync {
    /// Reads the configuration singleton.
    async fn get_configuration(&self) -> DbResult<QueueConfiguration>;

    /// Waiting tickets, ascending by number.
    async fn list_waiting_tickets(&self) -> DbResult<Vec<Ticket>>;

    /// The ticket being served, if any.
    async fn get_serving_ticket(&self) -> DbResult<Option<Ticket>>;

    /// Applies a mutation atomically.
    ///
    /// Fails with `VersionConflict` (nothing written) when
    /// `expected_version` no longer matches, and with `UniqueViolation`
    /// (nothing written) when an insert collides with a non-completed ticket.
    async fn commit(&self, mutation: QueueMutation) -> DbResult<CommitOutcome>;

    /// Subscribes to the change feed.
    fn subscribe(&self) -> ChangeSubscription;

    /// Atomic partial update of the configuration.
    async fn update_configuration(
        &self,
        patch: ConfigPatch,
        expected_version: Option<i64>,
    ) -> DbResult<QueueConfiguration> {
        let mut mutation = QueueMutation::new().patch(patch);
        mutation.expected_version = expected_version;
        Ok(self.commit(mutation).await?.configuration)
    }

    /// Inserts a waiting ticket.
    async fn insert_ticket(&self, number: i64) -> DbResult<Ticket> {
        let outcome = self.commit(QueueMutation::new().insert(number)).await?;
        outcome
            .inserted
            .into_iter()
            .next()
            .ok_or_else(|| DbError::Internal("insert produced no ticket".to_string()))
    }

    /// Moves a ticket to `status`, stamping its timestamp field.
    async fn set_ticket_status(&self, id: &str, status: TicketStatus) -> DbResult<()> {
        self.commit(QueueMutation::new().set_status(id, status)).await?;
        Ok(())
    }

    /// Deletes every ticket. Returns the number removed.
    async fn delete_all_tickets(&self) -> DbResult<u64> {
        Ok(self.commit(QueueMutation::new().delete_all()).await?.deleted)
    }
}

/// Collects the change events a commit produces, in write order.
#[derive(Debug, Default)]
pub(crate) struct CommitEvents {
    events: Vec<ChangeEvent>,
}

impl CommitEvents {
    pub(crate) fn ticket(&mut self, kind: ChangeKind, ticket: &Ticket) {
        self.events.push(ChangeEvent::ticket(kind, ticket));
    }

    pub(crate) fn cleared(&mut self) {
        self.events.push(ChangeEvent::tickets_cleared());
    }

    pub(crate) fn configuration(&mut self, config: &QueueConfiguration) {
        self.events.push(ChangeEvent::configuration_updated(config));
    }

    pub(crate) fn into_events(self) -> Vec<ChangeEvent> {
        self.events
    }
}

/// Configuration after a commit: patched, version bumped, timestamp moved
/// only when the numbers changed.
pub(crate) fn next_configuration(
    current: &QueueConfiguration,
    mutation: &QueueMutation,
    now: DateTime<Utc>,
) -> QueueConfiguration {
    let mut next = match mutation.effective_patch() {
        Some(patch) => {
            let mut patched = current.patched(patch);
            patched.updated_at = now;
            patched
        }
        None => current.clone(),
    };
    next.version = current.version + 1;
    next
}

/// Checks the version guard.
pub(crate) fn check_version(
    current: &QueueConfiguration,
    mutation: &QueueMutation,
) -> DbResult<()> {
    match mutation.expected_version {
        Some(expected) if expected != current.version => Err(DbError::VersionConflict {
            expected,
            actual: current.version,
        }),
        _ => Ok(()),
    }
}

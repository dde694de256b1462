//! # Queue State Machine
//!
//! Turns customer, staff and peer actions into store mutations, and store
//! reads into the [`DerivedQueueStatus`] everyone displays.
//!
//! ## Operations
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        QueueStateMachine                                │
//! │                                                                         │
//! │  take_number()        read config(v) ──► commit {                       │
//! │                         expect v, insert #next, next += 1 }             │
//! │                         VersionConflict  → re-read, retry               │
//! │                         UniqueViolation  → skip past the number, retry  │
//! │                                                                         │
//! │  call_next()          read config(v), waiting, serving ──► commit {     │
//! │                         expect v, serving → completed,                  │
//! │                         oldest waiting → serving, current = its number }│
//! │                         nobody waiting   → EmptyQueue (nothing written) │
//! │                                                                         │
//! │  reset_queue()        commit { delete all, current = 0, next = 1 }     │
//! │                                                                         │
//! │  accept_peer_ticket(n) commit { expect v, insert #n, next = n + 1 }    │
//! │                                                                         │
//! │  observe_status()     config + waiting ──► derive_status()             │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Each mutation is a single [`QueueStore::commit`], so the change feed never
//! fires between the steps of one operation.

use std::sync::Arc;

use tracing::{debug, info, warn};

use smartqueue_core::validation::{validate_configuration, validate_ticket_number};
use smartqueue_core::{
    derive_status, ConfigPatch, CoreError, DerivedQueueStatus, QueueConfiguration, QueueMutation,
    TicketStatus, FIRST_TICKET_NUMBER,
};
use smartqueue_db::{DbError, QueueStore};

use crate::error::{SyncError, SyncResult};

/// Attempts before an optimistic write gives up with `Contended`.
pub const MAX_WRITE_ATTEMPTS: u32 = 32;

/// Attempts at reading config and tickets from the same version.
const SNAPSHOT_ATTEMPTS: u32 = 3;

/// Queue operations over any [`QueueStore`] binding. Cheap to clone.
#[derive(Clone)]
pub struct QueueStateMachine {
    store: Arc<dyn QueueStore>,
}

impl QueueStateMachine {
    /// Creates a state machine over `store`.
    pub fn new(store: Arc<dyn QueueStore>) -> Self {
        QueueStateMachine { store }
    }

    /// The underlying store.
    pub fn store(&self) -> &Arc<dyn QueueStore> {
        &self.store
    }

    // =========================================================================
    // Customer / Staff Actions
    // =========================================================================

    /// Issues the next ticket number.
    ///
    /// Concurrent callers receive distinct, consecutive numbers.
    pub async fn take_number(&self) -> SyncResult<i64> {
        let mut skip_floor = FIRST_TICKET_NUMBER;

        for attempt in 1..=MAX_WRITE_ATTEMPTS {
            let config = self.store.get_configuration().await?;
            let number = config.next_number.max(skip_floor);
            if let Err(e) = validate_ticket_number(number) {
                warn!(ticket = number, error = %e, "Ticket numbers exhausted, reset the queue");
                return Err(CoreError::from(e).into());
            }

            let mutation = QueueMutation::new()
                .expecting(config.version)
                .insert(number)
                .patch(ConfigPatch::default().next(number + 1));

            match self.store.commit(mutation).await {
                Ok(_) => {
                    info!(ticket = number, "Ticket issued");
                    return Ok(number);
                }
                Err(DbError::VersionConflict { .. }) => {
                    debug!(attempt, "take_number lost a race, retrying");
                }
                Err(DbError::UniqueViolation { .. }) => {
                    // An active ticket already holds this number (peer-issued
                    // numbers can run ahead of or behind next_number)
                    warn!(ticket = number, "Number already active, skipping it");
                    skip_floor = number + 1;
                }
                Err(e) => return Err(e.into()),
            }
        }

        warn!(attempts = MAX_WRITE_ATTEMPTS, "take_number gave up");
        Err(SyncError::Contended {
            attempts: MAX_WRITE_ATTEMPTS,
        })
    }

    /// Completes the serving ticket and serves the oldest waiting one.
    ///
    /// Returns the number now being served. Fails with
    /// [`SyncError::EmptyQueue`] and writes nothing if nobody is waiting.
    pub async fn call_next(&self) -> SyncResult<i64> {
        for attempt in 1..=MAX_WRITE_ATTEMPTS {
            let config = self.store.get_configuration().await?;
            let waiting = self.store.list_waiting_tickets().await?;
            let next = waiting.first().ok_or(CoreError::EmptyQueue)?;
            let serving = self.store.get_serving_ticket().await?;

            let mut mutation = QueueMutation::new().expecting(config.version);
            if let Some(serving) = &serving {
                mutation = mutation.set_status(serving.id.clone(), TicketStatus::Completed);
            }
            mutation = mutation
                .set_status(next.id.clone(), TicketStatus::Serving)
                .patch(ConfigPatch::default().current(next.ticket_number));

            match self.store.commit(mutation).await {
                Ok(outcome) => {
                    info!(
                        current = next.ticket_number,
                        completed = serving.as_ref().map(|t| t.ticket_number),
                        "Called next ticket"
                    );
                    log_invariant(&outcome.configuration);
                    return Ok(next.ticket_number);
                }
                Err(e) if e.is_conflict() => {
                    debug!(attempt, error = %e, "call_next lost a race, retrying");
                }
                Err(e) => return Err(e.into()),
            }
        }

        warn!(attempts = MAX_WRITE_ATTEMPTS, "call_next gave up");
        Err(SyncError::Contended {
            attempts: MAX_WRITE_ATTEMPTS,
        })
    }

    /// Deletes every ticket and rewinds the counters to `current = 0`,
    /// `next = 1`. Ticket numbers start over.
    pub async fn reset_queue(&self) -> SyncResult<()> {
        let outcome = self
            .store
            .commit(
                QueueMutation::new()
                    .delete_all()
                    .patch(ConfigPatch::default().current(0).next(FIRST_TICKET_NUMBER)),
            )
            .await?;

        info!(deleted = outcome.deleted, "Queue reset");
        Ok(())
    }

    // =========================================================================
    // Peer Actions
    // =========================================================================

    /// Records a ticket the display peer issued itself.
    ///
    /// The peer's number is taken as is and `next_number` becomes `n + 1`,
    /// even when that moves it backwards.
    pub async fn accept_peer_ticket(&self, number: i64) -> SyncResult<()> {
        validate_ticket_number(number).map_err(CoreError::from)?;
        // In range after validation
        let next_number = number + 1;

        for attempt in 1..=MAX_WRITE_ATTEMPTS {
            let config = self.store.get_configuration().await?;
            if next_number < config.next_number {
                warn!(
                    ticket = number,
                    next = config.next_number,
                    "Peer ticket moves next_number backwards"
                );
            }

            let mutation = QueueMutation::new()
                .expecting(config.version)
                .insert(number)
                .patch(ConfigPatch::default().next(next_number));

            match self.store.commit(mutation).await {
                Ok(outcome) => {
                    info!(ticket = number, next = next_number, "Peer ticket recorded");
                    log_invariant(&outcome.configuration);
                    return Ok(());
                }
                Err(DbError::VersionConflict { .. }) => {
                    debug!(attempt, "accept_peer_ticket lost a race, retrying");
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(SyncError::Contended {
            attempts: MAX_WRITE_ATTEMPTS,
        })
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Recomputes the queue status from the store.
    pub async fn observe_status(&self) -> SyncResult<DerivedQueueStatus> {
        Ok(self.snapshot().await?.1)
    }

    /// Configuration and the status derived from it.
    ///
    /// Retries while a commit lands between the two reads, so the pair comes
    /// from a single version where possible.
    pub async fn snapshot(&self) -> SyncResult<(QueueConfiguration, DerivedQueueStatus)> {
        let mut config = self.store.get_configuration().await?;

        for _ in 0..SNAPSHOT_ATTEMPTS {
            let waiting = self.store.list_waiting_tickets().await?;
            let after = self.store.get_configuration().await?;
            if after.version == config.version {
                let status = derive_status(&config, &waiting);
                return Ok((config, status));
            }
            config = after;
        }

        // Still moving; the next change notice triggers another read anyway
        let waiting = self.store.list_waiting_tickets().await?;
        let status = derive_status(&config, &waiting);
        Ok((config, status))
    }
}

fn log_invariant(config: &QueueConfiguration) {
    if let Err(e) = validate_configuration(config) {
        warn!(error = %e, "Queue configuration invariant violated");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use smartqueue_core::{Ticket, QUEUE_CONFIG_ID};
    use smartqueue_db::MemoryQueueStore;

    fn machine() -> (QueueStateMachine, MemoryQueueStore) {
        let store = MemoryQueueStore::new_seeded();
        (QueueStateMachine::new(Arc::new(store.clone())), store)
    }

    #[tokio::test]
    async fn test_take_number_sequence() {
        let (machine, store) = machine();

        assert_eq!(machine.take_number().await.unwrap(), 1);
        assert_eq!(machine.take_number().await.unwrap(), 2);
        assert_eq!(machine.take_number().await.unwrap(), 3);

        let config = store.get_configuration().await.unwrap();
        assert_eq!(config.next_number, 4);

        let status = machine.observe_status().await.unwrap();
        assert_eq!(status.waiting_numbers, vec![1, 2, 3]);
        assert_eq!(status.total_issued, 3);
    }

    #[tokio::test]
    async fn test_take_number_skips_active_number() {
        let now = Utc::now();
        let mut config = QueueConfiguration::initial(QUEUE_CONFIG_ID, now);
        config.next_number = 2;
        let store = MemoryQueueStore::with_state(config, vec![Ticket::waiting("t2", 2, now)]);
        let machine = QueueStateMachine::new(Arc::new(store.clone()));

        assert_eq!(machine.take_number().await.unwrap(), 3);
        assert_eq!(store.get_configuration().await.unwrap().next_number, 4);
    }

    #[tokio::test]
    async fn test_call_next_promotes_oldest_and_completes_serving() {
        let (machine, store) = machine();
        machine.take_number().await.unwrap();
        machine.take_number().await.unwrap();

        assert_eq!(machine.call_next().await.unwrap(), 1);
        assert_eq!(machine.call_next().await.unwrap(), 2);

        let tickets = store.all_tickets().await;
        let first = tickets.iter().find(|t| t.ticket_number == 1).unwrap();
        assert_eq!(first.status, TicketStatus::Completed);
        assert!(first.completed_at.is_some());

        let serving = store.get_serving_ticket().await.unwrap().unwrap();
        assert_eq!(serving.ticket_number, 2);
        assert_eq!(store.get_configuration().await.unwrap().current_number, 2);
    }

    #[tokio::test]
    async fn test_call_next_on_empty_queue() {
        let (machine, store) = machine();
        machine.take_number().await.unwrap();
        machine.call_next().await.unwrap();
        let before = store.get_configuration().await.unwrap();

        let err = machine.call_next().await.unwrap_err();
        assert!(matches!(err, SyncError::EmptyQueue));

        let after = store.get_configuration().await.unwrap();
        assert_eq!(after.current_number, before.current_number);
        assert_eq!(after.version, before.version);
        let serving = store.get_serving_ticket().await.unwrap().unwrap();
        assert_eq!(serving.ticket_number, 1);
    }

    #[tokio::test]
    async fn test_reset_then_take_starts_at_one() {
        let (machine, store) = machine();
        machine.take_number().await.unwrap();
        machine.take_number().await.unwrap();
        machine.call_next().await.unwrap();

        machine.reset_queue().await.unwrap();

        let status = machine.observe_status().await.unwrap();
        assert_eq!(status.current_number, 0);
        assert_eq!(status.total_issued, 0);
        assert_eq!(status.waiting_count, 0);
        assert!(store.all_tickets().await.is_empty());

        assert_eq!(machine.take_number().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_peer_ticket_sets_next() {
        let (machine, store) = machine();
        for _ in 0..4 {
            machine.take_number().await.unwrap();
        }

        machine.accept_peer_ticket(7).await.unwrap();

        assert_eq!(store.get_configuration().await.unwrap().next_number, 8);
        let status = machine.observe_status().await.unwrap();
        assert_eq!(status.waiting_numbers, vec![1, 2, 3, 4, 7]);
    }

    #[tokio::test]
    async fn test_peer_ticket_rejects_non_positive() {
        let (machine, _) = machine();
        let err = machine.accept_peer_ticket(0).await.unwrap_err();
        assert!(matches!(err, SyncError::Core(CoreError::Validation(_))));
    }

    #[tokio::test]
    async fn test_peer_ticket_at_i64_max_is_rejected() {
        let (machine, store) = machine();
        machine.take_number().await.unwrap();
        let before = store.get_configuration().await.unwrap();

        let result = tokio::spawn(async move { machine.accept_peer_ticket(i64::MAX).await })
            .await
            .expect("task must not panic");
        assert!(matches!(result, Err(SyncError::Core(CoreError::Validation(_)))));

        let after = store.get_configuration().await.unwrap();
        assert_eq!(after.version, before.version);
        assert_eq!(after.next_number, 2);
        assert_eq!(store.all_tickets().await.len(), 1);
    }

    #[tokio::test]
    async fn test_peer_ticket_at_upper_bound_is_accepted() {
        let (machine, store) = machine();
        machine
            .accept_peer_ticket(smartqueue_core::MAX_TICKET_NUMBER)
            .await
            .unwrap();
        assert_eq!(
            store.get_configuration().await.unwrap().next_number,
            smartqueue_core::MAX_TICKET_NUMBER + 1
        );
    }

    #[tokio::test]
    async fn test_take_number_stops_when_numbers_run_out() {
        let now = Utc::now();
        let mut config = QueueConfiguration::initial(QUEUE_CONFIG_ID, now);
        config.next_number = smartqueue_core::MAX_TICKET_NUMBER + 1;
        let store = MemoryQueueStore::with_state(config, Vec::new());
        let machine = QueueStateMachine::new(Arc::new(store.clone()));

        let err = machine.take_number().await.unwrap_err();
        assert!(matches!(err, SyncError::Core(CoreError::Validation(_))));
        assert!(store.all_tickets().await.is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_peer_ticket_is_conflict() {
        let (machine, _) = machine();
        machine.accept_peer_ticket(3).await.unwrap();

        let err = machine.accept_peer_ticket(3).await.unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Conflict);
    }

    #[tokio::test]
    async fn test_store_outage_surfaces() {
        let (machine, store) = machine();
        store.set_unavailable(true);

        let err = machine.take_number().await.unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::TransientIo);
    }
}

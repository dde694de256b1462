//! # In-Memory QueueStore
//!
//! Process-local binding of [`QueueStore`] with the same commit semantics as
//! the SQLite binding: version guard, unique active numbers, a single
//! serving ticket, all-or-nothing writes, notices after commit.
//!
//! Used by tests and demos. [`MemoryQueueStore::set_unavailable`] makes every
//! call fail with `ConnectionFailed` to exercise transient-error paths.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

use smartqueue_core::validation::{validate_patch, validate_ticket_number};
use smartqueue_core::{
    ChangeKind, CommitOutcome, QueueConfiguration, QueueMutation, Ticket, TicketStatus,
    TicketWrite, QUEUE_CONFIG_ID,
};

use crate::error::{DbError, DbResult};
use crate::feed::{ChangeFeed, ChangeSubscription, DEFAULT_FEED_CAPACITY};
use crate::store::{check_version, next_configuration, CommitEvents, QueueStore};

#[derive(Debug, Default, Clone)]
struct MemoryState {
    config: Option<QueueConfiguration>,
    tickets: Vec<Ticket>,
}

/// In-memory queue store. Clones share state.
#[derive(Debug, Clone)]
pub struct MemoryQueueStore {
    config_id: String,
    state: Arc<Mutex<MemoryState>>,
    feed: ChangeFeed,
    unavailable: Arc<AtomicBool>,
}

impl MemoryQueueStore {
    /// Creates a store without the configuration row.
    pub fn new() -> Self {
        MemoryQueueStore {
            config_id: QUEUE_CONFIG_ID.to_string(),
            state: Arc::new(Mutex::new(MemoryState::default())),
            feed: ChangeFeed::new(DEFAULT_FEED_CAPACITY),
            unavailable: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Creates a store with the configuration row at `current = 0`, `next = 1`.
    pub fn new_seeded() -> Self {
        let store = MemoryQueueStore::new();
        if let Ok(mut state) = store.state.try_lock() {
            state.config = Some(QueueConfiguration::initial(&store.config_id, Utc::now()));
        }
        store
    }

    /// Creates a store holding `config` and `tickets`.
    pub fn with_state(config: QueueConfiguration, tickets: Vec<Ticket>) -> Self {
        let store = MemoryQueueStore {
            config_id: config.id.clone(),
            ..MemoryQueueStore::new()
        };
        if let Ok(mut state) = store.state.try_lock() {
            state.config = Some(config);
            state.tickets = tickets;
        }
        store
    }

    /// Inserts the configuration row if absent. Returns `true` if created.
    pub async fn seed_configuration(&self) -> DbResult<bool> {
        self.check_available()?;
        let mut state = self.state.lock().await;
        if state.config.is_some() {
            return Ok(false);
        }
        state.config = Some(QueueConfiguration::initial(&self.config_id, Utc::now()));
        Ok(true)
    }

    /// Simulates losing (or regaining) the store.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Every ticket, any status.
    pub async fn all_tickets(&self) -> Vec<Ticket> {
        self.state.lock().await.tickets.clone()
    }

    fn check_available(&self) -> DbResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(DbError::ConnectionFailed("memory store unavailable".to_string()));
        }
        Ok(())
    }
}

impl Default for MemoryQueueStore {
    fn default() -> Self {
        MemoryQueueStore::new()
    }
}

/// Applies one ticket write to the staged ticket list.
fn apply_write(
    tickets: &mut Vec<Ticket>,
    write: &TicketWrite,
    events: &mut CommitEvents,
    inserted: &mut Vec<Ticket>,
    deleted: &mut u64,
) -> DbResult<()> {
    let now = Utc::now();
    match write {
        TicketWrite::Insert { number } => {
            validate_ticket_number(*number).map_err(|e| DbError::CheckViolation(e.to_string()))?;
            if tickets
                .iter()
                .any(|t| t.is_active() && t.ticket_number == *number)
            {
                return Err(DbError::duplicate("ticket_number", number.to_string()));
            }
            let ticket = Ticket::waiting(Uuid::new_v4().to_string(), *number, now);
            events.ticket(ChangeKind::Insert, &ticket);
            inserted.push(ticket.clone());
            tickets.push(ticket);
        }
        TicketWrite::SetStatus { id, status } => {
            if *status == TicketStatus::Serving
                && tickets
                    .iter()
                    .any(|t| t.status == TicketStatus::Serving && t.id != *id)
            {
                return Err(DbError::duplicate("status", "serving"));
            }
            let ticket = tickets
                .iter_mut()
                .find(|t| t.id == *id)
                .ok_or_else(|| DbError::not_found("Ticket", id.as_str()))?;
            ticket.transition(*status, now);
            events.ticket(ChangeKind::Update, ticket);
        }
        TicketWrite::DeleteAll => {
            *deleted += tickets.len() as u64;
            tickets.clear();
            events.cleared();
        }
    }
    Ok(())
}

#[async_trait]
impl QueueStore for MemoryQueueStore {
    async fn get_configuration(&self) -> DbResult<QueueConfiguration> {
        self.check_available()?;
        self.state
            .lock()
            .await
            .config
            .clone()
            .ok_or_else(|| DbError::not_found("QueueConfiguration", self.config_id.as_str()))
    }

    async fn list_waiting_tickets(&self) -> DbResult<Vec<Ticket>> {
        self.check_available()?;
        let state = self.state.lock().await;
        let mut waiting: Vec<Ticket> = state
            .tickets
            .iter()
            .filter(|t| t.status == TicketStatus::Waiting)
            .cloned()
            .collect();
        waiting.sort_by_key(|t| (t.ticket_number, t.created_at));
        Ok(waiting)
    }

    async fn get_serving_ticket(&self) -> DbResult<Option<Ticket>> {
        self.check_available()?;
        let state = self.state.lock().await;
        Ok(state
            .tickets
            .iter()
            .find(|t| t.status == TicketStatus::Serving)
            .cloned())
    }

    async fn commit(&self, mutation: QueueMutation) -> DbResult<CommitOutcome> {
        self.check_available()?;
        let mut state = self.state.lock().await;

        let current = state
            .config
            .clone()
            .ok_or_else(|| DbError::not_found("QueueConfiguration", self.config_id.as_str()))?;
        check_version(&current, &mutation)?;
        if let Some(patch) = mutation.effective_patch() {
            validate_patch(patch).map_err(|e| DbError::CheckViolation(e.to_string()))?;
        }

        // Stage on a copy so a failing write leaves the state untouched
        let mut tickets = state.tickets.clone();
        let mut events = CommitEvents::default();
        let mut inserted = Vec::new();
        let mut deleted = 0;
        for write in &mutation.tickets {
            apply_write(&mut tickets, write, &mut events, &mut inserted, &mut deleted)?;
        }

        let configuration = next_configuration(&current, &mutation, Utc::now());
        if mutation.effective_patch().is_some() {
            events.configuration(&configuration);
        }

        state.tickets = tickets;
        state.config = Some(configuration.clone());

        debug!(
            version = configuration.version,
            current = configuration.current_number,
            next = configuration.next_number,
            "Memory commit applied"
        );

        // Still under the lock, so notices leave in commit order
        self.feed.publish(events.into_events());

        Ok(CommitOutcome {
            configuration,
            inserted,
            deleted,
        })
    }

    fn subscribe(&self) -> ChangeSubscription {
        self.feed.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::ChangeNotice;
    use smartqueue_core::{ChangeEvent, ConfigPatch, EntityKind};

    #[tokio::test]
    async fn test_unseeded_store_reports_not_found() {
        let store = MemoryQueueStore::new();
        assert!(matches!(
            store.get_configuration().await,
            Err(DbError::NotFound { .. })
        ));

        assert!(store.seed_configuration().await.unwrap());
        assert!(!store.seed_configuration().await.unwrap());
        assert_eq!(store.get_configuration().await.unwrap().next_number, 1);
    }

    #[tokio::test]
    async fn test_waiting_tickets_sorted() {
        let store = MemoryQueueStore::new_seeded();
        store.insert_ticket(5).await.unwrap();
        store.insert_ticket(2).await.unwrap();
        store.insert_ticket(9).await.unwrap();

        let numbers: Vec<i64> = store
            .list_waiting_tickets()
            .await
            .unwrap()
            .iter()
            .map(|t| t.ticket_number)
            .collect();
        assert_eq!(numbers, vec![2, 5, 9]);
    }

    #[tokio::test]
    async fn test_failed_write_leaves_state_untouched() {
        let store = MemoryQueueStore::new_seeded();
        store.insert_ticket(1).await.unwrap();

        let result = store
            .commit(
                QueueMutation::new()
                    .insert(2)
                    .insert(1)
                    .patch(ConfigPatch::default().next(3)),
            )
            .await;

        assert!(matches!(result, Err(DbError::UniqueViolation { .. })));
        assert_eq!(store.all_tickets().await.len(), 1);
        assert_eq!(store.get_configuration().await.unwrap().next_number, 1);
    }

    #[tokio::test]
    async fn test_version_guard() {
        let store = MemoryQueueStore::new_seeded();
        let config = store.get_configuration().await.unwrap();

        store
            .update_configuration(ConfigPatch::default().next(2), Some(config.version))
            .await
            .unwrap();

        let stale = store
            .update_configuration(ConfigPatch::default().next(3), Some(config.version))
            .await;
        assert!(matches!(stale, Err(DbError::VersionConflict { .. })));
    }

    #[tokio::test]
    async fn test_single_serving_ticket() {
        let store = MemoryQueueStore::new_seeded();
        let a = store.insert_ticket(1).await.unwrap();
        let b = store.insert_ticket(2).await.unwrap();

        store.set_ticket_status(&a.id, TicketStatus::Serving).await.unwrap();
        assert!(matches!(
            store.set_ticket_status(&b.id, TicketStatus::Serving).await,
            Err(DbError::UniqueViolation { .. })
        ));
    }

    #[tokio::test]
    async fn test_unavailable_store_is_transient() {
        let store = MemoryQueueStore::new_seeded();
        store.set_unavailable(true);

        let err = store.get_configuration().await.unwrap_err();
        assert!(err.is_transient());

        store.set_unavailable(false);
        assert!(store.get_configuration().await.is_ok());
    }

    #[tokio::test]
    async fn test_reset_publishes_clear_then_config() {
        let store = MemoryQueueStore::new_seeded();
        store.insert_ticket(1).await.unwrap();
        let mut sub = store.subscribe();

        store
            .commit(
                QueueMutation::new()
                    .delete_all()
                    .patch(ConfigPatch::default().current(0).next(1)),
            )
            .await
            .unwrap();

        match sub.recv().await {
            Some(ChangeNotice::Changed(event)) => {
                assert_eq!(event.entity, EntityKind::Tickets);
                assert_eq!(event.kind, ChangeKind::Delete);
            }
            other => panic!("unexpected notice: {:?}", other),
        }
        assert!(matches!(
            sub.recv().await,
            Some(ChangeNotice::Changed(ChangeEvent { entity: EntityKind::Configuration, .. }))
        ));
    }
}

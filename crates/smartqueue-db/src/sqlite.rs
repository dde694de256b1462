//! # SQLite QueueStore
//!
//! [`QueueStore`] over [`Database`]. A commit is one SQLite transaction;
//! its change events are published only after `COMMIT` returns.

use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, warn};

use smartqueue_core::{
    ChangeKind, CommitOutcome, QueueConfiguration, QueueMutation, Ticket, TicketWrite,
};

use crate::error::{DbError, DbResult};
use crate::feed::ChangeSubscription;
use crate::pool::Database;
use crate::repository::{config, ticket};
use crate::store::{CommitEvents, QueueStore};

#[async_trait]
impl QueueStore for Database {
    async fn get_configuration(&self) -> DbResult<QueueConfiguration> {
        self.config()
            .get(self.config_id())
            .await?
            .ok_or_else(|| DbError::not_found("QueueConfiguration", self.config_id()))
    }

    async fn list_waiting_tickets(&self) -> DbResult<Vec<Ticket>> {
        self.tickets().list_waiting().await
    }

    async fn get_serving_ticket(&self) -> DbResult<Option<Ticket>> {
        self.tickets().get_serving().await
    }

    async fn commit(&self, mutation: QueueMutation) -> DbResult<CommitOutcome> {
        let _writer = self.lock_writes().await;
        let now = Utc::now();
        let id = self.config_id();

        let mut tx = self
            .pool()
            .begin()
            .await
            .map_err(|e| DbError::TransactionFailed(e.to_string()))?;

        // First statement is a write so the transaction holds the write lock
        // before it reads anything.
        if !config::claim_version(&mut *tx, id, mutation.expected_version).await? {
            return match config::fetch(&mut *tx, id).await? {
                None => Err(DbError::not_found("QueueConfiguration", id)),
                Some(current) => {
                    let expected = mutation.expected_version.unwrap_or(current.version);
                    debug!(expected, actual = current.version, "Commit version conflict");
                    Err(DbError::VersionConflict {
                        expected,
                        actual: current.version,
                    })
                }
            };
        }

        let mut events = CommitEvents::default();
        let mut inserted = Vec::new();
        let mut deleted = 0;

        for write in &mutation.tickets {
            match write {
                TicketWrite::Insert { number } => {
                    let created = ticket::insert(&mut *tx, *number, now).await?;
                    events.ticket(ChangeKind::Insert, &created);
                    inserted.push(created);
                }
                TicketWrite::SetStatus { id, status } => {
                    let updated = ticket::set_status(&mut *tx, id, *status, now).await?;
                    events.ticket(ChangeKind::Update, &updated);
                }
                TicketWrite::DeleteAll => {
                    deleted += ticket::delete_all(&mut *tx).await?;
                    events.cleared();
                }
            }
        }

        if let Some(patch) = mutation.effective_patch() {
            config::apply_patch(&mut *tx, id, patch, now).await?;
        }

        let configuration = config::fetch(&mut *tx, id)
            .await?
            .ok_or_else(|| DbError::not_found("QueueConfiguration", id))?;

        if mutation.effective_patch().is_some() {
            events.configuration(&configuration);
        }

        tx.commit()
            .await
            .map_err(|e| DbError::TransactionFailed(e.to_string()))?;

        debug!(
            version = configuration.version,
            current = configuration.current_number,
            next = configuration.next_number,
            "Commit applied"
        );

        self.feed().publish(events.into_events());

        Ok(CommitOutcome {
            configuration,
            inserted,
            deleted,
        })
    }

    fn subscribe(&self) -> ChangeSubscription {
        if self.feed().subscriber_count() == 0 {
            debug!("First change subscriber attached");
        }
        self.feed().subscribe()
    }
}

impl Database {
    /// Reads the configuration and fails if the row is missing or unreadable.
    ///
    /// Used at startup: the bridge does not run without it.
    pub async fn ensure_configuration(&self) -> DbResult<QueueConfiguration> {
        match self.get_configuration().await {
            Ok(config) => Ok(config),
            Err(e) => {
                warn!(error = %e, config_id = %self.config_id(), "Queue configuration unreadable");
                Err(e)
            }
        }
    }
}

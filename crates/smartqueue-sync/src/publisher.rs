//! # Live Update Publisher
//!
//! Pushes the recomputed queue status to every connected observer after each
//! store change. Broadcast, not per-observer diffing.
//!
//! ```text
//! ChangeSubscription ──► drain ──► observe_status() ──► broadcast::Sender
//!                                                          │
//!                                  ┌───────────────────────┼────────────┐
//!                                  ▼                       ▼            ▼
//!                              customer view          staff view    display
//! ```
//!
//! An observer that joins late first gets a snapshot from
//! [`LivePublisher::observe`], then the broadcasts. Slow observers skip what
//! they missed and resume at the newest update.

use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, warn};
use ts_rs::TS;

use smartqueue_core::DerivedQueueStatus;
use smartqueue_db::{ChangeNotice, ChangeSubscription};

use crate::error::{SyncError, SyncResult};
use crate::machine::QueueStateMachine;

/// Updates buffered per observer before it starts skipping.
pub const DEFAULT_OBSERVER_CAPACITY: usize = 64;

// =============================================================================
// Observer Payloads
// =============================================================================

/// Queue status as observers receive it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct QueueUpdate {
    /// Ticket being served (0 = none).
    pub current_number: i64,

    /// Tickets issued since the last reset.
    pub total_issued: i64,

    /// Waiting ticket numbers, ascending.
    pub next_numbers: Vec<i64>,

    /// Number of waiting tickets.
    pub waiting_count: i64,
}

impl From<&DerivedQueueStatus> for QueueUpdate {
    fn from(status: &DerivedQueueStatus) -> Self {
        QueueUpdate {
            current_number: status.current_number,
            total_issued: status.total_issued,
            next_numbers: status.waiting_numbers.clone(),
            waiting_count: status.waiting_count,
        }
    }
}

/// One WebSocket frame: `{"event":"queue_update","data":{...}}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ObserverFrame {
    QueueUpdate(QueueUpdate),
}

impl ObserverFrame {
    pub fn to_json(&self) -> SyncResult<String> {
        Ok(serde_json::to_string(self)?)
    }
}

// =============================================================================
// Publisher
// =============================================================================

/// Fans queue updates out to observers. Clones share the channel.
#[derive(Clone)]
pub struct LivePublisher {
    machine: QueueStateMachine,
    tx: broadcast::Sender<QueueUpdate>,
}

/// Handle to a running publisher loop.
#[derive(Clone)]
pub struct PublisherHandle {
    shutdown_tx: mpsc::Sender<()>,
}

impl PublisherHandle {
    /// Stops the publisher loop.
    pub async fn shutdown(&self) -> SyncResult<()> {
        self.shutdown_tx
            .send(())
            .await
            .map_err(|_| SyncError::ChannelError("Publisher shutdown channel closed".into()))
    }
}

impl LivePublisher {
    pub fn new(machine: QueueStateMachine, capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        LivePublisher { machine, tx }
    }

    /// The state machine observers act through.
    pub fn machine(&self) -> &QueueStateMachine {
        &self.machine
    }

    /// Number of connected observers.
    pub fn observer_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Joins the broadcast and returns the current snapshot.
    ///
    /// Subscribes before reading, so no update between the two is lost.
    pub async fn observe(&self) -> SyncResult<(QueueUpdate, broadcast::Receiver<QueueUpdate>)> {
        let rx = self.tx.subscribe();
        let status = self.machine.observe_status().await?;
        Ok((QueueUpdate::from(&status), rx))
    }

    /// Recomputes the status and broadcasts it.
    pub async fn publish_current(&self) -> SyncResult<QueueUpdate> {
        let status = self.machine.observe_status().await?;
        let update = QueueUpdate::from(&status);
        // No receivers is fine
        let delivered = self.tx.send(update.clone()).unwrap_or(0);
        debug!(
            observers = delivered,
            current = update.current_number,
            waiting = update.waiting_count,
            "Published queue update"
        );
        Ok(update)
    }

    /// Spawns the publish loop over `changes`.
    pub fn spawn(self, changes: ChangeSubscription) -> PublisherHandle {
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>(1);
        tokio::spawn(self.run(changes, shutdown_rx));
        PublisherHandle { shutdown_tx }
    }

    async fn run(self, mut changes: ChangeSubscription, mut shutdown_rx: mpsc::Receiver<()>) {
        info!("Live publisher starting");

        loop {
            tokio::select! {
                notice = changes.recv() => {
                    match notice {
                        Some(notice) => {
                            if let ChangeNotice::Missed(n) = notice {
                                debug!(missed = n, "Change notices lagged, re-reading");
                            }
                            changes.drain();
                            if let Err(e) = self.publish_current().await {
                                warn!(error = %e, "Failed to publish queue update");
                            }
                        }
                        None => {
                            error!("Change feed closed");
                            break;
                        }
                    }
                }

                _ = shutdown_rx.recv() => {
                    info!("Live publisher shutting down");
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use smartqueue_db::{MemoryQueueStore, QueueStore};
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::time::timeout;

    fn publisher() -> (LivePublisher, QueueStateMachine, MemoryQueueStore) {
        let store = MemoryQueueStore::new_seeded();
        let machine = QueueStateMachine::new(Arc::new(store.clone()));
        (
            LivePublisher::new(machine.clone(), DEFAULT_OBSERVER_CAPACITY),
            machine,
            store,
        )
    }

    #[test]
    fn test_frame_shape() {
        let frame = ObserverFrame::QueueUpdate(QueueUpdate {
            current_number: 1,
            total_issued: 3,
            next_numbers: vec![2, 3],
            waiting_count: 2,
        });
        let json: serde_json::Value = serde_json::from_str(&frame.to_json().unwrap()).unwrap();

        assert_eq!(json["event"], "queue_update");
        assert_eq!(json["data"]["currentNumber"], 1);
        assert_eq!(json["data"]["totalIssued"], 3);
        assert_eq!(json["data"]["nextNumbers"], serde_json::json!([2, 3]));
        assert_eq!(json["data"]["waitingCount"], 2);
    }

    #[tokio::test]
    async fn test_late_observer_gets_snapshot() {
        let (publisher, machine, _) = publisher();
        machine.take_number().await.unwrap();
        machine.take_number().await.unwrap();

        let (snapshot, _rx) = publisher.observe().await.unwrap();
        assert_eq!(snapshot.next_numbers, vec![1, 2]);
        assert_eq!(snapshot.total_issued, 2);
        assert_eq!(publisher.observer_count(), 1);
    }

    #[tokio::test]
    async fn test_every_observer_receives_broadcast() {
        let (publisher, machine, store) = publisher();
        let (_, mut first) = publisher.observe().await.unwrap();
        let (_, mut second) = publisher.observe().await.unwrap();
        let _handle = publisher.clone().spawn(store.subscribe());

        machine.take_number().await.unwrap();

        for rx in [&mut first, &mut second] {
            let update = timeout(Duration::from_secs(2), rx.recv())
                .await
                .unwrap()
                .unwrap();
            assert_eq!(update.next_numbers, vec![1]);
            assert_eq!(update.waiting_count, 1);
        }
    }

    #[tokio::test]
    async fn test_publish_without_observers() {
        let (publisher, _, _) = publisher();
        let update = publisher.publish_current().await.unwrap();
        assert_eq!(update.current_number, 0);
        assert_eq!(update.total_issued, 0);
    }
}

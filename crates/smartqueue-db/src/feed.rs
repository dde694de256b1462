//! # Change Feed
//!
//! Push notifications for every committed insert/update/delete on the
//! configuration and ticket tables.
//!
//! ## Delivery Model
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Change Feed                                     │
//! │                                                                         │
//! │  store.commit() ── durable ──► ChangeFeed::publish(events)             │
//! │                                      │                                  │
//! │                       broadcast::channel (bounded)                      │
//! │                 ┌────────────────────┼────────────────────┐             │
//! │                 ▼                    ▼                    ▼             │
//! │         ChangeSubscription   ChangeSubscription   ChangeSubscription   │
//! │         (bridge)             (publisher)          (tests)               │
//! │                                                                         │
//! │  Slow subscriber overflowed? ──► ChangeNotice::Missed(n)               │
//! │  Treat it like any change: re-read the store.                          │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! A notice is a "something changed, re-read" trigger. Every subscriber sees
//! notices in commit order.

use tokio::sync::broadcast;
use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use tracing::{trace, warn};

use smartqueue_core::ChangeEvent;

/// Default number of notices buffered per subscriber.
pub const DEFAULT_FEED_CAPACITY: usize = 256;

// =============================================================================
// Change Notice
// =============================================================================

/// What a subscriber receives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeNotice {
    /// A committed change.
    Changed(ChangeEvent),
    /// The subscriber fell behind and `n` notices were dropped.
    Missed(u64),
}

// =============================================================================
// Change Feed
// =============================================================================

/// Publishing side of the feed, owned by a store binding.
#[derive(Debug, Clone)]
pub struct ChangeFeed {
    tx: broadcast::Sender<ChangeEvent>,
}

impl ChangeFeed {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        ChangeFeed { tx }
    }

    /// Publishes the events of one commit, in order.
    ///
    /// Must only be called after the commit is durable.
    pub fn publish(&self, events: Vec<ChangeEvent>) {
        for event in events {
            trace!(
                table = event.entity.table_name(),
                kind = ?event.kind,
                "Publishing change"
            );
            // No subscribers is not an error
            let _ = self.tx.send(event);
        }
    }

    pub fn subscribe(&self) -> ChangeSubscription {
        ChangeSubscription {
            rx: self.tx.subscribe(),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for ChangeFeed {
    fn default() -> Self {
        ChangeFeed::new(DEFAULT_FEED_CAPACITY)
    }
}

// =============================================================================
// Change Subscription
// =============================================================================

/// One subscriber's view of the feed. Dropping it unsubscribes.
#[derive(Debug)]
pub struct ChangeSubscription {
    rx: broadcast::Receiver<ChangeEvent>,
}

impl ChangeSubscription {
    /// Waits for the next notice. Returns `None` once the store is gone.
    pub async fn recv(&mut self) -> Option<ChangeNotice> {
        match self.rx.recv().await {
            Ok(event) => Some(ChangeNotice::Changed(event)),
            Err(RecvError::Lagged(n)) => {
                warn!(missed = n, "Change subscriber lagged");
                Some(ChangeNotice::Missed(n))
            }
            Err(RecvError::Closed) => None,
        }
    }

    /// Discards every notice already queued and returns how many there were.
    ///
    /// Used to collapse a burst into one re-read.
    pub fn drain(&mut self) -> u64 {
        let mut drained = 0;
        loop {
            match self.rx.try_recv() {
                Ok(_) => drained += 1,
                Err(TryRecvError::Lagged(n)) => drained += n,
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => break,
            }
        }
        drained
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use smartqueue_core::{ChangeKind, EntityKind, QueueConfiguration, Ticket};

    fn config_event() -> ChangeEvent {
        ChangeEvent::configuration_updated(&QueueConfiguration::initial(
            smartqueue_core::QUEUE_CONFIG_ID,
            Utc::now(),
        ))
    }

    #[tokio::test]
    async fn test_subscribers_receive_in_order() {
        let feed = ChangeFeed::default();
        let mut first = feed.subscribe();
        let mut second = feed.subscribe();

        let ticket = Ticket::waiting("t1", 1, Utc::now());
        feed.publish(vec![ChangeEvent::ticket(ChangeKind::Insert, &ticket), config_event()]);

        for sub in [&mut first, &mut second] {
            match sub.recv().await {
                Some(ChangeNotice::Changed(event)) => assert_eq!(event.entity, EntityKind::Tickets),
                other => panic!("unexpected notice: {:?}", other),
            }
            match sub.recv().await {
                Some(ChangeNotice::Changed(event)) => {
                    assert_eq!(event.entity, EntityKind::Configuration)
                }
                other => panic!("unexpected notice: {:?}", other),
            }
        }
    }

    #[tokio::test]
    async fn test_lagging_subscriber_gets_missed_notice() {
        let feed = ChangeFeed::new(2);
        let mut sub = feed.subscribe();

        feed.publish(vec![config_event(), config_event(), config_event(), config_event()]);

        assert_eq!(sub.recv().await, Some(ChangeNotice::Missed(2)));
        assert!(matches!(sub.recv().await, Some(ChangeNotice::Changed(_))));
    }

    #[tokio::test]
    async fn test_drain_collapses_burst() {
        let feed = ChangeFeed::default();
        let mut sub = feed.subscribe();

        feed.publish(vec![config_event(), config_event(), config_event()]);

        assert!(sub.recv().await.is_some());
        assert_eq!(sub.drain(), 2);
        assert_eq!(sub.drain(), 0);
    }

    #[tokio::test]
    async fn test_drop_unsubscribes() {
        let feed = ChangeFeed::default();
        let sub = feed.subscribe();
        assert_eq!(feed.subscriber_count(), 1);

        drop(sub);
        assert_eq!(feed.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_closed_feed_ends_subscription() {
        let feed = ChangeFeed::default();
        let mut sub = feed.subscribe();
        drop(feed);
        assert_eq!(sub.recv().await, None);
    }
}

//! # Reconciliation Bridge
//!
//! Keeps the display peer's numbers converged on the queue store with as few
//! host commands as possible, and feeds peer-issued tickets back into the
//! store.
//!
//! ## Event Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                     ReconciliationBridge::run                           │
//! │                                                                         │
//! │  ChangeSubscription ──► drain burst ──► snapshot() ──► plan_update()   │
//! │                                                        │                │
//! │                                                        ▼                │
//! │                                    CALL / TAKE / QUEUE  or  RESET       │
//! │                                                        │                │
//! │                                   CommandSink (serial link) ──► peer    │
//! │                                     Ok  → SentCache::record            │
//! │                                     Err → cache entry left stale       │
//! │                                                                         │
//! │  LinkEvent::Connected ────────────► resync(): STATE, cache rebuilt     │
//! │  LinkEvent::Line("REQ") ──────────► resync()                            │
//! │  LinkEvent::Line("Nguoi tiep theo:N") ► accept_peer_ticket(N)          │
//! │  other lines ─────────────────────► logged                              │
//! │                                                                         │
//! │  heartbeat (30s) ─────────────────► log link state + cache             │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The store is always the arbiter. Notices only mean "re-read", so replayed
//! or collapsed notices are harmless: a re-read that matches the cache sends
//! nothing.

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, watch};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use smartqueue_core::reconcile::{plan_full_sync, plan_update};
use smartqueue_core::{HostCommand, PeerEvent, SentCache};
use smartqueue_db::{ChangeNotice, ChangeSubscription};

use crate::error::{ErrorKind, SyncError, SyncResult};
use crate::machine::QueueStateMachine;
use crate::serial::{LinkEvent, SerialLinkHandle};

// =============================================================================
// Command Sink
// =============================================================================

/// Where host commands go. The serial link in production.
#[async_trait]
pub trait CommandSink: Send + Sync + 'static {
    /// Hands one line to the peer. An error means the line was dropped.
    async fn send_line(&self, line: &str) -> SyncResult<()>;

    /// True while lines can be delivered.
    async fn is_ready(&self) -> bool;
}

#[async_trait]
impl CommandSink for SerialLinkHandle {
    async fn send_line(&self, line: &str) -> SyncResult<()> {
        self.send(line).await
    }

    async fn is_ready(&self) -> bool {
        self.is_connected().await
    }
}

// =============================================================================
// Bridge
// =============================================================================

/// One bridge per display peer. Owns the last-sent cache.
pub struct ReconciliationBridge<S: CommandSink> {
    machine: QueueStateMachine,
    sink: S,
    cache: SentCache,
    cache_tx: watch::Sender<SentCache>,
}

/// Handle to a running bridge.
#[derive(Clone)]
pub struct BridgeHandle {
    cache_rx: watch::Receiver<SentCache>,
    shutdown_tx: mpsc::Sender<()>,
}

impl BridgeHandle {
    /// Last values believed shown by the peer.
    pub fn cache(&self) -> SentCache {
        *self.cache_rx.borrow()
    }

    /// Stops the bridge loop.
    pub async fn shutdown(&self) -> SyncResult<()> {
        self.shutdown_tx
            .send(())
            .await
            .map_err(|_| SyncError::ChannelError("Bridge shutdown channel closed".into()))
    }
}

impl<S: CommandSink> ReconciliationBridge<S> {
    /// Creates a bridge that assumes a freshly reset peer.
    pub fn new(machine: QueueStateMachine, sink: S) -> Self {
        Self::with_cache(machine, sink, SentCache::default())
    }

    /// Creates a bridge with a known last-sent cache.
    pub fn with_cache(machine: QueueStateMachine, sink: S, cache: SentCache) -> Self {
        let (cache_tx, _) = watch::channel(cache);
        ReconciliationBridge {
            machine,
            sink,
            cache,
            cache_tx,
        }
    }

    /// Last values believed shown by the peer.
    pub fn cache(&self) -> SentCache {
        self.cache
    }

    // =========================================================================
    // Store → Peer
    // =========================================================================

    /// Re-reads the store and sends the commands whose field changed.
    ///
    /// Returns how many commands reached the link.
    pub async fn on_store_change(&mut self) -> SyncResult<usize> {
        let (config, status) = self.machine.snapshot().await?;
        let plan = plan_update(&self.cache, config.next_number, &status);

        if plan.is_empty() {
            debug!(
                current = status.current_number,
                total = status.total_issued,
                waiting = status.waiting_count,
                "Peer already up to date"
            );
            return Ok(0);
        }

        Ok(self.send_all(&plan.commands).await)
    }

    /// Sends the full state unconditionally and rebuilds the cache from it.
    pub async fn resync(&mut self) -> SyncResult<()> {
        let (_, status) = self.machine.snapshot().await?;
        let plan = plan_full_sync(&status);

        info!(
            current = status.current_number,
            total = status.total_issued,
            waiting = status.waiting_count,
            "Full resync"
        );

        if self.send_all(&plan.commands).await < plan.commands.len() {
            return Err(SyncError::NotConnected);
        }
        Ok(())
    }

    async fn send_all(&mut self, commands: &[HostCommand]) -> usize {
        let mut sent = 0;
        for command in commands {
            match self.sink.send_line(&command.to_line()).await {
                Ok(()) => {
                    self.cache.record(command);
                    sent += 1;
                }
                Err(e) => {
                    warn!(command = %command, error = %e, "Command not delivered, cache left stale");
                }
            }
        }
        self.cache_tx.send_replace(self.cache);
        sent
    }

    // =========================================================================
    // Peer → Store
    // =========================================================================

    /// Applies one line received from the peer.
    ///
    /// Malformed lines are logged and dropped; only store failures are
    /// returned.
    pub async fn on_peer_line(&mut self, line: &str) -> SyncResult<()> {
        let event = match PeerEvent::parse(line) {
            Ok(event) => event,
            Err(e) => {
                warn!(line = %line, error = %e, "Dropping malformed peer line");
                return Ok(());
            }
        };

        match event {
            PeerEvent::ResyncRequest => {
                info!("Peer requested resync");
                match self.resync().await {
                    Err(e) if e.kind() == ErrorKind::TransientIo => {
                        warn!(error = %e, "Resync not delivered");
                        Ok(())
                    }
                    other => other,
                }
            }
            PeerEvent::NewTicket(number) => {
                info!(ticket = number, "Peer issued ticket");
                self.machine.accept_peer_ticket(number).await
            }
            PeerEvent::Confirmation(msg) => {
                info!(msg = %msg, "Peer confirmation");
                Ok(())
            }
            PeerEvent::Other(msg) => {
                debug!(msg = %msg, "Ignoring peer line");
                Ok(())
            }
        }
    }

    /// Reacts to a serial link event.
    pub async fn on_link_event(&mut self, event: LinkEvent) -> SyncResult<()> {
        match event {
            LinkEvent::Connected => {
                info!("Peer connected, sending full state");
                self.resync().await
            }
            LinkEvent::Line(line) => self.on_peer_line(&line).await,
            LinkEvent::Disconnected => {
                info!("Peer disconnected");
                Ok(())
            }
        }
    }

    // =========================================================================
    // Event Loop
    // =========================================================================

    /// Spawns the bridge loop.
    ///
    /// `changes` must be subscribed before the caller's initial reads so no
    /// commit falls between them.
    pub fn spawn(
        self,
        changes: ChangeSubscription,
        link_events: mpsc::Receiver<LinkEvent>,
        heartbeat: Duration,
    ) -> BridgeHandle {
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>(1);
        let handle = BridgeHandle {
            cache_rx: self.cache_tx.subscribe(),
            shutdown_tx,
        };

        tokio::spawn(self.run(changes, link_events, heartbeat, shutdown_rx));
        handle
    }

    async fn run(
        mut self,
        mut changes: ChangeSubscription,
        mut link_events: mpsc::Receiver<LinkEvent>,
        heartbeat: Duration,
        mut shutdown_rx: mpsc::Receiver<()>,
    ) {
        info!("Reconciliation bridge starting");

        if self.sink.is_ready().await {
            if let Err(e) = self.resync().await {
                warn!(error = %e, "Initial resync failed");
            }
        }

        let mut heartbeat = interval(heartbeat);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut link_open = true;

        loop {
            tokio::select! {
                notice = changes.recv() => {
                    match notice {
                        Some(notice) => {
                            if let ChangeNotice::Missed(n) = notice {
                                debug!(missed = n, "Change notices lagged, re-reading");
                            }
                            let collapsed = changes.drain();
                            if collapsed > 0 {
                                debug!(collapsed, "Collapsed change notices");
                            }
                            if let Err(e) = self.on_store_change().await {
                                warn!(error = %e, "Failed to reconcile store change");
                            }
                        }
                        None => {
                            error!("Change feed closed");
                            break;
                        }
                    }
                }

                event = link_events.recv(), if link_open => {
                    match event {
                        Some(event) => {
                            if let Err(e) = self.on_link_event(event).await {
                                warn!(error = %e, kind = ?e.kind(), "Failed to handle link event");
                            }
                        }
                        None => {
                            warn!("Serial link stopped, continuing without peer events");
                            link_open = false;
                        }
                    }
                }

                _ = heartbeat.tick() => {
                    let link_ready = self.sink.is_ready().await;
                    info!(
                        link_ready = link_ready,
                        current = self.cache.current,
                        next = self.cache.next,
                        waiting = self.cache.waiting_count,
                        "Heartbeat"
                    );
                }

                _ = shutdown_rx.recv() => {
                    info!("Reconciliation bridge shutting down");
                    break;
                }
            }
        }

        info!("Reconciliation bridge stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use smartqueue_core::{QueueConfiguration, Ticket, TicketStatus, QUEUE_CONFIG_ID};
    use smartqueue_db::{MemoryQueueStore, QueueStore};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use tokio::sync::Mutex;

    #[derive(Clone, Default)]
    struct RecordingSink {
        lines: Arc<Mutex<Vec<String>>>,
        down: Arc<AtomicBool>,
    }

    impl RecordingSink {
        async fn take(&self) -> Vec<String> {
            std::mem::take(&mut *self.lines.lock().await)
        }

        fn set_down(&self, down: bool) {
            self.down.store(down, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl CommandSink for RecordingSink {
        async fn send_line(&self, line: &str) -> SyncResult<()> {
            if self.down.load(Ordering::SeqCst) {
                return Err(SyncError::NotConnected);
            }
            self.lines.lock().await.push(line.to_string());
            Ok(())
        }

        async fn is_ready(&self) -> bool {
            !self.down.load(Ordering::SeqCst)
        }
    }

    fn bridge(store: &MemoryQueueStore) -> (ReconciliationBridge<RecordingSink>, RecordingSink) {
        let sink = RecordingSink::default();
        let machine = QueueStateMachine::new(Arc::new(store.clone()));
        (ReconciliationBridge::new(machine, sink.clone()), sink)
    }

    #[tokio::test]
    async fn test_same_change_twice_sends_once() {
        let store = MemoryQueueStore::new_seeded();
        store
            .update_configuration(smartqueue_core::ConfigPatch::default().next(2), None)
            .await
            .unwrap();
        store.insert_ticket(1).await.unwrap();
        let (mut bridge, sink) = bridge(&store);

        assert_eq!(bridge.on_store_change().await.unwrap(), 2);
        assert_eq!(sink.take().await, vec!["TAKE 1", "QUEUE 1"]);

        assert_eq!(bridge.on_store_change().await.unwrap(), 0);
        assert!(sink.take().await.is_empty());
    }

    #[tokio::test]
    async fn test_reset_signature_sends_single_reset() {
        let store = MemoryQueueStore::new_seeded();
        let (mut bridge, sink) = bridge(&store);
        let machine = QueueStateMachine::new(Arc::new(store.clone()));
        machine.take_number().await.unwrap();
        machine.call_next().await.unwrap();
        bridge.on_store_change().await.unwrap();
        sink.take().await;

        machine.reset_queue().await.unwrap();
        bridge.on_store_change().await.unwrap();
        assert_eq!(sink.take().await, vec!["RESET"]);
        assert!(bridge.cache().is_zeroed());

        bridge.on_store_change().await.unwrap();
        assert!(sink.take().await.is_empty());
    }

    #[tokio::test]
    async fn test_only_waiting_count_changed() {
        let now = Utc::now();
        let mut config = QueueConfiguration::initial(QUEUE_CONFIG_ID, now);
        config.current_number = 3;
        config.next_number = 6;
        let mut serving = Ticket::waiting("t3", 3, now);
        serving.transition(TicketStatus::Serving, now);
        let store = MemoryQueueStore::with_state(
            config,
            vec![serving, Ticket::waiting("t4", 4, now), Ticket::waiting("t5", 5, now)],
        );
        let sink = RecordingSink::default();
        let machine = QueueStateMachine::new(Arc::new(store.clone()));
        let mut bridge = ReconciliationBridge::with_cache(
            machine,
            sink.clone(),
            SentCache {
                current: 3,
                next: 6,
                waiting_count: 2,
            },
        );

        store
            .set_ticket_status("t5", TicketStatus::Completed)
            .await
            .unwrap();
        bridge.on_store_change().await.unwrap();

        assert_eq!(sink.take().await, vec!["QUEUE 1"]);
    }

    #[tokio::test]
    async fn test_req_sends_full_state() {
        let store = MemoryQueueStore::new_seeded();
        let machine = QueueStateMachine::new(Arc::new(store.clone()));
        for _ in 0..3 {
            machine.take_number().await.unwrap();
        }
        machine.call_next().await.unwrap();
        let (mut bridge, sink) = bridge(&store);

        bridge.on_peer_line("REQ").await.unwrap();

        assert_eq!(sink.take().await, vec!["STATE current=1;total=3;waiting=2"]);
        assert_eq!(
            bridge.cache(),
            SentCache {
                current: 1,
                next: 4,
                waiting_count: 2
            }
        );
    }

    #[tokio::test]
    async fn test_peer_ticket_is_recorded() {
        let store = MemoryQueueStore::new_seeded();
        store
            .update_configuration(smartqueue_core::ConfigPatch::default().next(5), None)
            .await
            .unwrap();
        let (mut bridge, sink) = bridge(&store);

        bridge.on_peer_line("Nguoi tiep theo:7").await.unwrap();

        assert_eq!(store.get_configuration().await.unwrap().next_number, 8);
        let waiting = store.list_waiting_tickets().await.unwrap();
        assert_eq!(waiting.len(), 1);
        assert_eq!(waiting[0].ticket_number, 7);
        // Commands follow from the resulting change notice, not the line
        assert!(sink.take().await.is_empty());
    }

    #[tokio::test]
    async fn test_malformed_and_informational_lines_change_nothing() {
        let store = MemoryQueueStore::new_seeded();
        let (mut bridge, sink) = bridge(&store);
        let before = store.get_configuration().await.unwrap();

        bridge.on_peer_line("Nguoi tiep theo:abc").await.unwrap();
        bridge.on_peer_line("Nguoi tiep theo:-2").await.unwrap();
        bridge.on_peer_line("Dang phuc vu: 4").await.unwrap();
        bridge.on_peer_line("hello").await.unwrap();

        let after = store.get_configuration().await.unwrap();
        assert_eq!(after.version, before.version);
        assert!(store.all_tickets().await.is_empty());
        assert!(sink.take().await.is_empty());
    }

    #[tokio::test]
    async fn test_out_of_range_peer_ticket_changes_nothing() {
        let store = MemoryQueueStore::new_seeded();
        let (mut bridge, sink) = bridge(&store);
        let before = store.get_configuration().await.unwrap();

        bridge
            .on_peer_line("Nguoi tiep theo:9223372036854775807")
            .await
            .unwrap();
        bridge.on_peer_line("Nguoi tiep theo:1000000").await.unwrap();

        let after = store.get_configuration().await.unwrap();
        assert_eq!(after.version, before.version);
        assert_eq!(after.next_number, before.next_number);
        assert!(store.all_tickets().await.is_empty());
        assert!(sink.take().await.is_empty());
    }

    #[tokio::test]
    async fn test_undelivered_commands_are_resent() {
        let store = MemoryQueueStore::new_seeded();
        let (mut bridge, sink) = bridge(&store);
        let machine = QueueStateMachine::new(Arc::new(store.clone()));
        machine.take_number().await.unwrap();

        sink.set_down(true);
        assert_eq!(bridge.on_store_change().await.unwrap(), 0);
        assert!(bridge.cache().is_zeroed());

        sink.set_down(false);
        assert_eq!(bridge.on_store_change().await.unwrap(), 2);
        assert_eq!(sink.take().await, vec!["TAKE 1", "QUEUE 1"]);
    }

    #[tokio::test]
    async fn test_resync_while_down_reports_not_connected() {
        let store = MemoryQueueStore::new_seeded();
        let (mut bridge, sink) = bridge(&store);
        sink.set_down(true);

        assert!(matches!(bridge.resync().await, Err(SyncError::NotConnected)));
        // A REQ arriving on a dead link is not an error for the caller
        assert!(bridge.on_peer_line("REQ").await.is_ok());
    }
}

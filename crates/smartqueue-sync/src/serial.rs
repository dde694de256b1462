//! # Serial Link
//!
//! Line-oriented link to the display peer with fixed-interval reconnection.
//!
//! ## Connection Lifecycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Serial Link States                                 │
//! │                                                                         │
//! │  ┌────────────┐    connect()    ┌────────────┐                         │
//! │  │Disconnected│ ──────────────► │  Opening   │                         │
//! │  └────────────┘                 └─────┬──────┘                         │
//! │        ▲                              │                                 │
//! │        │                    success   │   failure                       │
//! │        │                        ┌─────┴─────┐                          │
//! │        │                        ▼           │                           │
//! │        │              ┌────────────┐        │                           │
//! │        │              │ Connected  │        │                           │
//! │        │              └─────┬──────┘        │                           │
//! │        │                    │               │                           │
//! │        │            close / read error      │                           │
//! │        │                    ▼               ▼                           │
//! │        └──────────────── wait reconnect_delay (fixed, default 3s)       │
//! │                                                                         │
//! │  send(line)  Connected     → written as "line\n"                        │
//! │              otherwise     → NotConnected, line dropped (never queued)  │
//! │              queue full    → LinkIo, line dropped                       │
//! │                                                                         │
//! │  events      Connected, Line(String), Disconnected                      │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Dropped lines are recovered by the peer's `REQ` resync and by the full
//! resync the bridge performs on every `Connected`.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use backoff::backoff::{Backoff, Constant};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, RwLock};
use tokio_serial::{DataBits, Parity, SerialPortBuilderExt, StopBits};
use tracing::{debug, info, trace, warn};

use smartqueue_core::{LineFramer, MAX_PEER_LINE_LEN};

use crate::config::SerialSettings;
use crate::error::{SyncError, SyncResult};

/// Read buffer size per `read` call.
const READ_CHUNK: usize = 256;

// =============================================================================
// Link State
// =============================================================================

/// Connection state of the serial link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    /// Not connected; waiting for the next attempt.
    Disconnected,
    /// Opening the device.
    Opening,
    /// Open and ready.
    Connected,
}

impl std::fmt::Display for LinkState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LinkState::Disconnected => write!(f, "disconnected"),
            LinkState::Opening => write!(f, "opening"),
            LinkState::Connected => write!(f, "connected"),
        }
    }
}

/// What the link reports to its consumer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    /// The link (re)opened.
    Connected,
    /// A complete line from the peer, without its terminator.
    Line(String),
    /// The link closed or failed.
    Disconnected,
}

// =============================================================================
// Connector
// =============================================================================

/// Byte stream to the peer.
pub trait LinkStream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> LinkStream for T {}

/// Opens the byte stream to the peer.
#[async_trait]
pub trait LinkConnector: Send + Sync + 'static {
    /// Human-readable target, for logs.
    fn describe(&self) -> String;

    /// Opens a fresh stream.
    async fn connect(&self) -> SyncResult<Box<dyn LinkStream>>;
}

/// Opens a serial device at a fixed baud rate, 8N1.
#[derive(Debug, Clone)]
pub struct SerialPortConnector {
    path: String,
    baud_rate: u32,
}

impl SerialPortConnector {
    pub fn new(path: impl Into<String>, baud_rate: u32) -> Self {
        SerialPortConnector {
            path: path.into(),
            baud_rate,
        }
    }

    pub fn from_settings(settings: &SerialSettings) -> Self {
        SerialPortConnector::new(&settings.path, settings.baud_rate)
    }
}

#[async_trait]
impl LinkConnector for SerialPortConnector {
    fn describe(&self) -> String {
        format!("{}@{}", self.path, self.baud_rate)
    }

    async fn connect(&self) -> SyncResult<Box<dyn LinkStream>> {
        let stream = tokio_serial::new(&self.path, self.baud_rate)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .open_native_async()
            .map_err(|e| SyncError::LinkOpenFailed {
                path: self.path.clone(),
                reason: e.to_string(),
            })?;
        Ok(Box::new(stream))
    }
}

// =============================================================================
// Link Configuration
// =============================================================================

/// Configuration for the serial link driver.
#[derive(Debug, Clone)]
pub struct SerialLinkConfig {
    /// Fixed delay between connection attempts.
    pub reconnect_delay: Duration,

    /// Longest line kept by the framer.
    pub max_line_len: usize,

    /// Buffered outgoing lines and events.
    pub channel_capacity: usize,
}

impl Default for SerialLinkConfig {
    fn default() -> Self {
        SerialLinkConfig {
            reconnect_delay: Duration::from_secs(3),
            max_line_len: MAX_PEER_LINE_LEN,
            channel_capacity: 64,
        }
    }
}

impl From<&SerialSettings> for SerialLinkConfig {
    fn from(settings: &SerialSettings) -> Self {
        SerialLinkConfig {
            reconnect_delay: settings.reconnect_delay(),
            max_line_len: settings.max_line_len,
            ..SerialLinkConfig::default()
        }
    }
}

// =============================================================================
// Link Handle
// =============================================================================

/// Handle for writing to the link. The only write path to the peer.
#[derive(Clone)]
pub struct SerialLinkHandle {
    outgoing_tx: mpsc::Sender<String>,
    state: Arc<RwLock<LinkState>>,
    shutdown_tx: mpsc::Sender<()>,
}

impl SerialLinkHandle {
    /// Hands `line` to the open link without waiting.
    ///
    /// Fails with [`SyncError::NotConnected`] while the link is down; the
    /// line is dropped, not queued. A full outgoing queue also drops the line
    /// and fails with [`SyncError::LinkIo`]. The link task may itself be
    /// waiting on the caller to drain link events, so this never blocks.
    pub async fn send(&self, line: &str) -> SyncResult<()> {
        let state = *self.state.read().await;
        if state != LinkState::Connected {
            warn!(line = %line, state = %state, "Cannot send, serial link not connected");
            return Err(SyncError::NotConnected);
        }

        match self.outgoing_tx.try_send(line.to_string()) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(line)) => {
                warn!(line = %line, "Outgoing queue full, dropping line");
                Err(SyncError::LinkIo("outgoing queue full".into()))
            }
            Err(TrySendError::Closed(_)) => {
                Err(SyncError::ChannelError("Serial link task stopped".into()))
            }
        }
    }

    /// Returns the current link state.
    pub async fn state(&self) -> LinkState {
        *self.state.read().await
    }

    /// Returns true if currently connected.
    pub async fn is_connected(&self) -> bool {
        *self.state.read().await == LinkState::Connected
    }

    /// Closes the link and stops reconnecting.
    pub async fn shutdown(&self) -> SyncResult<()> {
        self.shutdown_tx
            .send(())
            .await
            .map_err(|_| SyncError::ChannelError("Failed to send shutdown signal".into()))
    }
}

// =============================================================================
// Serial Link Driver
// =============================================================================

enum LoopExit {
    /// The stream ended or failed; reconnect.
    Closed,
    /// Shutdown requested or the consumer went away.
    Stop,
}

/// Serial link driver with fixed-interval reconnection.
///
/// ## Usage
/// ```rust,ignore
/// let connector = Arc::new(SerialPortConnector::new("COM4", 57600));
/// let (link, mut events) = SerialLink::spawn(connector, SerialLinkConfig::default());
///
/// while let Some(event) = events.recv().await {
///     if let LinkEvent::Line(line) = event {
///         println!("peer: {line}");
///     }
/// }
/// ```
pub struct SerialLink {
    connector: Arc<dyn LinkConnector>,
    config: SerialLinkConfig,
    state: Arc<RwLock<LinkState>>,
    outgoing_rx: mpsc::Receiver<String>,
    events_tx: mpsc::Sender<LinkEvent>,
    shutdown_rx: mpsc::Receiver<()>,
}

impl SerialLink {
    /// Creates the link and spawns its background task.
    ///
    /// Returns a handle for sending lines and a receiver for link events.
    pub fn spawn(
        connector: Arc<dyn LinkConnector>,
        config: SerialLinkConfig,
    ) -> (SerialLinkHandle, mpsc::Receiver<LinkEvent>) {
        let (outgoing_tx, outgoing_rx) = mpsc::channel::<String>(config.channel_capacity);
        let (events_tx, events_rx) = mpsc::channel::<LinkEvent>(config.channel_capacity);
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>(1);
        let state = Arc::new(RwLock::new(LinkState::Disconnected));

        let link = SerialLink {
            connector,
            config,
            state: state.clone(),
            outgoing_rx,
            events_tx,
            shutdown_rx,
        };

        tokio::spawn(link.run());

        let handle = SerialLinkHandle {
            outgoing_tx,
            state,
            shutdown_tx,
        };

        (handle, events_rx)
    }

    /// Main link loop.
    async fn run(mut self) {
        let target = self.connector.describe();
        info!(target = %target, "Serial link starting");

        let mut backoff = Constant::new(self.config.reconnect_delay);

        loop {
            *self.state.write().await = LinkState::Opening;
            debug!(target = %target, "Opening serial link");

            match self.connector.connect().await {
                Ok(stream) => {
                    self.discard_pending("stale");
                    *self.state.write().await = LinkState::Connected;
                    info!(target = %target, "Serial link connected");
                    backoff.reset();

                    if self.events_tx.send(LinkEvent::Connected).await.is_err() {
                        break;
                    }

                    let exit = self.connection_loop(stream).await;

                    *self.state.write().await = LinkState::Disconnected;
                    self.discard_pending("unsent");

                    match exit {
                        Ok(LoopExit::Stop) => break,
                        Ok(LoopExit::Closed) => info!(target = %target, "Serial link closed"),
                        Err(e) => warn!(target = %target, error = %e, "Serial link failed"),
                    }

                    if self.events_tx.send(LinkEvent::Disconnected).await.is_err() {
                        break;
                    }
                }
                Err(e) => {
                    *self.state.write().await = LinkState::Disconnected;
                    warn!(target = %target, error = %e, "Failed to open serial link");
                }
            }

            let delay = backoff
                .next_backoff()
                .unwrap_or(self.config.reconnect_delay);
            debug!(?delay, "Waiting before reconnect");

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = self.shutdown_rx.recv() => {
                    info!("Shutdown during reconnect wait");
                    break;
                }
            }
        }

        *self.state.write().await = LinkState::Disconnected;
        info!(target = %target, "Serial link stopped");
    }

    /// Pumps one open stream until it ends.
    async fn connection_loop(&mut self, stream: Box<dyn LinkStream>) -> SyncResult<LoopExit> {
        let (mut reader, mut writer) = tokio::io::split(stream);
        let mut framer = LineFramer::new(self.config.max_line_len);
        let mut buf = [0u8; READ_CHUNK];

        loop {
            tokio::select! {
                Some(line) = self.outgoing_rx.recv() => {
                    writer.write_all(line.as_bytes()).await?;
                    writer.write_all(b"\n").await?;
                    writer.flush().await?;
                    info!(line = %line, "Sent to peer");
                }

                read = reader.read(&mut buf) => {
                    let n = read?;
                    if n == 0 {
                        return Ok(LoopExit::Closed);
                    }
                    trace!(raw = %String::from_utf8_lossy(&buf[..n]).escape_debug(), "Serial bytes");

                    let overflows = framer.overflows();
                    for line in framer.push(&buf[..n]) {
                        debug!(line = %line, "Received from peer");
                        if self.events_tx.send(LinkEvent::Line(line)).await.is_err() {
                            return Ok(LoopExit::Stop);
                        }
                    }
                    if framer.overflows() > overflows {
                        warn!(max = self.config.max_line_len, "Discarded over-long peer line");
                    }
                }

                _ = self.shutdown_rx.recv() => {
                    info!("Shutdown signal received, closing serial link");
                    let _ = writer.shutdown().await;
                    return Ok(LoopExit::Stop);
                }
            }
        }
    }

    /// Drops lines queued for a connection that no longer exists.
    fn discard_pending(&mut self, reason: &str) {
        while let Ok(line) = self.outgoing_rx.try_recv() {
            warn!(line = %line, reason, "Discarding line not written to peer");
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::collections::VecDeque;
    use tokio::io::{AsyncBufReadExt, BufReader, DuplexStream};
    use tokio::sync::Mutex;
    use tokio::time::timeout;

    /// Hands out scripted streams; `None` entries (or an empty script) fail.
    pub(crate) struct ScriptedConnector {
        streams: Mutex<VecDeque<Option<DuplexStream>>>,
    }

    impl ScriptedConnector {
        pub(crate) fn new(streams: Vec<Option<DuplexStream>>) -> Self {
            ScriptedConnector {
                streams: Mutex::new(streams.into()),
            }
        }
    }

    #[async_trait]
    impl LinkConnector for ScriptedConnector {
        fn describe(&self) -> String {
            "scripted".to_string()
        }

        async fn connect(&self) -> SyncResult<Box<dyn LinkStream>> {
            match self.streams.lock().await.pop_front() {
                Some(Some(stream)) => Ok(Box::new(stream)),
                _ => Err(SyncError::LinkOpenFailed {
                    path: "scripted".into(),
                    reason: "no device".into(),
                }),
            }
        }
    }

    pub(crate) fn fast_config() -> SerialLinkConfig {
        SerialLinkConfig {
            reconnect_delay: Duration::from_millis(20),
            ..SerialLinkConfig::default()
        }
    }

    async fn next_event(events: &mut mpsc::Receiver<LinkEvent>) -> LinkEvent {
        timeout(Duration::from_secs(2), events.recv())
            .await
            .expect("timed out waiting for link event")
            .expect("link event channel closed")
    }

    #[test]
    fn test_link_state_display() {
        assert_eq!(LinkState::Connected.to_string(), "connected");
        assert_eq!(LinkState::Opening.to_string(), "opening");
    }

    #[test]
    fn test_link_config_from_settings() {
        let settings = SerialSettings {
            reconnect_delay_ms: 500,
            max_line_len: 64,
            ..SerialSettings::default()
        };
        let config = SerialLinkConfig::from(&settings);
        assert_eq!(config.reconnect_delay, Duration::from_millis(500));
        assert_eq!(config.max_line_len, 64);
    }

    #[tokio::test]
    async fn test_send_while_disconnected_is_dropped() {
        let connector = Arc::new(ScriptedConnector::new(vec![]));
        let (link, _events) = SerialLink::spawn(connector, fast_config());

        let err = link.send("CALL 1").await.unwrap_err();
        assert!(matches!(err, SyncError::NotConnected));
        link.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_lines_in_both_directions() {
        let (host, peer) = tokio::io::duplex(1024);
        let connector = Arc::new(ScriptedConnector::new(vec![Some(host)]));
        let (link, mut events) = SerialLink::spawn(connector, fast_config());

        assert_eq!(next_event(&mut events).await, LinkEvent::Connected);
        assert!(link.is_connected().await);

        let (peer_read, mut peer_write) = tokio::io::split(peer);
        peer_write.write_all(b"REQ\r\nNguoi tiep").await.unwrap();
        peer_write.write_all(b" theo:5\n\n").await.unwrap();

        assert_eq!(next_event(&mut events).await, LinkEvent::Line("REQ".into()));
        assert_eq!(
            next_event(&mut events).await,
            LinkEvent::Line("Nguoi tiep theo:5".into())
        );

        link.send("CALL 3").await.unwrap();
        let mut lines = BufReader::new(peer_read).lines();
        let received = timeout(Duration::from_secs(2), lines.next_line())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(received.as_deref(), Some("CALL 3"));

        link.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_reconnects_after_close_and_failed_open() {
        let (first, first_peer) = tokio::io::duplex(256);
        let (second, _second_peer) = tokio::io::duplex(256);
        let connector = Arc::new(ScriptedConnector::new(vec![
            Some(first),
            None,
            Some(second),
        ]));
        let (link, mut events) = SerialLink::spawn(connector, fast_config());

        assert_eq!(next_event(&mut events).await, LinkEvent::Connected);
        drop(first_peer);
        assert_eq!(next_event(&mut events).await, LinkEvent::Disconnected);
        assert!(!link.is_connected().await);

        // The failed open in between produces no event
        assert_eq!(next_event(&mut events).await, LinkEvent::Connected);
        assert!(link.is_connected().await);

        link.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_over_long_line_is_discarded() {
        let (host, mut peer) = tokio::io::duplex(1024);
        let connector = Arc::new(ScriptedConnector::new(vec![Some(host)]));
        let config = SerialLinkConfig {
            max_line_len: 8,
            ..fast_config()
        };
        let (link, mut events) = SerialLink::spawn(connector, config);
        assert_eq!(next_event(&mut events).await, LinkEvent::Connected);

        peer.write_all(b"XXXXXXXXXXXXXXXX\nREQ\n").await.unwrap();
        assert_eq!(next_event(&mut events).await, LinkEvent::Line("REQ".into()));

        link.shutdown().await.unwrap();
    }
}

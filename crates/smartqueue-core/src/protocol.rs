//! # Serial Line Protocol
//!
//! Text protocol spoken with the display peer, one message per `\n`-terminated
//! line.
//!
//! ## Protocol Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Display Line Protocol                              │
//! │                                                                         │
//! │  HOST → PEER                                                           │
//! │  ───────────                                                           │
//! │  STATE current=<n>;total=<n>;waiting=<n>   full sync                   │
//! │  CALL <n>                                  current number changed      │
//! │  TAKE <n>                                  total issued changed        │
//! │  QUEUE <n>                                 waiting count changed       │
//! │  RESET                                     epoch reset                 │
//! │                                                                         │
//! │  PEER → HOST                                                           │
//! │  ───────────                                                           │
//! │  REQ                                       resync request              │
//! │  Nguoi tiep theo:<n>                       peer issued ticket <n>      │
//! │  Dang phuc vu:… / Cap nhat hang cho:…      confirmations (log only)    │
//! │  Dong bo… / Da reset…                                                  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::fmt;

use crate::error::{CoreError, CoreResult};
use crate::types::DerivedQueueStatus;
use crate::validation::validate_ticket_number;

/// Line sent by the peer to ask for a full resync.
pub const RESYNC_REQUEST: &str = "REQ";

/// Prefix of a peer-issued ticket line ("next person:").
pub const PEER_TICKET_PREFIX: &str = "Nguoi tiep theo:";

/// Prefixes of the peer's informational confirmations.
pub const CONFIRMATION_PREFIXES: &[&str] = &[
    "Dang phuc vu:",      // now serving
    "Cap nhat hang cho:", // waiting count updated
    "Dong bo",            // synchronized
    "Da reset",           // reset done
];

// =============================================================================
// Host → Peer
// =============================================================================

/// A command written to the display peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostCommand {
    /// Full state, sent on resync.
    State {
        current: i64,
        total: i64,
        waiting: i64,
    },
    /// Current number changed.
    Call(i64),
    /// Total issued changed.
    Take(i64),
    /// Waiting count changed.
    Queue(i64),
    /// The queue was reset.
    Reset,
}

impl HostCommand {
    /// The full-sync command for a derived status.
    pub fn full_state(status: &DerivedQueueStatus) -> Self {
        HostCommand::State {
            current: status.current_number,
            total: status.total_issued,
            waiting: status.waiting_count,
        }
    }

    /// The line to write, without the terminator.
    pub fn to_line(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for HostCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HostCommand::State {
                current,
                total,
                waiting,
            } => write!(f, "STATE current={current};total={total};waiting={waiting}"),
            HostCommand::Call(n) => write!(f, "CALL {n}"),
            HostCommand::Take(n) => write!(f, "TAKE {n}"),
            HostCommand::Queue(n) => write!(f, "QUEUE {n}"),
            HostCommand::Reset => f.write_str("RESET"),
        }
    }
}

// =============================================================================
// Peer → Host
// =============================================================================

/// An event received from the display peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerEvent {
    /// The peer wants the full state.
    ResyncRequest,
    /// The peer issued a ticket with this number.
    NewTicket(i64),
    /// Informational confirmation; no state effect.
    Confirmation(String),
    /// Anything else; logged only.
    Other(String),
}

impl PeerEvent {
    /// Parses one received line.
    ///
    /// Only a ticket line with a bad number is an error; unrecognized lines
    /// come back as [`PeerEvent::Other`].
    pub fn parse(line: &str) -> CoreResult<Self> {
        let msg = line.trim();

        if msg == RESYNC_REQUEST {
            return Ok(PeerEvent::ResyncRequest);
        }

        if let Some(payload) = msg.strip_prefix(PEER_TICKET_PREFIX) {
            let number: i64 = payload
                .trim()
                .parse()
                .map_err(|_| CoreError::malformed(msg, "ticket number is not an integer"))?;
            validate_ticket_number(number).map_err(|e| CoreError::malformed(msg, e.to_string()))?;
            return Ok(PeerEvent::NewTicket(number));
        }

        if CONFIRMATION_PREFIXES.iter().any(|p| msg.starts_with(p)) {
            return Ok(PeerEvent::Confirmation(msg.to_string()));
        }

        Ok(PeerEvent::Other(msg.to_string()))
    }
}

// =============================================================================
// Line Framing
// =============================================================================

/// Splits a byte stream into `\n`-terminated lines.
///
/// Partial lines stay buffered until their terminator arrives. A trailing
/// `\r` is stripped and blank lines are skipped. A partial line longer than
/// `max_line_len` is discarded up to the next terminator.
#[derive(Debug)]
pub struct LineFramer {
    buf: Vec<u8>,
    max_line_len: usize,
    discarding: bool,
    overflows: u64,
}

impl LineFramer {
    pub fn new(max_line_len: usize) -> Self {
        LineFramer {
            buf: Vec::with_capacity(max_line_len.min(1024)),
            max_line_len,
            discarding: false,
            overflows: 0,
        }
    }

    /// Feeds received bytes and returns every line they completed.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        let mut lines = Vec::new();

        for &byte in bytes {
            if byte == b'\n' {
                if self.discarding {
                    self.discarding = false;
                } else if let Some(line) = self.take_line() {
                    lines.push(line);
                }
                self.buf.clear();
                continue;
            }

            if self.discarding {
                continue;
            }

            if self.buf.len() >= self.max_line_len {
                self.buf.clear();
                self.discarding = true;
                self.overflows += 1;
                continue;
            }

            self.buf.push(byte);
        }

        lines
    }

    /// Bytes of the current unterminated line.
    pub fn pending(&self) -> usize {
        self.buf.len()
    }

    /// Number of over-long lines dropped so far.
    pub fn overflows(&self) -> u64 {
        self.overflows
    }

    /// Drops any partial line (used when the connection is lost).
    pub fn clear(&mut self) {
        self.buf.clear();
        self.discarding = false;
    }

    fn take_line(&self) -> Option<String> {
        let raw = String::from_utf8_lossy(&self.buf);
        let line = raw.trim_end_matches('\r').trim();
        if line.is_empty() {
            None
        } else {
            Some(line.to_string())
        }
    }
}

impl Default for LineFramer {
    fn default() -> Self {
        LineFramer::new(crate::MAX_PEER_LINE_LEN)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_host_command_lines() {
        let state = HostCommand::State {
            current: 1,
            total: 3,
            waiting: 2,
        };
        assert_eq!(state.to_line(), "STATE current=1;total=3;waiting=2");
        assert_eq!(HostCommand::Call(4).to_line(), "CALL 4");
        assert_eq!(HostCommand::Take(9).to_line(), "TAKE 9");
        assert_eq!(HostCommand::Queue(0).to_line(), "QUEUE 0");
        assert_eq!(HostCommand::Reset.to_line(), "RESET");
    }

    #[test]
    fn test_peer_event_parse() {
        assert_eq!(PeerEvent::parse("REQ").unwrap(), PeerEvent::ResyncRequest);
        assert_eq!(PeerEvent::parse(" REQ \r").unwrap(), PeerEvent::ResyncRequest);
        assert_eq!(
            PeerEvent::parse("Nguoi tiep theo: 7").unwrap(),
            PeerEvent::NewTicket(7)
        );
        assert!(matches!(
            PeerEvent::parse("Dang phuc vu: 3").unwrap(),
            PeerEvent::Confirmation(_)
        ));
        assert!(matches!(
            PeerEvent::parse("boot ok").unwrap(),
            PeerEvent::Other(_)
        ));
    }

    #[test]
    fn test_peer_ticket_must_be_positive_integer() {
        assert!(matches!(
            PeerEvent::parse("Nguoi tiep theo:abc"),
            Err(CoreError::MalformedPeerMessage { .. })
        ));
        assert!(matches!(
            PeerEvent::parse("Nguoi tiep theo:0"),
            Err(CoreError::MalformedPeerMessage { .. })
        ));
        assert!(PeerEvent::parse("Nguoi tiep theo:").is_err());
        assert!(matches!(
            PeerEvent::parse("Nguoi tiep theo:9223372036854775807"),
            Err(CoreError::MalformedPeerMessage { .. })
        ));
        assert!(matches!(
            PeerEvent::parse("Nguoi tiep theo:1000000"),
            Err(CoreError::MalformedPeerMessage { .. })
        ));
    }

    #[test]
    fn test_framer_buffers_partial_lines() {
        let mut framer = LineFramer::default();

        assert!(framer.push(b"RE").is_empty());
        assert_eq!(framer.pending(), 2);

        let lines = framer.push(b"Q\r\nNguoi tiep theo:5\nDang");
        assert_eq!(lines, vec!["REQ".to_string(), "Nguoi tiep theo:5".to_string()]);
        assert_eq!(framer.pending(), 4);
    }

    #[test]
    fn test_framer_skips_blank_lines() {
        let mut framer = LineFramer::default();
        assert_eq!(framer.push(b"\n\r\nREQ\n"), vec!["REQ".to_string()]);
    }

    #[test]
    fn test_framer_discards_overlong_line() {
        let mut framer = LineFramer::new(8);
        let lines = framer.push(b"0123456789abcdef\nREQ\n");
        assert_eq!(lines, vec!["REQ".to_string()]);
        assert_eq!(framer.overflows(), 1);
    }
}

//! # Reconciliation Planner
//!
//! Decides which host commands bring the display peer from what it was last
//! told to the current [`DerivedQueueStatus`].
//!
//! ## Planning Rules
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         plan_update()                                   │
//! │                                                                         │
//! │  current == 0 && next == 1 ?  (reset signature)                         │
//! │     ├── yes: cache already zeroed? ── yes ──► nothing                   │
//! │     │                              └─ no ───► RESET                     │
//! │     └── no:                                                             │
//! │          current  != cache.current       ──► CALL <current>             │
//! │          next     != cache.next          ──► TAKE <next - 1>            │
//! │          waiting  != cache.waiting_count ──► QUEUE <waiting>            │
//! │                                                                         │
//! │  plan_full_sync(): always STATE current=..;total=..;waiting=..          │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Planning is pure. The caller applies [`SentCache::record`] for each
//! command it actually handed to the link, so a command lost while the link
//! was down is planned again on the next change.

use serde::{Deserialize, Serialize};

use crate::protocol::HostCommand;
use crate::types::DerivedQueueStatus;
use crate::FIRST_TICKET_NUMBER;

/// The last values believed to be shown by the display peer.
///
/// Untrusted: a full resync rebuilds it from the store at any time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SentCache {
    pub current: i64,
    pub next: i64,
    pub waiting_count: i64,
}

impl Default for SentCache {
    fn default() -> Self {
        SentCache {
            current: 0,
            next: FIRST_TICKET_NUMBER,
            waiting_count: 0,
        }
    }
}

impl SentCache {
    /// Cache contents after the peer was told exactly `status`.
    pub fn from_status(status: &DerivedQueueStatus) -> Self {
        SentCache {
            current: status.current_number,
            next: status.total_issued + 1,
            waiting_count: status.waiting_count,
        }
    }

    /// True when the cache matches a freshly reset peer.
    pub fn is_zeroed(&self) -> bool {
        *self == SentCache::default()
    }

    /// Records that `command` was handed to the link.
    pub fn record(&mut self, command: &HostCommand) {
        match *command {
            HostCommand::State {
                current,
                total,
                waiting,
            } => {
                self.current = current;
                self.next = total + 1;
                self.waiting_count = waiting;
            }
            HostCommand::Call(current) => self.current = current,
            HostCommand::Take(total) => self.next = total + 1,
            HostCommand::Queue(waiting) => self.waiting_count = waiting,
            HostCommand::Reset => *self = SentCache::default(),
        }
    }
}

/// Commands to send and the cache that results if all of them are sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcilePlan {
    pub commands: Vec<HostCommand>,
    pub next_cache: SentCache,
}

impl ReconcilePlan {
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    fn from_commands(cache: &SentCache, commands: Vec<HostCommand>) -> Self {
        let mut next_cache = *cache;
        for command in &commands {
            next_cache.record(command);
        }
        ReconcilePlan {
            commands,
            next_cache,
        }
    }
}

/// Plans the minimal commands for a store change.
///
/// `next_number` is the configuration's `next_number`; together with
/// `status.current_number` it identifies the reset signature.
///
/// A reset signature sends RESET only while the cache is not already zeroed,
/// so a replayed reset notice sends nothing.
pub fn plan_update(cache: &SentCache, next_number: i64, status: &DerivedQueueStatus) -> ReconcilePlan {
    if status.current_number == 0 && next_number == FIRST_TICKET_NUMBER {
        let commands = if cache.is_zeroed() {
            Vec::new()
        } else {
            vec![HostCommand::Reset]
        };
        return ReconcilePlan::from_commands(cache, commands);
    }

    let mut commands = Vec::with_capacity(3);
    if status.current_number != cache.current {
        commands.push(HostCommand::Call(status.current_number));
    }
    if next_number != cache.next {
        commands.push(HostCommand::Take(next_number - 1));
    }
    if status.waiting_count != cache.waiting_count {
        commands.push(HostCommand::Queue(status.waiting_count));
    }

    ReconcilePlan::from_commands(cache, commands)
}

/// Plans an unconditional full resync, ignoring the cache.
pub fn plan_full_sync(status: &DerivedQueueStatus) -> ReconcilePlan {
    ReconcilePlan {
        commands: vec![HostCommand::full_state(status)],
        next_cache: SentCache::from_status(status),
    }
}

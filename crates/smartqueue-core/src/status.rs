//! # Status Derivation
//!
//! The one authoritative recomputation from store state to the shape every
//! sink (display peer, observers) consumes.

use crate::types::{DerivedQueueStatus, QueueConfiguration, Ticket, TicketStatus};

/// Derives the external queue view from a configuration read and a
/// waiting-ticket read.
///
/// Non-waiting tickets in `waiting` are ignored and the numbers are sorted
/// ascending, so callers may pass any ticket listing.
pub fn derive_status(config: &QueueConfiguration, waiting: &[Ticket]) -> DerivedQueueStatus {
    let mut waiting_numbers: Vec<i64> = waiting
        .iter()
        .filter(|ticket| ticket.status == TicketStatus::Waiting)
        .map(|ticket| ticket.ticket_number)
        .collect();
    waiting_numbers.sort_unstable();

    DerivedQueueStatus {
        current_number: config.current_number,
        total_issued: config.total_issued(),
        waiting_count: waiting_numbers.len() as i64,
        waiting_numbers,
    }
}

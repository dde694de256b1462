//! # Validation
//!
//! Number rules for tickets and the configuration singleton.

use crate::error::ValidationError;
use crate::types::{ConfigPatch, QueueConfiguration};
use crate::MAX_TICKET_NUMBER;

/// Ticket numbers are integers in `1..=MAX_TICKET_NUMBER`.
pub fn validate_ticket_number(number: i64) -> Result<(), ValidationError> {
    if number < 1 {
        return Err(ValidationError::MustBePositive {
            field: "ticket_number".to_string(),
            value: number,
        });
    }
    if number > MAX_TICKET_NUMBER {
        return Err(ValidationError::TooLarge {
            field: "ticket_number".to_string(),
            value: number,
            max: MAX_TICKET_NUMBER,
        });
    }
    Ok(())
}

/// Checks a configuration patch before it reaches the store.
pub fn validate_patch(patch: &ConfigPatch) -> Result<(), ValidationError> {
    if let Some(current) = patch.current_number {
        if current < 0 {
            return Err(ValidationError::Negative {
                field: "current_number".to_string(),
                value: current,
            });
        }
    }
    if let Some(next) = patch.next_number {
        if next < 1 {
            return Err(ValidationError::MustBePositive {
                field: "next_number".to_string(),
                value: next,
            });
        }
        if next > MAX_TICKET_NUMBER + 1 {
            return Err(ValidationError::TooLarge {
                field: "next_number".to_string(),
                value: next,
                max: MAX_TICKET_NUMBER + 1,
            });
        }
    }
    Ok(())
}

/// Checks the configuration invariants.
///
/// `NextBehindCurrent` is reported once a ticket has been served and
/// `next_number` is not past it. Peer-issued numbers can legitimately cause
/// this, so callers log it rather than reject the state.
pub fn validate_configuration(config: &QueueConfiguration) -> Result<(), ValidationError> {
    validate_patch(
        &ConfigPatch::default()
            .current(config.current_number)
            .next(config.next_number),
    )?;

    if config.current_number > 0 && config.next_number <= config.current_number {
        return Err(ValidationError::NextBehindCurrent {
            current: config.current_number,
            next: config.next_number,
        });
    }
    Ok(())
}

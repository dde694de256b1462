//! # Error Types
//!
//! Domain-specific error types for smartqueue-core.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Error Types                                     │
//! │                                                                         │
//! │  smartqueue-core errors (this file)                                    │
//! │  ├── CoreError        - Queue rule violations, malformed peer lines    │
//! │  └── ValidationError  - Input validation failures                      │
//! │                                                                         │
//! │  smartqueue-db errors (separate crate)                                 │
//! │  └── DbError          - Store failures (NotFound, Conflict, I/O)       │
//! │                                                                         │
//! │  smartqueue-sync errors (separate crate)                               │
//! │  └── SyncError        - Link, config, and the error taxonomy           │
//! │                                                                         │
//! │  Flow: ValidationError → CoreError → SyncError → ApiError → Observer   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use thiserror::Error;

// =============================================================================
// Core Error
// =============================================================================

/// Core queue logic errors.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Staff asked for the next ticket while nobody is waiting.
    ///
    /// ## When This Occurs
    /// - `call_next` with an empty waiting set
    ///
    /// The queue is left untouched; the caller shows a non-fatal notice.
    #[error("No ticket is waiting")]
    EmptyQueue,

    /// A line from the display peer could not be understood.
    ///
    /// These are logged and dropped by the bridge, never propagated.
    #[error("Malformed peer message {line:?}: {reason}")]
    MalformedPeerMessage { line: String, reason: String },

    /// Validation error (wraps ValidationError).
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
}

impl CoreError {
    /// Creates a MalformedPeerMessage error.
    pub fn malformed(line: impl Into<String>, reason: impl Into<String>) -> Self {
        CoreError::MalformedPeerMessage {
            line: line.into(),
            reason: reason.into(),
        }
    }
}

// =============================================================================
// Validation Error
// =============================================================================

/// Input validation errors.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// Value must be positive.
    #[error("{field} must be positive, got {value}")]
    MustBePositive { field: String, value: i64 },

    /// Value is above the largest allowed number.
    #[error("{field} must be at most {max}, got {value}")]
    TooLarge { field: String, value: i64, max: i64 },

    /// Value must not be negative.
    #[error("{field} must not be negative, got {value}")]
    Negative { field: String, value: i64 },

    /// `next_number` fell behind the number being served.
    #[error("next_number {next} must be greater than current_number {current}")]
    NextBehindCurrent { current: i64, next: i64 },
}

// =============================================================================
// Result Type Alias
// =============================================================================

/// Convenience type alias for Results with CoreError.
pub type CoreResult<T> = Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        assert_eq!(CoreError::EmptyQueue.to_string(), "No ticket is waiting");

        let err = CoreError::malformed("Nguoi tiep theo:abc", "ticket number is not an integer");
        assert_eq!(
            err.to_string(),
            "Malformed peer message \"Nguoi tiep theo:abc\": ticket number is not an integer"
        );
    }

    #[test]
    fn test_validation_converts_to_core_error() {
        let validation_err = ValidationError::MustBePositive {
            field: "ticket_number".to_string(),
            value: 0,
        };
        let core_err: CoreError = validation_err.into();
        assert!(matches!(core_err, CoreError::Validation(_)));
    }
}

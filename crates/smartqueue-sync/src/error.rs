//! # Sync Error Types
//!
//! Error types for the synchronization layer.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Sync Error Categories                             │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────┐ │
//! │  │  Configuration  │  │   Serial Link   │  │     Queue               │ │
//! │  │                 │  │                 │  │                         │ │
//! │  │  InvalidConfig  │  │  LinkOpenFailed │  │  EmptyQueue             │ │
//! │  │  ConfigLoad     │  │  NotConnected   │  │  Contended              │ │
//! │  │  ConfigSave     │  │  LinkIo         │  │  MalformedPeerMessage   │ │
//! │  └─────────────────┘  └─────────────────┘  └─────────────────────────┘ │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐                              │
//! │  │     Store       │  │    Internal     │                              │
//! │  │                 │  │                 │                              │
//! │  │  Store(DbError) │  │  ChannelError   │                              │
//! │  │                 │  │  TransportError │                              │
//! │  └─────────────────┘  └─────────────────┘                              │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! [`SyncError::kind`] folds every variant onto the handling taxonomy
//! ([`ErrorKind`]) the callers branch on.

use thiserror::Error;

use smartqueue_core::CoreError;
use smartqueue_db::DbError;

/// Result type alias for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// How a caller should treat an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Serial open/write failure or store call failure.
    TransientIo,
    /// Duplicate ticket number or concurrent configuration update.
    Conflict,
    /// Call-next with nobody waiting. User-visible, non-fatal.
    EmptyQueue,
    /// Bad line from the display peer. Logged and dropped.
    MalformedPeerMessage,
    /// Bad or unreadable configuration.
    Config,
    /// Anything else.
    Internal,
}

/// Sync error type covering all possible sync failures.
#[derive(Debug, Error)]
pub enum SyncError {
    // =========================================================================
    // Configuration Errors
    // =========================================================================
    /// Invalid bridge configuration.
    #[error("Invalid bridge configuration: {0}")]
    InvalidConfig(String),

    /// Failed to load config file.
    #[error("Failed to load config: {0}")]
    ConfigLoadFailed(String),

    /// Failed to save config file.
    #[error("Failed to save config: {0}")]
    ConfigSaveFailed(String),

    // =========================================================================
    // Serial Link Errors
    // =========================================================================
    /// Failed to open the serial device.
    #[error("Failed to open {path}: {reason}")]
    LinkOpenFailed { path: String, reason: String },

    /// A line was offered while the link was down. The line is dropped.
    #[error("Serial link is not connected")]
    NotConnected,

    /// Writing to or reading from an open link failed.
    #[error("Serial link I/O failed: {0}")]
    LinkIo(String),

    // =========================================================================
    // Queue Errors
    // =========================================================================
    /// No ticket is waiting.
    #[error("No ticket is waiting")]
    EmptyQueue,

    /// An optimistic write kept losing to concurrent writers.
    #[error("Gave up after {attempts} conflicting attempts")]
    Contended { attempts: u32 },

    /// Domain rule or peer protocol error.
    #[error(transparent)]
    Core(CoreError),

    // =========================================================================
    // Store Errors
    // =========================================================================
    /// Queue store failure.
    #[error("Store error: {0}")]
    Store(#[from] DbError),

    // =========================================================================
    // Internal Errors
    // =========================================================================
    /// Failed to bind or serve the observer endpoint.
    #[error("Transport error: {0}")]
    TransportError(String),

    /// Channel send/receive failed.
    #[error("Channel error: {0}")]
    ChannelError(String),

    /// Internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

// =============================================================================
// Error Conversions
// =============================================================================

impl From<CoreError> for SyncError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::EmptyQueue => SyncError::EmptyQueue,
            other => SyncError::Core(other),
        }
    }
}

impl From<std::io::Error> for SyncError {
    fn from(err: std::io::Error) -> Self {
        SyncError::LinkIo(err.to_string())
    }
}

impl From<toml::de::Error> for SyncError {
    fn from(err: toml::de::Error) -> Self {
        SyncError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::ser::Error> for SyncError {
    fn from(err: toml::ser::Error) -> Self {
        SyncError::ConfigSaveFailed(err.to_string())
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        SyncError::Internal(format!("serialization failed: {}", err))
    }
}

// =============================================================================
// Error Categorization
// =============================================================================

impl SyncError {
    /// Maps the error onto the handling taxonomy.
    pub fn kind(&self) -> ErrorKind {
        match self {
            SyncError::InvalidConfig(_)
            | SyncError::ConfigLoadFailed(_)
            | SyncError::ConfigSaveFailed(_) => ErrorKind::Config,

            SyncError::LinkOpenFailed { .. } | SyncError::NotConnected | SyncError::LinkIo(_) => {
                ErrorKind::TransientIo
            }

            SyncError::EmptyQueue => ErrorKind::EmptyQueue,
            SyncError::Contended { .. } => ErrorKind::Conflict,

            SyncError::Core(CoreError::MalformedPeerMessage { .. }) => {
                ErrorKind::MalformedPeerMessage
            }
            SyncError::Core(CoreError::EmptyQueue) => ErrorKind::EmptyQueue,
            SyncError::Core(_) => ErrorKind::Internal,

            SyncError::Store(db) if db.is_conflict() => ErrorKind::Conflict,
            SyncError::Store(db) if db.is_transient() => ErrorKind::TransientIo,
            SyncError::Store(_) => ErrorKind::Internal,

            SyncError::TransportError(_) => ErrorKind::TransientIo,
            SyncError::ChannelError(_) | SyncError::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Returns true if the operation can be retried as is.
    pub fn is_retryable(&self) -> bool {
        matches!(self.kind(), ErrorKind::TransientIo | ErrorKind::Conflict)
    }

    /// Returns true if this error indicates a configuration problem.
    pub fn is_config_error(&self) -> bool {
        self.kind() == ErrorKind::Config
    }
}

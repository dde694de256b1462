//! # Configuration Repository
//!
//! SQL for the `queue_config` singleton.
//!
//! ## Commit Sequence
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                   Configuration inside a commit                         │
//! │                                                                         │
//! │  1. claim_version()   UPDATE ... SET version = version + 1              │
//! │                       WHERE id = ? AND version = ?                      │
//! │                       (first statement, takes the write lock)           │
//! │     0 rows? ──► fetch() to tell NotFound from VersionConflict           │
//! │                                                                         │
//! │  2. ticket writes     (ticket.rs)                                       │
//! │                                                                         │
//! │  3. apply_patch()     UPDATE ... SET current/next, updated_at           │
//! │                                                                         │
//! │  4. fetch()           row image for the change event                    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::{DateTime, Utc};
use sqlx::{SqliteConnection, SqlitePool};
use tracing::debug;

use crate::error::DbResult;
use smartqueue_core::{ConfigPatch, QueueConfiguration};

const SELECT_CONFIG: &str = r#"
    SELECT id, current_number, next_number, version, updated_at
    FROM queue_config
    WHERE id = ?1
"#;

/// Repository for the configuration singleton.
#[derive(Debug, Clone)]
pub struct ConfigRepository {
    pool: SqlitePool,
}

impl ConfigRepository {
    /// Creates a new ConfigRepository.
    pub fn new(pool: SqlitePool) -> Self {
        ConfigRepository { pool }
    }

    /// Reads the configuration row.
    pub async fn get(&self, id: &str) -> DbResult<Option<QueueConfiguration>> {
        let config = sqlx::query_as::<_, QueueConfiguration>(SELECT_CONFIG)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(config)
    }

    /// Inserts the initial row (`current = 0`, `next = 1`) if it is absent.
    ///
    /// ## Returns
    /// `true` if the row was created.
    pub async fn seed(&self, id: &str) -> DbResult<bool> {
        let initial = QueueConfiguration::initial(id, Utc::now());

        let result = sqlx::query(
            r#"
            INSERT OR IGNORE INTO queue_config (
                id, current_number, next_number, version, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
        )
        .bind(&initial.id)
        .bind(initial.current_number)
        .bind(initial.next_number)
        .bind(initial.version)
        .bind(initial.updated_at)
        .execute(&self.pool)
        .await?;

        let created = result.rows_affected() > 0;
        debug!(id = %id, created, "Seeded queue configuration");
        Ok(created)
    }
}

// =============================================================================
// Transaction Helpers
// =============================================================================

/// Reads the configuration row on a transaction connection.
pub(crate) async fn fetch(
    conn: &mut SqliteConnection,
    id: &str,
) -> DbResult<Option<QueueConfiguration>> {
    let config = sqlx::query_as::<_, QueueConfiguration>(SELECT_CONFIG)
        .bind(id)
        .fetch_optional(conn)
        .await?;

    Ok(config)
}

/// Bumps the version, guarded by `expected_version` when given.
///
/// ## Returns
/// `true` if the row matched.
pub(crate) async fn claim_version(
    conn: &mut SqliteConnection,
    id: &str,
    expected_version: Option<i64>,
) -> DbResult<bool> {
    let result = sqlx::query(
        r#"
        UPDATE queue_config
        SET version = version + 1
        WHERE id = ?1 AND (?2 IS NULL OR version = ?2)
        "#,
    )
    .bind(id)
    .bind(expected_version)
    .execute(conn)
    .await?;

    Ok(result.rows_affected() == 1)
}

/// Writes the patched numbers.
pub(crate) async fn apply_patch(
    conn: &mut SqliteConnection,
    id: &str,
    patch: &ConfigPatch,
    now: DateTime<Utc>,
) -> DbResult<()> {
    sqlx::query(
        r#"
        UPDATE queue_config SET
            current_number = COALESCE(?2, current_number),
            next_number = COALESCE(?3, next_number),
            updated_at = ?4
        WHERE id = ?1
        "#,
    )
    .bind(id)
    .bind(patch.current_number)
    .bind(patch.next_number)
    .bind(now)
    .execute(conn)
    .await?;

    Ok(())
}

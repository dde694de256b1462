//! # Ticket Repository
//!
//! SQL for `queue_tickets`.
//!
//! ## Ticket Lifecycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Ticket Lifecycle                                  │
//! │                                                                         │
//! │  1. ISSUE                                                               │
//! │     └── insert() → Ticket { status: waiting }                          │
//! │         (partial unique index: number unique among non-completed)      │
//! │                                                                         │
//! │  2. CALL                                                                │
//! │     └── set_status(serving) → served_at stamped                        │
//! │         (partial unique index: one serving ticket)                     │
//! │                                                                         │
//! │  3. COMPLETE                                                            │
//! │     └── set_status(completed) → completed_at stamped                   │
//! │                                                                         │
//! │  4. RESET                                                               │
//! │     └── delete_all() → epoch ends                                      │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::{DateTime, Utc};
use sqlx::{SqliteConnection, SqlitePool};
use tracing::debug;
use uuid::Uuid;

use crate::error::{DbError, DbResult};
use smartqueue_core::{Ticket, TicketStatus, TimestampField};

/// Repository for ticket reads.
#[derive(Debug, Clone)]
pub struct TicketRepository {
    pool: SqlitePool,
}

impl TicketRepository {
    /// Creates a new TicketRepository.
    pub fn new(pool: SqlitePool) -> Self {
        TicketRepository { pool }
    }

    /// Waiting tickets, ascending by number.
    pub async fn list_waiting(&self) -> DbResult<Vec<Ticket>> {
        let tickets = sqlx::query_as::<_, Ticket>(
            r#"
            SELECT id, ticket_number, status, created_at, served_at, completed_at
            FROM queue_tickets
            WHERE status = 'waiting'
            ORDER BY ticket_number ASC, created_at ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(tickets)
    }

    /// The ticket being served, if any.
    pub async fn get_serving(&self) -> DbResult<Option<Ticket>> {
        let ticket = sqlx::query_as::<_, Ticket>(
            r#"
            SELECT id, ticket_number, status, created_at, served_at, completed_at
            FROM queue_tickets
            WHERE status = 'serving'
            LIMIT 1
            "#,
        )
        .fetch_optional(&self.pool)
        .await?;

        Ok(ticket)
    }

    /// Gets a ticket by ID.
    pub async fn get_by_id(&self, id: &str) -> DbResult<Option<Ticket>> {
        let ticket = sqlx::query_as::<_, Ticket>(
            r#"
            SELECT id, ticket_number, status, created_at, served_at, completed_at
            FROM queue_tickets
            WHERE id = ?1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(ticket)
    }

    /// Counts tickets in the table, any status.
    pub async fn count(&self) -> DbResult<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM queue_tickets")
            .fetch_one(&self.pool)
            .await?;

        Ok(count)
    }
}

// =============================================================================
// Transaction Helpers
// =============================================================================

/// Inserts a waiting ticket.
pub(crate) async fn insert(
    conn: &mut SqliteConnection,
    number: i64,
    now: DateTime<Utc>,
) -> DbResult<Ticket> {
    let ticket = Ticket::waiting(Uuid::new_v4().to_string(), number, now);

    debug!(id = %ticket.id, ticket_number = number, "Inserting ticket");

    sqlx::query(
        r#"
        INSERT INTO queue_tickets (
            id, ticket_number, status, created_at, served_at, completed_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)
        "#,
    )
    .bind(&ticket.id)
    .bind(ticket.ticket_number)
    .bind(ticket.status)
    .bind(ticket.created_at)
    .bind(ticket.served_at)
    .bind(ticket.completed_at)
    .execute(conn)
    .await
    .map_err(|e| match DbError::from(e) {
        DbError::UniqueViolation { field, .. } => DbError::UniqueViolation {
            field,
            value: number.to_string(),
        },
        other => other,
    })?;

    Ok(ticket)
}

/// Moves a ticket to `status` and returns the updated row.
pub(crate) async fn set_status(
    conn: &mut SqliteConnection,
    id: &str,
    status: TicketStatus,
    now: DateTime<Utc>,
) -> DbResult<Ticket> {
    let sql = match status.timestamp_field() {
        Some(TimestampField::ServedAt) => {
            "UPDATE queue_tickets SET status = ?2, served_at = ?3 WHERE id = ?1"
        }
        Some(TimestampField::CompletedAt) => {
            "UPDATE queue_tickets SET status = ?2, completed_at = ?3 WHERE id = ?1"
        }
        None => "UPDATE queue_tickets SET status = ?2 WHERE id = ?1",
    };

    let mut query = sqlx::query(sql).bind(id).bind(status);
    if status.timestamp_field().is_some() {
        query = query.bind(now);
    }
    let result = query.execute(&mut *conn).await?;

    if result.rows_affected() == 0 {
        return Err(DbError::not_found("Ticket", id));
    }

    let ticket = sqlx::query_as::<_, Ticket>(
        r#"
        SELECT id, ticket_number, status, created_at, served_at, completed_at
        FROM queue_tickets
        WHERE id = ?1
        "#,
    )
    .bind(id)
    .fetch_one(&mut *conn)
    .await?;

    Ok(ticket)
}

/// Deletes every ticket. Returns the number removed.
pub(crate) async fn delete_all(conn: &mut SqliteConnection) -> DbResult<u64> {
    let result = sqlx::query("DELETE FROM queue_tickets")
        .execute(conn)
        .await?;

    Ok(result.rows_affected())
}

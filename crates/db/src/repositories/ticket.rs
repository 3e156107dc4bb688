use chrono::Utc;
use sqlx::{sqlite::SqliteRow, Row};

use cadence_core::domain::conversation::ThreadKey;
use cadence_core::domain::priority::TicketSeverity;

use super::{
    parse_optional_timestamp, parse_severity, parse_timestamp, NewTicket, RepositoryError,
    TicketRecord, TicketRepository,
};
use crate::DbPool;

pub struct SqlTicketRepository {
    pool: DbPool,
}

impl SqlTicketRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    async fn find_by_id(&self, id: i64) -> Result<Option<TicketRecord>, RepositoryError> {
        let row = sqlx::query(
            "SELECT
                id,
                conversation_id,
                thread_key,
                priority_score,
                status,
                reason,
                assigned_to,
                is_open,
                created_at,
                resolved_at
             FROM tickets
             WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(ticket_from_row).transpose()
    }
}

#[async_trait::async_trait]
impl TicketRepository for SqlTicketRepository {
    async fn create(&self, ticket: NewTicket) -> Result<TicketRecord, RepositoryError> {
        let severity = TicketSeverity::from_score(ticket.priority_score);
        let result = sqlx::query(
            "INSERT INTO tickets (
                conversation_id,
                thread_key,
                priority_score,
                status,
                reason,
                is_open,
                created_at
             ) VALUES (?, ?, ?, ?, ?, 1, ?)",
        )
        .bind(ticket.conversation_id)
        .bind(ticket.thread_key.as_str())
        .bind(ticket.priority_score)
        .bind(severity.as_str())
        .bind(&ticket.reason)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;

        let id = result.last_insert_rowid();
        self.find_by_id(id).await?.ok_or_else(|| RepositoryError::NotFound(format!("ticket {id}")))
    }

    async fn list_open(&self) -> Result<Vec<TicketRecord>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT
                id,
                conversation_id,
                thread_key,
                priority_score,
                status,
                reason,
                assigned_to,
                is_open,
                created_at,
                resolved_at
             FROM tickets
             WHERE is_open = 1
             ORDER BY priority_score DESC, id ASC",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(ticket_from_row).collect()
    }

    async fn resolve(&self, id: i64) -> Result<(), RepositoryError> {
        let result =
            sqlx::query("UPDATE tickets SET is_open = 0, resolved_at = ? WHERE id = ? AND is_open = 1")
                .bind(Utc::now().to_rfc3339())
                .bind(id)
                .execute(&self.pool)
                .await?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound(format!("open ticket {id}")));
        }
        Ok(())
    }
}

fn ticket_from_row(row: SqliteRow) -> Result<TicketRecord, RepositoryError> {
    let status: String = row.try_get("status")?;
    let is_open: i64 = row.try_get("is_open")?;
    Ok(TicketRecord {
        id: row.try_get("id")?,
        conversation_id: row.try_get("conversation_id")?,
        thread_key: ThreadKey(row.try_get("thread_key")?),
        priority_score: row.try_get("priority_score")?,
        severity: parse_severity(&status)?,
        reason: row.try_get("reason")?,
        assigned_to: row.try_get("assigned_to")?,
        is_open: is_open != 0,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
        resolved_at: parse_optional_timestamp("resolved_at", row.try_get("resolved_at")?)?,
    })
}

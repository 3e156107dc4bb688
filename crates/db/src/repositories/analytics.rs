use sqlx::{sqlite::SqliteRow, Row};

use cadence_core::domain::conversation::ThreadKey;

use super::{
    decode_json, encode_json, parse_timestamp, parse_u64, AnalyticsEvent, AnalyticsRepository,
    RepositoryError,
};
use crate::DbPool;

pub struct SqlAnalyticsRepository {
    pool: DbPool,
}

impl SqlAnalyticsRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl AnalyticsRepository for SqlAnalyticsRepository {
    async fn log_event(&self, event: AnalyticsEvent) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO analytics (
                event_type,
                thread_key,
                correlation_id,
                metadata_json,
                occurred_at
             ) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&event.event_type)
        .bind(event.thread_key.as_ref().map(ThreadKey::as_str))
        .bind(event.correlation_id.as_deref())
        .bind(encode_json("metadata_json", &event.metadata)?)
        .bind(event.occurred_at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn count_by_type(&self, event_type: &str) -> Result<u64, RepositoryError> {
        let row = sqlx::query("SELECT COUNT(*) AS count FROM analytics WHERE event_type = ?")
            .bind(event_type)
            .fetch_one(&self.pool)
            .await?;
        parse_u64("count", row.try_get("count")?)
    }

    async fn list_recent(&self, limit: u32) -> Result<Vec<AnalyticsEvent>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT event_type, thread_key, correlation_id, metadata_json, occurred_at
             FROM analytics
             ORDER BY id DESC
             LIMIT ?",
        )
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(event_from_row).collect()
    }
}

fn event_from_row(row: SqliteRow) -> Result<AnalyticsEvent, RepositoryError> {
    let metadata_raw: String = row.try_get("metadata_json")?;
    let thread_key: Option<String> = row.try_get("thread_key")?;
    Ok(AnalyticsEvent {
        event_type: row.try_get("event_type")?,
        thread_key: thread_key.map(ThreadKey),
        correlation_id: row.try_get("correlation_id")?,
        metadata: decode_json("metadata_json", &metadata_raw)?,
        occurred_at: parse_timestamp("occurred_at", row.try_get("occurred_at")?)?,
    })
}

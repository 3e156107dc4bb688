use chrono::Utc;
use sqlx::Row;

use cadence_core::domain::conversation::{ConversationState, ThreadKey};

use super::{decode_json, encode_json, parse_u64, CheckpointStore, RepositoryError};
use crate::DbPool;

pub struct SqlCheckpointStore {
    pool: DbPool,
}

impl SqlCheckpointStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    async fn stored_version(&self, thread_key: &ThreadKey) -> Result<u64, RepositoryError> {
        let row = sqlx::query("SELECT version FROM conversation_checkpoint WHERE thread_key = ?")
            .bind(thread_key.as_str())
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(row) => parse_u64("version", row.try_get("version")?),
            None => Ok(0),
        }
    }
}

#[async_trait::async_trait]
impl CheckpointStore for SqlCheckpointStore {
    async fn get(
        &self,
        thread_key: &ThreadKey,
    ) -> Result<Option<ConversationState>, RepositoryError> {
        let row = sqlx::query(
            "SELECT version, state_json FROM conversation_checkpoint WHERE thread_key = ?",
        )
        .bind(thread_key.as_str())
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let version = parse_u64("version", row.try_get("version")?)?;
        let raw: String = row.try_get("state_json")?;
        let mut state: ConversationState = decode_json("state_json", &raw)?;
        if state.thread_key != *thread_key {
            return Err(RepositoryError::Decode(format!(
                "checkpoint for `{thread_key}` carries state for `{}`",
                state.thread_key
            )));
        }
        state.version = version;
        Ok(Some(state))
    }

    async fn put(&self, state: &ConversationState) -> Result<(), RepositoryError> {
        let attempted = i64::try_from(state.version).map_err(|_| {
            RepositoryError::Decode(format!("checkpoint version {} out of range", state.version))
        })?;
        if attempted == 0 {
            return Err(RepositoryError::StaleCheckpoint {
                thread_key: state.thread_key.to_string(),
                stored_version: self.stored_version(&state.thread_key).await?,
                attempted_version: 0,
            });
        }

        let state_json = encode_json("state_json", state)?;
        let result = sqlx::query(
            "INSERT INTO conversation_checkpoint (thread_key, version, state_json, updated_at)
             VALUES (?, ?, ?, ?)
             ON CONFLICT(thread_key) DO UPDATE SET
                version = excluded.version,
                state_json = excluded.state_json,
                updated_at = excluded.updated_at
             WHERE excluded.version > conversation_checkpoint.version",
        )
        .bind(state.thread_key.as_str())
        .bind(attempted)
        .bind(state_json)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::StaleCheckpoint {
                thread_key: state.thread_key.to_string(),
                stored_version: self.stored_version(&state.thread_key).await?,
                attempted_version: state.version,
            });
        }

        Ok(())
    }
}

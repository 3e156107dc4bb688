use chrono::Utc;
use serde_json::Value;
use sqlx::{sqlite::SqliteRow, Row};

use cadence_core::domain::conversation::{ConversationState, ThreadKey};

use super::{
    decode_json, encode_json, parse_agent, parse_timestamp, ConversationRecord,
    ConversationRepository, RepositoryError,
};
use crate::DbPool;

/// Long-term conversation log; every processed turn appends one snapshot row.
pub struct SqlConversationRepository {
    pool: DbPool,
}

impl SqlConversationRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl ConversationRepository for SqlConversationRepository {
    async fn record(
        &self,
        user_id: i64,
        state: &ConversationState,
    ) -> Result<i64, RepositoryError> {
        let messages_json = encode_json("messages_json", &state.messages)?;
        let state_json = encode_json("state_json", &snapshot_without_transcript(state)?)?;

        let result = sqlx::query(
            "INSERT INTO conversations (
                user_id,
                thread_key,
                messages_json,
                current_agent,
                state_json,
                created_at
             ) VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(user_id)
        .bind(state.thread_key.as_str())
        .bind(messages_json)
        .bind(state.current_agent.map(|agent| agent.as_str()))
        .bind(state_json)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(result.last_insert_rowid())
    }

    async fn list_for_thread(
        &self,
        thread_key: &ThreadKey,
    ) -> Result<Vec<ConversationRecord>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT
                id,
                user_id,
                thread_key,
                messages_json,
                current_agent,
                state_json,
                created_at
             FROM conversations
             WHERE thread_key = ?
             ORDER BY id ASC",
        )
        .bind(thread_key.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(conversation_from_row).collect()
    }
}

/// The transcript already has its own column.
pub(crate) fn snapshot_without_transcript(
    state: &ConversationState,
) -> Result<Value, RepositoryError> {
    let mut snapshot = serde_json::to_value(state)
        .map_err(|error| RepositoryError::Decode(format!("could not encode state: {error}")))?;
    if let Value::Object(fields) = &mut snapshot {
        fields.remove("messages");
    }
    Ok(snapshot)
}

fn conversation_from_row(row: SqliteRow) -> Result<ConversationRecord, RepositoryError> {
    let messages_raw: String = row.try_get("messages_json")?;
    let state_raw: String = row.try_get("state_json")?;
    Ok(ConversationRecord {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        thread_key: ThreadKey(row.try_get("thread_key")?),
        messages: decode_json("messages_json", &messages_raw)?,
        current_agent: parse_agent(row.try_get("current_agent")?)?,
        state: decode_json("state_json", &state_raw)?,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
    })
}

#[cfg(test)]
mod tests {
    use cadence_core::domain::conversation::{AgentKind, ConversationState, ThreadKey, Turn};

    use super::SqlConversationRepository;
    use crate::repositories::{ConversationRepository, SqlUserRepository, UserRepository};
    use crate::{connect_with_settings, migrations};

    #[tokio::test]
    async fn records_are_listed_in_insertion_order() {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");
        let user = SqlUserRepository::new(pool.clone())
            .get_or_create("5215512345678", None)
            .await
            .expect("user");
        let repo = SqlConversationRepository::new(pool);

        let mut state = ConversationState::new(ThreadKey("user_5215512345678".to_string()), None);
        state.messages.push(Turn::user("¿cuánto cuesta el plan premium?"));
        state.messages.push(Turn::assistant("El plan premium cuesta 99.99", AgentKind::Sales));
        state.current_agent = Some(AgentKind::Sales);

        let first = repo.record(user.id, &state).await.expect("record first");
        state.messages.push(Turn::user("gracias"));
        let second = repo.record(user.id, &state).await.expect("record second");
        assert!(second > first);

        let records = repo.list_for_thread(&state.thread_key).await.expect("list");
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].messages.len(), 2);
        assert_eq!(records[1].messages, state.messages);
        assert_eq!(records[1].current_agent, Some(AgentKind::Sales));
        assert!(records[1].state.get("messages").is_none());
    }
}

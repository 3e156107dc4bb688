use std::collections::HashMap;

use chrono::Utc;
use tokio::sync::RwLock;

use cadence_core::domain::conversation::{ConversationState, ThreadKey};
use cadence_core::domain::priority::TicketSeverity;

use super::conversation::snapshot_without_transcript;
use super::{
    AnalyticsEvent, AnalyticsRepository, CheckpointStore, ConversationRecord,
    ConversationRepository, NewTicket, RepositoryError, TicketRecord, TicketRepository,
    UserRecord, UserRepository,
};

#[derive(Default)]
pub struct InMemoryCheckpointStore {
    states: RwLock<HashMap<String, ConversationState>>,
}

#[async_trait::async_trait]
impl CheckpointStore for InMemoryCheckpointStore {
    async fn get(
        &self,
        thread_key: &ThreadKey,
    ) -> Result<Option<ConversationState>, RepositoryError> {
        let states = self.states.read().await;
        Ok(states.get(thread_key.as_str()).cloned())
    }

    async fn put(&self, state: &ConversationState) -> Result<(), RepositoryError> {
        let mut states = self.states.write().await;
        let stored_version =
            states.get(state.thread_key.as_str()).map(|existing| existing.version).unwrap_or(0);
        if state.version <= stored_version {
            return Err(RepositoryError::StaleCheckpoint {
                thread_key: state.thread_key.to_string(),
                stored_version,
                attempted_version: state.version,
            });
        }
        states.insert(state.thread_key.as_str().to_string(), state.clone());
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryUserRepository {
    users: RwLock<HashMap<String, UserRecord>>,
}

#[async_trait::async_trait]
impl UserRepository for InMemoryUserRepository {
    async fn find_by_phone(&self, phone: &str) -> Result<Option<UserRecord>, RepositoryError> {
        let users = self.users.read().await;
        Ok(users.get(phone).cloned())
    }

    async fn get_or_create(
        &self,
        phone: &str,
        name: Option<&str>,
    ) -> Result<UserRecord, RepositoryError> {
        let mut users = self.users.write().await;
        let next_id = i64::try_from(users.len())
            .map_err(|_| RepositoryError::Decode("user id overflow".to_string()))?
            + 1;
        let record = users.entry(phone.to_string()).or_insert_with(|| UserRecord {
            id: next_id,
            phone: phone.to_string(),
            name: name.map(str::to_string),
            tier: "basic".to_string(),
            created_at: Utc::now(),
        });
        Ok(record.clone())
    }
}

#[derive(Default)]
pub struct InMemoryConversationRepository {
    records: RwLock<Vec<ConversationRecord>>,
}

#[async_trait::async_trait]
impl ConversationRepository for InMemoryConversationRepository {
    async fn record(
        &self,
        user_id: i64,
        state: &ConversationState,
    ) -> Result<i64, RepositoryError> {
        let snapshot = snapshot_without_transcript(state)?;
        let mut records = self.records.write().await;
        let id = i64::try_from(records.len())
            .map_err(|_| RepositoryError::Decode("conversation id overflow".to_string()))?
            + 1;
        records.push(ConversationRecord {
            id,
            user_id,
            thread_key: state.thread_key.clone(),
            messages: state.messages.clone(),
            current_agent: state.current_agent,
            state: snapshot,
            created_at: Utc::now(),
        });
        Ok(id)
    }

    async fn list_for_thread(
        &self,
        thread_key: &ThreadKey,
    ) -> Result<Vec<ConversationRecord>, RepositoryError> {
        let records = self.records.read().await;
        Ok(records.iter().filter(|record| record.thread_key == *thread_key).cloned().collect())
    }
}

#[derive(Default)]
pub struct InMemoryTicketRepository {
    tickets: RwLock<Vec<TicketRecord>>,
}

#[async_trait::async_trait]
impl TicketRepository for InMemoryTicketRepository {
    async fn create(&self, ticket: NewTicket) -> Result<TicketRecord, RepositoryError> {
        let mut tickets = self.tickets.write().await;
        let id = i64::try_from(tickets.len())
            .map_err(|_| RepositoryError::Decode("ticket id overflow".to_string()))?
            + 1;
        let record = TicketRecord {
            id,
            conversation_id: ticket.conversation_id,
            thread_key: ticket.thread_key,
            priority_score: ticket.priority_score,
            severity: TicketSeverity::from_score(ticket.priority_score),
            reason: ticket.reason,
            assigned_to: None,
            is_open: true,
            created_at: Utc::now(),
            resolved_at: None,
        };
        tickets.push(record.clone());
        Ok(record)
    }

    async fn list_open(&self) -> Result<Vec<TicketRecord>, RepositoryError> {
        let tickets = self.tickets.read().await;
        let mut open: Vec<TicketRecord> =
            tickets.iter().filter(|ticket| ticket.is_open).cloned().collect();
        open.sort_by(|left, right| {
            right
                .priority_score
                .total_cmp(&left.priority_score)
                .then_with(|| left.id.cmp(&right.id))
        });
        Ok(open)
    }

    async fn resolve(&self, id: i64) -> Result<(), RepositoryError> {
        let mut tickets = self.tickets.write().await;
        match tickets.iter_mut().find(|ticket| ticket.id == id && ticket.is_open) {
            Some(ticket) => {
                ticket.is_open = false;
                ticket.resolved_at = Some(Utc::now());
                Ok(())
            }
            None => Err(RepositoryError::NotFound(format!("open ticket {id}"))),
        }
    }
}

#[derive(Default)]
pub struct InMemoryAnalyticsRepository {
    events: RwLock<Vec<AnalyticsEvent>>,
}

#[async_trait::async_trait]
impl AnalyticsRepository for InMemoryAnalyticsRepository {
    async fn log_event(&self, event: AnalyticsEvent) -> Result<(), RepositoryError> {
        self.events.write().await.push(event);
        Ok(())
    }

    async fn count_by_type(&self, event_type: &str) -> Result<u64, RepositoryError> {
        let events = self.events.read().await;
        Ok(events.iter().filter(|event| event.event_type == event_type).count() as u64)
    }

    async fn list_recent(&self, limit: u32) -> Result<Vec<AnalyticsEvent>, RepositoryError> {
        let events = self.events.read().await;
        Ok(events.iter().rev().take(limit as usize).cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use cadence_core::domain::conversation::{ConversationState, ThreadKey, Turn};

    use crate::repositories::{
        AnalyticsEvent, AnalyticsRepository, CheckpointStore, InMemoryAnalyticsRepository,
        InMemoryCheckpointStore, InMemoryTicketRepository, InMemoryUserRepository, NewTicket,
        RepositoryError, TicketRepository, UserRepository,
    };

    #[tokio::test]
    async fn in_memory_checkpoint_rejects_stale_versions() {
        let store = InMemoryCheckpointStore::default();
        let mut state = ConversationState::new(ThreadKey("user_9".to_string()), None);
        state.messages.push(Turn::user("hola"));
        state.version = 1;
        store.put(&state).await.expect("put v1");

        let error = store.put(&state).await.expect_err("replaying v1 must fail");
        assert!(matches!(error, RepositoryError::StaleCheckpoint { stored_version: 1, .. }));

        state.version = 2;
        store.put(&state).await.expect("put v2");
        let loaded = store.get(&state.thread_key).await.expect("get").expect("present");
        assert_eq!(loaded.version, 2);
    }

    #[tokio::test]
    async fn in_memory_users_are_unique_per_phone() {
        let repo = InMemoryUserRepository::default();
        let first = repo.get_or_create("111", Some("Luis")).await.expect("first");
        let second = repo.get_or_create("222", None).await.expect("second");
        let again = repo.get_or_create("111", None).await.expect("again");

        assert_eq!(first, again);
        assert_ne!(first.id, second.id);
    }

    #[tokio::test]
    async fn in_memory_tickets_sort_by_priority() {
        let repo = InMemoryTicketRepository::default();
        for score in [7.1, 9.5, 8.0] {
            repo.create(NewTicket {
                conversation_id: 1,
                thread_key: ThreadKey("user_1".to_string()),
                priority_score: score,
                reason: "test".to_string(),
            })
            .await
            .expect("create");
        }

        let scores: Vec<f64> =
            repo.list_open().await.expect("open").iter().map(|t| t.priority_score).collect();
        assert_eq!(scores, vec![9.5, 8.0, 7.1]);
    }

    #[tokio::test]
    async fn in_memory_analytics_lists_newest_first() {
        let repo = InMemoryAnalyticsRepository::default();
        repo.log_event(AnalyticsEvent::new("a", json!({}))).await.expect("a");
        repo.log_event(AnalyticsEvent::new("b", json!({}))).await.expect("b");

        let recent = repo.list_recent(1).await.expect("recent");
        assert_eq!(recent[0].event_type, "b");
        assert_eq!(repo.count_by_type("a").await.expect("count"), 1);
    }
}

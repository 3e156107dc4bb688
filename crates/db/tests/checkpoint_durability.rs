use cadence_core::domain::conversation::{AgentKind, ConversationState, ThreadKey, Turn};
use cadence_db::repositories::{CheckpointStore, SqlCheckpointStore};
use cadence_db::{connect_with_settings, migrations};

fn database_url(dir: &tempfile::TempDir) -> String {
    format!("sqlite://{}?mode=rwc", dir.path().join("cadence.db").display())
}

#[tokio::test]
async fn committed_checkpoint_survives_reconnect() {
    let dir = tempfile::tempdir().expect("tempdir");
    let url = database_url(&dir);
    let key = ThreadKey("user_5215598765432".to_string());

    let mut state = ConversationState::new(key.clone(), Some(1));
    state.messages.push(Turn::user("mi lanzamiento está bloqueado"));
    state.messages.push(Turn::assistant("Reviso el estado de tu lanzamiento.", AgentKind::Support));
    state.current_agent = Some(AgentKind::Support);
    state.version = 1;

    {
        let pool = connect_with_settings(&url, 2, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");
        SqlCheckpointStore::new(pool.clone()).put(&state).await.expect("put");
        pool.close().await;
    }

    let pool = connect_with_settings(&url, 2, 30).await.expect("reconnect");
    let loaded = SqlCheckpointStore::new(pool)
        .get(&key)
        .await
        .expect("get")
        .expect("checkpoint should survive reconnect");
    assert_eq!(loaded, state);
}

#[tokio::test]
async fn successive_versions_only_extend_the_transcript() {
    let dir = tempfile::tempdir().expect("tempdir");
    let pool = connect_with_settings(&database_url(&dir), 2, 30).await.expect("connect");
    migrations::run_pending(&pool).await.expect("migrations");
    let store = SqlCheckpointStore::new(pool);
    let key = ThreadKey("user_1".to_string());

    let mut state = ConversationState::new(key.clone(), None);
    let mut previous = state.messages.clone();
    for (version, text) in ["hola", "precio del plan pro", "gracias"].into_iter().enumerate() {
        state.messages.push(Turn::user(text));
        state.messages.push(Turn::assistant(format!("re: {text}"), AgentKind::Sales));
        state.version = version as u64 + 1;
        store.put(&state).await.expect("put");

        let loaded = store.get(&key).await.expect("get").expect("present");
        assert!(previous.is_prefix_of(&loaded.messages));
        assert!(loaded.messages.len() > previous.len());
        previous = loaded.messages;
    }
}

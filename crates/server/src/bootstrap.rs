use std::sync::Arc;
use std::time::Duration;

use cadence_agent::runtime::AgentRuntime;
use cadence_channel::{ChannelError, MessageSender, NoopSender, WhatsAppSender};
use cadence_core::config::{AppConfig, ConfigError};
use cadence_db::repositories::SqlCheckpointStore;
use cadence_db::{connect_with_settings, migrations, DbPool};
use thiserror::Error;
use tracing::info;

use crate::audit::AnalyticsAuditSink;
use crate::webhook::{Ingestion, Repositories, WebhookState};

const CHANNEL_TIMEOUT: Duration = Duration::from_secs(15);

pub struct Application {
    pub config: AppConfig,
    pub db_pool: DbPool,
    pub webhook: WebhookState,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("database connection failed: {0}")]
    DatabaseConnect(#[source] sqlx::Error),
    #[error("database migration failed: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),
    #[error("channel sender could not be built: {0}")]
    Channel(#[from] ChannelError),
    #[error("agent runtime initialisation failed: {0}")]
    Runtime(String),
}

pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(
        event_name = "system.bootstrap.start",
        correlation_id = "bootstrap",
        "starting application bootstrap"
    );

    let db_pool = connect_with_settings(
        &config.database.url,
        config.database.max_connections,
        config.database.timeout_secs,
    )
    .await
    .map_err(BootstrapError::DatabaseConnect)?;
    info!(
        event_name = "system.bootstrap.database_connected",
        correlation_id = "bootstrap",
        "database connection established"
    );

    migrations::run_pending(&db_pool).await.map_err(BootstrapError::Migration)?;
    info!(
        event_name = "system.bootstrap.migrations_applied",
        correlation_id = "bootstrap",
        "database migrations applied"
    );

    let repositories = Repositories::sql(&db_pool);
    let audit = AnalyticsAuditSink::spawn(repositories.analytics.clone());
    let runtime = AgentRuntime::bootstrap(
        &config,
        Arc::new(SqlCheckpointStore::new(db_pool.clone())),
        Arc::new(audit),
    )
    .await
    .map_err(|error| BootstrapError::Runtime(format!("{error:#}")))?;

    let sender: Arc<dyn MessageSender> = if config.channel.enabled {
        Arc::new(WhatsAppSender::new(&config.channel, CHANNEL_TIMEOUT)?)
    } else {
        Arc::new(NoopSender)
    };
    info!(
        event_name = "system.bootstrap.channel_mode",
        correlation_id = "bootstrap",
        transport_mode = if config.channel.enabled { "whatsapp" } else { "noop" },
        "channel sender initialised"
    );

    let ingestion = Arc::new(Ingestion::new(runtime, sender, repositories));
    let webhook = WebhookState::new(
        ingestion,
        config.channel.verify_token.clone(),
        config.channel.app_secret.clone(),
    );

    Ok(Application { config, db_pool, webhook })
}

#[cfg(test)]
mod tests {
    use cadence_core::config::{AppConfig, ConfigOverrides, LlmProvider, LoadOptions};

    use crate::bootstrap::{bootstrap_with_config, Application, BootstrapError};

    async fn bootstrap(options: LoadOptions) -> Result<Application, BootstrapError> {
        bootstrap_with_config(AppConfig::load(options)?).await
    }

    fn options(overrides: ConfigOverrides) -> LoadOptions {
        LoadOptions {
            config_path: Some("does-not-exist.toml".into()),
            overrides: ConfigOverrides {
                database_url: Some("sqlite::memory:".to_string()),
                ..overrides
            },
            ..LoadOptions::default()
        }
    }

    #[tokio::test]
    async fn bootstrap_fails_fast_when_openai_has_no_api_key() {
        let result = bootstrap(options(ConfigOverrides {
            llm_provider: Some(LlmProvider::OpenAi),
            ..ConfigOverrides::default()
        }))
        .await;

        let message = result.err().map(|error| error.to_string()).unwrap_or_default();
        assert!(message.contains("llm.api_key"), "unexpected error: {message}");
    }

    #[tokio::test]
    async fn bootstrap_migrates_and_wires_the_pipeline() {
        let app = bootstrap(options(ConfigOverrides::default()))
            .await
            .expect("bootstrap should succeed with defaults");

        let (table_count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name IN \
             ('conversation_checkpoint', 'users', 'conversations', 'tickets', 'analytics')",
        )
        .fetch_one(&app.db_pool)
        .await
        .expect("baseline tables present");
        assert_eq!(table_count, 5);
        assert!(!app.config.channel.enabled);

        app.db_pool.close().await;
    }
}

use std::sync::Arc;

use chrono::Utc;
use quotewatch_agent::{HttpLlmClient, LlmError, LlmYesNoClassifier};
use quotewatch_core::audit::DecisionRecorder;
use quotewatch_core::capabilities::{
    AgentDirectory, NotificationDispatcher, StaticAgentDirectory, YesNoClassifier,
};
use quotewatch_core::checklist::ChecklistRunner;
use quotewatch_core::config::{AppConfig, ConfigError, LoadOptions};
use quotewatch_core::dispatch::Delivery;
use quotewatch_core::escalation::engine::{EngineParts, EscalationEngine};
use quotewatch_core::escalation::store::AlertStore;
use quotewatch_core::intent::IntentGate;
use quotewatch_core::templates::MessageTemplates;
use quotewatch_core::watchdog::{ArmOutcome, ResponseWatchdog, WatchdogSettings};
use quotewatch_db::repositories::{AlertRepository, PendingQuoteRepository};
use quotewatch_db::{
    connect, migrations, DbPool, RepositoryError, SqlAlertRepository, SqlDecisionLog,
    SqlPendingQuoteRepository, SqlResponseRepository,
};
use quotewatch_notify::{dispatcher_from_config, DispatchError};
use thiserror::Error;
use tracing::info;

use crate::ingress::AppState;
use crate::sweep::PendingQuotes;

pub struct Application {
    pub config: AppConfig,
    pub db_pool: DbPool,
    pub state: AppState,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("database connection failed: {0}")]
    DatabaseConnect(#[source] sqlx::Error),
    #[error("database migration failed: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),
    #[error("persisted escalation state could not be loaded: {0}")]
    Hydration(#[source] RepositoryError),
    #[error("llm client setup failed: {0}")]
    Llm(#[source] LlmError),
    #[error("notification dispatcher setup failed: {0}")]
    Dispatcher(#[source] DispatchError),
}

/// External collaborators the escalation services are wired to.
pub struct Capabilities {
    pub classifier: Arc<dyn YesNoClassifier>,
    pub dispatcher: Arc<dyn NotificationDispatcher>,
}

impl Capabilities {
    pub fn from_config(config: &AppConfig) -> Result<Self, BootstrapError> {
        let client = HttpLlmClient::from_config(&config.llm).map_err(BootstrapError::Llm)?;
        let dispatcher = dispatcher_from_config(&config.notify).map_err(BootstrapError::Dispatcher)?;
        Ok(Self { classifier: Arc::new(LlmYesNoClassifier::new(Arc::new(client))), dispatcher })
    }
}

pub async fn bootstrap(options: LoadOptions) -> Result<Application, BootstrapError> {
    info!(
        event_name = "system.bootstrap.start",
        correlation_id = "bootstrap",
        "starting application bootstrap"
    );
    let config = AppConfig::load(options)?;
    bootstrap_with_config(config).await
}

pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    let db_pool = connect(&config.database).await.map_err(BootstrapError::DatabaseConnect)?;
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

    let capabilities = Capabilities::from_config(&config)?;
    let state = assemble(&config, db_pool.clone(), capabilities).await?;
    Ok(Application { config, db_pool, state })
}

/// Wires the escalation services over an already migrated pool and reloads persisted alerts.
pub async fn assemble(
    config: &AppConfig,
    db_pool: DbPool,
    capabilities: Capabilities,
) -> Result<AppState, BootstrapError> {
    let sla = &config.sla;
    let window = sla.business_window()?;
    let thresholds = sla.threshold_set()?;
    let templates = Arc::new(
        MessageTemplates::new(&config.templates)
            .map_err(|error| ConfigError::Validation(format!("templates: {error}")))?,
    );

    let recorder: Arc<dyn DecisionRecorder> = Arc::new(SqlDecisionLog::new(db_pool.clone()));
    let directory: Arc<dyn AgentDirectory> =
        Arc::new(StaticAgentDirectory::new(config.agents.iter().cloned()));
    let delivery = Delivery::new(capabilities.dispatcher, sla.dispatch_timeout());
    let responses = Arc::new(SqlResponseRepository::new(db_pool.clone()));

    let alerts = Arc::new(SqlAlertRepository::new(db_pool.clone()));
    let store = AlertStore::new(alerts.clone());
    let persisted = alerts.load_all().await.map_err(BootstrapError::Hydration)?;
    let hydrated = store.hydrate(persisted.clone());
    info!(
        event_name = "system.bootstrap.alerts_hydrated",
        correlation_id = "bootstrap",
        hydrated,
        "alert records reloaded"
    );

    let watchdog = ResponseWatchdog::new(
        store.clone(),
        responses.clone(),
        delivery.clone(),
        recorder.clone(),
        templates.clone(),
        WatchdogSettings {
            grace: sla.grace(),
            manager_targets: sla.manager_targets.clone(),
            final_threshold: thresholds.final_threshold().clone(),
        },
    );
    let now = Utc::now();
    let mut resumed = 0;
    for record in &persisted {
        if watchdog.resume(record, now).await == Some(ArmOutcome::Armed) {
            resumed += 1;
        }
    }
    info!(
        event_name = "system.bootstrap.watchdogs_resumed",
        correlation_id = "bootstrap",
        resumed,
        "manager escalation watchdogs re-armed"
    );

    let pending_store = Arc::new(SqlPendingQuoteRepository::new(db_pool.clone()));
    let pending = PendingQuotes::with_store(pending_store.clone());
    let reloaded =
        pending.hydrate(pending_store.load_all().await.map_err(BootstrapError::Hydration)?);
    info!(
        event_name = "system.bootstrap.pending_hydrated",
        correlation_id = "bootstrap",
        reloaded,
        "pending quotes reloaded"
    );

    let intent = IntentGate::new(
        config.vocabulary.quote_request.clone(),
        capabilities.classifier,
        recorder.clone(),
        sla.classifier_timeout(),
    );

    let checklist = ChecklistRunner::new(
        config.vocabulary.clone(),
        directory.clone(),
        delivery.clone(),
        recorder.clone(),
        templates.clone(),
    );

    let engine = EscalationEngine::new(EngineParts {
        window,
        thresholds,
        intent,
        store,
        directory,
        delivery,
        recorder,
        templates,
        watchdog,
    });

    Ok(AppState::new(
        Arc::new(engine),
        Arc::new(checklist),
        responses,
        Arc::new(pending),
        db_pool,
    ))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::{TimeZone, Utc};
    use quotewatch_core::capabilities::{RecordingDispatcher, ScriptedClassifier};
    use quotewatch_core::config::{AppConfig, ConfigOverrides, LoadOptions};
    use quotewatch_core::domain::conversation::{ConversationId, InboundMessage};
    use quotewatch_core::escalation::state::AlertRecord;
    use quotewatch_db::repositories::{AlertRepository, PendingQuoteRepository};
    use quotewatch_db::{
        connect_with_settings, migrations, SqlAlertRepository, SqlPendingQuoteRepository,
    };

    use super::{assemble, bootstrap, Capabilities};

    fn options(database_url: &str, manager_targets: Option<Vec<String>>) -> LoadOptions {
        LoadOptions {
            overrides: ConfigOverrides {
                database_url: Some(database_url.to_string()),
                sla_manager_targets: manager_targets,
                ..ConfigOverrides::default()
            },
            ..LoadOptions::default()
        }
    }

    #[tokio::test]
    async fn bootstrap_fails_fast_without_manager_targets() {
        let result = bootstrap(options("sqlite::memory:", Some(Vec::new()))).await;

        let message = result.err().expect("missing manager targets must fail").to_string();
        assert!(message.contains("manager_targets"), "unexpected error: {message}");
    }

    #[tokio::test]
    async fn bootstrap_applies_migrations_and_serves_health() {
        let app = bootstrap(options("sqlite::memory:", Some(vec!["5511000000000".to_string()])))
            .await
            .expect("bootstrap should succeed");

        let (table_count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM sqlite_master \
             WHERE type = 'table' AND name IN ('alert_record', 'decision_log', 'agent_response')",
        )
        .fetch_one(&app.db_pool)
        .await
        .expect("count tables");
        assert_eq!(table_count, 3);
        assert_eq!(app.state.pending.len(), 0);

        app.db_pool.close().await;
    }

    #[tokio::test]
    async fn assemble_rehydrates_alerts_already_fired() {
        let pool = connect_with_settings("sqlite::memory:", 1, 5).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");
        let created = Utc.with_ymd_and_hms(2026, 3, 3, 12, 0, 0).single().expect("instant");
        let mut record =
            AlertRecord::new(ConversationId("maria souza".to_string()), "Carla", "Maria Souza", created);
        record.fired_thresholds.insert("6h".to_string());
        SqlAlertRepository::new(pool.clone()).upsert(&record).await.expect("seed");

        let config = AppConfig::load(options("sqlite::memory:", Some(vec!["gerencia".to_string()])))
            .expect("config");
        let state = assemble(
            &config,
            pool,
            Capabilities {
                classifier: Arc::new(ScriptedClassifier::answering("yes")),
                dispatcher: Arc::new(RecordingDispatcher::default()),
            },
        )
        .await
        .expect("assemble");

        let loaded = state.engine.alert_record(&record.conversation_id).await.expect("hydrated");
        assert!(loaded.fired_thresholds.contains("6h"));
        assert_eq!(state.engine.watchdog().armed_count(), 0);
    }

    #[tokio::test]
    async fn assemble_rearms_watchdogs_and_reloads_pending_quotes() {
        let pool = connect_with_settings("sqlite::memory:", 1, 5).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");
        let final_at = Utc::now() - chrono::Duration::minutes(3);

        let mut waiting = AlertRecord::new(
            ConversationId("maria souza".to_string()),
            "Carla",
            "Maria Souza",
            final_at,
        );
        waiting.fired_thresholds.insert("18h".to_string());
        waiting.final_fired_at = Some(final_at);
        let mut escalated = AlertRecord::new(
            ConversationId("joao".to_string()),
            "Carla",
            "João",
            final_at,
        );
        escalated.fired_thresholds.insert("18h".to_string());
        escalated.final_fired_at = Some(final_at);
        escalated.manager_escalated = true;
        let alerts = SqlAlertRepository::new(pool.clone());
        alerts.upsert(&waiting).await.expect("seed waiting");
        alerts.upsert(&escalated).await.expect("seed escalated");

        let pending_quote = InboundMessage {
            conversation_id: ConversationId("ana".to_string()),
            client_name: "Ana".to_string(),
            agent: "Carla".to_string(),
            text: "qual o valor?".to_string(),
            quote_requested_at: "2026-03-03T08:00:00".to_string(),
        };
        SqlPendingQuoteRepository::new(pool.clone())
            .upsert(&pending_quote)
            .await
            .expect("seed pending");

        let config = AppConfig::load(options("sqlite::memory:", Some(vec!["gerencia".to_string()])))
            .expect("config");
        let state = assemble(
            &config,
            pool,
            Capabilities {
                classifier: Arc::new(ScriptedClassifier::answering("yes")),
                dispatcher: Arc::new(RecordingDispatcher::default()),
            },
        )
        .await
        .expect("assemble");

        assert!(state.engine.watchdog().is_armed(&waiting.conversation_id));
        assert!(!state.engine.watchdog().is_armed(&escalated.conversation_id));
        assert_eq!(state.pending.snapshot(), vec![pending_quote]);
    }
}

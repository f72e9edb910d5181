use std::sync::Arc;
use std::time::Duration;

use axum::routing::{get, post};
use axum::Router;
use clearquote_agent::prompt::PromptError;
use clearquote_agent::{ConversationLocks, DeepSeekClient, InboundPipeline};
use clearquote_core::config::{AppConfig, ConfigError, LoadOptions};
use clearquote_db::{connect_with_settings, migrations, ConversationStore, DbPool};
use clearquote_slack::WebhookNotifier;
use clearquote_whatsapp::CloudApiSender;
use secrecy::SecretString;
use thiserror::Error;
use tracing::info;

use crate::{escalation, health, webhook};

/// Headroom the pipeline's outer model deadline gets on top of the
/// gateway's internal client timeout.
const MODEL_DEADLINE_MARGIN_SECS: u64 = 5;

pub struct Application {
    pub config: AppConfig,
    pub db_pool: DbPool,
    pub router: Router,
}

/// Shared handler state: the pipeline plus the secrets the synchronous
/// request path needs for its gates.
#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<InboundPipeline>,
    pub store: ConversationStore,
    pub verify_token: SecretString,
    pub app_secret: SecretString,
    pub signing_secret: SecretString,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("database connection failed: {0}")]
    DatabaseConnect(#[source] sqlx::Error),
    #[error("database migration failed: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),
    #[error(transparent)]
    Prompt(#[from] PromptError),
}

pub async fn bootstrap(options: LoadOptions) -> Result<Application, BootstrapError> {
    let config = AppConfig::load(options)?;
    bootstrap_with_config(config).await
}

pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(event_name = "system.bootstrap.start", "starting application bootstrap");

    let db_pool = connect_with_settings(
        &config.database.url,
        config.database.max_connections,
        config.database.timeout_secs,
    )
    .await
    .map_err(BootstrapError::DatabaseConnect)?;
    info!(event_name = "system.bootstrap.database_connected", "database connection established");

    migrations::run_pending(&db_pool).await.map_err(BootstrapError::Migration)?;
    info!(event_name = "system.bootstrap.migrations_applied", "database migrations applied");

    let system_prompt = clearquote_agent::prompt::compile(&config.llm.prompt_path)?;
    info!(
        event_name = "system.bootstrap.prompt_compiled",
        prompt_path = %config.llm.prompt_path.display(),
        "system prompt compiled"
    );

    let store = ConversationStore::new(db_pool.clone());
    let llm = Arc::new(DeepSeekClient::new(
        config.llm.api_key.clone(),
        config.llm.base_url.clone(),
        config.llm.model.clone(),
        Duration::from_secs(config.llm.timeout_secs),
    ));
    let sender = Arc::new(CloudApiSender::new(
        config.whatsapp.api_base_url.clone(),
        config.whatsapp.phone_number_id.clone(),
        config.whatsapp.access_token.clone(),
    ));
    let notifier = Arc::new(WebhookNotifier::new(config.slack.webhook_url.clone()));

    let pipeline = Arc::new(InboundPipeline::new(
        store.clone(),
        llm,
        sender,
        notifier,
        Arc::new(ConversationLocks::new()),
        system_prompt,
        Duration::from_secs(config.llm.timeout_secs + MODEL_DEADLINE_MARGIN_SECS),
    ));

    let state = AppState {
        pipeline,
        store,
        verify_token: config.whatsapp.verify_token.clone(),
        app_secret: config.whatsapp.app_secret.clone(),
        signing_secret: config.slack.signing_secret.clone(),
    };

    let router = router(state);

    Ok(Application { config, db_pool, router })
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health))
        .route("/webhook", get(webhook::verify_handshake).post(webhook::receive_webhook))
        .route("/escalation/callback", post(escalation::escalation_callback))
        .with_state(state)
}

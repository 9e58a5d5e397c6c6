use std::sync::Arc;

use thiserror::Error;
use tracing::info;

use botfleet_chat::{
    ChatSessionFactory, CommandHandler, CommandHooks, FsSessionArtifacts, NoopTransportFactory,
    ReconnectPolicy,
};
use botfleet_core::config::{AppConfig, ConfigError, LoadOptions};
use botfleet_core::errors::StoreError;
use botfleet_core::limits::RequesterLimits;
use botfleet_core::orchestrator::{FleetOrchestrator, ReconcileError};
use botfleet_core::pipeline::{RetrievalPipeline, RetrievalService};
use botfleet_core::tasks::TaskRegistry;
use botfleet_db::{connect_with_config, migrations, DbPool, SqlDeliveryCache, SqlTenantStore};

use crate::fetch::HttpObjectFetcher;
use crate::health::HealthState;
use crate::resolver::PassthroughResolver;

pub struct Application {
    pub config: AppConfig,
    pub db_pool: DbPool,
    pub orchestrator: Arc<FleetOrchestrator>,
    pub registry: Arc<TaskRegistry>,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("database connection failed: {0}")]
    DatabaseConnect(#[source] sqlx::Error),
    #[error("database migration failed: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),
    #[error("session data directory unavailable: {0}")]
    DataDirectory(#[source] StoreError),
    #[error("object fetch client could not be built: {0}")]
    FetchClient(#[source] reqwest::Error),
    #[error("fleet start failed: {0}")]
    Start(#[source] ReconcileError),
}

impl Application {
    pub fn health_state(&self) -> HealthState {
        HealthState {
            db_pool: self.db_pool.clone(),
            sessions: self.orchestrator.directory(),
            registry: Arc::clone(&self.registry),
        }
    }

    /// Seeds the default tenant and launches the reconciliation loop.
    pub async fn start(&self) -> Result<(), BootstrapError> {
        self.orchestrator.start().await.map_err(BootstrapError::Start)
    }

    /// Stops sessions first so no new work arrives, then drains the tasks.
    pub async fn shutdown(&self) {
        self.orchestrator.shutdown().await;
        self.registry.shutdown().await;
        self.db_pool.close().await;
        info!(
            event_name = "system.shutdown.completed",
            correlation_id = "shutdown",
            "application shut down"
        );
    }
}

pub async fn bootstrap(options: LoadOptions) -> Result<Application, BootstrapError> {
    let config = AppConfig::load(options)?;
    bootstrap_with_config(config).await
}

pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(
        event_name = "system.bootstrap.start",
        correlation_id = "bootstrap",
        "starting application bootstrap"
    );

    let db_pool =
        connect_with_config(&config.database).await.map_err(BootstrapError::DatabaseConnect)?;
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

    let artifacts = FsSessionArtifacts::new(config.fleet.data_directory.clone());
    artifacts.ensure_directory().await.map_err(BootstrapError::DataDirectory)?;

    let store = Arc::new(SqlTenantStore::new(db_pool.clone()));
    let cache = Arc::new(SqlDeliveryCache::new(db_pool.clone()));
    let transports = Arc::new(NoopTransportFactory);
    let factory = Arc::new(ChatSessionFactory::new(transports, ReconnectPolicy::default()));
    let artifacts = Arc::new(artifacts);
    let fleet = FleetOrchestrator::new(store, artifacts, factory, config.fleet.settings());

    let fetcher = HttpObjectFetcher::new(&config.fetch).map_err(BootstrapError::FetchClient)?;
    let pipeline = RetrievalPipeline::new(
        fleet.directory(),
        Arc::new(fetcher),
        cache.clone(),
        config.tasks.pipeline_settings(),
    );
    let registry = TaskRegistry::new(Arc::new(RequesterLimits::default()));
    let retrievals = RetrievalService::new(Arc::clone(&registry), Arc::new(pipeline));
    let handler = CommandHandler::new(retrievals, Arc::new(PassthroughResolver), cache);
    let orchestrator = Arc::new(fleet.with_hooks(Arc::new(CommandHooks::new(Arc::new(handler)))));

    info!(
        event_name = "system.bootstrap.wired",
        correlation_id = "bootstrap",
        data_directory = %config.fleet.data_directory.display(),
        shards = config.fleet.shards,
        "fleet orchestrator and retrieval pipeline wired"
    );

    Ok(Application { config, db_pool, orchestrator, registry })
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use botfleet_core::config::{AppConfig, ConfigOverrides, DefaultTenantConfig, LoadOptions};
    use botfleet_core::domain::tenant::{TenantId, TenantPhase};
    use botfleet_core::ports::DesiredStateStore;
    use botfleet_db::SqlTenantStore;

    use crate::bootstrap::{bootstrap, bootstrap_with_config};

    #[tokio::test]
    async fn bootstrap_fails_fast_on_invalid_polling_interval() {
        let dir = tempfile::tempdir().expect("tempdir");
        let result = bootstrap(LoadOptions {
            overrides: ConfigOverrides {
                database_url: Some("sqlite::memory:".to_string()),
                data_directory: Some(dir.path().join("sessions")),
                polling_interval_secs: Some(0),
                ..ConfigOverrides::default()
            },
            ..LoadOptions::default()
        })
        .await;

        let message = result.err().expect("bootstrap should reject config").to_string();
        assert!(message.contains("polling_interval_secs"), "unexpected error: {message}");
    }

    #[tokio::test]
    async fn startup_seeds_default_tenant_and_shutdown_drains() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut config = AppConfig::default();
        config.database.url = "sqlite::memory:?cache=shared".to_string();
        config.database.max_connections = 1;
        config.fleet.data_directory = dir.path().join("sessions");
        config.fleet.default_tenant = Some(DefaultTenantConfig {
            tenant_id: "main".to_string(),
            bot_token: "1:token".to_string().into(),
            app_id: Some("1".to_string()),
            app_hash: Some("hash".to_string().into()),
        });

        let app = bootstrap_with_config(config).await.expect("bootstrap should succeed");
        assert!(dir.path().join("sessions").is_dir(), "data directory should be created");

        app.start().await.expect("start");
        let main = TenantId::from("main");
        for _ in 0..100 {
            if app.orchestrator.phase(&main) == Some(TenantPhase::Running) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(app.orchestrator.phase(&main), Some(TenantPhase::Running));

        let store = SqlTenantStore::new(app.db_pool.clone());
        let active = store.list_active_tenants().await.expect("list");
        assert_eq!(active.len(), 1);
        assert!(!active[0].reload_required, "reload flag should be cleared after start");

        let health = app.health_state();
        assert_eq!(health.sessions.running_count(), 1);

        app.shutdown().await;
        assert!(app.registry.is_shutting_down());
        assert!(app.orchestrator.running_tenants().is_empty());
    }
}

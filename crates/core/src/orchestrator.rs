//! Multi-tenant connection orchestrator.
//!
//! A timer-driven loop reconciles the live session table against the desired
//! state store. Each tenant moves `Absent -> Starting -> Running -> Stopping
//! -> Absent`; a failed start goes straight back to `Absent`. Per-tenant
//! failures are logged and never abort the loop.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::domain::tenant::{StartMode, TenantConfig, TenantId, TenantPhase};
use crate::errors::{SessionError, StoreError};
use crate::executor::{BoundedExecutor, ExecutorError};
use crate::ports::{
    ConnectionSession, DesiredStateStore, NoopSessionHooks, SessionArtifacts, SessionFactory,
    SessionHooks,
};
use crate::sessions::{LiveSessions, RunningSession};

#[derive(Clone, Debug)]
pub struct FleetSettings {
    pub polling_interval: Duration,
    pub shards: usize,
    pub default_tenant: Option<TenantConfig>,
}

impl Default for FleetSettings {
    fn default() -> Self {
        Self { polling_interval: Duration::from_secs(600), shards: 8, default_tenant: None }
    }
}

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("desired state unavailable: {0}")]
    DesiredState(#[source] StoreError),
    #[error(transparent)]
    Executor(#[from] ExecutorError),
}

/// Counters for one reconciliation cycle.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub desired: usize,
    pub reloaded: usize,
    pub reconnected: usize,
    pub started: usize,
    pub failed: usize,
    pub deleted: usize,
    pub stopped: usize,
    pub purged: usize,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum StartOutcome {
    Started,
    Skipped,
    Failed,
    CredentialsRevoked,
}

pub struct FleetOrchestrator {
    store: Arc<dyn DesiredStateStore>,
    artifacts: Arc<dyn SessionArtifacts>,
    factory: Arc<dyn SessionFactory>,
    hooks: Arc<dyn SessionHooks>,
    sessions: Arc<LiveSessions>,
    settings: FleetSettings,
    cancel: CancellationToken,
    loop_handle: Mutex<Option<JoinHandle<()>>>,
}

impl FleetOrchestrator {
    pub fn new(
        store: Arc<dyn DesiredStateStore>,
        artifacts: Arc<dyn SessionArtifacts>,
        factory: Arc<dyn SessionFactory>,
        settings: FleetSettings,
    ) -> Self {
        Self {
            store,
            artifacts,
            factory,
            hooks: Arc::new(NoopSessionHooks),
            sessions: Arc::new(LiveSessions::new()),
            settings,
            cancel: CancellationToken::new(),
            loop_handle: Mutex::new(None),
        }
    }

    pub fn with_hooks(mut self, hooks: Arc<dyn SessionHooks>) -> Self {
        self.hooks = hooks;
        self
    }

    /// Read-only view of the session table, handed to collaborators that need
    /// to look up a tenant's live session.
    pub fn directory(&self) -> Arc<LiveSessions> {
        Arc::clone(&self.sessions)
    }

    pub fn phase(&self, tenant_id: &TenantId) -> Option<TenantPhase> {
        self.sessions.phase(tenant_id)
    }

    pub fn running_tenants(&self) -> Vec<TenantId> {
        self.sessions.running_tenants()
    }

    pub fn settings(&self) -> &FleetSettings {
        &self.settings
    }

    /// Seeds the default tenant, if configured, then launches the
    /// reconciliation loop.
    pub async fn start(self: &Arc<Self>) -> Result<(), ReconcileError> {
        if let Some(default_tenant) = self.settings.default_tenant.clone() {
            let tenant_id = default_tenant.tenant_id.clone();
            let seeded = TenantConfig { reload_required: true, deleted: false, ..default_tenant };
            self.store.upsert_tenant(seeded).await.map_err(ReconcileError::DesiredState)?;
            info!(
                event_name = "fleet.tenant.seeded",
                correlation_id = "startup",
                tenant_id = %tenant_id,
                "default tenant seeded into desired state"
            );
        }

        let orchestrator = Arc::clone(self);
        let handle = tokio::spawn(async move { orchestrator.run_loop().await });
        *self.loop_handle.lock() = Some(handle);
        Ok(())
    }

    async fn run_loop(self: Arc<Self>) {
        let mut cycle: u64 = 0;
        loop {
            if self.cancel.is_cancelled() {
                break;
            }
            cycle += 1;
            let correlation_id = format!("reconcile-{cycle}");
            match self.reconcile_once().await {
                Ok(report) => info!(
                    event_name = "fleet.reconcile.completed",
                    correlation_id = %correlation_id,
                    desired = report.desired,
                    started = report.started,
                    failed = report.failed,
                    reloaded = report.reloaded,
                    reconnected = report.reconnected,
                    deleted = report.deleted,
                    stopped = report.stopped,
                    purged = report.purged,
                    "reconciliation cycle completed"
                ),
                Err(error) => error!(
                    event_name = "fleet.reconcile.failed",
                    correlation_id = %correlation_id,
                    error = %error,
                    "reconciliation cycle failed"
                ),
            }

            let pause = tokio::time::sleep(self.settings.polling_interval);
            if self.cancel.run_until_cancelled(pause).await.is_none() {
                break;
            }
        }
        debug!(
            event_name = "fleet.reconcile.loop_exited",
            correlation_id = "shutdown",
            "reconciliation loop exited"
        );
    }

    /// Runs one reconciliation cycle.
    pub async fn reconcile_once(self: &Arc<Self>) -> Result<ReconcileReport, ReconcileError> {
        let mut report = ReconcileReport::default();

        let desired =
            self.store.list_active_tenants().await.map_err(ReconcileError::DesiredState)?;
        report.desired = desired.len();
        let desired_ids: HashSet<TenantId> =
            desired.iter().map(|config| config.tenant_id.clone()).collect();

        let fast_start = self.collect_fast_start(&desired_ids, &mut report).await;

        for config in desired.iter().filter(|config| config.reload_required) {
            let tenant_id = &config.tenant_id;
            self.stop_tenant(tenant_id).await;
            if let Err(error) = self.store.clear_reload_flag(tenant_id).await {
                warn!(
                    event_name = "fleet.tenant.reload_flag_failed",
                    correlation_id = %tenant_id,
                    tenant_id = %tenant_id,
                    error = %error,
                    "could not clear reload flag"
                );
            }
            report.reloaded += 1;
        }

        for running in self.sessions.running_sessions() {
            let tenant_id = &running.tenant_id;
            if !desired_ids.contains(tenant_id) || running.session.is_connected() {
                continue;
            }
            warn!(
                event_name = "fleet.tenant.disconnected",
                correlation_id = %tenant_id,
                tenant_id = %tenant_id,
                "running session lost its connection; restarting"
            );
            self.stop_tenant(tenant_id).await;
            report.reconnected += 1;
        }

        let mut to_start: Vec<(TenantConfig, StartMode)> = desired
            .iter()
            .filter(|config| self.sessions.phase(&config.tenant_id).is_none())
            .map(|config| {
                let mode = if fast_start.contains(&config.tenant_id) {
                    StartMode::Resume
                } else {
                    StartMode::Fresh
                };
                (config.clone(), mode)
            })
            .collect();
        to_start.sort_by_key(|(config, _)| !config.priority);

        let executor = BoundedExecutor::new(self.settings.shards)?;
        let mut launched = Vec::with_capacity(to_start.len());
        for (config, mode) in to_start {
            if self.cancel.is_cancelled() {
                info!(
                    event_name = "fleet.reconcile.start_skipped",
                    correlation_id = %config.tenant_id,
                    tenant_id = %config.tenant_id,
                    "shutdown requested; remaining starts skipped"
                );
                break;
            }
            let orchestrator = Arc::clone(self);
            let tenant_id = config.tenant_id.clone();
            let start = async move { orchestrator.start_tenant(config, mode).await };
            let handle = executor.submit(start).await?;
            launched.push((tenant_id, handle));
        }
        executor.drain().await?;

        for (tenant_id, handle) in launched {
            let outcome = match handle.await {
                Ok(outcome) => outcome,
                Err(error) => {
                    error!(
                        event_name = "fleet.tenant.start_panicked",
                        correlation_id = %tenant_id,
                        tenant_id = %tenant_id,
                        error = %error,
                        "tenant start aborted"
                    );
                    // A panic inside the start path may leave the claim behind.
                    self.sessions.abort_start(&tenant_id);
                    StartOutcome::Failed
                }
            };
            match outcome {
                StartOutcome::Started => report.started += 1,
                StartOutcome::Failed => report.failed += 1,
                StartOutcome::CredentialsRevoked => {
                    report.failed += 1;
                    report.deleted += 1;
                }
                StartOutcome::Skipped => {}
            }
        }

        let obsolete: Vec<TenantId> = self
            .sessions
            .running_tenants()
            .into_iter()
            .filter(|tenant_id| !desired_ids.contains(tenant_id))
            .collect();
        for tenant_id in obsolete {
            if self.stop_tenant(&tenant_id).await {
                report.stopped += 1;
            }
            if self.purge_artifacts(&tenant_id).await {
                report.purged += 1;
            }
        }

        Ok(report)
    }

    /// Tenants with session material on disk but no live session. Undesired
    /// ones are purged; the rest can resume their previous session.
    async fn collect_fast_start(
        &self,
        desired_ids: &HashSet<TenantId>,
        report: &mut ReconcileReport,
    ) -> HashSet<TenantId> {
        let on_disk = match self.artifacts.list().await {
            Ok(on_disk) => on_disk,
            Err(error) => {
                warn!(
                    event_name = "fleet.artifacts.list_failed",
                    correlation_id = "reconcile",
                    error = %error,
                    "could not list session artifacts"
                );
                return HashSet::new();
            }
        };

        let mut fast_start = HashSet::new();
        for tenant_id in on_disk {
            if self.sessions.phase(&tenant_id).is_some() {
                continue;
            }
            if desired_ids.contains(&tenant_id) {
                fast_start.insert(tenant_id);
            } else if self.purge_artifacts(&tenant_id).await {
                report.purged += 1;
            }
        }
        fast_start
    }

    async fn start_tenant(&self, config: TenantConfig, mode: StartMode) -> StartOutcome {
        let tenant_id = config.tenant_id.clone();
        if !self.sessions.try_begin_start(&tenant_id) {
            debug!(
                event_name = "fleet.tenant.start_skipped",
                correlation_id = %tenant_id,
                tenant_id = %tenant_id,
                "tenant already has a session"
            );
            return StartOutcome::Skipped;
        }

        match self.open_session(&config, mode).await {
            Ok(session) => {
                self.sessions.finish_start(RunningSession {
                    tenant_id: tenant_id.clone(),
                    session: Arc::clone(&session),
                    started_at: Utc::now(),
                });
                self.hooks.post_start(&config, &session).await;
                info!(
                    event_name = "fleet.tenant.started",
                    correlation_id = %tenant_id,
                    tenant_id = %tenant_id,
                    start_mode = mode.as_str(),
                    priority = config.priority,
                    "tenant session started"
                );
                StartOutcome::Started
            }
            Err(error) if error.is_credentials() => {
                self.sessions.abort_start(&tenant_id);
                warn!(
                    event_name = "fleet.tenant.credentials_revoked",
                    correlation_id = %tenant_id,
                    tenant_id = %tenant_id,
                    error = %error,
                    "tenant credentials rejected; marking deleted"
                );
                if let Err(error) = self.store.mark_deleted(&tenant_id).await {
                    error!(
                        event_name = "fleet.tenant.mark_deleted_failed",
                        correlation_id = %tenant_id,
                        tenant_id = %tenant_id,
                        error = %error,
                        "could not mark tenant deleted"
                    );
                }
                self.purge_artifacts(&tenant_id).await;
                StartOutcome::CredentialsRevoked
            }
            Err(error) => {
                self.sessions.abort_start(&tenant_id);
                warn!(
                    event_name = "fleet.tenant.start_failed",
                    correlation_id = %tenant_id,
                    tenant_id = %tenant_id,
                    start_mode = mode.as_str(),
                    error = %error,
                    "tenant session failed to start; will retry next cycle"
                );
                StartOutcome::Failed
            }
        }
    }

    async fn open_session(
        &self,
        config: &TenantConfig,
        mode: StartMode,
    ) -> Result<Arc<dyn ConnectionSession>, SessionError> {
        let session = self.factory.create(config, mode)?;
        session.start().await?;
        Ok(session)
    }

    /// Stops a running tenant. Returns `false` when it was not running.
    async fn stop_tenant(&self, tenant_id: &TenantId) -> bool {
        let Some(running) = self.sessions.begin_stop(tenant_id) else {
            return false;
        };

        self.hooks.pre_stop(tenant_id, &running.session).await;
        if let Err(error) = running.session.stop().await {
            warn!(
                event_name = "fleet.tenant.stop_failed",
                correlation_id = %tenant_id,
                tenant_id = %tenant_id,
                error = %error,
                "session stop reported an error"
            );
        }
        self.sessions.finish_stop(tenant_id);

        let uptime_secs = (Utc::now() - running.started_at).num_seconds();
        info!(
            event_name = "fleet.tenant.stopped",
            correlation_id = %tenant_id,
            tenant_id = %tenant_id,
            uptime_secs,
            "tenant session stopped"
        );
        true
    }

    async fn purge_artifacts(&self, tenant_id: &TenantId) -> bool {
        match self.artifacts.purge(tenant_id).await {
            Ok(()) => {
                debug!(
                    event_name = "fleet.artifacts.purged",
                    correlation_id = %tenant_id,
                    tenant_id = %tenant_id,
                    "session artifacts purged"
                );
                true
            }
            Err(error) => {
                warn!(
                    event_name = "fleet.artifacts.purge_failed",
                    correlation_id = %tenant_id,
                    tenant_id = %tenant_id,
                    error = %error,
                    "could not purge session artifacts"
                );
                false
            }
        }
    }

    /// Cancels the loop, waits for it to exit, then stops every session.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let handle = self.loop_handle.lock().take();
        if let Some(handle) = handle {
            if let Err(error) = handle.await {
                error!(
                    event_name = "fleet.reconcile.loop_panicked",
                    correlation_id = "shutdown",
                    error = %error,
                    "reconciliation loop ended abnormally"
                );
            }
        }

        let running = self.sessions.running_tenants();
        info!(
            event_name = "fleet.shutdown.stopping_sessions",
            correlation_id = "shutdown",
            sessions = running.len(),
            "stopping all tenant sessions"
        );
        let mut stopped = 0_usize;
        for tenant_id in running {
            if self.stop_tenant(&tenant_id).await {
                stopped += 1;
            }
        }
        debug!(
            event_name = "fleet.shutdown.completed",
            correlation_id = "shutdown",
            stopped,
            "orchestrator shut down"
        );
    }
}

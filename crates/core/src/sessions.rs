//! Live session table: the single source of truth for which tenants have a
//! session and in which lifecycle phase. Only the orchestrator mutates it.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use crate::domain::tenant::{TenantId, TenantPhase};
use crate::ports::{ConnectionSession, SessionDirectory};

#[derive(Clone)]
pub struct RunningSession {
    pub tenant_id: TenantId,
    pub session: Arc<dyn ConnectionSession>,
    pub started_at: DateTime<Utc>,
}

impl std::fmt::Debug for RunningSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunningSession")
            .field("tenant_id", &self.tenant_id)
            .field("started_at", &self.started_at)
            .finish_non_exhaustive()
    }
}

enum TenantSlot {
    Starting,
    Running(RunningSession),
    Stopping,
}

impl TenantSlot {
    fn phase(&self) -> TenantPhase {
        match self {
            Self::Starting => TenantPhase::Starting,
            Self::Running(_) => TenantPhase::Running,
            Self::Stopping => TenantPhase::Stopping,
        }
    }
}

#[derive(Default)]
pub struct LiveSessions {
    slots: Mutex<HashMap<TenantId, TenantSlot>>,
}

impl LiveSessions {
    pub fn new() -> Self {
        Self::default()
    }

    /// `None` means the tenant is absent.
    pub fn phase(&self, tenant_id: &TenantId) -> Option<TenantPhase> {
        self.slots.lock().get(tenant_id).map(TenantSlot::phase)
    }

    pub fn running(&self, tenant_id: &TenantId) -> Option<RunningSession> {
        match self.slots.lock().get(tenant_id) {
            Some(TenantSlot::Running(running)) => Some(running.clone()),
            _ => None,
        }
    }

    /// Running sessions ordered by tenant id.
    pub fn running_sessions(&self) -> Vec<RunningSession> {
        let mut running: Vec<_> = self
            .slots
            .lock()
            .values()
            .filter_map(|slot| match slot {
                TenantSlot::Running(running) => Some(running.clone()),
                _ => None,
            })
            .collect();
        running.sort_by(|left, right| left.tenant_id.cmp(&right.tenant_id));
        running
    }

    pub fn running_tenants(&self) -> Vec<TenantId> {
        self.running_sessions().into_iter().map(|running| running.tenant_id).collect()
    }

    pub fn running_count(&self) -> usize {
        self.slots.lock().values().filter(|slot| matches!(slot, TenantSlot::Running(_))).count()
    }

    /// Claims the tenant for start-up. Fails if the tenant is in any phase.
    pub(crate) fn try_begin_start(&self, tenant_id: &TenantId) -> bool {
        let mut slots = self.slots.lock();
        if slots.contains_key(tenant_id) {
            return false;
        }
        slots.insert(tenant_id.clone(), TenantSlot::Starting);
        true
    }

    pub(crate) fn finish_start(&self, running: RunningSession) {
        let mut slots = self.slots.lock();
        if let Some(slot) = slots.get_mut(&running.tenant_id) {
            if matches!(slot, TenantSlot::Starting) {
                *slot = TenantSlot::Running(running);
            }
        }
    }

    pub(crate) fn abort_start(&self, tenant_id: &TenantId) {
        let mut slots = self.slots.lock();
        if matches!(slots.get(tenant_id), Some(TenantSlot::Starting)) {
            slots.remove(tenant_id);
        }
    }

    /// Moves a running tenant to `Stopping` and hands back its session.
    pub(crate) fn begin_stop(&self, tenant_id: &TenantId) -> Option<RunningSession> {
        let mut slots = self.slots.lock();
        let slot = slots.get_mut(tenant_id)?;
        match std::mem::replace(slot, TenantSlot::Stopping) {
            TenantSlot::Running(running) => Some(running),
            other => {
                *slot = other;
                None
            }
        }
    }

    pub(crate) fn finish_stop(&self, tenant_id: &TenantId) {
        let mut slots = self.slots.lock();
        if matches!(slots.get(tenant_id), Some(TenantSlot::Stopping)) {
            slots.remove(tenant_id);
        }
    }
}

impl SessionDirectory for LiveSessions {
    fn session(&self, tenant_id: &TenantId) -> Option<Arc<dyn ConnectionSession>> {
        self.running(tenant_id).map(|running| running.session)
    }
}

use std::sync::Arc;

use tracing::warn;

use botfleet_core::domain::tenant::{StartMode, TenantConfig};
use botfleet_core::errors::SessionError;
use botfleet_core::ports::{ConnectionSession, SessionFactory};

use crate::session::ChatSession;
use crate::transport::{ReconnectPolicy, TransportFactory};

/// Builds [`ChatSession`]s after checking that the tenant's credentials are
/// complete. Incomplete credentials are reported as a credential failure so
/// the orchestrator retires the tenant instead of retrying it every cycle.
pub struct ChatSessionFactory {
    transports: Arc<dyn TransportFactory>,
    reconnect: ReconnectPolicy,
}

impl ChatSessionFactory {
    pub fn new(transports: Arc<dyn TransportFactory>, reconnect: ReconnectPolicy) -> Self {
        Self { transports, reconnect }
    }
}

impl SessionFactory for ChatSessionFactory {
    fn create(
        &self,
        config: &TenantConfig,
        mode: StartMode,
    ) -> Result<Arc<dyn ConnectionSession>, SessionError> {
        if let Some(field) = config.credentials.missing_field() {
            warn!(
                event_name = "chat.session.credentials_incomplete",
                correlation_id = %config.tenant_id,
                tenant_id = %config.tenant_id,
                field,
                "tenant credentials are incomplete"
            );
            return Err(SessionError::CredentialsInvalid(format!("missing {field}")));
        }

        let transport = self.transports.open(config, mode)?;
        let session: Arc<dyn ConnectionSession> =
            ChatSession::new(config.tenant_id.clone(), transport, self.reconnect.clone());
        Ok(session)
    }
}

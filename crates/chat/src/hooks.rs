use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use botfleet_core::domain::tenant::{TenantConfig, TenantId};
use botfleet_core::ports::{ConnectionSession, InboundHandler, SessionHooks};

/// Subscribes the shared inbound handler to each session after it starts and
/// detaches everything before it stops.
pub struct CommandHooks {
    handler: Arc<dyn InboundHandler>,
}

impl CommandHooks {
    pub fn new(handler: Arc<dyn InboundHandler>) -> Self {
        Self { handler }
    }
}

#[async_trait]
impl SessionHooks for CommandHooks {
    async fn post_start(&self, config: &TenantConfig, session: &Arc<dyn ConnectionSession>) {
        session.subscribe(Arc::clone(&self.handler));
        debug!(
            event_name = "chat.hooks.subscribed",
            correlation_id = %config.tenant_id,
            tenant_id = %config.tenant_id,
            "inbound handlers attached"
        );
    }

    async fn pre_stop(&self, tenant_id: &TenantId, session: &Arc<dyn ConnectionSession>) {
        session.clear_subscriptions();
        debug!(
            event_name = "chat.hooks.cleared",
            correlation_id = %tenant_id,
            tenant_id = %tenant_id,
            "inbound handlers detached"
        );
    }
}

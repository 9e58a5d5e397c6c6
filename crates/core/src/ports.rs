//! Capability interfaces consumed by the fleet runtime.
//!
//! Everything behind these traits is an external collaborator: the chat
//! protocol client, the desired-state store, the object-fetch backend, the
//! delivery cache and the on-disk session material.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;

use crate::domain::chat::{ChatId, InboundEvent, MessageRef};
use crate::domain::content::{
    ArtifactHandle, ContentId, DeliveredArtifact, OutboundArtifact, RetrievalTarget,
};
use crate::domain::tenant::{StartMode, TenantConfig, TenantId};
use crate::errors::{FetchError, ProgressError, SessionError, StoreError};

/// Receives cumulative transfer progress during a delivery.
#[async_trait]
pub trait ProgressObserver: Send {
    async fn on_progress(&mut self, done: u64, total: Option<u64>) -> Result<(), ProgressError>;
}

/// Observer for deliveries that do not report progress.
#[derive(Default)]
pub struct NoProgress;

#[async_trait]
impl ProgressObserver for NoProgress {
    async fn on_progress(&mut self, _done: u64, _total: Option<u64>) -> Result<(), ProgressError> {
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HandlerResult {
    Handled,
    Ignored,
}

#[async_trait]
pub trait InboundHandler: Send + Sync {
    async fn handle(&self, session: &dyn ConnectionSession, event: &InboundEvent)
        -> HandlerResult;
}

/// One authenticated, stateful connection to the chat platform.
#[async_trait]
pub trait ConnectionSession: Send + Sync {
    fn tenant_id(&self) -> &TenantId;
    async fn start(&self) -> Result<(), SessionError>;
    async fn stop(&self) -> Result<(), SessionError>;
    fn is_connected(&self) -> bool;
    async fn send(&self, chat_id: &ChatId, text: &str) -> Result<MessageRef, SessionError>;
    async fn edit(&self, message: &MessageRef, text: &str) -> Result<(), SessionError>;
    async fn delete(&self, messages: &[MessageRef]) -> Result<(), SessionError>;
    async fn deliver(
        &self,
        chat_id: &ChatId,
        artifact: OutboundArtifact,
        progress: &mut (dyn ProgressObserver + Send),
    ) -> Result<DeliveredArtifact, SessionError>;
    fn subscribe(&self, handler: Arc<dyn InboundHandler>);
    fn clear_subscriptions(&self);
}

pub trait SessionFactory: Send + Sync {
    fn create(
        &self,
        config: &TenantConfig,
        mode: StartMode,
    ) -> Result<Arc<dyn ConnectionSession>, SessionError>;
}

/// Read-only lookup of live sessions by tenant.
pub trait SessionDirectory: Send + Sync {
    fn session(&self, tenant_id: &TenantId) -> Option<Arc<dyn ConnectionSession>>;
}

/// Per-tenant lifecycle callbacks injected at orchestrator construction.
#[async_trait]
pub trait SessionHooks: Send + Sync {
    async fn post_start(&self, config: &TenantConfig, session: &Arc<dyn ConnectionSession>);
    async fn pre_stop(&self, tenant_id: &TenantId, session: &Arc<dyn ConnectionSession>);
}

#[derive(Default)]
pub struct NoopSessionHooks;

#[async_trait]
impl SessionHooks for NoopSessionHooks {
    async fn post_start(&self, _config: &TenantConfig, _session: &Arc<dyn ConnectionSession>) {}

    async fn pre_stop(&self, _tenant_id: &TenantId, _session: &Arc<dyn ConnectionSession>) {}
}

#[async_trait]
pub trait DesiredStateStore: Send + Sync {
    /// All tenants that are not marked deleted, in stable order.
    async fn list_active_tenants(&self) -> Result<Vec<TenantConfig>, StoreError>;
    async fn clear_reload_flag(&self, tenant_id: &TenantId) -> Result<(), StoreError>;
    async fn mark_deleted(&self, tenant_id: &TenantId) -> Result<(), StoreError>;
    async fn upsert_tenant(&self, config: TenantConfig) -> Result<(), StoreError>;
}

pub type ChunkStream = BoxStream<'static, Result<Bytes, FetchError>>;

#[async_trait]
pub trait ObjectFetcher: Send + Sync {
    async fn fetch_chunks(&self, content_id: &ContentId) -> Result<ChunkStream, FetchError>;
}

#[async_trait]
pub trait DeliveryCache: Send + Sync {
    async fn get(
        &self,
        recipient: &TenantId,
        content_id: &ContentId,
    ) -> Result<Option<ArtifactHandle>, StoreError>;
    async fn put(
        &self,
        recipient: &TenantId,
        content_id: &ContentId,
        handle: &ArtifactHandle,
    ) -> Result<(), StoreError>;
    /// Drops the entry for every recipient. Returns the number of rows removed.
    async fn invalidate(&self, content_id: &ContentId) -> Result<u64, StoreError>;
}

#[async_trait]
pub trait SessionArtifacts: Send + Sync {
    /// Tenants with session material present on disk.
    async fn list(&self) -> Result<Vec<TenantId>, StoreError>;
    async fn exists(&self, tenant_id: &TenantId) -> Result<bool, StoreError>;
    async fn purge(&self, tenant_id: &TenantId) -> Result<(), StoreError>;
}

/// Resolves a content id to a deliverable target through the document
/// search backend.
#[async_trait]
pub trait TargetResolver: Send + Sync {
    async fn resolve(&self, content_id: &ContentId) -> Result<Option<RetrievalTarget>, StoreError>;
}

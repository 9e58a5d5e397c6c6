use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

use botfleet_core::domain::chat::{ChatId, RequesterId};
use botfleet_core::domain::content::ArtifactHandle;
use botfleet_core::domain::tenant::{StartMode, TenantConfig};
use botfleet_core::errors::{ProgressError, SessionError};
use botfleet_core::ports::ProgressObserver;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("transport failed to connect: {0}")]
    Connect(String),
    #[error("transport rejected credentials: {0}")]
    Unauthorized(String),
    #[error("transport read failed: {0}")]
    Receive(String),
    #[error("transport send failed: {0}")]
    Send(String),
    #[error("message not found")]
    MessageNotFound,
    #[error("transport disconnect failed: {0}")]
    Disconnect(String),
    #[error(transparent)]
    Progress(#[from] ProgressError),
}

impl From<TransportError> for SessionError {
    fn from(error: TransportError) -> Self {
        match error {
            TransportError::Unauthorized(reason) => Self::CredentialsInvalid(reason),
            TransportError::MessageNotFound => Self::MessageNotFound,
            TransportError::Progress(progress) => Self::Progress(progress),
            other => Self::Transport(other.to_string()),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self { max_retries: 5, base_delay_ms: 250, max_delay_ms: 5_000 }
    }
}

impl ReconnectPolicy {
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.min(16);
        let multiplier = 1_u64 << exponent;
        let delay_ms = self.base_delay_ms.saturating_mul(multiplier).min(self.max_delay_ms);
        Duration::from_millis(delay_ms)
    }
}

/// A message received from the platform for this bot.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InboundMessage {
    pub chat_id: ChatId,
    pub requester_id: RequesterId,
    pub message_id: String,
    pub text: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Uploaded {
    pub handle: ArtifactHandle,
    pub message_id: String,
}

/// Wire-level client for one bot account. The protocol itself lives outside
/// this crate.
#[async_trait]
pub trait ChatTransport: Send + Sync {
    async fn connect(&self) -> Result<(), TransportError>;
    /// `Ok(None)` means the platform closed the update stream.
    async fn next_message(&self) -> Result<Option<InboundMessage>, TransportError>;
    async fn send_text(&self, chat_id: &ChatId, text: &str) -> Result<String, TransportError>;
    async fn edit_text(
        &self,
        chat_id: &ChatId,
        message_id: &str,
        text: &str,
    ) -> Result<(), TransportError>;
    async fn delete_messages(
        &self,
        chat_id: &ChatId,
        message_ids: &[String],
    ) -> Result<(), TransportError>;
    async fn send_cached(
        &self,
        chat_id: &ChatId,
        handle: &ArtifactHandle,
    ) -> Result<String, TransportError>;
    async fn upload(
        &self,
        chat_id: &ChatId,
        filename: &str,
        data: Bytes,
        progress: &mut (dyn ProgressObserver + Send),
    ) -> Result<Uploaded, TransportError>;
    async fn disconnect(&self) -> Result<(), TransportError>;
}

/// Opens a transport for a tenant.
pub trait TransportFactory: Send + Sync {
    fn open(
        &self,
        config: &TenantConfig,
        mode: StartMode,
    ) -> Result<Arc<dyn ChatTransport>, TransportError>;
}

/// Transport that accepts every call and never receives anything.
#[derive(Default)]
pub struct NoopChatTransport {
    next_id: AtomicU64,
}

impl NoopChatTransport {
    fn next_id(&self) -> String {
        (self.next_id.fetch_add(1, Ordering::Relaxed) + 1).to_string()
    }
}

#[async_trait]
impl ChatTransport for NoopChatTransport {
    async fn connect(&self) -> Result<(), TransportError> {
        Ok(())
    }

    async fn next_message(&self) -> Result<Option<InboundMessage>, TransportError> {
        std::future::pending().await
    }

    async fn send_text(&self, _chat_id: &ChatId, _text: &str) -> Result<String, TransportError> {
        Ok(self.next_id())
    }

    async fn edit_text(
        &self,
        _chat_id: &ChatId,
        _message_id: &str,
        _text: &str,
    ) -> Result<(), TransportError> {
        Ok(())
    }

    async fn delete_messages(
        &self,
        _chat_id: &ChatId,
        _message_ids: &[String],
    ) -> Result<(), TransportError> {
        Ok(())
    }

    async fn send_cached(
        &self,
        _chat_id: &ChatId,
        _handle: &ArtifactHandle,
    ) -> Result<String, TransportError> {
        Ok(self.next_id())
    }

    async fn upload(
        &self,
        _chat_id: &ChatId,
        filename: &str,
        data: Bytes,
        progress: &mut (dyn ProgressObserver + Send),
    ) -> Result<Uploaded, TransportError> {
        let total = data.len() as u64;
        progress.on_progress(total, Some(total)).await?;
        let message_id = self.next_id();
        Ok(Uploaded { handle: ArtifactHandle(format!("noop:{filename}:{message_id}")), message_id })
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        Ok(())
    }
}

#[derive(Default)]
pub struct NoopTransportFactory;

impl TransportFactory for NoopTransportFactory {
    fn open(
        &self,
        _config: &TenantConfig,
        _mode: StartMode,
    ) -> Result<Arc<dyn ChatTransport>, TransportError> {
        Ok(Arc::new(NoopChatTransport::default()))
    }
}

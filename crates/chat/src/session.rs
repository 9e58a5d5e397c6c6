//! `ConnectionSession` adapter over a [`ChatTransport`].
//!
//! `start` connects with bounded backoff and launches an event pump that
//! feeds inbound messages to the subscribed handlers in registration order.
//! The pump owns only a weak reference to the session, so dropping the last
//! strong handle ends it.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use botfleet_core::domain::chat::{ChatId, InboundEvent, MessageRef};
use botfleet_core::domain::content::{DeliveredArtifact, OutboundArtifact};
use botfleet_core::domain::tenant::TenantId;
use botfleet_core::errors::SessionError;
use botfleet_core::ports::{ConnectionSession, HandlerResult, InboundHandler, ProgressObserver};

use crate::transport::{ChatTransport, InboundMessage, ReconnectPolicy, TransportError};

struct Pump {
    cancel: CancellationToken,
    join: JoinHandle<()>,
}

pub struct ChatSession {
    tenant_id: TenantId,
    transport: Arc<dyn ChatTransport>,
    reconnect: ReconnectPolicy,
    handlers: RwLock<Vec<Arc<dyn InboundHandler>>>,
    connected: AtomicBool,
    pump: Mutex<Option<Pump>>,
    this: Weak<ChatSession>,
}

impl ChatSession {
    pub fn new(
        tenant_id: TenantId,
        transport: Arc<dyn ChatTransport>,
        reconnect: ReconnectPolicy,
    ) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            tenant_id,
            transport,
            reconnect,
            handlers: RwLock::new(Vec::new()),
            connected: AtomicBool::new(false),
            pump: Mutex::new(None),
            this: this.clone(),
        })
    }

    pub fn handler_count(&self) -> usize {
        self.handlers.read().len()
    }

    async fn connect_with_backoff(&self) -> Result<(), TransportError> {
        let mut attempt = 0;
        loop {
            info!(
                event_name = "chat.session.connecting",
                correlation_id = %self.tenant_id,
                tenant_id = %self.tenant_id,
                attempt,
                "opening chat transport connection"
            );
            let error = match self.transport.connect().await {
                Ok(()) => return Ok(()),
                Err(error @ TransportError::Unauthorized(_)) => return Err(error),
                Err(error) => error,
            };

            warn!(
                event_name = "chat.session.connect_failed",
                correlation_id = %self.tenant_id,
                tenant_id = %self.tenant_id,
                attempt,
                max_retries = self.reconnect.max_retries,
                error = %error,
                "chat transport connect failed"
            );
            if attempt >= self.reconnect.max_retries {
                return Err(error);
            }

            let delay = self.reconnect.backoff(attempt);
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            attempt += 1;
        }
    }

    async fn dispatch(&self, message: InboundMessage) {
        let reference = MessageRef {
            chat_id: message.chat_id.clone(),
            message_id: message.message_id,
        };
        let event = InboundEvent {
            tenant_id: self.tenant_id.clone(),
            chat_id: message.chat_id,
            requester_id: message.requester_id,
            text: message.text,
            message: Some(reference),
        };
        let handlers = self.handlers.read().clone();
        for handler in handlers {
            if handler.handle(self, &event).await == HandlerResult::Handled {
                return;
            }
        }
        debug!(
            event_name = "chat.session.unhandled",
            correlation_id = %self.tenant_id,
            tenant_id = %self.tenant_id,
            requester_id = %event.requester_id,
            "no handler accepted inbound message"
        );
    }
}

async fn pump_events(
    session: Weak<ChatSession>,
    transport: Arc<dyn ChatTransport>,
    tenant_id: TenantId,
    cancel: CancellationToken,
) {
    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => return,
            next = transport.next_message() => next,
        };
        let Some(session) = session.upgrade() else {
            return;
        };
        match next {
            Ok(Some(message)) => session.dispatch(message).await,
            Ok(None) => {
                info!(
                    event_name = "chat.session.stream_closed",
                    correlation_id = %tenant_id,
                    tenant_id = %tenant_id,
                    "chat update stream closed"
                );
                session.connected.store(false, Ordering::SeqCst);
                return;
            }
            Err(error) => {
                warn!(
                    event_name = "chat.session.receive_failed",
                    correlation_id = %tenant_id,
                    tenant_id = %tenant_id,
                    error = %error,
                    "chat update stream failed; session marked disconnected"
                );
                session.connected.store(false, Ordering::SeqCst);
                return;
            }
        }
    }
}

#[async_trait]
impl ConnectionSession for ChatSession {
    fn tenant_id(&self) -> &TenantId {
        &self.tenant_id
    }

    async fn start(&self) -> Result<(), SessionError> {
        self.connect_with_backoff().await?;
        self.connected.store(true, Ordering::SeqCst);

        let cancel = CancellationToken::new();
        let join = tokio::spawn(pump_events(
            self.this.clone(),
            Arc::clone(&self.transport),
            self.tenant_id.clone(),
            cancel.clone(),
        ));
        if let Some(previous) = self.pump.lock().replace(Pump { cancel, join }) {
            previous.cancel.cancel();
        }
        info!(
            event_name = "chat.session.connected",
            correlation_id = %self.tenant_id,
            tenant_id = %self.tenant_id,
            "chat session connected"
        );
        Ok(())
    }

    async fn stop(&self) -> Result<(), SessionError> {
        self.connected.store(false, Ordering::SeqCst);
        let pump = self.pump.lock().take();
        if let Some(pump) = pump {
            pump.cancel.cancel();
            if let Err(error) = pump.join.await {
                warn!(
                    event_name = "chat.session.pump_failed",
                    correlation_id = %self.tenant_id,
                    tenant_id = %self.tenant_id,
                    error = %error,
                    "event pump ended abnormally"
                );
            }
        }
        self.transport.disconnect().await?;
        info!(
            event_name = "chat.session.disconnected",
            correlation_id = %self.tenant_id,
            tenant_id = %self.tenant_id,
            "chat session stopped"
        );
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn send(&self, chat_id: &ChatId, text: &str) -> Result<MessageRef, SessionError> {
        let message_id = self.transport.send_text(chat_id, text).await?;
        Ok(MessageRef { chat_id: chat_id.clone(), message_id })
    }

    async fn edit(&self, message: &MessageRef, text: &str) -> Result<(), SessionError> {
        self.transport.edit_text(&message.chat_id, &message.message_id, text).await?;
        Ok(())
    }

    async fn delete(&self, messages: &[MessageRef]) -> Result<(), SessionError> {
        let mut by_chat: BTreeMap<&str, (&ChatId, Vec<String>)> = BTreeMap::new();
        for message in messages {
            by_chat
                .entry(message.chat_id.0.as_str())
                .or_insert_with(|| (&message.chat_id, Vec::new()))
                .1
                .push(message.message_id.clone());
        }
        for (chat_id, message_ids) in by_chat.into_values() {
            self.transport.delete_messages(chat_id, &message_ids).await?;
        }
        Ok(())
    }

    async fn deliver(
        &self,
        chat_id: &ChatId,
        artifact: OutboundArtifact,
        progress: &mut (dyn ProgressObserver + Send),
    ) -> Result<DeliveredArtifact, SessionError> {
        match artifact {
            OutboundArtifact::Cached(handle) => {
                let message_id = self.transport.send_cached(chat_id, &handle).await?;
                let message = MessageRef { chat_id: chat_id.clone(), message_id };
                Ok(DeliveredArtifact { handle, message })
            }
            OutboundArtifact::Fresh { filename, data } => {
                let uploaded = self.transport.upload(chat_id, &filename, data, progress).await?;
                let message_id = uploaded.message_id;
                let message = MessageRef { chat_id: chat_id.clone(), message_id };
                Ok(DeliveredArtifact { handle: uploaded.handle, message })
            }
        }
    }

    fn subscribe(&self, handler: Arc<dyn InboundHandler>) {
        self.handlers.write().push(handler);
    }

    fn clear_subscriptions(&self) {
        self.handlers.write().clear();
    }
}

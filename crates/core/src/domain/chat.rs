use std::fmt;

use serde::{Deserialize, Serialize};

use crate::domain::tenant::TenantId;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChatId(pub String);

impl fmt::Display for ChatId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identity that rate limits and task ceilings are accounted against.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequesterId(pub String);

impl fmt::Display for RequesterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageRef {
    pub chat_id: ChatId,
    pub message_id: String,
}

/// Inbound activity delivered by a live session to its subscribed handlers.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InboundEvent {
    pub tenant_id: TenantId,
    pub chat_id: ChatId,
    pub requester_id: RequesterId,
    pub text: String,
    pub message: Option<MessageRef>,
}

/// Who asked for an operation and where replies go.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RequesterContext {
    pub tenant_id: TenantId,
    pub chat_id: ChatId,
    pub requester_id: RequesterId,
    pub request_id: String,
}

impl RequesterContext {
    pub fn new(tenant_id: TenantId, chat_id: ChatId, requester_id: RequesterId) -> Self {
        let mut request_id = uuid::Uuid::new_v4().simple().to_string();
        request_id.truncate(12);
        Self { tenant_id, chat_id, requester_id, request_id }
    }

    pub fn from_event(event: &InboundEvent) -> Self {
        Self::new(event.tenant_id.clone(), event.chat_id.clone(), event.requester_id.clone())
    }
}

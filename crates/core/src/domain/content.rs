use std::fmt;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::domain::chat::MessageRef;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContentId(pub String);

impl fmt::Display for ContentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Platform-side handle of an artifact that was already delivered once and
/// can be re-sent without uploading the bytes again.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ArtifactHandle(pub String);

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RetrievalTarget {
    pub content_id: ContentId,
    pub size_hint: Option<u64>,
    pub title: String,
    pub filename: String,
}

impl RetrievalTarget {
    pub fn new(content_id: impl Into<String>) -> Self {
        let content_id = content_id.into();
        Self {
            title: content_id.clone(),
            filename: content_id.clone(),
            content_id: ContentId(content_id),
            size_hint: None,
        }
    }

    pub fn with_size_hint(mut self, size_hint: u64) -> Self {
        self.size_hint = Some(size_hint);
        self
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum OutboundArtifact {
    Cached(ArtifactHandle),
    Fresh { filename: String, data: Bytes },
}

impl OutboundArtifact {
    pub fn len(&self) -> u64 {
        match self {
            Self::Cached(_) => 0,
            Self::Fresh { data, .. } => data.len() as u64,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeliveredArtifact {
    pub handle: ArtifactHandle,
    pub message: MessageRef,
}

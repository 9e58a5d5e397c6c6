use std::fmt;

use serde::{Deserialize, Serialize};

/// Deduplication key of a long-running operation. Two requests for the same
/// logical target derive the same id and collapse onto one in-flight record.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskId(pub String);

impl TaskId {
    pub fn derive(kind: OperationKind, target: &str) -> Self {
        Self(format!("{}:{target}", kind.as_str()))
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Retrieval,
}

impl OperationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Retrieval => "retrieval",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CancelReason {
    /// Explicit cancel request or process shutdown.
    Requested,
    /// The progress message disappeared, usually because the user removed it.
    LostTarget,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TaskOutcome {
    Delivered { from_cache: bool },
    NotFound,
    Failed,
    Cancelled(CancelReason),
}

impl TaskOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Delivered { from_cache: true } => "delivered_from_cache",
            Self::Delivered { from_cache: false } => "delivered",
            Self::NotFound => "not_found",
            Self::Failed => "failed",
            Self::Cancelled(CancelReason::Requested) => "cancelled",
            Self::Cancelled(CancelReason::LostTarget) => "lost_target",
        }
    }
}

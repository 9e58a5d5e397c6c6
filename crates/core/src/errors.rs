use thiserror::Error;

use crate::domain::tenant::TenantId;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ProgressError {
    #[error("progress message no longer exists")]
    LostTarget,
    #[error("progress update failed: {0}")]
    Send(String),
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("credentials rejected: {0}")]
    CredentialsInvalid(String),
    #[error("session transport failure: {0}")]
    Transport(String),
    #[error("session is not connected")]
    NotConnected,
    #[error("target message no longer exists")]
    MessageNotFound,
    #[error(transparent)]
    Progress(#[from] ProgressError),
}

impl SessionError {
    /// Credential failures are fatal for a tenant and must never be retried.
    pub fn is_credentials(&self) -> bool {
        matches!(self, Self::CredentialsInvalid(_))
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum FetchError {
    #[error("transient fetch failure: {0}")]
    Transient(String),
    #[error("fatal fetch failure: {0}")]
    Fatal(String),
    #[error("content not found")]
    NotFound,
}

impl FetchError {
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("persistence failure: {0}")]
    Persistence(String),
    #[error("tenant not found: {0}")]
    TenantNotFound(TenantId),
}

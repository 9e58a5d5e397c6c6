use std::fmt;

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TenantId(pub String);

impl TenantId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TenantId {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

/// Secret material needed to open a tenant's chat connection.
#[derive(Clone, Debug)]
pub struct TenantCredentials {
    pub bot_token: SecretString,
    pub app_id: Option<String>,
    pub app_hash: Option<SecretString>,
}

impl TenantCredentials {
    pub fn new(
        bot_token: impl Into<String>,
        app_id: Option<String>,
        app_hash: Option<String>,
    ) -> Self {
        Self {
            bot_token: SecretString::from(bot_token.into()),
            app_id,
            app_hash: app_hash.map(SecretString::from),
        }
    }

    /// Returns the name of the first missing credential field, if any.
    pub fn missing_field(&self) -> Option<&'static str> {
        if self.bot_token.expose_secret().trim().is_empty() {
            return Some("bot_token");
        }
        if self.app_id.as_deref().map(str::trim).unwrap_or_default().is_empty() {
            return Some("app_id");
        }
        let app_hash_missing = self
            .app_hash
            .as_ref()
            .map(|value| value.expose_secret().trim().is_empty())
            .unwrap_or(true);
        if app_hash_missing {
            return Some("app_hash");
        }
        None
    }
}

/// Desired-state row for one tenant, as stored by the administrative side.
#[derive(Clone, Debug)]
pub struct TenantConfig {
    pub tenant_id: TenantId,
    pub credentials: TenantCredentials,
    pub reload_required: bool,
    pub deleted: bool,
    pub owner_id: i64,
    pub proxy_config: Option<String>,
    pub priority: bool,
}

impl TenantConfig {
    pub fn new(tenant_id: impl Into<String>, credentials: TenantCredentials) -> Self {
        Self {
            tenant_id: TenantId(tenant_id.into()),
            credentials,
            reload_required: false,
            deleted: false,
            owner_id: 0,
            proxy_config: None,
            priority: false,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StartMode {
    /// No reusable session material; authenticate from credentials.
    Fresh,
    /// Session material was found on disk and may be reused.
    Resume,
}

impl StartMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Fresh => "fresh",
            Self::Resume => "resume",
        }
    }
}

/// Lifecycle phase of a tenant that is present in the live session table.
/// Tenants missing from the table are absent.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TenantPhase {
    Starting,
    Running,
    Stopping,
}

impl TenantPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Stopping => "stopping",
        }
    }
}

//! Session material persisted by the chat client, one file per tenant.

use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::debug;

use botfleet_core::domain::tenant::TenantId;
use botfleet_core::errors::StoreError;
use botfleet_core::ports::SessionArtifacts;

const SESSION_SUFFIX: &str = ".session";
const JOURNAL_SUFFIX: &str = ".session-journal";

pub struct FsSessionArtifacts {
    directory: PathBuf,
}

impl FsSessionArtifacts {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self { directory: directory.into() }
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    pub async fn ensure_directory(&self) -> Result<(), StoreError> {
        tokio::fs::create_dir_all(&self.directory).await.map_err(|error| io_error(&error))
    }

    fn path(&self, tenant_id: &TenantId, suffix: &str) -> Result<PathBuf, StoreError> {
        let id = tenant_id.as_str();
        if !is_safe_id(id) {
            return Err(StoreError::Persistence(format!("invalid tenant id for artifact: {id}")));
        }
        Ok(self.directory.join(format!("{id}{suffix}")))
    }
}

/// Ids that map to a plain file name inside the artifact directory.
fn is_safe_id(id: &str) -> bool {
    !id.is_empty() && !id.starts_with('.') && !id.contains(['/', '\\', '\0'])
}

fn io_error(error: &io::Error) -> StoreError {
    StoreError::Persistence(error.to_string())
}

async fn remove_if_present(path: &Path) -> Result<bool, StoreError> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(true),
        Err(error) if error.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(error) => Err(io_error(&error)),
    }
}

#[async_trait]
impl SessionArtifacts for FsSessionArtifacts {
    async fn list(&self) -> Result<Vec<TenantId>, StoreError> {
        let mut entries = match tokio::fs::read_dir(&self.directory).await {
            Ok(entries) => entries,
            Err(error) if error.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(error) => return Err(io_error(&error)),
        };

        let mut tenants = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(|error| io_error(&error))? {
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            let Some(id) = name.strip_suffix(SESSION_SUFFIX) else {
                continue;
            };
            if is_safe_id(id) {
                tenants.push(TenantId::from(id));
            } else {
                debug!(
                    event_name = "chat.artifacts.skipped",
                    correlation_id = "artifacts",
                    file_name = name,
                    "session file name is not a valid tenant id"
                );
            }
        }
        tenants.sort();
        Ok(tenants)
    }

    async fn exists(&self, tenant_id: &TenantId) -> Result<bool, StoreError> {
        let path = self.path(tenant_id, SESSION_SUFFIX)?;
        tokio::fs::try_exists(&path).await.map_err(|error| io_error(&error))
    }

    async fn purge(&self, tenant_id: &TenantId) -> Result<(), StoreError> {
        let session = remove_if_present(&self.path(tenant_id, SESSION_SUFFIX)?).await?;
        let journal = remove_if_present(&self.path(tenant_id, JOURNAL_SUFFIX)?).await?;
        debug!(
            event_name = "chat.artifacts.purged",
            correlation_id = %tenant_id,
            tenant_id = %tenant_id,
            session,
            journal,
            "session artifacts removed"
        );
        Ok(())
    }
}

use async_trait::async_trait;
use chrono::Utc;
use secrecy::ExposeSecret;
use sqlx::Row;

use botfleet_core::domain::tenant::{TenantConfig, TenantCredentials, TenantId};
use botfleet_core::errors::StoreError;
use botfleet_core::ports::DesiredStateStore;

use super::{decode_error, RepositoryError};
use crate::DbPool;

/// Desired-state table written by the administrative side and read by the
/// reconcile loop.
pub struct SqlTenantStore {
    pool: DbPool,
}

impl SqlTenantStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub async fn find(&self, tenant_id: &TenantId) -> Result<Option<TenantConfig>, StoreError> {
        let row = sqlx::query(
            "SELECT tenant_id, bot_token, app_id, app_hash, owner_id, proxy_config,
                    priority, reload_required, deleted
             FROM tenant WHERE tenant_id = ?",
        )
        .bind(tenant_id.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(RepositoryError::from)?;

        match row {
            Some(ref row) => Ok(Some(row_to_tenant(row)?)),
            None => Ok(None),
        }
    }

    async fn set_flag(&self, statement: &str, tenant_id: &TenantId) -> Result<(), StoreError> {
        let result = sqlx::query(statement)
            .bind(Utc::now().to_rfc3339())
            .bind(tenant_id.as_str())
            .execute(&self.pool)
            .await
            .map_err(RepositoryError::from)?;
        if result.rows_affected() == 0 {
            return Err(StoreError::TenantNotFound(tenant_id.clone()));
        }
        Ok(())
    }
}

fn row_to_tenant(row: &sqlx::sqlite::SqliteRow) -> Result<TenantConfig, RepositoryError> {
    let tenant_id: String = row.try_get("tenant_id").map_err(decode_error)?;
    let bot_token: String = row.try_get("bot_token").map_err(decode_error)?;
    let app_id: Option<String> = row.try_get("app_id").map_err(decode_error)?;
    let app_hash: Option<String> = row.try_get("app_hash").map_err(decode_error)?;

    let credentials = TenantCredentials::new(bot_token, app_id, app_hash);
    let mut config = TenantConfig::new(tenant_id, credentials);
    config.owner_id = row.try_get("owner_id").map_err(decode_error)?;
    config.proxy_config = row.try_get("proxy_config").map_err(decode_error)?;
    config.priority = row.try_get("priority").map_err(decode_error)?;
    config.reload_required = row.try_get("reload_required").map_err(decode_error)?;
    config.deleted = row.try_get("deleted").map_err(decode_error)?;
    Ok(config)
}

#[async_trait]
impl DesiredStateStore for SqlTenantStore {
    async fn list_active_tenants(&self) -> Result<Vec<TenantConfig>, StoreError> {
        let rows = sqlx::query(
            "SELECT tenant_id, bot_token, app_id, app_hash, owner_id, proxy_config,
                    priority, reload_required, deleted
             FROM tenant
             WHERE deleted = 0
             ORDER BY created_at ASC, tenant_id ASC",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(RepositoryError::from)?;

        let tenants = rows.iter().map(row_to_tenant).collect::<Result<Vec<_>, _>>()?;
        Ok(tenants)
    }

    async fn clear_reload_flag(&self, tenant_id: &TenantId) -> Result<(), StoreError> {
        self.set_flag(
            "UPDATE tenant SET reload_required = 0, updated_at = ? WHERE tenant_id = ?",
            tenant_id,
        )
        .await
    }

    async fn mark_deleted(&self, tenant_id: &TenantId) -> Result<(), StoreError> {
        self.set_flag(
            "UPDATE tenant SET deleted = 1, updated_at = ? WHERE tenant_id = ?",
            tenant_id,
        )
        .await
    }

    async fn upsert_tenant(&self, config: TenantConfig) -> Result<(), StoreError> {
        let now = Utc::now().to_rfc3339();
        let credentials = &config.credentials;
        sqlx::query(
            "INSERT INTO tenant (tenant_id, bot_token, app_id, app_hash, owner_id, proxy_config,
                                 priority, reload_required, deleted, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(tenant_id) DO UPDATE SET
                 bot_token = excluded.bot_token,
                 app_id = excluded.app_id,
                 app_hash = excluded.app_hash,
                 owner_id = excluded.owner_id,
                 proxy_config = excluded.proxy_config,
                 priority = excluded.priority,
                 reload_required = excluded.reload_required,
                 deleted = excluded.deleted,
                 updated_at = excluded.updated_at",
        )
        .bind(config.tenant_id.as_str())
        .bind(credentials.bot_token.expose_secret())
        .bind(credentials.app_id.as_deref())
        .bind(credentials.app_hash.as_ref().map(|hash| hash.expose_secret()))
        .bind(config.owner_id)
        .bind(config.proxy_config.as_deref())
        .bind(config.priority)
        .bind(config.reload_required)
        .bind(config.deleted)
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await
        .map_err(RepositoryError::from)?;

        Ok(())
    }
}

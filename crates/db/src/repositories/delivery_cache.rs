use async_trait::async_trait;
use chrono::Utc;
use sqlx::Row;

use botfleet_core::domain::content::{ArtifactHandle, ContentId};
use botfleet_core::domain::tenant::TenantId;
use botfleet_core::errors::StoreError;
use botfleet_core::ports::DeliveryCache;

use super::{decode_error, RepositoryError};
use crate::DbPool;

/// Maps `(recipient, content)` to the platform handle of a previous upload.
pub struct SqlDeliveryCache {
    pool: DbPool,
}

impl SqlDeliveryCache {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl DeliveryCache for SqlDeliveryCache {
    async fn get(
        &self,
        recipient: &TenantId,
        content_id: &ContentId,
    ) -> Result<Option<ArtifactHandle>, StoreError> {
        let row = sqlx::query(
            "SELECT handle FROM delivery_cache WHERE tenant_id = ? AND content_id = ?",
        )
        .bind(recipient.as_str())
        .bind(&content_id.0)
        .fetch_optional(&self.pool)
        .await
        .map_err(RepositoryError::from)?;

        match row {
            Some(row) => {
                let handle: String = row.try_get("handle").map_err(decode_error)?;
                Ok(Some(ArtifactHandle(handle)))
            }
            None => Ok(None),
        }
    }

    async fn put(
        &self,
        recipient: &TenantId,
        content_id: &ContentId,
        handle: &ArtifactHandle,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO delivery_cache (tenant_id, content_id, handle, updated_at)
             VALUES (?, ?, ?, ?)
             ON CONFLICT(tenant_id, content_id) DO UPDATE SET
                 handle = excluded.handle,
                 updated_at = excluded.updated_at",
        )
        .bind(recipient.as_str())
        .bind(&content_id.0)
        .bind(&handle.0)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(RepositoryError::from)?;

        Ok(())
    }

    async fn invalidate(&self, content_id: &ContentId) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM delivery_cache WHERE content_id = ?")
            .bind(&content_id.0)
            .execute(&self.pool)
            .await
            .map_err(RepositoryError::from)?;
        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use botfleet_core::domain::content::{ArtifactHandle, ContentId};
    use botfleet_core::domain::tenant::TenantId;
    use botfleet_core::ports::DeliveryCache;

    use super::SqlDeliveryCache;
    use crate::{connect_with_settings, migrations};

    async fn setup() -> SqlDeliveryCache {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");
        SqlDeliveryCache::new(pool)
    }

    #[tokio::test]
    async fn put_overwrites_stale_handle() {
        let cache = setup().await;
        let tenant = TenantId::from("main");
        let content = ContentId("bafy-paper".to_owned());

        assert_eq!(cache.get(&tenant, &content).await.expect("get"), None);
        cache.put(&tenant, &content, &ArtifactHandle("old".to_owned())).await.expect("put");
        cache.put(&tenant, &content, &ArtifactHandle("new".to_owned())).await.expect("put");

        let handle = cache.get(&tenant, &content).await.expect("get");
        assert_eq!(handle, Some(ArtifactHandle("new".to_owned())));
    }

    #[tokio::test]
    async fn entries_are_scoped_per_recipient_and_invalidated_for_all() {
        let cache = setup().await;
        let content = ContentId("bafy-paper".to_owned());
        let other = ContentId("bafy-other".to_owned());
        for tenant in ["main", "mirror"] {
            let handle = ArtifactHandle(format!("{tenant}-handle"));
            cache.put(&TenantId::from(tenant), &content, &handle).await.expect("put");
        }
        cache
            .put(&TenantId::from("main"), &other, &ArtifactHandle("keep".to_owned()))
            .await
            .expect("put");

        let mirror = cache.get(&TenantId::from("mirror"), &content).await.expect("get");
        assert_eq!(mirror, Some(ArtifactHandle("mirror-handle".to_owned())));

        assert_eq!(cache.invalidate(&content).await.expect("invalidate"), 2);
        assert_eq!(cache.get(&TenantId::from("main"), &content).await.expect("get"), None);
        let kept = cache.get(&TenantId::from("main"), &other).await.expect("get");
        assert_eq!(kept, Some(ArtifactHandle("keep".to_owned())));
        assert_eq!(cache.invalidate(&content).await.expect("invalidate"), 0);
    }
}

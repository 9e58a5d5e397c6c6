use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use botfleet_core::domain::content::{ArtifactHandle, ContentId};
use botfleet_core::domain::tenant::{TenantConfig, TenantId};
use botfleet_core::errors::StoreError;
use botfleet_core::ports::{DeliveryCache, DesiredStateStore};

/// Tenants kept in insertion order, matching the SQL store's listing order.
#[derive(Default)]
pub struct InMemoryTenantStore {
    tenants: RwLock<Vec<TenantConfig>>,
}

impl InMemoryTenantStore {
    pub fn with_tenants(tenants: Vec<TenantConfig>) -> Self {
        Self { tenants: RwLock::new(tenants) }
    }

    pub async fn find(&self, tenant_id: &TenantId) -> Option<TenantConfig> {
        let tenants = self.tenants.read().await;
        tenants.iter().find(|config| &config.tenant_id == tenant_id).cloned()
    }
}

#[async_trait]
impl DesiredStateStore for InMemoryTenantStore {
    async fn list_active_tenants(&self) -> Result<Vec<TenantConfig>, StoreError> {
        let tenants = self.tenants.read().await;
        Ok(tenants.iter().filter(|config| !config.deleted).cloned().collect())
    }

    async fn clear_reload_flag(&self, tenant_id: &TenantId) -> Result<(), StoreError> {
        let mut tenants = self.tenants.write().await;
        let config = tenants
            .iter_mut()
            .find(|config| &config.tenant_id == tenant_id)
            .ok_or_else(|| StoreError::TenantNotFound(tenant_id.clone()))?;
        config.reload_required = false;
        Ok(())
    }

    async fn mark_deleted(&self, tenant_id: &TenantId) -> Result<(), StoreError> {
        let mut tenants = self.tenants.write().await;
        let config = tenants
            .iter_mut()
            .find(|config| &config.tenant_id == tenant_id)
            .ok_or_else(|| StoreError::TenantNotFound(tenant_id.clone()))?;
        config.deleted = true;
        Ok(())
    }

    async fn upsert_tenant(&self, config: TenantConfig) -> Result<(), StoreError> {
        let mut tenants = self.tenants.write().await;
        match tenants.iter_mut().find(|existing| existing.tenant_id == config.tenant_id) {
            Some(existing) => *existing = config,
            None => tenants.push(config),
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryDeliveryCache {
    entries: RwLock<HashMap<(TenantId, ContentId), ArtifactHandle>>,
}

#[async_trait]
impl DeliveryCache for InMemoryDeliveryCache {
    async fn get(
        &self,
        recipient: &TenantId,
        content_id: &ContentId,
    ) -> Result<Option<ArtifactHandle>, StoreError> {
        let entries = self.entries.read().await;
        Ok(entries.get(&(recipient.clone(), content_id.clone())).cloned())
    }

    async fn put(
        &self,
        recipient: &TenantId,
        content_id: &ContentId,
        handle: &ArtifactHandle,
    ) -> Result<(), StoreError> {
        let mut entries = self.entries.write().await;
        entries.insert((recipient.clone(), content_id.clone()), handle.clone());
        Ok(())
    }

    async fn invalidate(&self, content_id: &ContentId) -> Result<u64, StoreError> {
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|(_, cached), _| cached != content_id);
        Ok((before - entries.len()) as u64)
    }
}

#[cfg(test)]
mod tests {
    use botfleet_core::domain::content::{ArtifactHandle, ContentId};
    use botfleet_core::domain::tenant::{TenantConfig, TenantCredentials, TenantId};
    use botfleet_core::ports::{DeliveryCache, DesiredStateStore};

    use super::{InMemoryDeliveryCache, InMemoryTenantStore};

    fn tenant(id: &str) -> TenantConfig {
        TenantConfig::new(id, TenantCredentials::new("1:token", Some("1".to_owned()), None))
    }

    #[tokio::test]
    async fn deleted_tenants_drop_out_of_listing() {
        let store = InMemoryTenantStore::with_tenants(vec![tenant("a"), tenant("b")]);
        store.mark_deleted(&TenantId::from("a")).await.expect("delete");

        let active = store.list_active_tenants().await.expect("list");
        let ids: Vec<_> = active.iter().map(|config| config.tenant_id.as_str()).collect();
        assert_eq!(ids, vec!["b"]);
        assert!(store.find(&TenantId::from("a")).await.expect("kept").deleted);
    }

    #[tokio::test]
    async fn upsert_replaces_and_clear_resets_reload() {
        let store = InMemoryTenantStore::default();
        let mut seeded = tenant("main");
        seeded.reload_required = true;
        store.upsert_tenant(seeded.clone()).await.expect("insert");
        store.upsert_tenant(seeded).await.expect("replace");
        assert_eq!(store.list_active_tenants().await.expect("list").len(), 1);

        store.clear_reload_flag(&TenantId::from("main")).await.expect("clear");
        assert!(!store.find(&TenantId::from("main")).await.expect("row").reload_required);
        assert!(store.clear_reload_flag(&TenantId::from("missing")).await.is_err());
    }

    #[tokio::test]
    async fn cache_invalidation_spans_recipients() {
        let cache = InMemoryDeliveryCache::default();
        let content = ContentId("bafy".to_owned());
        for tenant in ["a", "b"] {
            let handle = ArtifactHandle(tenant.to_owned());
            cache.put(&TenantId::from(tenant), &content, &handle).await.expect("put");
        }
        assert_eq!(cache.invalidate(&content).await.expect("invalidate"), 2);
        assert_eq!(cache.get(&TenantId::from("a"), &content).await.expect("get"), None);
    }
}

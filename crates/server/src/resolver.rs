use async_trait::async_trait;

use botfleet_core::domain::content::{ContentId, RetrievalTarget};
use botfleet_core::errors::StoreError;
use botfleet_core::ports::TargetResolver;

/// Resolves content ids without consulting a document index: every id maps
/// to a target titled by the id itself. Used until a search backend is wired.
#[derive(Clone, Debug, Default)]
pub struct PassthroughResolver;

#[async_trait]
impl TargetResolver for PassthroughResolver {
    async fn resolve(&self, content_id: &ContentId) -> Result<Option<RetrievalTarget>, StoreError> {
        if content_id.0.trim().is_empty() {
            return Ok(None);
        }
        let mut target = RetrievalTarget::new(content_id.0.clone());
        target.filename = format!("{}.pdf", content_id.0);
        Ok(Some(target))
    }
}

#[cfg(test)]
mod tests {
    use botfleet_core::domain::content::ContentId;
    use botfleet_core::ports::TargetResolver;

    use super::PassthroughResolver;

    #[tokio::test]
    async fn ids_resolve_to_pdf_targets() {
        let target = PassthroughResolver
            .resolve(&ContentId("bafy-paper".to_owned()))
            .await
            .expect("resolve")
            .expect("target");
        assert_eq!(target.title, "bafy-paper");
        assert_eq!(target.filename, "bafy-paper.pdf");

        let blank = PassthroughResolver.resolve(&ContentId(" ".to_owned())).await.expect("ok");
        assert!(blank.is_none());
    }
}

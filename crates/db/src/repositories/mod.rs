use botfleet_core::errors::StoreError;
use thiserror::Error;

pub mod delivery_cache;
pub mod memory;
pub mod tenant;

pub use delivery_cache::SqlDeliveryCache;
pub use memory::{InMemoryDeliveryCache, InMemoryTenantStore};
pub use tenant::SqlTenantStore;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
}

impl From<RepositoryError> for StoreError {
    fn from(error: RepositoryError) -> Self {
        StoreError::Persistence(error.to_string())
    }
}

fn decode_error(error: sqlx::Error) -> RepositoryError {
    RepositoryError::Decode(error.to_string())
}

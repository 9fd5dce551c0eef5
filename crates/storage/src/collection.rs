use std::sync::Arc;

use async_trait::async_trait;
use divvy_core::{ItemId, ItemRecord};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("Item {0} not found")]
    NotFound(ItemId),
    #[error("Corrupt item row: {0}")]
    Corrupt(String),
    #[error("Write rejected: {0}")]
    Rejected(String),
}

/// The item collection of one expense.
///
/// Each call is atomic on its own; there is no multi-operation transaction.
#[async_trait]
pub trait ItemCollection: Send + Sync {
    /// Every stored record, with ids, ordered by index.
    async fn list(&self) -> Result<Vec<ItemRecord>, StoreError>;

    async fn delete(&self, id: ItemId) -> Result<(), StoreError>;

    /// Store `record` (its `id` is ignored) and return the new id.
    async fn add(&self, record: &ItemRecord) -> Result<ItemId, StoreError>;
}

#[async_trait]
impl<T: ItemCollection + ?Sized> ItemCollection for Arc<T> {
    async fn list(&self) -> Result<Vec<ItemRecord>, StoreError> {
        (**self).list().await
    }

    async fn delete(&self, id: ItemId) -> Result<(), StoreError> {
        (**self).delete(id).await
    }

    async fn add(&self, record: &ItemRecord) -> Result<ItemId, StoreError> {
        (**self).add(record).await
    }
}

use std::sync::Arc;

use async_trait::async_trait;
use divvy_core::{ItemId, ItemRecord};
use tokio::sync::Mutex;

use crate::collection::{ItemCollection, StoreError};

#[derive(Debug, Default)]
struct Inner {
    next_id: i64,
    records: Vec<ItemRecord>,
}

/// An item collection held in process memory. Clones share the same items.
#[derive(Debug, Clone, Default)]
pub struct MemoryItems {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryItems {
    pub fn new() -> Self {
        Self::default()
    }

    /// A collection pre-filled with `records`, assigning fresh ids.
    pub async fn with_records(records: impl IntoIterator<Item = ItemRecord>) -> Self {
        let items = Self::new();
        {
            let mut inner = items.inner.lock().await;
            for record in records {
                inner.next_id += 1;
                let id = ItemId(inner.next_id);
                inner.records.push(ItemRecord { id: Some(id), ..record });
            }
        }
        items
    }
}

#[async_trait]
impl ItemCollection for MemoryItems {
    async fn list(&self) -> Result<Vec<ItemRecord>, StoreError> {
        let inner = self.inner.lock().await;
        let mut records = inner.records.clone();
        records.sort_by_key(|r| (r.index, r.id));
        Ok(records)
    }

    async fn delete(&self, id: ItemId) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        let before = inner.records.len();
        inner.records.retain(|r| r.id != Some(id));
        if inner.records.len() == before {
            return Err(StoreError::NotFound(id));
        }
        Ok(())
    }

    async fn add(&self, record: &ItemRecord) -> Result<ItemId, StoreError> {
        let mut inner = self.inner.lock().await;
        inner.next_id += 1;
        let id = ItemId(inner.next_id);
        inner.records.push(ItemRecord { id: Some(id), ..record.clone() });
        Ok(id)
    }
}

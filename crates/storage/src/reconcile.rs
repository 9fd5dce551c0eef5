use std::fmt;

use divvy_core::{ItemId, ItemRecord, ItemTuple};
use thiserror::Error;

use crate::collection::{ItemCollection, StoreError};

/// A collection write that did not confirm.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailedOp {
    Delete(ItemId),
    /// Insert of the extracted item at this index.
    Insert(u32),
}

impl fmt::Display for FailedOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailedOp::Delete(id) => write!(f, "delete item {id}"),
            FailedOp::Insert(index) => write!(f, "insert item #{index}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedWrite {
    pub op: FailedOp,
    pub reason: String,
}

/// What a settled reconciliation did to the collection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub deleted: usize,
    pub inserted: usize,
}

#[derive(Debug, Error)]
pub enum ReconciliationFailure {
    /// Nothing was written.
    #[error("Failed to list existing items: {0}")]
    List(#[source] StoreError),
    /// Every write was attempted; these did not confirm.
    #[error("{} collection write(s) did not confirm", .failed.len())]
    Incomplete {
        failed: Vec<FailedWrite>,
        report: ReconcileReport,
    },
}

impl ReconciliationFailure {
    pub fn failed_ops(&self) -> Vec<FailedOp> {
        match self {
            ReconciliationFailure::List(_) => Vec::new(),
            ReconciliationFailure::Incomplete { failed, .. } => {
                failed.iter().map(|f| f.op.clone()).collect()
            }
        }
    }

    /// Writes that did confirm before and after the failures.
    pub fn report(&self) -> ReconcileReport {
        match self {
            ReconciliationFailure::List(_) => ReconcileReport::default(),
            ReconciliationFailure::Incomplete { report, .. } => *report,
        }
    }
}

/// Full-replace synchronisation of an item collection with a new batch.
pub struct ReconciliationEngine;

impl ReconciliationEngine {
    /// Delete every existing record, then add `items` in order with
    /// `index` = position and no user assignments.
    ///
    /// Each write is attempted once, failures do not stop later writes, and
    /// nothing is rolled back. Readers may observe the collection half-way.
    pub async fn reconcile<C: ItemCollection + ?Sized>(
        collection: &C,
        items: &[ItemTuple],
    ) -> Result<ReconcileReport, ReconciliationFailure> {
        let existing = collection.list().await.map_err(ReconciliationFailure::List)?;

        let mut failed = Vec::new();
        let mut report = ReconcileReport::default();

        for id in existing.iter().filter_map(|r| r.id) {
            match collection.delete(id).await {
                Ok(()) => report.deleted += 1,
                Err(e) => {
                    tracing::warn!(item = %id, error = %e, "item delete did not confirm");
                    failed.push(FailedWrite { op: FailedOp::Delete(id), reason: e.to_string() });
                }
            }
        }

        for (index, tuple) in (0u32..).zip(items) {
            let record = ItemRecord::from_tuple(index, tuple);
            match collection.add(&record).await {
                Ok(_) => report.inserted += 1,
                Err(e) => {
                    tracing::warn!(index, error = %e, "item insert did not confirm");
                    failed.push(FailedWrite { op: FailedOp::Insert(index), reason: e.to_string() });
                }
            }
        }

        tracing::info!(
            deleted = report.deleted,
            inserted = report.inserted,
            failed = failed.len(),
            "reconciled item collection"
        );

        if failed.is_empty() {
            Ok(report)
        } else {
            Err(ReconciliationFailure::Incomplete { failed, report })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryItems;
    use async_trait::async_trait;
    use divvy_core::{Assignment, Money, UserId};
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn tuple(name: &str, cents: i64) -> ItemTuple {
        ItemTuple::new(name, Money::from_cents(cents))
    }

    async fn prior(n: u32) -> MemoryItems {
        MemoryItems::with_records((0..n).map(|i| {
            let mut r = ItemRecord::from_tuple(i, &tuple(&format!("old {i}"), 100 + i as i64));
            r.users.insert(UserId("ana".into()), Assignment { shares: 1 });
            r
        }))
        .await
    }

    /// Rejects deletes of chosen ids and inserts at chosen indices.
    struct Flaky {
        inner: MemoryItems,
        reject_deletes: HashSet<ItemId>,
        reject_inserts: HashSet<u32>,
        fail_list: bool,
        writes: AtomicUsize,
    }

    impl Flaky {
        fn new(inner: MemoryItems) -> Self {
            Self {
                inner,
                reject_deletes: HashSet::new(),
                reject_inserts: HashSet::new(),
                fail_list: false,
                writes: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl ItemCollection for Flaky {
        async fn list(&self) -> Result<Vec<ItemRecord>, StoreError> {
            if self.fail_list {
                return Err(StoreError::Rejected("offline".into()));
            }
            self.inner.list().await
        }

        async fn delete(&self, id: ItemId) -> Result<(), StoreError> {
            self.writes.fetch_add(1, Ordering::SeqCst);
            if self.reject_deletes.contains(&id) {
                return Err(StoreError::Rejected("permission denied".into()));
            }
            self.inner.delete(id).await
        }

        async fn add(&self, record: &ItemRecord) -> Result<ItemId, StoreError> {
            self.writes.fetch_add(1, Ordering::SeqCst);
            if self.reject_inserts.contains(&record.index) {
                return Err(StoreError::Rejected("quota exceeded".into()));
            }
            self.inner.add(record).await
        }
    }

    #[tokio::test]
    async fn replaces_prior_records_with_new_batch() {
        let items = prior(5).await;
        let report = ReconciliationEngine::reconcile(&items, &[tuple("Milk", 350), tuple("Bread", 225)])
            .await
            .unwrap();
        assert_eq!(report, ReconcileReport { deleted: 5, inserted: 2 });

        let listed = items.list().await.unwrap();
        assert_eq!(listed.len(), 2);
        assert!(listed[0].same_content(&ItemRecord::from_tuple(0, &tuple("Milk", 350))));
        assert!(listed[1].same_content(&ItemRecord::from_tuple(1, &tuple("Bread", 225))));
    }

    #[tokio::test]
    async fn indices_are_contiguous_from_zero() {
        let items = prior(2).await;
        let batch: Vec<ItemTuple> = (0..7).map(|i| tuple(&format!("item {i}"), i)).collect();
        ReconciliationEngine::reconcile(&items, &batch).await.unwrap();

        let indices: Vec<u32> = items.list().await.unwrap().iter().map(|r| r.index).collect();
        assert_eq!(indices, (0..7).collect::<Vec<u32>>());
    }

    #[tokio::test]
    async fn identical_batch_still_replaces_every_record() {
        let items = MemoryItems::with_records([ItemRecord::from_tuple(0, &tuple("Milk", 350))]).await;
        let before: Vec<Option<ItemId>> = items.list().await.unwrap().iter().map(|r| r.id).collect();

        ReconciliationEngine::reconcile(&items, &[tuple("Milk", 350)]).await.unwrap();

        let after = items.list().await.unwrap();
        assert_eq!(after.len(), 1);
        assert_ne!(after[0].id, before[0]);
    }

    #[tokio::test]
    async fn assignments_are_reset() {
        let items = prior(3).await;
        ReconciliationEngine::reconcile(&items, &[tuple("old 0", 100)]).await.unwrap();
        assert!(items.list().await.unwrap().iter().all(|r| r.users.is_empty()));
    }

    #[tokio::test]
    async fn empty_batch_clears_collection() {
        let items = prior(3).await;
        let report = ReconciliationEngine::reconcile(&items, &[]).await.unwrap();
        assert_eq!(report, ReconcileReport { deleted: 3, inserted: 0 });
        assert!(items.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn failed_writes_are_reported_and_others_still_run() {
        let base = prior(3).await;
        let victim = base.list().await.unwrap()[1].id.unwrap();
        let mut flaky = Flaky::new(base.clone());
        flaky.reject_deletes.insert(victim);
        flaky.reject_inserts.insert(0);

        let err = ReconciliationEngine::reconcile(&flaky, &[tuple("Milk", 350), tuple("Bread", 225)])
            .await
            .unwrap_err();

        assert_eq!(err.failed_ops(), vec![FailedOp::Delete(victim), FailedOp::Insert(0)]);
        assert_eq!(err.report(), ReconcileReport { deleted: 2, inserted: 1 });
        assert_eq!(flaky.writes.load(Ordering::SeqCst), 5);

        // Left inconsistent: the surviving old record plus the one new insert.
        let names: Vec<String> = base.list().await.unwrap().into_iter().map(|r| r.name).collect();
        assert_eq!(names, vec!["old 1", "Bread"]);
    }

    #[tokio::test]
    async fn list_failure_writes_nothing() {
        let base = prior(2).await;
        let mut flaky = Flaky::new(base.clone());
        flaky.fail_list = true;

        let err = ReconciliationEngine::reconcile(&flaky, &[tuple("Milk", 350)]).await.unwrap_err();
        assert!(matches!(err, ReconciliationFailure::List(_)));
        assert!(err.failed_ops().is_empty());
        assert_eq!(flaky.writes.load(Ordering::SeqCst), 0);
        assert_eq!(base.list().await.unwrap().len(), 2);
    }

    #[test]
    fn failure_message_counts_writes() {
        let err = ReconciliationFailure::Incomplete {
            failed: vec![FailedWrite { op: FailedOp::Insert(3), reason: "x".into() }],
            report: ReconcileReport::default(),
        };
        assert_eq!(err.to_string(), "1 collection write(s) did not confirm");
        assert_eq!(FailedOp::Insert(3).to_string(), "insert item #3");
    }
}

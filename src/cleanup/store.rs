use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use super::record::CleanupRecord;
use crate::core::Result;

/// Durable home of pending cleanup tasks.
///
/// Implementations must make every operation an atomic commit: `insert`
/// composes with the entity mutation that necessitated the cleanup, and
/// `delete` is conditioned on the record still existing so that of two
/// processes draining the same task only one deleter wins.
#[async_trait]
pub trait CleanupStore: Send + Sync {
    async fn insert(&self, record: CleanupRecord) -> Result<()>;

    /// Returns the records eligible to run at `now`, in no particular
    /// order. Handlers tolerate out-of-order processing of unrelated
    /// prefixes.
    async fn due(&self, now: DateTime<Utc>) -> Result<Vec<CleanupRecord>>;

    /// Delete-if-present. Returns false when the record was already
    /// gone, i.e. a concurrent drainer finished it first.
    async fn delete(&self, id: &str) -> Result<bool>;

    async fn count(&self) -> Result<usize>;
}

/// Reference store keeping records behind a single lock, so each
/// operation commits atomically.
pub struct InMemoryCleanupStore {
    records: RwLock<HashMap<String, CleanupRecord>>,
}

impl InMemoryCleanupStore {
    pub fn new() -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for InMemoryCleanupStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CleanupStore for InMemoryCleanupStore {
    async fn insert(&self, record: CleanupRecord) -> Result<()> {
        let mut records = self.records.write().await;
        records.insert(record.id.clone(), record);
        Ok(())
    }

    async fn due(&self, now: DateTime<Utc>) -> Result<Vec<CleanupRecord>> {
        let records = self.records.read().await;
        Ok(records
            .values()
            .filter(|record| record.is_due(now))
            .cloned()
            .collect())
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        let mut records = self.records.write().await;
        Ok(records.remove(id).is_some())
    }

    async fn count(&self) -> Result<usize> {
        let records = self.records.read().await;
        Ok(records.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cleanup::record::CleanupKind;

    #[test]
    fn insert_due_delete() {
        tokio_test::block_on(async {
            let store = InMemoryCleanupStore::new();
            let record = CleanupRecord::new(CleanupKind::DyingUnit, "myapp/0", vec![]);
            let id = record.id.clone();

            store.insert(record).await.unwrap();
            assert_eq!(store.count().await.unwrap(), 1);

            let due = store.due(Utc::now()).await.unwrap();
            assert_eq!(due.len(), 1);
            assert_eq!(due[0].prefix, "myapp/0");

            assert!(store.delete(&id).await.unwrap());
            // Second deleter loses: the record is already gone.
            assert!(!store.delete(&id).await.unwrap());
            assert_eq!(store.count().await.unwrap(), 0);
        });
    }

    #[test]
    fn deferred_records_stay_out_of_due() {
        tokio_test::block_on(async {
            let store = InMemoryCleanupStore::new();
            let now = Utc::now();
            let later = now + std::time::Duration::from_secs(300);
            store
                .insert(CleanupRecord::at(
                    later,
                    CleanupKind::ForceRemoveUnit,
                    "myapp/0",
                    vec![],
                ))
                .await
                .unwrap();

            assert!(store.due(now).await.unwrap().is_empty());
            assert_eq!(store.due(later).await.unwrap().len(), 1);
        });
    }
}

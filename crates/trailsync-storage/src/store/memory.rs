use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use tokio::sync::Mutex;
use trailsync_core::Row;

use super::{conflict_filters, matches_all, Filter, RecordStore, StoreError, WriteOutcome};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StoreCallCounts {
    pub selects: usize,
    pub inserts: usize,
    pub updates: usize,
}

impl StoreCallCounts {
    pub fn writes(&self) -> usize {
        self.inserts + self.updates
    }
}

/// In-process store used for dry runs and tests. Counts every call it serves.
#[derive(Debug, Default)]
pub struct MemoryStore {
    collections: Mutex<HashMap<String, Vec<Row>>>,
    rejections: Mutex<Vec<(String, Option<Filter>)>>,
    selects: AtomicUsize,
    inserts: AtomicUsize,
    updates: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn seed(&self, collection: &str, rows: impl IntoIterator<Item = Row>) {
        let mut collections = self.collections.lock().await;
        collections
            .entry(collection.to_string())
            .or_default()
            .extend(rows);
    }

    pub async fn rows(&self, collection: &str) -> Vec<Row> {
        self.collections
            .lock()
            .await
            .get(collection)
            .cloned()
            .unwrap_or_default()
    }

    /// Makes writes to `collection` fail, optionally only for rows matching `filter`.
    pub async fn reject_writes(&self, collection: &str, filter: Option<Filter>) {
        self.rejections
            .lock()
            .await
            .push((collection.to_string(), filter));
    }

    pub fn counts(&self) -> StoreCallCounts {
        StoreCallCounts {
            selects: self.selects.load(Ordering::SeqCst),
            inserts: self.inserts.load(Ordering::SeqCst),
            updates: self.updates.load(Ordering::SeqCst),
        }
    }

    pub fn reset_counts(&self) {
        self.selects.store(0, Ordering::SeqCst);
        self.inserts.store(0, Ordering::SeqCst);
        self.updates.store(0, Ordering::SeqCst);
    }

    async fn check_rejected(
        &self,
        operation: &'static str,
        collection: &str,
        row: &Row,
    ) -> Result<(), StoreError> {
        let rejections = self.rejections.lock().await;
        let rejected = rejections.iter().any(|(name, filter)| {
            name == collection && filter.as_ref().map_or(true, |f| f.matches(row))
        });
        if rejected {
            return Err(StoreError::Rejected {
                operation,
                collection: collection.to_string(),
                status: 503,
                body: "rejected by memory store".to_string(),
            });
        }
        Ok(())
    }
}

fn merge_into(target: &mut Row, changes: &Row) {
    for (key, value) in changes {
        target.insert(key.clone(), value.clone());
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    fn backend(&self) -> &'static str {
        "memory"
    }

    async fn select(&self, collection: &str, filters: &[Filter]) -> Result<Vec<Row>, StoreError> {
        self.selects.fetch_add(1, Ordering::SeqCst);
        let collections = self.collections.lock().await;
        Ok(collections
            .get(collection)
            .map(|rows| {
                rows.iter()
                    .filter(|row| matches_all(row, filters))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn insert(&self, collection: &str, row: &Row) -> Result<WriteOutcome, StoreError> {
        self.inserts.fetch_add(1, Ordering::SeqCst);
        if row.is_empty() {
            return Err(StoreError::InvalidRow("empty row".to_string()));
        }
        self.check_rejected("insert", collection, row).await?;
        let mut collections = self.collections.lock().await;
        collections
            .entry(collection.to_string())
            .or_default()
            .push(row.clone());
        Ok(WriteOutcome { affected: 1 })
    }

    async fn update(
        &self,
        collection: &str,
        row: &Row,
        filters: &[Filter],
    ) -> Result<WriteOutcome, StoreError> {
        self.updates.fetch_add(1, Ordering::SeqCst);
        self.check_rejected("update", collection, row).await?;
        let mut collections = self.collections.lock().await;
        let mut affected = 0;
        if let Some(rows) = collections.get_mut(collection) {
            for stored in rows.iter_mut().filter(|stored| matches_all(stored, filters)) {
                merge_into(stored, row);
                affected += 1;
            }
        }
        Ok(WriteOutcome { affected })
    }

    async fn upsert(
        &self,
        collection: &str,
        row: &Row,
        conflict_columns: &[&str],
    ) -> Result<WriteOutcome, StoreError> {
        let filters = conflict_filters(row, conflict_columns)?;
        self.check_rejected("upsert", collection, row).await?;
        let mut collections = self.collections.lock().await;
        let rows = collections.entry(collection.to_string()).or_default();
        match rows.iter_mut().find(|stored| matches_all(stored, &filters)) {
            Some(stored) => {
                self.updates.fetch_add(1, Ordering::SeqCst);
                merge_into(stored, row);
            }
            None => {
                self.inserts.fetch_add(1, Ordering::SeqCst);
                rows.push(row.clone());
            }
        }
        Ok(WriteOutcome { affected: 1 })
    }
}

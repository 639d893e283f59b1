//! Collection-oriented record store seam and its backends.

mod memory;
mod postgres;
mod postgrest;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use trailsync_core::Row;

pub use memory::{MemoryStore, StoreCallCounts};
pub use postgres::PgStore;
pub use postgrest::PostgrestStore;

/// Equality filter on one column.
#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    pub column: String,
    pub value: Value,
}

impl Filter {
    pub fn eq(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            column: column.into(),
            value: value.into(),
        }
    }

    /// Text rendering used for comparison, so `"42"` and `42` match.
    pub fn value_text(&self) -> String {
        value_text(&self.value)
    }

    pub fn matches(&self, row: &Row) -> bool {
        row.get(&self.column)
            .is_some_and(|v| !v.is_null() && value_text(v) == self.value_text())
    }
}

pub fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

pub fn matches_all(row: &Row, filters: &[Filter]) -> bool {
    filters.iter().all(|f| f.matches(row))
}

/// Filters selecting the row that `row` would collide with on `columns`.
pub fn conflict_filters(row: &Row, columns: &[&str]) -> Result<Vec<Filter>, StoreError> {
    columns
        .iter()
        .map(|column| {
            row.get(*column)
                .map(|value| Filter::eq(*column, value.clone()))
                .ok_or_else(|| {
                    StoreError::InvalidRow(format!("missing conflict column `{column}`"))
                })
        })
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WriteOutcome {
    pub affected: usize,
}

impl WriteOutcome {
    pub fn is_empty(&self) -> bool {
        self.affected == 0
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("store rejected {operation} on {collection}: http {status}: {body}")]
    Rejected {
        operation: &'static str,
        collection: String,
        status: u16,
        body: String,
    },
    #[error("decoding store response: {0}")]
    Decode(String),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("{operation} on {collection} affected no rows")]
    NoRowsAffected {
        operation: &'static str,
        collection: String,
    },
    #[error("invalid row: {0}")]
    InvalidRow(String),
}

/// Persistent store offering select/insert/update by equality filters on named collections.
#[async_trait]
pub trait RecordStore: Send + Sync {
    fn backend(&self) -> &'static str;

    async fn select(&self, collection: &str, filters: &[Filter]) -> Result<Vec<Row>, StoreError>;

    async fn insert(&self, collection: &str, row: &Row) -> Result<WriteOutcome, StoreError>;

    async fn update(
        &self,
        collection: &str,
        row: &Row,
        filters: &[Filter],
    ) -> Result<WriteOutcome, StoreError>;

    /// Insert-or-update keyed by `conflict_columns`.
    ///
    /// This default is a select followed by a write and is not atomic: two writers racing on
    /// the same key can both insert. Backends that can express a conditional write override it.
    async fn upsert(
        &self,
        collection: &str,
        row: &Row,
        conflict_columns: &[&str],
    ) -> Result<WriteOutcome, StoreError> {
        let filters = conflict_filters(row, conflict_columns)?;
        if self.select(collection, &filters).await?.is_empty() {
            self.insert(collection, row).await
        } else {
            self.update(collection, row, &filters).await
        }
    }
}

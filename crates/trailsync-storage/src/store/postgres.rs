use async_trait::async_trait;
use serde_json::Value;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::types::Json;
use trailsync_core::Row;

use super::{Filter, RecordStore, StoreError, WriteOutcome};

/// Record store over PostgreSQL. Rows travel as `jsonb` and are spread onto the table's
/// own column types with `jsonb_populate_record`.
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections.max(1))
            .connect(database_url)
            .await?;
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }
}

pub(crate) fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn column_list(columns: &[&str], qualifier: Option<&str>) -> String {
    columns
        .iter()
        .map(|c| match qualifier {
            Some(q) => format!("{q}.{}", quote_ident(c)),
            None => quote_ident(c),
        })
        .collect::<Vec<_>>()
        .join(", ")
}

/// `WHERE` clause comparing each column's text form; parameters start at `$first_param`.
fn where_clause(filters: &[Filter], first_param: usize) -> String {
    if filters.is_empty() {
        return String::new();
    }
    let predicates = filters
        .iter()
        .enumerate()
        .map(|(i, f)| format!("t.{}::text = ${}", quote_ident(&f.column), first_param + i))
        .collect::<Vec<_>>()
        .join(" AND ");
    format!(" WHERE {predicates}")
}

pub(crate) fn select_sql(collection: &str, filters: &[Filter]) -> String {
    format!(
        "SELECT row_to_json(t)::jsonb FROM {} AS t{}",
        quote_ident(collection),
        where_clause(filters, 1)
    )
}

pub(crate) fn insert_sql(collection: &str, columns: &[&str]) -> String {
    let table = quote_ident(collection);
    format!(
        "INSERT INTO {table} ({}) SELECT {} FROM jsonb_populate_record(NULL::{table}, $1) AS r",
        column_list(columns, None),
        column_list(columns, Some("r")),
    )
}

pub(crate) fn update_sql(collection: &str, columns: &[&str], filters: &[Filter]) -> String {
    let table = quote_ident(collection);
    format!(
        "UPDATE {table} AS t SET ({}) = \
         (SELECT {} FROM jsonb_populate_record(NULL::{table}, $1) AS r){}",
        column_list(columns, None),
        column_list(columns, Some("r")),
        where_clause(filters, 2)
    )
}

pub(crate) fn upsert_sql(collection: &str, columns: &[&str], conflict_columns: &[&str]) -> String {
    let assignments = columns
        .iter()
        .filter(|c| !conflict_columns.contains(c))
        .map(|c| format!("{0} = EXCLUDED.{0}", quote_ident(c)))
        .collect::<Vec<_>>();
    let action = if assignments.is_empty() {
        "DO NOTHING".to_string()
    } else {
        format!("DO UPDATE SET {}", assignments.join(", "))
    };
    format!(
        "{} ON CONFLICT ({}) {action}",
        insert_sql(collection, columns),
        column_list(conflict_columns, None)
    )
}

fn row_columns(row: &Row) -> Result<Vec<&str>, StoreError> {
    if row.is_empty() {
        return Err(StoreError::InvalidRow("empty row".to_string()));
    }
    Ok(row.keys().map(String::as_str).collect())
}

#[async_trait]
impl RecordStore for PgStore {
    fn backend(&self) -> &'static str {
        "postgres"
    }

    async fn select(&self, collection: &str, filters: &[Filter]) -> Result<Vec<Row>, StoreError> {
        let sql = select_sql(collection, filters);
        let mut query = sqlx::query_scalar::<_, Json<Value>>(&sql);
        for filter in filters {
            query = query.bind(filter.value_text());
        }
        let rows = query.fetch_all(&self.pool).await?;
        rows.into_iter()
            .map(|Json(value)| match value {
                Value::Object(row) => Ok(row),
                other => Err(StoreError::Decode(format!("expected a row object, got {other}"))),
            })
            .collect()
    }

    async fn insert(&self, collection: &str, row: &Row) -> Result<WriteOutcome, StoreError> {
        let sql = insert_sql(collection, &row_columns(row)?);
        let result = sqlx::query(&sql)
            .bind(Json(Value::Object(row.clone())))
            .execute(&self.pool)
            .await?;
        Ok(WriteOutcome {
            affected: result.rows_affected() as usize,
        })
    }

    async fn update(
        &self,
        collection: &str,
        row: &Row,
        filters: &[Filter],
    ) -> Result<WriteOutcome, StoreError> {
        let sql = update_sql(collection, &row_columns(row)?, filters);
        let mut query = sqlx::query(&sql).bind(Json(Value::Object(row.clone())));
        for filter in filters {
            query = query.bind(filter.value_text());
        }
        let result = query.execute(&self.pool).await?;
        Ok(WriteOutcome {
            affected: result.rows_affected() as usize,
        })
    }

    /// `INSERT ... ON CONFLICT`; requires a unique constraint over `conflict_columns`.
    async fn upsert(
        &self,
        collection: &str,
        row: &Row,
        conflict_columns: &[&str],
    ) -> Result<WriteOutcome, StoreError> {
        let sql = upsert_sql(collection, &row_columns(row)?, conflict_columns);
        let result = sqlx::query(&sql)
            .bind(Json(Value::Object(row.clone())))
            .execute(&self.pool)
            .await?;
        Ok(WriteOutcome {
            affected: result.rows_affected() as usize,
        })
    }
}

use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::{Method, Url};
use tracing::debug;
use trailsync_core::Row;

use super::{Filter, RecordStore, StoreError, WriteOutcome};

const PREFER: &str = "Prefer";

/// Record store speaking the PostgREST dialect (Supabase `rest/v1`).
#[derive(Debug, Clone)]
pub struct PostgrestStore {
    client: reqwest::Client,
    base_url: Url,
}

impl PostgrestStore {
    pub fn new(base_url: &str, api_key: &str, timeout: Duration) -> anyhow::Result<Self> {
        let base_url = Url::parse(base_url.trim_end_matches('/'))
            .with_context(|| format!("parsing store url {base_url}"))?;
        anyhow::ensure!(!base_url.cannot_be_a_base(), "store url {base_url} cannot carry a path");

        let mut headers = HeaderMap::new();
        if !api_key.is_empty() {
            let key = HeaderValue::from_str(api_key).context("store key is not a valid header")?;
            let bearer = HeaderValue::from_str(&format!("Bearer {api_key}"))
                .context("store key is not a valid header")?;
            headers.insert("apikey", key);
            headers.insert(AUTHORIZATION, bearer);
        }

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .build()
            .context("building store client")?;

        Ok(Self { client, base_url })
    }

    pub fn table_url(&self, collection: &str) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.pop_if_empty().extend(["rest", "v1", collection]);
        }
        url
    }

    async fn send(
        &self,
        method: Method,
        operation: &'static str,
        collection: &str,
        query: Vec<(String, String)>,
        prefer: &str,
        body: Option<&Row>,
    ) -> Result<Vec<Row>, StoreError> {
        let url = self.table_url(collection);
        let mut request = self
            .client
            .request(method, url)
            .query(&query)
            .header(PREFER, prefer);
        if let Some(body) = body {
            request = request.json(body);
        }

        let resp = request.send().await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(StoreError::Rejected {
                operation,
                collection: collection.to_string(),
                status: status.as_u16(),
                body,
            });
        }

        let text = resp.text().await?;
        debug!(operation, collection, status = status.as_u16(), "store response");
        if text.trim().is_empty() {
            return Ok(Vec::new());
        }
        serde_json::from_str(&text)
            .map_err(|err| StoreError::Decode(format!("{operation} on {collection}: {err}")))
    }
}

/// `column=eq.value` pairs in PostgREST horizontal filter syntax.
pub fn filter_query(filters: &[Filter]) -> Vec<(String, String)> {
    filters
        .iter()
        .map(|f| (f.column.clone(), format!("eq.{}", f.value_text())))
        .collect()
}

#[async_trait]
impl RecordStore for PostgrestStore {
    fn backend(&self) -> &'static str {
        "postgrest"
    }

    async fn select(&self, collection: &str, filters: &[Filter]) -> Result<Vec<Row>, StoreError> {
        let mut query = vec![("select".to_string(), "*".to_string())];
        query.extend(filter_query(filters));
        self.send(Method::GET, "select", collection, query, "count=none", None)
            .await
    }

    async fn insert(&self, collection: &str, row: &Row) -> Result<WriteOutcome, StoreError> {
        let rows = self
            .send(
                Method::POST,
                "insert",
                collection,
                Vec::new(),
                "return=representation",
                Some(row),
            )
            .await?;
        Ok(WriteOutcome {
            affected: rows.len(),
        })
    }

    async fn update(
        &self,
        collection: &str,
        row: &Row,
        filters: &[Filter],
    ) -> Result<WriteOutcome, StoreError> {
        let rows = self
            .send(
                Method::PATCH,
                "update",
                collection,
                filter_query(filters),
                "return=representation",
                Some(row),
            )
            .await?;
        Ok(WriteOutcome {
            affected: rows.len(),
        })
    }

    /// Single request resolved by the unique constraint on `conflict_columns`.
    async fn upsert(
        &self,
        collection: &str,
        row: &Row,
        conflict_columns: &[&str],
    ) -> Result<WriteOutcome, StoreError> {
        let query = vec![("on_conflict".to_string(), conflict_columns.join(","))];
        let rows = self
            .send(
                Method::POST,
                "upsert",
                collection,
                query,
                "resolution=merge-duplicates,return=representation",
                Some(row),
            )
            .await?;
        Ok(WriteOutcome {
            affected: rows.len(),
        })
    }
}

use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use reqwest::Url;
use serde_json::Value;
use tracing::{debug, warn};
use trailsync_core::{as_sequence, scalar_text, CatalogListing, Document, EntityKind};
use trailsync_storage::{redact_query, HttpFetcher};

use crate::xml::parse_bytes;
use crate::{CatalogError, CatalogSource};

#[derive(Debug, Clone)]
pub struct CatalogClientConfig {
    pub base_url: String,
    pub project: String,
    pub api_key: String,
}

/// Catalog source backed by the provider's project API.
#[derive(Debug, Clone)]
pub struct CatalogClient {
    http: Arc<HttpFetcher>,
    base_url: Url,
    project: String,
    api_key: String,
}

impl CatalogClient {
    pub fn new(http: Arc<HttpFetcher>, config: CatalogClientConfig) -> anyhow::Result<Self> {
        let base_url = Url::parse(config.base_url.trim_end_matches('/'))
            .with_context(|| format!("parsing catalog url {}", config.base_url))?;
        anyhow::ensure!(
            !base_url.cannot_be_a_base(),
            "catalog url {base_url} cannot carry a path"
        );
        Ok(Self {
            http,
            base_url,
            project: config.project,
            api_key: config.api_key,
        })
    }

    fn project_url<'a>(&self, segments: impl IntoIterator<Item = &'a str>) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty()
                .extend(["api", "project", self.project.as_str()])
                .extend(segments);
        }
        url
    }

    pub fn listing_url(&self, kind: &EntityKind, region: Option<&str>) -> Url {
        let mut url = self.project_url(kind.list_path.split('/'));
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("key", &self.api_key);
            if let Some(region) = region {
                query.append_pair("area", region);
            }
        }
        url
    }

    pub fn detail_url(&self, id: &str, language: &str) -> Url {
        let mut url = self.project_url(["oois", id]);
        url.query_pairs_mut()
            .append_pair("key", &self.api_key)
            .append_pair("lang", language);
        url
    }

    async fn fetch_document(&self, url: &Url) -> Result<Document, CatalogError> {
        debug!(url = %redact_query(url.as_str(), &["key"]), "catalog request");
        let response = self.http.fetch_bytes(url.as_str()).await?;
        parse_bytes(&response.body)
    }
}

/// Identifiers of a `datalist/data` document, in order. An empty `datalist` is an empty listing.
pub fn parse_listing(doc: &Document) -> Result<CatalogListing, CatalogError> {
    let datalist = doc
        .root()
        .get("datalist")
        .ok_or_else(|| CatalogError::Parse("listing has no datalist".to_string()))?;

    let mut identifiers = Vec::new();
    for entry in as_sequence(datalist.get("data")) {
        match entry.get("@id").and_then(scalar_text) {
            Some(id) if !id.is_empty() => identifiers.push(id),
            _ => warn!("listing entry without id ignored"),
        }
    }
    Ok(CatalogListing::new(identifiers))
}

/// The `oois/<tag>` entity node of a detail document.
pub fn detail_node(doc: Document, kind: &EntityKind) -> Result<Document, CatalogError> {
    let Value::Object(mut root) = doc.into_value() else {
        return Err(CatalogError::Parse("detail document is not a mapping".to_string()));
    };
    match root.remove("oois") {
        Some(Value::Object(mut oois)) => match oois.remove(kind.detail_tag) {
            Some(node @ Value::Object(_)) => Ok(Document::new(node)),
            Some(Value::Array(items)) => items
                .into_iter()
                .next()
                .map(Document::new)
                .ok_or_else(|| missing_entity(kind)),
            _ => Err(missing_entity(kind)),
        },
        _ => Err(missing_entity(kind)),
    }
}

fn missing_entity(kind: &EntityKind) -> CatalogError {
    CatalogError::Parse(format!("detail document has no oois/{}", kind.detail_tag))
}

#[async_trait]
impl CatalogSource for CatalogClient {
    async fn list_identifiers(
        &self,
        kind: &EntityKind,
        region: Option<&str>,
    ) -> Result<CatalogListing, CatalogError> {
        let url = self.listing_url(kind, region);
        let doc = self.fetch_document(&url).await?;
        let listing = parse_listing(&doc)?;
        debug!(kind = %kind.id, total = listing.total_count, "listing fetched");
        Ok(listing)
    }

    async fn fetch_detail(
        &self,
        kind: &EntityKind,
        id: &str,
        language: &str,
    ) -> Result<Document, CatalogError> {
        let url = self.detail_url(id, language);
        let doc = self.fetch_document(&url).await?;
        detail_node(doc, kind)
    }
}

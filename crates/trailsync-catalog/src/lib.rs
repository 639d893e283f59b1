//! Remote catalog access: the source contract, the HTTP client, XML decoding, the entity kinds
//! and the document normalizer.

mod client;
pub mod kinds;
mod normalize;
pub mod xml;

use async_trait::async_trait;
use thiserror::Error;
use trailsync_core::{CatalogListing, Document, EntityKind};
use trailsync_storage::FetchError;

pub use client::{detail_node, parse_listing, CatalogClient, CatalogClientConfig};
pub use kinds::kind;
pub use normalize::{normalize, NormalizeContext};

pub const CRATE_NAME: &str = "trailsync-catalog";

#[derive(Debug, Error)]
pub enum CatalogError {
    /// Connection failures, already retried by the fetcher, and error statuses.
    #[error("catalog transport failure: {0}")]
    Transport(#[from] FetchError),
    /// A response arrived but is not a usable document. Never retried.
    #[error("catalog parse failure: {0}")]
    Parse(String),
}

impl CatalogError {
    pub fn is_transport(&self) -> bool {
        matches!(self, CatalogError::Transport(_))
    }
}

/// Where listings and detail documents come from.
#[async_trait]
pub trait CatalogSource: Send + Sync {
    async fn list_identifiers(
        &self,
        kind: &EntityKind,
        region: Option<&str>,
    ) -> Result<CatalogListing, CatalogError>;

    /// Entity node of the detail document for `id`.
    async fn fetch_detail(
        &self,
        kind: &EntityKind,
        id: &str,
        language: &str,
    ) -> Result<Document, CatalogError>;
}

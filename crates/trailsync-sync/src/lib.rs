//! Sync engine: configuration, logging setup and the per-kind reconciliation pipeline.

pub mod config;
pub mod logging;
mod pipeline;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use trailsync_catalog::{CatalogClient, CatalogClientConfig, CatalogError};
use trailsync_core::{DailyStatistic, EntityKind, KindId, RunAggregate};
use trailsync_storage::{
    HttpClientConfig, HttpFetcher, MemoryStore, PgStore, PostgrestStore, RateLimiter, RecordStore,
    StoreError,
};
use uuid::Uuid;

pub use config::{ConfigError, StoreBackend, TrailsyncConfig, DEFAULT_CONFIG_PATH};
pub use pipeline::{
    unique_identifiers, ItemAction, ItemError, ItemOutcome, ReconcileReport, RunSettings,
    SurveyReport, SyncPipeline,
};

pub const CRATE_NAME: &str = "trailsync-sync";

/// Failures that end a run. Per-item failures never surface here.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    Configuration(#[from] ConfigError),
    #[error("listing {kind} failed: {source}")]
    Listing {
        kind: KindId,
        #[source]
        source: CatalogError,
    },
    #[error("store failure on {collection}: {source}")]
    Store {
        collection: String,
        #[source]
        source: StoreError,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct SyncRunSummary {
    pub run_id: Uuid,
    pub kind: KindId,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub listed: usize,
    pub inserted: usize,
    pub updated: usize,
    pub skipped: usize,
    pub failed: usize,
    pub retired: usize,
    pub aggregate: RunAggregate,
    pub statistic: Option<DailyStatistic>,
}

impl RunSettings {
    pub fn from_config(config: &TrailsyncConfig) -> Self {
        Self {
            project: config.catalog.project.clone(),
            region_filter: config.region_filter().map(str::to_string),
            region_stamp: config.region_stamp(),
            language: config.catalog.language.clone(),
            table_prefix: config.store.table_prefix.clone(),
            refresh_stale: config.execution.refresh_stale,
            concurrency: config.execution.concurrency,
            atomic_upsert: config.store.atomic_upsert,
        }
    }
}

async fn connect_store(config: &TrailsyncConfig) -> Result<Arc<dyn RecordStore>> {
    let url = || {
        config
            .store
            .url
            .as_deref()
            .ok_or(ConfigError::Missing("store.url"))
    };
    let store: Arc<dyn RecordStore> = match config.store.backend {
        StoreBackend::Memory => Arc::new(MemoryStore::new()),
        StoreBackend::Postgrest => Arc::new(PostgrestStore::new(
            url()?,
            config.store.key.as_deref().unwrap_or_default(),
            Duration::from_secs(config.catalog.timeout_secs),
        )?),
        StoreBackend::Postgres => Arc::new(
            PgStore::connect(url()?, config.store.max_connections)
                .await
                .context("connecting to postgres")?,
        ),
    };
    Ok(store)
}

fn assemble(config: &TrailsyncConfig, store: Arc<dyn RecordStore>) -> Result<SyncPipeline> {
    let http = HttpFetcher::new(HttpClientConfig {
        timeout: Duration::from_secs(config.catalog.timeout_secs),
        user_agent: Some(config.catalog.user_agent.clone()),
        global_concurrency: config.execution.concurrency.max(1),
        ..HttpClientConfig::default()
    })?;
    let source = CatalogClient::new(
        Arc::new(http),
        CatalogClientConfig {
            base_url: config.catalog.base_url.clone(),
            project: config.catalog.project.clone(),
            api_key: config.catalog.api_key.clone(),
        },
    )?;
    tracing::debug!(backend = store.backend(), "record store ready");

    let limiter = RateLimiter::new(
        config.execution.mode,
        config.execution.wait_min_secs,
        config.execution.wait_max_secs,
    );

    Ok(SyncPipeline::new(
        Arc::new(source),
        store,
        limiter,
        RunSettings::from_config(config),
    ))
}

/// Wires the catalog client, the configured store backend and the request limiter.
pub async fn build_pipeline(config: &TrailsyncConfig) -> Result<SyncPipeline> {
    config.validate()?;
    let store = connect_store(config).await?;
    assemble(config, store)
}

/// Pipeline for surveys, which never read or write records. The store settings are
/// neither checked nor connected; an empty in-memory store stands in.
pub fn build_survey_pipeline(config: &TrailsyncConfig) -> Result<SyncPipeline> {
    config.validate_catalog()?;
    assemble(config, Arc::new(MemoryStore::new()))
}

/// Runs every kind in order against one pipeline. Stops at the first run-ending failure.
pub async fn run_kinds(
    pipeline: &SyncPipeline,
    kinds: &[EntityKind],
) -> Result<Vec<SyncRunSummary>> {
    let mut summaries = Vec::with_capacity(kinds.len());
    for kind in kinds {
        let summary = pipeline
            .run_once(kind)
            .await
            .with_context(|| format!("sync run for {}", kind.id))?;
        summaries.push(summary);
    }
    Ok(summaries)
}

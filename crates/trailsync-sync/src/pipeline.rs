use std::collections::HashSet;
use std::sync::Arc;

use chrono::{Local, NaiveDate, Utc};
use futures::stream::{self, StreamExt};
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, error, info, warn};
use trailsync_catalog::{normalize, CatalogError, CatalogSource, NormalizeContext};
use trailsync_core::{
    coerce_i64, metric_values, scalar_text, CatalogListing, DailyStatistic, EntityKind,
    EntityRecord, KindId, RefreshPolicy, Row, RunAggregate, StatsKey, NEW_MARKER,
};
use trailsync_storage::{Filter, RateLimiter, RecordStore, StoreError};
use uuid::Uuid;

use crate::{SyncError, SyncRunSummary};

/// Per-run settings the engine needs, resolved from configuration.
#[derive(Debug, Clone)]
pub struct RunSettings {
    pub project: String,
    pub region_filter: Option<String>,
    pub region_stamp: String,
    pub language: String,
    pub table_prefix: String,
    pub refresh_stale: bool,
    pub concurrency: usize,
    pub atomic_upsert: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemAction {
    Inserted,
    Updated,
    Skipped,
}

#[derive(Debug, Error)]
pub enum ItemError {
    #[error(transparent)]
    Catalog(#[from] CatalogError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Result of one identifier. Failures are values; they never abort the run.
#[derive(Debug)]
pub enum ItemOutcome {
    Processed {
        id: String,
        action: ItemAction,
        distance_meters: f64,
        duration_minutes: i64,
    },
    Failed {
        id: String,
        reason: ItemError,
    },
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ReconcileReport {
    pub listed: usize,
    pub inserted: usize,
    pub updated: usize,
    pub skipped: usize,
    pub failed: usize,
    pub aggregate: RunAggregate,
    #[serde(skip)]
    pub listing: CatalogListing,
}

impl ReconcileReport {
    fn record(&mut self, kind: KindId, outcome: ItemOutcome) {
        match outcome {
            ItemOutcome::Processed {
                id,
                action,
                distance_meters,
                duration_minutes,
            } => {
                match action {
                    ItemAction::Inserted => {
                        self.inserted += 1;
                        info!(%kind, %id, "inserted");
                    }
                    ItemAction::Updated => {
                        self.updated += 1;
                        info!(%kind, %id, "updated");
                    }
                    ItemAction::Skipped => {
                        self.skipped += 1;
                        debug!(%kind, %id, "already current");
                    }
                }
                self.aggregate.fold(distance_meters, duration_minutes);
            }
            ItemOutcome::Failed { id, reason } => {
                self.failed += 1;
                warn!(%kind, %id, error = %reason, "item failed; continuing");
            }
        }
    }
}

/// Read-only totals over a fresh listing.
#[derive(Debug, Clone, Serialize)]
pub struct SurveyReport {
    pub kind: KindId,
    pub listed: usize,
    pub failed: usize,
    pub aggregate: RunAggregate,
}

/// Reconciliation engine over one catalog source and one record store.
pub struct SyncPipeline {
    source: Arc<dyn CatalogSource>,
    store: Arc<dyn RecordStore>,
    limiter: RateLimiter,
    settings: RunSettings,
}

impl SyncPipeline {
    pub fn new(
        source: Arc<dyn CatalogSource>,
        store: Arc<dyn RecordStore>,
        limiter: RateLimiter,
        settings: RunSettings,
    ) -> Self {
        Self {
            source,
            store,
            limiter,
            settings,
        }
    }

    pub fn settings(&self) -> &RunSettings {
        &self.settings
    }

    pub fn store(&self) -> &Arc<dyn RecordStore> {
        &self.store
    }

    fn collection(&self, name: &str) -> String {
        format!("{}{name}", self.settings.table_prefix)
    }

    fn context(&self) -> NormalizeContext<'_> {
        NormalizeContext {
            project: &self.settings.project,
            region: &self.settings.region_stamp,
            language: &self.settings.language,
        }
    }

    fn record_filters(&self, kind: &EntityKind, id: &str) -> Vec<Filter> {
        vec![
            Filter::eq(kind.id_field, id),
            Filter::eq("project", self.settings.project.as_str()),
        ]
    }

    async fn listing(&self, kind: &EntityKind) -> Result<CatalogListing, SyncError> {
        self.source
            .list_identifiers(kind, self.settings.region_filter.as_deref())
            .await
            .map_err(|source| SyncError::Listing {
                kind: kind.id,
                source,
            })
    }

    /// Lists `kind` and brings every listed entity into the store.
    pub async fn reconcile(&self, kind: &EntityKind) -> Result<ReconcileReport, SyncError> {
        let listing = self.listing(kind).await?;
        let ids = unique_identifiers(&listing);
        info!(
            kind = %kind.id,
            listed = listing.total_count,
            unique = ids.len(),
            "listing received"
        );

        let mut report = ReconcileReport {
            listed: listing.total_count,
            ..ReconcileReport::default()
        };
        let mut outcomes = stream::iter(ids)
            .map(|id| self.process_item(kind, id))
            .buffered(self.settings.concurrency.max(1));
        while let Some(outcome) = outcomes.next().await {
            report.record(kind.id, outcome);
        }

        report.listing = listing;
        Ok(report)
    }

    pub async fn process_item(&self, kind: &EntityKind, id: String) -> ItemOutcome {
        match self.try_process_item(kind, &id).await {
            Ok((action, (distance_meters, duration_minutes))) => ItemOutcome::Processed {
                id,
                action,
                distance_meters,
                duration_minutes,
            },
            Err(reason) => ItemOutcome::Failed { id, reason },
        }
    }

    async fn try_process_item(
        &self,
        kind: &EntityKind,
        id: &str,
    ) -> Result<(ItemAction, (f64, i64)), ItemError> {
        let collection = kind.collection_with_prefix(&self.settings.table_prefix);
        let filters = self.record_filters(kind, id);

        let existing = self.store.select(&collection, &filters).await?;
        let action = match existing.first() {
            Some(stored) if !self.is_stale(kind, stored) => {
                return Ok((ItemAction::Skipped, contribution(kind, stored)));
            }
            Some(_) => ItemAction::Updated,
            None => ItemAction::Inserted,
        };

        let mut record = self.fetch_record(kind, id).await?;
        let (operation, outcome) = if action == ItemAction::Updated {
            if kind.marks_new {
                record.set(NEW_MARKER, false);
            }
            ("update", self.store.update(&collection, &record.fields, &filters).await?)
        } else {
            if kind.marks_new {
                record.set(NEW_MARKER, true);
            }
            ("insert", self.store.insert(&collection, &record.fields).await?)
        };
        if outcome.is_empty() {
            return Err(StoreError::NoRowsAffected {
                operation,
                collection,
            }
            .into());
        }

        Ok((action, contribution(kind, &record.fields)))
    }

    fn is_stale(&self, kind: &EntityKind, stored: &Row) -> bool {
        if !self.settings.refresh_stale {
            return false;
        }
        match kind.refresh {
            RefreshPolicy::Never => false,
            RefreshPolicy::Always => true,
            RefreshPolicy::WhenNull(columns) => columns
                .iter()
                .any(|column| stored.get(*column).map_or(true, Value::is_null)),
        }
    }

    async fn fetch_record(
        &self,
        kind: &EntityKind,
        id: &str,
    ) -> Result<EntityRecord, CatalogError> {
        self.limiter.delay().await;
        let doc = self
            .source
            .fetch_detail(kind, id, &self.settings.language)
            .await?;
        Ok(normalize(&doc, kind, id, &self.context()))
    }

    /// Writes the daily statistic for `(date, region, project)`. Kinds without statistics
    /// return `None` without touching the store.
    pub async fn flush(
        &self,
        kind: &EntityKind,
        aggregate: &RunAggregate,
        date: NaiveDate,
    ) -> Result<Option<DailyStatistic>, SyncError> {
        let Some(columns) = kind.stats else {
            debug!(kind = %kind.id, "kind keeps no daily statistics");
            return Ok(None);
        };

        let key = StatsKey {
            date,
            region: self.settings.region_stamp.clone(),
            project: self.settings.project.clone(),
        };
        let statistic = DailyStatistic::from_aggregate(&key, aggregate, &columns);
        let row = statistic.to_row(&columns);
        let collection = self.collection(columns.collection);
        let store_error = |source| SyncError::Store {
            collection: collection.clone(),
            source,
        };

        let filters = key
            .key_values()
            .into_iter()
            .map(|(column, value)| Filter::eq(column, value))
            .collect::<Vec<_>>();
        let previous = self
            .store
            .select(&collection, &filters)
            .await
            .map_err(store_error)?;
        if let Some(existing) = previous.first() {
            let before = existing.get(columns.count).map(coerce_i64).unwrap_or(0);
            info!(
                kind = %kind.id,
                date = %key.date_string(),
                before,
                after = statistic.total_entities,
                "replacing today's statistic"
            );
        }

        // Check-then-write races with a concurrent run on the same key; atomic_upsert closes it.
        let outcome = if self.settings.atomic_upsert {
            self.store
                .upsert(&collection, &row, &StatsKey::COLUMNS)
                .await
        } else if previous.is_empty() {
            self.store.insert(&collection, &row).await
        } else {
            self.store.update(&collection, &row, &filters).await
        }
        .map_err(store_error)?;

        if outcome.is_empty() {
            return Err(store_error(StoreError::NoRowsAffected {
                operation: "flush",
                collection: collection.clone(),
            }));
        }
        Ok(Some(statistic))
    }

    /// Marks stored records of the project that left the listing. Returns how many changed.
    ///
    /// A region-filtered listing only covers part of the project, so nothing is retired then.
    pub async fn retire(
        &self,
        kind: &EntityKind,
        listing: &CatalogListing,
    ) -> Result<usize, SyncError> {
        let Some(retirement) = kind.retirement else {
            return Ok(0);
        };
        if let Some(region) = self.settings.region_filter.as_deref() {
            warn!(kind = %kind.id, %region, "listing is region filtered; retirement skipped");
            return Ok(0);
        }
        let collection = kind.collection_with_prefix(&self.settings.table_prefix);
        let rows = self
            .store
            .select(
                &collection,
                &[Filter::eq("project", self.settings.project.as_str())],
            )
            .await
            .map_err(|source| SyncError::Store {
                collection: collection.clone(),
                source,
            })?;

        let listed: HashSet<&str> = listing.identifiers.iter().map(String::as_str).collect();
        let mut change = Row::new();
        change.insert(retirement.field.to_string(), Value::from(retirement.value));

        let mut retired = 0;
        for row in &rows {
            let Some(id) = row.get(kind.id_field).and_then(scalar_text) else {
                continue;
            };
            let current = row.get(retirement.field).and_then(scalar_text);
            if listed.contains(id.as_str()) || current.as_deref() == Some(retirement.value) {
                continue;
            }
            match self
                .store
                .update(&collection, &change, &self.record_filters(kind, &id))
                .await
            {
                Ok(outcome) if !outcome.is_empty() => {
                    retired += 1;
                    info!(kind = %kind.id, %id, status = retirement.value, "retired");
                }
                Ok(_) => warn!(kind = %kind.id, %id, "retirement matched no rows"),
                Err(err) => warn!(kind = %kind.id, %id, error = %err, "retirement failed"),
            }
        }
        Ok(retired)
    }

    /// Clears the `new` marker on every record of the project. Returns the affected rows.
    pub async fn reset_new(&self, kind: &EntityKind) -> Result<usize, SyncError> {
        if !kind.marks_new {
            warn!(kind = %kind.id, "kind carries no new marker");
            return Ok(0);
        }
        let collection = kind.collection_with_prefix(&self.settings.table_prefix);
        let mut change = Row::new();
        change.insert(NEW_MARKER.to_string(), Value::Bool(false));
        let filters = [
            Filter::eq(NEW_MARKER, true),
            Filter::eq("project", self.settings.project.as_str()),
        ];
        let outcome = self
            .store
            .update(&collection, &change, &filters)
            .await
            .map_err(|source| SyncError::Store {
                collection: collection.clone(),
                source,
            })?;
        info!(kind = %kind.id, cleared = outcome.affected, "new markers reset");
        Ok(outcome.affected)
    }

    /// Fetches every listed entity and totals its metrics without writing anything.
    pub async fn survey(&self, kind: &EntityKind) -> Result<SurveyReport, SyncError> {
        let listing = self.listing(kind).await?;
        let ids = unique_identifiers(&listing);

        let mut report = SurveyReport {
            kind: kind.id,
            listed: listing.total_count,
            failed: 0,
            aggregate: RunAggregate::default(),
        };
        let mut fetched = stream::iter(ids)
            .map(|id| async move {
                let record = self.fetch_record(kind, &id).await;
                (id, record)
            })
            .buffered(self.settings.concurrency.max(1));
        while let Some((id, record)) = fetched.next().await {
            match record {
                Ok(record) => {
                    let (distance, duration) = contribution(kind, &record.fields);
                    report.aggregate.fold(distance, duration);
                }
                Err(err) => {
                    report.failed += 1;
                    warn!(kind = %kind.id, %id, error = %err, "survey item failed");
                }
            }
        }
        Ok(report)
    }

    /// One full run for `kind`: reconcile, retire, then flush today's statistic.
    pub async fn run_once(&self, kind: &EntityKind) -> Result<SyncRunSummary, SyncError> {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        info!(
            %run_id,
            kind = %kind.id,
            project = %self.settings.project,
            region = %self.settings.region_stamp,
            "sync run started"
        );

        let report = self.reconcile(kind).await.inspect_err(|err| {
            error!(%run_id, kind = %kind.id, error = %err, "listing failed; run aborted");
        })?;
        let retired = self.retire(kind, &report.listing).await?;
        let statistic = self
            .flush(kind, &report.aggregate, Local::now().date_naive())
            .await
            .inspect_err(|err| {
                error!(%run_id, kind = %kind.id, error = %err, "daily statistic flush failed");
            })?;

        let finished_at = Utc::now();
        info!(
            %run_id,
            kind = %kind.id,
            inserted = report.inserted,
            updated = report.updated,
            skipped = report.skipped,
            failed = report.failed,
            "sync run finished"
        );

        Ok(SyncRunSummary {
            run_id,
            kind: kind.id,
            started_at,
            finished_at,
            listed: report.listed,
            inserted: report.inserted,
            updated: report.updated,
            skipped: report.skipped,
            failed: report.failed,
            retired,
            aggregate: report.aggregate,
            statistic,
        })
    }
}

/// Metrics an item adds to the aggregate. Kinds without metrics only count.
fn contribution(kind: &EntityKind, row: &Row) -> (f64, i64) {
    kind.metrics
        .map(|metrics| metric_values(row, &metrics))
        .unwrap_or((0.0, 0))
}

/// Listing identifiers without repeats, first occurrence kept.
pub fn unique_identifiers(listing: &CatalogListing) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut unique = Vec::with_capacity(listing.identifiers.len());
    for id in &listing.identifiers {
        if seen.insert(id.as_str()) {
            unique.push(id.clone());
        } else {
            warn!(%id, "duplicate identifier in listing");
        }
    }
    unique
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::{HashMap, HashSet};
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use serde_json::json;
    use trailsync_catalog::kinds;
    use trailsync_core::Document;
    use trailsync_storage::{ExecutionMode, FetchError, MemoryStore};

    #[derive(Default)]
    struct ScriptedSource {
        listing: Option<Vec<String>>,
        details: HashMap<String, Value>,
        unavailable: HashSet<String>,
        detail_calls: AtomicUsize,
    }

    impl ScriptedSource {
        fn listing(ids: &[&str]) -> Self {
            Self {
                listing: Some(ids.iter().map(|id| id.to_string()).collect()),
                ..Self::default()
            }
        }

        fn detail(mut self, id: &str, node: Value) -> Self {
            self.details.insert(id.to_string(), node);
            self
        }

        fn unavailable(mut self, id: &str) -> Self {
            self.unavailable.insert(id.to_string());
            self
        }

        fn detail_calls(&self) -> usize {
            self.detail_calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl CatalogSource for ScriptedSource {
        async fn list_identifiers(
            &self,
            _kind: &EntityKind,
            _region: Option<&str>,
        ) -> Result<CatalogListing, CatalogError> {
            match &self.listing {
                Some(ids) => Ok(CatalogListing::new(ids.clone())),
                None => Err(CatalogError::Transport(FetchError::HttpStatus {
                    status: 503,
                    url: "listing".into(),
                })),
            }
        }

        async fn fetch_detail(
            &self,
            _kind: &EntityKind,
            id: &str,
            _language: &str,
        ) -> Result<Document, CatalogError> {
            self.detail_calls.fetch_add(1, Ordering::SeqCst);
            if self.unavailable.contains(id) {
                return Err(CatalogError::Transport(FetchError::HttpStatus {
                    status: 502,
                    url: format!("oois/{id}"),
                }));
            }
            Ok(Document::new(self.details.get(id).cloned().unwrap_or(Value::Null)))
        }
    }

    fn settings() -> RunSettings {
        RunSettings {
            project: "demo".into(),
            region_filter: None,
            region_stamp: "0".into(),
            language: "en".into(),
            table_prefix: String::new(),
            refresh_stale: true,
            concurrency: 1,
            atomic_upsert: false,
        }
    }

    fn pipeline(
        source: &Arc<ScriptedSource>,
        store: &Arc<MemoryStore>,
        settings: RunSettings,
    ) -> SyncPipeline {
        SyncPipeline::new(
            source.clone(),
            store.clone(),
            RateLimiter::immediate(),
            settings,
        )
    }

    fn tour(length: &str, minutes: &str) -> Value {
        json!({
            "title": format!("Tour {length}"),
            "length": length,
            "time": {"@min": minutes},
            "regions": {"region": {"@type": "tourismarea", "@name": "Allgäu"}},
        })
    }

    fn three_trails() -> ScriptedSource {
        ScriptedSource::listing(&["1", "2", "3"])
            .detail("1", tour("1000", "30"))
            .detail("2", tour("2500", "45"))
            .detail("3", tour("0", "0"))
    }

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 10, 19).unwrap()
    }

    fn row(value: Value) -> Row {
        value.as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn aggregates_three_inserted_trails() {
        let source = Arc::new(three_trails());
        let store = Arc::new(MemoryStore::new());
        let pipeline = pipeline(&source, &store, settings());
        let trail = kinds::trail();

        let report = pipeline.reconcile(&trail).await.unwrap();
        assert_eq!(report.inserted, 3);
        assert_eq!(report.aggregate.count, 3);
        assert_eq!(report.aggregate.sum_distance_meters, 3500.0);
        assert_eq!(report.aggregate.sum_duration_minutes, 75);

        let stat = pipeline
            .flush(&trail, &report.aggregate, today())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stat.total_entities, 3);
        assert_eq!(stat.total_distance_meters, Some(3500.0));
        assert_eq!(stat.total_duration_minutes, Some(75));

        let stats_rows = store.rows("DailyStats").await;
        assert_eq!(stats_rows.len(), 1);
        assert_eq!(stats_rows[0]["total_trails"], json!(3));
        assert_eq!(stats_rows[0]["total_distance"], json!(3));
        assert_eq!(stats_rows[0]["total_duration"], json!("1:15:00"));
        assert_eq!(stats_rows[0]["region"], json!("0"));

        let trails = store.rows("Trails").await;
        assert_eq!(trails.len(), 3);
        assert!(trails.iter().all(|t| t["new"] == json!(true)));
        assert!(trails.iter().all(|t| t["project"] == json!("demo")));
        assert_eq!(trails[0]["region_name"], json!("Allgäu"));
    }

    #[tokio::test]
    async fn second_run_skips_everything_and_reproduces_totals() {
        let source = Arc::new(three_trails());
        let store = Arc::new(MemoryStore::new());
        let pipeline = pipeline(&source, &store, settings());
        let trail = kinds::trail();

        let first = pipeline.reconcile(&trail).await.unwrap();
        store.reset_counts();
        let calls_before = source.detail_calls();

        let second = pipeline.reconcile(&trail).await.unwrap();
        assert_eq!(second.skipped, 3);
        assert_eq!(store.counts().writes(), 0);
        assert_eq!(source.detail_calls(), calls_before);
        assert_eq!(second.aggregate, first.aggregate);
    }

    #[tokio::test]
    async fn a_failed_detail_fetch_is_left_out_of_the_aggregate() {
        let source = Arc::new(three_trails().unavailable("2"));
        let store = Arc::new(MemoryStore::new());
        let pipeline = pipeline(&source, &store, settings());

        let report = pipeline.reconcile(&kinds::trail()).await.unwrap();
        assert_eq!(report.failed, 1);
        assert_eq!(report.aggregate.count, 2);
        assert_eq!(report.aggregate.sum_distance_meters, 1000.0);
        assert_eq!(store.rows("Trails").await.len(), 2);
    }

    #[tokio::test]
    async fn a_rejected_write_only_fails_its_item() {
        let source = Arc::new(three_trails());
        let store = Arc::new(MemoryStore::new());
        store
            .reject_writes("Trails", Some(Filter::eq("trail_id", "3")))
            .await;
        let pipeline = pipeline(&source, &store, settings());

        let report = pipeline.reconcile(&kinds::trail()).await.unwrap();
        assert_eq!(report.inserted, 2);
        assert_eq!(report.failed, 1);
        assert_eq!(report.aggregate.count, 2);
    }

    #[tokio::test]
    async fn listing_failure_aborts_before_any_item_work() {
        let source = Arc::new(ScriptedSource::default());
        let store = Arc::new(MemoryStore::new());
        let pipeline = pipeline(&source, &store, settings());

        let err = pipeline.run_once(&kinds::trail()).await.unwrap_err();
        assert!(matches!(err, SyncError::Listing { kind: KindId::Trail, .. }));
        assert_eq!(store.counts(), Default::default());
        assert!(store.rows("DailyStats").await.is_empty());
        assert_eq!(source.detail_calls(), 0);
    }

    #[tokio::test]
    async fn trails_missing_a_region_name_are_refreshed() {
        let source = Arc::new(ScriptedSource::listing(&["1"]).detail("1", tour("1200", "20")));
        let store = Arc::new(MemoryStore::new());
        store
            .seed(
                "Trails",
                [row(json!({
                    "trail_id": "1",
                    "project": "demo",
                    "region_name": null,
                    "new": true,
                    "distance": 10
                }))],
            )
            .await;
        let pipeline = pipeline(&source, &store, settings());

        let report = pipeline.reconcile(&kinds::trail()).await.unwrap();
        assert_eq!(report.updated, 1);
        assert_eq!(report.aggregate.sum_distance_meters, 1200.0);

        let rows = store.rows("Trails").await;
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["region_name"], json!("Allgäu"));
        assert_eq!(rows[0]["new"], json!(false));
    }

    #[tokio::test]
    async fn skipped_items_count_their_stored_metrics() {
        let source = Arc::new(ScriptedSource::listing(&["1", "2"]).detail("2", tour("500", "5")));
        let store = Arc::new(MemoryStore::new());
        store
            .seed(
                "Trails",
                [row(json!({
                    "trail_id": 1,
                    "project": "demo",
                    "region_name": "A",
                    "distance": "4000",
                    "duration": 60
                }))],
            )
            .await;
        let pipeline = pipeline(&source, &store, settings());

        let report = pipeline.reconcile(&kinds::trail()).await.unwrap();
        assert_eq!((report.skipped, report.inserted), (1, 1));
        assert_eq!(report.aggregate.count, 2);
        assert_eq!(report.aggregate.sum_distance_meters, 4500.0);
        assert_eq!(report.aggregate.sum_duration_minutes, 65);
        assert_eq!(source.detail_calls(), 1);
    }

    #[tokio::test]
    async fn refresh_can_be_turned_off() {
        let source = Arc::new(ScriptedSource::listing(&["1"]).detail("1", tour("1", "1")));
        let store = Arc::new(MemoryStore::new());
        store
            .seed("Trails", [row(json!({"trail_id": "1", "project": "demo"}))])
            .await;
        let pipeline = pipeline(
            &source,
            &store,
            RunSettings {
                refresh_stale: false,
                ..settings()
            },
        );

        let report = pipeline.reconcile(&kinds::trail()).await.unwrap();
        assert_eq!(report.skipped, 1);
        assert_eq!(source.detail_calls(), 0);
    }

    #[tokio::test]
    async fn duplicate_identifiers_are_processed_once() {
        let source = Arc::new(
            ScriptedSource::listing(&["7", "8", "7"])
                .detail("7", json!({"title": "Hut"}))
                .detail("8", json!({"title": "Lake"})),
        );
        let store = Arc::new(MemoryStore::new());
        let pipeline = pipeline(&source, &store, settings());

        let report = pipeline.reconcile(&kinds::point_of_interest()).await.unwrap();
        assert_eq!(report.listed, 3);
        assert_eq!(report.inserted, 2);
        assert_eq!(report.aggregate.count, 2);
        assert_eq!(source.detail_calls(), 2);
        assert_eq!(store.rows("POIs").await.len(), 2);
    }

    #[tokio::test]
    async fn parallel_workers_fold_the_same_totals() {
        let ids: Vec<String> = (1..=12).map(|i| i.to_string()).collect();
        let id_refs: Vec<&str> = ids.iter().map(String::as_str).collect();
        let mut source = ScriptedSource::listing(&id_refs);
        for (i, id) in ids.iter().enumerate() {
            source = source.detail(id, tour(&format!("{}", (i + 1) * 100), "10"));
        }
        let source = Arc::new(source);
        let store = Arc::new(MemoryStore::new());
        let pipeline = pipeline(
            &source,
            &store,
            RunSettings {
                concurrency: 4,
                ..settings()
            },
        );

        let report = pipeline.reconcile(&kinds::trail()).await.unwrap();
        assert_eq!(report.aggregate.count, 12);
        assert_eq!(report.aggregate.sum_distance_meters, 7800.0);
        assert_eq!(report.aggregate.sum_duration_minutes, 120);
        assert_eq!(store.rows("Trails").await.len(), 12);
    }

    #[tokio::test(start_paused = true)]
    async fn parallel_workers_share_the_request_pacing() {
        let source = Arc::new(three_trails());
        let store = Arc::new(MemoryStore::new());
        let pipeline = SyncPipeline::new(
            source.clone(),
            store.clone(),
            RateLimiter::new(ExecutionMode::Delayed, 2, 2),
            RunSettings {
                concurrency: 3,
                ..settings()
            },
        );

        let started = tokio::time::Instant::now();
        let report = pipeline.reconcile(&kinds::trail()).await.unwrap();
        assert_eq!(report.inserted, 3);
        assert!(started.elapsed() >= std::time::Duration::from_secs(6));
    }

    #[tokio::test]
    async fn flushing_twice_updates_the_days_row() {
        let source = Arc::new(ScriptedSource::listing(&[]));
        let store = Arc::new(MemoryStore::new());
        let pipeline = pipeline(
            &source,
            &store,
            RunSettings {
                table_prefix: "dev_".into(),
                region_stamp: "1022".into(),
                ..settings()
            },
        );
        let poi = kinds::point_of_interest();

        let mut first = RunAggregate::default();
        first.fold(0.0, 0);
        pipeline.flush(&poi, &first, today()).await.unwrap();
        let mut second = first;
        second.fold(0.0, 0);
        pipeline.flush(&poi, &second, today()).await.unwrap();

        let rows = store.rows("dev_DailyStats").await;
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["total_pois"], json!(2));
        assert_eq!(rows[0]["region"], json!("1022"));
        assert_eq!(rows[0]["date"], json!("2026-10-19"));
        assert!(!rows[0].contains_key("total_distance"));
        assert_eq!(store.counts().inserts, 1);
        assert_eq!(store.counts().updates, 1);
    }

    #[tokio::test]
    async fn atomic_flush_keeps_one_row_per_key() {
        let source = Arc::new(ScriptedSource::listing(&[]));
        let store = Arc::new(MemoryStore::new());
        let pipeline = pipeline(
            &source,
            &store,
            RunSettings {
                atomic_upsert: true,
                ..settings()
            },
        );
        let event = kinds::event();
        let mut agg = RunAggregate::default();
        agg.fold(0.0, 0);

        pipeline.flush(&event, &agg, today()).await.unwrap();
        pipeline.flush(&event, &agg, today()).await.unwrap();
        let rows = store.rows("DailyStats").await;
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["total_events"], json!(1));
    }

    #[tokio::test]
    async fn flush_failure_surfaces_as_store_error() {
        let source = Arc::new(three_trails());
        let store = Arc::new(MemoryStore::new());
        store.reject_writes("DailyStats", None).await;
        let pipeline = pipeline(&source, &store, settings());

        let err = pipeline.run_once(&kinds::trail()).await.unwrap_err();
        assert!(matches!(err, SyncError::Store { .. }));
        assert_eq!(store.rows("Trails").await.len(), 3);
    }

    #[tokio::test]
    async fn conditions_are_rewritten_and_vanished_ones_rejected() {
        let source = Arc::new(
            ScriptedSource::listing(&["c1"]).detail(
                "c1",
                json!({"title": "Icy", "meta": {"workflow": {"@state": "approved"}}}),
            ),
        );
        let store = Arc::new(MemoryStore::new());
        store
            .seed(
                "Conditions",
                [
                    row(json!({"condition_id": "c1", "project": "demo", "status": "draft"})),
                    row(json!({"condition_id": "c8", "project": "demo", "status": "rejected"})),
                    row(json!({"condition_id": "c9", "project": "demo", "status": "approved"})),
                    row(json!({"condition_id": "c7", "project": "other", "status": "approved"})),
                ],
            )
            .await;
        let pipeline = pipeline(&source, &store, settings());

        let summary = pipeline.run_once(&kinds::condition()).await.unwrap();
        assert_eq!(summary.updated, 1);
        assert_eq!(summary.retired, 1);
        assert!(summary.statistic.is_none());

        let rows = store.rows("Conditions").await;
        let status = |id: &str| {
            rows.iter()
                .find(|r| r["condition_id"] == json!(id))
                .map(|r| r["status"].clone())
                .unwrap()
        };
        assert_eq!(status("c1"), json!("approved"));
        assert_eq!(status("c9"), json!("rejected"));
        assert_eq!(status("c7"), json!("approved"));
        assert!(rows.iter().all(|r| !r.contains_key("new")));
        assert!(store.rows("DailyStats").await.is_empty());
    }

    #[tokio::test]
    async fn region_filtered_runs_never_retire() {
        let source = Arc::new(
            ScriptedSource::listing(&["c1"])
                .detail("c1", json!({"meta": {"workflow": {"@state": "approved"}}})),
        );
        let store = Arc::new(MemoryStore::new());
        store
            .seed(
                "Conditions",
                [
                    row(json!({"condition_id": "c1", "project": "demo", "status": "approved"})),
                    row(json!({"condition_id": "c2", "project": "demo", "status": "approved"})),
                ],
            )
            .await;
        let pipeline = pipeline(
            &source,
            &store,
            RunSettings {
                region_filter: Some("1022".into()),
                region_stamp: "1022".into(),
                ..settings()
            },
        );

        let summary = pipeline.run_once(&kinds::condition()).await.unwrap();
        assert_eq!(summary.updated, 1);
        assert_eq!(summary.retired, 0);
        let rows = store.rows("Conditions").await;
        assert!(rows.iter().all(|r| r["status"] == json!("approved")));
    }

    #[tokio::test]
    async fn reset_new_only_touches_the_project() {
        let source = Arc::new(ScriptedSource::listing(&[]));
        let store = Arc::new(MemoryStore::new());
        store
            .seed(
                "events",
                [
                    row(json!({"event_id": "1", "project": "demo", "new": true})),
                    row(json!({"event_id": "2", "project": "demo", "new": false})),
                    row(json!({"event_id": "3", "project": "other", "new": true})),
                ],
            )
            .await;
        let pipeline = pipeline(&source, &store, settings());

        assert_eq!(pipeline.reset_new(&kinds::event()).await.unwrap(), 1);
        let rows = store.rows("events").await;
        assert_eq!(rows[0]["new"], json!(false));
        assert_eq!(rows[2]["new"], json!(true));
        assert_eq!(pipeline.reset_new(&kinds::condition()).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn survey_totals_without_writing() {
        let source = Arc::new(three_trails().unavailable("3"));
        let store = Arc::new(MemoryStore::new());
        let pipeline = pipeline(&source, &store, settings());

        let report = pipeline.survey(&kinds::trail()).await.unwrap();
        assert_eq!(report.listed, 3);
        assert_eq!(report.failed, 1);
        assert_eq!(report.aggregate.count, 2);
        assert_eq!(report.aggregate.sum_distance_meters, 3500.0);
        assert_eq!(store.counts(), Default::default());
    }
}

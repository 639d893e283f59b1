//! Core domain model for trailsync: entity kinds, catalog documents, records and daily aggregates.

mod document;
mod kind;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub use document::{as_sequence, coerce_f64, coerce_i64, lookup, scalar_text, Document, TEXT_KEY};
pub use kind::{
    EntityKind, Extractor, FieldDefault, FieldSpec, KindId, ListPolicy, Metrics, Path,
    RefreshPolicy, RegionClass, Retirement, StatsColumns, UnknownKind,
};

pub const CRATE_NAME: &str = "trailsync-core";

/// Flat row exchanged with a record store.
pub type Row = Map<String, Value>;

/// Column every kind with `marks_new` carries to flag freshly inserted records.
pub const NEW_MARKER: &str = "new";

/// Candidate identifiers of one kind, fetched fresh per run.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CatalogListing {
    pub identifiers: Vec<String>,
    pub total_count: usize,
}

impl CatalogListing {
    pub fn new(identifiers: Vec<String>) -> Self {
        let total_count = identifiers.len();
        Self {
            identifiers,
            total_count,
        }
    }

    pub fn contains(&self, id: &str) -> bool {
        self.identifiers.iter().any(|candidate| candidate == id)
    }
}

/// Normalized flat record for one entity; every declared field is present.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityRecord {
    pub id: String,
    pub fields: Row,
}

impl EntityRecord {
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    pub fn set(&mut self, name: &str, value: impl Into<Value>) {
        self.fields.insert(name.to_string(), value.into());
    }

    /// Distance and duration of this record, coerced from whatever the source supplied.
    pub fn metric_values(&self, metrics: &Metrics) -> (f64, i64) {
        metric_values(&self.fields, metrics)
    }

    pub fn into_row(self) -> Row {
        self.fields
    }
}

pub fn metric_values(row: &Row, metrics: &Metrics) -> (f64, i64) {
    let distance = row
        .get(metrics.distance_meters)
        .map(coerce_f64)
        .unwrap_or(0.0);
    let duration = row
        .get(metrics.duration_minutes)
        .map(coerce_i64)
        .unwrap_or(0);
    (distance, duration)
}

/// Running totals of one run. Owned by the run and returned from it.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct RunAggregate {
    pub count: u64,
    pub sum_distance_meters: f64,
    pub sum_duration_minutes: i64,
}

impl RunAggregate {
    pub fn fold(&mut self, distance_meters: f64, duration_minutes: i64) {
        self.count = self.count.saturating_add(1);
        self.sum_distance_meters += distance_meters;
        self.sum_duration_minutes = self.sum_duration_minutes.saturating_add(duration_minutes);
    }

    pub fn merge(self, other: RunAggregate) -> RunAggregate {
        RunAggregate {
            count: self.count.saturating_add(other.count),
            sum_distance_meters: self.sum_distance_meters + other.sum_distance_meters,
            sum_duration_minutes: self
                .sum_duration_minutes
                .saturating_add(other.sum_duration_minutes),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StatsKey {
    pub date: NaiveDate,
    pub region: String,
    pub project: String,
}

impl StatsKey {
    pub const COLUMNS: [&'static str; 3] = ["date", "region", "project"];

    pub fn date_string(&self) -> String {
        self.date.format("%Y-%m-%d").to_string()
    }

    pub fn key_values(&self) -> [(&'static str, Value); 3] {
        [
            ("date", Value::String(self.date_string())),
            ("region", Value::String(self.region.clone())),
            ("project", Value::String(self.project.clone())),
        ]
    }
}

/// Persisted per-day totals for `(date, region, project)`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DailyStatistic {
    pub date: NaiveDate,
    pub region: String,
    pub project: String,
    pub total_entities: u64,
    pub total_distance_meters: Option<f64>,
    pub total_duration_minutes: Option<i64>,
}

impl DailyStatistic {
    pub fn from_aggregate(
        key: &StatsKey,
        aggregate: &RunAggregate,
        columns: &StatsColumns,
    ) -> Self {
        Self {
            date: key.date,
            region: key.region.clone(),
            project: key.project.clone(),
            total_entities: aggregate.count,
            total_distance_meters: columns.distance_km.map(|_| aggregate.sum_distance_meters),
            total_duration_minutes: columns.duration.map(|_| aggregate.sum_duration_minutes),
        }
    }

    pub fn key(&self) -> StatsKey {
        StatsKey {
            date: self.date,
            region: self.region.clone(),
            project: self.project.clone(),
        }
    }

    /// Row in the statistics table layout: whole kilometres and a `H:MM:SS` duration.
    pub fn to_row(&self, columns: &StatsColumns) -> Row {
        let mut row = Row::new();
        for (name, value) in self.key().key_values() {
            row.insert(name.to_string(), value);
        }
        row.insert(columns.count.to_string(), Value::from(self.total_entities));
        if let (Some(column), Some(meters)) = (columns.distance_km, self.total_distance_meters) {
            row.insert(column.to_string(), Value::from(whole_kilometres(meters)));
        }
        if let (Some(column), Some(minutes)) = (columns.duration, self.total_duration_minutes) {
            row.insert(column.to_string(), Value::String(format_duration_minutes(minutes)));
        }
        row
    }
}

pub fn whole_kilometres(meters: f64) -> i64 {
    (meters / 1000.0).trunc() as i64
}

/// Formats minutes the way the statistics table stores durations: `H:MM:SS`, prefixed with
/// `N day(s), ` once the total exceeds a day.
pub fn format_duration_minutes(minutes: i64) -> String {
    let minutes = minutes.max(0);
    let days = minutes / (24 * 60);
    let rest = minutes % (24 * 60);
    let clock = format!("{}:{:02}:00", rest / 60, rest % 60);
    match days {
        0 => clock,
        1 => format!("1 day, {clock}"),
        n => format!("{n} days, {clock}"),
    }
}

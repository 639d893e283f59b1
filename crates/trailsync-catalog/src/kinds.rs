//! The four catalog kinds synchronized by trailsync.

use trailsync_core::{
    EntityKind, FieldSpec, KindId, Metrics, RefreshPolicy, RegionClass, Retirement, StatsColumns,
};

pub const DAILY_STATS: &str = "DailyStats";

const TITLE: &[&str] = &["title"];
const RANKING: &[&str] = &["@ranking"];
const AUTHOR: &[&str] = &["meta", "authorFull", "name"];
const AUTHOR_ID: &[&str] = &["meta", "authorFull", "id"];
const CATEGORY_ID: &[&str] = &["category", "@id"];
const CATEGORY_NAME: &[&str] = &["category", "@name"];
const DATATYPE: &[&str] = &["category", "datatype"];
const FRONTEND_TYPE: &[&str] = &["@frontendtype"];
const PRIMARY_IMAGE: &[&str] = &["primaryImage", "@id"];

fn meta_dates() -> [FieldSpec; 3] {
    [
        FieldSpec::text("date_created", &[&["meta", "date", "@created"]]),
        FieldSpec::text("date_lastModified", &[&["meta", "date", "@lastModified"]]),
        FieldSpec::text("date_firstPublish", &[&["meta", "date", "@firstPublish"]]),
    ]
}

fn region_fields() -> [FieldSpec; 3] {
    [
        FieldSpec::regions("region_name", RegionClass::TourismArea),
        FieldSpec::regions("district_name", RegionClass::District),
        FieldSpec::regions("customarea", RegionClass::CustomArea),
    ]
}

pub fn trail() -> EntityKind {
    let mut fields = vec![
        FieldSpec::text("name", &[TITLE]),
        FieldSpec::language("lang"),
        FieldSpec::number("distance", &[&["length"]]),
        FieldSpec::number("duration", &[&["time", "@min"]]),
        FieldSpec::number("ranking", &[RANKING]),
        FieldSpec::text("author", &[AUTHOR]),
        FieldSpec::number("author_id", &[AUTHOR_ID]),
        FieldSpec::number("difficulty", &[&["rating", "@difficulty"]]),
        FieldSpec::number("category", &[CATEGORY_ID]),
    ];
    fields.extend(meta_dates());
    fields.extend(region_fields());
    fields.push(FieldSpec::text("primaryImage", &[PRIMARY_IMAGE]));

    EntityKind {
        id: KindId::Trail,
        name: "trails",
        list_path: "filter/tour",
        detail_tag: "tour",
        id_field: "trail_id",
        collection: "Trails",
        fields,
        stamps_region: true,
        marks_new: true,
        refresh: RefreshPolicy::WhenNull(&["region_name"]),
        metrics: Some(Metrics {
            distance_meters: "distance",
            duration_minutes: "duration",
        }),
        stats: Some(StatsColumns {
            collection: DAILY_STATS,
            count: "total_trails",
            distance_km: Some("total_distance"),
            duration: Some("total_duration"),
        }),
        retirement: None,
    }
}

/// Points of interest and events share one field layout.
fn listed_content_fields() -> Vec<FieldSpec> {
    let mut fields = vec![
        FieldSpec::text("title", &[TITLE]),
        FieldSpec::language("lang"),
        FieldSpec::number("destination", &[&["@destination"]]),
        FieldSpec::text("frontendtype", &[FRONTEND_TYPE]),
        FieldSpec::number("ranking", &[RANKING]),
        FieldSpec::text("author", &[AUTHOR]),
        FieldSpec::number("author_id", &[AUTHOR_ID]),
        FieldSpec::number("category", &[CATEGORY_ID]),
        FieldSpec::text("category_name", &[CATEGORY_NAME]),
        FieldSpec::text("datatype", &[DATATYPE]),
    ];
    fields.extend(meta_dates());
    fields.extend(region_fields());
    fields.push(FieldSpec::text("primaryImage", &[PRIMARY_IMAGE]));
    fields
}

pub fn point_of_interest() -> EntityKind {
    EntityKind {
        id: KindId::PointOfInterest,
        name: "pois",
        list_path: "pois",
        detail_tag: "poi",
        id_field: "poi_id",
        collection: "POIs",
        fields: listed_content_fields(),
        stamps_region: true,
        marks_new: true,
        refresh: RefreshPolicy::Never,
        metrics: None,
        stats: Some(StatsColumns {
            collection: DAILY_STATS,
            count: "total_pois",
            distance_km: None,
            duration: None,
        }),
        retirement: None,
    }
}

pub fn event() -> EntityKind {
    EntityKind {
        id: KindId::Event,
        name: "events",
        list_path: "events",
        detail_tag: "event",
        id_field: "event_id",
        collection: "events",
        fields: listed_content_fields(),
        stamps_region: true,
        marks_new: true,
        refresh: RefreshPolicy::Never,
        metrics: None,
        stats: Some(StatsColumns {
            collection: DAILY_STATS,
            count: "total_events",
            distance_km: None,
            duration: None,
        }),
        retirement: None,
    }
}

/// Condition reports change status over their lifetime, so stored ones are always rewritten
/// and reports that left the listing are retired.
pub fn condition() -> EntityKind {
    EntityKind {
        id: KindId::Condition,
        name: "conditions",
        list_path: "conditions",
        detail_tag: "condition",
        id_field: "condition_id",
        collection: "Conditions",
        fields: vec![
            FieldSpec::text("title", &[TITLE]),
            FieldSpec::language("lang"),
            FieldSpec::text("status", &[&["meta", "workflow", "@state"]]),
            FieldSpec::text("category_id", &[CATEGORY_ID]),
            FieldSpec::text("category_name", &[CATEGORY_NAME]),
            FieldSpec::number("ranking", &[RANKING]),
            FieldSpec::text("day_of_inspection", &[&["@dayOfInspection"]]),
            FieldSpec::nullable("date_from", &[&["@dateFrom"]]),
            FieldSpec::nullable("valid_to", &[&["@validTo"]]),
            FieldSpec::number("frontendtype", &[FRONTEND_TYPE]),
            FieldSpec::text("datatype", &[DATATYPE]),
            FieldSpec::number("author_id", &[AUTHOR_ID]),
            FieldSpec::text("author", &[AUTHOR, &["meta", "author"]]),
            FieldSpec::text("long_text", &[&["longText"]]),
            FieldSpec::text("winter_activity", &[&["winterActivity"]]),
            FieldSpec::text("geometry", &[&["geometry"]]),
            FieldSpec::text("risk_description", &[&["riskDescription"]]),
            FieldSpec::text("weather_description", &[&["weatherDescription"]]),
            FieldSpec::text("primaryImage", &[PRIMARY_IMAGE]),
        ],
        stamps_region: false,
        marks_new: false,
        refresh: RefreshPolicy::Always,
        metrics: None,
        stats: None,
        retirement: Some(Retirement {
            field: "status",
            value: "rejected",
        }),
    }
}

pub fn kind(id: KindId) -> EntityKind {
    match id {
        KindId::Trail => trail(),
        KindId::PointOfInterest => point_of_interest(),
        KindId::Event => event(),
        KindId::Condition => condition(),
    }
}

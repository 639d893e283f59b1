use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Path into a detail document, relative to the entity node. Attribute segments carry `@`.
pub type Path = &'static [&'static str];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KindId {
    Trail,
    PointOfInterest,
    Event,
    Condition,
}

impl KindId {
    pub const ALL: [KindId; 4] = [
        KindId::Trail,
        KindId::PointOfInterest,
        KindId::Event,
        KindId::Condition,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            KindId::Trail => "trail",
            KindId::PointOfInterest => "poi",
            KindId::Event => "event",
            KindId::Condition => "condition",
        }
    }
}

impl fmt::Display for KindId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownKind(pub String);

impl fmt::Display for UnknownKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "unknown entity kind `{}` (expected trail, poi, event or condition)",
            self.0
        )
    }
}

impl std::error::Error for UnknownKind {}

impl FromStr for KindId {
    type Err = UnknownKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "trail" | "trails" | "tour" => Ok(KindId::Trail),
            "poi" | "pois" | "point_of_interest" | "point-of-interest" => {
                Ok(KindId::PointOfInterest)
            }
            "event" | "events" => Ok(KindId::Event),
            "condition" | "conditions" => Ok(KindId::Condition),
            other => Err(UnknownKind(other.to_string())),
        }
    }
}

/// Value written when every path of a field is absent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldDefault {
    Zero,
    EmptyText,
    Null,
}

impl FieldDefault {
    pub fn value(self) -> Value {
        match self {
            FieldDefault::Zero => Value::from(0),
            FieldDefault::EmptyText => Value::String(String::new()),
            FieldDefault::Null => Value::Null,
        }
    }
}

/// How a field reads a node that turned out to be repeated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListPolicy {
    First,
    Join(&'static str),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegionClass {
    TourismArea,
    District,
    CustomArea,
}

impl RegionClass {
    pub fn type_tag(&self) -> &'static str {
        match self {
            RegionClass::TourismArea => "tourismarea",
            RegionClass::District => "district",
            RegionClass::CustomArea => "customarea",
        }
    }

    /// Tourism areas are recorded by name, the other classes by id.
    pub fn value_attr(&self) -> &'static str {
        match self {
            RegionClass::TourismArea => "@name",
            RegionClass::District | RegionClass::CustomArea => "@id",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Extractor {
    /// First present path wins.
    Paths(&'static [Path]),
    /// Language tag of `localizedTitle`, falling back to the run language.
    Language,
    Regions(RegionClass),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSpec {
    pub name: &'static str,
    pub extractor: Extractor,
    pub default: FieldDefault,
    pub list: ListPolicy,
}

impl FieldSpec {
    pub const fn text(name: &'static str, paths: &'static [Path]) -> Self {
        Self {
            name,
            extractor: Extractor::Paths(paths),
            default: FieldDefault::EmptyText,
            list: ListPolicy::First,
        }
    }

    /// Numeric fields keep the source representation; coercion happens where they are used.
    pub const fn number(name: &'static str, paths: &'static [Path]) -> Self {
        Self {
            name,
            extractor: Extractor::Paths(paths),
            default: FieldDefault::Zero,
            list: ListPolicy::First,
        }
    }

    pub const fn nullable(name: &'static str, paths: &'static [Path]) -> Self {
        Self {
            name,
            extractor: Extractor::Paths(paths),
            default: FieldDefault::Null,
            list: ListPolicy::First,
        }
    }

    pub const fn language(name: &'static str) -> Self {
        Self {
            name,
            extractor: Extractor::Language,
            default: FieldDefault::EmptyText,
            list: ListPolicy::First,
        }
    }

    pub const fn regions(name: &'static str, class: RegionClass) -> Self {
        Self {
            name,
            extractor: Extractor::Regions(class),
            default: FieldDefault::EmptyText,
            list: ListPolicy::Join(" "),
        }
    }
}

/// When an already-stored record is fetched again and rewritten.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshPolicy {
    Never,
    /// Stale while any of these stored columns is null or missing.
    WhenNull(&'static [&'static str]),
    Always,
}

/// Record columns folded into the run aggregate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Metrics {
    pub distance_meters: &'static str,
    pub duration_minutes: &'static str,
}

/// Columns of the daily statistics row owned by one kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatsColumns {
    pub collection: &'static str,
    pub count: &'static str,
    pub distance_km: Option<&'static str>,
    pub duration: Option<&'static str>,
}

/// Stored records missing from the listing get `field` rewritten to `value`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Retirement {
    pub field: &'static str,
    pub value: &'static str,
}

/// One synchronizable catalog type. Kind-specific behavior is data, interpreted by one engine.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityKind {
    pub id: KindId,
    pub name: &'static str,
    pub list_path: &'static str,
    pub detail_tag: &'static str,
    pub id_field: &'static str,
    pub collection: &'static str,
    pub fields: Vec<FieldSpec>,
    pub stamps_region: bool,
    pub marks_new: bool,
    pub refresh: RefreshPolicy,
    pub metrics: Option<Metrics>,
    pub stats: Option<StatsColumns>,
    pub retirement: Option<Retirement>,
}

impl EntityKind {
    pub fn field(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn collection_with_prefix(&self, prefix: &str) -> String {
        format!("{prefix}{}", self.collection)
    }
}

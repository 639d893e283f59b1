use serde_json::Value;
use trailsync_core::{
    scalar_text, Document, EntityKind, EntityRecord, Extractor, FieldSpec, ListPolicy,
    RegionClass, Row,
};

/// Run settings stamped onto every record, never read from the document.
#[derive(Debug, Clone, Copy)]
pub struct NormalizeContext<'a> {
    pub project: &'a str,
    pub region: &'a str,
    pub language: &'a str,
}

/// Flattens the entity node of a detail document into a record carrying every field of `kind`.
///
/// Absent nodes degrade to the field's default; this never fails.
pub fn normalize(
    doc: &Document,
    kind: &EntityKind,
    id: &str,
    ctx: &NormalizeContext<'_>,
) -> EntityRecord {
    let mut fields = Row::new();
    for spec in &kind.fields {
        let value = extract(doc, spec, ctx).unwrap_or_else(|| spec.default.value());
        fields.insert(spec.name.to_string(), value);
    }

    fields.insert(kind.id_field.to_string(), Value::String(id.to_string()));
    fields.insert("project".to_string(), Value::String(ctx.project.to_string()));
    if kind.stamps_region {
        fields.insert("region".to_string(), Value::String(ctx.region.to_string()));
    }

    EntityRecord {
        id: id.to_string(),
        fields,
    }
}

fn extract(doc: &Document, spec: &FieldSpec, ctx: &NormalizeContext<'_>) -> Option<Value> {
    match spec.extractor {
        Extractor::Paths(paths) => paths
            .iter()
            .find_map(|path| doc.get(path).and_then(|node| node_text(node, spec.list)))
            .map(Value::String),
        Extractor::Language => Some(Value::String(
            title_language(doc).unwrap_or_else(|| ctx.language.to_string()),
        )),
        Extractor::Regions(class) => Some(Value::String(region_values(doc, class, spec.list))),
    }
}

fn node_text(node: &Value, list: ListPolicy) -> Option<String> {
    match (node, list) {
        (Value::Array(items), ListPolicy::Join(sep)) => {
            let joined = items
                .iter()
                .filter_map(scalar_text)
                .collect::<Vec<_>>()
                .join(sep);
            Some(joined)
        }
        (other, _) => scalar_text(other),
    }
}

/// Language tag of the first localized title.
fn title_language(doc: &Document) -> Option<String> {
    doc.nodes(&["localizedTitle"])
        .first()
        .and_then(|title| title.get("@lang"))
        .and_then(scalar_text)
        .filter(|lang| !lang.is_empty())
}

/// Values of every region of `class`, in document order. Unknown region types are ignored.
fn region_values(doc: &Document, class: RegionClass, list: ListPolicy) -> String {
    let sep = match list {
        ListPolicy::Join(sep) => sep,
        ListPolicy::First => " ",
    };
    let values = doc
        .nodes(&["regions", "region"])
        .into_iter()
        .filter(|region| {
            region.get("@type").and_then(scalar_text).as_deref() == Some(class.type_tag())
        })
        .filter_map(|region| region.get(class.value_attr()).and_then(scalar_text))
        .collect::<Vec<_>>();
    let values = match list {
        ListPolicy::First => values.into_iter().take(1).collect(),
        ListPolicy::Join(_) => values,
    };
    values.join(sep).trim().to_string()
}

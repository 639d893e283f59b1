use serde_json::Value;

/// Key under which an element's character data is kept when it also has attributes or children.
pub const TEXT_KEY: &str = "#text";

/// Sparse hierarchical document as decoded from the catalog.
///
/// Attributes are keys prefixed with `@`; repeated children collapse into arrays, so any
/// node may be absent, a single mapping, or a sequence of mappings.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Document {
    root: Value,
}

impl Document {
    pub fn new(root: Value) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Value {
        &self.root
    }

    pub fn into_value(self) -> Value {
        self.root
    }

    pub fn get(&self, path: &[&str]) -> Option<&Value> {
        lookup(&self.root, path)
    }

    /// Nodes at `path` as a sequence; absent or empty nodes yield an empty sequence.
    pub fn nodes(&self, path: &[&str]) -> Vec<&Value> {
        as_sequence(self.get(path))
    }
}

/// Walks `path` from `value`. A sequence met on the way is entered through its first element.
pub fn lookup<'a>(value: &'a Value, path: &[&str]) -> Option<&'a Value> {
    let mut cur = value;
    for segment in path {
        cur = match cur {
            Value::Array(items) => items.first()?.get(*segment)?,
            other => other.get(*segment)?,
        };
    }
    match cur {
        Value::Null => None,
        other => Some(other),
    }
}

pub fn as_sequence(value: Option<&Value>) -> Vec<&Value> {
    match value {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Array(items)) => items.iter().filter(|v| !v.is_null()).collect(),
        Some(other) => vec![other],
    }
}

/// Scalar text of a node: strings, numbers and booleans directly, elements through `#text`.
pub fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Object(map) => map.get(TEXT_KEY).and_then(scalar_text),
        Value::Array(items) => items.first().and_then(scalar_text),
        Value::Null => None,
    }
}

/// Reads a numeric value that may arrive as a number or as text. Anything else is `0.0`.
pub fn coerce_f64(value: &Value) -> f64 {
    match value {
        Value::Number(n) => n.as_f64().unwrap_or(0.0),
        Value::String(s) => s.trim().parse::<f64>().ok().filter(|v| v.is_finite()).unwrap_or(0.0),
        Value::Bool(b) => f64::from(u8::from(*b)),
        Value::Object(_) | Value::Array(_) => scalar_text(value)
            .map(|text| coerce_f64(&Value::String(text)))
            .unwrap_or(0.0),
        Value::Null => 0.0,
    }
}

/// Integer flavour of [`coerce_f64`]; fractional input is truncated.
pub fn coerce_i64(value: &Value) -> i64 {
    match value {
        Value::Number(n) => n
            .as_i64()
            .unwrap_or_else(|| n.as_f64().map(|f| f.trunc() as i64).unwrap_or(0)),
        Value::String(s) => {
            let trimmed = s.trim();
            trimmed
                .parse::<i64>()
                .unwrap_or_else(|_| coerce_f64(value).trunc() as i64)
        }
        other => coerce_f64(other).trunc() as i64,
    }
}

//! XML to [`Document`] decoding.
//!
//! Attributes become `@name` keys, elements holding only text become strings, empty elements
//! become null, repeated children collapse into arrays and text next to attributes or children
//! is kept under `#text`.

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use serde_json::{Map, Value};
use trailsync_core::{Document, TEXT_KEY};

use crate::CatalogError;

#[derive(Debug, Default)]
struct Frame {
    name: String,
    attributes: Map<String, Value>,
    children: Map<String, Value>,
    text: String,
}

impl Frame {
    fn open(start: &BytesStart<'_>) -> Result<Self, CatalogError> {
        let name = String::from_utf8_lossy(start.name().as_ref()).into_owned();
        let mut attributes = Map::new();
        for attr in start.attributes() {
            let attr = attr.map_err(|err| parse_error(&err))?;
            let key = String::from_utf8_lossy(attr.key.as_ref());
            let value = attr.unescape_value().map_err(|err| parse_error(&err))?;
            attributes.insert(format!("@{key}"), Value::String(value.into_owned()));
        }
        Ok(Self {
            name,
            attributes,
            ..Self::default()
        })
    }

    fn close(self) -> (String, Value) {
        let text = self.text.trim().to_string();
        if self.attributes.is_empty() && self.children.is_empty() {
            let value = if text.is_empty() {
                Value::Null
            } else {
                Value::String(text)
            };
            return (self.name, value);
        }
        let mut node = self.attributes;
        node.extend(self.children);
        if !text.is_empty() {
            node.insert(TEXT_KEY.to_string(), Value::String(text));
        }
        (self.name, Value::Object(node))
    }
}

/// Adds `value` under `name`, turning a repeated child into a sequence.
fn push_child(children: &mut Map<String, Value>, name: String, value: Value) {
    match children.get_mut(&name) {
        None => {
            children.insert(name, value);
        }
        Some(Value::Array(items)) => items.push(value),
        Some(existing) => {
            let first = existing.take();
            *existing = Value::Array(vec![first, value]);
        }
    }
}

fn parse_error(err: &dyn std::fmt::Display) -> CatalogError {
    CatalogError::Parse(format!("malformed xml: {err}"))
}

pub fn parse_document(xml: &str) -> Result<Document, CatalogError> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut root = Map::new();
    let mut stack: Vec<Frame> = Vec::new();

    loop {
        match reader.read_event().map_err(|err| parse_error(&err))? {
            Event::Start(start) => stack.push(Frame::open(&start)?),
            Event::Empty(start) => {
                let (name, value) = Frame::open(&start)?.close();
                match stack.last_mut() {
                    Some(parent) => push_child(&mut parent.children, name, value),
                    None => push_child(&mut root, name, value),
                }
            }
            Event::End(_) => {
                let frame = stack
                    .pop()
                    .ok_or_else(|| CatalogError::Parse("unbalanced closing tag".to_string()))?;
                let (name, value) = frame.close();
                match stack.last_mut() {
                    Some(parent) => push_child(&mut parent.children, name, value),
                    None => push_child(&mut root, name, value),
                }
            }
            Event::Text(text) => {
                if let Some(frame) = stack.last_mut() {
                    let text = text.unescape().map_err(|err| parse_error(&err))?;
                    frame.text.push_str(&text);
                }
            }
            Event::CData(data) => {
                if let Some(frame) = stack.last_mut() {
                    frame.text.push_str(&String::from_utf8_lossy(&data));
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if let Some(open) = stack.last() {
        return Err(CatalogError::Parse(format!(
            "document ended inside <{}>",
            open.name
        )));
    }
    if root.is_empty() {
        return Err(CatalogError::Parse("empty document".to_string()));
    }
    Ok(Document::new(Value::Object(root)))
}

pub fn parse_bytes(body: &[u8]) -> Result<Document, CatalogError> {
    let text = std::str::from_utf8(body)
        .map_err(|err| CatalogError::Parse(format!("response is not utf-8: {err}")))?;
    parse_document(text)
}

//! XML helpers: text extraction and the JSON ⇄ XML marshaller.
//!
//! Operation payloads travel as JSON objects. Outgoing objects are written
//! as XML with these rules:
//! - the operation element and its direct children use the service prefix
//! - deeper elements use the `tt` schema prefix
//! - keys already carrying a prefix (`wsnt:TopicExpression`) are kept
//! - `@name` keys become attributes and `#text` the element text
//! - arrays repeat the element
//!
//! Incoming XML converts back to JSON keyed by local names, with repeated
//! elements collected into arrays and attributes under `@name`.

use quick_xml::events::{BytesStart, Event};
use quick_xml::name::QName;
use quick_xml::reader::Reader;
use serde_json::{Map, Value};

use super::{escape_xml, SoapError, SoapResult};

/// Prefix used for nested schema elements.
const SCHEMA_PREFIX: &str = "tt";

// ─────────────────────────────────────────────────────────────────────────────
// Extraction
// ─────────────────────────────────────────────────────────────────────────────

/// Extracts text content from the first occurrence of an XML element.
///
/// Searches by local name (ignoring namespace prefixes) and returns the
/// decoded text, or `None` if the element is absent.
pub fn extract_xml_text(xml: &str, element_name: &str) -> Option<String> {
    let mut reader = Reader::from_str(xml);
    let mut buf = Vec::new();
    let target_bytes = element_name.as_bytes();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) if e.local_name().as_ref() == target_bytes => {
                if let Ok(text) = reader.read_text(e.name()) {
                    let decoded = html_escape::decode_html_entities(&text);
                    return Some(decoded.trim().to_string());
                }
            }
            Ok(Event::Eof) => break,
            Err(_) => break,
            _ => {}
        }
        buf.clear();
    }
    None
}

/// Returns the raw inner XML of the first element with the given local name.
pub fn inner_xml<'a>(xml: &'a str, element_name: &str) -> Option<&'a str> {
    let mut reader = Reader::from_str(xml);
    let target_bytes = element_name.as_bytes();

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) if e.local_name().as_ref() == target_bytes => {
                let end = e.name().as_ref().to_vec();
                let span = reader.read_to_end(QName(&end)).ok()?;
                return xml.get(span.start as usize..span.end as usize);
            }
            Ok(Event::Eof) | Err(_) => return None,
            _ => {}
        }
    }
}

/// Gets an attribute value by local name.
pub fn get_xml_attr(elem: &BytesStart, attr_name: &[u8]) -> Option<String> {
    elem.attributes()
        .flatten()
        .find(|a| a.key.local_name().as_ref() == attr_name)
        .map(|a| html_escape::decode_html_entities(&String::from_utf8_lossy(&a.value)).into_owned())
}

// ─────────────────────────────────────────────────────────────────────────────
// XML → JSON
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Default)]
struct Node {
    name: String,
    attrs: Vec<(String, String)>,
    children: Vec<Node>,
    text: String,
}

impl Node {
    fn from_start(e: &BytesStart) -> Self {
        let attrs = e
            .attributes()
            .flatten()
            .filter(|a| {
                let key = a.key.as_ref();
                key != b"xmlns" && !key.starts_with(b"xmlns:")
            })
            .map(|a| {
                let key = String::from_utf8_lossy(a.key.local_name().as_ref()).into_owned();
                let value = html_escape::decode_html_entities(&String::from_utf8_lossy(&a.value))
                    .into_owned();
                (key, value)
            })
            .collect();
        Self {
            name: String::from_utf8_lossy(e.local_name().as_ref()).into_owned(),
            attrs,
            ..Default::default()
        }
    }

    fn into_json(self) -> Value {
        let text = html_escape::decode_html_entities(self.text.trim()).into_owned();
        if self.children.is_empty() && self.attrs.is_empty() {
            return Value::String(text);
        }

        let mut map = Map::new();
        for (k, v) in self.attrs {
            map.insert(format!("@{k}"), Value::String(v));
        }
        for child in self.children {
            let name = child.name.clone();
            let value = child.into_json();
            insert_repeated(&mut map, name, value);
        }
        if !text.is_empty() {
            map.insert("#text".to_string(), Value::String(text));
        }
        Value::Object(map)
    }
}

fn insert_repeated(map: &mut Map<String, Value>, key: String, value: Value) {
    match map.get_mut(&key) {
        Some(Value::Array(items)) => items.push(value),
        Some(existing) => {
            let first = existing.take();
            *existing = Value::Array(vec![first, value]);
        }
        None => {
            map.insert(key, value);
        }
    }
}

/// Converts an XML fragment into a JSON object keyed by local element names.
pub fn xml_to_json(xml: &str) -> SoapResult<Value> {
    let mut reader = Reader::from_str(xml);
    let mut stack: Vec<Node> = vec![Node::default()];

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => stack.push(Node::from_start(&e)),
            Ok(Event::Empty(e)) => {
                let node = Node::from_start(&e);
                if let Some(parent) = stack.last_mut() {
                    parent.children.push(node);
                }
            }
            Ok(Event::End(_)) => {
                if stack.len() < 2 {
                    return Err(SoapError::Decode("unbalanced end tag".into()));
                }
                if let Some(node) = stack.pop() {
                    if let Some(parent) = stack.last_mut() {
                        parent.children.push(node);
                    }
                }
            }
            Ok(Event::Text(t)) => {
                if let Some(node) = stack.last_mut() {
                    node.text.push_str(&String::from_utf8_lossy(&t));
                }
            }
            Ok(Event::CData(t)) => {
                if let Some(node) = stack.last_mut() {
                    let raw = String::from_utf8_lossy(&t);
                    node.text.push_str(&escape_xml(&raw));
                }
            }
            Ok(Event::GeneralRef(r)) => {
                if let Some(node) = stack.last_mut() {
                    node.text.push('&');
                    node.text.push_str(&String::from_utf8_lossy(&r));
                    node.text.push(';');
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(SoapError::Decode(e.to_string())),
            _ => {}
        }
    }

    if stack.len() != 1 {
        return Err(SoapError::Decode("unterminated element".into()));
    }
    let mut root = stack.pop().unwrap_or_default();
    let mut map = Map::new();
    for child in root.children.drain(..) {
        let name = child.name.clone();
        insert_repeated(&mut map, name, child.into_json());
    }
    Ok(Value::Object(map))
}

// ─────────────────────────────────────────────────────────────────────────────
// JSON → XML
// ─────────────────────────────────────────────────────────────────────────────

/// Serializes `<prefix:operation>` with `data` as its content.
///
/// `data` must be an object or null; anything else is a contract error.
pub fn operation_to_xml(prefix: &str, operation: &str, data: &Value) -> SoapResult<String> {
    let mut out = String::new();
    match data {
        Value::Null => {
            out.push_str(&format!("<{prefix}:{operation}/>"));
        }
        Value::Object(map) => write_element(&mut out, &format!("{prefix}:{operation}"), map, prefix),
        other => {
            return Err(SoapError::InvalidRequest(format!(
                "{operation} expects a JSON object, got {other}"
            )))
        }
    }
    Ok(out)
}

fn qualified(key: &str, prefix: &str) -> String {
    if key.contains(':') {
        key.to_string()
    } else {
        format!("{prefix}:{key}")
    }
}

fn write_element(out: &mut String, tag: &str, map: &Map<String, Value>, child_prefix: &str) {
    out.push('<');
    out.push_str(tag);
    for (k, v) in map.iter().filter(|(k, _)| k.starts_with('@')) {
        out.push_str(&format!(r#" {}="{}""#, &k[1..], escape_xml(&scalar_text(v))));
    }
    out.push('>');
    for (k, v) in map {
        if k.starts_with('@') {
            continue;
        }
        if k == "#text" {
            out.push_str(&escape_xml(&scalar_text(v)));
            continue;
        }
        write_value(out, &qualified(k, child_prefix), v);
    }
    out.push_str("</");
    out.push_str(tag);
    out.push('>');
}

fn write_value(out: &mut String, tag: &str, value: &Value) {
    match value {
        Value::Array(items) => {
            for item in items {
                write_value(out, tag, item);
            }
        }
        Value::Object(map) => write_element(out, tag, map, SCHEMA_PREFIX),
        Value::Null => out.push_str(&format!("<{tag}/>")),
        scalar => out.push_str(&format!(
            "<{tag}>{}</{tag}>",
            escape_xml(&scalar_text(scalar))
        )),
    }
}

fn scalar_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

//! Structured-payload extraction from noisy tool output.
//!
//! Verifiers print compiler progress, banners and warnings around (and
//! sometimes before) the JSON document we care about, and the payload of
//! interest may sit at any nesting depth. Extraction therefore retries a
//! full decode at every `{` in the stream, left to right, and searches each
//! decoded value depth-first for the requested key.
//!
//! Results depend only on the input text: the earliest byte offset wins,
//! and within one object fields are visited in document order.

use serde::de::DeserializeOwned;
use serde_json::Value;

/// A located payload: the byte offset of the enclosing root object and the
/// value stored under the requested key.
#[derive(Debug, Clone, PartialEq)]
pub struct StructuredMatch {
    pub offset: usize,
    pub value: Value,
}

/// Return the value stored under `key` in the first decodable object (by
/// byte offset) that contains it at any depth.
pub fn extract_structured(raw: &str, key: &str) -> Option<Value> {
    locate_structured(raw, key).map(|m| m.value)
}

/// Like [`extract_structured`], also reporting where the root object began.
pub fn locate_structured(raw: &str, key: &str) -> Option<StructuredMatch> {
    raw.match_indices('{').find_map(|(offset, _)| {
        let root = decode_at(raw, offset)?;
        find_key(&root, key).map(|value| StructuredMatch {
            offset,
            value: value.clone(),
        })
    })
}

/// Every value stored under `key` in the first decodable object that
/// contains it, in depth-first order. Matched values are not searched
/// further, so sibling suites each contribute their own entry.
pub fn extract_structured_all(raw: &str, key: &str) -> Vec<Value> {
    raw.match_indices('{')
        .find_map(|(offset, _)| {
            let root = decode_at(raw, offset)?;
            let mut found = Vec::new();
            collect_key(&root, key, &mut found);
            (!found.is_empty()).then(|| found.into_iter().cloned().collect())
        })
        .unwrap_or_default()
}

/// Extract and deserialize into `T`; a payload of the wrong shape is absent.
pub fn extract_structured_as<T: DeserializeOwned>(raw: &str, key: &str) -> Option<T> {
    extract_structured(raw, key).and_then(|value| serde_json::from_value(value).ok())
}

/// Depth-first search for `key`.
///
/// An object answers for itself before descending into its values; arrays
/// are searched element by element.
pub fn find_key<'a>(value: &'a Value, key: &str) -> Option<&'a Value> {
    match value {
        Value::Object(map) => {
            if let Some(found) = map.get(key) {
                return Some(found);
            }
            map.values().find_map(|child| find_key(child, key))
        }
        Value::Array(items) => items.iter().find_map(|child| find_key(child, key)),
        _ => None,
    }
}

fn collect_key<'a>(value: &'a Value, key: &str, found: &mut Vec<&'a Value>) {
    match value {
        Value::Object(map) => {
            if let Some(hit) = map.get(key) {
                found.push(hit);
            }
            for (name, child) in map {
                if name != key {
                    collect_key(child, key, found);
                }
            }
        }
        Value::Array(items) => items.iter().for_each(|child| collect_key(child, key, found)),
        _ => {}
    }
}

/// Decode exactly one JSON value starting at `offset`, ignoring whatever
/// text follows it.
fn decode_at(raw: &str, offset: usize) -> Option<Value> {
    let mut stream = serde_json::Deserializer::from_str(&raw[offset..]).into_iter::<Value>();
    match stream.next() {
        Some(Ok(value)) => Some(value),
        _ => None,
    }
}

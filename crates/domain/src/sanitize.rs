//! Payload sanitization shared by the Streaming Hook and anything
//! else that forwards Runtime-sourced JSON to an external consumer.

use serde_json::Value;

const MAX_STRING_LEN: usize = 1000;
const OMITTED: &str = "[image data omitted]";

/// Recursively copy `value`, replacing any string longer than 1000
/// characters with the literal `[image data omitted]`. Maps are sanitized
/// key-by-key; arrays element-by-element; everything else is copied as-is.
pub fn sanitize(value: &Value) -> Value {
    match value {
        Value::String(s) if s.chars().count() > MAX_STRING_LEN => Value::String(OMITTED.to_string()),
        Value::Object(map) => {
            let mut out = serde_json::Map::with_capacity(map.len());
            for (k, v) in map {
                out.insert(k.clone(), sanitize(v));
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.iter().map(sanitize).collect()),
        other => other.clone(),
    }
}

//! JSON ⇄ Firestore typed value codec.
//!
//! Firestore's REST API wraps every value in a single-key object naming its
//! type (`stringValue`, `mapValue`, ...). Integers travel as strings.

use serde_json::{json, Map, Number, Value};

pub fn encode_value(value: &Value) -> Value {
    match value {
        Value::Null => json!({ "nullValue": null }),
        Value::Bool(b) => json!({ "booleanValue": b }),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                json!({ "integerValue": i.to_string() })
            } else if let Some(u) = n.as_u64() {
                // Beyond i64: Firestore integers are signed 64-bit.
                json!({ "doubleValue": u as f64 })
            } else {
                json!({ "doubleValue": n.as_f64().unwrap_or(0.0) })
            }
        }
        Value::String(s) => json!({ "stringValue": s }),
        Value::Array(items) => json!({
            "arrayValue": { "values": items.iter().map(encode_value).collect::<Vec<_>>() }
        }),
        Value::Object(map) => json!({ "mapValue": { "fields": encode_fields(map) } }),
    }
}

pub fn encode_fields(map: &Map<String, Value>) -> Map<String, Value> {
    map.iter()
        .map(|(k, v)| (k.clone(), encode_value(v)))
        .collect()
}

/// Decode a typed value. Unknown shapes decode to `null`.
pub fn decode_value(typed: &Value) -> Value {
    let Some(obj) = typed.as_object() else {
        return Value::Null;
    };
    let Some((kind, inner)) = obj.iter().next() else {
        return Value::Null;
    };
    match kind.as_str() {
        "nullValue" => Value::Null,
        "booleanValue" => Value::Bool(inner.as_bool().unwrap_or(false)),
        "integerValue" => {
            let parsed = match inner {
                Value::String(s) => s.parse::<i64>().ok(),
                Value::Number(n) => n.as_i64(),
                _ => None,
            };
            parsed.map(Value::from).unwrap_or(Value::Null)
        }
        "doubleValue" => inner
            .as_f64()
            .and_then(Number::from_f64)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        "stringValue" | "timestampValue" | "referenceValue" | "bytesValue" => inner.clone(),
        "geoPointValue" => inner.clone(),
        "arrayValue" => Value::Array(
            inner
                .get("values")
                .and_then(|v| v.as_array())
                .map(|values| values.iter().map(decode_value).collect())
                .unwrap_or_default(),
        ),
        "mapValue" => Value::Object(
            inner
                .get("fields")
                .and_then(|f| f.as_object())
                .map(decode_fields)
                .unwrap_or_default(),
        ),
        _ => Value::Null,
    }
}

pub fn decode_fields(fields: &Map<String, Value>) -> Map<String, Value> {
    fields
        .iter()
        .map(|(k, v)| (k.clone(), decode_value(v)))
        .collect()
}

/// Quote one field path segment when it is not a simple identifier.
pub fn quote_segment(segment: &str) -> String {
    let simple = segment
        .chars()
        .next()
        .map(|c| c.is_ascii_alphabetic() || c == '_')
        .unwrap_or(false)
        && segment.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
    if simple {
        segment.to_string()
    } else {
        format!("`{}`", segment.replace('\\', "\\\\").replace('`', "\\`"))
    }
}

/// Leaf field paths of `fields`, descending into non-empty maps.
///
/// Used as the update mask of a merge write so sibling nested fields survive.
pub fn leaf_paths(fields: &Map<String, Value>) -> Vec<String> {
    fn walk(prefix: Option<&str>, map: &Map<String, Value>, out: &mut Vec<String>) {
        for (key, value) in map {
            let path = match prefix {
                Some(p) => format!("{}.{}", p, quote_segment(key)),
                None => quote_segment(key),
            };
            match value {
                Value::Object(child) if !child.is_empty() => walk(Some(&path), child, out),
                _ => out.push(path),
            }
        }
    }
    let mut out = Vec::new();
    walk(None, fields, &mut out);
    out
}

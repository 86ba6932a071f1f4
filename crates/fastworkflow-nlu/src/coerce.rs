use serde_json::Value;

use fastworkflow_core::types::{ParamValue, NOT_FOUND};
use fastworkflow_registry::{FieldKind, FieldSpec};

/// Parse a list-like string: JSON array, Python-literal list (single-quoted
/// elements), comma-separated values (quotes stripped, empties dropped), or
/// a single value as a one-element list.
pub fn parse_list_like(s: &str) -> Option<Vec<String>> {
    let text = s.trim();
    if text.is_empty() {
        return None;
    }

    if text.starts_with('[') && text.ends_with(']') {
        if let Ok(Value::Array(items)) = serde_json::from_str::<Value>(text) {
            return Some(
                items
                    .into_iter()
                    .map(|v| match v {
                        Value::String(s) => s,
                        other => other.to_string(),
                    })
                    .collect(),
            );
        }
        // Python-literal list syntax, e.g. `['a', 'b']`.
        if let Some(items) = parse_literal_list(&text[1..text.len() - 1]) {
            return Some(items);
        }
    }

    if text.contains(',') {
        let cleaned: Vec<String> = text
            .split(',')
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(strip_quotes)
            .collect();
        return Some(cleaned);
    }

    Some(vec![strip_quotes(text)])
}

/// Parse the inside of a bracketed list whose elements are quoted strings
/// or bare numbers, splitting on top-level commas with quote awareness.
/// `None` when any element is neither, so the caller can fall through to
/// the CSV path.
fn parse_literal_list(content: &str) -> Option<Vec<String>> {
    let content = content.trim();
    if content.is_empty() {
        return Some(Vec::new());
    }

    let mut parts = Vec::new();
    let mut current = String::new();
    let mut quote: Option<char> = None;
    for c in content.chars() {
        match quote {
            Some(q) if c == q => {
                quote = None;
                current.push(c);
            }
            Some(_) => current.push(c),
            None if c == '\'' || c == '"' => {
                quote = Some(c);
                current.push(c);
            }
            None if c == ',' => {
                parts.push(std::mem::take(&mut current));
                continue;
            }
            None => current.push(c),
        }
    }
    if quote.is_some() {
        return None;
    }
    parts.push(current);

    let mut items = Vec::new();
    for part in parts {
        let part = part.trim();
        let bytes = part.as_bytes();
        let is_quoted = part.len() >= 2 && {
            let first = bytes[0];
            first == bytes[part.len() - 1] && (first == b'\'' || first == b'"')
        };
        if is_quoted {
            items.push(part[1..part.len() - 1].to_string());
        } else if !part.is_empty() && part.parse::<f64>().is_ok() {
            items.push(part.to_string());
        } else {
            return None;
        }
    }
    Some(items)
}

fn strip_quotes(s: &str) -> String {
    let s = s.trim();
    if s.len() >= 2 {
        let bytes = s.as_bytes();
        let first = bytes[0];
        let last = bytes[s.len() - 1];
        if first == last && (first == b'"' || first == b'\'') {
            return s[1..s.len() - 1].to_string();
        }
    }
    s.to_string()
}

/// Coerce a raw string to the field's declared kind. `None` means the value
/// could not be coerced; the caller keeps the kind sentinel so the field
/// stays in the missing set.
pub fn coerce_str(spec: &FieldSpec, raw: &str) -> Option<ParamValue> {
    let raw = raw.trim();
    if raw.is_empty() || raw == NOT_FOUND {
        return None;
    }
    match spec.kind {
        FieldKind::String => Some(ParamValue::Str(raw.to_string())),
        FieldKind::Integer => raw.parse::<i64>().ok().map(ParamValue::Int),
        FieldKind::Float => raw.parse::<f64>().ok().map(ParamValue::Float),
        FieldKind::Boolean => match raw.to_lowercase().as_str() {
            "true" | "1" => Some(ParamValue::Bool(true)),
            "false" | "0" => Some(ParamValue::Bool(false)),
            _ => None,
        },
        FieldKind::StringList => parse_list_like(raw).map(ParamValue::List),
        FieldKind::Enum => coerce_enum(spec, raw),
    }
}

/// Enum coercion: exact value first, then case-insensitive value match,
/// canonicalizing the spelling.
fn coerce_enum(spec: &FieldSpec, raw: &str) -> Option<ParamValue> {
    if spec.enum_values.iter().any(|v| v == raw) {
        return Some(ParamValue::Str(raw.to_string()));
    }
    let lowered = raw.to_lowercase();
    spec.enum_values
        .iter()
        .find(|v| v.to_lowercase() == lowered)
        .map(|v| ParamValue::Str(v.clone()))
}

/// Coerce a JSON value (from LLM output) to the field's declared kind.
pub fn coerce_json(spec: &FieldSpec, value: &Value) -> Option<ParamValue> {
    match value {
        Value::Null => None,
        Value::String(s) => coerce_str(spec, s),
        Value::Bool(b) => match spec.kind {
            FieldKind::Boolean => Some(ParamValue::Bool(*b)),
            FieldKind::String => Some(ParamValue::Str(b.to_string())),
            _ => None,
        },
        Value::Number(n) => match spec.kind {
            FieldKind::Integer => n.as_i64().map(ParamValue::Int),
            FieldKind::Float => n.as_f64().map(ParamValue::Float),
            FieldKind::String => Some(ParamValue::Str(n.to_string())),
            _ => None,
        },
        Value::Array(items) => {
            if spec.kind != FieldKind::StringList {
                return None;
            }
            Some(ParamValue::List(
                items
                    .iter()
                    .map(|v| match v {
                        Value::String(s) => s.clone(),
                        other => other.to_string(),
                    })
                    .collect(),
            ))
        }
        Value::Object(_) => None,
    }
}

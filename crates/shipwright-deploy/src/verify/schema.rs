//! Schema discovery: read a validation error, write a body that satisfies it.
//!
//! Validation libraries report missing or mistyped fields in a handful of
//! shapes. Zod-style issues (`{path, expected, options, validation}`),
//! `{field, type}` pairs, and flattened `fieldErrors` maps are all reduced
//! to `FieldRequirement`s. A declared type always beats a guess from the
//! field's name.

use serde_json::{json, Map, Value};
use shipwright_core::config::VerificationConfig;

const CONTAINER_KEYS: [&str; 4] = ["error", "errors", "issues", "details"];
const ISSUE_KEYS: [&str; 7] = [
    "expected",
    "type",
    "options",
    "enum",
    "values",
    "validation",
    "format",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    String,
    Number,
    Integer,
    Boolean,
    Array,
    Object,
    Date,
}

impl FieldType {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "string" | "str" | "text" => Some(Self::String),
            "number" | "float" | "double" | "decimal" | "bigint" => Some(Self::Number),
            "integer" | "int" => Some(Self::Integer),
            "boolean" | "bool" => Some(Self::Boolean),
            "array" | "list" => Some(Self::Array),
            "object" | "record" | "map" => Some(Self::Object),
            "date" | "datetime" => Some(Self::Date),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FieldRequirement {
    pub path: Vec<String>,
    pub expected: Option<FieldType>,
    pub options: Vec<Value>,
    /// String format hint such as `email` or `uuid`.
    pub format: Option<String>,
}

impl FieldRequirement {
    fn name(&self) -> &str {
        self.path.last().map(String::as_str).unwrap_or("")
    }
}

/// Extract field requirements from a validation-error body. Returns an
/// empty list when the body carries nothing recognisable.
pub fn parse_requirements(body: &Value) -> Vec<FieldRequirement> {
    let mut out = Vec::new();
    collect(body, 0, &mut out);
    out.dedup_by(|a, b| a.path == b.path);
    out
}

fn collect(value: &Value, depth: usize, out: &mut Vec<FieldRequirement>) {
    if depth > 4 {
        return;
    }
    match value {
        Value::Array(items) => {
            for item in items {
                if let Some(req) = issue(item) {
                    out.push(req);
                } else {
                    collect(item, depth + 1, out);
                }
            }
        }
        Value::Object(map) => {
            if let Some(req) = issue(value) {
                out.push(req);
            }
            if let Some(Value::Object(fields)) = map.get("fieldErrors") {
                out.extend(field_errors(fields));
            }
            for key in CONTAINER_KEYS {
                if let Some(inner) = map.get(key) {
                    collect(inner, depth + 1, out);
                }
            }
        }
        _ => {}
    }
}

fn path_of(item: &Map<String, Value>) -> Option<Vec<String>> {
    if let Some(Value::Array(segs)) = item.get("path") {
        if !segs.is_empty() {
            return Some(
                segs.iter()
                    .map(|s| match s {
                        Value::String(s) => s.clone(),
                        other => other.to_string(),
                    })
                    .collect(),
            );
        }
    }
    // A bare string `path` is often the request URL in an error envelope.
    let dotted = item
        .get("path")
        .and_then(Value::as_str)
        .filter(|_| ISSUE_KEYS.iter().any(|k| item.contains_key(*k)));
    let named = ["field", "param", "property"]
        .iter()
        .find_map(|k| item.get(*k).and_then(Value::as_str));
    dotted
        .or(named)
        .filter(|s| !s.is_empty())
        .map(|s| s.split('.').map(str::to_string).collect())
}

fn issue(value: &Value) -> Option<FieldRequirement> {
    let item = value.as_object()?;
    let path = path_of(item)?;
    let expected = ["expected", "type"]
        .iter()
        .find_map(|k| item.get(*k).and_then(Value::as_str))
        .and_then(FieldType::parse);
    let options = ["options", "enum", "values"]
        .iter()
        .find_map(|k| item.get(*k).and_then(Value::as_array))
        .cloned()
        .unwrap_or_default();
    let format = ["validation", "format"]
        .iter()
        .find_map(|k| item.get(*k).and_then(Value::as_str))
        .map(str::to_string);
    Some(FieldRequirement {
        path,
        expected,
        options,
        format,
    })
}

/// Zod's `flatten()` shape: `{fieldErrors: {price: ["Expected number, received string"]}}`.
fn field_errors(fields: &Map<String, Value>) -> Vec<FieldRequirement> {
    fields
        .iter()
        .map(|(name, messages)| {
            let expected = messages
                .as_array()
                .into_iter()
                .flatten()
                .filter_map(Value::as_str)
                .find_map(|m| {
                    let lower = m.to_ascii_lowercase();
                    let rest = lower.strip_prefix("expected ")?;
                    FieldType::parse(rest.split([',', ' ']).next()?)
                });
            FieldRequirement {
                path: vec![name.clone()],
                expected,
                options: Vec::new(),
                format: None,
            }
        })
        .collect()
}

fn string_for(name: &str, format: Option<&str>) -> Value {
    let format = format.map(str::to_ascii_lowercase);
    let lower = name.to_ascii_lowercase();
    let hint = format.as_deref().unwrap_or(&lower);
    let s = if hint.contains("email") {
        "probe@example.com".to_string()
    } else if hint.contains("url") || hint.contains("uri") {
        "https://example.com".to_string()
    } else if hint.contains("uuid") {
        "00000000-0000-4000-8000-000000000001".to_string()
    } else if hint.contains("datetime") || hint.contains("date") {
        "2024-01-01T00:00:00Z".to_string()
    } else if hint.contains("password") {
        "Probe-password-1".to_string()
    } else {
        format!("probe-{name}")
    };
    Value::String(s)
}

/// A minimal value satisfying one requirement.
pub fn synthesize_value(req: &FieldRequirement, config: &VerificationConfig) -> Value {
    if let Some(first) = req.options.first() {
        return first.clone();
    }
    let name = req.name();
    match req.expected {
        Some(FieldType::Number | FieldType::Integer) => json!(1),
        Some(FieldType::Boolean) => json!(true),
        Some(FieldType::Array) => json!([]),
        Some(FieldType::Object) => json!({}),
        Some(FieldType::Date) => json!("2024-01-01T00:00:00Z"),
        Some(FieldType::String) => string_for(name, req.format.as_deref()),
        None if config.is_numeric_field(name) => json!(1),
        None => string_for(name, req.format.as_deref()),
    }
}

fn insert(target: &mut Value, path: &[String], value: Value) {
    let Some((head, rest)) = path.split_first() else {
        *target = value;
        return;
    };
    // Any index becomes a single-element array.
    if head.parse::<usize>().is_ok() {
        if !target.is_array() {
            *target = Value::Array(Vec::new());
        }
        if let Value::Array(items) = target {
            if items.is_empty() {
                items.push(Value::Null);
            }
            insert(&mut items[0], rest, value);
        }
        return;
    }
    if !target.is_object() {
        *target = Value::Object(Map::new());
    }
    if let Value::Object(map) = target {
        insert(map.entry(head.clone()).or_insert(Value::Null), rest, value);
    }
}

/// Overlay requirements on `body`; later discoveries win.
pub fn merge(body: &mut Value, reqs: &[FieldRequirement], config: &VerificationConfig) {
    if !body.is_object() {
        *body = Value::Object(Map::new());
    }
    for req in reqs {
        insert(body, &req.path, synthesize_value(req, config));
    }
}

pub fn synthesize(reqs: &[FieldRequirement], config: &VerificationConfig) -> Value {
    let mut body = json!({});
    merge(&mut body, reqs, config);
    body
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> VerificationConfig {
        VerificationConfig::default()
    }

    #[test]
    fn declared_number_is_numeric() {
        let body = json!({ "error": [{ "path": ["price"], "expected": "number" }] });
        let reqs = parse_requirements(&body);
        assert_eq!(reqs.len(), 1);
        let synthesized = synthesize(&reqs, &cfg());
        assert!(synthesized["price"].is_number());
        assert!(!synthesized["price"].is_string());
    }

    #[test]
    fn declared_type_beats_name_guess() {
        // "count" is numeric by name, but the schema says string.
        let body = json!({ "issues": [{ "path": ["count"], "expected": "string" }] });
        let synthesized = synthesize(&parse_requirements(&body), &cfg());
        assert!(synthesized["count"].is_string());
    }

    #[test]
    fn name_guess_without_declared_type() {
        let body = json!({ "errors": [{ "field": "quantity" }, { "field": "title" }] });
        let synthesized = synthesize(&parse_requirements(&body), &cfg());
        assert!(synthesized["quantity"].is_number());
        assert_eq!(synthesized["title"], "probe-title");
    }

    #[test]
    fn enums_formats_and_nesting() {
        let body = json!({
            "success": false,
            "error": {
                "issues": [
                    { "code": "invalid_enum_value", "path": ["status"], "options": ["open", "closed"] },
                    { "code": "invalid_string", "path": ["contact", "email"], "validation": "email" },
                    { "code": "invalid_type", "path": ["tags"], "expected": "array" },
                    { "code": "invalid_type", "path": ["lines", 0, "qty"], "expected": "integer" },
                ]
            }
        });
        let synthesized = synthesize(&parse_requirements(&body), &cfg());
        assert_eq!(synthesized["status"], "open");
        assert_eq!(synthesized["contact"]["email"], "probe@example.com");
        assert_eq!(synthesized["tags"], json!([]));
        assert_eq!(synthesized["lines"][0]["qty"], 1);
    }

    #[test]
    fn field_type_pairs_and_flattened_errors() {
        let body = json!({ "details": [{ "field": "active", "type": "boolean" }] });
        assert_eq!(synthesize(&parse_requirements(&body), &cfg())["active"], true);

        let flat = json!({ "error": { "fieldErrors": { "price": ["Expected number, received string"] } } });
        let reqs = parse_requirements(&flat);
        assert_eq!(reqs[0].expected, Some(FieldType::Number));
    }

    #[test]
    fn unrecognised_bodies_yield_nothing() {
        assert!(parse_requirements(&json!({ "message": "bad request" })).is_empty());
        assert!(parse_requirements(&json!("oops")).is_empty());
    }

    #[test]
    fn request_path_in_envelope_is_not_a_field() {
        let body = json!({
            "statusCode": 400,
            "path": "/api/products",
            "errors": [{ "path": ["price"], "expected": "number" }]
        });
        let reqs = parse_requirements(&body);
        assert_eq!(reqs.len(), 1);
        let synthesized = synthesize(&reqs, &cfg());
        assert!(synthesized["price"].is_number());
        assert!(synthesized.get("/api/products").is_none());

        let dotted = json!({ "issues": [{ "path": "contact.email", "format": "email" }] });
        let reqs = parse_requirements(&dotted);
        assert_eq!(reqs[0].path, vec!["contact", "email"]);
    }

    #[test]
    fn merge_adds_and_corrects() {
        let c = cfg();
        let mut body = synthesize(
            &parse_requirements(&json!({ "error": [{ "path": ["name"], "expected": "string" }] })),
            &c,
        );
        let second = parse_requirements(&json!({ "error": [{ "path": ["price"], "expected": "number" }] }));
        merge(&mut body, &second, &c);
        assert_eq!(body["name"], "probe-name");
        assert!(body["price"].is_number());
    }
}

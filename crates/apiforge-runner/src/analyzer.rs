//! Schema analysis: valid, boundary and invalid values plus response assertions
//!
//! Works on resolved JSON Schema fragments. `allOf` parts are merged and
//! `oneOf`/`anyOf` collapse to their first non-null variant before any
//! value is derived. Output depends only on the schema and the seed.

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use serde_json::{Map, Value, json};

use apiforge_core::model::{Assertion, Condition, param_text};

use crate::spec::CIRCULAR_REF_KEY;

/// Maximum recursion depth while deriving values.
const MAX_DEPTH: u32 = 20;

/// Upper bound for generated string and array lengths.
const MAX_LEN: u64 = 10_000;

const BASE_STRING: &str = "sample_string";

/// String length used for large-payload cases.
pub const LARGE_STRING_LEN: usize = 1000;
/// Array length used for large-payload cases.
pub const LARGE_ARRAY_LEN: usize = 100;

const KNOWN_TYPES: &[&str] = &[
    "string", "integer", "number", "boolean", "array", "object", "null",
];

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SchemaError {
    #[error("schema node at {0} is not an object")]
    NotAnObject(String),
    #[error("unknown type '{ty}' at {location}")]
    UnknownType { ty: String, location: String },
    #[error("`{low}` is greater than `{high}` at {location}")]
    InvertedBounds {
        low: &'static str,
        high: &'static str,
        location: String,
    },
    #[error("`{keyword}` must be an array at {location}")]
    NotAnArray {
        keyword: &'static str,
        location: String,
    },
}

/// A value at or next to a declared bound.
#[derive(Debug, Clone, PartialEq)]
pub struct BoundaryValue {
    /// e.g. `"maximum + 1"`, `"minLength"`, `"value outside enum"`.
    pub label: String,
    pub value: Value,
    /// Whether the value satisfies the schema's bounds.
    pub valid: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvalidKind {
    TypeMismatch,
    MissingRequired,
}

/// A value that violates the schema.
#[derive(Debug, Clone, PartialEq)]
pub struct InvalidValue {
    pub kind: InvalidKind,
    /// Property the violation targets; `None` for the value as a whole.
    pub field: Option<String>,
    pub label: String,
    pub value: Value,
    /// Declared type the value fails to match, for type mismatches.
    pub declared: Option<String>,
}

impl InvalidValue {
    /// Whether the violation is still one once the value is sent as text
    /// (query string, form field, multipart part).
    ///
    /// Any text is a valid string, and a lone text value reads as a
    /// one-item array, so only scalar non-string types stay invalid.
    #[must_use]
    pub fn holds_as_text(&self) -> bool {
        match self.kind {
            InvalidKind::MissingRequired => true,
            InvalidKind::TypeMismatch => matches!(
                self.declared.as_deref(),
                Some("integer" | "number" | "boolean")
            ),
        }
    }
}

/// Derives test data from schemas. Deterministic for a given seed.
#[derive(Debug, Clone, Copy)]
pub struct SchemaAnalyzer {
    seed: u64,
}

impl SchemaAnalyzer {
    #[must_use]
    pub const fn new(seed: u64) -> Self {
        Self { seed }
    }

    fn rng(&self) -> SmallRng {
        SmallRng::seed_from_u64(self.seed)
    }

    /// A minimal instance that satisfies `schema`.
    ///
    /// Preference order: `example`, `default`, first `enum` member, `const`,
    /// then a per-type minimal value.
    pub fn valid_value(&self, schema: &Value) -> Result<Value, SchemaError> {
        check(schema)?;
        Ok(self.valid_at(schema, &mut self.rng(), 0))
    }

    /// Values at and around every declared bound, with validity flags.
    ///
    /// Unconstrained schemas produce nothing.
    pub fn boundary_values(&self, schema: &Value) -> Result<Vec<BoundaryValue>, SchemaError> {
        check(schema)?;
        let schema = flatten(schema, 0);
        let mut out = Vec::new();

        if let Some(members) = schema.get("enum").and_then(Value::as_array) {
            for m in members {
                out.push(BoundaryValue {
                    label: format!("enum member {}", param_text(m)),
                    value: m.clone(),
                    valid: true,
                });
            }
            out.push(BoundaryValue {
                label: "value outside enum".into(),
                value: non_member(members),
                valid: false,
            });
            return Ok(out);
        }

        match schema_type(&schema) {
            Some("integer") => integer_boundaries(&schema, &mut out),
            Some("number") => number_boundaries(&schema, &mut out),
            Some("string") => {
                for (label, len, valid) in length_boundaries(&schema, "minLength", "maxLength") {
                    out.push(BoundaryValue {
                        label,
                        value: Value::String("a".repeat(len)),
                        valid,
                    });
                }
            }
            Some("array") => {
                let item = schema
                    .get("items")
                    .map_or_else(|| json!(BASE_STRING), |i| self.valid_at(i, &mut self.rng(), 1));
                for (label, len, valid) in length_boundaries(&schema, "minItems", "maxItems") {
                    out.push(BoundaryValue {
                        label,
                        value: Value::Array(vec![item.clone(); len]),
                        valid,
                    });
                }
            }
            _ => {}
        }

        let mut seen: Vec<BoundaryValue> = Vec::with_capacity(out.len());
        for b in out {
            if !seen.iter().any(|s| s.value == b.value) {
                seen.push(b);
            }
        }
        Ok(seen)
    }

    /// Values that violate `schema`.
    ///
    /// A type-mismatched value for the whole schema, then for objects: the
    /// valid instance with each required property omitted, and the valid
    /// instance with each typed property replaced by a mismatched value.
    pub fn invalid_values(&self, schema: &Value) -> Result<Vec<InvalidValue>, SchemaError> {
        check(schema)?;
        let flat = flatten(schema, 0);
        let mut out = Vec::new();
        let ty = schema_type(&flat);

        if let Some(ty) = ty {
            if let Some(wrong) = mismatch_for(ty) {
                out.push(InvalidValue {
                    kind: InvalidKind::TypeMismatch,
                    field: None,
                    label: format!("{} instead of {ty}", json_kind(&wrong)),
                    value: wrong,
                    declared: Some(ty.to_string()),
                });
            }
        }
        if ty != Some("object") {
            return Ok(out);
        }

        let Value::Object(base) = self.valid_at(&flat, &mut self.rng(), 0) else {
            return Ok(out);
        };
        for name in required_names(&flat) {
            let mut obj = base.clone();
            obj.remove(&name);
            out.push(InvalidValue {
                kind: InvalidKind::MissingRequired,
                label: format!("missing required field '{name}'"),
                field: Some(name),
                value: Value::Object(obj),
                declared: None,
            });
        }
        if let Some(props) = flat.get("properties").and_then(Value::as_object) {
            for (name, prop) in props {
                let prop = flatten(prop, 1);
                let Some(prop_ty) = schema_type(&prop) else {
                    continue;
                };
                let Some(wrong) = mismatch_for(prop_ty) else {
                    continue;
                };
                let mut obj = base.clone();
                obj.insert(name.clone(), wrong.clone());
                out.push(InvalidValue {
                    kind: InvalidKind::TypeMismatch,
                    field: Some(name.clone()),
                    label: format!("'{name}' as {} instead of {prop_ty}", json_kind(&wrong)),
                    value: Value::Object(obj),
                    declared: Some(prop_ty.to_string()),
                });
            }
        }
        Ok(out)
    }

    /// Structural assertions for a response expected with one of `expected` statuses.
    pub fn response_assertions(
        &self,
        expected: &[u16],
        schema: Option<&Value>,
    ) -> Result<Vec<Assertion>, SchemaError> {
        let mut out = vec![Assertion::status_in(expected)];
        let Some(schema) = schema else {
            return Ok(out);
        };
        check(schema)?;
        let flat = flatten(schema, 0);
        out.push(
            Assertion::body(None, Condition::Exists).with_description("response body is not empty"),
        );

        match schema_type(&flat) {
            Some("object") => {
                let required = required_names(&flat);
                for name in &required {
                    out.push(
                        Assertion::body(Some(name), Condition::Exists)
                            .with_description(format!("response has property {name}")),
                    );
                }
                constraint_assertions(&flat, &required, &mut out);
            }
            Some("array") => {
                out.push(
                    Assertion::conforms_to(None, json!({"type": "array"}))
                        .with_description("response is array"),
                );
                if let Some(items) = flat.get("items") {
                    for name in required_names(&flatten(items, 1)) {
                        out.push(
                            Assertion::conforms_to(
                                None,
                                json!({"type": "array", "items": {"type": "object", "required": [name]}}),
                            )
                            .with_description(format!("each item has property {name}")),
                        );
                    }
                }
            }
            _ => {}
        }
        Ok(out)
    }

    /// A valid instance with every string stretched to [`LARGE_STRING_LEN`]
    /// and every array grown to [`LARGE_ARRAY_LEN`] items.
    pub fn large_value(&self, schema: &Value) -> Result<Value, SchemaError> {
        check(schema)?;
        Ok(enlarge(self.valid_at(schema, &mut self.rng(), 0)))
    }

    fn valid_at(&self, schema: &Value, rng: &mut SmallRng, depth: u32) -> Value {
        if depth > MAX_DEPTH || schema.get(CIRCULAR_REF_KEY).is_some() {
            return Value::Null;
        }
        let schema = flatten(schema, depth);
        for key in ["example", "default"] {
            if let Some(v) = schema.get(key) {
                return v.clone();
            }
        }
        if let Some(first) = schema
            .get("enum")
            .and_then(Value::as_array)
            .and_then(|e| e.first())
        {
            return first.clone();
        }
        if let Some(v) = schema.get("const") {
            return v.clone();
        }

        match schema_type(&schema) {
            Some("string") => valid_string(&schema, rng),
            Some("integer") => json!(valid_integer(&schema)),
            Some("number") => json!(valid_number(&schema)),
            Some("boolean") => Value::Bool(true),
            Some("null") => Value::Null,
            Some("array") => {
                let min = schema.get("minItems").and_then(Value::as_u64).unwrap_or(0);
                let mut count = min.max(1);
                if let Some(max) = schema.get("maxItems").and_then(Value::as_u64) {
                    count = count.min(max);
                }
                let default_items = json!({"type": "string"});
                let items = schema.get("items").unwrap_or(&default_items);
                (0..count.min(MAX_LEN))
                    .map(|_| self.valid_at(items, rng, depth + 1))
                    .collect()
            }
            Some("object") => self.valid_object(&schema, rng, depth),
            _ => json!(BASE_STRING),
        }
    }

    fn valid_object(&self, schema: &Value, rng: &mut SmallRng, depth: u32) -> Value {
        let required = required_names(schema);
        let mut out = Map::new();
        let Some(props) = schema.get("properties").and_then(Value::as_object) else {
            for name in required {
                out.insert(name, json!(BASE_STRING));
            }
            return Value::Object(out);
        };
        let chosen: Vec<String> = if required.is_empty() {
            props.keys().cloned().collect()
        } else {
            required
        };
        for name in chosen {
            let value = match props.get(&name) {
                Some(prop) => self.valid_at(prop, rng, depth + 1),
                None => json!(BASE_STRING),
            };
            out.insert(name, value);
        }
        Value::Object(out)
    }
}

// ── Schema helpers ──

/// Reject malformed schema nodes.
pub fn check(schema: &Value) -> Result<(), SchemaError> {
    check_at(schema, "#", 0)
}

fn check_at(schema: &Value, location: &str, depth: u32) -> Result<(), SchemaError> {
    if depth > MAX_DEPTH {
        return Ok(());
    }
    let obj = match schema {
        Value::Object(o) => o,
        Value::Bool(_) => return Ok(()),
        _ => return Err(SchemaError::NotAnObject(location.to_string())),
    };

    if let Some(t) = obj.get("type") {
        let names: Vec<&Value> = match t {
            Value::Array(items) => items.iter().collect(),
            other => vec![other],
        };
        for name in names {
            let known = name.as_str().is_some_and(|n| KNOWN_TYPES.contains(&n));
            if !known {
                return Err(SchemaError::UnknownType {
                    ty: name.as_str().map_or_else(|| name.to_string(), str::to_string),
                    location: location.to_string(),
                });
            }
        }
    }
    for (low, high) in [
        ("minimum", "maximum"),
        ("minLength", "maxLength"),
        ("minItems", "maxItems"),
    ] {
        let lo = obj.get(low).and_then(Value::as_f64);
        let hi = obj.get(high).and_then(Value::as_f64);
        if let (Some(lo), Some(hi)) = (lo, hi) {
            if lo > hi {
                return Err(SchemaError::InvertedBounds {
                    low,
                    high,
                    location: location.to_string(),
                });
            }
        }
    }
    for keyword in ["required", "enum"] {
        if obj.get(keyword).is_some_and(|v| !v.is_array()) {
            return Err(SchemaError::NotAnArray {
                keyword,
                location: location.to_string(),
            });
        }
    }

    if let Some(props) = obj.get("properties").and_then(Value::as_object) {
        for (name, sub) in props {
            check_at(sub, &format!("{location}/properties/{name}"), depth + 1)?;
        }
    }
    if let Some(items) = obj.get("items") {
        check_at(items, &format!("{location}/items"), depth + 1)?;
    }
    for key in ["allOf", "oneOf", "anyOf"] {
        if let Some(variants) = obj.get(key).and_then(Value::as_array) {
            for (i, sub) in variants.iter().enumerate() {
                check_at(sub, &format!("{location}/{key}/{i}"), depth + 1)?;
            }
        }
    }
    Ok(())
}

/// Declared or inferred type; for type arrays the first non-null entry.
#[must_use]
pub fn schema_type(schema: &Value) -> Option<&str> {
    match schema.get("type") {
        Some(Value::String(t)) => Some(t),
        Some(Value::Array(types)) => {
            let names: Vec<&str> = types.iter().filter_map(Value::as_str).collect();
            names
                .iter()
                .copied()
                .find(|t| *t != "null")
                .or_else(|| names.first().copied())
        }
        _ if schema.get("properties").is_some() => Some("object"),
        _ if schema.get("items").is_some() => Some("array"),
        _ => None,
    }
}

/// Merge `allOf` parts and collapse `oneOf`/`anyOf` to the first non-null variant.
#[must_use]
pub fn flatten(schema: &Value, depth: u32) -> Value {
    let Some(obj) = schema.as_object() else {
        return json!({});
    };
    let mut out = obj.clone();
    if depth > MAX_DEPTH {
        return Value::Object(out);
    }
    if let Some(Value::Array(parts)) = out.remove("allOf") {
        for part in &parts {
            merge_into(&mut out, flatten(part, depth + 1));
        }
    }
    for key in ["oneOf", "anyOf"] {
        if let Some(Value::Array(variants)) = out.remove(key) {
            if let Some(first) = variants.iter().find(|v| schema_type(v) != Some("null")) {
                merge_into(&mut out, flatten(first, depth + 1));
            }
        }
    }
    Value::Object(out)
}

fn merge_into(target: &mut Map<String, Value>, part: Value) {
    let Value::Object(part) = part else {
        return;
    };
    for (key, value) in part {
        if key == "properties" {
            if let (Some(Value::Object(props)), Value::Object(more)) =
                (target.get_mut("properties"), &value)
            {
                props.extend(more.clone());
                continue;
            }
        } else if key == "required" {
            if let (Some(Value::Array(names)), Value::Array(more)) =
                (target.get_mut("required"), &value)
            {
                for name in more {
                    if !names.contains(name) {
                        names.push(name.clone());
                    }
                }
                continue;
            }
        }
        target.insert(key, value);
    }
}

/// Names listed in `required`, in declaration order.
#[must_use]
pub fn required_names(schema: &Value) -> Vec<String> {
    schema
        .get("required")
        .and_then(Value::as_array)
        .map(|names| {
            names
                .iter()
                .filter_map(|n| n.as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default()
}

/// Top-level properties of an object schema after flattening.
#[must_use]
pub fn object_properties(schema: &Value) -> Vec<(String, Value)> {
    let flat = flatten(schema, 0);
    flat.get("properties")
        .and_then(Value::as_object)
        .map(|p| p.iter().map(|(k, v)| (k.clone(), flatten(v, 1))).collect())
        .unwrap_or_default()
}

fn mismatch_for(ty: &str) -> Option<Value> {
    Some(match ty {
        "string" => json!(12345),
        "integer" => json!("not_an_integer"),
        "number" => json!("not_a_number"),
        "boolean" => json!("not_a_boolean"),
        "array" => json!("not_an_array"),
        "object" => json!("not_an_object"),
        _ => return None,
    })
}

fn json_kind(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn non_member(members: &[Value]) -> Value {
    let ints: Option<Vec<i64>> = members.iter().map(Value::as_i64).collect();
    if let Some(max) = ints.and_then(|i| i.into_iter().max()) {
        return json!(max.saturating_add(1));
    }
    let mut candidate = "__invalid_enum_value__".to_string();
    while members.iter().any(|m| m.as_str() == Some(&candidate)) {
        candidate.push('_');
    }
    Value::String(candidate)
}

// ── Per-type values ──

#[derive(Debug, Clone, Copy, Default)]
struct NumberBounds {
    /// `(bound, exclusive)`
    min: Option<(f64, bool)>,
    max: Option<(f64, bool)>,
}

impl NumberBounds {
    /// Reads both OpenAPI 3.0 boolean and 3.1 numeric exclusive bounds.
    fn of(schema: &Value) -> Self {
        let bound = |inclusive: &str, exclusive: &str| {
            let plain = schema.get(inclusive).and_then(Value::as_f64);
            match schema.get(exclusive) {
                Some(Value::Bool(true)) => plain.map(|v| (v, true)),
                Some(Value::Number(n)) => n.as_f64().map(|v| (v, true)),
                _ => plain.map(|v| (v, false)),
            }
        };
        Self {
            min: bound("minimum", "exclusiveMinimum"),
            max: bound("maximum", "exclusiveMaximum"),
        }
    }

    fn contains(&self, x: f64) -> bool {
        let above = self
            .min
            .is_none_or(|(lo, excl)| if excl { x > lo } else { x >= lo });
        let below = self
            .max
            .is_none_or(|(hi, excl)| if excl { x < hi } else { x <= hi });
        above && below
    }
}

fn valid_integer(schema: &Value) -> i64 {
    let bounds = NumberBounds::of(schema);
    let mut v: i64 = 1;
    if let Some((lo, excl)) = bounds.min {
        let lo = if excl { lo.floor() as i64 + 1 } else { lo.ceil() as i64 };
        v = v.max(lo);
    }
    if let Some((hi, excl)) = bounds.max {
        let hi = if excl { hi.ceil() as i64 - 1 } else { hi.floor() as i64 };
        v = v.min(hi);
    }
    v
}

fn valid_number(schema: &Value) -> f64 {
    let bounds = NumberBounds::of(schema);
    let mut v = 1.0;
    if let Some((lo, excl)) = bounds.min {
        if v < lo || (excl && v <= lo) {
            v = if excl { lo + 1.0 } else { lo };
        }
    }
    if let Some((hi, excl)) = bounds.max {
        if v > hi || (excl && v >= hi) {
            v = match bounds.min {
                Some((lo, _)) => (lo + hi) / 2.0,
                None if excl => hi - 1.0,
                None => hi,
            };
        }
    }
    v
}

fn valid_string(schema: &Value, rng: &mut SmallRng) -> Value {
    let mut text = match schema.get("format").and_then(Value::as_str) {
        Some("email") => "user@example.com".to_string(),
        Some("uuid") => uuid(rng),
        Some("date") => "2024-01-15".to_string(),
        Some("date-time") => "2024-01-15T12:00:00Z".to_string(),
        Some("uri" | "url") => "https://example.com".to_string(),
        Some("hostname") => "example.com".to_string(),
        Some("ipv4") => "192.168.1.1".to_string(),
        Some("ipv6") => "::1".to_string(),
        Some("byte") => "c2FtcGxl".to_string(),
        Some("binary") => "sample file content".to_string(),
        _ => BASE_STRING.to_string(),
    };
    let min = schema.get("minLength").and_then(Value::as_u64).unwrap_or(0);
    let max = schema.get("maxLength").and_then(Value::as_u64);
    let min = min.min(MAX_LEN) as usize;
    while text.chars().count() < min {
        text.push('x');
    }
    if let Some(max) = max {
        let max = max.min(MAX_LEN) as usize;
        if text.chars().count() > max {
            text = text.chars().take(max).collect();
        }
    }
    Value::String(text)
}

fn uuid(rng: &mut SmallRng) -> String {
    format!(
        "{:08x}-{:04x}-4{:03x}-{:04x}-{:012x}",
        rng.r#gen::<u32>(),
        rng.r#gen::<u16>(),
        rng.r#gen::<u16>() & 0x0FFF,
        (rng.r#gen::<u16>() & 0x3FFF) | 0x8000,
        rng.r#gen::<u64>() & 0xFFFF_FFFF_FFFF,
    )
}

fn integer_boundaries(schema: &Value, out: &mut Vec<BoundaryValue>) {
    let bounds = NumberBounds::of(schema);
    for (name, bound) in [("minimum", bounds.min), ("maximum", bounds.max)] {
        let Some((b, _)) = bound else {
            continue;
        };
        let b = b.round() as i64;
        for (suffix, delta) in [(" - 1", -1), ("", 0), (" + 1", 1)] {
            let Some(v) = b.checked_add(delta) else {
                continue;
            };
            out.push(BoundaryValue {
                label: format!("{name}{suffix}"),
                value: json!(v),
                valid: bounds.contains(v as f64),
            });
        }
    }
}

fn number_boundaries(schema: &Value, out: &mut Vec<BoundaryValue>) {
    let bounds = NumberBounds::of(schema);
    for (name, bound) in [("minimum", bounds.min), ("maximum", bounds.max)] {
        let Some((b, _)) = bound else {
            continue;
        };
        for (suffix, delta) in [(" - 1", -1.0), ("", 0.0), (" + 1", 1.0)] {
            let v = b + delta;
            out.push(BoundaryValue {
                label: format!("{name}{suffix}"),
                value: json!(v),
                valid: bounds.contains(v),
            });
        }
    }
}

/// `(label, length, valid)` around `min_key`/`max_key`; negative lengths are dropped.
fn length_boundaries(schema: &Value, min_key: &str, max_key: &str) -> Vec<(String, usize, bool)> {
    let min = schema.get(min_key).and_then(Value::as_u64);
    let max = schema.get(max_key).and_then(Value::as_u64);
    let fits = |len: u64| min.is_none_or(|m| len >= m) && max.is_none_or(|m| len <= m);
    let mut out = Vec::new();
    for (name, bound) in [(min_key, min), (max_key, max)] {
        let Some(b) = bound else {
            continue;
        };
        for (suffix, delta) in [(" - 1", -1i64), ("", 0), (" + 1", 1)] {
            let Some(len) = b.checked_add_signed(delta) else {
                continue;
            };
            if len > MAX_LEN {
                continue;
            }
            out.push((format!("{name}{suffix}"), len as usize, fits(len)));
        }
    }
    out
}

fn enlarge(value: Value) -> Value {
    match value {
        Value::String(_) => Value::String("x".repeat(LARGE_STRING_LEN)),
        Value::Array(items) => {
            let item = items
                .into_iter()
                .next()
                .map_or_else(|| json!("x".repeat(LARGE_STRING_LEN)), enlarge);
            Value::Array(vec![item; LARGE_ARRAY_LEN])
        }
        Value::Object(map) => Value::Object(map.into_iter().map(|(k, v)| (k, enlarge(v))).collect()),
        other => other,
    }
}

/// One assertion per declared enum or format constraint on a top-level property.
///
/// Optional properties may be absent, so their check also admits null.
fn constraint_assertions(schema: &Value, required: &[String], out: &mut Vec<Assertion>) {
    let Some(props) = schema.get("properties").and_then(Value::as_object) else {
        return;
    };
    for (name, prop) in props {
        let prop = flatten(prop, 1);
        let mut constraints = Vec::new();
        if let Some(members) = prop.get("enum") {
            constraints.push((
                json!({"enum": members}),
                format!("{name} is one of the declared values"),
            ));
        }
        if let Some(format) = prop.get("format").and_then(Value::as_str) {
            if schema_type(&prop) == Some("string") {
                constraints.push((
                    json!({"type": "string", "format": format}),
                    format!("{name} has format {format}"),
                ));
            }
        }
        for (constraint, description) in constraints {
            let schema = if required.contains(name) {
                constraint
            } else {
                json!({"anyOf": [{"type": "null"}, constraint]})
            };
            out.push(Assertion::conforms_to(Some(name), schema).with_description(description));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use apiforge_core::model::AssertionType;
    use proptest::prelude::*;

    fn analyzer() -> SchemaAnalyzer {
        SchemaAnalyzer::new(42)
    }

    // ── valid_value ──

    #[test]
    fn valid_value_prefers_example_default_enum_const() {
        let a = analyzer();
        let v = |s: Value| a.valid_value(&s).unwrap();
        assert_eq!(v(json!({"type": "string", "example": "ex", "default": "d"})), "ex");
        assert_eq!(v(json!({"type": "string", "default": "d", "enum": ["a"]})), "d");
        assert_eq!(v(json!({"type": "string", "enum": ["a", "b"]})), "a");
        assert_eq!(v(json!({"const": 7})), 7);
    }

    #[test]
    fn valid_value_per_type() {
        let a = analyzer();
        let v = |s: Value| a.valid_value(&s).unwrap();
        assert_eq!(v(json!({"type": "string"})), "sample_string");
        assert_eq!(v(json!({"type": "string", "format": "email"})), "user@example.com");
        assert_eq!(v(json!({"type": "string", "maxLength": 3})), "sam");
        assert_eq!(v(json!({"type": "string", "minLength": 15})).as_str().unwrap().len(), 15);
        assert_eq!(v(json!({"type": "integer"})), 1);
        assert_eq!(v(json!({"type": "integer", "minimum": 10})), 10);
        assert_eq!(v(json!({"type": "integer", "exclusiveMinimum": 10})), 11);
        assert_eq!(v(json!({"type": "integer", "maximum": 0})), 0);
        assert_eq!(v(json!({"type": "number", "minimum": 2.5})), 2.5);
        assert_eq!(v(json!({"type": "boolean"})), true);
        assert_eq!(v(json!({"type": "array", "items": {"type": "integer"}})), json!([1]));
        assert_eq!(
            v(json!({"type": "array", "items": {"type": "integer"}, "minItems": 3})),
            json!([1, 1, 1])
        );
    }

    #[test]
    fn objects_use_required_or_all_properties() {
        let a = analyzer();
        let required = json!({"type": "object", "required": ["id"], "properties": {
            "id": {"type": "integer"}, "note": {"type": "string"}
        }});
        assert_eq!(a.valid_value(&required).unwrap(), json!({"id": 1}));

        let optional = json!({"type": "object", "properties": {
            "id": {"type": "integer"}, "note": {"type": "string"}
        }});
        assert_eq!(
            a.valid_value(&optional).unwrap(),
            json!({"id": 1, "note": "sample_string"})
        );
    }

    #[test]
    fn composition_is_flattened() {
        let a = analyzer();
        let all_of = json!({"allOf": [
            {"type": "object", "required": ["a"], "properties": {"a": {"type": "integer"}}},
            {"type": "object", "required": ["b"], "properties": {"b": {"type": "string"}}}
        ]});
        assert_eq!(a.valid_value(&all_of).unwrap(), json!({"a": 1, "b": "sample_string"}));

        let one_of = json!({"oneOf": [{"type": "null"}, {"type": "integer", "minimum": 5}]});
        assert_eq!(a.valid_value(&one_of).unwrap(), 5);
    }

    #[test]
    fn circular_marker_yields_null() {
        let schema = json!({"type": "object", "required": ["parent"], "properties": {
            "parent": {CIRCULAR_REF_KEY: "#/components/schemas/Node"}
        }});
        assert_eq!(analyzer().valid_value(&schema).unwrap(), json!({"parent": null}));
    }

    // ── boundary_values ──

    #[test]
    fn integer_boundaries_around_min_and_max() {
        let b = analyzer()
            .boundary_values(&json!({"type": "integer", "minimum": 1, "maximum": 10}))
            .unwrap();
        let got: Vec<(i64, bool)> = b.iter().map(|b| (b.value.as_i64().unwrap(), b.valid)).collect();
        assert_eq!(
            got,
            vec![(0, false), (1, true), (2, true), (9, true), (10, true), (11, false)]
        );
        assert_eq!(b[5].label, "maximum + 1");
    }

    #[test]
    fn string_length_boundaries_drop_negative_lengths() {
        let b = analyzer()
            .boundary_values(&json!({"type": "string", "minLength": 0, "maxLength": 2}))
            .unwrap();
        let lens: Vec<(usize, bool)> = b
            .iter()
            .map(|b| (b.value.as_str().unwrap().len(), b.valid))
            .collect();
        assert_eq!(lens, vec![(0, true), (1, true), (2, true), (3, false)]);
    }

    #[test]
    fn enum_boundaries_add_one_non_member() {
        let b = analyzer()
            .boundary_values(&json!({"type": "string", "enum": ["asc", "desc"]}))
            .unwrap();
        assert_eq!(b.len(), 3);
        assert!(b[..2].iter().all(|b| b.valid));
        assert!(!b[2].valid);
        assert_eq!(b[2].value, "__invalid_enum_value__");
    }

    #[test]
    fn unconstrained_fields_have_no_boundaries() {
        let a = analyzer();
        assert!(a.boundary_values(&json!({"type": "string"})).unwrap().is_empty());
        assert!(a.boundary_values(&json!({"type": "integer"})).unwrap().is_empty());
        assert!(a.boundary_values(&json!({"type": "boolean"})).unwrap().is_empty());
    }

    // ── invalid_values ──

    #[test]
    fn invalid_values_cover_omissions_and_mismatches() {
        let schema = json!({"type": "object", "required": ["name", "age"], "properties": {
            "name": {"type": "string"},
            "age": {"type": "integer"},
            "tags": {"type": "array", "items": {"type": "string"}}
        }});
        let invalid = analyzer().invalid_values(&schema).unwrap();

        let missing: Vec<&str> = invalid
            .iter()
            .filter(|v| v.kind == InvalidKind::MissingRequired)
            .map(|v| v.field.as_deref().unwrap())
            .collect();
        assert_eq!(missing, vec!["name", "age"]);
        let without_name = &invalid.iter().find(|v| v.field.as_deref() == Some("name")).unwrap().value;
        assert_eq!(without_name, &json!({"age": 1}));

        let mut mismatched: Vec<&str> = invalid
            .iter()
            .filter(|v| v.kind == InvalidKind::TypeMismatch && v.field.is_some())
            .map(|v| v.field.as_deref().unwrap())
            .collect();
        mismatched.sort_unstable();
        assert_eq!(mismatched, vec!["age", "name", "tags"]);
        assert_eq!(invalid[0].value, "not_an_object");

        let as_text: Vec<&str> = invalid
            .iter()
            .filter(|v| v.kind == InvalidKind::TypeMismatch && v.holds_as_text())
            .filter_map(|v| v.field.as_deref())
            .collect();
        assert_eq!(as_text, vec!["age"]);
    }

    #[test]
    fn string_mismatch_does_not_hold_as_text() {
        let invalid = analyzer().invalid_values(&json!({"type": "string"})).unwrap();
        assert_eq!(invalid.len(), 1);
        assert_eq!(invalid[0].value, json!(12345));
        assert!(!invalid[0].holds_as_text());

        let invalid = analyzer().invalid_values(&json!({"type": "integer"})).unwrap();
        assert!(invalid[0].holds_as_text());
    }

    #[test]
    fn malformed_schemas_are_rejected() {
        let a = analyzer();
        assert!(matches!(a.valid_value(&json!(5)), Err(SchemaError::NotAnObject(_))));
        assert!(matches!(
            a.valid_value(&json!({"type": "strnig"})),
            Err(SchemaError::UnknownType { .. })
        ));
        assert!(matches!(
            a.boundary_values(&json!({"type": "integer", "minimum": 5, "maximum": 1})),
            Err(SchemaError::InvertedBounds { .. })
        ));
        let err = a
            .invalid_values(&json!({"type": "object", "properties": {"x": {"type": "string", "enum": "a"}}}))
            .unwrap_err();
        assert_eq!(
            err,
            SchemaError::NotAnArray {
                keyword: "enum",
                location: "#/properties/x".into()
            }
        );
    }

    // ── response_assertions ──

    #[test]
    fn array_response_assertions() {
        let schema = json!({"type": "array", "items": {"type": "object", "required": ["id"], "properties": {"id": {"type": "integer"}}}});
        let assertions = analyzer().response_assertions(&[200], Some(&schema)).unwrap();
        let descriptions: Vec<&str> = assertions
            .iter()
            .filter_map(|a| a.description.as_deref())
            .collect();
        assert_eq!(
            descriptions,
            vec![
                "status code is one of [200]",
                "response body is not empty",
                "response is array",
                "each item has property id",
            ]
        );
        assert_eq!(assertions[0].kind, AssertionType::StatusCode);
        assert_eq!(assertions[0].expected_value, Some(json!([200])));
    }

    #[test]
    fn object_response_assertions_include_constraints() {
        let schema = json!({"type": "object", "required": ["id", "status"], "properties": {
            "id": {"type": "integer"},
            "status": {"type": "string", "enum": ["new", "done"]},
            "email": {"type": "string", "format": "email"}
        }});
        let assertions = analyzer().response_assertions(&[200, 201], Some(&schema)).unwrap();
        assert_eq!(assertions.len(), 6);
        assert_eq!(assertions[2].field.as_deref(), Some("id"));
        let email = assertions.iter().find(|a| a.field.as_deref() == Some("email")).unwrap();
        assert!(email.expected_value.as_ref().unwrap().get("anyOf").is_some());
    }

    #[test]
    fn no_schema_means_status_only() {
        let assertions = analyzer().response_assertions(&[204], None).unwrap();
        assert_eq!(assertions.len(), 1);
    }

    #[test]
    fn large_value_stretches_strings_and_arrays() {
        let schema = json!({"type": "object", "properties": {
            "name": {"type": "string"},
            "items": {"type": "array", "items": {"type": "integer"}}
        }});
        let v = analyzer().large_value(&schema).unwrap();
        assert_eq!(v["name"].as_str().unwrap().len(), LARGE_STRING_LEN);
        assert_eq!(v["items"].as_array().unwrap().len(), LARGE_ARRAY_LEN);
    }

    proptest! {
        #[test]
        fn analysis_is_deterministic(seed in any::<u64>(), min in -1000i64..1000, span in 0i64..100, max_len in 1u64..40) {
            let schema = json!({"type": "object", "required": ["id", "code", "ref"], "properties": {
                "id": {"type": "integer", "minimum": min, "maximum": min + span},
                "code": {"type": "string", "maxLength": max_len},
                "ref": {"type": "string", "format": "uuid"}
            }});
            let a = SchemaAnalyzer::new(seed);
            let b = SchemaAnalyzer::new(seed);
            prop_assert_eq!(a.valid_value(&schema).unwrap(), b.valid_value(&schema).unwrap());
            prop_assert_eq!(a.invalid_values(&schema).unwrap(), b.invalid_values(&schema).unwrap());
            let id = &schema["properties"]["id"];
            prop_assert_eq!(a.boundary_values(id).unwrap(), b.boundary_values(id).unwrap());
        }

        #[test]
        fn valid_integers_respect_bounds(min in -1000i64..1000, span in 0i64..100) {
            let schema = json!({"type": "integer", "minimum": min, "maximum": min + span});
            let v = analyzer().valid_value(&schema).unwrap().as_i64().unwrap();
            prop_assert!((min..=min + span).contains(&v));
        }

        #[test]
        fn boundary_validity_matches_bounds(min in -1000i64..1000, span in 0i64..100) {
            let schema = json!({"type": "integer", "minimum": min, "maximum": min + span});
            for b in analyzer().boundary_values(&schema).unwrap() {
                let v = b.value.as_i64().unwrap();
                prop_assert_eq!(b.valid, (min..=min + span).contains(&v));
            }
        }
    }
}

//! OpenAPI / Swagger parsing: extract normalized, fully dereferenced endpoints
//!
//! Pure transform from document text to [`SpecDocument`]. `$ref`s are
//! resolved through an arena of resolved nodes indexed by reference, with a
//! set of references currently being expanded so recursive schemas terminate.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};

use serde_json::{Map, Value, json};

use apiforge_core::model::{
    BodyEncoding, Endpoint, HttpMethod, ParamLocation, Parameter, RequestSchema, ResponseSpec,
    default_operation_id,
};

/// Maximum number of `$ref` hops on one resolution path.
pub const MAX_REF_DEPTH: usize = 50;

/// Maximum JSON nesting of a resolved value.
pub const MAX_NESTING_DEPTH: usize = 512;

/// Key of the marker node substituted for a reference that re-enters itself.
pub const CIRCULAR_REF_KEY: &str = "x-circular-ref";

/// Path-item keys that are not operations.
const PATH_ITEM_FIELDS: &[&str] = &["parameters", "summary", "description", "servers", "$ref"];

#[derive(Debug, thiserror::Error)]
pub enum SpecParseError {
    #[error("Invalid JSON: {0}")]
    InvalidJson(String),
    #[error("Invalid YAML: {0}")]
    InvalidYaml(String),
    #[error("Cannot read {0}: {1}")]
    Io(PathBuf, String),
    #[error("Cannot fetch {url}: {reason}")]
    Fetch { url: String, reason: String },
    #[error("Invalid cURL command: {0}")]
    Curl(String),
    #[error("unsupported spec version: {0}")]
    UnknownVersion(String),
    #[error("document has no `paths` object")]
    MissingPaths,
    #[error("invalid method key '{key}' under path '{path}'")]
    InvalidMethod { path: String, key: String },
    #[error("unresolvable $ref '{reference}' at {location}")]
    UnresolvableRef { reference: String, location: String },
    #[error("reference chain deeper than {MAX_REF_DEPTH} at {location}")]
    TooDeep { location: String },
    #[error("nesting deeper than {MAX_NESTING_DEPTH} levels at {location}")]
    NestingTooDeep { location: String },
    #[error("invalid document at {location}: {reason}")]
    Structure { location: String, reason: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpecVersion {
    OpenApi3,
    Swagger2,
}

/// Result of parsing one document.
#[derive(Debug, Clone)]
pub struct SpecDocument {
    pub version: SpecVersion,
    pub title: Option<String>,
    pub description: Option<String>,
    pub endpoints: Vec<Endpoint>,
    /// Named component schemas (`components.schemas` or `definitions`), resolved.
    pub schemas: BTreeMap<String, Value>,
}

// ── Text → JSON ──

/// Parse document text as JSON or YAML.
///
/// The file extension decides when present (`.json`, `.yaml`, `.yml`);
/// otherwise a leading `{` means JSON and anything else is read as YAML.
pub fn parse_text(name: Option<&Path>, content: &str) -> Result<Value, SpecParseError> {
    let ext = name
        .and_then(|p| p.extension())
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_ascii_lowercase();

    match ext.as_str() {
        "yaml" | "yml" => parse_yaml(content),
        "json" => parse_json(content),
        _ => {
            if content.trim_start().starts_with('{') {
                parse_json(content)
            } else {
                parse_yaml(content)
            }
        }
    }
}

fn parse_json(content: &str) -> Result<Value, SpecParseError> {
    serde_json::from_str(content).map_err(|e| SpecParseError::InvalidJson(e.to_string()))
}

fn parse_yaml(content: &str) -> Result<Value, SpecParseError> {
    serde_yml::from_str(content).map_err(|e| SpecParseError::InvalidYaml(e.to_string()))
}

/// Parse text and extract endpoints in one step.
pub fn load(name: Option<&Path>, content: &str) -> Result<SpecDocument, SpecParseError> {
    let doc = parse_text(name, content)?;
    extract(&doc)
}

/// Read and parse a spec file.
pub fn load_file(path: &Path) -> Result<SpecDocument, SpecParseError> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| SpecParseError::Io(path.to_path_buf(), e.to_string()))?;
    load(Some(path), &content)
}

// ── Version ──

pub fn detect_version(doc: &Value) -> Result<SpecVersion, SpecParseError> {
    if let Some(v) = doc.get("openapi") {
        let text = scalar_text(v);
        return if text.starts_with("3.") {
            Ok(SpecVersion::OpenApi3)
        } else {
            Err(SpecParseError::UnknownVersion(format!("openapi {text}")))
        };
    }
    if let Some(v) = doc.get("swagger") {
        let text = scalar_text(v);
        return if text == "2.0" || text == "2" {
            Ok(SpecVersion::Swagger2)
        } else {
            Err(SpecParseError::UnknownVersion(format!("swagger {text}")))
        };
    }
    Err(SpecParseError::UnknownVersion(
        "neither `openapi` nor `swagger` is declared".into(),
    ))
}

/// YAML may read `2.0` as a float.
fn scalar_text(v: &Value) -> String {
    match v {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => {
            let s = n.to_string();
            if s.contains('.') { s } else { format!("{s}.0") }
        }
        other => other.to_string(),
    }
}

// ── Reference resolution ──

/// Position on the current resolution path.
#[derive(Debug, Clone, Copy, Default)]
struct Depth {
    refs: usize,
    nesting: usize,
}

impl Depth {
    fn nested(self) -> Self {
        Self {
            nesting: self.nesting + 1,
            ..self
        }
    }

    fn through_ref(self) -> Self {
        Self {
            refs: self.refs + 1,
            nesting: self.nesting + 1,
        }
    }
}

enum Slot {
    Pending,
    Done(Value),
}

/// Resolves internal references against one document.
///
/// Every resolved reference target is stored once in `arena`; `index` maps a
/// reference string to its slot. `expanding` holds references whose
/// expansion is on the current stack.
pub struct Resolver<'a> {
    root: &'a Value,
    arena: Vec<Slot>,
    index: HashMap<String, usize>,
    expanding: HashSet<String>,
}

impl<'a> Resolver<'a> {
    #[must_use]
    pub fn new(root: &'a Value) -> Self {
        Self {
            root,
            arena: Vec::new(),
            index: HashMap::new(),
            expanding: HashSet::new(),
        }
    }

    /// Fully dereference `value`. `location` names it in error messages.
    pub fn resolve(&mut self, value: &Value, location: &str) -> Result<Value, SpecParseError> {
        self.resolve_at(value, location, Depth::default())
    }

    fn resolve_at(
        &mut self,
        value: &Value,
        location: &str,
        depth: Depth,
    ) -> Result<Value, SpecParseError> {
        if depth.nesting > MAX_NESTING_DEPTH {
            return Err(SpecParseError::NestingTooDeep {
                location: location.to_string(),
            });
        }
        match value {
            Value::Object(obj) => {
                if let Some(reference) = obj.get("$ref").and_then(Value::as_str) {
                    return self.resolve_ref(reference, location, depth);
                }
                let mut out = Map::with_capacity(obj.len());
                for (k, v) in obj {
                    out.insert(k.clone(), self.resolve_at(v, location, depth.nested())?);
                }
                Ok(Value::Object(out))
            }
            Value::Array(items) => items
                .iter()
                .map(|v| self.resolve_at(v, location, depth.nested()))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::Array),
            other => Ok(other.clone()),
        }
    }

    fn resolve_ref(
        &mut self,
        reference: &str,
        location: &str,
        depth: Depth,
    ) -> Result<Value, SpecParseError> {
        if let Some(&slot) = self.index.get(reference) {
            if let Slot::Done(v) = &self.arena[slot] {
                return Ok(v.clone());
            }
        }
        if self.expanding.contains(reference) {
            return Ok(json!({ CIRCULAR_REF_KEY: reference }));
        }

        let unresolvable = || SpecParseError::UnresolvableRef {
            reference: reference.to_string(),
            location: location.to_string(),
        };
        let pointer = reference.strip_prefix('#').ok_or_else(unresolvable)?;
        let target = if pointer.is_empty() {
            self.root
        } else {
            self.root.pointer(pointer).ok_or_else(unresolvable)?
        };

        let slot = self.arena.len();
        self.arena.push(Slot::Pending);
        self.index.insert(reference.to_string(), slot);
        self.expanding.insert(reference.to_string());

        let resolved = if depth.refs >= MAX_REF_DEPTH {
            Err(SpecParseError::TooDeep {
                location: reference.to_string(),
            })
        } else {
            self.resolve_at(target, reference, depth.through_ref())
        };

        self.expanding.remove(reference);
        let resolved = match resolved {
            Ok(v) => v,
            Err(e) => {
                self.index.remove(reference);
                return Err(e);
            }
        };
        self.arena[slot] = Slot::Done(resolved.clone());
        Ok(resolved)
    }

    /// Number of distinct references resolved so far.
    #[must_use]
    pub fn resolved_count(&self) -> usize {
        self.arena
            .iter()
            .filter(|s| matches!(s, Slot::Done(_)))
            .count()
    }
}

// ── Extraction ──

/// Extract normalized endpoints from a parsed document.
///
/// Operations come out in document path order, and within a path in
/// `GET, POST, PUT, PATCH, DELETE, HEAD, OPTIONS, TRACE` order.
pub fn extract(doc: &Value) -> Result<SpecDocument, SpecParseError> {
    let version = detect_version(doc)?;
    let paths = doc
        .get("paths")
        .and_then(Value::as_object)
        .ok_or(SpecParseError::MissingPaths)?;

    let mut resolver = Resolver::new(doc);
    let global_consumes = string_list(doc.get("consumes"));
    let global_produces = string_list(doc.get("produces"));
    let mut endpoints = Vec::new();

    for (path, raw_item) in paths {
        let location = format!("paths.{path}");
        let item = resolver.resolve(raw_item, &location)?;
        let Some(item) = item.as_object() else {
            return Err(SpecParseError::Structure {
                location,
                reason: "path item is not an object".into(),
            });
        };

        for key in item.keys() {
            let known = HttpMethod::from_path_item_key(key).is_some()
                || PATH_ITEM_FIELDS.contains(&key.as_str())
                || key.starts_with("x-");
            if !known {
                return Err(SpecParseError::InvalidMethod {
                    path: path.clone(),
                    key: key.clone(),
                });
            }
        }

        let shared_params = item.get("parameters").cloned().unwrap_or(Value::Null);

        for method in HttpMethod::ALL {
            let key = method.as_str().to_ascii_lowercase();
            let Some(op) = item.get(&key) else {
                continue;
            };
            let op_location = format!("{location}.{key}");
            let Some(op) = op.as_object() else {
                return Err(SpecParseError::Structure {
                    location: op_location,
                    reason: "operation is not an object".into(),
                });
            };
            let ctx = OperationContext {
                version,
                path,
                method,
                op,
                shared_params: &shared_params,
                consumes: string_list(op.get("consumes")).or_else(|| global_consumes.clone()),
                produces: string_list(op.get("produces")).or_else(|| global_produces.clone()),
                location: &op_location,
            };
            endpoints.push(ctx.build()?);
        }
    }

    let mut schemas = BTreeMap::new();
    let named = match version {
        SpecVersion::OpenApi3 => doc.pointer("/components/schemas"),
        SpecVersion::Swagger2 => doc.get("definitions"),
    };
    if let Some(named) = named.and_then(Value::as_object) {
        for (name, schema) in named {
            let resolved = resolver.resolve(schema, &format!("schemas.{name}"))?;
            schemas.insert(name.clone(), resolved);
        }
    }

    let info = doc.get("info");
    Ok(SpecDocument {
        version,
        title: info
            .and_then(|i| i.get("title"))
            .and_then(Value::as_str)
            .map(str::to_string),
        description: info
            .and_then(|i| i.get("description"))
            .and_then(Value::as_str)
            .map(str::to_string),
        endpoints,
        schemas,
    })
}

fn string_list(v: Option<&Value>) -> Option<Vec<String>> {
    let list: Vec<String> = v?
        .as_array()?
        .iter()
        .filter_map(|s| s.as_str().map(str::to_string))
        .collect();
    (!list.is_empty()).then_some(list)
}

struct OperationContext<'a> {
    version: SpecVersion,
    path: &'a str,
    method: HttpMethod,
    op: &'a Map<String, Value>,
    shared_params: &'a Value,
    consumes: Option<Vec<String>>,
    produces: Option<Vec<String>>,
    location: &'a str,
}

impl OperationContext<'_> {
    fn build(&self) -> Result<Endpoint, SpecParseError> {
        let mut endpoint = Endpoint::new(self.method, self.path);
        if let Some(id) = self.op.get("operationId").and_then(Value::as_str) {
            endpoint.operation_id = id.to_string();
        } else {
            endpoint.operation_id = default_operation_id(self.method, self.path);
        }
        endpoint.summary = text_field(self.op, "summary");
        endpoint.description = text_field(self.op, "description");
        endpoint.tags = string_list(self.op.get("tags")).unwrap_or_default();

        let raw_params = self.merged_parameters();
        let mut form_fields: Vec<(&Map<String, Value>, Value)> = Vec::new();
        for raw in &raw_params {
            match raw.get("in").and_then(Value::as_str) {
                Some("body") => {
                    let schema = raw.get("schema").cloned().unwrap_or_else(|| json!({}));
                    let media_type = self
                        .consumes
                        .as_ref()
                        .and_then(|c| c.iter().find(|m| is_json_media(m)).cloned())
                        .unwrap_or_else(|| "application/json".to_string());
                    endpoint.request_schema = Some(RequestSchema {
                        encoding: BodyEncoding::from_media_type(&media_type),
                        media_type,
                        schema,
                        required: raw.get("required").and_then(Value::as_bool).unwrap_or(false),
                    });
                }
                Some("formData") => form_fields.push((raw, swagger_param_schema(raw))),
                Some(_) => {
                    if let Some(p) = self.parameter(raw)? {
                        endpoint.parameters.push(p);
                    }
                }
                None => {
                    return Err(SpecParseError::Structure {
                        location: self.location.to_string(),
                        reason: "parameter without `in`".into(),
                    });
                }
            }
        }
        if !form_fields.is_empty() {
            endpoint.request_schema = Some(self.form_request(&form_fields));
        }

        if self.version == SpecVersion::OpenApi3 {
            if let Some(body) = self.op.get("requestBody") {
                endpoint.request_schema = openapi3_request(body);
            }
        }

        if let Some(responses) = self.op.get("responses").and_then(Value::as_object) {
            for (code, resp) in responses {
                let Ok(code) = code.parse::<u16>() else {
                    continue;
                };
                endpoint.response_schemas.insert(code, self.response(resp));
            }
        }
        Ok(endpoint)
    }

    /// Path-level parameters overridden by operation-level ones with the same `(name, in)`.
    fn merged_parameters(&self) -> Vec<&Map<String, Value>> {
        let shared = self.shared_params.as_array().into_iter().flatten();
        let own = self
            .op
            .get("parameters")
            .and_then(Value::as_array)
            .into_iter()
            .flatten();
        let mut merged: Vec<&Map<String, Value>> = Vec::new();
        for p in shared.chain(own).filter_map(Value::as_object) {
            let key = (p.get("name"), p.get("in"));
            merged.retain(|q| (q.get("name"), q.get("in")) != key);
            merged.push(p);
        }
        merged
    }

    fn parameter(&self, raw: &Map<String, Value>) -> Result<Option<Parameter>, SpecParseError> {
        let Some(name) = raw.get("name").and_then(Value::as_str) else {
            return Err(SpecParseError::Structure {
                location: self.location.to_string(),
                reason: "parameter without `name`".into(),
            });
        };
        let location = match raw.get("in").and_then(Value::as_str) {
            Some("path") => ParamLocation::Path,
            Some("query") => ParamLocation::Query,
            Some("header") => ParamLocation::Header,
            Some("cookie") => ParamLocation::Cookie,
            _ => return Ok(None),
        };
        let schema = match self.version {
            SpecVersion::OpenApi3 => raw
                .get("schema")
                .cloned()
                .or_else(|| {
                    raw.get("content")
                        .and_then(Value::as_object)
                        .and_then(|c| c.values().next())
                        .and_then(|m| m.get("schema"))
                        .cloned()
                })
                .unwrap_or_else(|| json!({"type": "string"})),
            SpecVersion::Swagger2 => swagger_param_schema(raw),
        };
        let required = location == ParamLocation::Path
            || raw.get("required").and_then(Value::as_bool).unwrap_or(false);
        Ok(Some(Parameter {
            name: name.to_string(),
            location,
            required,
            schema,
            description: text_field(raw, "description"),
        }))
    }

    fn form_request(&self, fields: &[(&Map<String, Value>, Value)]) -> RequestSchema {
        let mut properties = Map::new();
        let mut required = Vec::new();
        let mut has_file = false;
        for (raw, schema) in fields {
            let Some(name) = raw.get("name").and_then(Value::as_str) else {
                continue;
            };
            has_file |= raw.get("type").and_then(Value::as_str) == Some("file");
            if raw.get("required").and_then(Value::as_bool).unwrap_or(false) {
                required.push(Value::String(name.to_string()));
            }
            properties.insert(name.to_string(), schema.clone());
        }
        let multipart = has_file
            || self
                .consumes
                .as_ref()
                .is_some_and(|c| c.iter().any(|m| m.starts_with("multipart/")));
        let media_type = if multipart {
            "multipart/form-data"
        } else {
            "application/x-www-form-urlencoded"
        };
        let mut schema = json!({"type": "object", "properties": properties});
        if !required.is_empty() {
            schema["required"] = Value::Array(required.clone());
        }
        RequestSchema {
            media_type: media_type.to_string(),
            encoding: BodyEncoding::from_media_type(media_type),
            schema,
            required: !required.is_empty(),
        }
    }

    fn response(&self, resp: &Value) -> ResponseSpec {
        let description = resp
            .get("description")
            .and_then(Value::as_str)
            .map(str::to_string);
        match self.version {
            SpecVersion::OpenApi3 => {
                let content = resp.get("content").and_then(Value::as_object);
                let content_types: Vec<String> =
                    content.map(|c| c.keys().cloned().collect()).unwrap_or_default();
                let schema = content.and_then(|c| {
                    pick_media(c).and_then(|(_, media)| media.get("schema").cloned())
                });
                ResponseSpec {
                    description,
                    content_types,
                    schema,
                }
            }
            SpecVersion::Swagger2 => {
                let schema = resp.get("schema").cloned();
                let content_types = match (&schema, &self.produces) {
                    (_, Some(produces)) => produces.clone(),
                    (Some(_), None) => vec!["application/json".to_string()],
                    (None, None) => Vec::new(),
                };
                ResponseSpec {
                    description,
                    content_types,
                    schema,
                }
            }
        }
    }
}

fn openapi3_request(body: &Value) -> Option<RequestSchema> {
    let content = body.get("content").and_then(Value::as_object)?;
    let (media_type, media) = pick_media(content)?;
    Some(RequestSchema {
        encoding: BodyEncoding::from_media_type(media_type),
        media_type: media_type.clone(),
        schema: media.get("schema").cloned().unwrap_or_else(|| json!({})),
        required: body.get("required").and_then(Value::as_bool).unwrap_or(false),
    })
}

/// Preferred media type: JSON, then form, then multipart, then the first declared.
fn pick_media(content: &Map<String, Value>) -> Option<(&String, &Value)> {
    content
        .iter()
        .find(|(m, _)| is_json_media(m))
        .or_else(|| {
            content
                .iter()
                .find(|(m, _)| m.starts_with("application/x-www-form-urlencoded"))
        })
        .or_else(|| content.iter().find(|(m, _)| m.starts_with("multipart/form-data")))
        .or_else(|| content.iter().next())
}

fn is_json_media(media_type: &str) -> bool {
    let essence = media_type.split(';').next().unwrap_or_default().trim();
    essence == "application/json" || essence.ends_with("+json") || essence == "*/*"
}

fn text_field(obj: &Map<String, Value>, key: &str) -> Option<String> {
    obj.get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Swagger 2.0 non-body parameters carry their schema keywords inline.
fn swagger_param_schema(raw: &Map<String, Value>) -> Value {
    const KEYWORDS: &[&str] = &[
        "type",
        "format",
        "items",
        "enum",
        "default",
        "minimum",
        "maximum",
        "exclusiveMinimum",
        "exclusiveMaximum",
        "minLength",
        "maxLength",
        "pattern",
        "minItems",
        "maxItems",
        "example",
    ];
    if let Some(schema) = raw.get("schema") {
        return schema.clone();
    }
    let mut schema = Map::new();
    for k in KEYWORDS {
        if let Some(v) = raw.get(*k) {
            schema.insert((*k).to_string(), v.clone());
        }
    }
    if schema.get("type").and_then(Value::as_str) == Some("file") {
        schema.insert("type".into(), json!("string"));
        schema.insert("format".into(), json!("binary"));
    }
    if !schema.contains_key("type") {
        schema.insert("type".into(), json!("string"));
    }
    Value::Object(schema)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    fn petstore() -> Value {
        json!({
            "openapi": "3.0.3",
            "info": {"title": "Pets", "version": "1"},
            "paths": {
                "/pets": {
                    "get": {
                        "operationId": "listPets",
                        "parameters": [{"name": "limit", "in": "query", "schema": {"type": "integer", "maximum": 100}}],
                        "responses": {"200": {"description": "ok", "content": {"application/json": {"schema": {"type": "array", "items": {"$ref": "#/components/schemas/Pet"}}}}}}
                    },
                    "post": {
                        "requestBody": {"required": true, "content": {
                            "multipart/form-data": {"schema": {"type": "object"}},
                            "application/json": {"schema": {"$ref": "#/components/schemas/Pet"}}
                        }},
                        "responses": {"201": {"description": "created"}, "422": {"description": "bad"}}
                    }
                },
                "/pets/{petId}": {
                    "parameters": [{"name": "petId", "in": "path", "schema": {"type": "integer"}}],
                    "get": {"responses": {"200": {"description": "ok"}, "default": {"description": "err"}}},
                    "x-internal": true
                }
            },
            "components": {"schemas": {
                "Pet": {"type": "object", "required": ["id", "name"], "properties": {
                    "id": {"type": "integer"},
                    "name": {"type": "string", "minLength": 1},
                    "owner": {"$ref": "#/components/schemas/Owner"}
                }},
                "Owner": {"type": "object", "properties": {"pets": {"type": "array", "items": {"$ref": "#/components/schemas/Pet"}}}}
            }}
        })
    }

    // ═══════════════════════════════════════════
    // Text parsing
    // ═══════════════════════════════════════════

    #[test]
    fn parse_text_by_extension_and_sniffing() {
        let yaml = "openapi: '3.1.0'\ninfo:\n  title: T\n  version: '1'\n";
        assert_eq!(parse_text(Some(Path::new("spec.yml")), yaml).unwrap()["openapi"], "3.1.0");
        assert_eq!(parse_text(None, r#"{"openapi": "3.1.0"}"#).unwrap()["openapi"], "3.1.0");
        assert_eq!(parse_text(Some(Path::new("spec.txt")), yaml).unwrap()["openapi"], "3.1.0");
    }

    #[test]
    fn parse_text_errors_name_the_format() {
        let err = parse_text(Some(Path::new("spec.json")), "{ invalid json").unwrap_err();
        assert!(err.to_string().contains("Invalid JSON"));
        let err = parse_text(Some(Path::new("spec.yaml")), ":\n  :\n    - [invalid").unwrap_err();
        assert!(err.to_string().contains("Invalid YAML"));
    }

    // ═══════════════════════════════════════════
    // Extraction
    // ═══════════════════════════════════════════

    #[test]
    fn endpoints_match_path_method_pairs() {
        let doc = extract(&petstore()).unwrap();
        let got: BTreeSet<String> = doc.endpoints.iter().map(|e| e.endpoint_ref().to_string()).collect();
        let want: BTreeSet<String> = ["GET /pets", "POST /pets", "GET /pets/{petId}"]
            .into_iter()
            .map(String::from)
            .collect();
        assert_eq!(got, want);
        assert_eq!(doc.title.as_deref(), Some("Pets"));
    }

    #[test]
    fn operation_details_are_normalized() {
        let doc = extract(&petstore()).unwrap();
        let list = &doc.endpoints[0];
        assert_eq!(list.operation_id, "listPets");
        assert_eq!(list.parameters[0].location, ParamLocation::Query);

        let create = &doc.endpoints[1];
        assert_eq!(create.operation_id, "POST_/pets");
        let body = create.request_schema.as_ref().unwrap();
        assert_eq!(body.media_type, "application/json", "json preferred over multipart");
        assert!(body.required);
        assert_eq!(body.schema["required"], json!(["id", "name"]));
        assert_eq!(create.response_schemas.keys().copied().collect::<Vec<_>>(), vec![201, 422]);

        let get_one = &doc.endpoints[2];
        assert!(get_one.parameters[0].required, "path params are always required");
        assert!(!get_one.response_schemas.contains_key(&0));
    }

    #[test]
    fn recursive_schemas_get_marker_nodes() {
        let doc = extract(&petstore()).unwrap();
        let pet = &doc.schemas["Pet"];
        let inner = &pet["properties"]["owner"]["properties"]["pets"]["items"];
        assert_eq!(inner[CIRCULAR_REF_KEY], "#/components/schemas/Pet");
    }

    #[test]
    fn missing_paths_and_unknown_version_fail() {
        assert!(matches!(
            extract(&json!({"openapi": "3.0.0"})),
            Err(SpecParseError::MissingPaths)
        ));
        assert!(matches!(
            extract(&json!({"openapi": "4.0", "paths": {}})),
            Err(SpecParseError::UnknownVersion(_))
        ));
        assert!(matches!(
            extract(&json!({"paths": {}})),
            Err(SpecParseError::UnknownVersion(_))
        ));
    }

    #[test]
    fn invalid_method_key_fails() {
        let doc = json!({"openapi": "3.0.0", "paths": {"/a": {"fetch": {}}}});
        let err = extract(&doc).unwrap_err();
        assert!(matches!(err, SpecParseError::InvalidMethod { ref key, .. } if key == "fetch"));
    }

    #[test]
    fn unresolvable_and_external_refs_fail() {
        let missing = json!({"openapi": "3.0.0", "paths": {"/a": {"get": {"responses": {
            "200": {"content": {"application/json": {"schema": {"$ref": "#/components/schemas/Nope"}}}}
        }}}}});
        let err = extract(&missing).unwrap_err();
        assert!(err.to_string().contains("#/components/schemas/Nope"), "{err}");

        let external = json!({"openapi": "3.0.0", "paths": {"/a": {"get": {"responses": {
            "200": {"content": {"application/json": {"schema": {"$ref": "other.yaml#/Pet"}}}}
        }}}}});
        assert!(matches!(extract(&external), Err(SpecParseError::UnresolvableRef { .. })));
    }

    /// `S0.child: [S1]`, `S1.child: [S2]`, ... ending in a plain string.
    fn linear_chain(n: usize) -> Value {
        let mut schemas = Map::new();
        for i in 0..n {
            schemas.insert(
                format!("S{i}"),
                json!({"type": "object", "properties": {
                    "child": {"type": "array", "items": {"$ref": format!("#/components/schemas/S{}", i + 1)}}
                }}),
            );
        }
        schemas.insert(format!("S{n}"), json!({"type": "string"}));
        json!({"openapi": "3.0.0", "components": {"schemas": schemas}, "paths": {"/a": {"get": {"responses": {
            "200": {"content": {"application/json": {"schema": {"$ref": "#/components/schemas/S0"}}}}
        }}}}})
    }

    #[test]
    fn long_acyclic_ref_chain_resolves() {
        let doc = linear_chain(30);
        let parsed = extract(&doc).unwrap();
        let mut schema = parsed.endpoints[0].response_schemas[&200].schema.clone().unwrap();
        let mut levels = 0;
        while let Some(next) = schema.pointer("/properties/child/items").cloned() {
            schema = next;
            levels += 1;
        }
        assert_eq!(levels, 30);
        assert_eq!(schema, json!({"type": "string"}));
    }

    #[test]
    fn ref_chain_beyond_limit_fails() {
        let doc = linear_chain(MAX_REF_DEPTH + 5);
        assert!(matches!(extract(&doc), Err(SpecParseError::TooDeep { .. })));
    }

    #[test]
    fn excessive_nesting_fails() {
        let mut schema = json!({"type": "string"});
        for _ in 0..300 {
            schema = json!({"type": "object", "properties": {"n": schema}});
        }
        let doc = json!({"openapi": "3.0.0", "paths": {"/a": {"post": {
            "requestBody": {"content": {"application/json": {"schema": schema}}},
            "responses": {}
        }}}});
        assert!(matches!(extract(&doc), Err(SpecParseError::NestingTooDeep { .. })));
    }

    #[test]
    fn resolver_memoizes_targets() {
        let root = petstore();
        let mut r = Resolver::new(&root);
        let a = r.resolve(&json!({"$ref": "#/components/schemas/Owner"}), "t").unwrap();
        let count = r.resolved_count();
        let b = r.resolve(&json!({"$ref": "#/components/schemas/Owner"}), "t").unwrap();
        assert_eq!(a, b);
        assert_eq!(r.resolved_count(), count);
    }

    // ═══════════════════════════════════════════
    // Swagger 2.0 normalization
    // ═══════════════════════════════════════════

    #[test]
    fn swagger2_body_form_and_produces() {
        let doc = json!({
            "swagger": "2.0",
            "produces": ["application/json"],
            "paths": {
                "/users": {"post": {
                    "consumes": ["application/json"],
                    "parameters": [{"name": "user", "in": "body", "required": true, "schema": {"$ref": "#/definitions/User"}}],
                    "responses": {"201": {"description": "ok", "schema": {"$ref": "#/definitions/User"}}}
                }},
                "/upload": {"post": {
                    "parameters": [
                        {"name": "title", "in": "formData", "type": "string", "required": true},
                        {"name": "file", "in": "formData", "type": "file"}
                    ],
                    "responses": {"200": {"description": "ok"}}
                }},
                "/search": {"get": {
                    "parameters": [{"name": "q", "in": "query", "type": "string", "maxLength": 10, "required": true}],
                    "responses": {"200": {"description": "ok"}}
                }}
            },
            "definitions": {"User": {"type": "object", "required": ["email"], "properties": {"email": {"type": "string", "format": "email"}}}}
        });
        let parsed = extract(&doc).unwrap();
        assert_eq!(parsed.version, SpecVersion::Swagger2);

        let by_path = |path: &str| parsed.endpoints.iter().find(|e| e.path == path).unwrap();
        let users = by_path("/users");
        let body = users.request_schema.as_ref().unwrap();
        assert_eq!(body.encoding, BodyEncoding::Json);
        assert_eq!(body.schema["required"], json!(["email"]));
        let created = &users.response_schemas[&201];
        assert_eq!(created.content_types, vec!["application/json"]);
        assert!(created.schema.is_some());

        let upload = by_path("/upload").request_schema.as_ref().unwrap();
        assert_eq!(upload.encoding, BodyEncoding::Multipart);
        assert_eq!(upload.schema["properties"]["file"]["format"], "binary");
        assert_eq!(upload.schema["required"], json!(["title"]));

        let q = &by_path("/search").parameters[0];
        assert_eq!(q.schema, json!({"type": "string", "maxLength": 10}));
        assert!(q.required);
        assert!(parsed.schemas.contains_key("User"));
    }

    #[test]
    fn yaml_swagger_version_as_number() {
        let yaml = "swagger: 2.0\npaths: {}\n";
        let doc = load(None, yaml).unwrap();
        assert_eq!(doc.version, SpecVersion::Swagger2);
        assert!(doc.endpoints.is_empty());
    }
}

//! Normalized API operations extracted from a spec

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// HTTP method of an operation.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema,
)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Patch,
    Delete,
    Head,
    Options,
    Trace,
}

impl HttpMethod {
    /// All methods in the order operations are extracted from a path item.
    pub const ALL: [Self; 8] = [
        Self::Get,
        Self::Post,
        Self::Put,
        Self::Patch,
        Self::Delete,
        Self::Head,
        Self::Options,
        Self::Trace,
    ];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Patch => "PATCH",
            Self::Delete => "DELETE",
            Self::Head => "HEAD",
            Self::Options => "OPTIONS",
            Self::Trace => "TRACE",
        }
    }

    /// Map a lowercase path-item key (`get`, `post`, ...) to a method.
    #[must_use]
    pub fn from_path_item_key(key: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|m| m.as_str().eq_ignore_ascii_case(key) && key == key.to_ascii_lowercase())
    }

    /// Whether requests with this method carry their payload as a body
    /// (as opposed to query parameters).
    #[must_use]
    pub const fn sends_body(self) -> bool {
        matches!(self, Self::Post | Self::Put | Self::Patch)
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HttpMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|m| m.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown HTTP method '{s}'"))
    }
}

/// `(method, path)` identity of an endpoint within a project.
#[derive(
    Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema,
)]
pub struct EndpointRef {
    pub method: HttpMethod,
    pub path: String,
}

impl EndpointRef {
    pub fn new(method: HttpMethod, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
        }
    }
}

impl fmt::Display for EndpointRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.method, self.path)
    }
}

/// Parses labels of the form `"GET /users/{id}"`.
impl FromStr for EndpointRef {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (method, path) = s
            .trim()
            .split_once(char::is_whitespace)
            .ok_or_else(|| format!("expected 'METHOD /path', got '{s}'"))?;
        let path = path.trim();
        if !path.starts_with('/') {
            return Err(format!("path must start with '/': '{path}'"));
        }
        Ok(Self::new(method.parse()?, path))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ParamLocation {
    Path,
    Query,
    Header,
    Cookie,
}

/// A single operation parameter with its (resolved) schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Parameter {
    pub name: String,
    #[serde(rename = "in")]
    pub location: ParamLocation,
    #[serde(default)]
    pub required: bool,
    pub schema: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// How a request body is encoded on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum BodyEncoding {
    Json,
    FormUrlencoded,
    Multipart,
}

impl BodyEncoding {
    /// Classify a media type; anything that is not form or multipart is sent as JSON.
    #[must_use]
    pub fn from_media_type(media_type: &str) -> Self {
        let essence = media_type
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();
        match essence.as_str() {
            "application/x-www-form-urlencoded" => Self::FormUrlencoded,
            "multipart/form-data" => Self::Multipart,
            _ => Self::Json,
        }
    }
}

/// Request body declaration of an operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct RequestSchema {
    pub media_type: String,
    pub encoding: BodyEncoding,
    pub schema: Value,
    #[serde(default)]
    pub required: bool,
}

/// One declared response of an operation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ResponseSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub content_types: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema: Option<Value>,
}

/// A normalized, fully dereferenced API operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Endpoint {
    pub path: String,
    pub method: HttpMethod,
    pub operation_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(default)]
    pub parameters: Vec<Parameter>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_schema: Option<RequestSchema>,
    /// Declared responses keyed by numeric status code.
    #[serde(default)]
    pub response_schemas: BTreeMap<u16, ResponseSpec>,
}

impl Endpoint {
    /// Minimal endpoint with a generated operation id.
    pub fn new(method: HttpMethod, path: impl Into<String>) -> Self {
        let path = path.into();
        Self {
            operation_id: default_operation_id(method, &path),
            path,
            method,
            summary: None,
            description: None,
            tags: Vec::new(),
            parameters: Vec::new(),
            request_schema: None,
            response_schemas: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn endpoint_ref(&self) -> EndpointRef {
        EndpointRef::new(self.method, self.path.clone())
    }

    /// Declared 2xx statuses, or the conventional default for the method.
    #[must_use]
    pub fn success_statuses(&self) -> Vec<u16> {
        let declared: Vec<u16> = self
            .response_schemas
            .keys()
            .copied()
            .filter(|code| (200..300).contains(code))
            .collect();
        if !declared.is_empty() {
            return declared;
        }
        match self.method {
            HttpMethod::Post => vec![200, 201],
            HttpMethod::Delete => vec![200, 204],
            _ => vec![200],
        }
    }

    /// Declared 4xx statuses.
    #[must_use]
    pub fn client_error_statuses(&self) -> Vec<u16> {
        self.response_schemas
            .keys()
            .copied()
            .filter(|code| (400..500).contains(code))
            .collect()
    }

    /// Declared 4xx statuses that overlap `candidates`, else `candidates`.
    #[must_use]
    pub fn rejection_statuses(&self, candidates: &[u16]) -> Vec<u16> {
        let declared: Vec<u16> = self
            .client_error_statuses()
            .into_iter()
            .filter(|code| candidates.contains(code))
            .collect();
        if declared.is_empty() {
            candidates.to_vec()
        } else {
            declared
        }
    }

    /// Schema of the first success status that declares one.
    #[must_use]
    pub fn success_schema(&self) -> Option<&Value> {
        self.success_statuses()
            .into_iter()
            .find_map(|code| self.response_schemas.get(&code)?.schema.as_ref())
    }

    pub fn params_in(&self, location: ParamLocation) -> impl Iterator<Item = &Parameter> {
        self.parameters
            .iter()
            .filter(move |p| p.location == location)
    }
}

/// `"GET_/users/{id}"` style identifier used when a spec omits `operationId`.
#[must_use]
pub fn default_operation_id(method: HttpMethod, path: &str) -> String {
    format!("{method}_{path}")
}

/// Outcome of merging endpoints from a second source into a project.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeOutcome {
    pub added: Vec<EndpointRef>,
    pub skipped: Vec<EndpointRef>,
}

/// Append endpoints whose `(method, path)` is not yet present.
///
/// Existing endpoints are never overwritten; duplicates are reported in `skipped`.
pub fn merge_endpoints(existing: &mut Vec<Endpoint>, incoming: Vec<Endpoint>) -> MergeOutcome {
    let mut known: BTreeSet<EndpointRef> = existing.iter().map(Endpoint::endpoint_ref).collect();
    let mut outcome = MergeOutcome::default();
    for endpoint in incoming {
        let key = endpoint.endpoint_ref();
        if known.insert(key.clone()) {
            outcome.added.push(key);
            existing.push(endpoint);
        } else {
            outcome.skipped.push(key);
        }
    }
    outcome
}

//! Test cases and the declarative assertions they carry

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::endpoint::{EndpointRef, HttpMethod};

/// Category a generated test case belongs to.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum TestCategory {
    HappyPath,
    Negative,
    Boundary,
    Validation,
    Security,
    Performance,
}

impl TestCategory {
    pub const ALL: [Self; 6] = [
        Self::HappyPath,
        Self::Negative,
        Self::Boundary,
        Self::Validation,
        Self::Security,
        Self::Performance,
    ];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::HappyPath => "happy_path",
            Self::Negative => "negative",
            Self::Boundary => "boundary",
            Self::Validation => "validation",
            Self::Security => "security",
            Self::Performance => "performance",
        }
    }
}

impl fmt::Display for TestCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TestCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace('-', "_");
        Self::ALL
            .into_iter()
            .find(|c| c.as_str() == normalized)
            .ok_or_else(|| format!("unknown test type '{s}'"))
    }
}

/// What part of the response an assertion inspects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum AssertionType {
    StatusCode,
    ResponseBody,
    ResponseHeader,
    ResponseTime,
    Custom,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum Condition {
    Equals,
    NotEquals,
    Contains,
    NotContains,
    GreaterThan,
    LessThan,
    Matches,
    Exists,
    NotExists,
}

impl Condition {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Equals => "equals",
            Self::NotEquals => "not_equals",
            Self::Contains => "contains",
            Self::NotContains => "not_contains",
            Self::GreaterThan => "greater_than",
            Self::LessThan => "less_than",
            Self::Matches => "matches",
            Self::Exists => "exists",
            Self::NotExists => "not_exists",
        }
    }

    /// Conditions that do not compare against an expected value.
    #[must_use]
    pub const fn is_unary(self) -> bool {
        matches!(self, Self::Exists | Self::NotExists)
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single declarative check against a response.
///
/// Generated with defaults, then freely editable; edits are never
/// overwritten by later generation runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Assertion {
    #[serde(rename = "type")]
    pub kind: AssertionType,
    pub condition: Condition,
    /// Dot path into the JSON body, or a header name for header assertions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_value: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl Assertion {
    pub fn new(kind: AssertionType, condition: Condition) -> Self {
        Self {
            kind,
            condition,
            field: None,
            expected_value: None,
            description: None,
        }
    }

    /// Status code must be one of `statuses`.
    pub fn status_in(statuses: &[u16]) -> Self {
        Self::new(AssertionType::StatusCode, Condition::Equals)
            .with_expected(Value::from(statuses.to_vec()))
            .with_description(format!("status code is one of {statuses:?}"))
    }

    /// Status code compared with a single number (e.g. `less_than 500`).
    pub fn status(condition: Condition, code: u16) -> Self {
        Self::new(AssertionType::StatusCode, condition).with_expected(Value::from(code))
    }

    pub fn body(field: Option<&str>, condition: Condition) -> Self {
        let mut a = Self::new(AssertionType::ResponseBody, condition);
        a.field = field.map(str::to_string);
        a
    }

    pub fn header(name: &str, condition: Condition) -> Self {
        let mut a = Self::new(AssertionType::ResponseHeader, condition);
        a.field = Some(name.to_string());
        a
    }

    /// Response must arrive within `seconds`.
    pub fn response_time_under(seconds: f64) -> Self {
        Self::new(AssertionType::ResponseTime, Condition::LessThan)
            .with_expected(Value::from(seconds))
            .with_description(format!("response time under {seconds}s"))
    }

    /// Addressed value (whole body when `field` is `None`) must validate against `schema`.
    pub fn conforms_to(field: Option<&str>, schema: Value) -> Self {
        let mut a = Self::new(AssertionType::Custom, Condition::Matches).with_expected(schema);
        a.field = field.map(str::to_string);
        a
    }

    #[must_use]
    pub fn with_expected(mut self, value: Value) -> Self {
        self.expected_value = Some(value);
        self
    }

    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// A part of a multipart body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "part", rename_all = "snake_case")]
pub enum MultipartField {
    Text {
        name: String,
        value: String,
    },
    File {
        name: String,
        file_name: String,
        content_type: String,
        content: String,
    },
}

impl MultipartField {
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Text { name, .. } | Self::File { name, .. } => name,
        }
    }
}

/// Request body of a test case, discriminated by wire encoding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum Payload {
    Json(Value),
    FormUrlencoded(BTreeMap<String, Value>),
    Multipart(Vec<MultipartField>),
}

impl Payload {
    /// JSON view of the payload for traces and exports.
    #[must_use]
    pub fn to_json(&self) -> Value {
        match self {
            Self::Json(v) => v.clone(),
            Self::FormUrlencoded(fields) => {
                Value::Object(fields.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
            }
            Self::Multipart(parts) => Value::Object(
                parts
                    .iter()
                    .map(|p| {
                        let v = match p {
                            MultipartField::Text { value, .. } => Value::String(value.clone()),
                            MultipartField::File { file_name, .. } => {
                                Value::String(format!("@{file_name}"))
                            }
                        };
                        (p.name().to_string(), v)
                    })
                    .collect(),
            ),
        }
    }

    #[must_use]
    pub const fn content_type(&self) -> &'static str {
        match self {
            Self::Json(_) => "application/json",
            Self::FormUrlencoded(_) => "application/x-www-form-urlencoded",
            Self::Multipart(_) => "multipart/form-data",
        }
    }
}

/// One concrete, executable scenario derived from an endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct TestCase {
    /// Unique within the suite; never reused after deletion.
    pub index: u64,
    #[serde(rename = "type")]
    pub category: TestCategory,
    pub name: String,
    pub endpoint: EndpointRef,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Sends the request with this method instead of the endpoint's own.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method_override: Option<HttpMethod>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub path_params: BTreeMap<String, Value>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub query: BTreeMap<String, Value>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Payload>,
    pub expected_status: Vec<u16>,
    #[serde(default)]
    pub assertions: Vec<Assertion>,
}

impl TestCase {
    /// Case without request data; the generator fills in the rest.
    pub fn new(
        category: TestCategory,
        name: impl Into<String>,
        endpoint: EndpointRef,
        expected_status: Vec<u16>,
    ) -> Self {
        Self {
            index: 0,
            category,
            name: name.into(),
            endpoint,
            description: None,
            method_override: None,
            path_params: BTreeMap::new(),
            query: BTreeMap::new(),
            headers: BTreeMap::new(),
            payload: None,
            expected_status,
            assertions: Vec::new(),
        }
    }

    /// Method actually sent on the wire.
    #[must_use]
    pub fn request_method(&self) -> HttpMethod {
        self.method_override.unwrap_or(self.endpoint.method)
    }

    /// Endpoint path with path parameters substituted and percent-encoded.
    ///
    /// Placeholders without a value are left as written.
    #[must_use]
    pub fn render_path(&self) -> String {
        let mut base = match url::Url::parse("http://render.invalid/") {
            Ok(u) => u,
            Err(_) => return self.endpoint.path.clone(),
        };
        {
            let Ok(mut segments) = base.path_segments_mut() else {
                return self.endpoint.path.clone();
            };
            segments.clear();
            for segment in self.endpoint.path.trim_start_matches('/').split('/') {
                let mut rendered = segment.to_string();
                for (name, value) in &self.path_params {
                    rendered = rendered.replace(&format!("{{{name}}}"), &param_text(value));
                }
                segments.push(&rendered);
            }
        }
        base.path().replace("%7B", "{").replace("%7D", "}")
    }

    /// Query parameters as `(name, text)` pairs; arrays repeat the name.
    #[must_use]
    pub fn query_pairs(&self) -> Vec<(String, String)> {
        let mut pairs = Vec::new();
        for (name, value) in &self.query {
            match value {
                Value::Array(items) => {
                    pairs.extend(items.iter().map(|v| (name.clone(), param_text(v))));
                }
                Value::Null => {}
                other => pairs.push((name.clone(), param_text(other))),
            }
        }
        pairs
    }

    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    #[must_use]
    pub fn with_payload(mut self, payload: Option<Payload>) -> Self {
        self.payload = payload;
        self
    }

    #[must_use]
    pub fn with_assertions(mut self, assertions: Vec<Assertion>) -> Self {
        self.assertions = assertions;
        self
    }
}

/// Text form of a parameter value: strings verbatim, everything else as JSON.
#[must_use]
pub fn param_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

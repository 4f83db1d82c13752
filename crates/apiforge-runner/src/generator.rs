//! Test case generation: endpoints + schema analysis → indexed test cases
//!
//! Each endpoint starts from a baseline request built from valid values;
//! every category then derives variants by overriding single parameters or
//! body properties. Failures are per endpoint and never abort the batch.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use serde_json::{Map, Value, json};
use tracing::{debug, warn};

use apiforge_core::model::{
    Assertion, BodyEncoding, Condition, Endpoint, EndpointRef, HttpMethod, MultipartField,
    ParamLocation, Payload, RequestSchema, TestCase, TestCategory, TestSuite, param_text,
};

use crate::analyzer::{InvalidKind, SchemaAnalyzer, SchemaError, flatten, schema_type};

/// Status codes for requests the API should reject as invalid.
const INVALID_INPUT: [u16; 2] = [400, 422];
const WRONG_METHOD: [u16; 2] = [404, 405];
const INVALID_PATH_PARAM: [u16; 3] = [400, 404, 422];
const INJECTION: [u16; 3] = [400, 403, 422];
const TRAVERSAL: [u16; 3] = [400, 403, 404];

pub const SQL_INJECTION_PAYLOADS: [&str; 3] = [
    "' OR '1'='1",
    "'; DROP TABLE users; --",
    "1' UNION SELECT * FROM users--",
];
pub const XSS_PAYLOADS: [&str; 2] = [
    "<script>alert('XSS')</script>",
    "<img src=x onerror=alert('XSS')>",
];
pub const PATH_TRAVERSAL_PAYLOAD: &str = "../../../etc/passwd";

/// Response time limits in seconds.
const NORMAL_LOAD_LIMIT: f64 = 2.0;
const LARGE_PAYLOAD_LIMIT: f64 = 5.0;

#[derive(Debug, Clone)]
pub struct GenerateOptions {
    pub categories: BTreeSet<TestCategory>,
    /// Restrict generation to these endpoints.
    pub endpoints: Option<Vec<EndpointRef>>,
    pub seed: u64,
}

impl Default for GenerateOptions {
    fn default() -> Self {
        Self {
            categories: TestCategory::ALL.into_iter().collect(),
            endpoints: None,
            seed: 42,
        }
    }
}

/// One endpoint (or contributor) skipped during generation.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct GenerationWarning {
    pub endpoint: EndpointRef,
    pub message: String,
}

#[derive(Debug, Clone, Default)]
pub struct Generation {
    /// New cases, numbered from the suite's next index.
    pub cases: Vec<TestCase>,
    pub warnings: Vec<GenerationWarning>,
    /// Endpoints skipped because the suite already has cases for them.
    pub skipped_existing: Vec<EndpointRef>,
}

#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct ContributorError(pub String);

/// Extra source of test cases for an endpoint, such as an LLM augmenter.
///
/// Contributed indices are ignored; the generator numbers every case.
pub trait CaseContributor: Send + Sync {
    fn name(&self) -> &str;
    fn contribute(&self, endpoint: &Endpoint) -> Result<Vec<TestCase>, ContributorError>;
}

pub struct Generator {
    analyzer: SchemaAnalyzer,
    options: GenerateOptions,
    contributors: Vec<Arc<dyn CaseContributor>>,
}

impl Generator {
    #[must_use]
    pub fn new(options: GenerateOptions) -> Self {
        Self {
            analyzer: SchemaAnalyzer::new(options.seed),
            options,
            contributors: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_contributor(mut self, contributor: Arc<dyn CaseContributor>) -> Self {
        self.contributors.push(contributor);
        self
    }

    /// Generate cases for every endpoint not yet covered by `suite`.
    pub fn generate(&self, endpoints: &[Endpoint], suite: &TestSuite) -> Generation {
        let existing = suite.generated_endpoints();
        let mut out = Generation::default();

        for endpoint in endpoints {
            let key = endpoint.endpoint_ref();
            if let Some(selected) = &self.options.endpoints {
                if !selected.contains(&key) {
                    continue;
                }
            }
            if existing.contains(&key) {
                out.skipped_existing.push(key);
                continue;
            }

            let siblings: BTreeSet<HttpMethod> = endpoints
                .iter()
                .filter(|e| e.path == endpoint.path)
                .map(|e| e.method)
                .collect();
            match self.cases_for(endpoint, &siblings) {
                Ok(cases) => {
                    debug!(endpoint = %key, count = cases.len(), "generated cases");
                    out.cases.extend(cases);
                }
                Err(e) => {
                    warn!(endpoint = %key, error = %e, "skipping endpoint");
                    out.warnings.push(GenerationWarning {
                        endpoint: key.clone(),
                        message: e.to_string(),
                    });
                    continue;
                }
            }

            for contributor in &self.contributors {
                match contributor.contribute(endpoint) {
                    Ok(cases) => {
                        let (kept, dropped): (Vec<_>, Vec<_>) =
                            cases.into_iter().partition(|c| !c.expected_status.is_empty());
                        if !dropped.is_empty() {
                            out.warnings.push(GenerationWarning {
                                endpoint: key.clone(),
                                message: format!(
                                    "{}: dropped {} case(s) without expected status",
                                    contributor.name(),
                                    dropped.len()
                                ),
                            });
                        }
                        out.cases.extend(kept.into_iter().map(|mut c| {
                            c.endpoint = key.clone();
                            c
                        }));
                    }
                    Err(e) => out.warnings.push(GenerationWarning {
                        endpoint: key.clone(),
                        message: format!("{}: {e}", contributor.name()),
                    }),
                }
            }
        }

        for (offset, case) in out.cases.iter_mut().enumerate() {
            case.index = suite.next_index + offset as u64;
        }
        out
    }

    /// All built-in categories for one endpoint.
    pub fn cases_for(
        &self,
        endpoint: &Endpoint,
        siblings: &BTreeSet<HttpMethod>,
    ) -> Result<Vec<TestCase>, SchemaError> {
        let base = self.baseline(endpoint)?;
        let mut cases = Vec::new();
        let wants = |c: TestCategory| self.options.categories.contains(&c);

        if wants(TestCategory::HappyPath) {
            cases.push(self.happy_path(endpoint, &base)?);
        }
        if wants(TestCategory::Negative) {
            cases.extend(self.negative(endpoint, &base, siblings)?);
        }
        if wants(TestCategory::Boundary) {
            cases.extend(self.boundary(endpoint, &base)?);
        }
        if wants(TestCategory::Validation) {
            cases.extend(self.validation(endpoint, &base)?);
        }
        if wants(TestCategory::Security) {
            cases.extend(self.security(endpoint, &base));
        }
        if wants(TestCategory::Performance) {
            cases.extend(self.performance(endpoint, &base)?);
        }
        Ok(cases)
    }

    // ── Baseline ──

    fn baseline(&self, endpoint: &Endpoint) -> Result<Request, SchemaError> {
        let mut req = Request::default();
        let mut cookies = Vec::new();
        for p in &endpoint.parameters {
            if !p.required && p.location != ParamLocation::Path {
                continue;
            }
            let value = self.analyzer.valid_value(&p.schema)?;
            match p.location {
                ParamLocation::Path => {
                    req.path_params.insert(p.name.clone(), value);
                }
                ParamLocation::Query => {
                    req.query.insert(p.name.clone(), value);
                }
                ParamLocation::Header => {
                    req.headers.insert(p.name.clone(), param_text(&value));
                }
                ParamLocation::Cookie => cookies.push(format!("{}={}", p.name, param_text(&value))),
            }
        }
        if !cookies.is_empty() {
            req.headers.insert("Cookie".into(), cookies.join("; "));
        }
        if let Some(body) = &endpoint.request_schema {
            let value = if is_unconstrained(&body.schema) {
                json!({})
            } else {
                self.analyzer.valid_value(&body.schema)?
            };
            req.body = Some(value);
        }
        Ok(req)
    }

    fn success_assertions(&self, endpoint: &Endpoint) -> Result<Vec<Assertion>, SchemaError> {
        self.analyzer
            .response_assertions(&endpoint.success_statuses(), endpoint.success_schema())
    }

    // ── Categories ──

    fn happy_path(&self, endpoint: &Endpoint, base: &Request) -> Result<TestCase, SchemaError> {
        Ok(base
            .to_case(
                endpoint,
                TestCategory::HappyPath,
                format!("{}: valid request", endpoint.operation_id),
                endpoint.success_statuses(),
            )
            .with_description("All required inputs carry schema-valid values")
            .with_assertions(self.success_assertions(endpoint)?))
    }

    fn negative(
        &self,
        endpoint: &Endpoint,
        base: &Request,
        siblings: &BTreeSet<HttpMethod>,
    ) -> Result<Vec<TestCase>, SchemaError> {
        let op = &endpoint.operation_id;
        let rejected = endpoint.rejection_statuses(&INVALID_INPUT);
        let mut cases = Vec::new();

        let alternatives = if endpoint.method == HttpMethod::Get {
            vec![HttpMethod::Post, HttpMethod::Put, HttpMethod::Patch, HttpMethod::Delete]
        } else {
            vec![HttpMethod::Get, HttpMethod::Post, HttpMethod::Put, HttpMethod::Delete]
        };
        if let Some(wrong) = alternatives.into_iter().find(|m| !siblings.contains(m)) {
            let mut req = base.clone();
            req.body = None;
            let mut case = req.to_case(
                endpoint,
                TestCategory::Negative,
                format!("{op}: unsupported method {wrong}"),
                WRONG_METHOD.to_vec(),
            );
            case.method_override = Some(wrong);
            cases.push(
                case.with_description(format!("{wrong} is not declared for {}", endpoint.path))
                    .with_assertions(vec![Assertion::status_in(&WRONG_METHOD)]),
            );
        }

        for p in endpoint.params_in(ParamLocation::Path) {
            let ty = schema_type(&flatten(&p.schema, 0)).unwrap_or("string").to_string();
            let invalid = if matches!(ty.as_str(), "integer" | "number") {
                json!("invalid_value")
            } else {
                json!("nonexistent-00000000")
            };
            let mut req = base.clone();
            req.path_params.insert(p.name.clone(), invalid);
            let expected = endpoint.rejection_statuses(&INVALID_PATH_PARAM);
            cases.push(
                req.to_case(
                    endpoint,
                    TestCategory::Negative,
                    format!("{op}: invalid path parameter '{}'", p.name),
                    expected.clone(),
                )
                .with_description(format!("'{}' does not identify an existing {ty} resource", p.name))
                .with_assertions(vec![Assertion::status_in(&expected)]),
            );
        }

        for p in endpoint.params_in(ParamLocation::Query).filter(|p| p.required) {
            let mut req = base.clone();
            req.query.remove(&p.name);
            cases.push(
                req.to_case(
                    endpoint,
                    TestCategory::Negative,
                    format!("{op}: missing required query parameter '{}'", p.name),
                    rejected.clone(),
                )
                .with_assertions(vec![Assertion::status_in(&rejected)]),
            );
        }

        if let Some(body) = &endpoint.request_schema {
            for invalid in self.analyzer.invalid_values(&body.schema)? {
                if invalid.kind != InvalidKind::MissingRequired {
                    continue;
                }
                let Some(req) = base.with_body(body, invalid.value) else {
                    continue;
                };
                cases.push(
                    req.to_case(
                        endpoint,
                        TestCategory::Negative,
                        format!("{op}: {}", invalid.label),
                        rejected.clone(),
                    )
                    .with_assertions(vec![Assertion::status_in(&rejected)]),
                );
            }

            let has_required = !crate::analyzer::required_names(&flatten(&body.schema, 0)).is_empty();
            if body.required || has_required {
                if let Some(req) = base.with_body(body, json!({})) {
                    cases.push(
                        req.to_case(
                            endpoint,
                            TestCategory::Negative,
                            format!("{op}: empty body"),
                            rejected.clone(),
                        )
                        .with_description("Body carries none of the required fields")
                        .with_assertions(vec![Assertion::status_in(&rejected)]),
                    );
                }
            }
        }
        Ok(cases)
    }

    fn boundary(&self, endpoint: &Endpoint, base: &Request) -> Result<Vec<TestCase>, SchemaError> {
        let op = &endpoint.operation_id;
        let rejected = endpoint.rejection_statuses(&INVALID_INPUT);
        let mut cases = Vec::new();

        for (target, schema) in targets(endpoint) {
            for b in self.analyzer.boundary_values(&schema)? {
                let Some(req) = base.with_override(endpoint, &target, b.value) else {
                    continue;
                };
                let (expected, assertions) = if b.valid {
                    (endpoint.success_statuses(), self.success_assertions(endpoint)?)
                } else {
                    (rejected.clone(), vec![Assertion::status_in(&rejected)])
                };
                let verdict = if b.valid { "accepted" } else { "rejected" };
                cases.push(
                    req.to_case(
                        endpoint,
                        TestCategory::Boundary,
                        format!("{op}: {} at {}", target.name(), b.label),
                        expected,
                    )
                    .with_description(format!("{} at {} should be {verdict}", target.name(), b.label))
                    .with_assertions(assertions),
                );
            }
        }
        Ok(cases)
    }

    fn validation(&self, endpoint: &Endpoint, base: &Request) -> Result<Vec<TestCase>, SchemaError> {
        let op = &endpoint.operation_id;
        let rejected = endpoint.rejection_statuses(&INVALID_INPUT);
        let mut cases = Vec::new();
        let mut push = |req: Request, label: String| {
            cases.push(
                req.to_case(endpoint, TestCategory::Validation, format!("{op}: {label}"), rejected.clone())
                    .with_assertions(vec![Assertion::status_in(&rejected)]),
            );
        };

        for p in endpoint.params_in(ParamLocation::Query) {
            let invalid = self.analyzer.invalid_values(&p.schema)?;
            let Some(mismatch) = invalid
                .into_iter()
                .find(|v| v.field.is_none() && v.holds_as_text())
            else {
                continue;
            };
            let mut req = base.clone();
            req.query.insert(p.name.clone(), mismatch.value);
            push(req, format!("query parameter '{}' as {}", p.name, mismatch.label));
        }

        if let Some(body) = &endpoint.request_schema {
            for invalid in self.analyzer.invalid_values(&body.schema)? {
                if invalid.kind != InvalidKind::TypeMismatch {
                    continue;
                }
                if body.encoding != BodyEncoding::Json && !invalid.holds_as_text() {
                    continue;
                }
                if let Some(req) = base.with_body(body, invalid.value) {
                    push(req, format!("body {}", invalid.label));
                }
            }
        }
        Ok(cases)
    }

    fn security(&self, endpoint: &Endpoint, base: &Request) -> Vec<TestCase> {
        let op = &endpoint.operation_id;
        let expected = endpoint.rejection_statuses(&INJECTION);
        let mut cases = Vec::new();

        let string_targets: Vec<Target> = targets(endpoint)
            .into_iter()
            .filter(|(t, schema)| {
                !matches!(t, Target::Param(ParamLocation::Path, _))
                    && schema_type(schema) == Some("string")
            })
            .map(|(t, _)| t)
            .collect();

        if !string_targets.is_empty() {
            let attacks = SQL_INJECTION_PAYLOADS
                .iter()
                .map(|p| ("SQL injection", *p))
                .chain(XSS_PAYLOADS.iter().map(|p| ("XSS", *p)));
            for (kind, payload) in attacks {
                let mut req = Some(base.clone());
                for target in &string_targets {
                    req = req.and_then(|r| r.with_override(endpoint, target, json!(payload)));
                }
                let Some(req) = req else {
                    continue;
                };
                let mut assertions = vec![
                    Assertion::status(Condition::LessThan, 500)
                        .with_description("injected input does not cause a server error"),
                ];
                if kind == "XSS" {
                    assertions.push(
                        Assertion::body(None, Condition::NotContains)
                            .with_expected(json!(payload))
                            .with_description("injected script is not echoed back"),
                    );
                }
                cases.push(
                    req.to_case(
                        endpoint,
                        TestCategory::Security,
                        format!("{op}: {kind} {payload}"),
                        expected.clone(),
                    )
                    .with_description(format!("{kind} payload in every string input"))
                    .with_assertions(assertions),
                );
            }
        }

        let path_params: Vec<&str> = endpoint
            .params_in(ParamLocation::Path)
            .map(|p| p.name.as_str())
            .collect();
        if !path_params.is_empty() {
            let mut req = base.clone();
            for name in path_params {
                req.path_params.insert(name.to_string(), json!(PATH_TRAVERSAL_PAYLOAD));
            }
            let expected = endpoint.rejection_statuses(&TRAVERSAL);
            cases.push(
                req.to_case(
                    endpoint,
                    TestCategory::Security,
                    format!("{op}: path traversal"),
                    expected,
                )
                .with_description("Path parameters carry a directory traversal sequence")
                .with_assertions(vec![
                    Assertion::status(Condition::LessThan, 500)
                        .with_description("traversal does not cause a server error"),
                    Assertion::body(None, Condition::NotContains)
                        .with_expected(json!("root:x:0:0"))
                        .with_description("response does not leak /etc/passwd"),
                ]),
            );
        }
        cases
    }

    fn performance(&self, endpoint: &Endpoint, base: &Request) -> Result<Vec<TestCase>, SchemaError> {
        let op = &endpoint.operation_id;
        let mut cases = Vec::new();

        let mut assertions = self.success_assertions(endpoint)?;
        assertions.push(Assertion::response_time_under(NORMAL_LOAD_LIMIT));
        cases.push(
            base.to_case(
                endpoint,
                TestCategory::Performance,
                format!("{op}: response time"),
                endpoint.success_statuses(),
            )
            .with_description(format!("Responds within {NORMAL_LOAD_LIMIT}s under normal load"))
            .with_assertions(assertions),
        );

        if let Some(body) = &endpoint.request_schema {
            if endpoint.method.sends_body() && !is_unconstrained(&body.schema) {
                let large = self.analyzer.large_value(&body.schema)?;
                if let Some(req) = base.with_body(body, large) {
                    let expected = endpoint.success_statuses();
                    cases.push(
                        req.to_case(endpoint, TestCategory::Performance, format!("{op}: large payload"), expected.clone())
                            .with_description(format!("Handles a large body within {LARGE_PAYLOAD_LIMIT}s"))
                            .with_assertions(vec![
                                Assertion::status_in(&expected),
                                Assertion::response_time_under(LARGE_PAYLOAD_LIMIT),
                            ]),
                    );
                }
            }
        }
        Ok(cases)
    }
}

// ── Request template ──

/// Input addressed by a boundary or injection override.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Target {
    Param(ParamLocation, String),
    BodyProperty(String),
}

impl Target {
    fn name(&self) -> &str {
        match self {
            Self::Param(_, name) | Self::BodyProperty(name) => name,
        }
    }
}

/// Every parameter and top-level body property with its flattened schema.
fn targets(endpoint: &Endpoint) -> Vec<(Target, Value)> {
    let mut out: Vec<(Target, Value)> = endpoint
        .parameters
        .iter()
        .filter(|p| p.location != ParamLocation::Cookie)
        .map(|p| (Target::Param(p.location, p.name.clone()), flatten(&p.schema, 0)))
        .collect();
    if let Some(body) = &endpoint.request_schema {
        for (name, schema) in crate::analyzer::object_properties(&body.schema) {
            out.push((Target::BodyProperty(name), schema));
        }
    }
    out
}

fn is_unconstrained(schema: &Value) -> bool {
    schema.as_object().is_none_or(Map::is_empty)
}

#[derive(Debug, Clone, Default)]
struct Request {
    path_params: BTreeMap<String, Value>,
    query: BTreeMap<String, Value>,
    headers: BTreeMap<String, String>,
    /// Body as JSON; converted to the endpoint's encoding when the case is built.
    body: Option<Value>,
}

impl Request {
    /// Replace the body, provided the value fits the endpoint's encoding.
    fn with_body(&self, schema: &RequestSchema, body: Value) -> Option<Self> {
        if schema.encoding != BodyEncoding::Json && !body.is_object() {
            return None;
        }
        let mut next = self.clone();
        next.body = Some(body);
        Some(next)
    }

    /// Set one input to `value`; `None` when the body cannot carry it.
    fn with_override(&self, endpoint: &Endpoint, target: &Target, value: Value) -> Option<Self> {
        let mut next = self.clone();
        match target {
            Target::Param(ParamLocation::Path, name) => {
                next.path_params.insert(name.clone(), value);
            }
            Target::Param(ParamLocation::Query, name) => {
                next.query.insert(name.clone(), value);
            }
            Target::Param(ParamLocation::Header, name) => {
                next.headers.insert(name.clone(), param_text(&value));
            }
            Target::Param(ParamLocation::Cookie, _) => return None,
            Target::BodyProperty(name) => {
                endpoint.request_schema.as_ref()?;
                match next.body.get_or_insert_with(|| json!({})) {
                    Value::Object(map) => {
                        map.insert(name.clone(), value);
                    }
                    _ => return None,
                }
            }
        }
        Some(next)
    }

    fn to_case(
        &self,
        endpoint: &Endpoint,
        category: TestCategory,
        name: String,
        expected_status: Vec<u16>,
    ) -> TestCase {
        let mut case = TestCase::new(category, name, endpoint.endpoint_ref(), expected_status);
        case.path_params = self.path_params.clone();
        case.query = self.query.clone();
        case.headers = self.headers.clone();
        case.payload = match (&endpoint.request_schema, &self.body) {
            (Some(schema), Some(body)) => payload_for(schema, body.clone()),
            _ => None,
        };
        case
    }
}

fn payload_for(schema: &RequestSchema, body: Value) -> Option<Payload> {
    match schema.encoding {
        BodyEncoding::Json => Some(Payload::Json(body)),
        BodyEncoding::FormUrlencoded => match body {
            Value::Object(map) => Some(Payload::FormUrlencoded(map.into_iter().collect())),
            _ => None,
        },
        BodyEncoding::Multipart => {
            let Value::Object(map) = body else {
                return None;
            };
            let binary: BTreeSet<String> = crate::analyzer::object_properties(&schema.schema)
                .into_iter()
                .filter(|(_, s)| s.get("format").and_then(Value::as_str) == Some("binary"))
                .map(|(name, _)| name)
                .collect();
            let fields = map
                .into_iter()
                .map(|(name, value)| {
                    if binary.contains(&name) {
                        MultipartField::File {
                            file_name: format!("{name}.txt"),
                            name,
                            content_type: "application/octet-stream".into(),
                            content: param_text(&value),
                        }
                    } else {
                        MultipartField::Text {
                            name,
                            value: param_text(&value),
                        }
                    }
                })
                .collect();
            Some(Payload::Multipart(fields))
        }
    }
}

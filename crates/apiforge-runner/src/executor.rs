//! HTTP execution of test cases against the configured target
//!
//! One [`Executor`] per run: it owns the HTTP client, the decrypted config
//! and the OAuth2 token cache. A case always yields a [`TestResult`];
//! transport failures become `error` results and never abort a batch.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, warn};
use url::Url;

use apiforge_core::assertion::{ResponseView, evaluate_all, judge};
use apiforge_core::model::{
    Assertion, ExecutionStep, MultipartField, Payload, RequestTrace, ResponseTrace, ResultStatus,
    TestCase, TestCategory, TestResult, param_text,
};
use apiforge_core::project::{ApiKeyLocation, AuthConfig, ResolvedConfig};
use apiforge_core::redact::{Redactor, looks_sensitive};

/// Per-request timeout when the project sets none.
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Response bodies stored in traces are cut at this many bytes.
pub const MAX_TRACE_BODY: usize = 4096;

/// Cached OAuth2 tokens are refreshed this long before they expire.
const TOKEN_EXPIRY_MARGIN: Duration = Duration::from_secs(60);

/// The run cannot start at all.
#[derive(Debug, thiserror::Error)]
pub enum ExecutorFatalError {
    #[error("invalid base URL '{url}': {reason}")]
    InvalidBaseUrl { url: String, reason: String },
    #[error("OAuth2 token request failed: {0}")]
    OAuth2(String),
    #[error("cannot build HTTP client: {0}")]
    Client(String),
}

/// One request could not be completed.
#[derive(Debug, thiserror::Error)]
pub enum ExecutionTransportError {
    #[error("request timed out after {0}s")]
    Timeout(u64),
    #[error("connection failed: {0}")]
    Connect(String),
    #[error("request failed: {0}")]
    Request(String),
    #[error("cannot build request: {0}")]
    Build(String),
}

/// Replacements applied to a stored case for one ad-hoc run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CaseOverrides {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Payload>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query: Option<BTreeMap<String, Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub headers: Option<BTreeMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assertions: Option<Vec<Assertion>>,
}

impl CaseOverrides {
    /// A copy of `case` with the overrides applied.
    #[must_use]
    pub fn apply(&self, case: &TestCase) -> TestCase {
        let mut case = case.clone();
        if let Some(payload) = &self.payload {
            case.payload = Some(payload.clone());
        }
        if let Some(query) = &self.query {
            case.query = query.clone();
        }
        if let Some(headers) = &self.headers {
            case.headers.extend(headers.clone());
        }
        if let Some(assertions) = &self.assertions {
            case.assertions = assertions.clone();
        }
        case
    }
}

/// Outcome of `config check`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionCheck {
    pub url: String,
    pub reachable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    pub elapsed_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone)]
struct CachedToken {
    access_token: String,
    /// `None` when the server did not say.
    refresh_at: Option<Instant>,
}

impl CachedToken {
    fn is_fresh(&self) -> bool {
        self.refresh_at.is_none_or(|at| Instant::now() < at)
    }
}

#[derive(Debug, Default)]
struct TokenState {
    cached: Option<CachedToken>,
    /// Fetch step not yet attached to a result.
    unreported: Option<ExecutionStep>,
}

/// Sent request plus its trace.
struct Outgoing {
    request: reqwest::Request,
    trace: RequestTrace,
}

/// Response captured once, before evaluation.
struct Captured {
    status: u16,
    headers: BTreeMap<String, String>,
    body: String,
    elapsed: Duration,
}

pub struct Executor {
    client: reqwest::Client,
    base_url: Url,
    config: ResolvedConfig,
    timeout: Duration,
    redactor: Redactor,
    token: Mutex<TokenState>,
}

impl std::fmt::Debug for Executor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Executor")
            .field("base_url", &self.base_url.as_str())
            .field("auth", &self.config.auth.kind())
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl Executor {
    /// # Errors
    ///
    /// Fails when the base URL is not an absolute http(s) URL or the client
    /// cannot be built.
    pub fn new(config: ResolvedConfig) -> Result<Self, ExecutorFatalError> {
        let base_url = parse_base_url(&config.base_url)?;
        let timeout = Duration::from_secs(config.timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS));
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ExecutorFatalError::Client(e.to_string()))?;

        let mut redactor = Redactor::new();
        match &config.auth {
            AuthConfig::None => {}
            AuthConfig::Basic { password, .. } => {
                redactor.secret(password.as_str());
            }
            AuthConfig::Bearer { token } => {
                redactor.secret(token.as_str());
            }
            AuthConfig::ApiKey {
                key_name,
                key_value,
                ..
            } => {
                redactor.secret(key_value.as_str()).header(key_name.as_str());
            }
            AuthConfig::OAuth2 { client_secret, .. } => {
                redactor.secret(client_secret.as_str());
            }
        }
        for (name, value) in &config.headers {
            if looks_sensitive(name) {
                redactor.secret(value.as_str());
            }
        }

        Ok(Self {
            client,
            base_url,
            config,
            timeout,
            redactor,
            token: Mutex::new(TokenState::default()),
        })
    }

    /// Obtain an OAuth2 token before a batch starts.
    ///
    /// The fetch is reported in the trace of the next executed case.
    ///
    /// # Errors
    ///
    /// [`ExecutorFatalError::OAuth2`] when the token endpoint fails.
    pub async fn preflight(&self) -> Result<(), ExecutorFatalError> {
        if !matches!(self.config.auth, AuthConfig::OAuth2 { .. }) {
            return Ok(());
        }
        let mut state = self.token.lock().await;
        let (token, step) = self.fetch_token().await;
        match token {
            Ok(token) => {
                state.cached = Some(token);
                state.unreported = Some(step);
                Ok(())
            }
            Err(e) => Err(ExecutorFatalError::OAuth2(self.redactor.scrub(&e))),
        }
    }

    /// Execute one case. Never fails: problems become `error` results.
    pub async fn run(&self, case: &TestCase) -> TestResult {
        let mut result = blank_result(case);
        let mut redactor = self.redactor.clone();

        let (bearer, token_step) = match self.bearer_token().await {
            Ok(pair) => pair,
            Err((message, step)) => {
                result.status = ResultStatus::Error;
                result.error = Some(message);
                result.trace.push(step);
                self.redactor.result(&mut result);
                return result;
            }
        };
        if let Some(token) = &bearer {
            redactor.secret(token.as_str());
        }

        let outgoing = match self.build(case, bearer.as_deref()) {
            Ok(o) => o,
            Err(e) => {
                result.status = ResultStatus::Error;
                result.error = Some(e.to_string());
                redactor.result(&mut result);
                return result;
            }
        };
        result.request_trace = Some(outgoing.trace.clone());
        debug!(index = case.index, method = %outgoing.trace.method, url = %redactor.scrub(&outgoing.trace.url), "sending");

        match self.send(outgoing.request).await {
            Ok(captured) => {
                let view = ResponseView {
                    status: captured.status,
                    headers: &captured.headers,
                    body: &captured.body,
                    elapsed: captured.elapsed,
                };
                result.assertion_results = evaluate_all(&case.assertions, &view, &case.expected_status);
                result.status = judge(
                    &case.assertions,
                    &result.assertion_results,
                    &case.expected_status,
                    captured.status,
                );
                result.actual_status = Some(captured.status);
                result.response_time_ms = Some(millis(captured.elapsed));
                result.response_trace = Some(response_trace(&captured));
            }
            Err(e) => {
                warn!(index = case.index, error = %redactor.scrub(&e.to_string()), "request failed");
                result.status = ResultStatus::Error;
                result.error = Some(e.to_string());
            }
        }

        if let Some(step) = token_step {
            result.trace.push(step);
            result.trace.push(ExecutionStep {
                step: "request".into(),
                request: outgoing.trace,
                response: result.response_trace.clone(),
                error: result.error.clone(),
            });
        }
        result.security_finding =
            case.category == TestCategory::Security && result.status == ResultStatus::Failed;
        redactor.result(&mut result);
        result
    }

    /// Single GET against the base URL with auth applied.
    pub async fn check_connection(&self) -> ConnectionCheck {
        let url = self.redactor.scrub(self.base_url.as_str());
        let started = Instant::now();
        let outcome: Result<Captured, String> = async {
            let (bearer, _) = self.bearer_token().await.map_err(|(message, _)| message)?;
            let mut target = self.base_url.clone();
            let mut headers = HeaderMap::new();
            self.apply_auth(&mut target, &mut headers, bearer.as_deref());
            let request = self
                .client
                .get(target)
                .headers(headers)
                .build()
                .map_err(|e| e.to_string())?;
            self.send(request).await.map_err(|e| e.to_string())
        }
        .await;

        match outcome {
            Ok(captured) => ConnectionCheck {
                url,
                reachable: true,
                status: Some(captured.status),
                elapsed_ms: millis(captured.elapsed),
                error: None,
            },
            Err(e) => ConnectionCheck {
                url,
                reachable: false,
                status: None,
                elapsed_ms: millis(started.elapsed()),
                error: Some(self.redactor.scrub(&e)),
            },
        }
    }

    // ── Auth ──

    /// Current OAuth2 token, fetching one when missing or stale.
    ///
    /// The step is the fetch that produced the token, if this call owns it.
    async fn bearer_token(&self) -> Result<(Option<String>, Option<ExecutionStep>), (String, ExecutionStep)> {
        if !matches!(self.config.auth, AuthConfig::OAuth2 { .. }) {
            return Ok((None, None));
        }
        let mut state = self.token.lock().await;
        if let Some(cached) = state.cached.as_ref().filter(|t| t.is_fresh()) {
            let token = cached.access_token.clone();
            return Ok((Some(token), state.unreported.take()));
        }
        let (token, step) = self.fetch_token().await;
        match token {
            Ok(token) => {
                let access = token.access_token.clone();
                state.cached = Some(token);
                state.unreported = None;
                Ok((Some(access), Some(step)))
            }
            Err(e) => Err((format!("OAuth2 token request failed: {e}"), step)),
        }
    }

    async fn fetch_token(&self) -> (Result<CachedToken, String>, ExecutionStep) {
        let AuthConfig::OAuth2 {
            token_url,
            client_id,
            client_secret,
            grant_type,
            scope,
        } = &self.config.auth
        else {
            return (
                Err("auth is not oauth2".into()),
                ExecutionStep {
                    step: "oauth2_token".into(),
                    request: RequestTrace {
                        method: "POST".into(),
                        url: String::new(),
                        headers: BTreeMap::new(),
                        query: BTreeMap::new(),
                        body: None,
                    },
                    response: None,
                    error: None,
                },
            );
        };

        let mut form = vec![
            ("grant_type", grant_type.as_str()),
            ("client_id", client_id.as_str()),
            ("client_secret", client_secret.as_str()),
        ];
        if let Some(scope) = scope {
            form.push(("scope", scope.as_str()));
        }
        let mut step = ExecutionStep {
            step: "oauth2_token".into(),
            request: RequestTrace {
                method: "POST".into(),
                url: token_url.clone(),
                headers: BTreeMap::from([(
                    "content-type".to_string(),
                    "application/x-www-form-urlencoded".to_string(),
                )]),
                query: BTreeMap::new(),
                body: Some(Value::Object(
                    form.iter()
                        .map(|(k, v)| ((*k).to_string(), Value::String((*v).to_string())))
                        .collect(),
                )),
            },
            response: None,
            error: None,
        };

        let request = match self.client.post(token_url.as_str()).form(&form).build() {
            Ok(r) => r,
            Err(e) => {
                step.error = Some(e.to_string());
                self.redactor.step(&mut step);
                return (Err(e.to_string()), step);
            }
        };
        let outcome = match self.send(request).await {
            Ok(captured) => {
                step.response = Some(response_trace(&captured));
                parse_token(&captured)
            }
            Err(e) => Err(e.to_string()),
        };
        if let Err(e) = &outcome {
            step.error = Some(e.clone());
        }

        let mut redactor = self.redactor.clone();
        if let Ok(token) = &outcome {
            redactor.secret(token.access_token.as_str());
        }
        redactor.step(&mut step);
        (outcome, step)
    }

    fn apply_auth(&self, url: &mut Url, headers: &mut HeaderMap, bearer: Option<&str>) {
        let mut set = |name: &str, value: String| {
            if let (Ok(n), Ok(v)) = (HeaderName::from_bytes(name.as_bytes()), HeaderValue::from_str(&value)) {
                headers.insert(n, v);
            }
        };
        match &self.config.auth {
            AuthConfig::None => {}
            AuthConfig::Basic { username, password } => {
                let encoded = base64::Engine::encode(
                    &base64::engine::general_purpose::STANDARD,
                    format!("{username}:{password}"),
                );
                set("authorization", format!("Basic {encoded}"));
            }
            AuthConfig::Bearer { token } => set("authorization", format!("Bearer {token}")),
            AuthConfig::ApiKey {
                key_name,
                key_value,
                location: ApiKeyLocation::Header,
            } => set(key_name, key_value.clone()),
            AuthConfig::ApiKey {
                key_name,
                key_value,
                location: ApiKeyLocation::Query,
            } => {
                url.query_pairs_mut().append_pair(key_name, key_value);
            }
            AuthConfig::OAuth2 { .. } => {
                if let Some(token) = bearer {
                    set("authorization", format!("Bearer {token}"));
                }
            }
        }
    }

    // ── Request ──

    fn build(&self, case: &TestCase, bearer: Option<&str>) -> Result<Outgoing, ExecutionTransportError> {
        let path = case.render_path();
        let raw = format!("{}{path}", self.base_url.as_str().trim_end_matches('/'));
        let mut url = Url::parse(&raw).map_err(|e| ExecutionTransportError::Build(format!("{raw}: {e}")))?;

        let pairs = case.query_pairs();
        if !pairs.is_empty() {
            let mut q = url.query_pairs_mut();
            for (k, v) in &pairs {
                q.append_pair(k, v);
            }
        }

        let mut headers = HeaderMap::new();
        for (name, value) in self.config.headers.iter().chain(&case.headers) {
            match (HeaderName::from_bytes(name.as_bytes()), HeaderValue::from_str(value)) {
                (Ok(n), Ok(v)) => {
                    headers.insert(n, v);
                }
                _ => debug!(index = case.index, header = %name, "skipping header that is not valid HTTP"),
            }
        }
        self.apply_auth(&mut url, &mut headers, bearer);

        let method = reqwest::Method::from_bytes(case.request_method().as_str().as_bytes())
            .map_err(|e| ExecutionTransportError::Build(e.to_string()))?;
        let mut builder = self.client.request(method, url.clone()).headers(headers);
        builder = match &case.payload {
            None => builder,
            Some(Payload::Json(value)) => builder.json(value),
            Some(Payload::FormUrlencoded(fields)) => {
                let form: Vec<(&str, String)> =
                    fields.iter().map(|(k, v)| (k.as_str(), param_text(v))).collect();
                builder.form(&form)
            }
            Some(Payload::Multipart(parts)) => builder.multipart(multipart_form(parts)),
        };
        let request = builder
            .build()
            .map_err(|e| ExecutionTransportError::Build(e.to_string()))?;

        let trace = RequestTrace {
            method: request.method().to_string(),
            url: request.url().to_string(),
            headers: header_map(request.headers()),
            query: pairs.into_iter().collect(),
            body: case.payload.as_ref().map(Payload::to_json),
        };
        Ok(Outgoing { request, trace })
    }

    async fn send(&self, request: reqwest::Request) -> Result<Captured, ExecutionTransportError> {
        let started = Instant::now();
        let response = self.client.execute(request).await.map_err(|e| self.classify(&e))?;
        let status = response.status().as_u16();
        let headers = header_map(response.headers());
        let bytes = response.bytes().await.map_err(|e| self.classify(&e))?;
        Ok(Captured {
            status,
            headers,
            body: String::from_utf8_lossy(&bytes).into_owned(),
            elapsed: started.elapsed(),
        })
    }

    fn classify(&self, e: &reqwest::Error) -> ExecutionTransportError {
        if e.is_timeout() {
            ExecutionTransportError::Timeout(self.timeout.as_secs())
        } else if e.is_connect() {
            ExecutionTransportError::Connect(error_chain(e))
        } else {
            ExecutionTransportError::Request(error_chain(e))
        }
    }
}

fn parse_base_url(raw: &str) -> Result<Url, ExecutorFatalError> {
    let invalid = |reason: String| ExecutorFatalError::InvalidBaseUrl {
        url: raw.to_string(),
        reason,
    };
    let url = Url::parse(raw.trim()).map_err(|e| invalid(e.to_string()))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(invalid(format!("unsupported scheme '{}'", url.scheme())));
    }
    if url.host_str().is_none_or(str::is_empty) {
        return Err(invalid("missing host".into()));
    }
    Ok(url)
}

fn parse_token(captured: &Captured) -> Result<CachedToken, String> {
    if !(200..300).contains(&captured.status) {
        return Err(format!("token endpoint answered HTTP {}", captured.status));
    }
    let body: Value = serde_json::from_str(&captured.body)
        .map_err(|e| format!("token response is not JSON: {e}"))?;
    let access_token = body
        .get("access_token")
        .and_then(Value::as_str)
        .filter(|t| !t.is_empty())
        .ok_or("token response has no access_token")?
        .to_string();
    let refresh_at = body
        .get("expires_in")
        .and_then(Value::as_u64)
        .map(|secs| Instant::now() + Duration::from_secs(secs).saturating_sub(TOKEN_EXPIRY_MARGIN));
    Ok(CachedToken {
        access_token,
        refresh_at,
    })
}

fn multipart_form(parts: &[MultipartField]) -> reqwest::multipart::Form {
    parts.iter().fold(reqwest::multipart::Form::new(), |form, part| match part {
        MultipartField::Text { name, value } => form.text(name.clone(), value.clone()),
        MultipartField::File {
            name,
            file_name,
            content_type,
            content,
        } => {
            let bytes = || reqwest::multipart::Part::bytes(content.clone().into_bytes()).file_name(file_name.clone());
            let part = bytes().mime_str(content_type).unwrap_or_else(|_| bytes());
            form.part(name.clone(), part)
        }
    })
}

fn header_map(headers: &HeaderMap) -> BTreeMap<String, String> {
    headers
        .iter()
        .map(|(k, v)| (k.as_str().to_string(), v.to_str().unwrap_or("<binary>").to_string()))
        .collect()
}

fn response_trace(captured: &Captured) -> ResponseTrace {
    ResponseTrace {
        status_code: captured.status,
        headers: captured.headers.clone(),
        body: truncate_body(&captured.body),
        elapsed_ms: millis(captured.elapsed),
    }
}

/// Body for storage: `None` when empty, cut on a char boundary past [`MAX_TRACE_BODY`].
#[must_use]
pub fn truncate_body(body: &str) -> Option<String> {
    if body.is_empty() {
        return None;
    }
    if body.len() <= MAX_TRACE_BODY {
        return Some(body.to_string());
    }
    let mut end = MAX_TRACE_BODY;
    while end > 0 && !body.is_char_boundary(end) {
        end -= 1;
    }
    Some(format!("{}…({} bytes total)", &body[..end], body.len()))
}

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

/// `reqwest` hides the useful part of connection errors in the source chain.
fn error_chain(e: &reqwest::Error) -> String {
    let mut message = e.to_string();
    let mut source = std::error::Error::source(e);
    while let Some(s) = source {
        message.push_str(": ");
        message.push_str(&s.to_string());
        source = s.source();
    }
    message
}

fn blank_result(case: &TestCase) -> TestResult {
    TestResult {
        test_case_index: case.index,
        test_name: case.name.clone(),
        test_type: case.category,
        endpoint: case.endpoint.path.clone(),
        method: case.request_method(),
        status: ResultStatus::Error,
        expected_status: case.expected_status.clone(),
        actual_status: None,
        request_trace: None,
        response_trace: None,
        assertion_results: Vec::new(),
        error: None,
        trace: Vec::new(),
        response_time_ms: None,
        security_finding: false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use apiforge_core::model::{EndpointRef, HttpMethod};
    use serde_json::json;

    fn config(base_url: &str, auth: AuthConfig<String>) -> ResolvedConfig {
        ResolvedConfig {
            base_url: base_url.into(),
            auth,
            llm: None,
            timeout_secs: Some(5),
            headers: BTreeMap::from([("X-Suite".to_string(), "smoke".to_string())]),
        }
    }

    fn case() -> TestCase {
        let mut case = TestCase::new(
            TestCategory::HappyPath,
            "get user",
            EndpointRef::new(HttpMethod::Get, "/users/{id}"),
            vec![200],
        );
        case.path_params.insert("id".into(), json!("a b"));
        case.query.insert("expand".into(), json!(["roles", "teams"]));
        case
    }

    #[test]
    fn base_url_must_be_absolute_http() {
        for bad in ["localhost:8080", "ftp://h.test", "http://", "not a url"] {
            let err = Executor::new(config(bad, AuthConfig::None)).unwrap_err();
            assert!(matches!(err, ExecutorFatalError::InvalidBaseUrl { .. }), "{bad}");
        }
    }

    #[test]
    fn request_carries_path_query_headers_and_api_key() {
        let exec = Executor::new(config(
            "http://api.test/v1/",
            AuthConfig::ApiKey {
                key_name: "api_key".into(),
                key_value: "k-123456".into(),
                location: ApiKeyLocation::Query,
            },
        ))
        .unwrap();
        let mut case = case();
        case.headers.insert("X-Trace".into(), "1".into());
        case.headers.insert("Bad\nHeader".into(), "x".into());
        let out = exec.build(&case, None).unwrap();

        assert_eq!(
            out.trace.url,
            "http://api.test/v1/users/a%20b?expand=roles&expand=teams&api_key=k-123456"
        );
        assert_eq!(out.trace.headers["x-suite"], "smoke");
        assert_eq!(out.trace.headers["x-trace"], "1");
        assert_eq!(out.trace.headers.len(), 2);
        assert_eq!(out.trace.query["expand"], "teams");
    }

    #[test]
    fn basic_auth_header_and_payload_encodings() {
        let exec = Executor::new(config(
            "http://api.test",
            AuthConfig::Basic {
                username: "ada".into(),
                password: "s3cret".into(),
            },
        ))
        .unwrap();
        let mut case = case();
        case.payload = Some(Payload::FormUrlencoded(BTreeMap::from([
            ("name".to_string(), json!("Ada")),
            ("age".to_string(), json!(36)),
        ])));
        let out = exec.build(&case, None).unwrap();
        assert_eq!(out.trace.headers["authorization"], "Basic YWRhOnMzY3JldA==");
        assert_eq!(out.trace.headers["content-type"], "application/x-www-form-urlencoded");
        let body = out.request.body().and_then(|b| b.as_bytes()).unwrap();
        assert_eq!(body, b"age=36&name=Ada");
        assert_eq!(out.trace.body, Some(json!({"age": 36, "name": "Ada"})));
    }

    #[test]
    fn method_override_changes_wire_method() {
        let exec = Executor::new(config("http://api.test", AuthConfig::None)).unwrap();
        let mut case = case();
        case.method_override = Some(HttpMethod::Put);
        let out = exec.build(&case, None).unwrap();
        assert_eq!(out.trace.method, "PUT");
        assert_eq!(blank_result(&case).method, HttpMethod::Put);
    }

    #[test]
    fn overrides_leave_stored_case_untouched() {
        let stored = case();
        let overrides = CaseOverrides {
            payload: Some(Payload::Json(json!({"x": 1}))),
            headers: Some(BTreeMap::from([("X-Extra".to_string(), "y".to_string())])),
            assertions: Some(vec![Assertion::status_in(&[201])]),
            query: None,
        };
        let run = overrides.apply(&stored);
        assert_eq!(run.payload, Some(Payload::Json(json!({"x": 1}))));
        assert_eq!(run.headers["X-Extra"], "y");
        assert_eq!(run.query, stored.query);
        assert!(stored.payload.is_none());
        assert!(stored.assertions.is_empty());
    }

    #[test]
    fn trace_bodies_are_truncated_on_char_boundaries() {
        assert_eq!(truncate_body(""), None);
        assert_eq!(truncate_body("ok").as_deref(), Some("ok"));

        let body = format!("{}é{}", "a".repeat(MAX_TRACE_BODY - 1), "b".repeat(10));
        let cut = truncate_body(&body).unwrap();
        assert!(cut.starts_with(&"a".repeat(MAX_TRACE_BODY - 1)));
        assert!(!cut.contains('é'));
        assert!(cut.ends_with(&format!("…({} bytes total)", body.len())));
    }

    #[test]
    fn token_expiry_keeps_a_margin() {
        let captured = |body: &str| Captured {
            status: 200,
            headers: BTreeMap::new(),
            body: body.into(),
            elapsed: Duration::ZERO,
        };
        let long = parse_token(&captured(r#"{"access_token": "t", "expires_in": 3600}"#)).unwrap();
        assert!(long.is_fresh());
        let short = parse_token(&captured(r#"{"access_token": "t", "expires_in": 30}"#)).unwrap();
        assert!(!short.is_fresh());
        let forever = parse_token(&captured(r#"{"access_token": "t"}"#)).unwrap();
        assert!(forever.refresh_at.is_none());
        assert!(parse_token(&captured(r#"{"token_type": "bearer"}"#)).is_err());
    }
}

//! Export of test suites and execution results
//!
//! Suites export as JSON, `.http` request files, or Postman v2.1 collections.
//! A single result exports as an issue draft for trackers.

use std::fmt::Write as _;
use std::str::FromStr;

use serde_json::{Value, json};

use crate::model::{MultipartField, Payload, ResultStatus, TestCase, TestResult, TestSuite};

const POSTMAN_SCHEMA: &str = "https://schema.getpostman.com/json/collection/v2.1.0/collection.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Json,
    Http,
    Postman,
}

impl FromStr for ExportFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "http" => Ok(Self::Http),
            "postman" => Ok(Self::Postman),
            other => Err(format!("unknown export format '{other}' (json, http, postman)")),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Render a suite in the requested format. `base_url` defaults to a `{{base_url}}` variable.
///
/// # Errors
///
/// Fails only if JSON serialization fails.
pub fn export_suite(
    suite: &TestSuite,
    format: ExportFormat,
    base_url: Option<&str>,
) -> Result<String, ExportError> {
    match format {
        ExportFormat::Json => Ok(serde_json::to_string_pretty(suite)?),
        ExportFormat::Http => Ok(to_http_file(suite, base_url)),
        ExportFormat::Postman => Ok(serde_json::to_string_pretty(&to_postman(suite, base_url))?),
    }
}

/// `.http` file with one request block per case, in index order.
#[must_use]
pub fn to_http_file(suite: &TestSuite, base_url: Option<&str>) -> String {
    let mut cases: Vec<&TestCase> = suite.test_cases.iter().collect();
    cases.sort_by_key(|c| c.index);

    let mut lines = Vec::new();
    lines.push(format!("# {} ({} test cases)", suite.name, cases.len()));
    match base_url {
        Some(url) => lines.push(format!("@base_url = {url}")),
        None => lines.push("# Set base_url in your environment".to_string()),
    }
    lines.push(String::new());

    for case in cases {
        lines.push(format!("### [{}] {} - {}", case.index, case.category, case.name));
        lines.push(format!(
            "# expect: {}",
            case.expected_status
                .iter()
                .map(u16::to_string)
                .collect::<Vec<_>>()
                .join(", ")
        ));
        lines.push(format!("{} {{{{base_url}}}}{}", case.request_method(), url_tail(case)));
        for (key, value) in &case.headers {
            if !matches!(key.to_lowercase().as_str(), "host" | "content-length") {
                lines.push(format!("{key}: {value}"));
            }
        }
        if let Some(payload) = &case.payload {
            if !case.headers.keys().any(|k| k.eq_ignore_ascii_case("content-type")) {
                lines.push(format!("Content-Type: {}", payload.content_type()));
            }
            lines.push(String::new());
            lines.push(payload_text(payload));
        }
        lines.push(String::new());
    }

    lines.join("\n")
}

/// Path plus query string.
fn url_tail(case: &TestCase) -> String {
    let pairs = case.query_pairs();
    if pairs.is_empty() {
        return case.render_path();
    }
    let query: String = url::form_urlencoded::Serializer::new(String::new())
        .extend_pairs(pairs)
        .finish();
    format!("{}?{query}", case.render_path())
}

fn payload_text(payload: &Payload) -> String {
    match payload {
        Payload::Json(v) => serde_json::to_string_pretty(v).unwrap_or_else(|_| v.to_string()),
        Payload::FormUrlencoded(fields) => url::form_urlencoded::Serializer::new(String::new())
            .extend_pairs(fields.iter().map(|(k, v)| (k, crate::model::case::param_text(v))))
            .finish(),
        Payload::Multipart(parts) => parts
            .iter()
            .map(|p| match p {
                MultipartField::Text { name, value } => format!("{name}={value}"),
                MultipartField::File { name, file_name, .. } => format!("{name}=@{file_name}"),
            })
            .collect::<Vec<_>>()
            .join("\n"),
    }
}

/// Postman v2.1 collection with one folder per endpoint.
#[must_use]
pub fn to_postman(suite: &TestSuite, base_url: Option<&str>) -> Value {
    let folders: Vec<Value> = suite
        .grouped_by_endpoint()
        .into_iter()
        .map(|(endpoint, cases)| {
            json!({
                "name": endpoint.to_string(),
                "item": cases.into_iter().map(postman_item).collect::<Vec<_>>(),
            })
        })
        .collect();

    json!({
        "info": {
            "name": suite.name,
            "_postman_id": suite.id,
            "schema": POSTMAN_SCHEMA,
        },
        "item": folders,
        "variable": [{
            "key": "base_url",
            "value": base_url.unwrap_or("http://localhost:8080"),
        }],
    })
}

fn postman_item(case: &TestCase) -> Value {
    let path: Vec<String> = case
        .render_path()
        .trim_start_matches('/')
        .split('/')
        .map(str::to_string)
        .collect();
    let query: Vec<Value> = case
        .query_pairs()
        .into_iter()
        .map(|(key, value)| json!({"key": key, "value": value}))
        .collect();
    let mut headers: Vec<Value> = case
        .headers
        .iter()
        .map(|(k, v)| json!({"key": k, "value": v}))
        .collect();

    let mut request = json!({
        "method": case.request_method().as_str(),
        "url": {
            "raw": format!("{{{{base_url}}}}{}", url_tail(case)),
            "host": ["{{base_url}}"],
            "path": path,
            "query": query,
        },
    });
    if let Some(payload) = &case.payload {
        let body = match payload {
            Payload::Json(v) => json!({
                "mode": "raw",
                "raw": serde_json::to_string_pretty(v).unwrap_or_default(),
                "options": {"raw": {"language": "json"}},
            }),
            Payload::FormUrlencoded(fields) => json!({
                "mode": "urlencoded",
                "urlencoded": fields
                    .iter()
                    .map(|(k, v)| json!({"key": k, "value": crate::model::case::param_text(v)}))
                    .collect::<Vec<_>>(),
            }),
            Payload::Multipart(parts) => json!({
                "mode": "formdata",
                "formdata": parts
                    .iter()
                    .map(|p| match p {
                        MultipartField::Text { name, value } => {
                            json!({"key": name, "value": value, "type": "text"})
                        }
                        MultipartField::File { name, file_name, .. } => {
                            json!({"key": name, "src": file_name, "type": "file"})
                        }
                    })
                    .collect::<Vec<_>>(),
            }),
        };
        if matches!(payload, Payload::Json(_)) {
            headers.push(json!({"key": "Content-Type", "value": "application/json"}));
        }
        request["body"] = body;
    }
    request["header"] = Value::Array(headers);

    json!({
        "name": format!("[{}] {}", case.index, case.name),
        "request": request,
        "event": [{
            "listen": "test",
            "script": {
                "exec": [format!(
                    "pm.test(\"status is one of {:?}\", function () {{ pm.expect(pm.response.code).to.be.oneOf({:?}); }});",
                    case.expected_status, case.expected_status
                )],
                "type": "text/javascript",
            },
        }],
    })
}

/// Issue draft for one result: a title and a markdown body with the full trace.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct IssueDraft {
    pub title: String,
    pub body: String,
    pub labels: Vec<String>,
}

#[must_use]
pub fn issue_draft(execution_id: &str, result: &TestResult) -> IssueDraft {
    let verb = match result.status {
        ResultStatus::Passed => "passed",
        ResultStatus::Failed => "failed",
        ResultStatus::Error => "errored",
    };
    let title = format!(
        "{} {} {verb}: {}",
        result.method, result.endpoint, result.test_name
    );

    let mut body = String::new();
    let _ = writeln!(body, "## Summary\n");
    let _ = writeln!(body, "- **Test:** #{} {}", result.test_case_index, result.test_name);
    let _ = writeln!(body, "- **Type:** {}", result.test_type);
    let _ = writeln!(body, "- **Endpoint:** `{} {}`", result.method, result.endpoint);
    let _ = writeln!(body, "- **Status:** {}", result.status);
    let _ = writeln!(body, "- **Expected status:** {:?}", result.expected_status);
    match result.actual_status {
        Some(code) => {
            let _ = writeln!(body, "- **Actual status:** {code}");
        }
        None => {
            let _ = writeln!(body, "- **Actual status:** (no response)");
        }
    }
    if let Some(ms) = result.response_time_ms {
        let _ = writeln!(body, "- **Response time:** {ms} ms");
    }
    let _ = writeln!(body, "- **Execution:** `{execution_id}`");
    if let Some(err) = &result.error {
        let _ = writeln!(body, "\n## Error\n\n```\n{err}\n```");
    }

    let failed: Vec<_> = result.failed_assertions().collect();
    if !failed.is_empty() {
        let _ = writeln!(body, "\n## Failed assertions\n");
        for a in failed {
            let label = a
                .assertion
                .description
                .clone()
                .unwrap_or_else(|| format!("{:?} {}", a.assertion.kind, a.assertion.condition));
            let _ = writeln!(body, "- {label}: {}", a.message);
        }
    }

    for step in &result.trace {
        let _ = writeln!(body, "\n## Step: {}\n", step.step);
        let _ = writeln!(body, "```json\n{}\n```", pretty(&step.request));
        if let Some(resp) = &step.response {
            let _ = writeln!(body, "```json\n{}\n```", pretty(resp));
        }
        if let Some(err) = &step.error {
            let _ = writeln!(body, "Error: {err}");
        }
    }
    if let Some(req) = &result.request_trace {
        let _ = writeln!(body, "\n## Request\n\n```json\n{}\n```", pretty(req));
    }
    if let Some(resp) = &result.response_trace {
        let _ = writeln!(body, "\n## Response\n\n```json\n{}\n```", pretty(resp));
    }

    let mut labels = vec!["apiforge".to_string(), result.test_type.to_string()];
    if result.security_finding {
        labels.push("security".to_string());
    }
    labels.dedup();

    IssueDraft {
        title,
        body,
        labels,
    }
}

fn pretty<T: serde::Serialize>(value: &T) -> String {
    serde_json::to_string_pretty(value).unwrap_or_default()
}

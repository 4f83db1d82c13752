//! Assertion evaluation against a captured response
//!
//! Pure functions: no I/O, no clock. The executor captures the response once
//! and every assertion of a case is evaluated against that snapshot, in
//! declaration order, without short-circuiting.

use std::collections::BTreeMap;
use std::time::Duration;

use regex::Regex;
use serde_json::Value;

use crate::model::{Assertion, AssertionResult, AssertionType, Condition, ResultStatus};

/// Captured response an assertion is evaluated against.
#[derive(Debug, Clone, Copy)]
pub struct ResponseView<'a> {
    pub status: u16,
    pub headers: &'a BTreeMap<String, String>,
    /// Full (untruncated) body text.
    pub body: &'a str,
    pub elapsed: Duration,
}

impl ResponseView<'_> {
    /// Body parsed as JSON, falling back to a JSON string of the raw text.
    fn body_json(&self) -> Value {
        if self.body.trim().is_empty() {
            return Value::Null;
        }
        serde_json::from_str(self.body).unwrap_or_else(|_| Value::String(self.body.to_string()))
    }

    fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Evaluate every assertion, one result per assertion, in order.
#[must_use]
pub fn evaluate_all(
    assertions: &[Assertion],
    response: &ResponseView<'_>,
    expected_status: &[u16],
) -> Vec<AssertionResult> {
    let body = response.body_json();
    assertions
        .iter()
        .map(|a| evaluate_with_body(a, response, &body, expected_status))
        .collect()
}

/// Evaluate a single assertion.
#[must_use]
pub fn evaluate(
    assertion: &Assertion,
    response: &ResponseView<'_>,
    expected_status: &[u16],
) -> AssertionResult {
    evaluate_with_body(assertion, response, &response.body_json(), expected_status)
}

/// Final status of a case whose request completed.
///
/// Fails when any assertion failed. A case that carries no `status_code`
/// assertion still fails when the actual status is outside `expected_status`.
#[must_use]
pub fn judge(
    assertions: &[Assertion],
    results: &[AssertionResult],
    expected_status: &[u16],
    actual_status: u16,
) -> ResultStatus {
    if results.iter().any(|r| !r.passed) {
        return ResultStatus::Failed;
    }
    let has_status_assertion = assertions
        .iter()
        .any(|a| a.kind == AssertionType::StatusCode);
    if !has_status_assertion && !expected_status.contains(&actual_status) {
        return ResultStatus::Failed;
    }
    ResultStatus::Passed
}

fn evaluate_with_body(
    assertion: &Assertion,
    response: &ResponseView<'_>,
    body: &Value,
    expected_status: &[u16],
) -> AssertionResult {
    let (passed, actual, message) = match assertion.kind {
        AssertionType::StatusCode => check_status(assertion, response.status, expected_status),
        AssertionType::ResponseTime => check_time(assertion, response.elapsed),
        AssertionType::ResponseHeader => check_header(assertion, response),
        AssertionType::ResponseBody | AssertionType::Custom => check_body(assertion, body),
    };
    AssertionResult {
        assertion: assertion.clone(),
        passed,
        message,
        actual_value: actual,
    }
}

type Outcome = (bool, Option<Value>, String);

fn check_status(assertion: &Assertion, actual: u16, expected_status: &[u16]) -> Outcome {
    let actual_value = Some(Value::from(actual));
    let set: Vec<u16> = match &assertion.expected_value {
        Some(Value::Array(items)) => items.iter().filter_map(as_status).collect(),
        Some(v) => as_status(v).into_iter().collect(),
        None => expected_status.to_vec(),
    };
    let passed = match assertion.condition {
        Condition::Equals | Condition::Contains => set.contains(&actual),
        Condition::NotEquals | Condition::NotContains => !set.contains(&actual),
        Condition::GreaterThan => set.first().is_some_and(|&n| actual > n),
        Condition::LessThan => set.first().is_some_and(|&n| actual < n),
        Condition::Matches => return compare_generic(assertion, &Value::from(actual)),
        Condition::Exists => true,
        Condition::NotExists => false,
    };
    let message = if passed {
        format!("status {actual} {} {set:?}", assertion.condition)
    } else {
        format!("expected status {} {set:?}, got {actual}", assertion.condition)
    };
    (passed, actual_value, message)
}

fn as_status(v: &Value) -> Option<u16> {
    match v {
        Value::Number(n) => n.as_u64().and_then(|n| u16::try_from(n).ok()),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn check_time(assertion: &Assertion, elapsed: Duration) -> Outcome {
    let seconds = elapsed.as_secs_f64();
    let actual = Value::from(seconds);
    let Some(limit) = assertion.expected_value.as_ref().and_then(as_number) else {
        return (
            false,
            Some(actual),
            "response_time assertion needs a numeric expected_value".to_string(),
        );
    };
    let passed = match assertion.condition {
        Condition::LessThan => seconds < limit,
        Condition::GreaterThan => seconds > limit,
        Condition::Equals => (seconds - limit).abs() < f64::EPSILON,
        Condition::NotEquals => (seconds - limit).abs() >= f64::EPSILON,
        Condition::Exists => true,
        _ => false,
    };
    let message = format!(
        "response time {seconds:.3}s {} {limit}s: {}",
        assertion.condition,
        if passed { "ok" } else { "violated" }
    );
    (passed, Some(actual), message)
}

fn check_header(assertion: &Assertion, response: &ResponseView<'_>) -> Outcome {
    let Some(name) = assertion.field.as_deref() else {
        return (
            false,
            None,
            "response_header assertion needs a header name in `field`".to_string(),
        );
    };
    let actual = response
        .header(name)
        .map_or(Value::Null, |v| Value::String(v.to_string()));
    let (passed, actual, message) = compare_generic(assertion, &actual);
    (passed, actual, format!("header {name}: {message}"))
}

fn check_body(assertion: &Assertion, body: &Value) -> Outcome {
    let actual = match assertion.field.as_deref() {
        None | Some("") => Some(body),
        Some(path) => lookup(body, path),
    };
    let actual = actual.cloned().unwrap_or(Value::Null);

    if assertion.condition == Condition::Matches {
        if let Some(schema @ Value::Object(_)) = &assertion.expected_value {
            return check_schema(assertion, schema, actual);
        }
    }
    let (passed, actual, message) = compare_generic(assertion, &actual);
    match assertion.field.as_deref() {
        Some(path) if !path.is_empty() => (passed, actual, format!("{path}: {message}")),
        _ => (passed, actual, message),
    }
}

fn check_schema(assertion: &Assertion, schema: &Value, actual: Value) -> Outcome {
    let validator = match jsonschema::validator_for(schema) {
        Ok(v) => v,
        Err(e) => return (false, Some(actual), format!("invalid schema: {e}")),
    };
    let errors: Vec<String> = validator
        .iter_errors(&actual)
        .take(3)
        .map(|e| e.to_string())
        .collect();
    let label = assertion.description.as_deref().unwrap_or("schema check");
    if errors.is_empty() {
        (true, Some(actual), format!("{label}: ok"))
    } else {
        (false, Some(actual), format!("{label}: {}", errors.join("; ")))
    }
}

/// Comparison shared by body, header and custom assertions.
fn compare_generic(assertion: &Assertion, actual: &Value) -> Outcome {
    let expected = assertion.expected_value.as_ref();
    let passed = match assertion.condition {
        Condition::Exists => is_present(actual),
        Condition::NotExists => !is_present(actual),
        Condition::Equals => expected.is_some_and(|e| loose_eq(actual, e)),
        Condition::NotEquals => !expected.is_some_and(|e| loose_eq(actual, e)),
        Condition::Contains => expected.is_some_and(|e| contains(actual, e)),
        Condition::NotContains => !expected.is_some_and(|e| contains(actual, e)),
        Condition::GreaterThan => ordered(actual, expected, |a, b| a > b),
        Condition::LessThan => ordered(actual, expected, |a, b| a < b),
        Condition::Matches => expected
            .and_then(Value::as_str)
            .and_then(|p| Regex::new(p).ok())
            .is_some_and(|re| re.is_match(&text_of(actual))),
    };
    let message = match expected {
        _ if passed => format!("{} held", assertion.condition),
        Some(e) if !assertion.condition.is_unary() => {
            format!("expected {} {e}, got {actual}", assertion.condition)
        }
        _ => format!("expected value to satisfy {}, got {actual}", assertion.condition),
    };
    (passed, Some(actual.clone()), message)
}

/// Present means non-null and, for strings and collections, non-empty.
fn is_present(v: &Value) -> bool {
    match v {
        Value::Null => false,
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
        _ => true,
    }
}

fn as_number(v: &Value) -> Option<f64> {
    match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn text_of(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Equality tolerant of `1` vs `1.0` and of scalars compared with their string form.
fn loose_eq(actual: &Value, expected: &Value) -> bool {
    match (actual, expected) {
        (Value::Number(_), Value::Number(_)) => as_number(actual) == as_number(expected),
        (Value::String(a), Value::Number(_) | Value::Bool(_)) => *a == expected.to_string(),
        (Value::Number(_) | Value::Bool(_), Value::String(e)) => actual.to_string() == *e,
        _ => actual == expected,
    }
}

fn contains(actual: &Value, needle: &Value) -> bool {
    match actual {
        Value::String(s) => s.contains(&text_of(needle)),
        Value::Array(items) => items.iter().any(|i| loose_eq(i, needle)),
        Value::Object(map) => {
            needle.as_str().is_some_and(|k| map.contains_key(k))
                || actual.to_string().contains(&text_of(needle))
        }
        Value::Null => false,
        other => other.to_string().contains(&text_of(needle)),
    }
}

fn ordered(actual: &Value, expected: Option<&Value>, cmp: impl Fn(f64, f64) -> bool) -> bool {
    let actual = match actual {
        Value::Array(a) => Some(a.len() as f64),
        other => as_number(other),
    };
    match (actual, expected.and_then(as_number)) {
        (Some(a), Some(e)) => cmp(a, e),
        _ => false,
    }
}

/// Resolve a dot path such as `data.items.0.id`; numeric segments index arrays.
#[must_use]
pub fn lookup<'v>(value: &'v Value, path: &str) -> Option<&'v Value> {
    path.split('.')
        .filter(|s| !s.is_empty())
        .try_fold(value, |cur, seg| match cur {
            Value::Object(map) => map.get(seg),
            Value::Array(items) => seg.parse::<usize>().ok().and_then(|i| items.get(i)),
            _ => None,
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn view<'a>(status: u16, headers: &'a BTreeMap<String, String>, body: &'a str) -> ResponseView<'a> {
        ResponseView {
            status,
            headers,
            body,
            elapsed: Duration::from_millis(120),
        }
    }

    // ── status ──

    #[test]
    fn status_equals_uses_expected_set() {
        let h = BTreeMap::new();
        let a = Assertion::status_in(&[200, 201]);
        assert!(evaluate(&a, &view(201, &h, ""), &[200]).passed);

        let r = evaluate(&a, &view(500, &h, ""), &[200]);
        assert!(!r.passed);
        assert_eq!(r.actual_value, Some(json!(500)));
    }

    #[test]
    fn status_without_expected_value_falls_back_to_case() {
        let h = BTreeMap::new();
        let a = Assertion::new(AssertionType::StatusCode, Condition::Equals);
        assert!(evaluate(&a, &view(404, &h, ""), &[404]).passed);
        assert!(!evaluate(&a, &view(200, &h, ""), &[404]).passed);
    }

    #[test]
    fn status_less_than_500() {
        let h = BTreeMap::new();
        let a = Assertion::status(Condition::LessThan, 500);
        assert!(evaluate(&a, &view(422, &h, ""), &[400]).passed);
        assert!(!evaluate(&a, &view(503, &h, ""), &[400]).passed);
    }

    // ── body ──

    #[test]
    fn body_exists_and_dot_paths() {
        let h = BTreeMap::new();
        let body = r#"{"items":[{"id":7,"name":""}],"total":1}"#;
        let resp = view(200, &h, body);
        assert!(evaluate(&Assertion::body(Some("items.0.id"), Condition::Exists), &resp, &[200]).passed);
        assert!(!evaluate(&Assertion::body(Some("items.0.name"), Condition::Exists), &resp, &[200]).passed);
        assert!(evaluate(&Assertion::body(Some("items.3"), Condition::NotExists), &resp, &[200]).passed);
        assert!(!evaluate(&Assertion::body(None, Condition::Exists), &view(200, &h, "  "), &[200]).passed);
    }

    #[test]
    fn body_comparisons() {
        let h = BTreeMap::new();
        let resp = view(200, &h, r#"{"count": 3, "name": "alice", "tags": ["a", "b"]}"#);
        let gt = Assertion::body(Some("count"), Condition::GreaterThan).with_expected(json!(2));
        let eq = Assertion::body(Some("count"), Condition::Equals).with_expected(json!(3.0));
        let has = Assertion::body(Some("tags"), Condition::Contains).with_expected(json!("b"));
        let re = Assertion::body(Some("name"), Condition::Matches).with_expected(json!("^al"));
        let not = Assertion::body(None, Condition::NotContains).with_expected(json!("<script>"));
        for a in [gt, eq, has, re, not] {
            let r = evaluate(&a, &resp, &[200]);
            assert!(r.passed, "{:?} failed: {}", a.condition, r.message);
        }
    }

    #[test]
    fn non_json_body_is_treated_as_text() {
        let h = BTreeMap::new();
        let resp = view(200, &h, "<p><script>alert(1)</script></p>");
        let a = Assertion::body(None, Condition::NotContains).with_expected(json!("<script>alert(1)</script>"));
        assert!(!evaluate(&a, &resp, &[200]).passed);
    }

    #[test]
    fn contains_searches_nested_json_values() {
        let h = BTreeMap::new();
        let resp = view(200, &h, r#"{"user": {"name": "<img src=x onerror=alert('XSS')>"}}"#);
        let a = Assertion::body(None, Condition::NotContains)
            .with_expected(json!("<img src=x onerror=alert('XSS')>"));
        assert!(!evaluate(&a, &resp, &[200]).passed);
        let key = Assertion::body(None, Condition::Contains).with_expected(json!("user"));
        assert!(evaluate(&key, &resp, &[200]).passed);
    }

    #[test]
    fn custom_schema_check() {
        let h = BTreeMap::new();
        let schema = json!({"type": "array", "items": {"type": "object", "required": ["id"]}});
        let a = Assertion::conforms_to(None, schema).with_description("each item has property id");
        assert!(evaluate(&a, &view(200, &h, r#"[{"id":1},{"id":2}]"#), &[200]).passed);

        let r = evaluate(&a, &view(200, &h, r#"[{"id":1},{"name":"x"}]"#), &[200]);
        assert!(!r.passed);
        assert!(r.message.starts_with("each item has property id"));
    }

    // ── header / time ──

    #[test]
    fn header_lookup_is_case_insensitive() {
        let h = BTreeMap::from([("Content-Type".to_string(), "application/json".to_string())]);
        let a = Assertion::header("content-type", Condition::Contains).with_expected(json!("json"));
        assert!(evaluate(&a, &view(200, &h, ""), &[200]).passed);
    }

    #[test]
    fn response_time_in_seconds() {
        let h = BTreeMap::new();
        assert!(evaluate(&Assertion::response_time_under(2.0), &view(200, &h, ""), &[200]).passed);
        assert!(!evaluate(&Assertion::response_time_under(0.1), &view(200, &h, ""), &[200]).passed);
    }

    // ── judge ──

    #[test]
    fn judge_applies_expected_status_without_status_assertion() {
        let body_only = vec![Assertion::body(None, Condition::Exists)];
        let passed = vec![AssertionResult {
            assertion: body_only[0].clone(),
            passed: true,
            message: String::new(),
            actual_value: None,
        }];
        assert_eq!(judge(&body_only, &passed, &[200], 200), ResultStatus::Passed);
        assert_eq!(judge(&body_only, &passed, &[200], 500), ResultStatus::Failed);
    }

    #[test]
    fn one_result_per_assertion_in_order() {
        let h = BTreeMap::new();
        let assertions = vec![
            Assertion::status_in(&[200]),
            Assertion::body(None, Condition::Exists),
            Assertion::response_time_under(5.0),
        ];
        let results = evaluate_all(&assertions, &view(500, &h, "{}"), &[200]);
        assert_eq!(results.len(), 3);
        for (a, r) in assertions.iter().zip(&results) {
            assert_eq!(&r.assertion, a);
        }
        assert!(!results[0].passed);
        assert_eq!(judge(&assertions, &results, &[200], 500), ResultStatus::Failed);
    }
}

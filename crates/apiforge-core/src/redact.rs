//! Masking of credentials in request/response traces
//!
//! Traces are persisted and exported, so every trace passes through here
//! before it is stored.

use std::collections::BTreeMap;

use serde_json::Value;

use crate::model::{ExecutionStep, RequestTrace, TestResult};

/// Headers that are always masked.
pub const SENSITIVE_HEADERS: &[&str] = &[
    "authorization",
    "x-api-key",
    "x-auth-token",
    "cookie",
    "set-cookie",
    "proxy-authorization",
];

/// Fragments that mark a custom header name as carrying a credential.
const SENSITIVE_NAME_PARTS: &[&str] = &["auth", "token", "secret", "api-key", "apikey", "password", "session"];

/// Replacement for masked values.
pub const MASK: &str = "***";

/// Known secret values to scrub from traces.
#[derive(Debug, Clone, Default)]
pub struct Redactor {
    secrets: Vec<String>,
    extra_headers: Vec<String>,
}

impl Redactor {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a secret value; empty and very short values are ignored.
    ///
    /// The form-urlencoded spelling is registered too, since query
    /// parameters reach the trace URL encoded.
    pub fn secret(&mut self, value: impl Into<String>) -> &mut Self {
        let value = value.into();
        if value.len() < 3 {
            return self;
        }
        let encoded: String = url::form_urlencoded::byte_serialize(value.as_bytes()).collect();
        for v in [value, encoded] {
            if !self.secrets.contains(&v) {
                self.secrets.push(v);
            }
        }
        // Longest first so a secret is never half-replaced by a shorter one.
        self.secrets.sort_by_key(|s| std::cmp::Reverse(s.len()));
        self
    }

    /// Mask an additional header name, e.g. a custom API key header.
    pub fn header(&mut self, name: impl Into<String>) -> &mut Self {
        self.extra_headers.push(name.into());
        self
    }

    #[must_use]
    pub fn is_sensitive_header(&self, name: &str) -> bool {
        looks_sensitive(name)
            || self
                .extra_headers
                .iter()
                .any(|h| name.eq_ignore_ascii_case(h))
    }

    /// Replace every registered secret occurring in `text`.
    #[must_use]
    pub fn scrub(&self, text: &str) -> String {
        let mut out = text.to_string();
        for secret in &self.secrets {
            if out.contains(secret.as_str()) {
                out = out.replace(secret.as_str(), MASK);
            }
        }
        out
    }

    pub fn headers(&self, headers: &mut BTreeMap<String, String>) {
        for (name, value) in headers.iter_mut() {
            if self.is_sensitive_header(name) {
                *value = MASK.to_string();
            } else {
                *value = self.scrub(value);
            }
        }
    }

    pub fn value(&self, value: &mut Value) {
        match value {
            Value::String(s) => *s = self.scrub(s),
            Value::Array(items) => items.iter_mut().for_each(|v| self.value(v)),
            Value::Object(map) => map.values_mut().for_each(|v| self.value(v)),
            _ => {}
        }
    }

    pub fn request(&self, trace: &mut RequestTrace) {
        trace.url = self.scrub(&trace.url);
        self.headers(&mut trace.headers);
        for (name, value) in trace.query.iter_mut() {
            if self.is_sensitive_header(name) {
                *value = MASK.to_string();
            } else {
                *value = self.scrub(value);
            }
        }
        if let Some(body) = trace.body.as_mut() {
            self.value(body);
        }
    }

    pub fn step(&self, step: &mut ExecutionStep) {
        self.request(&mut step.request);
        if let Some(resp) = step.response.as_mut() {
            self.headers(&mut resp.headers);
            resp.body = resp.body.as_deref().map(|b| self.scrub(b));
        }
        step.error = step.error.as_deref().map(|e| self.scrub(e));
    }

    /// Mask every trace carried by a result.
    pub fn result(&self, result: &mut TestResult) {
        if let Some(req) = result.request_trace.as_mut() {
            self.request(req);
        }
        if let Some(resp) = result.response_trace.as_mut() {
            self.headers(&mut resp.headers);
            resp.body = resp.body.as_deref().map(|b| self.scrub(b));
        }
        for step in &mut result.trace {
            self.step(step);
        }
        result.error = result.error.as_deref().map(|e| self.scrub(e));
    }
}

/// Whether a header name is a known credential header or reads like one
/// (`X-Client-Token`, `X-Service-Secret`, ...).
#[must_use]
pub fn looks_sensitive(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    SENSITIVE_HEADERS.contains(&lower.as_str())
        || SENSITIVE_NAME_PARTS.iter().any(|part| lower.contains(part))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn sensitive_headers_masked_case_insensitively() {
        let r = Redactor::new();
        let mut headers = BTreeMap::from([
            ("Authorization".to_string(), "Bearer abc".to_string()),
            ("Accept".to_string(), "application/json".to_string()),
        ]);
        r.headers(&mut headers);
        assert_eq!(headers["Authorization"], MASK);
        assert_eq!(headers["Accept"], "application/json");
    }

    #[test]
    fn secrets_scrubbed_from_url_and_body() {
        let mut r = Redactor::new();
        r.secret("s3cr3t-key").header("X-Custom-Key");
        let mut trace = RequestTrace {
            method: "GET".into(),
            url: "http://api.test/users?api_key=s3cr3t-key".into(),
            headers: BTreeMap::from([("X-Custom-Key".to_string(), "value".to_string())]),
            query: BTreeMap::from([("api_key".to_string(), "s3cr3t-key".to_string())]),
            body: Some(json!({"nested": ["s3cr3t-key"]})),
        };
        r.request(&mut trace);
        assert_eq!(trace.url, "http://api.test/users?api_key=***");
        assert_eq!(trace.headers["X-Custom-Key"], MASK);
        assert_eq!(trace.query["api_key"], MASK);
        assert_eq!(trace.body, Some(json!({"nested": ["***"]})));
    }

    #[test]
    fn short_secrets_ignored() {
        let mut r = Redactor::new();
        r.secret("").secret("a");
        assert_eq!(r.scrub("a cat"), "a cat");
    }

    #[test]
    fn encoded_secret_scrubbed_from_url() {
        let mut r = Redactor::new();
        r.secret("abc+def/ghi=");
        let url = "http://api.test/users?api_key=abc%2Bdef%2Fghi%3D&page=1";
        assert_eq!(r.scrub(url), "http://api.test/users?api_key=***&page=1");
        assert_eq!(r.scrub("raw abc+def/ghi="), "raw ***");
    }

    #[test]
    fn credential_like_header_names_masked() {
        let r = Redactor::new();
        for name in ["X-Client-Token", "X-Service-Secret", "x-apikey", "Cookie"] {
            assert!(r.is_sensitive_header(name), "{name}");
        }
        for name in ["Accept", "X-Env", "Content-Type"] {
            assert!(!r.is_sensitive_header(name), "{name}");
        }
    }
}

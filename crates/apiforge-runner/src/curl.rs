//! cURL command import: one command line → one endpoint
//!
//! Understands `-X/--request`, `-H/--header`, `-d/--data/--data-raw/
//! --data-binary`, `--json` and the URL. Everything else is skipped, along
//! with its argument when the flag is known to take one.

use std::collections::BTreeMap;

use serde_json::{Map, Value, json};
use url::Url;

use apiforge_core::model::{
    BodyEncoding, Endpoint, HttpMethod, ParamLocation, Parameter, RequestSchema,
};

use crate::spec::SpecParseError;

/// Flags whose argument is consumed and ignored.
const IGNORED_WITH_VALUE: &[&str] = &[
    "-u", "--user", "-o", "--output", "-A", "--user-agent", "-e", "--referer", "-b",
    "--cookie", "-m", "--max-time", "--connect-timeout", "-x", "--proxy", "-F", "--form",
];

/// Headers that describe the transport rather than the operation.
const TRANSPORT_HEADERS: &[&str] = &[
    "accept",
    "authorization",
    "content-type",
    "content-length",
    "cookie",
    "host",
    "user-agent",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CurlRequest {
    pub method: HttpMethod,
    pub url: Url,
    pub headers: BTreeMap<String, String>,
    pub body: Option<String>,
    /// Set by `--json`.
    pub json: bool,
}

/// Parse a cURL command line.
pub fn parse(command: &str) -> Result<CurlRequest, SpecParseError> {
    let words = split_words(command)?;
    let mut words = words.into_iter().peekable();
    if words.peek().map(String::as_str) == Some("curl") {
        words.next();
    }

    let mut method = None;
    let mut url = None;
    let mut headers = BTreeMap::new();
    let mut body: Option<String> = None;
    let mut json = false;

    while let Some(word) = words.next() {
        let mut value = |flag: &str| {
            words
                .next()
                .ok_or_else(|| SpecParseError::Curl(format!("{flag} needs a value")))
        };
        match word.as_str() {
            "-X" | "--request" => {
                let m = value(&word)?;
                method = Some(
                    m.parse::<HttpMethod>()
                        .map_err(|_| SpecParseError::Curl(format!("unsupported method '{m}'")))?,
                );
            }
            "-H" | "--header" => {
                let h = value(&word)?;
                let (name, v) = h
                    .split_once(':')
                    .ok_or_else(|| SpecParseError::Curl(format!("malformed header '{h}'")))?;
                headers.insert(name.trim().to_string(), v.trim().to_string());
            }
            "-d" | "--data" | "--data-raw" | "--data-binary" | "--json" => {
                let d = value(&word)?;
                json |= word == "--json";
                body = Some(match body {
                    Some(prev) => format!("{prev}&{d}"),
                    None => d,
                });
            }
            "--url" => url = Some(value(&word)?),
            w if IGNORED_WITH_VALUE.contains(&w) => {
                value(&word)?;
            }
            w if w.starts_with('-') => {}
            _ => url = Some(word.clone()),
        }
    }

    let raw = url.ok_or_else(|| SpecParseError::Curl("no URL given".into()))?;
    let url = Url::parse(&raw).map_err(|e| SpecParseError::Curl(format!("bad URL '{raw}': {e}")))?;
    let method = method.unwrap_or(if body.is_some() {
        HttpMethod::Post
    } else {
        HttpMethod::Get
    });
    Ok(CurlRequest {
        method,
        url,
        headers,
        body,
        json,
    })
}

impl CurlRequest {
    fn content_type(&self) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case("content-type"))
            .map(|(_, v)| v.as_str())
    }

    /// The endpoint this command calls, with schemas inferred from its inputs.
    #[must_use]
    pub fn to_endpoint(&self) -> Endpoint {
        let mut endpoint = Endpoint::new(self.method, self.url.path());
        endpoint.summary = Some("Imported from cURL".into());

        for (name, value) in self.url.query_pairs() {
            endpoint.parameters.push(Parameter {
                name: name.into_owned(),
                location: ParamLocation::Query,
                required: false,
                schema: infer_schema(&scalar(&value)),
                description: None,
            });
        }
        for name in self.headers.keys() {
            if TRANSPORT_HEADERS.contains(&name.to_ascii_lowercase().as_str()) {
                continue;
            }
            endpoint.parameters.push(Parameter {
                name: name.clone(),
                location: ParamLocation::Header,
                required: false,
                schema: json!({"type": "string"}),
                description: None,
            });
        }

        if let Some(body) = &self.body {
            endpoint.request_schema = Some(self.body_schema(body));
        }
        endpoint
    }

    fn body_schema(&self, body: &str) -> RequestSchema {
        let declared = self.content_type().map(str::to_ascii_lowercase);
        let parsed: Option<Value> = serde_json::from_str(body).ok();
        let is_json = self.json
            || declared.as_deref().is_some_and(|c| c.contains("json"))
            || parsed.as_ref().is_some_and(|v| v.is_object() || v.is_array());

        if is_json {
            let value = parsed.unwrap_or(Value::Null);
            let mut schema = infer_schema(&value);
            if let Value::Object(map) = &mut schema {
                map.insert("example".into(), value);
            }
            return RequestSchema {
                media_type: "application/json".into(),
                encoding: BodyEncoding::Json,
                schema,
                required: true,
            };
        }

        let fields: Map<String, Value> = url::form_urlencoded::parse(body.as_bytes())
            .map(|(k, v)| (k.into_owned(), scalar(&v)))
            .collect();
        let value = Value::Object(fields);
        let mut schema = infer_schema(&value);
        if let Value::Object(map) = &mut schema {
            map.insert("example".into(), value);
        }
        RequestSchema {
            media_type: "application/x-www-form-urlencoded".into(),
            encoding: BodyEncoding::FormUrlencoded,
            schema,
            required: true,
        }
    }
}

/// Numbers and booleans typed; anything else stays a string.
fn scalar(text: &str) -> Value {
    if let Ok(i) = text.parse::<i64>() {
        return json!(i);
    }
    if let Ok(f) = text.parse::<f64>() {
        if f.is_finite() {
            return json!(f);
        }
    }
    match text {
        "true" => Value::Bool(true),
        "false" => Value::Bool(false),
        _ => Value::String(text.to_string()),
    }
}

/// JSON Schema describing the shape of `value`. Every object key is required.
#[must_use]
pub fn infer_schema(value: &Value) -> Value {
    match value {
        Value::Null => json!({}),
        Value::Bool(_) => json!({"type": "boolean"}),
        Value::Number(n) if n.is_i64() || n.is_u64() => json!({"type": "integer"}),
        Value::Number(_) => json!({"type": "number"}),
        Value::String(_) => json!({"type": "string"}),
        Value::Array(items) => json!({
            "type": "array",
            "items": items.first().map_or_else(|| json!({}), infer_schema),
        }),
        Value::Object(map) => {
            let properties: Map<String, Value> =
                map.iter().map(|(k, v)| (k.clone(), infer_schema(v))).collect();
            json!({
                "type": "object",
                "required": map.keys().collect::<Vec<_>>(),
                "properties": properties,
            })
        }
    }
}

/// Split a command line into words, honouring quotes and line continuations.
fn split_words(command: &str) -> Result<Vec<String>, SpecParseError> {
    let mut words = Vec::new();
    let mut current = String::new();
    let mut in_word = false;
    let mut chars = command.chars();

    while let Some(c) = chars.next() {
        match c {
            '\'' => {
                in_word = true;
                loop {
                    match chars.next() {
                        Some('\'') => break,
                        Some(ch) => current.push(ch),
                        None => return Err(SpecParseError::Curl("unterminated single quote".into())),
                    }
                }
            }
            '"' => {
                in_word = true;
                loop {
                    match chars.next() {
                        Some('"') => break,
                        Some('\\') => match chars.next() {
                            Some(ch @ ('"' | '\\' | '$' | '`')) => current.push(ch),
                            Some('\n') => {}
                            Some(ch) => {
                                current.push('\\');
                                current.push(ch);
                            }
                            None => break,
                        },
                        Some(ch) => current.push(ch),
                        None => return Err(SpecParseError::Curl("unterminated double quote".into())),
                    }
                }
            }
            '\\' => match chars.next() {
                Some('\n' | '\r') | None => {}
                Some(ch) => {
                    in_word = true;
                    current.push(ch);
                }
            },
            c if c.is_whitespace() => {
                if in_word {
                    words.push(std::mem::take(&mut current));
                    in_word = false;
                }
            }
            c => {
                in_word = true;
                current.push(c);
            }
        }
    }
    if in_word {
        words.push(current);
    }
    Ok(words)
}

//! Where a spec comes from: file, URL, pasted text or a cURL command

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use tracing::{debug, info};

use crate::curl;
use crate::spec::{self, SpecDocument, SpecParseError, SpecVersion};

/// Timeout for fetching a spec over HTTP.
pub const FETCH_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpecSource {
    File(PathBuf),
    Url(String),
    Text(String),
    Curl(String),
}

impl fmt::Display for SpecSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::File(path) => write!(f, "{}", path.display()),
            Self::Url(url) => f.write_str(url),
            Self::Text(_) => f.write_str("<text>"),
            Self::Curl(_) => f.write_str("<curl>"),
        }
    }
}

impl SpecSource {
    /// Read and parse the source into endpoints.
    ///
    /// # Errors
    ///
    /// Any read, fetch, parse or resolution failure, as [`SpecParseError`].
    pub async fn load(&self) -> Result<SpecDocument, SpecParseError> {
        let doc = match self {
            Self::File(path) => spec::load_file(path)?,
            Self::Url(url) => {
                let body = fetch(url).await?;
                spec::load(None, &body)?
            }
            Self::Text(text) => spec::load(None, text)?,
            Self::Curl(command) => {
                let request = curl::parse(command)?;
                SpecDocument {
                    version: SpecVersion::OpenApi3,
                    title: None,
                    description: None,
                    endpoints: vec![request.to_endpoint()],
                    schemas: Default::default(),
                }
            }
        };
        info!(source = %self, endpoints = doc.endpoints.len(), "spec loaded");
        Ok(doc)
    }
}

/// GET a spec document over http(s).
///
/// # Errors
///
/// Non-http(s) URLs, transport failures, non-2xx statuses and empty bodies.
pub async fn fetch(url: &str) -> Result<String, SpecParseError> {
    let url = url.trim();
    let fail = |reason: String| SpecParseError::Fetch {
        url: url.to_string(),
        reason,
    };
    if !(url.starts_with("http://") || url.starts_with("https://")) {
        return Err(fail("URL must start with http:// or https://".into()));
    }

    let client = reqwest::Client::builder()
        .timeout(FETCH_TIMEOUT)
        .build()
        .map_err(|e| fail(e.to_string()))?;
    debug!(url, "fetching spec");
    let response = client.get(url).send().await.map_err(|e| {
        if e.is_timeout() {
            fail(format!("no response within {}s", FETCH_TIMEOUT.as_secs()))
        } else {
            fail(e.to_string())
        }
    })?;

    let status = response.status();
    if !status.is_success() {
        return Err(fail(format!("HTTP {}", status.as_u16())));
    }
    let body = response.text().await.map_err(|e| fail(e.to_string()))?;
    if body.trim().is_empty() {
        return Err(fail("empty response".into()));
    }
    Ok(body)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn text_and_curl_sources() {
        let text = SpecSource::Text(
            "openapi: 3.0.0\npaths:\n  /ping:\n    get:\n      responses:\n        '200':\n          description: ok\n"
                .into(),
        );
        let doc = text.load().await.unwrap();
        assert_eq!(doc.endpoints.len(), 1);
        assert_eq!(doc.endpoints[0].path, "/ping");

        let curl = SpecSource::Curl("curl -X DELETE https://h.test/items/7".into());
        let doc = curl.load().await.unwrap();
        assert_eq!(doc.endpoints[0].method, apiforge_core::model::HttpMethod::Delete);
        assert_eq!(doc.endpoints[0].path, "/items/7");
    }

    #[tokio::test]
    async fn missing_file_is_io_error() {
        let err = SpecSource::File("/nonexistent/spec.yaml".into()).load().await.unwrap_err();
        assert!(matches!(err, SpecParseError::Io(..)));
    }

    #[tokio::test]
    async fn non_http_urls_are_rejected_before_fetching() {
        for url in ["ftp://h.test/spec.json", "file:///etc/passwd", ""] {
            let err = fetch(url).await.unwrap_err();
            assert!(err.to_string().contains("http:// or https://"), "{url}: {err}");
        }
    }
}

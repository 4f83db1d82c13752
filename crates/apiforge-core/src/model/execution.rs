//! Execution records: results, traces and run-level summaries

use std::collections::BTreeMap;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::OffsetDateTime;

use super::case::{Assertion, TestCategory};
use super::endpoint::HttpMethod;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Running,
    Completed,
    Failed,
}

impl ExecutionStatus {
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        !matches!(self, Self::Running)
    }
}

/// Outcome of one executed test case.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ResultStatus {
    /// Every assertion held.
    Passed,
    /// The request completed but at least one assertion did not hold.
    Failed,
    /// The request itself could not be completed.
    Error,
}

impl std::fmt::Display for ResultStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Passed => "passed",
            Self::Failed => "failed",
            Self::Error => "error",
        })
    }
}

/// Request as sent, with secrets masked.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct RequestTrace {
    pub method: String,
    pub url: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub query: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
}

/// Response as received; the body is truncated for storage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ResponseTrace {
    pub status_code: u16,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    pub elapsed_ms: u64,
}

/// One request/response pair inside a multi-step case (e.g. token fetch, then the call).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ExecutionStep {
    pub step: String,
    pub request: RequestTrace,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<ResponseTrace>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct AssertionResult {
    pub assertion: Assertion,
    pub passed: bool,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actual_value: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct TestResult {
    pub test_case_index: u64,
    pub test_name: String,
    pub test_type: TestCategory,
    pub endpoint: String,
    pub method: HttpMethod,
    pub status: ResultStatus,
    pub expected_status: Vec<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actual_status: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_trace: Option<RequestTrace>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_trace: Option<ResponseTrace>,
    #[serde(default)]
    pub assertion_results: Vec<AssertionResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub trace: Vec<ExecutionStep>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_time_ms: Option<u64>,
    /// Security case whose injected input was not handled safely.
    #[serde(default)]
    pub security_finding: bool,
}

impl TestResult {
    /// Failed assertions, in declaration order.
    pub fn failed_assertions(&self) -> impl Iterator<Item = &AssertionResult> {
        self.assertion_results.iter().filter(|r| !r.passed)
    }
}

/// Running counters of an execution.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct Summary {
    /// Cases scheduled for this execution.
    pub total: u64,
    pub passed: u64,
    pub failed: u64,
    pub errors: u64,
    /// Results recorded so far; `results[progress - 1]` is final.
    pub progress: u64,
}

impl Summary {
    /// Pass rate in percent, rounded to two decimals.
    #[must_use]
    pub fn pass_rate(&self) -> f64 {
        pass_rate(self.passed, self.total)
    }
}

/// `passed / total * 100` rounded to two decimals; `0.0` for an empty total.
#[must_use]
pub fn pass_rate(passed: u64, total: u64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    (passed as f64 / total as f64 * 10_000.0).round() / 100.0
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct TestExecution {
    pub id: String,
    pub test_suite_id: String,
    pub status: ExecutionStatus,
    #[serde(with = "time::serde::rfc3339")]
    #[schemars(with = "String")]
    pub started_at: OffsetDateTime,
    #[serde(default, with = "time::serde::rfc3339::option")]
    #[schemars(with = "Option<String>")]
    pub completed_at: Option<OffsetDateTime>,
    #[serde(default)]
    pub results: Vec<TestResult>,
    pub summary: Summary,
    /// Why the execution could not run, for `failed` executions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TestExecution {
    /// A fresh `running` execution of `total` scheduled cases.
    pub fn start(id: impl Into<String>, test_suite_id: impl Into<String>, total: u64) -> Self {
        Self {
            id: id.into(),
            test_suite_id: test_suite_id.into(),
            status: ExecutionStatus::Running,
            started_at: OffsetDateTime::now_utc(),
            completed_at: None,
            results: Vec::new(),
            summary: Summary {
                total,
                ..Summary::default()
            },
            error: None,
        }
    }

    /// Append one final result and advance the counters.
    pub fn record(&mut self, result: TestResult) {
        match result.status {
            ResultStatus::Passed => self.summary.passed += 1,
            ResultStatus::Failed => self.summary.failed += 1,
            ResultStatus::Error => self.summary.errors += 1,
        }
        self.results.push(result);
        self.summary.progress = self.results.len() as u64;
    }

    pub fn complete(&mut self) {
        self.status = ExecutionStatus::Completed;
        self.completed_at = Some(OffsetDateTime::now_utc());
    }

    pub fn fail(&mut self, error: impl Into<String>) {
        self.status = ExecutionStatus::Failed;
        self.completed_at = Some(OffsetDateTime::now_utc());
        self.error = Some(error.into());
    }
}

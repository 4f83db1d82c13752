//! Aggregation of historical executions into reports
//!
//! Pure: the caller passes the executions in scope and the current time.

use std::collections::BTreeMap;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use time::{Duration, OffsetDateTime};

use crate::model::{ResultStatus, TestExecution, pass_rate};

/// Security findings kept in a report.
pub const MAX_SECURITY_FINDINGS: usize = 50;
/// Endpoints listed in the performance table.
pub const MAX_ENDPOINTS: usize = 20;

// ── Data types ──

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ReportSummary {
    pub total_executions: u64,
    pub total_tests: u64,
    pub total_passed: u64,
    pub total_failed: u64,
    pub total_errors: u64,
    /// Percent, two decimals.
    pub pass_rate: f64,
    pub period_days: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct DailyTrend {
    /// `YYYY-MM-DD` of completion.
    pub date: String,
    pub executions: u64,
    pub tests: u64,
    pub passed: u64,
    pub failed: u64,
    pub errors: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct SecurityFinding {
    pub test_name: String,
    pub endpoint: String,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub execution_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct EndpointPerformance {
    pub endpoint: String,
    pub method: String,
    pub total: u64,
    pub passed: u64,
    pub failed: u64,
    pub errors: u64,
    /// Mean response time over results that got a response.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avg_response_ms: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct TimeRange {
    pub start: String,
    pub end: String,
}

/// Complete report over a time window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Report {
    pub summary: ReportSummary,
    pub test_type_breakdown: BTreeMap<String, u64>,
    pub status_breakdown: BTreeMap<String, u64>,
    pub daily_trends: Vec<DailyTrend>,
    pub security_findings: Vec<SecurityFinding>,
    pub endpoint_performance: Vec<EndpointPerformance>,
    pub time_range: TimeRange,
}

// ── Computation ──

/// Whether an execution falls in a window starting at `start`.
///
/// Executions that never completed are always included.
#[must_use]
pub fn in_window(execution: &TestExecution, start: OffsetDateTime) -> bool {
    execution.completed_at.is_none_or(|t| t >= start)
}

/// Build a report over the last `days` days ending at `now`.
#[must_use]
pub fn build_report(executions: &[TestExecution], days: u32, now: OffsetDateTime) -> Report {
    let start = now - Duration::days(i64::from(days));
    let scoped: Vec<&TestExecution> = executions.iter().filter(|e| in_window(e, start)).collect();
    aggregate(&scoped, days, start, now)
}

/// Report over the most recently started execution only.
#[must_use]
pub fn last_run_report(executions: &[TestExecution]) -> Option<Report> {
    let last = executions.iter().max_by_key(|e| e.started_at)?;
    let end = last.completed_at.unwrap_or(last.started_at);
    Some(aggregate(&[last], 0, last.started_at, end))
}

fn aggregate(
    executions: &[&TestExecution],
    days: u32,
    start: OffsetDateTime,
    end: OffsetDateTime,
) -> Report {
    let mut summary = ReportSummary {
        total_executions: executions.len() as u64,
        total_tests: 0,
        total_passed: 0,
        total_failed: 0,
        total_errors: 0,
        pass_rate: 0.0,
        period_days: days,
    };
    let mut test_types: BTreeMap<String, u64> = BTreeMap::new();
    let mut daily: BTreeMap<String, DailyTrend> = BTreeMap::new();
    let mut findings = Vec::new();
    let mut endpoints: BTreeMap<String, (EndpointPerformance, u64, u64)> = BTreeMap::new();

    for exec in executions {
        let s = exec.summary;
        summary.total_tests += s.total;
        summary.total_passed += s.passed;
        summary.total_failed += s.failed;
        summary.total_errors += s.errors;

        let completed = exec.completed_at.map(date_key);
        if let Some(date) = &completed {
            let day = daily.entry(date.clone()).or_insert_with(|| DailyTrend {
                date: date.clone(),
                ..DailyTrend::default()
            });
            day.executions += 1;
            day.tests += s.total;
            day.passed += s.passed;
            day.failed += s.failed;
            day.errors += s.errors;
        }

        for result in &exec.results {
            *test_types.entry(result.test_type.to_string()).or_default() += 1;

            if result.security_finding {
                findings.push(SecurityFinding {
                    test_name: result.test_name.clone(),
                    endpoint: result.endpoint.clone(),
                    method: result.method.to_string(),
                    error: result.error.clone(),
                    execution_id: exec.id.clone(),
                    date: exec.completed_at.map(rfc3339),
                });
            }

            let key = format!("{} {}", result.method, result.endpoint);
            let (perf, time_sum, timed) = endpoints.entry(key).or_insert_with(|| {
                (
                    EndpointPerformance {
                        endpoint: result.endpoint.clone(),
                        method: result.method.to_string(),
                        ..EndpointPerformance::default()
                    },
                    0,
                    0,
                )
            });
            perf.total += 1;
            match result.status {
                ResultStatus::Passed => perf.passed += 1,
                ResultStatus::Failed => perf.failed += 1,
                ResultStatus::Error => perf.errors += 1,
            }
            if let Some(ms) = result.response_time_ms {
                *time_sum += ms;
                *timed += 1;
            }
        }
    }

    summary.pass_rate = pass_rate(summary.total_passed, summary.total_tests);
    findings.truncate(MAX_SECURITY_FINDINGS);

    let endpoint_performance = endpoints
        .into_values()
        .take(MAX_ENDPOINTS)
        .map(|(mut perf, sum, n)| {
            if n > 0 {
                perf.avg_response_ms = Some((sum as f64 / n as f64 * 100.0).round() / 100.0);
            }
            perf
        })
        .collect();

    let status_breakdown = BTreeMap::from([
        ("passed".to_string(), summary.total_passed),
        ("failed".to_string(), summary.total_failed),
        ("errors".to_string(), summary.total_errors),
    ]);

    Report {
        summary,
        test_type_breakdown: test_types,
        status_breakdown,
        daily_trends: daily.into_values().collect(),
        security_findings: findings,
        endpoint_performance,
        time_range: TimeRange {
            start: rfc3339(start),
            end: rfc3339(end),
        },
    }
}

fn date_key(t: OffsetDateTime) -> String {
    format!("{:04}-{:02}-{:02}", t.year(), u8::from(t.month()), t.day())
}

fn rfc3339(t: OffsetDateTime) -> String {
    t.format(&time::format_description::well_known::Rfc3339)
        .unwrap_or_else(|_| t.unix_timestamp().to_string())
}

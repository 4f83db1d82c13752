//! Terminal rendering for `--output terminal`

use apiforge_core::model::{
    ActivityEntry, Endpoint, ExecutionStatus, ResultStatus, TestExecution, TestResult, TestSuite,
};
use apiforge_core::project::{ConfigView, Project};
use apiforge_core::report::Report;
use apiforge_runner::{ConnectionCheck, GenerateOutcome, ImportOutcome};

fn status_tag(status: ResultStatus) -> &'static str {
    match status {
        ResultStatus::Passed => "PASS ",
        ResultStatus::Failed => "FAIL ",
        ResultStatus::Error => "ERROR",
    }
}

pub fn import(outcome: &ImportOutcome) {
    println!(
        "Imported into '{}': {} added, {} already present ({} endpoints total)",
        outcome.project_id,
        outcome.added.len(),
        outcome.skipped.len(),
        outcome.total_endpoints
    );
    for e in &outcome.added {
        println!("  + {e}");
    }
}

pub fn projects(projects: &[Project]) {
    if projects.is_empty() {
        println!("No projects. Import a spec with `apiforge import <project> <file>`");
        return;
    }
    for p in projects {
        println!("{:<24} {:<32} {} endpoints", p.id, p.name, p.endpoints.len());
    }
}

pub fn endpoints(endpoints: &[Endpoint]) {
    for e in endpoints {
        let summary = e.summary.as_deref().unwrap_or_default();
        println!("{:<7} {:<40} {summary}", e.method.to_string(), e.path);
    }
    println!("\n{} endpoints", endpoints.len());
}

pub fn generated(outcome: &GenerateOutcome) {
    println!(
        "Generated {} test cases in suite '{}' ({} total)",
        outcome.added, outcome.suite_id, outcome.total_cases
    );
    if !outcome.skipped_existing.is_empty() {
        println!("Skipped {} endpoint(s) that already have cases:", outcome.skipped_existing.len());
        for e in &outcome.skipped_existing {
            println!("  = {e}");
        }
    }
    for w in &outcome.warnings {
        eprintln!("Warning: {}: {}", w.endpoint, w.message);
    }
}

pub fn suite(suite: &TestSuite) {
    println!("{} ({} test cases)", suite.name, suite.test_cases.len());
    for (endpoint, cases) in suite.grouped_by_endpoint() {
        println!("\n{endpoint}");
        for c in cases {
            println!(
                "  #{:<4} {:<11} {}  expect {:?}",
                c.index,
                c.category.to_string(),
                c.name,
                c.expected_status
            );
        }
    }
    let counts = suite.count_by_category();
    if !counts.is_empty() {
        let parts: Vec<String> = counts.iter().map(|(k, v)| format!("{k}: {v}")).collect();
        println!("\n{}", parts.join(", "));
    }
}

fn describe(result: &TestResult) -> String {
    let status = result
        .actual_status
        .map_or_else(|| "---".to_string(), |s| s.to_string());
    format!(
        "{} {status} #{} {} {} - {}",
        status_tag(result.status),
        result.test_case_index,
        result.method,
        result.endpoint,
        result.test_name
    )
}

/// Progress line for `execute --follow`; `position` is 1-based.
pub fn result_line(result: &TestResult, position: usize, total: u64) {
    println!("[{position}/{total}] {}", describe(result));
}

pub fn result_detail(result: &TestResult) {
    println!("{}", describe(result));
    if let Some(ms) = result.response_time_ms {
        println!("  time: {ms} ms");
    }
    if let Some(error) = &result.error {
        println!("  error: {error}");
    }
    for a in &result.assertion_results {
        println!("  [{}] {}", if a.passed { "ok" } else { "x " }, a.message);
    }
    if let Some(body) = result.response_trace.as_ref().and_then(|r| r.body.as_deref()) {
        println!("  body: {body}");
    }
}

pub fn execution(execution: &TestExecution) {
    let s = &execution.summary;
    let label = match execution.status {
        ExecutionStatus::Running => "RUNNING",
        ExecutionStatus::Completed if s.failed + s.errors == 0 => "PASS",
        ExecutionStatus::Completed => "FAIL",
        ExecutionStatus::Failed => "ABORTED",
    };
    println!(
        "\n{label}: execution {} ({}/{} done)",
        execution.id, s.progress, s.total
    );
    println!(
        "  {} passed, {} failed, {} errors ({:.2}% pass rate)",
        s.passed,
        s.failed,
        s.errors,
        s.pass_rate()
    );
    if let Some(error) = &execution.error {
        println!("  reason: {error}");
    }

    let failing: Vec<&TestResult> = execution
        .results
        .iter()
        .filter(|r| r.status != ResultStatus::Passed)
        .collect();
    if !failing.is_empty() {
        println!("\nNot passing ({}):", failing.len());
        for r in failing {
            println!(
                "  #{} {} {} {} - {}",
                r.test_case_index,
                status_tag(r.status),
                r.method,
                r.endpoint,
                r.test_name
            );
            if let Some(e) = &r.error {
                println!("         {e}");
            }
            for a in r.failed_assertions() {
                println!("         {}", a.message);
            }
        }
    }
}

pub fn config(view: &ConfigView) {
    println!("  base_url: {}", view.base_url);
    println!(
        "  auth:     {}{}",
        view.auth_type,
        if view.has_auth { " (secret stored)" } else { "" }
    );
    if let Some(t) = view.timeout_secs {
        println!("  timeout:  {t}s");
    }
    if !view.headers.is_empty() {
        println!("  headers:  {}", view.headers.join(", "));
    }
    if let Some(model) = &view.llm_model {
        let provider = view
            .llm_provider
            .map(|p| format!("{p:?}").to_lowercase())
            .unwrap_or_default();
        println!(
            "  llm:      {provider} {model}{}",
            if view.has_llm_key { " (key stored)" } else { "" }
        );
    }
}

pub fn connection(check: &ConnectionCheck) {
    match (check.reachable, check.status) {
        (true, Some(status)) => println!("Reachable: {} answered HTTP {status} in {} ms", check.url, check.elapsed_ms),
        _ => println!(
            "Unreachable: {} ({})",
            check.url,
            check.error.as_deref().unwrap_or("no response")
        ),
    }
}

pub fn report(report: &Report) {
    let s = &report.summary;
    println!("Last {} days: {} executions, {} tests", s.period_days, s.total_executions, s.total_tests);
    println!(
        "  {} passed, {} failed, {} errors ({:.2}% pass rate)",
        s.total_passed, s.total_failed, s.total_errors, s.pass_rate
    );

    if !report.test_type_breakdown.is_empty() {
        println!("\nBy type:");
        for (k, v) in &report.test_type_breakdown {
            println!("  {k:<12} {v}");
        }
    }
    if !report.daily_trends.is_empty() {
        println!("\nDaily:");
        for d in &report.daily_trends {
            println!("  {}  {} runs, {} passed / {} tests", d.date, d.executions, d.passed, d.tests);
        }
    }
    if !report.security_findings.is_empty() {
        println!("\nSecurity findings ({}):", report.security_findings.len());
        for f in &report.security_findings {
            println!("  {} {} - {} (execution {})", f.method, f.endpoint, f.test_name, f.execution_id);
        }
    }
    if !report.endpoint_performance.is_empty() {
        println!("\nEndpoints:");
        for p in &report.endpoint_performance {
            let avg = p
                .avg_response_ms
                .map_or_else(|| "-".to_string(), |ms| format!("{ms:.0} ms"));
            println!(
                "  {:<7} {:<40} {}/{} passed, avg {avg}",
                p.method, p.endpoint, p.passed, p.total
            );
        }
    }
}

pub fn activity(entries: &[ActivityEntry]) {
    if entries.is_empty() {
        println!("No activity recorded");
        return;
    }
    let format = time::format_description::well_known::Rfc3339;
    for e in entries {
        let at = e.created_at.format(&format).unwrap_or_default();
        let details: Vec<String> = e
            .details
            .iter()
            .filter(|(_, v)| !v.is_null())
            .map(|(k, v)| match v {
                serde_json::Value::String(s) => format!("{k}={s}"),
                other => format!("{k}={other}"),
            })
            .collect();
        println!("{at}  {:<10} {:<24} {}", e.actor, e.action.as_str(), details.join(" "));
    }
}

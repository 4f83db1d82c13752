//! Import → generate → execute → report through the engine facade

mod common;

use std::collections::BTreeSet;
use std::sync::Arc;

use tokio_stream::StreamExt;

use apiforge_core::config::Settings;
use apiforge_core::export::ExportFormat;
use apiforge_core::model::{
    ActivityAction, CaseEdit, Endpoint, EndpointRef, ExecutionStatus, HttpMethod, ResultStatus, TestCase, TestCategory,
};
use apiforge_core::project::{AuthConfig, ConfigUpdate};
use apiforge_core::secret::KeyedCipher;
use apiforge_core::store::{MemoryStore, Store};
use apiforge_runner::{
    CaseContributor, CaseOverrides, ContributorError, Engine, EngineError, SpecSource,
};

use common::MockServer;

const USERS_API: &str = r#"
openapi: 3.0.3
info:
  title: Users
  version: "1"
paths:
  /users:
    get:
      operationId: listUsers
      responses:
        '200':
          description: ok
          content:
            application/json:
              schema:
                type: array
                items:
                  $ref: '#/components/schemas/User'
    post:
      operationId: createUser
      requestBody:
        required: true
        content:
          application/json:
            schema:
              type: object
              required: [name]
              properties:
                name: { type: string, minLength: 1 }
      responses:
        '201':
          description: created
          content:
            application/json:
              schema:
                $ref: '#/components/schemas/User'
components:
  schemas:
    User:
      type: object
      required: [id, name]
      properties:
        id: { type: integer }
        name: { type: string }
"#;

fn users_target() -> MockServer {
    MockServer::start(|seen| match (seen.method.as_str(), seen.path()) {
        ("GET", "/users") => (200, r#"[{"id":1,"name":"Ada"}]"#.into()),
        ("POST", "/users") => (201, r#"{"id":2,"name":"Grace"}"#.into()),
        _ => (404, "{}".into()),
    })
}

fn engine() -> Engine<MemoryStore> {
    Engine::new(
        Arc::new(MemoryStore::new()),
        Arc::new(KeyedCipher::new(b"engine-test-key")),
        Settings::default(),
    )
}

async fn configured(engine: &Engine<MemoryStore>, base_url: String) {
    engine
        .import("users", &SpecSource::Text(USERS_API.into()), false)
        .await
        .unwrap();
    engine
        .save_config(
            "users",
            ConfigUpdate {
                base_url: Some(base_url),
                auth: Some(AuthConfig::Bearer {
                    token: Some("tok-engine-secret".into()),
                }),
                ..ConfigUpdate::default()
            },
        )
        .unwrap();
}

fn happy_only() -> Option<BTreeSet<TestCategory>> {
    Some(BTreeSet::from([TestCategory::HappyPath]))
}

#[tokio::test]
async fn happy_path_round_trip() {
    let target = users_target();
    let engine = engine();
    configured(&engine, target.url()).await;

    let generated = engine.generate("users", None, happy_only()).unwrap();
    assert_eq!(generated.added, 2);
    assert!(generated.warnings.is_empty());

    let handle = engine.execute(&generated.suite_id, None).unwrap();
    let done = handle.wait().await;
    assert_eq!(done.status, ExecutionStatus::Completed);
    assert_eq!(done.summary.passed, 2, "{:#?}", done.results);

    for seen in target.seen() {
        assert_eq!(seen.header("authorization"), Some("Bearer tok-engine-secret"));
    }
    let stored = serde_json::to_string(&engine.store().get_execution(handle.id()).unwrap()).unwrap();
    assert!(!stored.contains("tok-engine-secret"));

    let report = engine.report(Some("users"), 7).unwrap();
    assert_eq!(report.summary.total_executions, 1);
    assert_eq!(report.summary.total_tests, 2);
}

#[tokio::test]
async fn regenerating_skips_covered_endpoints_and_keeps_indices() {
    let target = users_target();
    let engine = engine();
    configured(&engine, target.url()).await;

    let first = engine.generate("users", None, happy_only()).unwrap();
    let again = engine.generate("users", None, happy_only()).unwrap();
    assert_eq!(again.added, 0);
    assert_eq!(again.skipped_existing.len(), 2);

    let get_users = EndpointRef::new(HttpMethod::Get, "/users");
    assert_eq!(engine.delete_cases(&first.suite_id, Some(&[get_users.clone()])).unwrap(), 1);
    let refill = engine.generate("users", Some(vec![get_users]), happy_only()).unwrap();
    assert_eq!(refill.added, 1);

    let suite = engine.get_cases(&first.suite_id).unwrap();
    let indices: Vec<u64> = suite.test_cases.iter().map(|c| c.index).collect();
    assert_eq!(indices, vec![1, 2]);
}

#[tokio::test]
async fn single_run_with_overrides_leaves_stored_case_untouched() {
    let target = users_target();
    let engine = engine();
    configured(&engine, target.url()).await;
    let generated = engine.generate("users", None, happy_only()).unwrap();
    let suite = engine.get_cases(&generated.suite_id).unwrap();
    let post = suite
        .test_cases
        .iter()
        .find(|c| c.endpoint.method == HttpMethod::Post)
        .unwrap();

    let overrides = CaseOverrides {
        headers: Some([("X-Debug".to_string(), "1".to_string())].into()),
        ..CaseOverrides::default()
    };
    let result = engine
        .execute_single(&generated.suite_id, post.index, Some(&overrides))
        .await
        .unwrap();
    assert_eq!(result.status, ResultStatus::Passed);
    assert_eq!(target.seen().last().unwrap().header("x-debug"), Some("1"));

    let after = engine.get_cases(&generated.suite_id).unwrap();
    assert!(after.case(post.index).unwrap().headers.is_empty());
}

#[tokio::test]
async fn execution_failure_modes() {
    let engine = engine();
    engine
        .import("users", &SpecSource::Text(USERS_API.into()), false)
        .await
        .unwrap();
    let generated = engine.generate("users", None, happy_only()).unwrap();

    // No config yet.
    assert!(matches!(
        engine.execute(&generated.suite_id, None),
        Err(EngineError::NoConfig(_))
    ));

    engine
        .save_config(
            "users",
            ConfigUpdate {
                base_url: Some("http://127.0.0.1:1".into()),
                ..ConfigUpdate::default()
            },
        )
        .unwrap();
    assert!(engine.execute(&generated.suite_id, Some(&[99])).is_err());

    let mut stream = engine.execute(&generated.suite_id, Some(&[0])).unwrap().stream();
    let mut last = None;
    while let Some(state) = stream.next().await {
        let terminal = state.status.is_terminal();
        last = Some(state);
        if terminal {
            break;
        }
    }
    let last = last.unwrap();
    assert_eq!(last.status, ExecutionStatus::Completed);
    assert_eq!(last.summary.errors, 1);
}

#[tokio::test]
async fn merge_import_adds_only_new_endpoints() {
    let engine = engine();
    engine
        .import("users", &SpecSource::Text(USERS_API.into()), false)
        .await
        .unwrap();
    let outcome = engine
        .import(
            "users",
            &SpecSource::Curl("curl -X DELETE https://api.test/users/1".into()),
            true,
        )
        .await
        .unwrap();
    assert_eq!(outcome.added, vec![EndpointRef::new(HttpMethod::Delete, "/users/1")]);
    assert_eq!(outcome.total_endpoints, 3);

    let again = engine
        .import("users", &SpecSource::Text(USERS_API.into()), true)
        .await
        .unwrap();
    assert!(again.added.is_empty());
    assert_eq!(again.skipped.len(), 2);
    assert_eq!(engine.project("users").unwrap().sources.len(), 3);
}

#[tokio::test]
async fn config_view_and_exports_hide_secrets() {
    let engine = engine();
    configured(&engine, "https://api.test/".into()).await;

    let view = engine.get_config("users").unwrap().unwrap();
    assert_eq!(view.base_url, "https://api.test");
    assert_eq!(view.auth_type, "bearer");
    assert!(view.has_auth);
    assert!(!serde_json::to_string(&view).unwrap().contains("tok-engine-secret"));

    let generated = engine.generate("users", None, happy_only()).unwrap();
    let http = engine.export(&generated.suite_id, ExportFormat::Http).unwrap();
    assert!(http.contains("@base_url = https://api.test"));
    assert!(http.contains("GET {{base_url}}/users"));
    let postman: serde_json::Value =
        serde_json::from_str(&engine.export(&generated.suite_id, ExportFormat::Postman).unwrap()).unwrap();
    assert_eq!(postman["item"].as_array().map(Vec::len), Some(2));
}

struct Unauthorized;

impl CaseContributor for Unauthorized {
    fn name(&self) -> &str {
        "unauthorized"
    }

    fn contribute(&self, endpoint: &Endpoint) -> Result<Vec<TestCase>, ContributorError> {
        let mut case = TestCase::new(
            TestCategory::Security,
            format!("{}: no credentials", endpoint.operation_id),
            endpoint.endpoint_ref(),
            vec![401],
        );
        case.headers.insert("Authorization".into(), String::new());
        Ok(vec![case])
    }
}

#[tokio::test]
async fn contributors_extend_generated_suites() {
    let engine = engine().with_contributor(Arc::new(Unauthorized));
    engine
        .import("users", &SpecSource::Text(USERS_API.into()), false)
        .await
        .unwrap();
    let generated = engine.generate("users", None, happy_only()).unwrap();
    assert_eq!(generated.added, 4);

    let suite = engine.get_cases(&generated.suite_id).unwrap();
    let contributed: Vec<u64> = suite
        .test_cases
        .iter()
        .filter(|c| c.expected_status == vec![401])
        .map(|c| c.index)
        .collect();
    assert_eq!(contributed, vec![1, 3]);
}

#[tokio::test]
async fn finished_executions_leave_the_live_set() {
    let target = users_target();
    let engine = engine();
    configured(&engine, target.url()).await;
    let generated = engine.generate("users", None, happy_only()).unwrap();

    let handle = engine.execute(&generated.suite_id, None).unwrap();
    let done = handle.wait().await;
    assert!(engine.running().is_empty());
    assert_eq!(engine.get_execution(handle.id()).unwrap(), done);

    let mut stream = engine.subscribe(handle.id()).unwrap();
    assert_eq!(stream.next().await.unwrap().status, ExecutionStatus::Completed);
}

#[tokio::test]
async fn project_changes_are_recorded_as_activity() {
    let target = users_target();
    let engine = engine().with_actor("ada");
    configured(&engine, target.url()).await;

    let generated = engine.generate("users", None, happy_only()).unwrap();
    engine
        .update_case(
            &generated.suite_id,
            0,
            CaseEdit {
                expected_status: Some(vec![200, 204]),
                ..CaseEdit::default()
            },
        )
        .unwrap();
    engine
        .save_config(
            "users",
            ConfigUpdate {
                timeout_secs: Some(3),
                ..ConfigUpdate::default()
            },
        )
        .unwrap();
    let handle = engine.execute(&generated.suite_id, None).unwrap();
    handle.wait().await;
    let get_users = EndpointRef::new(HttpMethod::Get, "/users");
    engine
        .delete_cases(&generated.suite_id, Some(&[get_users]))
        .unwrap();

    let entries = engine.activity("users", 50).unwrap();
    let actions: Vec<ActivityAction> = entries.iter().map(|e| e.action).collect();
    assert_eq!(
        actions,
        vec![
            ActivityAction::DeletedEndpointTests,
            ActivityAction::StartedExecution,
            ActivityAction::UpdatedConfig,
            ActivityAction::UpdatedTestCase,
            ActivityAction::GeneratedTests,
            ActivityAction::CreatedConfig,
            ActivityAction::ImportedSpec,
        ]
    );
    assert!(entries.iter().all(|e| e.actor == "ada"));

    assert_eq!(entries[0].details["deleted"], 1);
    assert_eq!(entries[0].details["endpoints"], serde_json::json!(["GET /users"]));
    assert_eq!(entries[1].details["execution_id"], handle.id());
    assert_eq!(entries[1].details["total"], 2);
    assert_eq!(entries[4].details["added"], 2);

    let trail = serde_json::to_string(&entries).unwrap();
    assert!(!trail.contains("tok-engine-secret"));
    assert_eq!(engine.activity("users", 2).unwrap().len(), 2);
    assert!(engine.activity("nope", 5).is_err());
}

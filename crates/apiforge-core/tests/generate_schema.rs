//! Writes the interchange schemas to the workspace root
//!
//! Run with: cargo test -p apiforge-core --test generate_schema

use std::path::Path;

use apiforge_core::schema::{SchemaKind, generate};

fn workspace_root() -> &'static Path {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .parent()
        .and_then(Path::parent)
        .unwrap()
}

#[test]
fn write_schema_files() {
    for (kind, file, title) in [
        (SchemaKind::TestExecution, "test-execution.schema.json", "TestExecution"),
        (SchemaKind::TestSuite, "test-suite.schema.json", "TestSuite"),
    ] {
        let schema = generate(kind).unwrap();
        let path = workspace_root().join(file);
        std::fs::write(&path, &schema).expect("failed to write schema file");

        let parsed: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(parsed.get("title").and_then(|v| v.as_str()), Some(title));
    }
}

#[test]
fn execution_schema_defines_result_status() {
    let parsed: serde_json::Value = serde_json::from_str(&generate(SchemaKind::TestExecution).unwrap()).unwrap();
    let status = &parsed["$defs"]["ResultStatus"];
    assert!(status.is_object(), "ResultStatus missing from $defs");
}

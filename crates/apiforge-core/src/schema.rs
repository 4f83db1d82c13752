//! JSON Schema of the interchange format
//!
//! Suites and executions are the documents other tools consume (CI
//! dashboards, issue bots). Their schemas are derived from the Rust types so
//! they cannot drift.

use schemars::JsonSchema;

use crate::model::{TestExecution, TestSuite};

/// Documents with a published schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemaKind {
    TestSuite,
    TestExecution,
}

impl std::str::FromStr for SchemaKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace(['-', '_'], "").as_str() {
            "testsuite" | "suite" => Ok(Self::TestSuite),
            "testexecution" | "execution" => Ok(Self::TestExecution),
            _ => Err(format!("unknown schema '{s}' (suite, execution)")),
        }
    }
}

fn pretty<T: JsonSchema>() -> serde_json::Result<String> {
    serde_json::to_string_pretty(&schemars::schema_for!(T))
}

/// Generate JSON Schema for one interchange document.
///
/// # Errors
///
/// Fails only if the schema cannot be serialized.
pub fn generate(kind: SchemaKind) -> serde_json::Result<String> {
    match kind {
        SchemaKind::TestSuite => pretty::<TestSuite>(),
        SchemaKind::TestExecution => pretty::<TestExecution>(),
    }
}

//! Per-project audit trail

use std::fmt;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use time::OffsetDateTime;

/// Actor recorded when none is configured.
pub const SYSTEM_ACTOR: &str = "system";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ActivityAction {
    ImportedSpec,
    GeneratedTests,
    DeletedEndpointTests,
    UpdatedTestCase,
    CreatedConfig,
    UpdatedConfig,
    ClearedLlmKey,
    StartedExecution,
}

impl ActivityAction {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ImportedSpec => "imported_spec",
            Self::GeneratedTests => "generated_tests",
            Self::DeletedEndpointTests => "deleted_endpoint_tests",
            Self::UpdatedTestCase => "updated_test_case",
            Self::CreatedConfig => "created_config",
            Self::UpdatedConfig => "updated_config",
            Self::ClearedLlmKey => "cleared_llm_key",
            Self::StartedExecution => "started_execution",
        }
    }
}

impl fmt::Display for ActivityAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One audit entry. `details` carries counts, ids and endpoint lists; never secrets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ActivityEntry {
    pub project_id: String,
    pub actor: String,
    pub action: ActivityAction,
    #[serde(default)]
    #[schemars(with = "std::collections::BTreeMap<String, Value>")]
    pub details: Map<String, Value>,
    #[serde(with = "time::serde::rfc3339")]
    #[schemars(with = "String")]
    pub created_at: OffsetDateTime,
}

impl ActivityEntry {
    pub fn new(project_id: impl Into<String>, actor: impl Into<String>, action: ActivityAction) -> Self {
        Self {
            project_id: project_id.into(),
            actor: actor.into(),
            action,
            details: Map::new(),
            created_at: OffsetDateTime::now_utc(),
        }
    }

    #[must_use]
    pub fn with_detail(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.details.insert(key.to_string(), value.into());
        self
    }
}

//! Persistence seam
//!
//! The engine reads and writes projects, suites, executions, configs and
//! the activity trail through [`Store`]. [`MemoryStore`] backs tests and embedding; the CLI
//! ships a file-backed implementation.

use std::collections::BTreeMap;
use std::sync::{Mutex, PoisonError};

use crate::model::{ActivityEntry, TestExecution, TestSuite};
use crate::project::{Project, StoredConfig};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("{kind} '{id}' not found")]
    NotFound { kind: &'static str, id: String },
    #[error("IO error: {0}")]
    Io(String),
    #[error("Serialization error: {0}")]
    Serialize(String),
}

impl StoreError {
    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            id: id.into(),
        }
    }
}

pub trait Store: Send + Sync + 'static {
    fn get_project(&self, id: &str) -> Result<Project, StoreError>;
    fn put_project(&self, project: &Project) -> Result<(), StoreError>;
    fn list_projects(&self) -> Result<Vec<Project>, StoreError>;

    fn get_suite(&self, id: &str) -> Result<TestSuite, StoreError>;
    fn put_suite(&self, suite: &TestSuite) -> Result<(), StoreError>;
    fn list_suites(&self) -> Result<Vec<TestSuite>, StoreError>;

    fn get_execution(&self, id: &str) -> Result<TestExecution, StoreError>;
    fn put_execution(&self, execution: &TestExecution) -> Result<(), StoreError>;
    fn list_executions(&self) -> Result<Vec<TestExecution>, StoreError>;

    /// `Ok(None)` when the project has no config yet.
    fn get_config(&self, project_id: &str) -> Result<Option<StoredConfig>, StoreError>;
    fn put_config(&self, project_id: &str, config: &StoredConfig) -> Result<(), StoreError>;

    fn append_activity(&self, entry: &ActivityEntry) -> Result<(), StoreError>;
    /// Most recent first, at most `limit` entries.
    fn list_activity(&self, project_id: &str, limit: usize) -> Result<Vec<ActivityEntry>, StoreError>;

    /// Suites belonging to one project, sorted by id.
    fn suites_for_project(&self, project_id: &str) -> Result<Vec<TestSuite>, StoreError> {
        let mut suites: Vec<TestSuite> = self
            .list_suites()?
            .into_iter()
            .filter(|s| s.project_id == project_id)
            .collect();
        suites.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(suites)
    }
}

#[derive(Debug, Default)]
struct Tables {
    projects: BTreeMap<String, Project>,
    suites: BTreeMap<String, TestSuite>,
    executions: BTreeMap<String, TestExecution>,
    configs: BTreeMap<String, StoredConfig>,
    activity: Vec<ActivityEntry>,
}

/// In-process store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn with<R>(&self, f: impl FnOnce(&mut Tables) -> R) -> R {
        let mut guard = self.tables.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut guard)
    }
}

impl Store for MemoryStore {
    fn get_project(&self, id: &str) -> Result<Project, StoreError> {
        self.with(|t| t.projects.get(id).cloned())
            .ok_or_else(|| StoreError::not_found("project", id))
    }

    fn put_project(&self, project: &Project) -> Result<(), StoreError> {
        self.with(|t| t.projects.insert(project.id.clone(), project.clone()));
        Ok(())
    }

    fn list_projects(&self) -> Result<Vec<Project>, StoreError> {
        Ok(self.with(|t| t.projects.values().cloned().collect()))
    }

    fn get_suite(&self, id: &str) -> Result<TestSuite, StoreError> {
        self.with(|t| t.suites.get(id).cloned())
            .ok_or_else(|| StoreError::not_found("test suite", id))
    }

    fn put_suite(&self, suite: &TestSuite) -> Result<(), StoreError> {
        self.with(|t| t.suites.insert(suite.id.clone(), suite.clone()));
        Ok(())
    }

    fn list_suites(&self) -> Result<Vec<TestSuite>, StoreError> {
        Ok(self.with(|t| t.suites.values().cloned().collect()))
    }

    fn get_execution(&self, id: &str) -> Result<TestExecution, StoreError> {
        self.with(|t| t.executions.get(id).cloned())
            .ok_or_else(|| StoreError::not_found("execution", id))
    }

    fn put_execution(&self, execution: &TestExecution) -> Result<(), StoreError> {
        self.with(|t| t.executions.insert(execution.id.clone(), execution.clone()));
        Ok(())
    }

    fn list_executions(&self) -> Result<Vec<TestExecution>, StoreError> {
        Ok(self.with(|t| t.executions.values().cloned().collect()))
    }

    fn get_config(&self, project_id: &str) -> Result<Option<StoredConfig>, StoreError> {
        Ok(self.with(|t| t.configs.get(project_id).cloned()))
    }

    fn put_config(&self, project_id: &str, config: &StoredConfig) -> Result<(), StoreError> {
        self.with(|t| t.configs.insert(project_id.to_string(), config.clone()));
        Ok(())
    }

    fn append_activity(&self, entry: &ActivityEntry) -> Result<(), StoreError> {
        self.with(|t| t.activity.push(entry.clone()));
        Ok(())
    }

    fn list_activity(&self, project_id: &str, limit: usize) -> Result<Vec<ActivityEntry>, StoreError> {
        Ok(self.with(|t| {
            t.activity
                .iter()
                .rev()
                .filter(|e| e.project_id == project_id)
                .take(limit)
                .cloned()
                .collect()
        }))
    }
}

//! Service facade: every externally visible operation in one place
//!
//! [`Engine`] ties the resolver, generator, executor and report aggregation
//! to a [`Store`] and a [`SecretCipher`]. It holds no state of its own apart
//! from handles to executions running in this process. Every change to a
//! project is appended to its activity trail.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, PoisonError};

use rand::Rng;
use time::OffsetDateTime;
use serde_json::{Value, json};
use tokio_stream::wrappers::WatchStream;
use tracing::{info, warn};

use apiforge_core::config::{ConfigError, Settings};
use apiforge_core::export::{ExportError, ExportFormat, IssueDraft, export_suite, issue_draft};
use apiforge_core::model::{
    ActivityAction, ActivityEntry, CaseEdit, Endpoint, EndpointRef, SuiteError, TestCase, TestCategory, TestExecution, TestResult,
    SYSTEM_ACTOR, TestSuite, merge_endpoints,
};
use apiforge_core::project::{ConfigUpdate, ConfigView, Project, ResolvedConfig, StoredConfig};
use apiforge_core::report::{Report, build_report};
use apiforge_core::secret::{ConfigDecryptionError, SecretCipher};
use apiforge_core::store::{Store, StoreError};

use crate::batch::{self, ExecutionHandle};
use crate::executor::{CaseOverrides, ConnectionCheck, Executor, ExecutorFatalError};
use crate::generator::{CaseContributor, GenerateOptions, GenerationWarning, Generator};
use crate::source::SpecSource;
use crate::spec::SpecParseError;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Spec(#[from] SpecParseError),
    #[error(transparent)]
    Suite(#[from] SuiteError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Decryption(#[from] ConfigDecryptionError),
    #[error(transparent)]
    Executor(#[from] ExecutorFatalError),
    #[error(transparent)]
    Export(#[from] ExportError),
    #[error("project '{0}' has no endpoints; import a spec first")]
    NoEndpoints(String),
    #[error("project '{0}' has no target config; run `apiforge config set` first")]
    NoConfig(String),
    #[error("endpoint {0} is not part of the project")]
    UnknownEndpoint(EndpointRef),
    #[error("execution '{execution_id}' has no result for test case {index}")]
    ResultNotFound { execution_id: String, index: u64 },
}

/// What an import changed.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ImportOutcome {
    pub project_id: String,
    pub added: Vec<EndpointRef>,
    /// Already present; never overwritten.
    pub skipped: Vec<EndpointRef>,
    pub total_endpoints: usize,
}

/// What a generation run added.
#[derive(Debug, Clone, serde::Serialize)]
pub struct GenerateOutcome {
    pub suite_id: String,
    pub added: usize,
    pub total_cases: usize,
    pub skipped_existing: Vec<EndpointRef>,
    pub warnings: Vec<GenerationWarning>,
}

pub struct Engine<S: Store> {
    store: Arc<S>,
    cipher: Arc<dyn SecretCipher>,
    settings: Settings,
    contributors: Vec<Arc<dyn CaseContributor>>,
    actor: String,
    live: Mutex<HashMap<String, ExecutionHandle>>,
}

impl<S: Store> Engine<S> {
    pub fn new(store: Arc<S>, cipher: Arc<dyn SecretCipher>, settings: Settings) -> Self {
        Self {
            store,
            cipher,
            settings,
            contributors: Vec::new(),
            actor: SYSTEM_ACTOR.to_string(),
            live: Mutex::new(HashMap::new()),
        }
    }

    /// Add an extra case source used by [`Engine::generate`].
    #[must_use]
    pub fn with_contributor(mut self, contributor: Arc<dyn CaseContributor>) -> Self {
        self.contributors.push(contributor);
        self
    }

    /// Name recorded as the actor of activity entries.
    #[must_use]
    pub fn with_actor(mut self, actor: impl Into<String>) -> Self {
        self.actor = actor.into();
        self
    }

    #[must_use]
    pub fn store(&self) -> &S {
        &self.store
    }

    // ── Activity ──

    /// Append to the project's trail. A failed write never fails the operation.
    fn record(&self, project_id: &str, action: ActivityAction, details: Value) {
        let mut entry = ActivityEntry::new(project_id, self.actor.as_str(), action);
        if let Value::Object(map) = details {
            entry.details = map;
        }
        if let Err(e) = self.store.append_activity(&entry) {
            warn!(project_id, action = %action, error = %e, "cannot record activity");
        }
    }

    /// Most recent activity of a project, newest first.
    pub fn activity(&self, project_id: &str, limit: usize) -> Result<Vec<ActivityEntry>, EngineError> {
        self.store.get_project(project_id)?;
        Ok(self.store.list_activity(project_id, limit)?)
    }

    // ── Projects ──

    /// Load endpoints from `source` into a project, creating it if needed.
    ///
    /// With `merge`, only new `(method, path)` pairs are added. Without it,
    /// the project's endpoint list is replaced.
    ///
    /// # Errors
    ///
    /// [`EngineError::Spec`] when the source cannot be loaded; nothing is stored then.
    pub async fn import(
        &self,
        project_id: &str,
        source: &SpecSource,
        merge: bool,
    ) -> Result<ImportOutcome, EngineError> {
        let doc = source.load().await?;
        let mut project = match self.store.get_project(project_id) {
            Ok(p) => p,
            Err(StoreError::NotFound { .. }) => {
                let mut p = Project::new(project_id, doc.title.clone().unwrap_or_else(|| project_id.to_string()));
                p.description = doc.description.clone();
                p
            }
            Err(e) => return Err(e.into()),
        };

        if !merge {
            project.endpoints.clear();
        }
        let outcome = merge_endpoints(&mut project.endpoints, doc.endpoints);
        project.sources.push(source.to_string());
        self.store.put_project(&project)?;
        info!(
            project_id,
            added = outcome.added.len(),
            skipped = outcome.skipped.len(),
            "endpoints imported"
        );
        self.record(
            project_id,
            ActivityAction::ImportedSpec,
            json!({
                "source": source.to_string(),
                "merge": merge,
                "added": outcome.added.len(),
                "skipped": outcome.skipped.len(),
            }),
        );
        Ok(ImportOutcome {
            project_id: project.id.clone(),
            added: outcome.added,
            skipped: outcome.skipped,
            total_endpoints: project.endpoints.len(),
        })
    }

    /// # Errors
    ///
    /// [`StoreError::NotFound`] for an unknown project.
    pub fn project(&self, project_id: &str) -> Result<Project, EngineError> {
        Ok(self.store.get_project(project_id)?)
    }

    pub fn projects(&self) -> Result<Vec<Project>, EngineError> {
        Ok(self.store.list_projects()?)
    }

    pub fn endpoints(&self, project_id: &str) -> Result<Vec<Endpoint>, EngineError> {
        Ok(self.store.get_project(project_id)?.endpoints)
    }

    // ── Suites ──

    /// The project's suite, created empty on first use.
    pub fn suite_for_project(&self, project_id: &str) -> Result<TestSuite, EngineError> {
        let project = self.store.get_project(project_id)?;
        if let Some(suite) = self.store.suites_for_project(project_id)?.into_iter().next() {
            return Ok(suite);
        }
        Ok(TestSuite::new(
            format!("{project_id}-suite"),
            project_id,
            format!("{} tests", project.name),
        ))
    }

    /// Generate cases for the project's endpoints not yet covered by its suite.
    ///
    /// # Errors
    ///
    /// Fails for an unknown project, a project without endpoints, or a
    /// selected endpoint the project does not have. Per-endpoint problems are
    /// returned as warnings instead.
    pub fn generate(
        &self,
        project_id: &str,
        selected: Option<Vec<EndpointRef>>,
        categories: Option<BTreeSet<TestCategory>>,
    ) -> Result<GenerateOutcome, EngineError> {
        let project = self.store.get_project(project_id)?;
        if project.endpoints.is_empty() {
            return Err(EngineError::NoEndpoints(project_id.to_string()));
        }
        if let Some(selected) = &selected {
            let known: BTreeSet<EndpointRef> = project.endpoints.iter().map(Endpoint::endpoint_ref).collect();
            if let Some(missing) = selected.iter().find(|e| !known.contains(e)) {
                return Err(EngineError::UnknownEndpoint(missing.clone()));
            }
        }

        let mut suite = self.suite_for_project(project_id)?;
        let options = GenerateOptions {
            categories: categories
                .unwrap_or_else(|| self.settings.default_categories().into_iter().collect()),
            endpoints: selected,
            seed: self.settings.seed,
        };
        let generator = self
            .contributors
            .iter()
            .fold(Generator::new(options), |g, c| g.with_contributor(Arc::clone(c)));
        let generation = generator.generate(&project.endpoints, &suite);

        let added = generation.cases.len();
        suite.append(generation.cases)?;
        self.store.put_suite(&suite)?;
        for w in &generation.warnings {
            warn!(endpoint = %w.endpoint, message = %w.message, "generation warning");
        }
        info!(project_id, suite_id = %suite.id, added, "cases generated");
        let covered: BTreeSet<String> = suite
            .test_cases
            .iter()
            .skip(suite.test_cases.len() - added)
            .map(|c| c.endpoint.to_string())
            .collect();
        self.record(
            project_id,
            ActivityAction::GeneratedTests,
            json!({"suite_id": suite.id, "added": added, "endpoints": covered}),
        );
        Ok(GenerateOutcome {
            suite_id: suite.id.clone(),
            added,
            total_cases: suite.test_cases.len(),
            skipped_existing: generation.skipped_existing,
            warnings: generation.warnings,
        })
    }

    pub fn get_cases(&self, suite_id: &str) -> Result<TestSuite, EngineError> {
        Ok(self.store.get_suite(suite_id)?)
    }

    /// Remove the cases of `endpoints` (all cases when `None`). Survivors keep their indices.
    pub fn delete_cases(&self, suite_id: &str, endpoints: Option<&[EndpointRef]>) -> Result<usize, EngineError> {
        let mut suite = self.store.get_suite(suite_id)?;
        let deleted = suite.delete_endpoints(endpoints);
        self.store.put_suite(&suite)?;
        info!(suite_id, deleted, "cases deleted");
        let scope = endpoints.map_or_else(
            || json!("all"),
            |eps| json!(eps.iter().map(ToString::to_string).collect::<Vec<_>>()),
        );
        self.record(
            &suite.project_id,
            ActivityAction::DeletedEndpointTests,
            json!({"suite_id": suite_id, "deleted": deleted, "endpoints": scope}),
        );
        Ok(deleted)
    }

    pub fn update_case(&self, suite_id: &str, index: u64, edit: CaseEdit) -> Result<TestCase, EngineError> {
        let mut suite = self.store.get_suite(suite_id)?;
        let updated = suite.update_case(index, edit)?.clone();
        self.store.put_suite(&suite)?;
        self.record(
            &suite.project_id,
            ActivityAction::UpdatedTestCase,
            json!({"suite_id": suite_id, "index": index, "name": updated.name}),
        );
        Ok(updated)
    }

    // ── Execution ──

    /// Start a background execution of the selected cases (all when `None`).
    ///
    /// A config that cannot produce an executor yields a `failed` execution
    /// rather than an error.
    ///
    /// # Errors
    ///
    /// Unknown suite or case index, missing config, or undecryptable secrets.
    pub fn execute(&self, suite_id: &str, indices: Option<&[u64]>) -> Result<ExecutionHandle, EngineError> {
        let suite = self.store.get_suite(suite_id)?;
        let cases = suite.select(indices)?;
        let config = self.resolved_config(&suite.project_id)?;
        let execution_total = cases.len();
        let mut execution = TestExecution::start(new_execution_id(), suite_id, execution_total as u64);

        let handle = match Executor::new(config) {
            Ok(executor) => batch::spawn(Arc::new(executor), self.store.clone(), execution, cases),
            Err(e) => {
                warn!(suite_id, error = %e, "execution cannot start");
                execution.fail(e.to_string());
                self.store.put_execution(&execution)?;
                ExecutionHandle::finished(execution)
            }
        };
        self.record(
            &suite.project_id,
            ActivityAction::StartedExecution,
            json!({
                "execution_id": handle.id(),
                "suite_id": suite_id,
                "total": execution_total,
            }),
        );
        if !handle.is_finished() {
            let mut live = self.live.lock().unwrap_or_else(PoisonError::into_inner);
            prune(&mut live);
            live.insert(handle.id().to_string(), handle.clone());
        }
        Ok(handle)
    }

    /// Run one case now, optionally with overrides. The stored case is not modified.
    pub async fn execute_single(
        &self,
        suite_id: &str,
        index: u64,
        overrides: Option<&CaseOverrides>,
    ) -> Result<TestResult, EngineError> {
        let suite = self.store.get_suite(suite_id)?;
        let stored = suite
            .case(index)
            .ok_or(SuiteError::UnknownIndex(index))?;
        let case = overrides.map_or_else(|| stored.clone(), |o| o.apply(stored));
        let executor = Executor::new(self.resolved_config(&suite.project_id)?)?;
        Ok(executor.run(&case).await)
    }

    /// Latest state: live if running in this process, else as stored.
    pub fn get_execution(&self, execution_id: &str) -> Result<TestExecution, EngineError> {
        if let Some(handle) = self.live_handle(execution_id) {
            return Ok(handle.snapshot());
        }
        Ok(self.store.get_execution(execution_id)?)
    }

    /// Stream of states ending with the terminal one.
    pub fn subscribe(&self, execution_id: &str) -> Result<WatchStream<TestExecution>, EngineError> {
        if let Some(handle) = self.live_handle(execution_id) {
            return Ok(handle.stream());
        }
        let stored = self.store.get_execution(execution_id)?;
        Ok(ExecutionHandle::finished(stored).stream())
    }

    /// Ids of executions still running in this process.
    #[must_use]
    pub fn running(&self) -> Vec<String> {
        let mut live = self.live.lock().unwrap_or_else(PoisonError::into_inner);
        prune(&mut live);
        let mut ids: Vec<String> = live.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Handle of a running execution. Finished ones are dropped here and
    /// served from the store, which holds their terminal state.
    fn live_handle(&self, execution_id: &str) -> Option<ExecutionHandle> {
        let mut live = self.live.lock().unwrap_or_else(PoisonError::into_inner);
        prune(&mut live);
        live.get(execution_id).cloned()
    }

    // ── Config ──

    fn resolved_config(&self, project_id: &str) -> Result<ResolvedConfig, EngineError> {
        let stored = self
            .store
            .get_config(project_id)?
            .ok_or_else(|| EngineError::NoConfig(project_id.to_string()))?;
        let mut config = stored.open(self.cipher.as_ref())?;
        config.timeout_secs = config.timeout_secs.or(Some(self.settings.timeout_secs));
        Ok(config)
    }

    pub fn get_config(&self, project_id: &str) -> Result<Option<ConfigView>, EngineError> {
        self.store.get_project(project_id)?;
        Ok(self.store.get_config(project_id)?.map(|c| c.view()))
    }

    /// Upsert-merge `update`; absent secrets keep the stored ones.
    pub fn save_config(&self, project_id: &str, update: ConfigUpdate) -> Result<ConfigView, EngineError> {
        self.store.get_project(project_id)?;
        let existing = self.store.get_config(project_id)?;
        let merged = StoredConfig::merge(existing.as_ref(), update, self.cipher.as_ref())?;
        self.store.put_config(project_id, &merged)?;
        info!(project_id, auth = merged.auth.kind(), "config saved");
        let view = merged.view();
        let action = if existing.is_some() {
            ActivityAction::UpdatedConfig
        } else {
            ActivityAction::CreatedConfig
        };
        self.record(
            project_id,
            action,
            json!({
                "base_url": view.base_url,
                "auth_type": view.auth_type,
                "llm_provider": view.llm_provider,
                "llm_model": view.llm_model,
            }),
        );
        Ok(view)
    }

    /// Returns whether a key was stored.
    pub fn clear_llm_key(&self, project_id: &str) -> Result<bool, EngineError> {
        let Some(mut config) = self.store.get_config(project_id)? else {
            return Ok(false);
        };
        let cleared = config.clear_llm_key();
        if cleared {
            self.store.put_config(project_id, &config)?;
            self.record(project_id, ActivityAction::ClearedLlmKey, json!({}));
        }
        Ok(cleared)
    }

    pub async fn check_connection(&self, project_id: &str) -> Result<ConnectionCheck, EngineError> {
        let executor = Executor::new(self.resolved_config(project_id)?)?;
        Ok(executor.check_connection().await)
    }

    // ── Reports and exports ──

    /// Report over the last `days` days, for one project or all.
    pub fn report(&self, project_id: Option<&str>, days: u32) -> Result<Report, EngineError> {
        let mut executions = self.store.list_executions()?;
        if let Some(project_id) = project_id {
            let suites: BTreeSet<String> = self
                .store
                .suites_for_project(project_id)?
                .into_iter()
                .map(|s| s.id)
                .collect();
            executions.retain(|e| suites.contains(&e.test_suite_id));
        }
        Ok(build_report(&executions, days, OffsetDateTime::now_utc()))
    }

    pub fn export(&self, suite_id: &str, format: ExportFormat) -> Result<String, EngineError> {
        let suite = self.store.get_suite(suite_id)?;
        let base_url = self.store.get_config(&suite.project_id)?.map(|c| c.base_url);
        Ok(export_suite(&suite, format, base_url.as_deref())?)
    }

    pub fn issue_draft(&self, execution_id: &str, index: u64) -> Result<IssueDraft, EngineError> {
        let execution = self.get_execution(execution_id)?;
        let result = execution
            .results
            .iter()
            .find(|r| r.test_case_index == index)
            .ok_or_else(|| EngineError::ResultNotFound {
                execution_id: execution_id.to_string(),
                index,
            })?;
        Ok(issue_draft(execution_id, result))
    }
}

fn prune(live: &mut HashMap<String, ExecutionHandle>) {
    live.retain(|_, handle| !handle.is_finished());
}

fn new_execution_id() -> String {
    format!("{:016x}", rand::thread_rng().r#gen::<u64>())
}

//! File-backed store: `<data_dir>/{projects,suites,executions,configs}/<id>.json`
//! plus one JSON line per activity entry in `<data_dir>/activity/<project>.jsonl`.
//!
//! Every document is written to a temporary file and renamed into place, so a
//! reader never sees a half-written execution while a batch is running.

use std::io::Write;
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde::de::DeserializeOwned;

use apiforge_core::model::{ActivityEntry, TestExecution, TestSuite};
use apiforge_core::project::{Project, StoredConfig};
use apiforge_core::secret::KeyedCipher;
use apiforge_core::store::{Store, StoreError};

const PROJECTS: &str = "projects";
const SUITES: &str = "suites";
const EXECUTIONS: &str = "executions";
const CONFIGS: &str = "configs";
const ACTIVITY: &str = "activity";

/// File name of the generated secret key under the data directory.
pub const KEY_FILE: &str = "secret.key";

#[derive(Debug, Clone)]
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    /// Open (and create if needed) a store rooted at `root`.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        for dir in [PROJECTS, SUITES, EXECUTIONS, CONFIGS, ACTIVITY] {
            std::fs::create_dir_all(root.join(dir)).map_err(|e| io_error(&root.join(dir), &e))?;
        }
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path(&self, table: &str, id: &str) -> Result<PathBuf, StoreError> {
        self.file(table, id, "json")
    }

    fn file(&self, table: &str, id: &str, extension: &str) -> Result<PathBuf, StoreError> {
        if id.is_empty() || id.starts_with('.') || id.contains(['/', '\\']) {
            return Err(StoreError::Io(format!("invalid id '{id}'")));
        }
        Ok(self.root.join(table).join(format!("{id}.{extension}")))
    }

    fn read<T: DeserializeOwned>(&self, table: &str, kind: &'static str, id: &str) -> Result<Option<T>, StoreError> {
        let path = self.path(table, id)?;
        let text = match std::fs::read_to_string(&path) {
            Ok(t) => t,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(io_error(&path, &e)),
        };
        serde_json::from_str(&text)
            .map(Some)
            .map_err(|e| StoreError::Serialize(format!("{kind} '{id}': {e}")))
    }

    fn write<T: Serialize>(&self, table: &str, id: &str, value: &T) -> Result<(), StoreError> {
        let path = self.path(table, id)?;
        let text = serde_json::to_string_pretty(value).map_err(|e| StoreError::Serialize(e.to_string()))?;
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, text).map_err(|e| io_error(&tmp, &e))?;
        std::fs::rename(&tmp, &path).map_err(|e| io_error(&path, &e))
    }

    fn list<T: DeserializeOwned>(&self, table: &str, kind: &'static str) -> Result<Vec<T>, StoreError> {
        let dir = self.root.join(table);
        let mut ids: Vec<String> = std::fs::read_dir(&dir)
            .map_err(|e| io_error(&dir, &e))?
            .filter_map(Result::ok)
            .filter_map(|entry| {
                entry
                    .file_name()
                    .to_str()
                    .and_then(|name| name.strip_suffix(".json"))
                    .map(str::to_string)
            })
            .collect();
        ids.sort();
        let mut out = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(value) = self.read(table, kind, &id)? {
                out.push(value);
            }
        }
        Ok(out)
    }

    fn get<T: DeserializeOwned>(&self, table: &str, kind: &'static str, id: &str) -> Result<T, StoreError> {
        self.read(table, kind, id)?
            .ok_or_else(|| StoreError::not_found(kind, id))
    }
}

impl Store for FileStore {
    fn get_project(&self, id: &str) -> Result<Project, StoreError> {
        self.get(PROJECTS, "project", id)
    }

    fn put_project(&self, project: &Project) -> Result<(), StoreError> {
        self.write(PROJECTS, &project.id, project)
    }

    fn list_projects(&self) -> Result<Vec<Project>, StoreError> {
        self.list(PROJECTS, "project")
    }

    fn get_suite(&self, id: &str) -> Result<TestSuite, StoreError> {
        self.get(SUITES, "test suite", id)
    }

    fn put_suite(&self, suite: &TestSuite) -> Result<(), StoreError> {
        self.write(SUITES, &suite.id, suite)
    }

    fn list_suites(&self) -> Result<Vec<TestSuite>, StoreError> {
        self.list(SUITES, "test suite")
    }

    fn get_execution(&self, id: &str) -> Result<TestExecution, StoreError> {
        self.get(EXECUTIONS, "execution", id)
    }

    fn put_execution(&self, execution: &TestExecution) -> Result<(), StoreError> {
        self.write(EXECUTIONS, &execution.id, execution)
    }

    fn list_executions(&self) -> Result<Vec<TestExecution>, StoreError> {
        self.list(EXECUTIONS, "execution")
    }

    fn get_config(&self, project_id: &str) -> Result<Option<StoredConfig>, StoreError> {
        self.read(CONFIGS, "config", project_id)
    }

    fn put_config(&self, project_id: &str, config: &StoredConfig) -> Result<(), StoreError> {
        self.write(CONFIGS, project_id, config)
    }

    fn append_activity(&self, entry: &ActivityEntry) -> Result<(), StoreError> {
        let path = self.file(ACTIVITY, &entry.project_id, "jsonl")?;
        let mut line = serde_json::to_string(entry).map_err(|e| StoreError::Serialize(e.to_string()))?;
        line.push('\n');
        std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .and_then(|mut f| f.write_all(line.as_bytes()))
            .map_err(|e| io_error(&path, &e))
    }

    fn list_activity(&self, project_id: &str, limit: usize) -> Result<Vec<ActivityEntry>, StoreError> {
        let path = self.file(ACTIVITY, project_id, "jsonl")?;
        let text = match std::fs::read_to_string(&path) {
            Ok(t) => t,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(io_error(&path, &e)),
        };
        text.lines()
            .rev()
            .filter(|line| !line.trim().is_empty())
            .take(limit)
            .map(|line| {
                serde_json::from_str(line)
                    .map_err(|e| StoreError::Serialize(format!("activity of '{project_id}': {e}")))
            })
            .collect()
    }
}

fn io_error(path: &Path, e: &std::io::Error) -> StoreError {
    StoreError::Io(format!("{}: {e}", path.display()))
}

/// Cipher keyed from `$<env_var>`, else from `<data_dir>/secret.key` (created on first use).
pub fn load_cipher(data_dir: &Path, env_var: &str) -> std::io::Result<KeyedCipher> {
    if let Ok(key) = std::env::var(env_var) {
        if !key.trim().is_empty() {
            return Ok(KeyedCipher::new(key.trim().as_bytes()));
        }
    }
    let path = data_dir.join(KEY_FILE);
    let key = match std::fs::read_to_string(&path) {
        Ok(key) => key,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            std::fs::create_dir_all(data_dir)?;
            let key = KeyedCipher::generate_key();
            write_private(&path, &key)?;
            tracing::info!(path = %path.display(), "generated secret key");
            key
        }
        Err(e) => return Err(e),
    };
    Ok(KeyedCipher::new(key.trim().as_bytes()))
}

#[cfg(unix)]
fn write_private(path: &Path, contents: &str) -> std::io::Result<()> {
    use std::os::unix::fs::OpenOptionsExt;
    let mut file = std::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .mode(0o600)
        .open(path)?;
    file.write_all(contents.as_bytes())
}

#[cfg(not(unix))]
fn write_private(path: &Path, contents: &str) -> std::io::Result<()> {
    std::fs::write(path, contents)
}

#[cfg(test)]
mod tests {
    use super::*;
    use apiforge_core::model::{EndpointRef, HttpMethod, TestCase, TestCategory};
    use apiforge_core::secret::SecretCipher;

    fn store() -> (tempfile::TempDir, FileStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path()).unwrap();
        (dir, store)
    }

    #[test]
    fn documents_survive_reopen() {
        let (dir, store) = store();
        store.put_project(&Project::new("shop", "Shop")).unwrap();
        let mut suite = TestSuite::new("shop-suite", "shop", "Shop tests");
        suite
            .append(vec![TestCase::new(
                TestCategory::HappyPath,
                "list",
                EndpointRef::new(HttpMethod::Get, "/items"),
                vec![200],
            )])
            .unwrap();
        store.put_suite(&suite).unwrap();

        let reopened = FileStore::open(dir.path()).unwrap();
        assert_eq!(reopened.get_project("shop").unwrap().name, "Shop");
        assert_eq!(reopened.get_suite("shop-suite").unwrap(), suite);
        assert_eq!(reopened.suites_for_project("shop").unwrap().len(), 1);
        assert!(!dir.path().join("suites/shop-suite.json.tmp").exists());
    }

    #[test]
    fn missing_documents() {
        let (_dir, store) = store();
        assert!(matches!(
            store.get_execution("nope"),
            Err(StoreError::NotFound { kind: "execution", .. })
        ));
        assert!(store.get_config("nope").unwrap().is_none());
        assert!(store.list_projects().unwrap().is_empty());
    }

    #[test]
    fn ids_cannot_escape_the_data_dir() {
        let (_dir, store) = store();
        for id in ["../x", "a/b", ".hidden", ""] {
            assert!(store.get_project(id).is_err(), "{id}");
        }
    }

    #[test]
    fn corrupt_file_is_a_serialization_error() {
        let (dir, store) = store();
        std::fs::write(dir.path().join("projects/bad.json"), "{not json").unwrap();
        assert!(matches!(store.get_project("bad"), Err(StoreError::Serialize(_))));
    }

    #[test]
    fn activity_appends_and_lists_newest_first() {
        use apiforge_core::model::{ActivityAction, SYSTEM_ACTOR};

        let (dir, store) = store();
        assert!(store.list_activity("shop", 10).unwrap().is_empty());
        store
            .append_activity(&ActivityEntry::new("shop", SYSTEM_ACTOR, ActivityAction::ImportedSpec))
            .unwrap();
        store
            .append_activity(
                &ActivityEntry::new("shop", "ada", ActivityAction::GeneratedTests).with_detail("added", 12),
            )
            .unwrap();

        let reopened = FileStore::open(dir.path()).unwrap();
        let entries = reopened.list_activity("shop", 10).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].action, ActivityAction::GeneratedTests);
        assert_eq!(entries[0].actor, "ada");
        assert_eq!(entries[0].details["added"], 12);
        assert_eq!(reopened.list_activity("shop", 1).unwrap().len(), 1);
        assert!(store.list_activity("../shop", 1).is_err());
    }

    #[test]
    fn key_file_is_created_once_and_reused() {
        let dir = tempfile::tempdir().unwrap();
        let env = "APIFORGE_TEST_KEY_UNSET_7F3A";
        let first = load_cipher(dir.path(), env).unwrap();
        let sealed = first.seal("s3cret").unwrap();
        let second = load_cipher(dir.path(), env).unwrap();
        assert_eq!(second.open(&sealed).unwrap(), "s3cret");
        assert!(dir.path().join(KEY_FILE).exists());
    }
}

//! Tool settings for apiforge

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::model::TestCategory;

/// Tool settings, read from `.apiforge.toml` in the working directory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Where projects, suites, executions and the secret key live
    /// (default: `~/.apiforge`)
    pub data_dir: Option<PathBuf>,

    /// Per-request timeout in seconds for projects without their own
    pub timeout_secs: u64,

    /// Seed for deterministic test data generation
    pub seed: u64,

    /// Generate security (injection, traversal) cases
    pub security_tests: bool,

    /// Generate performance (response time, large payload) cases
    pub performance_tests: bool,

    /// Environment variable holding the secret key; overrides the key file
    pub secret_key_env: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            data_dir: None,
            timeout_secs: 30,
            seed: 42,
            security_tests: true,
            performance_tests: true,
            secret_key_env: "APIFORGE_SECRET_KEY".to_string(),
        }
    }
}

impl Settings {
    /// Load settings from file
    ///
    /// # Errors
    ///
    /// Returns error if file cannot be read or parsed
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Io(path.to_path_buf(), e.to_string()))?;

        if path.extension().is_some_and(|ext| ext == "json") {
            serde_json::from_str(&content).map_err(|e| ConfigError::Parse(e.to_string()))
        } else {
            toml::from_str(&content).map_err(|e| ConfigError::Parse(e.to_string()))
        }
    }

    /// Load from default location (.apiforge.toml)
    pub fn load_default() -> Result<Self, ConfigError> {
        let candidates = [".apiforge.toml", ".apiforge.json", "apiforge.toml"];

        for name in candidates {
            let path = Path::new(name);
            if path.exists() {
                return Self::load(path);
            }
        }

        Ok(Self::default())
    }

    /// Resolved data directory: configured path, else `$HOME/.apiforge`, else `./.apiforge`.
    #[must_use]
    pub fn data_dir(&self) -> PathBuf {
        if let Some(dir) = &self.data_dir {
            return dir.clone();
        }
        std::env::var_os("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".apiforge")
    }

    /// Categories generated when the caller does not pick any.
    #[must_use]
    pub fn default_categories(&self) -> Vec<TestCategory> {
        TestCategory::ALL
            .into_iter()
            .filter(|c| match c {
                TestCategory::Security => self.security_tests,
                TestCategory::Performance => self.performance_tests,
                _ => true,
            })
            .collect()
    }

    /// Create example settings file
    pub fn example() -> &'static str {
        r#"# apiforge settings

# Data directory (projects, suites, executions, secret key)
# data_dir = "/home/me/.apiforge"

# Default request timeout in seconds
timeout_secs = 30

# Seed for deterministic test data
seed = 42

# Test categories that are opt-out
security_tests = true
performance_tests = true

# Environment variable with the secret key used to seal stored credentials.
# When unset, a key is generated once into <data_dir>/secret.key
secret_key_env = "APIFORGE_SECRET_KEY"
"#
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Cannot read {0}: {1}")]
    Io(PathBuf, String),
    #[error("Parse error: {0}")]
    Parse(String),
    #[error("Invalid config: {0}")]
    Invalid(String),
    #[error(transparent)]
    Seal(#[from] crate::secret::SealError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_settings() {
        let settings = Settings::default();
        assert_eq!(settings.timeout_secs, 30);
        assert_eq!(settings.seed, 42);
        assert_eq!(settings.secret_key_env, "APIFORGE_SECRET_KEY");
        assert_eq!(settings.default_categories().len(), 6);
    }

    #[test]
    fn parse_toml() {
        let toml = r#"
data_dir = "/tmp/forge"
timeout_secs = 5
security_tests = false
"#;
        let settings: Settings = toml::from_str(toml).unwrap();

        assert_eq!(settings.data_dir(), PathBuf::from("/tmp/forge"));
        assert_eq!(settings.timeout_secs, 5);
        assert_eq!(settings.seed, 42);
        assert!(
            !settings
                .default_categories()
                .contains(&TestCategory::Security)
        );
    }

    #[test]
    fn example_parses() {
        let settings: Settings = toml::from_str(Settings::example()).unwrap();
        assert_eq!(settings, Settings::default());
    }

    #[test]
    fn load_json_by_extension() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"seed": 7}"#).unwrap();
        let settings = Settings::load(&path).unwrap();
        assert_eq!(settings.seed, 7);
        assert_eq!(settings.timeout_secs, 30);
    }

    #[test]
    fn load_reports_missing_file() {
        let err = Settings::load(Path::new("/nonexistent/apiforge.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io(..)));
    }
}

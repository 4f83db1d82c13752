//! Projects and their target configuration
//!
//! A [`ProjectConfig`] is generic over how secrets are held:
//! [`ResolvedConfig`] carries plaintext for the duration of a run,
//! [`StoredConfig`] carries [`SealedSecret`]s and is what gets persisted, and
//! [`ConfigUpdate`] is a partial upsert where an absent secret means "keep".

use std::collections::BTreeMap;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::config::ConfigError;
use crate::model::Endpoint;
use crate::secret::{ConfigDecryptionError, SealedSecret, SecretCipher};

/// A named API under test and its extracted endpoints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Project {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    #[schemars(with = "String")]
    pub created_at: OffsetDateTime,
    #[serde(default)]
    pub endpoints: Vec<Endpoint>,
    /// Where endpoints were imported from, in import order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sources: Vec<String>,
}

impl Project {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: None,
            created_at: OffsetDateTime::now_utc(),
            endpoints: Vec::new(),
            sources: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ApiKeyLocation {
    #[default]
    Header,
    Query,
}

fn default_key_name() -> String {
    "X-API-Key".to_string()
}

fn default_grant_type() -> String {
    "client_credentials".to_string()
}

/// Authentication applied to every request against the target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuthConfig<S> {
    None,
    Basic {
        username: String,
        password: S,
    },
    Bearer {
        token: S,
    },
    ApiKey {
        #[serde(default = "default_key_name")]
        key_name: String,
        key_value: S,
        #[serde(default)]
        location: ApiKeyLocation,
    },
    #[serde(rename = "oauth2")]
    OAuth2 {
        token_url: String,
        client_id: String,
        client_secret: S,
        #[serde(default = "default_grant_type")]
        grant_type: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        scope: Option<String>,
    },
}

impl<S> Default for AuthConfig<S> {
    fn default() -> Self {
        Self::None
    }
}

impl<S> AuthConfig<S> {
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Basic { .. } => "basic",
            Self::Bearer { .. } => "bearer",
            Self::ApiKey { .. } => "api_key",
            Self::OAuth2 { .. } => "oauth2",
        }
    }

    #[must_use]
    pub const fn is_none(&self) -> bool {
        matches!(self, Self::None)
    }

    /// Convert the secret of this variant, keeping everything else.
    ///
    /// # Errors
    ///
    /// Propagates the first error of `f`.
    pub fn try_map<T, E>(self, mut f: impl FnMut(S) -> Result<T, E>) -> Result<AuthConfig<T>, E> {
        Ok(match self {
            Self::None => AuthConfig::None,
            Self::Basic { username, password } => AuthConfig::Basic {
                username,
                password: f(password)?,
            },
            Self::Bearer { token } => AuthConfig::Bearer { token: f(token)? },
            Self::ApiKey {
                key_name,
                key_value,
                location,
            } => AuthConfig::ApiKey {
                key_name,
                key_value: f(key_value)?,
                location,
            },
            Self::OAuth2 {
                token_url,
                client_id,
                client_secret,
                grant_type,
                scope,
            } => AuthConfig::OAuth2 {
                token_url,
                client_id,
                client_secret: f(client_secret)?,
                grant_type,
                scope,
            },
        })
    }

    fn secret(&self) -> Option<&S> {
        match self {
            Self::None => None,
            Self::Basic { password, .. } => Some(password),
            Self::Bearer { token } => Some(token),
            Self::ApiKey { key_value, .. } => Some(key_value),
            Self::OAuth2 { client_secret, .. } => Some(client_secret),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LlmProvider {
    #[default]
    Openai,
    Anthropic,
    Openrouter,
    Local,
}

impl LlmProvider {
    /// Endpoint used when none is configured.
    #[must_use]
    pub const fn default_endpoint(self) -> Option<&'static str> {
        match self {
            Self::Local => Some("http://localhost:11434/v1"),
            Self::Openrouter => Some("https://openrouter.ai/api/v1"),
            Self::Openai | Self::Anthropic => None,
        }
    }

    /// Local models run without an API key.
    #[must_use]
    pub const fn needs_key(self) -> bool {
        !matches!(self, Self::Local)
    }
}

impl std::str::FromStr for LlmProvider {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "openai" => Ok(Self::Openai),
            "anthropic" => Ok(Self::Anthropic),
            "openrouter" => Ok(Self::Openrouter),
            "local" => Ok(Self::Local),
            other => Err(format!("unknown LLM provider '{other}'")),
        }
    }
}

/// Settings for an optional LLM test contributor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(bound(deserialize = "S: Deserialize<'de>"))]
pub struct LlmConfig<S> {
    #[serde(default)]
    pub provider: LlmProvider,
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<S>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
}

/// Target configuration of a project.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(bound(deserialize = "S: Deserialize<'de>"))]
pub struct ProjectConfig<S> {
    pub base_url: String,
    #[serde(default)]
    pub auth: AuthConfig<S>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub llm: Option<LlmConfig<S>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
    /// Static headers sent with every request.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
}

/// Config with plaintext secrets, held in memory for one run only.
pub type ResolvedConfig = ProjectConfig<String>;

/// Config as persisted.
pub type StoredConfig = ProjectConfig<SealedSecret>;

/// Partial config for upserts. Absent fields and absent secrets keep what is stored.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigUpdate {
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub auth: Option<AuthConfig<Option<String>>>,
    #[serde(default)]
    pub llm: Option<LlmConfig<Option<String>>>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    #[serde(default)]
    pub headers: Option<BTreeMap<String, String>>,
}

impl StoredConfig {
    /// Upsert-merge `update` onto `existing`, sealing any new secret.
    ///
    /// # Errors
    ///
    /// Fails when a new config has no base URL, the base URL is not http(s),
    /// OAuth2 lacks its token URL or client id, or the auth type changes
    /// without the new type's secret.
    pub fn merge(
        existing: Option<&Self>,
        update: ConfigUpdate,
        cipher: &dyn SecretCipher,
    ) -> Result<Self, ConfigError> {
        let base_url = update
            .base_url
            .or_else(|| existing.map(|c| c.base_url.clone()))
            .ok_or_else(|| ConfigError::Invalid("base_url is required".into()))?;
        let base_url = base_url.trim().trim_end_matches('/').to_string();
        if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
            return Err(ConfigError::Invalid(format!(
                "base_url must start with http:// or https://, got '{base_url}'"
            )));
        }

        let auth = match update.auth {
            None => existing.map(|c| c.auth.clone()).unwrap_or_default(),
            Some(auth) => merge_auth(existing.map(|c| &c.auth), auth, cipher)?,
        };

        let llm = match update.llm {
            None => existing.and_then(|c| c.llm.clone()),
            Some(llm) => Some(merge_llm(existing.and_then(|c| c.llm.as_ref()), llm, cipher)?),
        };

        Ok(Self {
            base_url,
            auth,
            llm,
            timeout_secs: update
                .timeout_secs
                .or_else(|| existing.and_then(|c| c.timeout_secs)),
            headers: update
                .headers
                .or_else(|| existing.map(|c| c.headers.clone()))
                .unwrap_or_default(),
        })
    }

    /// Decrypt every secret for a run.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigDecryptionError`] naming the field that failed.
    pub fn open(&self, cipher: &dyn SecretCipher) -> Result<ResolvedConfig, ConfigDecryptionError> {
        let kind = self.auth.kind();
        let auth = self
            .auth
            .clone()
            .try_map(|s| cipher.open(&s).map_err(|e| e.for_field(&format!("{kind} credential"))))?;
        let llm = match &self.llm {
            None => None,
            Some(l) => Some(LlmConfig {
                provider: l.provider,
                model: l.model.clone(),
                api_key: l
                    .api_key
                    .as_ref()
                    .map(|k| cipher.open(k).map_err(|e| e.for_field("LLM API key")))
                    .transpose()?,
                endpoint: l.endpoint.clone(),
            }),
        };
        Ok(ResolvedConfig {
            base_url: self.base_url.clone(),
            auth,
            llm,
            timeout_secs: self.timeout_secs,
            headers: self.headers.clone(),
        })
    }

    /// Drop the stored LLM key. Returns whether one was present.
    pub fn clear_llm_key(&mut self) -> bool {
        self.llm
            .as_mut()
            .and_then(|l| l.api_key.take())
            .is_some()
    }

    /// Secret-free view for display.
    #[must_use]
    pub fn view(&self) -> ConfigView {
        ConfigView {
            base_url: self.base_url.clone(),
            auth_type: self.auth.kind().to_string(),
            has_auth: self.auth.secret().is_some(),
            llm_provider: self.llm.as_ref().map(|l| l.provider),
            llm_model: self.llm.as_ref().map(|l| l.model.clone()),
            llm_endpoint: self.llm.as_ref().and_then(|l| l.endpoint.clone()),
            has_llm_key: self.llm.as_ref().is_some_and(|l| l.api_key.is_some()),
            timeout_secs: self.timeout_secs,
            headers: self.headers.keys().cloned().collect(),
        }
    }
}

fn merge_auth(
    existing: Option<&AuthConfig<SealedSecret>>,
    update: AuthConfig<Option<String>>,
    cipher: &dyn SecretCipher,
) -> Result<AuthConfig<SealedSecret>, ConfigError> {
    if let AuthConfig::OAuth2 {
        token_url,
        client_id,
        ..
    } = &update
    {
        if token_url.trim().is_empty() || client_id.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "oauth2 requires token_url, client_id and client_secret".into(),
            ));
        }
    }
    let kind = update.kind();
    let kept = existing
        .filter(|e| e.kind() == kind)
        .and_then(AuthConfig::secret)
        .cloned();
    update.try_map(|secret| match secret {
        Some(plain) if !plain.is_empty() => Ok(cipher.seal(&plain)?),
        _ => kept.clone().ok_or_else(|| {
            ConfigError::Invalid(format!(
                "auth type '{kind}' needs its secret; none is stored yet"
            ))
        }),
    })
}

fn merge_llm(
    existing: Option<&LlmConfig<SealedSecret>>,
    update: LlmConfig<Option<String>>,
    cipher: &dyn SecretCipher,
) -> Result<LlmConfig<SealedSecret>, ConfigError> {
    let api_key = if update.provider.needs_key() {
        match update.api_key.flatten().filter(|k| !k.is_empty()) {
            Some(plain) => Some(cipher.seal(&plain)?),
            None => existing.and_then(|e| e.api_key.clone()),
        }
    } else {
        None
    };
    let endpoint = update
        .endpoint
        .or_else(|| update.provider.default_endpoint().map(str::to_string));
    Ok(LlmConfig {
        provider: update.provider,
        model: update.model,
        api_key,
        endpoint,
    })
}

/// What `config show` displays: flags instead of secrets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigView {
    pub base_url: String,
    pub auth_type: String,
    pub has_auth: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub llm_provider: Option<LlmProvider>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub llm_model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub llm_endpoint: Option<String>,
    pub has_llm_key: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
    /// Names of the static headers; values are not shown.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub headers: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::secret::KeyedCipher;

    fn cipher() -> KeyedCipher {
        KeyedCipher::new(b"test key")
    }

    fn bearer(token: Option<&str>) -> ConfigUpdate {
        ConfigUpdate {
            base_url: Some("https://api.test/".into()),
            auth: Some(AuthConfig::Bearer {
                token: token.map(str::to_string),
            }),
            ..ConfigUpdate::default()
        }
    }

    #[test]
    fn saved_secret_is_never_plaintext() {
        let c = cipher();
        let stored = StoredConfig::merge(None, bearer(Some("tok-123")), &c).unwrap();
        let json = serde_json::to_string(&stored).unwrap();
        assert!(!json.contains("tok-123"));
        assert_eq!(stored.base_url, "https://api.test");

        let view = stored.view();
        assert!(view.has_auth);
        assert!(!view.has_llm_key);
        assert_eq!(view.auth_type, "bearer");

        let resolved = stored.open(&c).unwrap();
        assert_eq!(resolved.auth, AuthConfig::Bearer { token: "tok-123".into() });
    }

    #[test]
    fn absent_secret_keeps_stored_one() {
        let c = cipher();
        let first = StoredConfig::merge(None, bearer(Some("tok-123")), &c).unwrap();
        let second = StoredConfig::merge(Some(&first), bearer(None), &c).unwrap();
        assert_eq!(second.auth, first.auth);

        let only_url = ConfigUpdate {
            base_url: Some("http://other.test".into()),
            ..ConfigUpdate::default()
        };
        let third = StoredConfig::merge(Some(&second), only_url, &c).unwrap();
        assert_eq!(third.auth, first.auth);
        assert_eq!(third.base_url, "http://other.test");
    }

    #[test]
    fn type_change_without_secret_is_rejected() {
        let c = cipher();
        let first = StoredConfig::merge(None, bearer(Some("tok-123")), &c).unwrap();
        let update = ConfigUpdate {
            auth: Some(AuthConfig::Basic {
                username: "bob".into(),
                password: None,
            }),
            ..ConfigUpdate::default()
        };
        assert!(StoredConfig::merge(Some(&first), update, &c).is_err());
    }

    #[test]
    fn new_config_requires_http_base_url() {
        let c = cipher();
        assert!(StoredConfig::merge(None, ConfigUpdate::default(), &c).is_err());
        let ftp = ConfigUpdate {
            base_url: Some("ftp://x".into()),
            ..ConfigUpdate::default()
        };
        assert!(StoredConfig::merge(None, ftp, &c).is_err());
    }

    #[test]
    fn llm_defaults_and_key_clearing() {
        let c = cipher();
        let update = ConfigUpdate {
            base_url: Some("http://localhost:8080".into()),
            llm: Some(LlmConfig {
                provider: LlmProvider::Openrouter,
                model: "gpt-4".into(),
                api_key: Some(Some("sk-1".into())),
                endpoint: None,
            }),
            ..ConfigUpdate::default()
        };
        let mut stored = StoredConfig::merge(None, update, &c).unwrap();
        assert!(stored.view().has_llm_key);
        assert_eq!(
            stored.view().llm_endpoint.as_deref(),
            Some("https://openrouter.ai/api/v1")
        );
        assert!(stored.clear_llm_key());
        assert!(!stored.view().has_llm_key);
        assert!(!stored.clear_llm_key());
    }

    #[test]
    fn local_provider_stores_no_key() {
        let c = cipher();
        let update = ConfigUpdate {
            base_url: Some("http://localhost:8080".into()),
            llm: Some(LlmConfig {
                provider: LlmProvider::Local,
                model: "llama3".into(),
                api_key: Some(Some("ignored".into())),
                endpoint: None,
            }),
            ..ConfigUpdate::default()
        };
        let stored = StoredConfig::merge(None, update, &c).unwrap();
        assert!(!stored.view().has_llm_key);
        assert_eq!(
            stored.view().llm_endpoint.as_deref(),
            Some("http://localhost:11434/v1")
        );
    }

    #[test]
    fn wrong_key_surfaces_decryption_error() {
        let stored = StoredConfig::merge(None, bearer(Some("tok")), &cipher()).unwrap();
        let err = stored.open(&KeyedCipher::new(b"rotated")).unwrap_err();
        assert!(err.to_string().contains("bearer credential"), "{err}");
    }

    #[test]
    fn auth_deserializes_with_defaults() {
        let auth: AuthConfig<String> =
            serde_json::from_str(r#"{"type":"api_key","key_value":"k"}"#).unwrap();
        assert_eq!(
            auth,
            AuthConfig::ApiKey {
                key_name: "X-API-Key".into(),
                key_value: "k".into(),
                location: ApiKeyLocation::Header,
            }
        );
        let oauth: AuthConfig<String> = serde_json::from_str(
            r#"{"type":"oauth2","token_url":"http://t","client_id":"c","client_secret":"s"}"#,
        )
        .unwrap();
        assert!(matches!(oauth, AuthConfig::OAuth2 { ref grant_type, .. } if grant_type == "client_credentials"));
    }
}

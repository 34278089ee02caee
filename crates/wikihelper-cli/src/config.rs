use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use wikihelper_dify::client::{DEFAULT_BASE_URL, DifyConfig};
use wikihelper_dify::wire::DEFAULT_USER;

/// Current config version. Bump this when adding fields or changing shape.
/// Each bump requires a corresponding entry in [`migrate`].
const CURRENT_VERSION: u32 = 1;

const APP_DIR: &str = "wikihelper";
const CONFIG_FILE: &str = "config.json";
const DATABASE_FILE: &str = "history.db";

pub const API_KEY_ENV: &str = "DIFY_API_KEY";
pub const BASE_URL_ENV: &str = "DIFY_BASE_URL";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    /// Schema version. Missing or 0 = pre-versioned config.
    #[serde(default)]
    pub config_version: u32,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    /// User id requests are attributed to. Added in v1.
    #[serde(default = "default_user")]
    pub user: String,
    /// History database location; the platform data directory when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database_path: Option<PathBuf>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}

fn default_user() -> String {
    DEFAULT_USER.to_string()
}

fn default_timeout_secs() -> u64 {
    120
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            config_version: CURRENT_VERSION,
            base_url: default_base_url(),
            api_key: None,
            user: default_user(),
            database_path: None,
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl AppConfig {
    pub fn has_api_key(&self) -> bool {
        self.api_key.as_deref().is_some_and(|k| !k.trim().is_empty())
    }

    pub fn set_api_key(&mut self, api_key: &str) {
        let api_key = api_key.trim();
        self.api_key = (!api_key.is_empty()).then(|| api_key.to_string());
    }

    pub fn clear_api_key(&mut self) {
        self.api_key = None;
    }

    /// Apply `DIFY_API_KEY` / `DIFY_BASE_URL` from the process environment.
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides(|name| std::env::var(name).ok())
    }

    /// Apply overrides from `lookup`; empty values are ignored.
    pub fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        let value = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
        if let Some(key) = value(API_KEY_ENV) {
            self.api_key = Some(key.trim().to_string());
        }
        if let Some(url) = value(BASE_URL_ENV) {
            self.base_url = url.trim().to_string();
        }
        self
    }

    /// Client settings, or `None` when no API key is configured.
    pub fn dify_config(&self) -> Option<DifyConfig> {
        if !self.has_api_key() {
            return None;
        }
        Some(DifyConfig {
            base_url: self.base_url.clone(),
            api_key: self.api_key.clone().unwrap_or_default(),
            user: self.user.clone(),
            timeout: Duration::from_secs(self.timeout_secs),
        })
    }

    pub fn database_path(&self) -> eyre::Result<PathBuf> {
        if let Some(path) = &self.database_path {
            return Ok(path.clone());
        }
        let base = dirs::data_dir().ok_or_else(|| eyre::eyre!("no data directory found"))?;
        Ok(base.join(APP_DIR).join(DATABASE_FILE))
    }

    /// Redacted view, safe to print.
    pub fn info(&self) -> ConfigInfo {
        ConfigInfo {
            base_url: self.base_url.clone(),
            user: self.user.clone(),
            api_key_hint: self.api_key.as_deref().map(redact_api_key),
            database_path: self.database_path.clone(),
            timeout_secs: self.timeout_secs,
        }
    }
}

/// Redacted config info.
#[derive(Debug, Clone, Serialize)]
pub struct ConfigInfo {
    pub base_url: String,
    pub user: String,
    pub api_key_hint: Option<String>,
    pub database_path: Option<PathBuf>,
    pub timeout_secs: u64,
}

/// Where the config file lives.
#[derive(Debug, Clone)]
pub struct ConfigStore {
    dir: PathBuf,
}

impl ConfigStore {
    /// The platform config directory, e.g. `~/.config/wikihelper` on Linux.
    pub fn default_location() -> eyre::Result<Self> {
        let base = dirs::config_dir().ok_or_else(|| eyre::eyre!("no config directory found"))?;
        Ok(Self::at(base.join(APP_DIR)))
    }

    pub fn at(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path(&self) -> PathBuf {
        self.dir.join(CONFIG_FILE)
    }

    pub fn exists(&self) -> bool {
        self.path().exists()
    }

    /// Load the config, or the defaults when none has been saved yet.
    pub fn load(&self) -> eyre::Result<AppConfig> {
        let path = self.path();
        if !path.exists() {
            return Ok(AppConfig::default());
        }
        load_from(&path)
    }

    pub fn save(&self, config: &AppConfig) -> eyre::Result<()> {
        std::fs::create_dir_all(&self.dir)?;

        // Always write the current version, regardless of what was loaded.
        let mut stamped = config.clone();
        stamped.config_version = CURRENT_VERSION;

        let path = self.path();
        let json = serde_json::to_string_pretty(&stamped)?;

        // Write to a temp file then rename for atomicity
        let tmp_path = self.dir.join(format!("{CONFIG_FILE}.tmp"));
        std::fs::write(&tmp_path, json.as_bytes())?;

        // The file holds the API key.
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&tmp_path, std::fs::Permissions::from_mode(0o600))?;
        }

        std::fs::rename(&tmp_path, &path)?;

        tracing::info!(path = %path.display(), "config saved");
        Ok(())
    }

    pub fn delete(&self) -> eyre::Result<()> {
        let path = self.path();
        if path.exists() {
            std::fs::remove_file(&path)?;
            tracing::info!(path = %path.display(), "config deleted");
        }
        Ok(())
    }
}

fn load_from(path: &Path) -> eyre::Result<AppConfig> {
    let contents = std::fs::read_to_string(path)
        .map_err(|e| eyre::eyre!("failed to read config at {}: {e}", path.display()))?;

    // Parse as raw JSON so we can run migrations before deserializing.
    let json: serde_json::Value = serde_json::from_str(&contents)?;
    let on_disk_version = match json.get("config_version") {
        None | Some(serde_json::Value::Null) => 0,
        Some(raw) => raw
            .as_u64()
            .and_then(|v| u32::try_from(v).ok())
            .ok_or_else(|| eyre::eyre!("invalid config_version {raw} in {}", path.display()))?,
    };

    let migrated = migrate(json, on_disk_version)?;
    let config: AppConfig = serde_json::from_value(migrated)?;
    Ok(config)
}

/// Run sequential migrations from `from_version` up to [`CURRENT_VERSION`].
///
/// Each migration is a pure transform on the raw JSON value.
fn migrate(mut json: serde_json::Value, from_version: u32) -> eyre::Result<serde_json::Value> {
    if from_version > CURRENT_VERSION {
        return Err(eyre::eyre!(
            "config_version {from_version} is newer than this build supports ({CURRENT_VERSION}). \
             Please update wikihelper."
        ));
    }

    // v0 → v1: add user (pre-versioned configs always used the shared id)
    if from_version < 1 {
        let obj = json
            .as_object_mut()
            .ok_or_else(|| eyre::eyre!("config is not a JSON object"))?;
        obj.entry("user")
            .or_insert(serde_json::Value::String(DEFAULT_USER.to_string()));
        obj.insert(
            "config_version".to_string(),
            serde_json::Value::Number(1.into()),
        );
        tracing::info!("migrated config v0 → v1 (added user)");
    }

    Ok(json)
}

fn redact_api_key(key: &str) -> String {
    let key = key.trim();
    if key.chars().count() <= 8 {
        return "****".to_string();
    }
    let prefix: String = key.chars().take(4).collect();
    let suffix: String = key
        .chars()
        .rev()
        .take(4)
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .collect();
    format!("{prefix}...{suffix}")
}

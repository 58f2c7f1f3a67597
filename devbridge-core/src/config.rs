//! YAML configuration for devbridge.
//!
//! # Storage layout
//!
//! ```text
//! ~/.devbridge/
//!   config.yaml      (mode 0600, created by `devbridge init`)
//! ```
//!
//! # API pattern
//!
//! Every filesystem function has two forms:
//! - `fn_at(home: &Path, …)` — explicit home; used in tests with `TempDir`
//! - `fn(…)` — derives home from `dirs::home_dir()`, delegates to `_at`
//!
//! Tests must NEVER call the no-arg wrappers; always use `_at`.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::types::{EntityType, SyncDirection};

pub const CONFIG_VERSION: u32 = 1;

// ---------------------------------------------------------------------------
// 1. Config structs
// ---------------------------------------------------------------------------

/// Root of `config.yaml`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BridgeConfig {
    pub version: u32,
    pub github: GitHubConfig,
    pub azure: AzureConfig,
    #[serde(default)]
    pub sync: SyncSettings,
    #[serde(default)]
    pub http: HttpSettings,
    #[serde(default)]
    pub daemon: DaemonSettings,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GitHubConfig {
    #[serde(default = "default_github_api_url")]
    pub api_url: String,
    pub owner: String,
    pub repo: String,
    /// Name of the environment variable holding the token, never the token.
    #[serde(default = "default_github_token_env")]
    pub token_env: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AzureConfig {
    #[serde(default = "default_azure_api_url")]
    pub api_url: String,
    pub organization: String,
    pub project: String,
    /// Git repository used for pull requests and commits.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repository: Option<String>,
    /// Wiki identifier used for wiki pages.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wiki: Option<String>,
    #[serde(default = "default_azure_token_env")]
    pub token_env: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncSettings {
    /// Entities synced at once by `bulk_sync`; 1 keeps the run serial.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    /// `None` waits forever for an entity lock.
    #[serde(default = "default_lock_timeout_secs")]
    pub lock_timeout_secs: Option<u64>,
    #[serde(default)]
    pub retry: RetrySettings,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            lock_timeout_secs: default_lock_timeout_secs(),
            retry: RetrySettings::default(),
        }
    }
}

impl SyncSettings {
    pub fn lock_timeout(&self) -> Option<Duration> {
        self.lock_timeout_secs.map(Duration::from_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetrySettings {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            base_delay_ms: 500,
            max_delay_ms: 30_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpSettings {
    pub timeout_secs: u64,
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self { timeout_secs: 30 }
    }
}

impl HttpSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DaemonSettings {
    pub interval_secs: u64,
    #[serde(default)]
    pub schedules: Vec<Schedule>,
}

impl Default for DaemonSettings {
    fn default() -> Self {
        Self {
            interval_secs: 900,
            schedules: Vec::new(),
        }
    }
}

/// One recurring `bulk_sync` run executed by the daemon.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schedule {
    pub entity_type: EntityType,
    #[serde(default)]
    pub direction: SyncDirection,
    #[serde(default)]
    pub filters: BTreeMap<String, String>,
}

impl Schedule {
    pub fn label(&self) -> String {
        format!("{}:{}", self.entity_type, self.direction)
    }
}

fn default_github_api_url() -> String {
    "https://api.github.com".to_string()
}

fn default_github_token_env() -> String {
    "GITHUB_TOKEN".to_string()
}

fn default_azure_api_url() -> String {
    "https://dev.azure.com".to_string()
}

fn default_azure_token_env() -> String {
    "AZURE_DEVOPS_PAT".to_string()
}

fn default_concurrency() -> usize {
    1
}

fn default_lock_timeout_secs() -> Option<u64> {
    Some(300)
}

impl BridgeConfig {
    /// A config with defaults for everything except the platform coordinates.
    pub fn new(github: GitHubConfig, azure: AzureConfig) -> Self {
        Self {
            version: CONFIG_VERSION,
            github,
            azure,
            sync: SyncSettings::default(),
            http: HttpSettings::default(),
            daemon: DaemonSettings::default(),
        }
    }

    /// Reject configs the sync engine cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.github.owner.trim().is_empty() || self.github.repo.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "github.owner and github.repo must be set".to_string(),
            ));
        }
        if self.azure.organization.trim().is_empty() || self.azure.project.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "azure.organization and azure.project must be set".to_string(),
            ));
        }
        if self.sync.concurrency == 0 {
            return Err(ConfigError::Invalid(
                "sync.concurrency must be at least 1".to_string(),
            ));
        }
        if self.sync.retry.max_attempts == 0 {
            return Err(ConfigError::Invalid(
                "sync.retry.max_attempts must be at least 1".to_string(),
            ));
        }
        if self.daemon.interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "daemon.interval_secs must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

impl GitHubConfig {
    pub fn new(owner: impl Into<String>, repo: impl Into<String>) -> Self {
        Self {
            api_url: default_github_api_url(),
            owner: owner.into(),
            repo: repo.into(),
            token_env: default_github_token_env(),
        }
    }
}

impl AzureConfig {
    pub fn new(organization: impl Into<String>, project: impl Into<String>) -> Self {
        Self {
            api_url: default_azure_api_url(),
            organization: organization.into(),
            project: project.into(),
            repository: None,
            wiki: None,
            token_env: default_azure_token_env(),
        }
    }
}

// ---------------------------------------------------------------------------
// 2. Path helpers
// ---------------------------------------------------------------------------

/// `<home>/.devbridge/`
pub fn root_at(home: &Path) -> PathBuf {
    home.join(".devbridge")
}

/// `<home>/.devbridge/config.yaml`. Pure, no I/O.
pub fn config_path_at(home: &Path) -> PathBuf {
    root_at(home).join("config.yaml")
}

// ---------------------------------------------------------------------------
// 3. Load
// ---------------------------------------------------------------------------

/// Load and validate `<home>/.devbridge/config.yaml`.
///
/// Returns `ConfigError::NotFound` if absent,
/// `ConfigError::Parse` (with path + line context) if malformed YAML.
pub fn load_at(home: &Path) -> Result<BridgeConfig, ConfigError> {
    let path = config_path_at(home);
    if !path.exists() {
        return Err(ConfigError::NotFound { path });
    }
    let contents = std::fs::read_to_string(&path)?;
    let config: BridgeConfig =
        serde_yaml::from_str(&contents).map_err(|e| ConfigError::Parse { path, source: e })?;
    config.validate()?;
    Ok(config)
}

/// `load_at` convenience wrapper.
pub fn load() -> Result<BridgeConfig, ConfigError> {
    load_at(&home()?)
}

// ---------------------------------------------------------------------------
// 4. Save (atomic)
// ---------------------------------------------------------------------------

/// Atomically save the config to `<home>/.devbridge/config.yaml`.
///
/// Write flow: serialize → `config.yaml.tmp` sibling → `chmod 0600` → `rename`.
pub fn save_at(home: &Path, config: &BridgeConfig) -> Result<(), ConfigError> {
    let dir = root_at(home);
    if !dir.exists() {
        std::fs::create_dir_all(&dir)?;
        set_dir_permissions(&dir)?;
    }
    let path = config_path_at(home);
    let tmp_path = path.with_file_name("config.yaml.tmp");

    let yaml = serde_yaml::to_string(config)?;
    std::fs::write(&tmp_path, yaml)?;
    set_file_permissions(&tmp_path)?;
    std::fs::rename(&tmp_path, &path)?;
    Ok(())
}

/// `save_at` convenience wrapper.
pub fn save(config: &BridgeConfig) -> Result<(), ConfigError> {
    save_at(&home()?, config)
}

// ---------------------------------------------------------------------------
// 5. Init
// ---------------------------------------------------------------------------

/// Write `config` unless a config already exists.
///
/// Idempotent: an existing file is loaded and returned unchanged unless
/// `overwrite` is set.
pub fn init_at(
    home: &Path,
    config: BridgeConfig,
    overwrite: bool,
) -> Result<BridgeConfig, ConfigError> {
    config.validate()?;
    if config_path_at(home).exists() && !overwrite {
        return load_at(home);
    }
    save_at(home, &config)?;
    Ok(config)
}

/// `init_at` convenience wrapper.
pub fn init(config: BridgeConfig, overwrite: bool) -> Result<BridgeConfig, ConfigError> {
    init_at(&home()?, config, overwrite)
}

// ---------------------------------------------------------------------------
// Private helpers
// ---------------------------------------------------------------------------

/// Home directory as reported by `dirs`.
pub fn home() -> Result<PathBuf, ConfigError> {
    dirs::home_dir().ok_or(ConfigError::HomeNotFound)
}

#[cfg(unix)]
fn set_dir_permissions(path: &Path) -> Result<(), ConfigError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o700))?;
    Ok(())
}
#[cfg(not(unix))]
fn set_dir_permissions(_path: &Path) -> Result<(), ConfigError> {
    Ok(())
}

#[cfg(unix)]
fn set_file_permissions(path: &Path) -> Result<(), ConfigError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
    Ok(())
}
#[cfg(not(unix))]
fn set_file_permissions(_path: &Path) -> Result<(), ConfigError> {
    Ok(())
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

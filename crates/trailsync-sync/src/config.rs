use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;
use trailsync_storage::ExecutionMode;

pub const DEFAULT_CONFIG_PATH: &str = "trailsync.yaml";

/// Region value that stands for "no region filter".
pub const UNSET_REGION: &str = "0";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("reading config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("parsing config: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("missing required setting `{0}`")]
    Missing(&'static str),
    #[error("invalid setting `{setting}`: {reason}")]
    Invalid {
        setting: &'static str,
        reason: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    Postgrest,
    Postgres,
    Memory,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CatalogSettings {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default)]
    pub project: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_language")]
    pub language: String,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for CatalogSettings {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            project: String::new(),
            api_key: String::new(),
            language: default_language(),
            region: None,
            timeout_secs: default_timeout_secs(),
            user_agent: default_user_agent(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StoreSettings {
    #[serde(default)]
    pub backend: StoreBackend,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub key: Option<String>,
    #[serde(default)]
    pub table_prefix: String,
    #[serde(default)]
    pub atomic_upsert: bool,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            backend: StoreBackend::default(),
            url: None,
            key: None,
            table_prefix: String::new(),
            atomic_upsert: false,
            max_connections: default_max_connections(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExecutionSettings {
    #[serde(default)]
    pub mode: ExecutionMode,
    #[serde(default = "default_wait_min")]
    pub wait_min_secs: u64,
    #[serde(default = "default_wait_max")]
    pub wait_max_secs: u64,
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default = "default_true")]
    pub refresh_stale: bool,
}

impl Default for ExecutionSettings {
    fn default() -> Self {
        Self {
            mode: ExecutionMode::default(),
            wait_min_secs: default_wait_min(),
            wait_max_secs: default_wait_max(),
            concurrency: default_concurrency(),
            refresh_stale: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LogSettings {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub file: Option<PathBuf>,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: None,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TrailsyncConfig {
    #[serde(default)]
    pub catalog: CatalogSettings,
    #[serde(default)]
    pub store: StoreSettings,
    #[serde(default)]
    pub execution: ExecutionSettings,
    #[serde(default)]
    pub log: LogSettings,
}

fn default_base_url() -> String {
    "https://www.outdooractive.com".to_string()
}

fn default_language() -> String {
    "en".to_string()
}

fn default_timeout_secs() -> u64 {
    20
}

fn default_user_agent() -> String {
    format!("trailsync/{}", env!("CARGO_PKG_VERSION"))
}

fn default_max_connections() -> u32 {
    4
}

fn default_wait_min() -> u64 {
    1
}

fn default_wait_max() -> u64 {
    5
}

fn default_concurrency() -> usize {
    1
}

fn default_true() -> bool {
    true
}

fn default_log_level() -> String {
    "info".to_string()
}

impl TrailsyncConfig {
    /// Reads the file, applies environment overrides and validates the result.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let config = Self::read(path)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads the file and applies environment overrides without validating.
    pub fn read(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config = Self::from_yaml_str(&text)?;
        config.apply_env_overrides(|name| std::env::var(name).ok());
        Ok(config)
    }

    pub fn from_yaml_str(text: &str) -> Result<Self, ConfigError> {
        if text.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(text)?)
    }

    pub fn apply_env_overrides(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(value) = var("TRAILSYNC_API_KEY") {
            self.catalog.api_key = value;
        }
        if let Some(value) = var("TRAILSYNC_PROJECT") {
            self.catalog.project = value;
        }
        if let Some(value) = var("TRAILSYNC_REGION") {
            self.catalog.region = Some(value);
        }
        if let Some(value) = var("TRAILSYNC_STORE_URL") {
            self.store.url = Some(value);
        }
        if let Some(value) = var("TRAILSYNC_STORE_KEY") {
            self.store.key = Some(value);
        }
        if let Some(value) = var("TRAILSYNC_TABLE_PREFIX") {
            self.store.table_prefix = value;
        }
        if self.store.backend == StoreBackend::Postgres {
            if let Some(value) = var("DATABASE_URL") {
                self.store.url = Some(value);
            }
        }
        if let Some(value) = var("LOGLEVEL") {
            self.log.level = value.to_ascii_lowercase();
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.validate_catalog()?;
        if self.store.backend != StoreBackend::Memory
            && self.store.url.as_deref().map_or(true, |url| url.trim().is_empty())
        {
            return Err(ConfigError::Missing("store.url"));
        }
        Ok(())
    }

    /// Checks everything a run needs except the record store.
    pub fn validate_catalog(&self) -> Result<(), ConfigError> {
        if self.catalog.project.trim().is_empty() {
            return Err(ConfigError::Missing("catalog.project"));
        }
        if self.catalog.api_key.trim().is_empty() {
            return Err(ConfigError::Missing("catalog.api_key"));
        }
        if self.execution.wait_min_secs > self.execution.wait_max_secs {
            return Err(ConfigError::Invalid {
                setting: "execution.wait_min_secs",
                reason: format!(
                    "{} is greater than wait_max_secs {}",
                    self.execution.wait_min_secs, self.execution.wait_max_secs
                ),
            });
        }
        if self.execution.concurrency == 0 {
            return Err(ConfigError::Invalid {
                setting: "execution.concurrency",
                reason: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }

    /// Region passed to the listing endpoint; `""` and `"0"` mean no filter.
    pub fn region_filter(&self) -> Option<&str> {
        self.catalog
            .region
            .as_deref()
            .map(str::trim)
            .filter(|region| !region.is_empty() && *region != UNSET_REGION)
    }

    /// Region stamped onto records and statistics rows.
    pub fn region_stamp(&self) -> String {
        self.region_filter().unwrap_or(UNSET_REGION).to_string()
    }
}

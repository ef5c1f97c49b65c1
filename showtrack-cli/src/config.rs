use serde::{Deserialize, Serialize, Serializer};
use showtrack_core::SyncPolicy;
use std::path::PathBuf;
use std::time::Duration;

/// Source of a configuration value
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfigSource {
    Default,
    File,
    Environment,
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigSource::Default => write!(f, "default"),
            ConfigSource::File => write!(f, "file"),
            ConfigSource::Environment => write!(f, "environment"),
        }
    }
}

/// A configuration value with its source
#[derive(Debug, Clone, Serialize)]
pub struct ConfigValue<T> {
    pub value: T,
    pub source: ConfigSource,
}

impl<T> ConfigValue<T> {
    pub fn new(value: T, source: ConfigSource) -> Self {
        Self { value, source }
    }
}

/// Managed backend connection settings
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct BackendConfig {
    /// Base URL of the REST API (e.g., "https://api.showtrack.example/v1")
    pub url: Option<String>,
    /// API key sent as the bearer credential
    #[serde(serialize_with = "redact")]
    pub api_key: Option<String>,
    /// Principal whose records this device holds
    pub owner_id: Option<String>,
    /// AI enrichment webhook (default: `<url>/webhooks/enrich`)
    pub enrichment_url: Option<String>,
}

impl BackendConfig {
    /// Returns true if the backend is configured (has both url and api_key)
    pub fn is_configured(&self) -> bool {
        self.url.is_some() && self.api_key.is_some()
    }

    /// Partition of the local database used for this principal.
    pub fn scope(&self) -> &str {
        self.owner_id.as_deref().unwrap_or("default")
    }

    pub fn enrichment_url(&self) -> Option<String> {
        self.enrichment_url.clone().or_else(|| {
            self.url
                .as_ref()
                .map(|url| format!("{}/webhooks/enrich", url.trim_end_matches('/')))
        })
    }
}

fn redact<S: Serializer>(value: &Option<String>, serializer: S) -> Result<S::Ok, S::Error> {
    match value {
        Some(_) => serializer.serialize_some("********"),
        None => serializer.serialize_none(),
    }
}

/// Offline sync tuning
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncSettings {
    /// Replay the queue after write commands (default: false)
    pub auto_sync: bool,
    pub max_attempts: u32,
    pub backoff_base_secs: u64,
    pub backoff_max_secs: u64,
    pub poll_interval_secs: u64,
    pub write_budget_secs: u64,
    pub data_timeout_secs: u64,
    pub ai_timeout_secs: u64,
    /// Refresh synced cache entries older than this on read (default: never)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stale_after_secs: Option<u64>,
}

impl Default for SyncSettings {
    fn default() -> Self {
        let policy = SyncPolicy::default();
        Self {
            auto_sync: false,
            max_attempts: policy.max_attempts,
            backoff_base_secs: policy.backoff_base.as_secs(),
            backoff_max_secs: policy.backoff_max.as_secs(),
            poll_interval_secs: policy.poll_interval.as_secs(),
            write_budget_secs: policy.write_budget.as_secs(),
            data_timeout_secs: 10,
            ai_timeout_secs: 60,
            stale_after_secs: None,
        }
    }
}

impl SyncSettings {
    pub fn policy(&self) -> SyncPolicy {
        SyncPolicy {
            max_attempts: self.max_attempts.max(1),
            backoff_base: Duration::from_secs(self.backoff_base_secs),
            backoff_max: Duration::from_secs(self.backoff_max_secs),
            poll_interval: Duration::from_secs(self.poll_interval_secs),
            write_budget: Duration::from_secs(self.write_budget_secs),
            stale_after: self.stale_after_secs.map(Duration::from_secs),
        }
    }

    pub fn data_timeout(&self) -> Duration {
        Duration::from_secs(self.data_timeout_secs)
    }

    pub fn ai_timeout(&self) -> Duration {
        Duration::from_secs(self.ai_timeout_secs)
    }
}

/// Application configuration with source tracking
#[derive(Debug, Clone, Serialize)]
pub struct Config {
    /// Path to the SQLite database
    pub database_path: ConfigValue<PathBuf>,
    /// Config file path used (if any)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config_file: Option<PathBuf>,
    pub backend: BackendConfig,
    pub sync: SyncSettings,
}

/// Internal struct for deserializing config file
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct ConfigFile {
    database_path: Option<PathBuf>,
    backend: Option<BackendConfig>,
    sync: Option<SyncSettings>,
}

impl Config {
    /// Load configuration with priority: env vars > config file > defaults
    pub fn load(config_path: Option<PathBuf>) -> Result<Self, ConfigError> {
        let default_db_path = Self::default_data_dir().join("showtrack.db");

        let mut database_path = ConfigValue::new(default_db_path, ConfigSource::Default);
        let mut config_file = None;
        let mut backend = BackendConfig::default();
        let mut sync = SyncSettings::default();

        let path = config_path.unwrap_or_else(Self::default_config_path);
        if path.exists() {
            let contents = std::fs::read_to_string(&path)
                .map_err(|e| ConfigError::ReadError(path.clone(), e))?;
            let file_config: ConfigFile = serde_yaml::from_str(&contents)
                .map_err(|e| ConfigError::ParseError(path.clone(), e))?;

            config_file = Some(path.clone());

            if let Some(db_path) = file_config.database_path {
                // Resolve relative paths against config file's directory
                let resolved_path = if db_path.is_relative() {
                    path.parent().map(|p| p.join(&db_path)).unwrap_or(db_path)
                } else {
                    db_path
                };
                database_path = ConfigValue::new(resolved_path, ConfigSource::File);
            }
            if let Some(backend_config) = file_config.backend {
                backend = backend_config;
            }
            if let Some(sync_settings) = file_config.sync {
                sync = sync_settings;
            }
        }

        if let Ok(db_path) = std::env::var("SHOWTRACK_DATABASE_PATH") {
            database_path = ConfigValue::new(PathBuf::from(db_path), ConfigSource::Environment);
        }
        if let Ok(url) = std::env::var("SHOWTRACK_BACKEND_URL") {
            backend.url = Some(url);
        }
        if let Ok(key) = std::env::var("SHOWTRACK_API_KEY") {
            backend.api_key = Some(key);
        }
        if let Ok(owner) = std::env::var("SHOWTRACK_OWNER_ID") {
            backend.owner_id = Some(owner);
        }

        Ok(Self {
            database_path,
            config_file,
            backend,
            sync,
        })
    }

    /// Default config directory (platform-specific):
    /// - Linux: ~/.config/showtrack/
    /// - macOS: ~/Library/Application Support/showtrack/
    /// - Windows: %APPDATA%/showtrack/
    pub fn default_config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("showtrack")
    }

    /// Default data directory (platform-specific):
    /// - Linux: ~/.local/share/showtrack/
    /// - macOS: ~/Library/Application Support/showtrack/
    /// - Windows: %APPDATA%/showtrack/
    pub fn default_data_dir() -> PathBuf {
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("showtrack")
    }

    /// Default config file path (platform-specific config dir + config.yaml)
    pub fn default_config_path() -> PathBuf {
        Self::default_config_dir().join("config.yaml")
    }
}

#[derive(Debug)]
pub enum ConfigError {
    ReadError(PathBuf, std::io::Error),
    ParseError(PathBuf, serde_yaml::Error),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::ReadError(path, e) => {
                write!(f, "Failed to read config file '{}': {}", path.display(), e)
            }
            ConfigError::ParseError(path, e) => {
                write!(f, "Failed to parse config file '{}': {}", path.display(), e)
            }
        }
    }
}

impl std::error::Error for ConfigError {}

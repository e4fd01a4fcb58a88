use serde::{Deserialize, Serialize, Serializer};
use std::path::{Path, PathBuf};
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

/// Favorites server configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ServerConfig {
    /// Server URL (e.g., "http://localhost:8080" or "https://zen.example.com")
    pub url: Option<String>,
    /// API key for authentication
    #[serde(serialize_with = "serialize_masked")]
    pub api_key: Option<String>,
    /// Seconds to wait for favorites to load after sign-in (default: 10)
    #[serde(default = "default_sync_timeout")]
    pub sync_timeout: u64,
}

fn default_sync_timeout() -> u64 {
    10
}

impl ServerConfig {
    /// Returns true if a server URL is set
    pub fn is_configured(&self) -> bool {
        self.url.is_some()
    }

    pub fn sync_timeout(&self) -> Duration {
        Duration::from_secs(self.sync_timeout)
    }
}

/// Hides all but the last four characters of a key.
pub fn mask_key(key: &str) -> String {
    let visible: String = key
        .chars()
        .rev()
        .take(4)
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .collect();
    if key.chars().count() <= 4 {
        "****".to_string()
    } else {
        format!("****{}", visible)
    }
}

fn serialize_masked<S: Serializer>(key: &Option<String>, serializer: S) -> Result<S::Ok, S::Error> {
    match key {
        Some(key) => serializer.serialize_some(&mask_key(key)),
        None => serializer.serialize_none(),
    }
}

/// Application configuration with source tracking
#[derive(Debug, Clone, Serialize)]
pub struct Config {
    /// Directory holding the local favorites and the session file
    pub data_dir: ConfigValue<PathBuf>,
    /// Catalog JSON file replacing the built-in catalog
    pub catalog_path: ConfigValue<Option<PathBuf>>,
    /// Config file path used (if any)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config_file: Option<PathBuf>,
    /// Favorites server configuration
    pub server: ServerConfig,
}

/// Internal struct for deserializing config file
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct ConfigFile {
    data_dir: Option<PathBuf>,
    catalog_path: Option<PathBuf>,
    server: Option<ServerConfig>,
}

impl Config {
    /// Load configuration with priority: env vars > config file > defaults
    pub fn load(config_path: Option<PathBuf>) -> Result<Self, ConfigError> {
        // Start with defaults
        let mut data_dir = ConfigValue::new(Self::default_data_dir(), ConfigSource::Default);
        let mut catalog_path = ConfigValue::new(None, ConfigSource::Default);
        let mut config_file = None;
        let mut server = ServerConfig {
            sync_timeout: default_sync_timeout(),
            ..ServerConfig::default()
        };

        // Try to load from config file
        let path = config_path.unwrap_or_else(Self::default_config_path);
        if path.exists() {
            let contents = std::fs::read_to_string(&path)
                .map_err(|e| ConfigError::ReadError(path.clone(), e))?;
            let file_config: ConfigFile = serde_yaml::from_str(&contents)
                .map_err(|e| ConfigError::ParseError(path.clone(), e))?;

            config_file = Some(path.clone());

            if let Some(dir) = file_config.data_dir {
                data_dir = ConfigValue::new(resolve(&path, dir), ConfigSource::File);
            }
            if let Some(catalog) = file_config.catalog_path {
                catalog_path = ConfigValue::new(Some(resolve(&path, catalog)), ConfigSource::File);
            }
            if let Some(server_config) = file_config.server {
                server = server_config;
            }
        }

        // Apply environment variable overrides
        if let Ok(dir) = std::env::var("ZEN_DATA_DIR") {
            data_dir = ConfigValue::new(PathBuf::from(dir), ConfigSource::Environment);
        }
        if let Ok(url) = std::env::var("ZEN_SERVER_URL") {
            server.url = Some(url);
        }
        if let Ok(key) = std::env::var("ZEN_API_KEY") {
            server.api_key = Some(key);
        }

        Ok(Self {
            data_dir,
            catalog_path,
            config_file,
            server,
        })
    }

    /// Default config directory (platform-specific):
    /// - Linux: ~/.config/desertzen/
    /// - macOS: ~/Library/Application Support/desertzen/
    /// - Windows: %APPDATA%/desertzen/
    pub fn default_config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("desertzen")
    }

    /// Default data directory (platform-specific):
    /// - Linux: ~/.local/share/desertzen/
    /// - macOS: ~/Library/Application Support/desertzen/
    /// - Windows: %APPDATA%/desertzen/
    pub fn default_data_dir() -> PathBuf {
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("desertzen")
    }

    /// Default config file path (platform-specific config dir + config.yaml)
    pub fn default_config_path() -> PathBuf {
        Self::default_config_dir().join("config.yaml")
    }
}

/// Resolves relative paths against the config file's directory
fn resolve(config_path: &Path, path: PathBuf) -> PathBuf {
    if path.is_relative() {
        config_path.parent().map(|p| p.join(&path)).unwrap_or(path)
    } else {
        path
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

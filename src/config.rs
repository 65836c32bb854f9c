//! Configuration for remote sources and scan limits.
//!
//! Loaded from `~/.config/catalog-gaps/config.toml` by default:
//!
//! ```toml
//! requests_per_second = 2.0
//! max_pages_per_request = 50
//!
//! [[endpoints]]
//! name = "primary"
//! url = "https://catalog.example.org/graphql"
//! api_key_env = "PRIMARY_API_KEY"
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigurationError;

/// Environment variable that overrides the config file location.
pub const CONFIG_ENV: &str = "CATALOG_GAPS_CONFIG";

/// One remote catalog the scanner can query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EndpointConfig {
    /// Short name for logs and the command line.
    pub name: String,
    /// GraphQL URL. Caches and cursors are keyed by it.
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    /// Environment variable holding the API key, checked when `api_key` is unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,
}

impl EndpointConfig {
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            api_key: None,
            api_key_env: None,
        }
    }

    fn default_key_env(&self) -> String {
        let slug: String = self
            .name
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() {
                    c.to_ascii_uppercase()
                } else {
                    '_'
                }
            })
            .collect();
        format!("CATALOG_GAPS_{slug}_API_KEY")
    }

    /// Resolve the API key from the config or the environment.
    pub fn resolve_api_key(&self) -> Result<String, ConfigurationError> {
        if let Some(key) = self.api_key.as_ref().filter(|k| !k.is_empty()) {
            return Ok(key.clone());
        }
        let env_var = self
            .api_key_env
            .clone()
            .unwrap_or_else(|| self.default_key_env());
        match std::env::var(&env_var) {
            Ok(key) if !key.is_empty() => Ok(key),
            _ => Err(ConfigurationError::MissingApiKey {
                endpoint: self.name.clone(),
                env_var,
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    pub requests_per_second: f64,
    pub max_retries: u32,
    pub max_pages_per_request: u32,
    pub inventory_db: Option<PathBuf>,
    /// Rebuild identifier caches older than this. Unset means never.
    pub cache_max_age_secs: Option<u64>,
    pub connect_timeout_secs: u64,
    pub request_timeout_secs: u64,
    pub endpoints: Vec<EndpointConfig>,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            requests_per_second: 2.0,
            max_retries: 3,
            max_pages_per_request: 50,
            inventory_db: None,
            cache_max_age_secs: None,
            connect_timeout_secs: 10,
            request_timeout_secs: 30,
            endpoints: Vec::new(),
        }
    }
}

impl ScanConfig {
    /// Default config file path.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("catalog-gaps")
            .join("config.toml")
    }

    /// Load from an explicit path, `$CATALOG_GAPS_CONFIG`, or the default
    /// location. A missing default file yields the built-in defaults.
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigurationError> {
        let from_env = std::env::var_os(CONFIG_ENV).map(PathBuf::from);
        match explicit.map(Path::to_path_buf).or(from_env) {
            Some(path) => Self::load_from(&path),
            None => {
                let path = Self::default_path();
                if path.exists() {
                    Self::load_from(&path)
                } else {
                    tracing::debug!(path = %path.display(), "no config file, using defaults");
                    Ok(Self::default())
                }
            }
        }
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigurationError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigurationError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let config: Self = toml::from_str(&content).map_err(|source| ConfigurationError::Parse {
            path: path.display().to_string(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if !(self.requests_per_second > 0.0 && self.requests_per_second.is_finite()) {
            return Err(ConfigurationError::Invalid(format!(
                "requests_per_second must be positive, got {}",
                self.requests_per_second
            )));
        }
        if self.max_pages_per_request == 0 {
            return Err(ConfigurationError::Invalid(
                "max_pages_per_request must be at least 1".into(),
            ));
        }
        for (idx, endpoint) in self.endpoints.iter().enumerate() {
            if endpoint.name.trim().is_empty() || endpoint.url.trim().is_empty() {
                return Err(ConfigurationError::Invalid(format!(
                    "endpoint #{} needs both a name and a url",
                    idx + 1
                )));
            }
        }
        Ok(())
    }

    /// Find an endpoint by name or URL.
    pub fn endpoint(&self, key: &str) -> Result<&EndpointConfig, ConfigurationError> {
        if self.endpoints.is_empty() {
            return Err(ConfigurationError::NoRemoteSource);
        }
        self.endpoints
            .iter()
            .find(|e| e.name == key || e.url == key)
            .ok_or_else(|| ConfigurationError::UnknownEndpoint(key.to_string()))
    }

    pub fn inventory_path(&self) -> PathBuf {
        self.inventory_db.clone().unwrap_or_else(|| {
            dirs::data_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("catalog-gaps")
                .join("inventory.db")
        })
    }

    pub fn cache_max_age(&self) -> Option<Duration> {
        self.cache_max_age_secs.map(Duration::from_secs)
    }
}

//! Client configuration, loaded from a TOML file with environment overrides.
//!
//! ```toml
//! api_url = "https://auth.example.com/api/auth"
//! request_timeout_secs = 30
//!
//! [[stores]]
//! label = "local-container"
//! kind = "local-container"
//! location = "current-user"
//! name = "My"
//! open_mode = "maximum-allowed"
//! ```
//!
//! Omitted fields take their [Default] values. When `stores` is omitted, the
//! [default_stores] are searched.
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use url::Url;

use crate::types::{default_stores, StoreRef};
use certauth_proto::DEFAULT_API_URL;

/// Overrides [ClientConfig::api_url].
pub const ENV_API_URL: &str = "CERTAUTH_API_URL";
/// Overrides [ClientConfig::softstore_root].
pub const ENV_SOFTSTORE: &str = "CERTAUTH_SOFTSTORE";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {message}")]
    Io { path: PathBuf, message: String },
    #[error("failed to parse config file: {0}")]
    Parse(String),
    #[error("invalid URL in {source_name}: {message}")]
    InvalidUrl {
        source_name: String,
        message: String,
    },
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Base URL of the authentication API; the challenge and verify endpoints
    /// live directly below it.
    pub api_url: String,
    pub request_timeout_secs: u64,
    pub connect_timeout_secs: u64,
    /// Stores to search, in order.
    pub stores: Vec<StoreRef>,
    /// Root directory of a software key container.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub softstore_root: Option<PathBuf>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            api_url: DEFAULT_API_URL.to_string(),
            request_timeout_secs: 30,
            connect_timeout_secs: 10,
            stores: default_stores(),
            softstore_root: None,
        }
    }
}

impl ClientConfig {
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let config: ClientConfig =
            toml::from_str(s).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Loads a config file. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            debug!("config file {} not found, using defaults", path.display());
            return Ok(Self::default());
        }

        let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        debug!("loaded config file {}", path.display());
        Self::from_toml_str(&contents)
    }

    /// Applies [ENV_API_URL] and [ENV_SOFTSTORE] from the process
    /// environment.
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        self.apply_overrides(|k| std::env::var(k).ok())
    }

    fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup(ENV_API_URL).filter(|u| !u.is_empty()) {
            debug!("using API URL from {}: {}", ENV_API_URL, url);
            Url::parse(&url).map_err(|e| ConfigError::InvalidUrl {
                source_name: ENV_API_URL.to_string(),
                message: e.to_string(),
            })?;
            self.api_url = url;
        }

        if let Some(root) = lookup(ENV_SOFTSTORE).filter(|r| !r.is_empty()) {
            debug!("using software container from {}: {}", ENV_SOFTSTORE, root);
            self.softstore_root = Some(PathBuf::from(root));
        }

        Ok(())
    }

    /// The parsed [ClientConfig::api_url].
    pub fn api_url(&self) -> Result<Url, ConfigError> {
        let invalid = |message: String| ConfigError::InvalidUrl {
            source_name: "api_url".to_string(),
            message,
        };
        let url = Url::parse(&self.api_url).map_err(|e| invalid(e.to_string()))?;
        if url.cannot_be_a_base() {
            return Err(invalid(format!("{url} cannot be a base URL")));
        }
        Ok(url)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.api_url()?;
        if self.request_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "request_timeout_secs must be greater than 0".to_string(),
            ));
        }
        if self.stores.is_empty() {
            return Err(ConfigError::Invalid(
                "at least one store must be configured".to_string(),
            ));
        }
        Ok(())
    }
}

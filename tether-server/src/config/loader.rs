//! Configuration loader

use std::path::Path;

use tether_utils::{config_file, Result, TetherError};
use tracing::debug;

use super::AppConfig;

/// Overrides `peer.port`
pub const ENV_PEER_PORT: &str = "TETHER_PEER_PORT";

/// Overrides `channel.response_timeout_secs`
pub const ENV_RESPONSE_TIMEOUT_SECS: &str = "TETHER_RESPONSE_TIMEOUT_SECS";

/// Configuration loader
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration from default location
    pub fn load() -> Result<AppConfig> {
        let path = config_file();
        if path.exists() {
            Self::load_from_path(&path)
        } else {
            debug!(path = %path.display(), "No config file, using defaults");
            Ok(AppConfig::default())
        }
    }

    /// Load configuration from a specific path
    pub fn load_from_path(path: &Path) -> Result<AppConfig> {
        let content = std::fs::read_to_string(path).map_err(|e| TetherError::FileRead {
            path: path.to_path_buf(),
            source: e,
        })?;

        Self::parse(&content, path)
    }

    /// Parse configuration from string
    pub fn parse(content: &str, path: &Path) -> Result<AppConfig> {
        toml::from_str(content).map_err(|e| TetherError::ConfigInvalid {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
    }

    /// Apply `TETHER_*` environment overrides
    pub fn apply_env_overrides(config: &mut AppConfig) -> Result<()> {
        Self::apply_overrides_from(config, |key| std::env::var(key).ok())
    }

    /// Apply overrides looked up through `lookup`
    pub fn apply_overrides_from<F>(config: &mut AppConfig, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(raw) = lookup(ENV_PEER_PORT) {
            config.peer.port = raw.trim().parse().map_err(|_| {
                TetherError::config(format!("{} must be a port number, got {:?}", ENV_PEER_PORT, raw))
            })?;
        }

        if let Some(raw) = lookup(ENV_RESPONSE_TIMEOUT_SECS) {
            config.channel.response_timeout_secs = raw.trim().parse().map_err(|_| {
                TetherError::config(format!(
                    "{} must be a whole number of seconds, got {:?}",
                    ENV_RESPONSE_TIMEOUT_SECS, raw
                ))
            })?;
        }

        Ok(())
    }

    /// Validate configuration
    pub fn validate(config: &AppConfig) -> Result<()> {
        if config.server.name.trim().is_empty() {
            return Err(TetherError::config("server.name must not be empty"));
        }

        if config.peer.host.trim().is_empty() {
            return Err(TetherError::config("peer.host must not be empty"));
        }

        if config.peer.port == 0 {
            return Err(TetherError::config("peer.port must be between 1 and 65535"));
        }

        Ok(())
    }

    /// Load from `path` (or the default location), apply overrides, validate
    pub fn load_and_validate(path: Option<&Path>) -> Result<AppConfig> {
        let mut config = match path {
            Some(path) => Self::load_from_path(path)?,
            None => Self::load()?,
        };
        Self::apply_env_overrides(&mut config)?;
        Self::validate(&config)?;
        Ok(config)
    }
}

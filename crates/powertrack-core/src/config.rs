//! Application configuration management.
//!
//! This module handles loading and saving the collector configuration: file
//! locations (credential env file, capture file, output tree, database, logs)
//! and retry tuning. Every field has a default, so a missing or partial file
//! is fine.
//!
//! Configuration is stored at `~/.config/powertrack/config.json` unless a
//! path is given explicitly.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::api::retry::{DEFAULT_BACKOFF_UNIT, DEFAULT_MAX_AUTH_EXPONENT, DEFAULT_MAX_RETRIES};
use crate::api::{RetryPolicy, REQUEST_TIMEOUT};
use crate::fetch::DEFAULT_SITE_PAUSE;

/// Application name used for config directory paths
const APP_NAME: &str = "powertrack";

/// Config file name
const CONFIG_FILE: &str = "config.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub env_file: PathBuf,
    pub capture_file: PathBuf,
    pub output_dir: PathBuf,
    pub db_path: PathBuf,
    pub log_dir: PathBuf,
    pub max_retries: u32,
    pub timeout_secs: u64,
    pub backoff_unit_ms: u64,
    pub max_auth_backoff_exponent: u32,
    pub site_pause_ms: u64,
    pub concurrency: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            env_file: PathBuf::from(".env"),
            capture_file: PathBuf::from("auth/mostRecentFetch.js"),
            output_dir: PathBuf::from("Sites"),
            db_path: PathBuf::from("portfolio/powertrack_data.db"),
            log_dir: PathBuf::from("logs"),
            max_retries: DEFAULT_MAX_RETRIES,
            timeout_secs: REQUEST_TIMEOUT.as_secs(),
            backoff_unit_ms: DEFAULT_BACKOFF_UNIT.as_millis() as u64,
            max_auth_backoff_exponent: DEFAULT_MAX_AUTH_EXPONENT,
            site_pause_ms: DEFAULT_SITE_PAUSE.as_millis() as u64,
            concurrency: 1,
        }
    }
}

impl Config {
    /// Load from `path`, or from the default location when `None`.
    ///
    /// A missing file yields the defaults; an unreadable or malformed one is
    /// an error.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => Self::default_path()?,
        };
        if !path.exists() {
            return Ok(Self::default());
        }
        let contents = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    pub fn default_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            unit: Duration::from_millis(self.backoff_unit_ms),
            max_auth_exponent: self.max_auth_backoff_exponent,
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn site_pause(&self) -> Duration {
        Duration::from_millis(self.site_pause_ms)
    }
}

//! Runtime configuration
//!
//! Defaults, overridden by environment variables (a `.env` file is honoured),
//! overridden again by command-line flags in the binary.

use crate::error::{MonitorError, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_GENERATION_URL: &str = "http://localhost:11434/api/generate";
pub const DEFAULT_GENERATION_MODEL: &str = "devstral:24b";

/// How breaches are turned into recommendations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DispatchMode {
    /// Generate and persist during ingest
    Inline,
    /// Enqueue breaches for a background worker
    Queued,
}

impl FromStr for DispatchMode {
    type Err = MonitorError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "inline" => Ok(DispatchMode::Inline),
            "queued" => Ok(DispatchMode::Queued),
            other => Err(MonitorError::Input(format!("Unknown dispatch mode '{}', expected 'inline' or 'queued'", other))),
        }
    }
}

/// Settings for the generation service adapter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationConfig {
    pub endpoint: String,
    pub model: String,
    pub timeout: Duration,
    /// Attempts made when the service is unreachable (at least one)
    pub max_attempts: u32,
    /// Delay before the first retry; doubled on each further retry
    pub retry_backoff: Duration,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_GENERATION_URL.to_string(),
            model: DEFAULT_GENERATION_MODEL.to_string(),
            timeout: Duration::from_secs(60),
            max_attempts: 1,
            retry_backoff: Duration::from_millis(500),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitorConfig {
    pub database_path: PathBuf,
    pub upload_dir: PathBuf,
    pub dispatch: DispatchMode,
    pub generation: GenerationConfig,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from("data/analytics.db"),
            upload_dir: PathBuf::from("uploads"),
            dispatch: DispatchMode::Inline,
            generation: GenerationConfig::default(),
        }
    }
}

impl MonitorConfig {
    /// Load defaults plus `SENTINEL_*` environment overrides.
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`MonitorConfig::from_env`] with an explicit variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(path) = lookup("SENTINEL_DATABASE") {
            config.database_path = PathBuf::from(path);
        }
        if let Some(dir) = lookup("SENTINEL_UPLOAD_DIR") {
            config.upload_dir = PathBuf::from(dir);
        }
        if let Some(mode) = lookup("SENTINEL_DISPATCH") {
            config.dispatch = mode.parse()?;
        }
        if let Some(url) = lookup("SENTINEL_GENERATION_URL") {
            config.generation.endpoint = url;
        }
        if let Some(model) = lookup("SENTINEL_GENERATION_MODEL") {
            config.generation.model = model;
        }
        if let Some(secs) = lookup("SENTINEL_GENERATION_TIMEOUT_SECS") {
            let secs: u64 = secs.trim().parse().map_err(|e| {
                MonitorError::Input(format!("SENTINEL_GENERATION_TIMEOUT_SECS must be an integer: {}", e))
            })?;
            config.generation.timeout = Duration::from_secs(secs);
        }
        if let Some(attempts) = lookup("SENTINEL_GENERATION_ATTEMPTS") {
            let attempts: u32 = attempts.trim().parse().map_err(|e| {
                MonitorError::Input(format!("SENTINEL_GENERATION_ATTEMPTS must be an integer: {}", e))
            })?;
            config.generation.max_attempts = attempts.max(1);
        }

        Ok(config)
    }
}

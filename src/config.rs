//! Engine defaults from `config.toml`
//!
//! Every field is optional. Command-line flags override the file, and the file
//! overrides the built-in defaults.

use anyhow::{Context, Result};
use provision::{ExecuteOptions, RetryConfig};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::cli::ApplyArgs;
use crate::paths;

pub const CONFIG_FILE: &str = "config.toml";

/// Directory searched for bundles when neither the flag nor the file names one
pub const DEFAULT_MANIFESTS_DIR: &str = "manifests";

/// Per-request timeout when the file doesn't set one
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Settings {
    #[serde(default)]
    pub jobs: Option<usize>,
    #[serde(default)]
    pub max_attempts: Option<u32>,
    #[serde(default)]
    pub base_delay_ms: Option<u64>,
    /// Per-request timeout against the API server
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    #[serde(default)]
    pub wait_ready: Option<bool>,
    #[serde(default)]
    pub ready_timeout_secs: Option<u64>,
    #[serde(default)]
    pub manifests_dir: Option<String>,
    #[serde(default)]
    pub kubeconfig: Option<String>,
}

impl Settings {
    /// Load `config.toml` from the config directory, if present
    pub fn load() -> Result<Self> {
        let path = paths::config_dir()?.join(CONFIG_FILE);
        Self::load_from(&path)
    }

    /// Load settings from a file; a missing file yields the defaults
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            log::debug!("No config file at {}", path.display());
            return Ok(Self::default());
        }
        let content =
            fs::read_to_string(path).with_context(|| format!("Could not read {}", path.display()))?;
        let settings = toml::from_str(&content)
            .with_context(|| format!("Invalid config file {}", path.display()))?;
        log::debug!("Loaded settings from {}", path.display());
        Ok(settings)
    }

    /// Engine options with command-line overrides applied
    pub fn execute_options(&self, args: &ApplyArgs) -> ExecuteOptions {
        let defaults = ExecuteOptions::default();
        let retry_defaults = RetryConfig::default();

        let max_attempts = args
            .retries
            .or(self.max_attempts)
            .unwrap_or(retry_defaults.max_attempts)
            .max(1);
        let base_delay = self
            .base_delay_ms
            .map_or(retry_defaults.base_delay, Duration::from_millis);

        ExecuteOptions {
            jobs: args.jobs.or(self.jobs).unwrap_or(defaults.jobs).max(1),
            retry: RetryConfig {
                max_attempts,
                base_delay,
                ..retry_defaults
            },
            wait_ready: args.wait_ready || self.wait_ready.unwrap_or(defaults.wait_ready),
            ready_timeout: self
                .ready_timeout_secs
                .map_or(defaults.ready_timeout, Duration::from_secs),
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS))
    }

    /// Bundle directory: flag, then file, then `./manifests`
    pub fn manifests_dir(&self, flag: Option<&Path>) -> PathBuf {
        match (flag, &self.manifests_dir) {
            (Some(dir), _) => paths::expand(dir),
            (None, Some(dir)) => paths::expand_path(dir),
            (None, None) => PathBuf::from(DEFAULT_MANIFESTS_DIR),
        }
    }

    /// Kubeconfig path: flag, then file; `None` defers to `KUBECONFIG`
    pub fn kubeconfig(&self, flag: Option<&Path>) -> Option<PathBuf> {
        flag.map(paths::expand)
            .or_else(|| self.kubeconfig.as_deref().map(paths::expand_path))
    }
}

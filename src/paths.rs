//! Path resolution for certprov
//!
//! # Environment Variables
//!
//! - `CERTPROV_CONFIG_DIR` - Override config directory
//!
//! # Path Resolution Priority
//!
//! For config_dir():
//! 1. `CERTPROV_CONFIG_DIR` environment variable
//! 2. `XDG_CONFIG_HOME/certprov` (if set)
//! 3. `~/.config/certprov`

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

/// Environment variable for config directory override
pub const ENV_CONFIG_DIR: &str = "CERTPROV_CONFIG_DIR";

const APP_NAME: &str = "certprov";

/// Get the certprov config directory path
pub fn config_dir() -> Result<PathBuf> {
    config_dir_from(
        std::env::var(ENV_CONFIG_DIR).ok(),
        std::env::var("XDG_CONFIG_HOME").ok(),
        dirs::home_dir(),
    )
}

fn config_dir_from(
    override_dir: Option<String>,
    xdg_config: Option<String>,
    home: Option<PathBuf>,
) -> Result<PathBuf> {
    if let Some(dir) = override_dir.filter(|d| !d.is_empty()) {
        let path = expand_path(&dir);
        log::debug!("Using config dir from {}: {}", ENV_CONFIG_DIR, path.display());
        return Ok(path);
    }

    if let Some(xdg) = xdg_config.filter(|d| !d.is_empty()) {
        let path = PathBuf::from(xdg).join(APP_NAME);
        log::debug!("Using XDG_CONFIG_HOME: {}", path.display());
        return Ok(path);
    }

    let home = home.context("Could not determine home directory")?;
    Ok(home.join(".config").join(APP_NAME))
}

/// Expand `~` and environment variables in a path
///
/// Falls back to tilde-only expansion when a variable is undefined.
pub fn expand_path(path: &str) -> PathBuf {
    match shellexpand::full(path) {
        Ok(expanded) => PathBuf::from(expanded.as_ref()),
        Err(_) => PathBuf::from(shellexpand::tilde(path).as_ref()),
    }
}

/// Expand a path given on the command line or in the config file
pub fn expand(path: &Path) -> PathBuf {
    match path.to_str() {
        Some(s) => expand_path(s),
        None => path.to_path_buf(),
    }
}

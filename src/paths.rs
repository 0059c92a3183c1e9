//! Centralized path resolution for winconf
//!
//! # Environment Variables
//!
//! - `WINCONF_CONFIG_DIR` - Override config directory (holds `config.toml`)
//! - `WINCONF_STATE_DIR` - Override state directory (holds backups)
//!
//! # Path Resolution Priority
//!
//! For config_dir():
//! 1. `WINCONF_CONFIG_DIR` environment variable
//! 2. Platform default:
//!    - Windows: `%APPDATA%\winconf`
//!    - elsewhere: `~/.config/winconf`
//!
//! For state_dir():
//! 1. `WINCONF_STATE_DIR` environment variable
//! 2. Platform default:
//!    - Windows: `%LOCALAPPDATA%\winconf`
//!    - elsewhere: `~/.local/state/winconf`

use anyhow::{Context, Result};
use std::path::PathBuf;

/// Environment variable for config directory override
pub const ENV_CONFIG_DIR: &str = "WINCONF_CONFIG_DIR";

/// Environment variable for state directory override
pub const ENV_STATE_DIR: &str = "WINCONF_STATE_DIR";

const APP_DIR: &str = "winconf";

/// Get the winconf config directory path
pub fn config_dir() -> Result<PathBuf> {
    if let Ok(dir) = std::env::var(ENV_CONFIG_DIR) {
        let path = expand(&dir);
        log::debug!(
            "Using config dir from {}: {}",
            ENV_CONFIG_DIR,
            path.display()
        );
        return Ok(path);
    }

    #[cfg(windows)]
    {
        if let Some(app_data) = dirs::config_dir() {
            let path = app_data.join(APP_DIR);
            log::debug!("Using Windows config dir: {}", path.display());
            return Ok(path);
        }
    }

    let home = dirs::home_dir().context("Could not determine home directory")?;
    let path = home.join(".config").join(APP_DIR);
    log::debug!("Using default config dir: {}", path.display());
    Ok(path)
}

/// Get the winconf state directory path
pub fn state_dir() -> Result<PathBuf> {
    if let Ok(dir) = std::env::var(ENV_STATE_DIR) {
        let path = expand(&dir);
        log::debug!("Using state dir from {}: {}", ENV_STATE_DIR, path.display());
        return Ok(path);
    }

    #[cfg(windows)]
    {
        if let Some(local_app_data) = dirs::data_local_dir() {
            let path = local_app_data.join(APP_DIR);
            log::debug!("Using Windows state dir: {}", path.display());
            return Ok(path);
        }
    }

    let home = dirs::home_dir().context("Could not determine home directory")?;
    let path = home.join(".local").join("state").join(APP_DIR);
    log::debug!("Using default state dir: {}", path.display());
    Ok(path)
}

/// Default root of the backup store
pub fn default_backup_dir() -> Result<PathBuf> {
    Ok(state_dir()?.join("backups"))
}

/// Expand ~ and environment variables in a path string.
///
/// ```
/// use winconf::paths;
///
/// let backups = paths::expand("~/winconf/backups");
/// let state = paths::expand("$LOCALAPPDATA/winconf");
/// ```
pub fn expand(path: &str) -> PathBuf {
    let expanded = shellexpand::full(path).unwrap_or(std::borrow::Cow::Borrowed(path));
    PathBuf::from(expanded.as_ref())
}

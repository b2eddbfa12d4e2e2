//! Centralized application directory paths for helpwatch.
//!
//! Uses the [`dirs`] crate for platform-appropriate directory resolution.
//!
//! | Purpose | Linux | macOS |
//! |---------|-------|-------|
//! | App data | `~/.local/share/helpwatch/` | `~/Library/Application Support/helpwatch/` |
//! | Config | `~/.config/helpwatch/` | `~/Library/Application Support/helpwatch/` |
//!
//! # Environment Overrides
//!
//! - `HELPWATCH_DATA_DIR`: overrides [`data_dir`]
//! - `HELPWATCH_CONFIG_DIR`: overrides [`config_dir`]

use std::path::PathBuf;

/// Application data root directory (recordings, logs).
#[must_use]
pub fn data_dir() -> PathBuf {
    if let Some(override_dir) = std::env::var_os("HELPWATCH_DATA_DIR") {
        return PathBuf::from(override_dir);
    }
    dirs::data_dir()
        .map(|d| d.join("helpwatch"))
        .unwrap_or_else(|| PathBuf::from("/tmp/helpwatch-data"))
}

/// Application config directory (`config.toml`, `settings.toml`).
#[must_use]
pub fn config_dir() -> PathBuf {
    if let Some(override_dir) = std::env::var_os("HELPWATCH_CONFIG_DIR") {
        return PathBuf::from(override_dir);
    }
    dirs::config_dir()
        .map(|d| d.join("helpwatch"))
        .unwrap_or_else(|| PathBuf::from("/tmp/helpwatch-config"))
}

/// Log file directory (`data_dir()/logs/`).
#[must_use]
pub fn logs_dir() -> PathBuf {
    data_dir().join("logs")
}

/// Emergency recordings directory (`data_dir()/recordings/`).
#[must_use]
pub fn recordings_dir() -> PathBuf {
    data_dir().join("recordings")
}

/// Main config file path (`config_dir()/config.toml`).
#[must_use]
pub fn config_file() -> PathBuf {
    config_dir().join("config.toml")
}

/// Key/value settings file path (`config_dir()/settings.toml`).
#[must_use]
pub fn settings_file() -> PathBuf {
    config_dir().join("settings.toml")
}

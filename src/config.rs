//! Configuration types for the listener and escalation runtime.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Lower bound for the restart-on-end delay. A recognizer that re-ends
/// immediately must not spin the control task.
pub const MIN_RESTART_DELAY_MS: u64 = 100;

/// Top-level runtime configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HelpConfig {
    /// Recognition loop restart and backoff settings.
    pub listener: ListenerConfig,
    /// Escalation sequence timings and message texts.
    pub escalation: EscalationConfig,
    /// Remote storage for emergency recordings.
    pub storage: StorageConfig,
}

/// Recognition loop configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Delay before restarting recognition after a benign `end`.
    pub restart_delay_ms: u64,
    /// Backoff before restarting after a transient recognizer error.
    pub error_backoff_ms: u64,
    /// Upper bound for the backoff when errors repeat.
    ///
    /// Equal to `error_backoff_ms` by default, which keeps the backoff fixed.
    pub max_error_backoff_ms: u64,
    /// Ceiling of the keep-alive token held while the listener is active.
    pub keep_alive_ceiling_secs: u64,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            restart_delay_ms: 500,
            error_backoff_ms: 2_000,
            max_error_backoff_ms: 2_000,
            keep_alive_ceiling_secs: 10 * 60,
        }
    }
}

impl ListenerConfig {
    /// Restart delay after `end`, clamped to [`MIN_RESTART_DELAY_MS`].
    #[must_use]
    pub fn restart_delay(&self) -> Duration {
        Duration::from_millis(self.restart_delay_ms.max(MIN_RESTART_DELAY_MS))
    }

    /// Backoff for the `attempt`-th consecutive error (1-based).
    ///
    /// Doubles per attempt from `error_backoff_ms`, capped at
    /// `max_error_backoff_ms`.
    #[must_use]
    pub fn error_backoff(&self, attempt: u32) -> Duration {
        let base = self.error_backoff_ms.max(MIN_RESTART_DELAY_MS);
        let cap = self.max_error_backoff_ms.max(base);
        let shift = attempt.saturating_sub(1).min(16);
        let delay = base.saturating_mul(1_u64 << shift).min(cap);
        Duration::from_millis(delay)
    }

    /// Keep-alive ceiling as a [`Duration`].
    #[must_use]
    pub fn keep_alive_ceiling(&self) -> Duration {
        Duration::from_secs(self.keep_alive_ceiling_secs)
    }
}

/// Escalation sequence configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EscalationConfig {
    /// How long the alert stays in `Notifying` before recording starts.
    ///
    /// An explicit continue skips the remainder of the window.
    pub notify_window_secs: u64,
    /// Length of the emergency audio capture.
    pub capture_window_secs: u64,
    /// Delay between stopping capture and placing the call.
    pub call_delay_ms: u64,
    /// Delay after the call attempt before the session completes.
    pub completion_delay_secs: u64,
    /// Delay before listening resumes after a user cancel.
    pub cancel_grace_ms: u64,
    /// Ceiling of the keep-alive token held for one session.
    pub session_keep_alive_secs: u64,
    /// Body of the first SMS sent to the guardian.
    pub emergency_message: String,
    /// Prefix of the location SMS; the maps link is appended.
    pub location_message_prefix: String,
    /// Prefix of the follow-up SMS carrying the recording link.
    pub audio_link_prefix: String,
    /// Where local recordings are written (None = data dir).
    pub recordings_dir: Option<PathBuf>,
}

impl Default for EscalationConfig {
    fn default() -> Self {
        Self {
            notify_window_secs: 20,
            capture_window_secs: 20,
            call_delay_ms: 1_000,
            completion_delay_secs: 5,
            cancel_grace_ms: 2_000,
            session_keep_alive_secs: 2 * 60,
            emergency_message:
                "EMERGENCY: I need help! This is an urgent alert from my safety app.".to_owned(),
            location_message_prefix: "My current location: ".to_owned(),
            audio_link_prefix: "URGENT: Emergency audio recording: ".to_owned(),
            recordings_dir: None,
        }
    }
}

impl EscalationConfig {
    #[must_use]
    pub fn notify_window(&self) -> Duration {
        Duration::from_secs(self.notify_window_secs)
    }

    #[must_use]
    pub fn capture_window(&self) -> Duration {
        Duration::from_secs(self.capture_window_secs)
    }

    #[must_use]
    pub fn call_delay(&self) -> Duration {
        Duration::from_millis(self.call_delay_ms)
    }

    #[must_use]
    pub fn completion_delay(&self) -> Duration {
        Duration::from_secs(self.completion_delay_secs)
    }

    #[must_use]
    pub fn cancel_grace(&self) -> Duration {
        Duration::from_millis(self.cancel_grace_ms)
    }

    #[must_use]
    pub fn session_keep_alive(&self) -> Duration {
        Duration::from_secs(self.session_keep_alive_secs)
    }

    /// Directory for local recordings, falling back to the data dir.
    #[must_use]
    pub fn effective_recordings_dir(&self) -> PathBuf {
        self.recordings_dir
            .clone()
            .unwrap_or_else(crate::help_dirs::recordings_dir)
    }
}

/// Remote storage configuration for [`crate::capabilities::http_storage::HttpStorage`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Base URL objects are PUT to (`{upload_url}/{object}`). Empty disables upload.
    pub upload_url: String,
    /// Base URL used to build the link sent to the guardian.
    ///
    /// Falls back to `upload_url` when empty.
    pub public_url: String,
    /// Folder-like prefix for uploaded objects.
    pub object_prefix: String,
    /// Request timeout for one upload attempt.
    pub timeout_secs: u64,
    /// Optional bearer token sent with uploads.
    pub token: Option<String>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            upload_url: String::new(),
            public_url: String::new(),
            object_prefix: "emergency_audio".to_owned(),
            timeout_secs: 60,
            token: None,
        }
    }
}

impl HelpConfig {
    /// Load configuration from a TOML file, falling back to defaults for missing fields.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &std::path::Path) -> crate::error::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| crate::error::HelpError::Config(e.to_string()))
    }

    /// Save configuration to a TOML file, creating parent directories as needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written or the config cannot be serialized.
    pub fn save_to_file(&self, path: &std::path::Path) -> crate::error::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| crate::error::HelpError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Returns the default config file path: `~/.config/helpwatch/config.toml`.
    pub fn default_config_path() -> PathBuf {
        crate::help_dirs::config_file()
    }
}

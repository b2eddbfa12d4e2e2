//! Key/value settings store for the trigger phrase and guardian contact.
//!
//! The settings UI writes through [`SettingsStore::set_string`]; the runtime
//! takes a [`TriggerConfiguration`] snapshot when a session starts.

use crate::error::{HelpError, Result};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, warn};

/// Settings key holding the guardian's phone number.
pub const GUARDIAN_NUMBER_KEY: &str = "guardianNumber";
/// Settings key holding the trigger phrase.
pub const DETECTION_WORD_KEY: &str = "detectionWord";
/// Trigger phrase used when none has been configured.
pub const DEFAULT_DETECTION_WORD: &str = "help";

/// Minimal key/value persistence contract.
pub trait SettingsStore: Send + Sync {
    /// Read a string value, `None` when unset.
    fn get_string(&self, key: &str) -> Option<String>;

    /// Write a string value.
    ///
    /// # Errors
    ///
    /// Returns an error if the value cannot be persisted.
    fn set_string(&self, key: &str, value: &str) -> Result<()>;
}

/// Snapshot of the settings an escalation session runs with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TriggerConfiguration {
    /// Normalized (trimmed, lowercase) trigger phrase. Never empty.
    pub phrase: String,
    /// Guardian phone number; empty when the user never configured one.
    pub guardian_contact: String,
}

impl TriggerConfiguration {
    /// Read the current snapshot from `store`, applying the default phrase.
    pub fn load(store: &dyn SettingsStore) -> Self {
        let phrase = store
            .get_string(DETECTION_WORD_KEY)
            .map(|p| normalize_phrase(&p))
            .filter(|p| !p.is_empty())
            .unwrap_or_else(|| DEFAULT_DETECTION_WORD.to_owned());
        let guardian_contact = store
            .get_string(GUARDIAN_NUMBER_KEY)
            .map(|g| g.trim().to_owned())
            .unwrap_or_default();
        Self {
            phrase,
            guardian_contact,
        }
    }

    /// Whether a guardian contact is configured.
    #[must_use]
    pub fn has_guardian(&self) -> bool {
        !self.guardian_contact.is_empty()
    }
}

/// Lowercase and collapse surrounding whitespace.
#[must_use]
pub fn normalize_phrase(raw: &str) -> String {
    raw.trim().to_lowercase()
}

/// Persist a new trigger phrase. Blank phrases are rejected.
///
/// # Errors
///
/// Returns [`HelpError::Config`] for a blank phrase, or the store's error.
pub fn set_detection_word(store: &dyn SettingsStore, phrase: &str) -> Result<String> {
    let normalized = normalize_phrase(phrase);
    if normalized.is_empty() {
        return Err(HelpError::Config("trigger phrase must not be empty".into()));
    }
    store.set_string(DETECTION_WORD_KEY, &normalized)?;
    Ok(normalized)
}

/// Persist a new guardian number. Blank numbers are rejected.
///
/// # Errors
///
/// Returns [`HelpError::Config`] for a blank or non-phone-shaped number, or
/// the store's error.
pub fn set_guardian_number(store: &dyn SettingsStore, number: &str) -> Result<String> {
    let number = number.trim();
    if !is_phone_shaped(number) {
        return Err(HelpError::Config(format!(
            "guardian number {number:?} is not a phone number"
        )));
    }
    store.set_string(GUARDIAN_NUMBER_KEY, number)?;
    Ok(number.to_owned())
}

/// Loose phone-number check: optional leading `+`, then digits with common
/// separators, at least three digits.
#[must_use]
pub fn is_phone_shaped(number: &str) -> bool {
    let body = number.strip_prefix('+').unwrap_or(number);
    let digits = body.chars().filter(char::is_ascii_digit).count();
    digits >= 3
        && body
            .chars()
            .all(|c| c.is_ascii_digit() || matches!(c, ' ' | '-' | '(' | ')' | '.'))
}

// ─── MemorySettingsStore ─────────────────────────────────────────────────────

/// In-memory settings store.
#[derive(Debug, Default)]
pub struct MemorySettingsStore {
    values: Mutex<BTreeMap<String, String>>,
}

impl MemorySettingsStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed with the given key/value pairs.
    pub fn with_values<'a>(values: impl IntoIterator<Item = (&'a str, &'a str)>) -> Self {
        let map = values
            .into_iter()
            .map(|(k, v)| (k.to_owned(), v.to_owned()))
            .collect();
        Self {
            values: Mutex::new(map),
        }
    }
}

impl SettingsStore for MemorySettingsStore {
    fn get_string(&self, key: &str) -> Option<String> {
        self.values.lock().ok()?.get(key).cloned()
    }

    fn set_string(&self, key: &str, value: &str) -> Result<()> {
        let mut values = self
            .values
            .lock()
            .map_err(|_| HelpError::Store("settings lock poisoned".into()))?;
        values.insert(key.to_owned(), value.to_owned());
        Ok(())
    }
}

// ─── FileSettingsStore ───────────────────────────────────────────────────────

/// Settings persisted as a flat TOML table.
///
/// Values are cached in memory; every write rewrites the file through a
/// temporary sibling and a rename.
#[derive(Debug)]
pub struct FileSettingsStore {
    path: PathBuf,
    values: Mutex<BTreeMap<String, String>>,
}

impl FileSettingsStore {
    /// Open the store at `path`. A missing file starts empty.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let values = if path.exists() {
            let content = std::fs::read_to_string(&path)?;
            toml::from_str::<BTreeMap<String, String>>(&content)
                .map_err(|e| HelpError::Store(format!("{}: {e}", path.display())))?
        } else {
            BTreeMap::new()
        };
        debug!(path = %path.display(), entries = values.len(), "opened settings store");
        Ok(Self {
            path,
            values: Mutex::new(values),
        })
    }

    /// Open the store at the default location (`config_dir()/settings.toml`).
    ///
    /// # Errors
    ///
    /// See [`FileSettingsStore::open`].
    pub fn open_default() -> Result<Self> {
        Self::open(crate::help_dirs::settings_file())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self, values: &BTreeMap<String, String>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content =
            toml::to_string_pretty(values).map_err(|e| HelpError::Store(e.to_string()))?;
        let tmp = self.path.with_extension("toml.tmp");
        std::fs::write(&tmp, content)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl SettingsStore for FileSettingsStore {
    fn get_string(&self, key: &str) -> Option<String> {
        match self.values.lock() {
            Ok(values) => values.get(key).cloned(),
            Err(_) => {
                warn!("settings lock poisoned; treating {key} as unset");
                None
            }
        }
    }

    fn set_string(&self, key: &str, value: &str) -> Result<()> {
        let mut values = self
            .values
            .lock()
            .map_err(|_| HelpError::Store("settings lock poisoned".into()))?;
        let previous = values.insert(key.to_owned(), value.to_owned());
        if let Err(e) = self.persist(&values) {
            match previous {
                Some(old) => values.insert(key.to_owned(), old),
                None => values.remove(key),
            };
            return Err(e);
        }
        Ok(())
    }
}

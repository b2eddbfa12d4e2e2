//! Config files and persisted settings on disk.

use helpwatch::config::HelpConfig;
use helpwatch::error::HelpError;
use helpwatch::settings::{
    self, DETECTION_WORD_KEY, FileSettingsStore, GUARDIAN_NUMBER_KEY, SettingsStore,
    TriggerConfiguration,
};
use std::time::Duration;

#[test]
fn saved_config_loads_back() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("config.toml");

    let mut config = HelpConfig::default();
    config.escalation.notify_window_secs = 30;
    config.escalation.emergency_message = "Come quickly".into();
    config.storage.upload_url = "https://store.example.org/bucket".into();
    config.storage.token = Some("abc".into());
    config.save_to_file(&path).unwrap();

    let loaded = HelpConfig::from_file(&path).unwrap();
    assert_eq!(loaded.escalation.notify_window(), Duration::from_secs(30));
    assert_eq!(loaded.escalation.emergency_message, "Come quickly");
    assert_eq!(loaded.storage.upload_url, "https://store.example.org/bucket");
    assert_eq!(loaded.storage.token.as_deref(), Some("abc"));
    assert_eq!(loaded.listener.restart_delay_ms, 500);
}

#[test]
fn partial_file_keeps_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(
        &path,
        "[listener]\nerror_backoff_ms = 3000\n\n[escalation]\ncapture_window_secs = 10\n",
    )
    .unwrap();

    let config = HelpConfig::from_file(&path).unwrap();
    assert_eq!(config.listener.error_backoff(1), Duration::from_secs(3));
    assert_eq!(config.listener.restart_delay(), Duration::from_millis(500));
    assert_eq!(config.escalation.capture_window(), Duration::from_secs(10));
    assert_eq!(config.escalation.notify_window(), Duration::from_secs(20));
    assert_eq!(config.storage.object_prefix, "emergency_audio");
}

#[test]
fn malformed_config_is_a_config_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(&path, "[listener\nrestart_delay_ms = ").unwrap();
    assert!(matches!(
        HelpConfig::from_file(&path),
        Err(HelpError::Config(_))
    ));
}

#[test]
fn settings_survive_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("settings.toml");

    {
        let store = FileSettingsStore::open(&path).unwrap();
        settings::set_detection_word(&store, "  Red Apple ").unwrap();
        settings::set_guardian_number(&store, "+1 (555) 123-4567").unwrap();
    }

    let store = FileSettingsStore::open(&path).unwrap();
    let snapshot = TriggerConfiguration::load(&store);
    assert_eq!(snapshot.phrase, "red apple");
    assert_eq!(snapshot.guardian_contact, "+1 (555) 123-4567");
    assert!(store.get_string(DETECTION_WORD_KEY).is_some());
}

#[test]
fn rejected_guardian_leaves_file_untouched() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("settings.toml");
    let store = FileSettingsStore::open(&path).unwrap();
    settings::set_guardian_number(&store, "+15551234567").unwrap();

    assert!(settings::set_guardian_number(&store, "call me maybe").is_err());
    assert!(settings::set_detection_word(&store, "   ").is_err());

    let reopened = FileSettingsStore::open(&path).unwrap();
    assert_eq!(
        reopened.get_string(GUARDIAN_NUMBER_KEY).as_deref(),
        Some("+15551234567")
    );
    assert_eq!(TriggerConfiguration::load(&reopened).phrase, "help");
}

#[test]
fn corrupt_settings_file_fails_to_open() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("settings.toml");
    std::fs::write(&path, "guardianNumber = [1, 2").unwrap();
    assert!(matches!(
        FileSettingsStore::open(&path),
        Err(HelpError::Store(_))
    ));
}

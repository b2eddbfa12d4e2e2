//! Escalation session record.

use super::state::EscalationState;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::PathBuf;
use uuid::Uuid;

/// Opaque identifier, unique per activation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct SessionId(Uuid);

impl SessionId {
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// One run of the emergency sequence.
#[derive(Debug, Clone, Serialize)]
pub struct EscalationSession {
    pub id: SessionId,
    pub state: EscalationState,
    pub started_at: DateTime<Utc>,
    /// Guardian contact snapshot; settings changes mid-session do not apply.
    pub guardian_contact: String,
    pub recording_path: Option<PathBuf>,
    pub cancelled: bool,
}

impl EscalationSession {
    #[must_use]
    pub fn new(guardian_contact: impl Into<String>) -> Self {
        Self {
            id: SessionId::new(),
            state: EscalationState::Notifying,
            started_at: Utc::now(),
            guardian_contact: guardian_contact.into(),
            recording_path: None,
            cancelled: false,
        }
    }
}

/// File name of a local recording started at `at`.
#[must_use]
pub fn artifact_file_name(at: DateTime<Utc>) -> String {
    format!("emergency_audio_{}.wav", at.timestamp_millis())
}

//! Newline-delimited JSON contract between the runtime and a native shell.
//!
//! The shell sends [`CommandEnvelope`]s and gets one [`ResponseEnvelope`]
//! per command. Everything else the runtime has to say, including requests
//! for the shell to perform a side effect, arrives as an [`EventEnvelope`].

use serde::{Deserialize, Serialize};

/// Version stamped on every envelope.
pub const CONTRACT_VERSION: u32 = 1;

/// Commands a shell can send.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CommandName {
    #[serde(rename = "host.ping")]
    HostPing,
    #[serde(rename = "runtime.status")]
    RuntimeStatus,
    #[serde(rename = "runtime.stop")]
    RuntimeStop,
    #[serde(rename = "listener.activate")]
    ListenerActivate,
    #[serde(rename = "listener.deactivate")]
    ListenerDeactivate,
    #[serde(rename = "config.get")]
    ConfigGet,
    #[serde(rename = "config.set_phrase")]
    ConfigSetPhrase,
    #[serde(rename = "config.set_guardian")]
    ConfigSetGuardian,
    #[serde(rename = "escalation.trigger")]
    EscalationTrigger,
    #[serde(rename = "escalation.continue")]
    EscalationContinue,
    #[serde(rename = "escalation.cancel")]
    EscalationCancel,
    #[serde(rename = "recognizer.transcript")]
    RecognizerTranscript,
    #[serde(rename = "recognizer.error")]
    RecognizerError,
    #[serde(rename = "recorder.samples")]
    RecorderSamples,
    #[serde(rename = "location.update")]
    LocationUpdate,
}

/// Wire names, in declaration order.
const COMMAND_NAMES: [(CommandName, &str); 15] = [
    (CommandName::HostPing, "host.ping"),
    (CommandName::RuntimeStatus, "runtime.status"),
    (CommandName::RuntimeStop, "runtime.stop"),
    (CommandName::ListenerActivate, "listener.activate"),
    (CommandName::ListenerDeactivate, "listener.deactivate"),
    (CommandName::ConfigGet, "config.get"),
    (CommandName::ConfigSetPhrase, "config.set_phrase"),
    (CommandName::ConfigSetGuardian, "config.set_guardian"),
    (CommandName::EscalationTrigger, "escalation.trigger"),
    (CommandName::EscalationContinue, "escalation.continue"),
    (CommandName::EscalationCancel, "escalation.cancel"),
    (CommandName::RecognizerTranscript, "recognizer.transcript"),
    (CommandName::RecognizerError, "recognizer.error"),
    (CommandName::RecorderSamples, "recorder.samples"),
    (CommandName::LocationUpdate, "location.update"),
];

impl CommandName {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        COMMAND_NAMES
            .iter()
            .find(|(name, _)| *name == self)
            .map_or("unknown", |(_, wire)| wire)
    }

    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        COMMAND_NAMES
            .iter()
            .find(|(_, wire)| *wire == raw)
            .map(|(name, _)| *name)
    }

    /// Every command, in wire-table order.
    #[must_use]
    pub fn all() -> impl Iterator<Item = Self> {
        COMMAND_NAMES.iter().map(|(name, _)| *name)
    }
}

/// Reply to one [`CommandEnvelope`], matched by `request_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseEnvelope {
    pub v: u32,
    pub request_id: String,
    pub ok: bool,
    pub payload: serde_json::Value,
    pub error: Option<String>,
}

impl ResponseEnvelope {
    #[must_use]
    pub fn ok(request_id: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            v: CONTRACT_VERSION,
            request_id: request_id.into(),
            ok: true,
            payload,
            error: None,
        }
    }

    /// Failed command. The payload is always `null`.
    #[must_use]
    pub fn error(request_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            ok: false,
            error: Some(message.into()),
            ..Self::ok(request_id, serde_json::Value::Null)
        }
    }
}

/// One command line read from the shell.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandEnvelope {
    pub v: u32,
    pub request_id: String,
    pub command: CommandName,
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl CommandEnvelope {
    #[must_use]
    pub fn new(
        request_id: impl Into<String>,
        command: CommandName,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            v: CONTRACT_VERSION,
            request_id: request_id.into(),
            command,
            payload,
        }
    }

    /// Check version, request id and payload shape before routing.
    ///
    /// # Errors
    ///
    /// Returns the first [`ContractError`] found.
    pub fn validate(&self) -> Result<(), ContractError> {
        if self.v != CONTRACT_VERSION {
            return Err(ContractError::UnsupportedVersion {
                got: self.v,
                expected: CONTRACT_VERSION,
            });
        }
        if self.request_id.trim().is_empty() {
            return Err(ContractError::MissingRequestId);
        }
        if !(self.payload.is_null() || self.payload.is_object()) {
            return Err(ContractError::PayloadNotObject {
                command: self.command.as_str(),
            });
        }
        Ok(())
    }
}

/// Unsolicited message to the shell: a runtime event or a capability request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub v: u32,
    pub event_id: String,
    pub event: String,
    pub payload: serde_json::Value,
}

impl EventEnvelope {
    #[must_use]
    pub fn new(event: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            v: CONTRACT_VERSION,
            event_id: uuid::Uuid::new_v4().to_string(),
            event: event.into(),
            payload,
        }
    }
}

/// Envelope rejected before routing.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ContractError {
    #[error("unsupported contract version {got}; expected {expected}")]
    UnsupportedVersion { got: u32, expected: u32 },
    #[error("request_id cannot be empty")]
    MissingRequestId,
    #[error("{command} payload must be an object")]
    PayloadNotObject { command: &'static str },
}

//! Runtime events emitted by the control task for UI and observability.
//!
//! Events are lightweight and broadcast; a slow or absent observer never
//! blocks the control task.

use crate::capabilities::RecognitionErrorCode;
use crate::escalation::actions::{ActionOutcome, EscalationAction};
use crate::escalation::{EscalationState, FailureReason, SessionId};
use crate::listener::ListenerState;
use serde::Serialize;
use tokio::sync::broadcast;

/// Capacity of the runtime event broadcast channel.
pub const EVENT_CAPACITY: usize = 128;

/// Events that describe what the runtime is doing "right now".
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum RuntimeEvent {
    /// Listener moved to a new state.
    ListenerStateChanged { state: ListenerState },
    /// A transcription candidate contained the trigger phrase.
    PhraseMatched { candidate: String },
    /// Recognition needs a permission grant; the listener stopped retrying.
    ListenerPermissionDenied { code: RecognitionErrorCode },
    /// Recognition failed transiently; a restart is scheduled.
    ListenerBackoff { attempt: u32, delay_ms: u64 },
    SessionStarted {
        session: SessionId,
        guardian_contact: String,
    },
    SessionStateChanged {
        session: SessionId,
        state: EscalationState,
    },
    SessionEnded {
        session: SessionId,
        state: EscalationState,
    },
    /// A trigger could not create a session.
    EscalationRejected { reason: FailureReason },
    ActionFinished {
        session: SessionId,
        action: EscalationAction,
        outcome: ActionOutcome,
    },
    UploadFinished {
        session: SessionId,
        url: Option<String>,
        error: Option<String>,
    },
}

impl RuntimeEvent {
    /// Dotted event name used on the host wire.
    #[must_use]
    pub fn wire_name(&self) -> &'static str {
        match self {
            Self::ListenerStateChanged { .. } => "listener.state_changed",
            Self::PhraseMatched { .. } => "listener.phrase_matched",
            Self::ListenerPermissionDenied { .. } => "listener.permission_denied",
            Self::ListenerBackoff { .. } => "listener.backoff",
            Self::SessionStarted { .. } => "escalation.started",
            Self::SessionStateChanged { .. } => "escalation.state_changed",
            Self::SessionEnded { .. } => "escalation.ended",
            Self::EscalationRejected { .. } => "escalation.rejected",
            Self::ActionFinished { .. } => "escalation.action_finished",
            Self::UploadFinished { .. } => "escalation.upload_finished",
        }
    }
}

/// Broadcast sender shared by the listener, the orchestrator and the service.
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: broadcast::Sender<RuntimeEvent>,
}

impl EventSink {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Publish `event`. Having no subscribers is not an error.
    pub fn emit(&self, event: RuntimeEvent) {
        let _ = self.tx.send(event);
    }

    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<RuntimeEvent> {
        self.tx.subscribe()
    }
}

impl Default for EventSink {
    fn default() -> Self {
        Self::new(EVENT_CAPACITY)
    }
}

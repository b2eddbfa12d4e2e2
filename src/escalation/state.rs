//! Escalation state machine transition table.

use serde::Serialize;

/// Phase of an escalation session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "reason", rename_all = "snake_case")]
pub enum EscalationState {
    /// Alert shown, emergency SMS going out, waiting for the notify window.
    Notifying,
    /// Capturing emergency audio.
    Recording,
    /// Artifact handed to upload; call pending or placed.
    FinalizingAndCalling,
    Completed,
    Cancelled,
    Failed(FailureReason),
}

/// Why a session (or an attempt to create one) failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    /// No guardian contact configured at trigger time.
    GuardianMissing,
    /// The runtime shut down with the session still live.
    Shutdown,
}

impl std::fmt::Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::GuardianMissing => f.write_str("guardian contact not set"),
            Self::Shutdown => f.write_str("runtime shut down"),
        }
    }
}

/// Inputs that drive [`EscalationState::next`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EscalationInput {
    NotifyWindowElapsed,
    ContinueRequested,
    CaptureWindowElapsed,
    /// The recorder could not be started; recording is skipped.
    RecorderUnavailable,
    CompletionElapsed,
    UserCancel,
    Abort(FailureReason),
}

/// Scheduled timer kinds, one per state that waits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerStep {
    NotifyWindow,
    CaptureWindow,
    PlaceCall,
    Completion,
}

impl EscalationState {
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled | Self::Failed(_))
    }

    /// Transition for `input`, or `None` when the input does not apply in
    /// this state (a stale timer, a second cancel, a late continue).
    #[must_use]
    pub fn next(self, input: EscalationInput) -> Option<Self> {
        use EscalationInput as I;
        if self.is_terminal() {
            return None;
        }
        match (self, input) {
            (_, I::UserCancel) => Some(Self::Cancelled),
            (_, I::Abort(reason)) => Some(Self::Failed(reason)),
            (Self::Notifying, I::NotifyWindowElapsed | I::ContinueRequested) => {
                Some(Self::Recording)
            }
            (Self::Recording, I::CaptureWindowElapsed | I::RecorderUnavailable) => {
                Some(Self::FinalizingAndCalling)
            }
            (Self::FinalizingAndCalling, I::CompletionElapsed) => Some(Self::Completed),
            _ => None,
        }
    }
}

//! Trigger-phrase listener loop.
//!
//! Owns the recognition capability and keeps it running: benign `end`
//! events restart recognition after a short delay, transient errors after a
//! backoff, and permission errors park the listener until it is activated
//! again. While an escalation session is live the listener is suspended.
//!
//! Restarts are delayed control events tagged with a generation counter;
//! any state change that makes a pending restart obsolete bumps the
//! generation and cancels the pending timer.

use crate::capabilities::{RecognitionErrorCode, RecognitionEvent, Recognizer};
use crate::config::ListenerConfig;
use crate::control::{self, ControlEvent, ControlSender};
use crate::error::CapabilityError;
use crate::runtime::{EventSink, RuntimeEvent};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Listener loop state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "phase", rename_all = "snake_case")]
pub enum ListenerState {
    Idle,
    Listening,
    /// A final result arrived; waiting for the run to end.
    Processing,
    /// Waiting to retry after an error. `until` is `None` for permission
    /// errors, which are not retried.
    ErrorBackoff {
        attempt: u32,
        #[serde(skip)]
        until: Option<Instant>,
    },
}

/// What the control task must act on after a listener step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListenerSignal {
    PhraseMatched(String),
    PermissionDenied(RecognitionErrorCode),
}

/// Return the first candidate containing `phrase` (case-insensitive).
///
/// `phrase` must already be normalized.
#[must_use]
pub fn find_phrase<'a>(candidates: &'a [String], phrase: &str) -> Option<&'a str> {
    if phrase.is_empty() {
        return None;
    }
    candidates
        .iter()
        .find(|candidate| candidate.to_lowercase().contains(phrase))
        .map(String::as_str)
}

pub struct Listener {
    recognizer: Arc<dyn Recognizer>,
    config: ListenerConfig,
    control_tx: ControlSender,
    events: EventSink,
    state: ListenerState,
    active: bool,
    suspended: bool,
    permission_blocked: bool,
    generation: u64,
    restart_token: CancellationToken,
    error_attempts: u32,
}

impl Listener {
    pub(crate) fn new(
        recognizer: Arc<dyn Recognizer>,
        config: ListenerConfig,
        control_tx: ControlSender,
        events: EventSink,
    ) -> Self {
        Self {
            recognizer,
            config,
            control_tx,
            events,
            state: ListenerState::Idle,
            active: false,
            suspended: false,
            permission_blocked: false,
            generation: 0,
            restart_token: CancellationToken::new(),
            error_attempts: 0,
        }
    }

    #[must_use]
    pub fn state(&self) -> ListenerState {
        self.state
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.active
    }

    #[must_use]
    pub fn is_suspended(&self) -> bool {
        self.suspended
    }

    /// `Idle → Listening`. Also clears a parked permission error.
    pub fn activate(&mut self) -> Option<ListenerSignal> {
        if self.active && !self.permission_blocked {
            debug!("listener already active");
            return None;
        }
        info!("listener activated");
        self.active = true;
        self.permission_blocked = false;
        self.error_attempts = 0;
        if self.suspended {
            return None;
        }
        self.invalidate_restarts();
        self.start_now()
    }

    /// Stop listening and stay idle until the next `activate`.
    pub fn deactivate(&mut self) {
        if !self.active {
            return;
        }
        info!("listener deactivated");
        self.active = false;
        self.permission_blocked = false;
        self.error_attempts = 0;
        self.halt();
    }

    /// Pause for a live session.
    pub fn suspend(&mut self) {
        if self.suspended {
            return;
        }
        debug!("listener suspended for escalation");
        self.suspended = true;
        self.halt();
    }

    /// Lift a suspension. Listening restarts after `delay` (at least the
    /// restart delay) when the listener is still active.
    pub fn resume(&mut self, delay: Duration) {
        if !self.suspended {
            return;
        }
        self.suspended = false;
        if self.active && !self.permission_blocked {
            let delay = delay.max(self.config.restart_delay());
            debug!(delay_ms = delay.as_millis() as u64, "listener resuming");
            self.schedule_restart(delay);
        }
    }

    /// A delayed restart is due. Stale generations are ignored.
    pub fn on_restart(&mut self, generation: u64) -> Option<ListenerSignal> {
        if generation != self.generation {
            debug!(generation, current = self.generation, "ignoring stale restart");
            return None;
        }
        if !self.active || self.suspended || self.permission_blocked {
            return None;
        }
        self.start_now()
    }

    /// Feed one recognizer event. `phrase` is the current normalized
    /// trigger phrase.
    pub fn on_event(&mut self, event: RecognitionEvent, phrase: &str) -> Option<ListenerSignal> {
        if !self.active || self.suspended {
            debug!(?event, "dropping recognition event while not listening");
            return None;
        }
        match event {
            RecognitionEvent::Ready | RecognitionEvent::Begin => {
                self.error_attempts = 0;
                None
            }
            RecognitionEvent::PartialText { candidates } => {
                self.error_attempts = 0;
                self.match_candidates(&candidates, phrase)
            }
            RecognitionEvent::FinalText { candidates } => {
                self.error_attempts = 0;
                self.set_state(ListenerState::Processing);
                self.match_candidates(&candidates, phrase)
            }
            RecognitionEvent::End => {
                if matches!(self.state, ListenerState::ErrorBackoff { .. }) {
                    // The pending backoff restart stays in charge.
                    return None;
                }
                self.set_state(ListenerState::Idle);
                self.schedule_restart(self.config.restart_delay());
                None
            }
            RecognitionEvent::Error { code } => self.on_error(code),
        }
    }

    fn match_candidates(&mut self, candidates: &[String], phrase: &str) -> Option<ListenerSignal> {
        let candidate = find_phrase(candidates, phrase)?;
        info!(%candidate, phrase, "trigger phrase detected");
        Some(ListenerSignal::PhraseMatched(candidate.to_owned()))
    }

    fn on_error(&mut self, code: RecognitionErrorCode) -> Option<ListenerSignal> {
        if code.is_permission_denied() {
            return Some(self.park_on_permission(code));
        }
        self.error_attempts = self.error_attempts.saturating_add(1);
        let attempt = self.error_attempts;
        let delay = self.config.error_backoff(attempt);
        warn!(
            attempt,
            delay_ms = delay.as_millis() as u64,
            error = %code.description(),
            "recognition error; backing off"
        );
        self.set_state(ListenerState::ErrorBackoff {
            attempt,
            until: Some(Instant::now() + delay),
        });
        self.events.emit(RuntimeEvent::ListenerBackoff {
            attempt,
            delay_ms: delay.as_millis() as u64,
        });
        self.schedule_restart(delay);
        None
    }

    fn park_on_permission(&mut self, code: RecognitionErrorCode) -> ListenerSignal {
        warn!(error = %code.description(), "recognition permission denied; listener parked");
        self.permission_blocked = true;
        self.invalidate_restarts();
        self.set_state(ListenerState::ErrorBackoff {
            attempt: self.error_attempts.saturating_add(1),
            until: None,
        });
        ListenerSignal::PermissionDenied(code)
    }

    fn start_now(&mut self) -> Option<ListenerSignal> {
        match self.recognizer.start_listening() {
            Ok(()) => {
                self.set_state(ListenerState::Listening);
                None
            }
            Err(CapabilityError::PermissionDenied(detail)) => {
                warn!(%detail, "recognizer start refused");
                Some(self.park_on_permission(RecognitionErrorCode::InsufficientPermissions))
            }
            Err(e) => {
                warn!(error = %e, "recognizer failed to start");
                self.on_error(RecognitionErrorCode::Client)
            }
        }
    }

    /// Stop capture and cancel any pending restart.
    fn halt(&mut self) {
        self.invalidate_restarts();
        if matches!(
            self.state,
            ListenerState::Listening | ListenerState::Processing
        ) {
            self.recognizer.stop_listening();
        }
        self.set_state(ListenerState::Idle);
    }

    fn invalidate_restarts(&mut self) {
        self.generation = self.generation.wrapping_add(1);
        self.restart_token.cancel();
        self.restart_token = CancellationToken::new();
    }

    fn schedule_restart(&mut self, delay: Duration) {
        self.invalidate_restarts();
        control::schedule(
            &self.control_tx,
            &self.restart_token,
            delay,
            ControlEvent::ListenerRestart {
                generation: self.generation,
            },
        );
    }

    fn set_state(&mut self, state: ListenerState) {
        if self.state != state {
            debug!(from = ?self.state, to = ?state, "listener state");
            self.state = state;
            self.events
                .emit(RuntimeEvent::ListenerStateChanged { state });
        }
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        self.restart_token.cancel();
    }
}

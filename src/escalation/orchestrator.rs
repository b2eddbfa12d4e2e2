//! Session-scoped escalation orchestrator.
//!
//! Owns the single optional live session. Every entry point runs on the
//! control task, so the "no session is live" check and the session creation
//! happen without interleaving. Timers are scoped to the session's cancel
//! token; ending a session cancels all of them, and a late timer whose
//! session id no longer matches is dropped.

use super::actions::{self, ActionLane, ActionOutcome, EscalationAction};
use super::session::{EscalationSession, SessionId, artifact_file_name};
use super::state::{EscalationInput, EscalationState, FailureReason, TimerStep};
use crate::capabilities::Capabilities;
use crate::config::EscalationConfig;
use crate::control::{self, ControlEvent, ControlSender};
use crate::guards::{KeepAliveGuard, RecorderGuard, SESSION_KEEP_ALIVE_TAG};
use crate::runtime::{EventSink, RuntimeEvent};
use crate::settings::TriggerConfiguration;
use crate::sms;
use crate::upload::{self, UploadJob, UploadReport};
use chrono::Utc;
use serde::Serialize;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub const STATUS_GUARDIAN_MISSING: &str = "Guardian number not set!";
pub const STATUS_RECORDING: &str = "Recording emergency audio...";
pub const STATUS_RECORDER_UNAVAILABLE: &str = "Recording unavailable, skipping to call";
pub const STATUS_UPLOADING: &str = "Uploading audio...";
pub const STATUS_COMPLETED: &str = "Emergency sequence completed";
pub const STATUS_CANCELLED: &str = "Emergency cancelled";
pub const STATUS_ABORTED: &str = "Emergency sequence aborted";

/// Result of a trigger request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum TriggerOutcome {
    Started { session: SessionId },
    /// A session is already live; the trigger was a no-op.
    AlreadyActive { session: SessionId },
    Rejected { reason: FailureReason },
}

/// Emitted when a session reaches a terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionEnd {
    pub session: SessionId,
    pub state: EscalationState,
    /// Minimum delay before the listener resumes.
    pub resume_after: Duration,
}

struct ActiveSession {
    session: EscalationSession,
    /// Cancels timers and the alert watcher when the session ends.
    scope: CancellationToken,
    /// Cancelled on user cancel or abort; stops the lane and link delivery.
    cancel: CancellationToken,
    lane: ActionLane,
    recorder: Option<RecorderGuard>,
    _keep_alive: Option<KeepAliveGuard>,
}

pub struct Orchestrator {
    caps: Capabilities,
    config: EscalationConfig,
    control_tx: ControlSender,
    events: EventSink,
    active: Option<ActiveSession>,
}

impl Orchestrator {
    pub(crate) fn new(
        caps: Capabilities,
        config: EscalationConfig,
        control_tx: ControlSender,
        events: EventSink,
    ) -> Self {
        Self {
            caps,
            config,
            control_tx,
            events,
            active: None,
        }
    }

    /// Create the recordings directory ahead of the first session.
    pub(crate) async fn prepare(&self) {
        let dir = self.config.effective_recordings_dir();
        match tokio::fs::create_dir_all(&dir).await {
            Ok(()) => debug!(dir = %dir.display(), "recordings directory ready"),
            Err(e) => warn!(
                dir = %dir.display(),
                error = %e,
                "cannot create recordings directory; captures will fail"
            ),
        }
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.active.is_some()
    }

    /// Snapshot of the live session, if any.
    #[must_use]
    pub fn session(&self) -> Option<&EscalationSession> {
        self.active.as_ref().map(|a| &a.session)
    }

    /// Start a session unless one is live or no guardian is configured.
    pub fn trigger(&mut self, trigger: &TriggerConfiguration) -> TriggerOutcome {
        if let Some(active) = &self.active {
            debug!(session = %active.session.id, "trigger ignored; session already live");
            return TriggerOutcome::AlreadyActive {
                session: active.session.id,
            };
        }
        if !trigger.has_guardian() {
            warn!("trigger rejected: guardian contact not set");
            self.caps
                .presenter
                .show_background_status(STATUS_GUARDIAN_MISSING);
            let reason = FailureReason::GuardianMissing;
            self.events.emit(RuntimeEvent::EscalationRejected { reason });
            return TriggerOutcome::Rejected { reason };
        }

        let session = EscalationSession::new(trigger.guardian_contact.clone());
        let id = session.id;
        let scope = CancellationToken::new();
        let cancel = CancellationToken::new();
        let keep_alive = match KeepAliveGuard::acquire(
            self.caps.keep_alive.clone(),
            SESSION_KEEP_ALIVE_TAG,
            self.config.session_keep_alive(),
        ) {
            Ok(guard) => Some(guard),
            Err(e) => {
                warn!(session = %id, error = %e, "session keep-alive unavailable");
                None
            }
        };

        info!(session = %id, phrase = %trigger.phrase, "escalation started");
        self.events.emit(RuntimeEvent::SessionStarted {
            session: id,
            guardian_contact: session.guardian_contact.clone(),
        });
        self.present_alert(id, &trigger.phrase, &scope);

        let lane = actions::spawn_lane(
            id,
            session.guardian_contact.clone(),
            self.caps.clone(),
            self.config.clone(),
            cancel.clone(),
            self.control_tx.clone(),
        );
        // Location rides behind the emergency SMS on the same lane.
        let _ = lane.send(EscalationAction::EmergencySms);
        let _ = lane.send(EscalationAction::ShareLocation);

        control::schedule(
            &self.control_tx,
            &scope,
            self.config.notify_window(),
            ControlEvent::Timer {
                session: id,
                step: TimerStep::NotifyWindow,
            },
        );

        self.active = Some(ActiveSession {
            session,
            scope,
            cancel,
            lane,
            recorder: None,
            _keep_alive: keep_alive,
        });
        TriggerOutcome::Started { session: id }
    }

    /// Skip the rest of the notify window.
    pub fn continue_now(&mut self) -> Option<SessionEnd> {
        self.advance(EscalationInput::ContinueRequested)
    }

    /// User cancel from any entry point.
    pub fn cancel(&mut self) -> Option<SessionEnd> {
        self.advance(EscalationInput::UserCancel)
    }

    /// Abort the live session, if any.
    pub fn abort(&mut self, reason: FailureReason) -> Option<SessionEnd> {
        self.advance(EscalationInput::Abort(reason))
    }

    pub(crate) fn on_alert_cancelled(&mut self, session: SessionId) -> Option<SessionEnd> {
        if !self.is_current(session) {
            return None;
        }
        info!(session = %session, "cancel pressed on alert");
        self.cancel()
    }

    pub(crate) fn on_timer(&mut self, session: SessionId, step: TimerStep) -> Option<SessionEnd> {
        if !self.is_current(session) {
            debug!(session = %session, ?step, "dropping timer for ended session");
            return None;
        }
        match step {
            TimerStep::NotifyWindow => self.advance(EscalationInput::NotifyWindowElapsed),
            TimerStep::CaptureWindow => self.advance(EscalationInput::CaptureWindowElapsed),
            TimerStep::Completion => self.advance(EscalationInput::CompletionElapsed),
            TimerStep::PlaceCall => {
                let active = self.active.as_ref()?;
                if active.session.state == EscalationState::FinalizingAndCalling
                    && !active.cancel.is_cancelled()
                {
                    let _ = active.lane.send(EscalationAction::PlaceCall);
                }
                None
            }
        }
    }

    pub(crate) fn on_action_finished(
        &mut self,
        session: SessionId,
        action: EscalationAction,
        outcome: ActionOutcome,
    ) {
        self.events.emit(RuntimeEvent::ActionFinished {
            session,
            action,
            outcome,
        });
        if action != EscalationAction::PlaceCall || !self.is_current(session) {
            return;
        }
        let Some(active) = &self.active else {
            return;
        };
        if active.session.state == EscalationState::FinalizingAndCalling {
            control::schedule(
                &self.control_tx,
                &active.scope,
                self.config.completion_delay(),
                ControlEvent::Timer {
                    session,
                    step: TimerStep::Completion,
                },
            );
        }
    }

    pub(crate) fn on_upload_finished(&mut self, report: UploadReport) {
        let UploadReport { job, result } = report;
        match result {
            Ok(url) => {
                info!(session = %job.session, %url, "emergency audio uploaded");
                self.events.emit(RuntimeEvent::UploadFinished {
                    session: job.session,
                    url: Some(url.clone()),
                    error: None,
                });
                if job.cancel.is_cancelled() {
                    info!(session = %job.session, "session cancelled; audio link not sent");
                    return;
                }
                upload::spawn_link_delivery(
                    self.caps.messenger.clone(),
                    self.config.audio_link_prefix.clone(),
                    job,
                    url,
                );
            }
            Err(e) => {
                warn!(
                    session = %job.session,
                    path = %job.path.display(),
                    error = %e,
                    "upload failed; keeping local artifact"
                );
                self.caps
                    .presenter
                    .show_background_status(&format!("Upload failed: {e}"));
                self.events.emit(RuntimeEvent::UploadFinished {
                    session: job.session,
                    url: None,
                    error: Some(e.to_string()),
                });
            }
        }
    }

    fn is_current(&self, session: SessionId) -> bool {
        self.active
            .as_ref()
            .is_some_and(|active| active.session.id == session)
    }

    fn present_alert(&self, session: SessionId, phrase: &str, scope: &CancellationToken) {
        let signal = match self
            .caps
            .presenter
            .show_full_screen_alert(&sms::alert_message(phrase))
        {
            Ok(signal) => signal,
            Err(e) => {
                warn!(session = %session, error = %e, "alert unavailable; continuing without it");
                return;
            }
        };
        let tx = self.control_tx.clone();
        let scope = scope.clone();
        tokio::spawn(async move {
            tokio::select! {
                () = scope.cancelled() => {}
                pressed = signal => {
                    if pressed.is_ok() {
                        let _ = tx.send(ControlEvent::AlertCancelled { session });
                    }
                }
            }
        });
    }

    fn advance(&mut self, input: EscalationInput) -> Option<SessionEnd> {
        let active = self.active.as_mut()?;
        let id = active.session.id;
        let from = active.session.state;
        let Some(to) = from.next(input) else {
            debug!(session = %id, ?from, ?input, "input does not apply");
            return None;
        };
        info!(session = %id, ?from, ?to, ?input, "escalation transition");
        active.session.state = to;
        if to == EscalationState::Cancelled {
            active.session.cancelled = true;
        }
        self.events.emit(RuntimeEvent::SessionStateChanged {
            session: id,
            state: to,
        });
        match to {
            EscalationState::Recording => self.enter_recording(),
            EscalationState::FinalizingAndCalling => {
                self.enter_finalizing();
                None
            }
            EscalationState::Notifying => None,
            EscalationState::Completed
            | EscalationState::Cancelled
            | EscalationState::Failed(_) => self.finish(),
        }
    }

    fn enter_recording(&mut self) -> Option<SessionEnd> {
        let path = self
            .config
            .effective_recordings_dir()
            .join(artifact_file_name(Utc::now()));
        let started = RecorderGuard::start(self.caps.recorder.clone(), path.clone());

        let active = self.active.as_mut()?;
        match started {
            Ok(guard) => {
                active.session.recording_path = Some(path);
                active.recorder = Some(guard);
                self.caps.presenter.show_background_status(STATUS_RECORDING);
                control::schedule(
                    &self.control_tx,
                    &active.scope,
                    self.config.capture_window(),
                    ControlEvent::Timer {
                        session: active.session.id,
                        step: TimerStep::CaptureWindow,
                    },
                );
                None
            }
            Err(e) => {
                warn!(session = %active.session.id, error = %e, "recorder unavailable");
                self.caps
                    .presenter
                    .show_background_status(STATUS_RECORDER_UNAVAILABLE);
                self.advance(EscalationInput::RecorderUnavailable)
            }
        }
    }

    fn enter_finalizing(&mut self) {
        let Some(active) = self.active.as_mut() else {
            return;
        };
        let id = active.session.id;
        if let (Some(capture), Some(path)) =
            (active.recorder.take(), active.session.recording_path.clone())
        {
            self.caps.presenter.show_background_status(STATUS_UPLOADING);
            upload::spawn_upload(
                self.caps.storage.clone(),
                capture,
                UploadJob {
                    session: id,
                    path,
                    guardian: active.session.guardian_contact.clone(),
                    cancel: active.cancel.clone(),
                },
                self.control_tx.clone(),
            );
        }
        // The call waits for neither the capture finalize nor the upload.
        control::schedule(
            &self.control_tx,
            &active.scope,
            self.config.call_delay(),
            ControlEvent::Timer {
                session: id,
                step: TimerStep::PlaceCall,
            },
        );
    }

    fn finish(&mut self) -> Option<SessionEnd> {
        let mut active = self.active.take()?;
        let id = active.session.id;
        let state = active.session.state;
        active.scope.cancel();
        if state != EscalationState::Completed {
            active.cancel.cancel();
        }
        // Stops a capture still running; a partial artifact stays on disk.
        if let Some(capture) = active.recorder.take() {
            capture.release();
        }

        let (status, resume_after) = match state {
            EscalationState::Cancelled => (STATUS_CANCELLED, self.config.cancel_grace()),
            EscalationState::Failed(_) => (STATUS_ABORTED, Duration::ZERO),
            _ => (STATUS_COMPLETED, Duration::ZERO),
        };
        self.caps.presenter.show_background_status(status);
        info!(session = %id, ?state, "escalation ended");
        self.events.emit(RuntimeEvent::SessionEnded { session: id, state });
        Some(SessionEnd {
            session: id,
            state,
            resume_after,
        })
    }
}

impl Drop for Orchestrator {
    fn drop(&mut self) {
        if let Some(active) = &self.active {
            active.scope.cancel();
            active.cancel.cancel();
        }
    }
}

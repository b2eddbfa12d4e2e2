//! Per-session sequential action lane.
//!
//! Side-effecting steps of one session (emergency SMS, location SMS, call)
//! run in order on a dedicated task so the emergency SMS is always issued
//! before the call. The lane checks the session's cancel token before every
//! action; an action already in flight is not rescinded.

use super::SessionId;
use crate::capabilities::Capabilities;
use crate::config::EscalationConfig;
use crate::control::{ControlEvent, ControlSender};
use crate::error::CapabilityError;
use crate::sms;
use serde::Serialize;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Upper bound for a single capability call made by the lane.
pub const ACTION_TIMEOUT: Duration = Duration::from_secs(10);

/// Status line shown once the emergency SMS went out.
pub const STATUS_SMS_SENT: &str = "Emergency SMS sent";
/// Status line shown when the dialer replaces a direct call.
pub const STATUS_DIALER_FALLBACK: &str = "Call permission missing, opening dialer";
/// Status line shown right before the call attempt.
pub const STATUS_CALLING: &str = "Calling guardian...";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EscalationAction {
    EmergencySms,
    ShareLocation,
    PlaceCall,
}

/// Result of one lane action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ActionOutcome {
    Completed,
    /// Direct call failed; the dialer was opened instead.
    DialerFallback,
    Skipped { reason: String },
    Failed { error: String },
}

impl ActionOutcome {
    fn skipped(reason: impl Into<String>) -> Self {
        Self::Skipped {
            reason: reason.into(),
        }
    }

    fn failed(error: &CapabilityError) -> Self {
        Self::Failed {
            error: error.to_string(),
        }
    }
}

/// Sender half of a session's lane.
pub(crate) type ActionLane = mpsc::UnboundedSender<EscalationAction>;

struct LaneWorker {
    session: SessionId,
    guardian: String,
    caps: Capabilities,
    config: EscalationConfig,
    cancel: CancellationToken,
    control_tx: ControlSender,
    sms_permission_denied: bool,
}

/// Spawn the lane for `session`. The worker exits once the returned sender
/// is dropped and queued actions are drained.
pub(crate) fn spawn_lane(
    session: SessionId,
    guardian: String,
    caps: Capabilities,
    config: EscalationConfig,
    cancel: CancellationToken,
    control_tx: ControlSender,
) -> ActionLane {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut worker = LaneWorker {
        session,
        guardian,
        caps,
        config,
        cancel,
        control_tx,
        sms_permission_denied: false,
    };
    tokio::spawn(async move {
        while let Some(action) = rx.recv().await {
            let outcome = if worker.cancel.is_cancelled() {
                ActionOutcome::skipped("session cancelled")
            } else {
                worker.run(action).await
            };
            info!(session = %worker.session, ?action, ?outcome, "escalation action finished");
            let _ = worker.control_tx.send(ControlEvent::ActionFinished {
                session: worker.session,
                action,
                outcome,
            });
        }
    });
    tx
}

impl LaneWorker {
    async fn run(&mut self, action: EscalationAction) -> ActionOutcome {
        match action {
            EscalationAction::EmergencySms => self.emergency_sms().await,
            EscalationAction::ShareLocation => self.share_location().await,
            EscalationAction::PlaceCall => self.place_call().await,
        }
    }

    async fn emergency_sms(&mut self) -> ActionOutcome {
        let messenger = self.caps.messenger.clone();
        let body = self.config.emergency_message.clone();
        match with_timeout(sms::send_split(messenger.as_ref(), &self.guardian, &body)).await {
            Ok(_) => {
                self.caps.presenter.show_background_status(STATUS_SMS_SENT);
                ActionOutcome::Completed
            }
            Err(e) => {
                warn!(session = %self.session, error = %e, "emergency SMS failed");
                self.sms_permission_denied = e.is_permission_denied();
                self.caps
                    .presenter
                    .show_background_status(&format!("Failed to send SMS: {e}"));
                ActionOutcome::failed(&e)
            }
        }
    }

    async fn share_location(&mut self) -> ActionOutcome {
        if self.sms_permission_denied {
            return ActionOutcome::skipped("SMS permission denied");
        }
        let location = match with_timeout(self.caps.location.last_known_location()).await {
            Ok(Some(location)) => location,
            Ok(None) => return ActionOutcome::skipped("no location fix"),
            Err(e) => {
                warn!(session = %self.session, error = %e, "location lookup failed");
                return ActionOutcome::skipped(format!("location unavailable: {e}"));
            }
        };
        if self.cancel.is_cancelled() {
            return ActionOutcome::skipped("session cancelled");
        }
        let body = sms::location_message(&self.config.location_message_prefix, &location);
        let messenger = self.caps.messenger.clone();
        match with_timeout(sms::send_split(messenger.as_ref(), &self.guardian, &body)).await {
            Ok(_) => ActionOutcome::Completed,
            Err(e) => {
                warn!(session = %self.session, error = %e, "location SMS failed");
                ActionOutcome::failed(&e)
            }
        }
    }

    async fn place_call(&mut self) -> ActionOutcome {
        self.caps.presenter.show_background_status(STATUS_CALLING);
        let caller = self.caps.caller.clone();
        let call_err = match with_timeout(caller.place_call(&self.guardian)).await {
            Ok(()) => return ActionOutcome::Completed,
            Err(e) => e,
        };
        if call_err.is_permission_denied() {
            self.caps
                .presenter
                .show_background_status(STATUS_DIALER_FALLBACK);
        }
        warn!(session = %self.session, error = %call_err, "direct call failed; opening dialer");
        match with_timeout(caller.open_dialer(&self.guardian)).await {
            Ok(()) => ActionOutcome::DialerFallback,
            Err(e) => {
                warn!(session = %self.session, error = %e, "dialer fallback failed");
                ActionOutcome::failed(&e)
            }
        }
    }
}

async fn with_timeout<T>(
    fut: impl std::future::Future<Output = Result<T, CapabilityError>>,
) -> Result<T, CapabilityError> {
    match tokio::time::timeout(ACTION_TIMEOUT, fut).await {
        Ok(result) => result,
        Err(_) => Err(CapabilityError::Failed(format!(
            "timed out after {}s",
            ACTION_TIMEOUT.as_secs()
        ))),
    }
}

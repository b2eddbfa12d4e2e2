//! Messages delivered onto the single control task, and the cancellable
//! timer helper that produces them.

use crate::escalation::actions::{ActionOutcome, EscalationAction};
use crate::escalation::{SessionId, TimerStep};
use crate::upload::UploadReport;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Continuation re-entering the control task.
#[derive(Debug)]
pub(crate) enum ControlEvent {
    /// A delayed listener restart for `generation` is due.
    ListenerRestart { generation: u64 },
    /// A session timer fired.
    Timer { session: SessionId, step: TimerStep },
    /// The user pressed cancel on the session's alert.
    AlertCancelled { session: SessionId },
    /// A sequential session action completed.
    ActionFinished {
        session: SessionId,
        action: EscalationAction,
        outcome: ActionOutcome,
    },
    /// The upload worker finished its single attempt.
    UploadFinished(UploadReport),
}

pub(crate) type ControlSender = mpsc::UnboundedSender<ControlEvent>;

/// Deliver `event` after `delay` unless `token` is cancelled first.
pub(crate) fn schedule(
    tx: &ControlSender,
    token: &CancellationToken,
    delay: Duration,
    event: ControlEvent,
) {
    let tx = tx.clone();
    let token = token.clone();
    tokio::spawn(async move {
        tokio::select! {
            () = token.cancelled() => {}
            () = tokio::time::sleep(delay) => {
                // Receiver gone means the runtime is shutting down.
                let _ = tx.send(event);
            }
        }
    });
}

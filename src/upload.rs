//! Upload pipeline for recorded artifacts.
//!
//! The transfer runs on its own task and re-enters the control task as an
//! [`UploadReport`]. Delivery of the link (follow-up SMS and artifact
//! cleanup) is decided on the control task, where the session's cancel
//! state is known.

use crate::capabilities::{CapabilityResult, Messenger, Storage};
use crate::control::{ControlEvent, ControlSender};
use crate::error::CapabilityError;
use crate::escalation::SessionId;
use crate::guards::RecorderGuard;
use crate::sms;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Everything the upload worker needs for one artifact.
#[derive(Debug, Clone)]
pub struct UploadJob {
    pub session: SessionId,
    pub path: PathBuf,
    pub guardian: String,
    /// Cancel token of the owning session.
    pub cancel: CancellationToken,
}

/// Outcome of the single upload attempt.
#[derive(Debug)]
pub struct UploadReport {
    pub job: UploadJob,
    pub result: CapabilityResult<String>,
}

/// Upload `path` once. Missing, unreadable or sample-free WAV artifacts
/// fail without contacting storage.
///
/// # Errors
///
/// Returns [`CapabilityError::Unavailable`] for an unusable artifact, or the
/// storage error.
pub async fn upload_artifact(storage: &dyn Storage, path: &Path) -> CapabilityResult<String> {
    let owned = path.to_path_buf();
    let samples = tokio::task::spawn_blocking(move || {
        hound::WavReader::open(&owned).map(|reader| reader.len())
    })
    .await
    .map_err(|e| CapabilityError::Failed(format!("artifact check task failed: {e}")))?
    .map_err(|e| {
        CapabilityError::Unavailable(format!("artifact {} unreadable: {e}", path.display()))
    })?;
    if samples == 0 {
        return Err(CapabilityError::Unavailable(format!(
            "artifact {} holds no audio",
            path.display()
        )));
    }
    storage.upload(path).await
}

/// Finalize the capture held by `capture`, then start the transfer for
/// `job` on a worker task.
pub(crate) fn spawn_upload(
    storage: Arc<dyn Storage>,
    capture: RecorderGuard,
    job: UploadJob,
    control_tx: ControlSender,
) {
    tokio::spawn(async move {
        let result = match capture.finish().await {
            Ok(path) => {
                info!(session = %job.session, path = %path.display(), "uploading emergency audio");
                upload_artifact(storage.as_ref(), &path).await
            }
            Err(e) => {
                warn!(session = %job.session, error = %e, "recorder stop failed; upload skipped");
                Err(e)
            }
        };
        let _ = control_tx.send(ControlEvent::UploadFinished(UploadReport { job, result }));
    });
}

/// Send the recording link to the guardian and delete the local artifact.
///
/// The artifact is deleted once the upload succeeded, whatever happens to
/// the SMS; the remote copy is the one the guardian is sent.
pub(crate) fn spawn_link_delivery(
    messenger: Arc<dyn Messenger>,
    link_prefix: String,
    job: UploadJob,
    url: String,
) {
    tokio::spawn(async move {
        let body = sms::audio_link_message(&link_prefix, &url);
        match sms::send_split(messenger.as_ref(), &job.guardian, &body).await {
            Ok(parts) => info!(session = %job.session, parts, "audio link sent"),
            Err(e) => warn!(session = %job.session, error = %e, "audio link SMS failed"),
        }
        if let Err(e) = tokio::fs::remove_file(&job.path).await {
            warn!(path = %job.path.display(), error = %e, "failed to delete uploaded artifact");
        }
    });
}

//! Scoped resource guards.
//!
//! [`KeepAliveGuard`] holds the keep-process-alive token and
//! [`RecorderGuard`] owns a running capture. Both release their resource in
//! `Drop`, so every exit path of a state machine step (completion, early
//! return, cancellation, panic unwind) gives the resource back.
//!
//! Stopping a recorder may wait on its writer thread, so the async callers
//! use [`RecorderGuard::finish`] and [`RecorderGuard::release`], which run
//! the stop on the blocking pool. `Drop` is the synchronous fallback.

use crate::capabilities::{CapabilityResult, KeepAlive, Recorder};
use crate::error::CapabilityError;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Tag of the token held while the listener is active.
pub const LISTENER_KEEP_ALIVE_TAG: &str = "helpwatch::listener";
/// Tag of the token held for one escalation session.
pub const SESSION_KEEP_ALIVE_TAG: &str = "helpwatch::escalation";

/// Keep-alive token released on drop.
pub struct KeepAliveGuard {
    keep_alive: Arc<dyn KeepAlive>,
    tag: &'static str,
    ceiling: Duration,
}

impl KeepAliveGuard {
    /// Acquire `tag` with the given ceiling.
    ///
    /// # Errors
    ///
    /// Returns the capability error when the token cannot be acquired.
    pub fn acquire(
        keep_alive: Arc<dyn KeepAlive>,
        tag: &'static str,
        ceiling: Duration,
    ) -> CapabilityResult<Self> {
        keep_alive.acquire(tag, ceiling)?;
        debug!(tag, ceiling_secs = ceiling.as_secs(), "keep-alive acquired");
        Ok(Self {
            keep_alive,
            tag,
            ceiling,
        })
    }

    /// Release and re-acquire the token, restarting its ceiling.
    ///
    /// # Errors
    ///
    /// Returns the capability error from the re-acquire. The token is
    /// released in that case and drop becomes a no-op release.
    pub fn renew(&self) -> CapabilityResult<()> {
        self.keep_alive.release(self.tag);
        self.keep_alive.acquire(self.tag, self.ceiling)?;
        debug!(tag = self.tag, "keep-alive renewed");
        Ok(())
    }
}

impl Drop for KeepAliveGuard {
    fn drop(&mut self) {
        self.keep_alive.release(self.tag);
        debug!(tag = self.tag, "keep-alive released");
    }
}

impl std::fmt::Debug for KeepAliveGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeepAliveGuard")
            .field("tag", &self.tag)
            .field("ceiling", &self.ceiling)
            .finish()
    }
}

/// A running capture. Dropping the guard stops the recorder.
pub struct RecorderGuard {
    recorder: Arc<dyn Recorder>,
    path: PathBuf,
    stopped: bool,
}

impl RecorderGuard {
    /// Start capturing into `path`.
    ///
    /// A failed start still calls `stop` so a half-opened device is
    /// released before the error is returned.
    ///
    /// # Errors
    ///
    /// Returns the capability error from `start`.
    pub fn start(recorder: Arc<dyn Recorder>, path: PathBuf) -> CapabilityResult<Self> {
        if let Err(e) = recorder.start(&path) {
            if let Err(stop_err) = recorder.stop() {
                warn!(error = %stop_err, "recorder release after failed start also failed");
            }
            return Err(e);
        }
        debug!(path = %path.display(), "recorder started");
        Ok(Self {
            recorder,
            path,
            stopped: false,
        })
    }

    /// Stop capturing and hand back the finished artifact.
    ///
    /// # Errors
    ///
    /// Returns the capability error from `stop`; the recorder is not
    /// stopped a second time on drop.
    pub async fn finish(mut self) -> CapabilityResult<PathBuf> {
        self.stopped = true;
        let recorder = Arc::clone(&self.recorder);
        tokio::task::spawn_blocking(move || recorder.stop())
            .await
            .map_err(|e| CapabilityError::Failed(format!("recorder stop task failed: {e}")))??;
        Ok(std::mem::take(&mut self.path))
    }

    /// Stop capturing without waiting for the artifact to be finalized.
    /// Must be called from within a tokio runtime.
    pub fn release(mut self) {
        self.stopped = true;
        let recorder = Arc::clone(&self.recorder);
        let path = std::mem::take(&mut self.path);
        tokio::task::spawn_blocking(move || match recorder.stop() {
            Ok(()) => debug!(path = %path.display(), "recorder released"),
            Err(e) => warn!(error = %e, "recorder release failed"),
        });
    }
}

impl Drop for RecorderGuard {
    fn drop(&mut self) {
        if self.stopped {
            return;
        }
        match self.recorder.stop() {
            Ok(()) => debug!(path = %self.path.display(), "recorder released"),
            Err(e) => warn!(error = %e, "recorder release failed"),
        }
    }
}

impl std::fmt::Debug for RecorderGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecorderGuard")
            .field("path", &self.path)
            .field("stopped", &self.stopped)
            .finish()
    }
}

//! WAV file recorder.
//!
//! Audio arrives as 16-bit PCM frames through a [`FrameSink`] (fed by the
//! platform capture callback or by the host bridge). While a capture is
//! running a writer thread appends frames to a `hound` WAV writer; `stop`
//! finalizes the header and joins the thread.

use super::{CapabilityResult, Recorder};
use crate::error::CapabilityError;
use crossbeam_channel::{Receiver, Sender, TrySendError};
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use tracing::{debug, info, warn};

/// Sample rate used for emergency recordings.
pub const DEFAULT_SAMPLE_RATE: u32 = 16_000;

/// Frames buffered between the capture source and the writer thread.
const FRAME_BUFFER: usize = 256;

type WavFileWriter = hound::WavWriter<BufWriter<File>>;

/// Producer side of the recorder. Frames pushed while no capture is running
/// are discarded.
#[derive(Clone)]
pub struct FrameSink {
    tx: Sender<Vec<i16>>,
    recording: Arc<AtomicBool>,
}

impl FrameSink {
    /// Offer one frame. Returns `false` when it was dropped.
    pub fn push(&self, frame: Vec<i16>) -> bool {
        if !self.recording.load(Ordering::Acquire) {
            return false;
        }
        match self.tx.try_send(frame) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                warn!("recorder frame buffer full; dropping frame");
                false
            }
            Err(TrySendError::Disconnected(_)) => false,
        }
    }
}

struct ActiveCapture {
    path: PathBuf,
    stop_tx: Sender<()>,
    writer: JoinHandle<Result<u64, hound::Error>>,
}

pub struct WavRecorder {
    spec: hound::WavSpec,
    frames_tx: Sender<Vec<i16>>,
    frames_rx: Receiver<Vec<i16>>,
    recording: Arc<AtomicBool>,
    active: Mutex<Option<ActiveCapture>>,
}

impl WavRecorder {
    #[must_use]
    pub fn new(sample_rate: u32) -> Self {
        let (frames_tx, frames_rx) = crossbeam_channel::bounded(FRAME_BUFFER);
        Self {
            spec: hound::WavSpec {
                channels: 1,
                sample_rate,
                bits_per_sample: 16,
                sample_format: hound::SampleFormat::Int,
            },
            frames_tx,
            frames_rx,
            recording: Arc::new(AtomicBool::new(false)),
            active: Mutex::new(None),
        }
    }

    #[must_use]
    pub fn frame_sink(&self) -> FrameSink {
        FrameSink {
            tx: self.frames_tx.clone(),
            recording: Arc::clone(&self.recording),
        }
    }

    fn lock_active(&self) -> std::sync::MutexGuard<'_, Option<ActiveCapture>> {
        self.active
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for WavRecorder {
    fn default() -> Self {
        Self::new(DEFAULT_SAMPLE_RATE)
    }
}

impl Recorder for WavRecorder {
    fn start(&self, path: &Path) -> CapabilityResult<()> {
        let mut active = self.lock_active();
        if active.is_some() {
            return Err(CapabilityError::Unavailable("recorder already running".into()));
        }
        let writer = hound::WavWriter::create(path, self.spec)
            .map_err(|e| CapabilityError::Unavailable(format!("cannot create wav: {e}")))?;

        // Frames left over from an earlier capture do not belong here.
        while self.frames_rx.try_recv().is_ok() {}

        let (stop_tx, stop_rx) = crossbeam_channel::bounded(1);
        let frames = self.frames_rx.clone();
        let handle = std::thread::Builder::new()
            .name("helpwatch-recorder".into())
            .spawn(move || write_capture(writer, &frames, &stop_rx))
            .map_err(|e| CapabilityError::Failed(format!("cannot spawn writer: {e}")))?;

        self.recording.store(true, Ordering::Release);
        info!(path = %path.display(), "recording started");
        *active = Some(ActiveCapture {
            path: path.to_path_buf(),
            stop_tx,
            writer: handle,
        });
        Ok(())
    }

    fn stop(&self) -> CapabilityResult<()> {
        let Some(capture) = self.lock_active().take() else {
            debug!("recorder stop with nothing running");
            return Ok(());
        };
        self.recording.store(false, Ordering::Release);
        let _ = capture.stop_tx.send(());
        match capture.writer.join() {
            Ok(Ok(samples)) => {
                info!(path = %capture.path.display(), samples, "recording finalized");
                Ok(())
            }
            Ok(Err(e)) => Err(CapabilityError::Failed(format!("wav write failed: {e}"))),
            Err(_) => Err(CapabilityError::Failed("recorder thread panicked".into())),
        }
    }
}

fn write_capture(
    mut writer: WavFileWriter,
    frames: &Receiver<Vec<i16>>,
    stop: &Receiver<()>,
) -> Result<u64, hound::Error> {
    let mut written = 0_u64;
    loop {
        crossbeam_channel::select! {
            recv(frames) -> frame => match frame {
                Ok(frame) => written += write_frame(&mut writer, &frame)?,
                Err(_) => break,
            },
            recv(stop) -> _ => break,
        }
    }
    while let Ok(frame) = frames.try_recv() {
        written += write_frame(&mut writer, &frame)?;
    }
    writer.finalize()?;
    Ok(written)
}

fn write_frame(writer: &mut WavFileWriter, frame: &[i16]) -> Result<u64, hound::Error> {
    for &sample in frame {
        writer.write_sample(sample)?;
    }
    Ok(frame.len() as u64)
}

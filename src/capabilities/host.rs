//! Capabilities delegated to a native host shell.
//!
//! Side effects become [`EventEnvelope`]s on the host event stream (the shell
//! performs the actual SMS, call or alert); inputs the shell owns, such as
//! transcripts and location fixes, are fed back through the host commands.

use super::{
    AlertPresenter, CancelSignal, Capabilities, CapabilityResult, Caller, DisabledStorage,
    KeepAlive, Location, LocationProvider, Messenger, RecognitionErrorCode, RecognitionEvent,
    Recognizer, Storage,
};
use crate::capabilities::http_storage::HttpStorage;
use crate::capabilities::wav_recorder::{FrameSink, WavRecorder};
use crate::config::HelpConfig;
use crate::host::contract::EventEnvelope;
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, warn};

/// Publishes capability requests to the host.
#[derive(Clone)]
pub struct HostRequests {
    tx: broadcast::Sender<EventEnvelope>,
}

impl HostRequests {
    #[must_use]
    pub fn new(tx: broadcast::Sender<EventEnvelope>) -> Self {
        Self { tx }
    }

    fn emit(&self, event: &str, payload: serde_json::Value) {
        debug!(event, "host capability request");
        if self.tx.send(EventEnvelope::new(event, payload)).is_err() {
            warn!(event, "no host listening for capability request");
        }
    }
}

// ─── Recognizer ───────────────────────────────────────────────────────────────

/// Recognizer fed with transcripts produced by the host's speech engine.
pub struct TranscriptRecognizer {
    events: mpsc::Sender<RecognitionEvent>,
    requests: HostRequests,
    listening: AtomicBool,
}

impl TranscriptRecognizer {
    fn publish(&self, event: RecognitionEvent) -> bool {
        match self.events.try_send(event) {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, "recognition event dropped");
                false
            }
        }
    }

    /// Deliver a transcript. Final transcripts end the recognition run.
    /// Returns `false` when recognition is not running.
    pub fn feed_transcript(&self, text: &str, is_final: bool) -> bool {
        if !self.listening.load(Ordering::Acquire) {
            return false;
        }
        let candidates = vec![text.to_owned()];
        if !is_final {
            return self.publish(RecognitionEvent::PartialText { candidates });
        }
        // FinalText and End go out together or not at all; a lone FinalText
        // leaves the listener waiting for an End that never comes.
        let permits = self
            .events
            .try_reserve()
            .and_then(|first| self.events.try_reserve().map(|second| (first, second)));
        match permits {
            Ok((first, second)) => {
                self.listening.store(false, Ordering::Release);
                first.send(RecognitionEvent::FinalText { candidates });
                second.send(RecognitionEvent::End);
                true
            }
            Err(e) => {
                warn!(error = %e, "final transcript refused; recognition channel full");
                false
            }
        }
    }

    /// Deliver a recognizer failure reported by the host.
    pub fn feed_error(&self, code: RecognitionErrorCode) -> bool {
        if !self.listening.swap(false, Ordering::AcqRel) {
            return false;
        }
        self.publish(RecognitionEvent::Error { code })
    }
}

impl Recognizer for TranscriptRecognizer {
    fn start_listening(&self) -> CapabilityResult<()> {
        self.listening.store(true, Ordering::Release);
        self.requests
            .emit("recognizer.start", serde_json::json!({}));
        self.publish(RecognitionEvent::Ready);
        Ok(())
    }

    fn stop_listening(&self) {
        self.listening.store(false, Ordering::Release);
        self.requests.emit("recognizer.stop", serde_json::json!({}));
    }
}

// ─── Side-effect adapters ────────────────────────────────────────────────────

pub struct HostMessenger {
    requests: HostRequests,
}

#[async_trait]
impl Messenger for HostMessenger {
    async fn send_text(&self, number: &str, body: &str) -> CapabilityResult<()> {
        self.requests.emit(
            "sms.send",
            serde_json::json!({"number": number, "body": body}),
        );
        Ok(())
    }
}

pub struct HostCaller {
    requests: HostRequests,
}

#[async_trait]
impl Caller for HostCaller {
    async fn place_call(&self, number: &str) -> CapabilityResult<()> {
        self.requests
            .emit("call.place", serde_json::json!({"number": number}));
        Ok(())
    }

    async fn open_dialer(&self, number: &str) -> CapabilityResult<()> {
        self.requests
            .emit("call.open_dialer", serde_json::json!({"number": number}));
        Ok(())
    }
}

/// Location cache updated by `location.update`.
#[derive(Default)]
pub struct HostLocation {
    fix: Mutex<Option<Location>>,
}

impl HostLocation {
    pub fn update(&self, location: Location) {
        *self.fix.lock().unwrap_or_else(|p| p.into_inner()) = Some(location);
    }
}

#[async_trait]
impl LocationProvider for HostLocation {
    async fn last_known_location(&self) -> CapabilityResult<Option<Location>> {
        Ok(*self.fix.lock().unwrap_or_else(|p| p.into_inner()))
    }
}

pub struct HostPresenter {
    requests: HostRequests,
    cancel_button: Mutex<Option<oneshot::Sender<()>>>,
}

impl HostPresenter {
    /// Press cancel on the visible alert. Returns `false` when none is shown.
    pub fn press_cancel(&self) -> bool {
        let button = self
            .cancel_button
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .take();
        button.is_some_and(|tx| tx.send(()).is_ok())
    }
}

impl AlertPresenter for HostPresenter {
    fn show_full_screen_alert(&self, message: &str) -> CapabilityResult<CancelSignal> {
        let (tx, rx) = oneshot::channel();
        *self.cancel_button.lock().unwrap_or_else(|p| p.into_inner()) = Some(tx);
        self.requests
            .emit("alert.show", serde_json::json!({"message": message}));
        Ok(rx)
    }

    fn show_background_status(&self, message: &str) {
        self.requests
            .emit("status.show", serde_json::json!({"message": message}));
    }
}

pub struct HostKeepAlive {
    requests: HostRequests,
}

impl KeepAlive for HostKeepAlive {
    fn acquire(&self, tag: &str, ceiling: Duration) -> CapabilityResult<()> {
        self.requests.emit(
            "keep_alive.acquire",
            serde_json::json!({"tag": tag, "ceiling_secs": ceiling.as_secs()}),
        );
        Ok(())
    }

    fn release(&self, tag: &str) {
        self.requests
            .emit("keep_alive.release", serde_json::json!({"tag": tag}));
    }
}

// ─── Bundle ───────────────────────────────────────────────────────────────────

/// Host-backed capability set plus the input points the host commands use.
pub struct HostCapabilities {
    pub recognizer: Arc<TranscriptRecognizer>,
    pub location: Arc<HostLocation>,
    pub presenter: Arc<HostPresenter>,
    pub frames: FrameSink,
    capabilities: Capabilities,
}

impl HostCapabilities {
    #[must_use]
    pub fn new(
        config: &HelpConfig,
        recognition_tx: mpsc::Sender<RecognitionEvent>,
        requests: HostRequests,
    ) -> Self {
        let recognizer = Arc::new(TranscriptRecognizer {
            events: recognition_tx,
            requests: requests.clone(),
            listening: AtomicBool::new(false),
        });
        let location = Arc::new(HostLocation::default());
        let presenter = Arc::new(HostPresenter {
            requests: requests.clone(),
            cancel_button: Mutex::new(None),
        });
        let recorder = Arc::new(WavRecorder::default());
        let frames = recorder.frame_sink();
        let storage: Arc<dyn Storage> = if config.storage.upload_url.is_empty() {
            Arc::new(DisabledStorage)
        } else {
            match HttpStorage::new(config.storage.clone()) {
                Ok(storage) => Arc::new(storage),
                Err(e) => {
                    warn!(error = %e, "remote storage disabled");
                    Arc::new(DisabledStorage)
                }
            }
        };

        let capabilities = Capabilities {
            recognizer: recognizer.clone(),
            messenger: Arc::new(HostMessenger {
                requests: requests.clone(),
            }),
            caller: Arc::new(HostCaller {
                requests: requests.clone(),
            }),
            location: location.clone(),
            storage,
            presenter: presenter.clone(),
            keep_alive: Arc::new(HostKeepAlive { requests }),
            recorder,
        };
        Self {
            recognizer,
            location,
            presenter,
            frames,
            capabilities,
        }
    }

    #[must_use]
    pub fn capabilities(&self) -> Capabilities {
        self.capabilities.clone()
    }
}

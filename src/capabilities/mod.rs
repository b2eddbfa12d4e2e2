//! Injected platform capabilities.
//!
//! Every side effect the runtime performs goes through one of these traits:
//! speech recognition, SMS, calls, location, remote storage, the alert UI,
//! the keep-alive token, and the audio recorder. Production adapters live in
//! the submodules; recording test doubles live in [`crate::testing`].

pub mod host;
pub mod http_storage;
pub mod wav_recorder;

use crate::error::CapabilityError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;

/// Result type for capability calls.
pub type CapabilityResult<T> = std::result::Result<T, CapabilityError>;

/// Event emitted by the speech recognition capability.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RecognitionEvent {
    /// Recognizer is ready for speech.
    Ready,
    /// User started speaking.
    Begin,
    /// Interim transcription candidates.
    PartialText { candidates: Vec<String> },
    /// Final transcription candidates for the utterance.
    FinalText { candidates: Vec<String> },
    /// The utterance (and the recognition run) ended.
    End,
    /// Recognition failed.
    Error { code: RecognitionErrorCode },
}

/// Recognizer failure codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecognitionErrorCode {
    Audio,
    Client,
    InsufficientPermissions,
    Network,
    NetworkTimeout,
    NoMatch,
    RecognizerBusy,
    Server,
    SpeechTimeout,
    Unknown(i32),
}

impl RecognitionErrorCode {
    /// Whether the error needs a permission grant rather than a retry.
    #[must_use]
    pub fn is_permission_denied(self) -> bool {
        matches!(self, Self::InsufficientPermissions)
    }

    /// Human-readable description for logs.
    #[must_use]
    pub fn description(self) -> String {
        match self {
            Self::Audio => "audio recording error".to_owned(),
            Self::Client => "client side error".to_owned(),
            Self::InsufficientPermissions => "insufficient permissions".to_owned(),
            Self::Network => "network error".to_owned(),
            Self::NetworkTimeout => "network timeout".to_owned(),
            Self::NoMatch => "no recognition match".to_owned(),
            Self::RecognizerBusy => "recognition service busy".to_owned(),
            Self::Server => "server error".to_owned(),
            Self::SpeechTimeout => "no speech input".to_owned(),
            Self::Unknown(code) => format!("unknown error: {code}"),
        }
    }

    /// Map a platform numeric code onto the taxonomy.
    #[must_use]
    pub fn from_code(code: i32) -> Self {
        match code {
            1 => Self::NetworkTimeout,
            2 => Self::Network,
            3 => Self::Audio,
            4 => Self::Server,
            5 => Self::Client,
            6 => Self::SpeechTimeout,
            7 => Self::NoMatch,
            8 => Self::RecognizerBusy,
            9 => Self::InsufficientPermissions,
            other => Self::Unknown(other),
        }
    }
}

/// A best-effort device location.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub latitude: f64,
    pub longitude: f64,
}

impl Location {
    /// A maps search link pointing at this location.
    #[must_use]
    pub fn maps_url(&self) -> String {
        format!(
            "https://www.google.com/maps/search/?api=1&query={},{}",
            self.latitude, self.longitude
        )
    }
}

/// Signal resolved when the user presses cancel on the alert.
///
/// A dropped sender means the alert went away without a cancel.
pub type CancelSignal = oneshot::Receiver<()>;

/// Continuous speech recognition. Start/stop are fire-and-continue; results
/// arrive on the event channel handed to [`crate::service::HelpService`].
pub trait Recognizer: Send + Sync {
    /// Begin a recognition run.
    fn start_listening(&self) -> CapabilityResult<()>;

    /// Halt the current run, if any.
    fn stop_listening(&self);
}

/// Text messaging. Bodies longer than one SMS must be split by the caller.
#[async_trait]
pub trait Messenger: Send + Sync {
    async fn send_text(&self, number: &str, body: &str) -> CapabilityResult<()>;
}

/// Voice calls.
#[async_trait]
pub trait Caller: Send + Sync {
    /// Place a call directly.
    async fn place_call(&self, number: &str) -> CapabilityResult<()>;

    /// Open the dialer prefilled with `number`; the user taps call.
    async fn open_dialer(&self, number: &str) -> CapabilityResult<()>;
}

/// Last known device location.
#[async_trait]
pub trait LocationProvider: Send + Sync {
    async fn last_known_location(&self) -> CapabilityResult<Option<Location>>;
}

/// Remote storage for recorded artifacts.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Upload the file and return a retrievable link. Single attempt.
    async fn upload(&self, local_path: &Path) -> CapabilityResult<String>;
}

/// Foreground alert UI.
pub trait AlertPresenter: Send + Sync {
    /// Show the full-screen alert and hand back its cancel signal.
    fn show_full_screen_alert(&self, message: &str) -> CapabilityResult<CancelSignal>;

    /// Show a transient status line (toast / notification text).
    fn show_background_status(&self, message: &str);
}

/// Keep-process-alive token (wake lock equivalent).
pub trait KeepAlive: Send + Sync {
    fn acquire(&self, tag: &str, ceiling: Duration) -> CapabilityResult<()>;

    fn release(&self, tag: &str);
}

/// Audio recorder writing to a local file.
pub trait Recorder: Send + Sync {
    /// Start capturing into `path`.
    fn start(&self, path: &Path) -> CapabilityResult<()>;

    /// Stop capturing and release the device. Safe to call after a failed
    /// `start` or when nothing is recording.
    fn stop(&self) -> CapabilityResult<()>;
}

/// The full set of capabilities the runtime drives.
#[derive(Clone)]
pub struct Capabilities {
    pub recognizer: Arc<dyn Recognizer>,
    pub messenger: Arc<dyn Messenger>,
    pub caller: Arc<dyn Caller>,
    pub location: Arc<dyn LocationProvider>,
    pub storage: Arc<dyn Storage>,
    pub presenter: Arc<dyn AlertPresenter>,
    pub keep_alive: Arc<dyn KeepAlive>,
    pub recorder: Arc<dyn Recorder>,
}

/// Storage stand-in used when no upload endpoint is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct DisabledStorage;

#[async_trait]
impl Storage for DisabledStorage {
    async fn upload(&self, _local_path: &Path) -> CapabilityResult<String> {
        Err(CapabilityError::Unavailable(
            "no storage endpoint configured".into(),
        ))
    }
}

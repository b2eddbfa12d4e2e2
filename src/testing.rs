//! Recording test doubles for every capability.
//!
//! Each mock appends to a shared [`MockLog`] so tests can assert on the order
//! in which side effects were issued. Failures are injected per mock.

use crate::capabilities::{
    AlertPresenter, CancelSignal, Capabilities, CapabilityResult, Caller, KeepAlive, Location,
    LocationProvider, Messenger, Recognizer, Recorder, Storage,
};
use crate::error::CapabilityError;
use async_trait::async_trait;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::oneshot;

/// One side effect observed by a mock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockAction {
    RecognizerStart,
    RecognizerStop,
    Sms { number: String, body: String },
    Call { number: String },
    Dialer { number: String },
    LocationQuery,
    Upload { path: PathBuf },
    Alert { message: String },
    Status { message: String },
    KeepAliveAcquire { tag: String },
    KeepAliveRelease { tag: String },
    RecorderStart { path: PathBuf },
    RecorderStop,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Ordered, shared log of mock side effects.
#[derive(Debug, Clone, Default)]
pub struct MockLog {
    actions: Arc<Mutex<Vec<MockAction>>>,
}

impl MockLog {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&self, action: MockAction) {
        lock(&self.actions).push(action);
    }

    /// Snapshot of everything recorded so far.
    pub fn actions(&self) -> Vec<MockAction> {
        lock(&self.actions).clone()
    }

    pub fn count(&self, pred: impl Fn(&MockAction) -> bool) -> usize {
        lock(&self.actions).iter().filter(|a| pred(a)).count()
    }

    /// Index of the first action matching `pred`.
    pub fn position(&self, pred: impl Fn(&MockAction) -> bool) -> Option<usize> {
        lock(&self.actions).iter().position(pred)
    }

    pub fn sms_count(&self) -> usize {
        self.count(|a| matches!(a, MockAction::Sms { .. }))
    }

    /// SMS bodies in the order they were issued.
    pub fn sms_bodies(&self) -> Vec<String> {
        lock(&self.actions)
            .iter()
            .filter_map(|a| match a {
                MockAction::Sms { body, .. } => Some(body.clone()),
                _ => None,
            })
            .collect()
    }

    /// Direct calls plus dialer fallbacks.
    pub fn call_attempts(&self) -> usize {
        self.count(|a| matches!(a, MockAction::Call { .. } | MockAction::Dialer { .. }))
    }

    pub fn recognizer_starts(&self) -> usize {
        self.count(|a| matches!(a, MockAction::RecognizerStart))
    }

    pub fn statuses(&self) -> Vec<String> {
        lock(&self.actions)
            .iter()
            .filter_map(|a| match a {
                MockAction::Status { message } => Some(message.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn clear(&self) {
        lock(&self.actions).clear();
    }
}

// ─── MockRecognizer ───────────────────────────────────────────────────────────

/// Recognizer that records start/stop calls.
#[derive(Debug, Default)]
pub struct MockRecognizer {
    log: MockLog,
    listening: AtomicBool,
    start_error: Mutex<Option<CapabilityError>>,
}

impl MockRecognizer {
    pub fn new(log: MockLog) -> Self {
        Self {
            log,
            ..Self::default()
        }
    }

    pub fn is_listening(&self) -> bool {
        self.listening.load(Ordering::SeqCst)
    }

    /// Make every following `start_listening` fail with `err`.
    pub fn fail_start_with(&self, err: Option<CapabilityError>) {
        *lock(&self.start_error) = err;
    }
}

impl Recognizer for MockRecognizer {
    fn start_listening(&self) -> CapabilityResult<()> {
        self.log.push(MockAction::RecognizerStart);
        if let Some(err) = lock(&self.start_error).clone() {
            return Err(err);
        }
        self.listening.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn stop_listening(&self) {
        self.log.push(MockAction::RecognizerStop);
        self.listening.store(false, Ordering::SeqCst);
    }
}

// ─── MockMessenger ────────────────────────────────────────────────────────────

/// Messenger that records every attempted SMS.
#[derive(Debug, Default)]
pub struct MockMessenger {
    log: MockLog,
    failure: Mutex<Option<CapabilityError>>,
}

impl MockMessenger {
    /// Standalone messenger with its own log.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_log(log: MockLog) -> Self {
        Self {
            log,
            ..Self::default()
        }
    }

    pub fn log(&self) -> &MockLog {
        &self.log
    }

    pub fn fail_with(&self, err: CapabilityError) {
        *lock(&self.failure) = Some(err);
    }
}

#[async_trait]
impl Messenger for MockMessenger {
    async fn send_text(&self, number: &str, body: &str) -> CapabilityResult<()> {
        self.log.push(MockAction::Sms {
            number: number.to_owned(),
            body: body.to_owned(),
        });
        match lock(&self.failure).clone() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

// ─── MockCaller ───────────────────────────────────────────────────────────────

/// Caller with switchable call permission.
#[derive(Debug, Default)]
pub struct MockCaller {
    log: MockLog,
    call_denied: AtomicBool,
    dialer_broken: AtomicBool,
}

impl MockCaller {
    pub fn new(log: MockLog) -> Self {
        Self {
            log,
            ..Self::default()
        }
    }

    pub fn deny_call_permission(&self) {
        self.call_denied.store(true, Ordering::SeqCst);
    }

    pub fn break_dialer(&self) {
        self.dialer_broken.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl Caller for MockCaller {
    async fn place_call(&self, number: &str) -> CapabilityResult<()> {
        if self.call_denied.load(Ordering::SeqCst) {
            return Err(CapabilityError::PermissionDenied("CALL_PHONE".into()));
        }
        self.log.push(MockAction::Call {
            number: number.to_owned(),
        });
        Ok(())
    }

    async fn open_dialer(&self, number: &str) -> CapabilityResult<()> {
        if self.dialer_broken.load(Ordering::SeqCst) {
            return Err(CapabilityError::Unavailable("no dialer".into()));
        }
        self.log.push(MockAction::Dialer {
            number: number.to_owned(),
        });
        Ok(())
    }
}

// ─── MockLocation ─────────────────────────────────────────────────────────────

/// Location provider returning a preset fix.
#[derive(Debug, Default)]
pub struct MockLocation {
    log: MockLog,
    fix: Mutex<Option<Location>>,
}

impl MockLocation {
    pub fn new(log: MockLog) -> Self {
        Self {
            log,
            ..Self::default()
        }
    }

    pub fn set_location(&self, fix: Option<Location>) {
        *lock(&self.fix) = fix;
    }
}

#[async_trait]
impl LocationProvider for MockLocation {
    async fn last_known_location(&self) -> CapabilityResult<Option<Location>> {
        self.log.push(MockAction::LocationQuery);
        Ok(*lock(&self.fix))
    }
}

// ─── MockStorage ──────────────────────────────────────────────────────────────

/// Storage returning a preset link or failure after an optional delay.
#[derive(Debug)]
pub struct MockStorage {
    log: MockLog,
    response: Mutex<CapabilityResult<String>>,
    delay: Mutex<Duration>,
}

impl MockStorage {
    pub fn new(log: MockLog) -> Self {
        Self {
            log,
            response: Mutex::new(Ok(
                "https://storage.example.com/emergency_audio/clip.wav".to_owned()
            )),
            delay: Mutex::new(Duration::ZERO),
        }
    }

    pub fn respond_with(&self, response: CapabilityResult<String>) {
        *lock(&self.response) = response;
    }

    pub fn set_delay(&self, delay: Duration) {
        *lock(&self.delay) = delay;
    }
}

#[async_trait]
impl Storage for MockStorage {
    async fn upload(&self, local_path: &Path) -> CapabilityResult<String> {
        self.log.push(MockAction::Upload {
            path: local_path.to_path_buf(),
        });
        let delay = *lock(&self.delay);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        lock(&self.response).clone()
    }
}

// ─── MockPresenter ────────────────────────────────────────────────────────────

/// Alert presenter whose cancel button is pressed from the test.
#[derive(Debug, Default)]
pub struct MockPresenter {
    log: MockLog,
    cancel_buttons: Mutex<Vec<oneshot::Sender<()>>>,
    alert_broken: AtomicBool,
}

impl MockPresenter {
    pub fn new(log: MockLog) -> Self {
        Self {
            log,
            ..Self::default()
        }
    }

    /// Press cancel on the most recent alert. Returns false when there is
    /// no alert to cancel.
    pub fn press_cancel(&self) -> bool {
        match lock(&self.cancel_buttons).pop() {
            Some(button) => button.send(()).is_ok(),
            None => false,
        }
    }

    pub fn break_alert(&self) {
        self.alert_broken.store(true, Ordering::SeqCst);
    }
}

impl AlertPresenter for MockPresenter {
    fn show_full_screen_alert(&self, message: &str) -> CapabilityResult<CancelSignal> {
        if self.alert_broken.load(Ordering::SeqCst) {
            return Err(CapabilityError::Unavailable("overlay not allowed".into()));
        }
        self.log.push(MockAction::Alert {
            message: message.to_owned(),
        });
        let (tx, rx) = oneshot::channel();
        lock(&self.cancel_buttons).push(tx);
        Ok(rx)
    }

    fn show_background_status(&self, message: &str) {
        self.log.push(MockAction::Status {
            message: message.to_owned(),
        });
    }
}

// ─── MockKeepAlive ────────────────────────────────────────────────────────────

/// Keep-alive token tracker.
#[derive(Debug, Default)]
pub struct MockKeepAlive {
    log: MockLog,
    held: Mutex<BTreeSet<String>>,
    refuse: AtomicBool,
}

impl MockKeepAlive {
    pub fn new(log: MockLog) -> Self {
        Self {
            log,
            ..Self::default()
        }
    }

    pub fn is_held(&self, tag: &str) -> bool {
        lock(&self.held).contains(tag)
    }

    pub fn held_count(&self) -> usize {
        lock(&self.held).len()
    }

    pub fn refuse_acquire(&self) {
        self.refuse.store(true, Ordering::SeqCst);
    }
}

impl KeepAlive for MockKeepAlive {
    fn acquire(&self, tag: &str, _ceiling: Duration) -> CapabilityResult<()> {
        if self.refuse.load(Ordering::SeqCst) {
            return Err(CapabilityError::PermissionDenied("WAKE_LOCK".into()));
        }
        self.log.push(MockAction::KeepAliveAcquire {
            tag: tag.to_owned(),
        });
        lock(&self.held).insert(tag.to_owned());
        Ok(())
    }

    fn release(&self, tag: &str) {
        self.log.push(MockAction::KeepAliveRelease {
            tag: tag.to_owned(),
        });
        lock(&self.held).remove(tag);
    }
}

// ─── MockRecorder ─────────────────────────────────────────────────────────────

/// Samples [`MockRecorder`] writes into every finished artifact.
pub const MOCK_CAPTURE_SAMPLES: usize = 1_600;

/// Write a 16 kHz mono WAV holding `samples` frames of a quiet ramp.
///
/// # Errors
///
/// Returns the `hound` error when the file cannot be written.
pub fn write_test_wav(path: &Path, samples: usize) -> Result<(), hound::Error> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: 16_000,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(path, spec)?;
    for i in 0..samples {
        writer.write_sample(i16::try_from(i % 64).unwrap_or_default())?;
    }
    writer.finalize()
}

/// Recorder that writes a short WAV artifact on stop.
#[derive(Debug, Default)]
pub struct MockRecorder {
    log: MockLog,
    recording: Mutex<Option<PathBuf>>,
    start_error: Mutex<Option<CapabilityError>>,
    stop_error: Mutex<Option<CapabilityError>>,
}

impl MockRecorder {
    pub fn new(log: MockLog) -> Self {
        Self {
            log,
            ..Self::default()
        }
    }

    pub fn is_recording(&self) -> bool {
        lock(&self.recording).is_some()
    }

    pub fn fail_start_with(&self, err: CapabilityError) {
        *lock(&self.start_error) = Some(err);
    }

    pub fn fail_stop_with(&self, err: CapabilityError) {
        *lock(&self.stop_error) = Some(err);
    }
}

impl Recorder for MockRecorder {
    fn start(&self, path: &Path) -> CapabilityResult<()> {
        self.log.push(MockAction::RecorderStart {
            path: path.to_path_buf(),
        });
        if let Some(err) = lock(&self.start_error).clone() {
            return Err(err);
        }
        std::fs::write(path, b"")
            .map_err(|e| CapabilityError::Unavailable(format!("cannot create {e}")))?;
        *lock(&self.recording) = Some(path.to_path_buf());
        Ok(())
    }

    fn stop(&self) -> CapabilityResult<()> {
        self.log.push(MockAction::RecorderStop);
        let path = lock(&self.recording).take();
        if let Some(err) = lock(&self.stop_error).clone() {
            return Err(err);
        }
        if let Some(path) = path {
            write_test_wav(&path, MOCK_CAPTURE_SAMPLES)
                .map_err(|e| CapabilityError::Failed(format!("cannot finalize: {e}")))?;
        }
        Ok(())
    }
}

// ─── MockDoubles ──────────────────────────────────────────────────────────────

/// All mocks wired to one shared log.
pub struct MockDoubles {
    pub log: MockLog,
    pub recognizer: Arc<MockRecognizer>,
    pub messenger: Arc<MockMessenger>,
    pub caller: Arc<MockCaller>,
    pub location: Arc<MockLocation>,
    pub storage: Arc<MockStorage>,
    pub presenter: Arc<MockPresenter>,
    pub keep_alive: Arc<MockKeepAlive>,
    pub recorder: Arc<MockRecorder>,
}

impl MockDoubles {
    pub fn new() -> Self {
        let log = MockLog::new();
        Self {
            recognizer: Arc::new(MockRecognizer::new(log.clone())),
            messenger: Arc::new(MockMessenger::with_log(log.clone())),
            caller: Arc::new(MockCaller::new(log.clone())),
            location: Arc::new(MockLocation::new(log.clone())),
            storage: Arc::new(MockStorage::new(log.clone())),
            presenter: Arc::new(MockPresenter::new(log.clone())),
            keep_alive: Arc::new(MockKeepAlive::new(log.clone())),
            recorder: Arc::new(MockRecorder::new(log.clone())),
            log,
        }
    }

    /// Capability bundle backed by these mocks.
    pub fn capabilities(&self) -> Capabilities {
        Capabilities {
            recognizer: self.recognizer.clone(),
            messenger: self.messenger.clone(),
            caller: self.caller.clone(),
            location: self.location.clone(),
            storage: self.storage.clone(),
            presenter: self.presenter.clone(),
            keep_alive: self.keep_alive.clone(),
            recorder: self.recorder.clone(),
        }
    }
}

impl Default for MockDoubles {
    fn default() -> Self {
        Self::new()
    }
}

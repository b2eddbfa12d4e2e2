//! The help service: one control task driving the listener loop and the
//! escalation orchestrator.
//!
//! Recognition events, lifecycle commands and internal continuations
//! (timers, action and upload completions) are all delivered to
//! [`HelpService::run`] as messages, so transition logic never runs
//! concurrently. [`HelpServiceHandle`] is the cloneable front door.

use crate::capabilities::{Capabilities, RecognitionEvent};
use crate::config::HelpConfig;
use crate::control::{ControlEvent, ControlSender};
use crate::error::{HelpError, Result};
use crate::escalation::{
    EscalationSession, EscalationState, FailureReason, Orchestrator, SessionEnd, TriggerOutcome,
};
use crate::guards::{KeepAliveGuard, LISTENER_KEEP_ALIVE_TAG};
use crate::listener::{Listener, ListenerSignal, ListenerState};
use crate::runtime::{EventSink, RuntimeEvent};
use crate::settings::{self, SettingsStore, TriggerConfiguration};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, info, warn};

/// Capacity of the recognition event channel.
pub const RECOGNITION_CAPACITY: usize = 64;

/// Capacity of the lifecycle command channel.
const COMMAND_CAPACITY: usize = 32;

/// Status line shown when recognition needs a permission grant.
pub const STATUS_MIC_PERMISSION: &str = "Microphone permission required for voice detection";

/// Channel recognizer adapters publish their events on.
#[must_use]
pub fn recognition_channel() -> (
    mpsc::Sender<RecognitionEvent>,
    mpsc::Receiver<RecognitionEvent>,
) {
    mpsc::channel(RECOGNITION_CAPACITY)
}

/// Point-in-time view of the runtime.
#[derive(Debug, Clone, Serialize)]
pub struct ServiceStatus {
    pub listener_active: bool,
    pub listener: ListenerState,
    pub session: Option<EscalationSession>,
    pub phrase: String,
    pub guardian_configured: bool,
}

enum ServiceCommand {
    Activate { reply: oneshot::Sender<()> },
    Deactivate { reply: oneshot::Sender<()> },
    Trigger { reply: oneshot::Sender<TriggerOutcome> },
    Continue { reply: oneshot::Sender<bool> },
    Cancel { reply: oneshot::Sender<bool> },
    Status { reply: oneshot::Sender<ServiceStatus> },
    Shutdown,
}

/// Cloneable handle to a running [`HelpService`].
#[derive(Clone)]
pub struct HelpServiceHandle {
    commands: mpsc::Sender<ServiceCommand>,
    events: EventSink,
    settings: Arc<dyn SettingsStore>,
}

impl HelpServiceHandle {
    async fn request<T>(&self, make: impl FnOnce(oneshot::Sender<T>) -> ServiceCommand) -> Result<T> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(make(reply))
            .await
            .map_err(|_| HelpError::Channel("help service stopped".into()))?;
        rx.await
            .map_err(|_| HelpError::Channel("help service dropped the request".into()))
    }

    /// Start the listener loop.
    ///
    /// # Errors
    ///
    /// Returns [`HelpError::Channel`] when the service is gone.
    pub async fn activate(&self) -> Result<()> {
        self.request(|reply| ServiceCommand::Activate { reply }).await
    }

    /// Stop the listener loop. A live session runs to its end.
    ///
    /// # Errors
    ///
    /// Returns [`HelpError::Channel`] when the service is gone.
    pub async fn deactivate(&self) -> Result<()> {
        self.request(|reply| ServiceCommand::Deactivate { reply }).await
    }

    /// Manual panic trigger.
    ///
    /// # Errors
    ///
    /// Returns [`HelpError::Channel`] when the service is gone.
    pub async fn trigger(&self) -> Result<TriggerOutcome> {
        self.request(|reply| ServiceCommand::Trigger { reply }).await
    }

    /// Skip the rest of the notify window. Returns whether it applied.
    ///
    /// # Errors
    ///
    /// Returns [`HelpError::Channel`] when the service is gone.
    pub async fn continue_escalation(&self) -> Result<bool> {
        self.request(|reply| ServiceCommand::Continue { reply }).await
    }

    /// Cancel the live session. Returns whether a session was cancelled.
    ///
    /// # Errors
    ///
    /// Returns [`HelpError::Channel`] when the service is gone.
    pub async fn cancel(&self) -> Result<bool> {
        self.request(|reply| ServiceCommand::Cancel { reply }).await
    }

    /// # Errors
    ///
    /// Returns [`HelpError::Channel`] when the service is gone.
    pub async fn status(&self) -> Result<ServiceStatus> {
        self.request(|reply| ServiceCommand::Status { reply }).await
    }

    /// Store a new trigger phrase; it applies to the next recognition batch.
    ///
    /// # Errors
    ///
    /// Returns an error for a blank phrase or a failed write.
    pub fn on_trigger_phrase_configured(&self, phrase: &str) -> Result<String> {
        let stored = settings::set_detection_word(self.settings.as_ref(), phrase)?;
        info!(phrase = %stored, "trigger phrase configured");
        Ok(stored)
    }

    /// Store a new guardian number; it applies to the next session.
    ///
    /// # Errors
    ///
    /// Returns an error for a malformed number or a failed write.
    pub fn on_guardian_configured(&self, number: &str) -> Result<String> {
        let stored = settings::set_guardian_number(self.settings.as_ref(), number)?;
        info!("guardian contact configured");
        Ok(stored)
    }

    /// Current settings snapshot.
    #[must_use]
    pub fn trigger_configuration(&self) -> TriggerConfiguration {
        TriggerConfiguration::load(self.settings.as_ref())
    }

    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<RuntimeEvent> {
        self.events.subscribe()
    }

    /// Stop the control task, aborting a live session.
    ///
    /// # Errors
    ///
    /// Returns [`HelpError::Channel`] when the service is already gone.
    pub async fn shutdown(&self) -> Result<()> {
        self.commands
            .send(ServiceCommand::Shutdown)
            .await
            .map_err(|_| HelpError::Channel("help service stopped".into()))
    }
}

/// The control task. Build with [`HelpService::new`] and drive with
/// [`HelpService::run`].
pub struct HelpService {
    config: HelpConfig,
    caps: Capabilities,
    settings: Arc<dyn SettingsStore>,
    listener: Listener,
    orchestrator: Orchestrator,
    service_keep_alive: Option<KeepAliveGuard>,
    events: EventSink,
    recognition_rx: mpsc::Receiver<RecognitionEvent>,
    recognition_open: bool,
    command_rx: mpsc::Receiver<ServiceCommand>,
    control_rx: mpsc::UnboundedReceiver<ControlEvent>,
}

impl HelpService {
    #[must_use]
    pub fn new(
        config: HelpConfig,
        caps: Capabilities,
        settings: Arc<dyn SettingsStore>,
        recognition_rx: mpsc::Receiver<RecognitionEvent>,
    ) -> (HelpServiceHandle, Self) {
        let events = EventSink::default();
        let (control_tx, control_rx): (ControlSender, _) = mpsc::unbounded_channel();
        let (command_tx, command_rx) = mpsc::channel(COMMAND_CAPACITY);

        let listener = Listener::new(
            caps.recognizer.clone(),
            config.listener.clone(),
            control_tx.clone(),
            events.clone(),
        );
        let orchestrator = Orchestrator::new(
            caps.clone(),
            config.escalation.clone(),
            control_tx,
            events.clone(),
        );

        let handle = HelpServiceHandle {
            commands: command_tx,
            events: events.clone(),
            settings: Arc::clone(&settings),
        };
        let service = Self {
            config,
            caps,
            settings,
            listener,
            orchestrator,
            service_keep_alive: None,
            events,
            recognition_rx,
            recognition_open: true,
            command_rx,
            control_rx,
        };
        (handle, service)
    }

    /// Run until shutdown is requested or every handle is dropped.
    pub async fn run(mut self) {
        info!("help service started");
        self.orchestrator.prepare().await;
        loop {
            tokio::select! {
                biased;
                Some(event) = self.control_rx.recv() => self.on_control(event),
                event = self.recognition_rx.recv(), if self.recognition_open => match event {
                    Some(event) => self.on_recognition(event),
                    None => {
                        warn!("recognition stream closed");
                        self.recognition_open = false;
                    }
                },
                command = self.command_rx.recv() => match command {
                    Some(ServiceCommand::Shutdown) | None => break,
                    Some(command) => self.on_command(command),
                },
            }
        }
        self.stop();
        info!("help service stopped");
    }

    fn on_command(&mut self, command: ServiceCommand) {
        match command {
            ServiceCommand::Activate { reply } => {
                self.activate();
                let _ = reply.send(());
            }
            ServiceCommand::Deactivate { reply } => {
                self.listener.deactivate();
                self.service_keep_alive = None;
                let _ = reply.send(());
            }
            ServiceCommand::Trigger { reply } => {
                info!("manual trigger");
                let outcome = self.start_escalation();
                let _ = reply.send(outcome);
            }
            ServiceCommand::Continue { reply } => {
                let applied = self
                    .orchestrator
                    .session()
                    .is_some_and(|s| s.state == EscalationState::Notifying);
                let end = self.orchestrator.continue_now();
                self.on_session_end(end);
                let _ = reply.send(applied);
            }
            ServiceCommand::Cancel { reply } => {
                let end = self.orchestrator.cancel();
                let cancelled = end.is_some();
                self.on_session_end(end);
                let _ = reply.send(cancelled);
            }
            ServiceCommand::Status { reply } => {
                let _ = reply.send(self.status());
            }
            ServiceCommand::Shutdown => {}
        }
    }

    fn on_control(&mut self, event: ControlEvent) {
        match event {
            ControlEvent::ListenerRestart { generation } => {
                let signal = self.listener.on_restart(generation);
                self.on_listener_signal(signal);
            }
            ControlEvent::Timer { session, step } => {
                let end = self.orchestrator.on_timer(session, step);
                self.on_session_end(end);
            }
            ControlEvent::AlertCancelled { session } => {
                let end = self.orchestrator.on_alert_cancelled(session);
                self.on_session_end(end);
            }
            ControlEvent::ActionFinished {
                session,
                action,
                outcome,
            } => self
                .orchestrator
                .on_action_finished(session, action, outcome),
            ControlEvent::UploadFinished(report) => self.orchestrator.on_upload_finished(report),
        }
    }

    fn on_recognition(&mut self, event: RecognitionEvent) {
        let phrase = TriggerConfiguration::load(self.settings.as_ref()).phrase;
        let signal = self.listener.on_event(event, &phrase);
        self.on_listener_signal(signal);
    }

    fn on_listener_signal(&mut self, signal: Option<ListenerSignal>) {
        match signal {
            Some(ListenerSignal::PhraseMatched(candidate)) => {
                self.events.emit(RuntimeEvent::PhraseMatched { candidate });
                self.start_escalation();
            }
            Some(ListenerSignal::PermissionDenied(code)) => {
                self.caps
                    .presenter
                    .show_background_status(STATUS_MIC_PERMISSION);
                self.events
                    .emit(RuntimeEvent::ListenerPermissionDenied { code });
            }
            None => {}
        }
    }

    fn activate(&mut self) {
        if self.service_keep_alive.is_none() {
            self.service_keep_alive = match KeepAliveGuard::acquire(
                self.caps.keep_alive.clone(),
                LISTENER_KEEP_ALIVE_TAG,
                self.config.listener.keep_alive_ceiling(),
            ) {
                Ok(guard) => Some(guard),
                Err(e) => {
                    warn!(error = %e, "listener keep-alive unavailable");
                    None
                }
            };
        }
        let signal = self.listener.activate();
        self.on_listener_signal(signal);
    }

    /// Check-and-set of the single live session happens here, on the
    /// control task.
    fn start_escalation(&mut self) -> TriggerOutcome {
        let trigger = TriggerConfiguration::load(self.settings.as_ref());
        let outcome = self.orchestrator.trigger(&trigger);
        if matches!(outcome, TriggerOutcome::Started { .. }) {
            self.listener.suspend();
        }
        outcome
    }

    fn on_session_end(&mut self, end: Option<SessionEnd>) {
        let Some(end) = end else {
            return;
        };
        debug!(session = %end.session, state = ?end.state, "session over; resuming listener");
        self.listener.resume(end.resume_after);
        if let Some(guard) = &self.service_keep_alive {
            if let Err(e) = guard.renew() {
                warn!(error = %e, "listener keep-alive renewal failed");
            }
        }
    }

    fn status(&self) -> ServiceStatus {
        let trigger = TriggerConfiguration::load(self.settings.as_ref());
        ServiceStatus {
            listener_active: self.listener.is_active(),
            listener: self.listener.state(),
            session: self.orchestrator.session().cloned(),
            guardian_configured: trigger.has_guardian(),
            phrase: trigger.phrase,
        }
    }

    fn stop(&mut self) {
        if let Some(end) = self.orchestrator.abort(FailureReason::Shutdown) {
            info!(session = %end.session, "live session aborted by shutdown");
        }
        self.listener.deactivate();
        self.service_keep_alive = None;
    }
}

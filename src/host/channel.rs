//! Host command channel and router for native shell integrations.

use crate::capabilities::host::HostCapabilities;
use crate::capabilities::{Location, RecognitionErrorCode};
use crate::error::{HelpError, Result};
use crate::host::contract::{CommandEnvelope, CommandName, EventEnvelope, ResponseEnvelope};
use crate::service::HelpServiceHandle;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot};

/// Inputs the native shell feeds into the runtime's capabilities.
pub trait HostInputs: Send + Sync + 'static {
    /// Deliver a transcript. Returns whether recognition accepted it.
    fn feed_transcript(&self, text: &str, is_final: bool) -> bool;
    fn feed_recognizer_error(&self, code: RecognitionErrorCode) -> bool;
    /// Append microphone samples to a running capture.
    fn feed_samples(&self, samples: Vec<i16>) -> bool;
    fn update_location(&self, location: Location);
    /// Press cancel on the visible alert. Returns `false` when none is shown.
    fn press_cancel(&self) -> bool;
}

impl HostInputs for HostCapabilities {
    fn feed_transcript(&self, text: &str, is_final: bool) -> bool {
        self.recognizer.feed_transcript(text, is_final)
    }

    fn feed_recognizer_error(&self, code: RecognitionErrorCode) -> bool {
        self.recognizer.feed_error(code)
    }

    fn feed_samples(&self, samples: Vec<i16>) -> bool {
        self.frames.push(samples)
    }

    fn update_location(&self, location: Location) {
        self.location.update(location);
    }

    fn press_cancel(&self) -> bool {
        self.presenter.press_cancel()
    }
}

struct HostCommandRequest {
    envelope: CommandEnvelope,
    response_tx: oneshot::Sender<Result<ResponseEnvelope>>,
}

#[derive(Clone)]
pub struct HostCommandClient {
    request_tx: mpsc::Sender<HostCommandRequest>,
    event_tx: broadcast::Sender<EventEnvelope>,
}

impl HostCommandClient {
    pub async fn send(&self, envelope: CommandEnvelope) -> Result<ResponseEnvelope> {
        envelope.validate().map_err(|e| {
            HelpError::Config(format!(
                "invalid host command envelope {}: {}",
                envelope.request_id, e
            ))
        })?;

        let (response_tx, response_rx) = oneshot::channel();
        self.request_tx
            .send(HostCommandRequest {
                envelope,
                response_tx,
            })
            .await
            .map_err(|e| HelpError::Channel(format!("failed to send host command request: {e}")))?;

        response_rx
            .await
            .map_err(|e| HelpError::Channel(format!("host command response dropped: {e}")))?
    }

    #[must_use]
    pub fn subscribe_events(&self) -> broadcast::Receiver<EventEnvelope> {
        self.event_tx.subscribe()
    }
}

pub struct HostCommandServer<H: HostInputs> {
    request_rx: mpsc::Receiver<HostCommandRequest>,
    event_tx: broadcast::Sender<EventEnvelope>,
    service: HelpServiceHandle,
    inputs: Arc<H>,
}

/// Create a command channel that shares `event_tx` with the capability
/// adapters, so capability requests and command events reach the shell
/// through the same stream.
#[must_use]
pub fn command_channel<H: HostInputs>(
    request_capacity: usize,
    event_tx: broadcast::Sender<EventEnvelope>,
    service: HelpServiceHandle,
    inputs: Arc<H>,
) -> (HostCommandClient, HostCommandServer<H>) {
    let (request_tx, request_rx) = mpsc::channel(request_capacity.max(1));

    (
        HostCommandClient {
            request_tx,
            event_tx: event_tx.clone(),
        },
        HostCommandServer {
            request_rx,
            event_tx,
            service,
            inputs,
        },
    )
}

impl<H: HostInputs> HostCommandServer<H> {
    pub async fn run(mut self) {
        while let Some(request) = self.request_rx.recv().await {
            let response = self.route(&request.envelope).await;
            let _ = request.response_tx.send(response);
        }
    }

    /// Route a command envelope to the appropriate handler.
    pub async fn route(&self, envelope: &CommandEnvelope) -> Result<ResponseEnvelope> {
        let id = envelope.request_id.clone();
        match envelope.command {
            CommandName::HostPing => {
                let commands: Vec<&str> = CommandName::all().map(CommandName::as_str).collect();
                Ok(ResponseEnvelope::ok(
                    id,
                    serde_json::json!({"pong": true, "commands": commands}),
                ))
            }
            CommandName::RuntimeStatus => {
                let status = self.service.status().await?;
                Ok(ResponseEnvelope::ok(id, serde_json::to_value(status)?))
            }
            CommandName::RuntimeStop => {
                self.service.shutdown().await?;
                Ok(ResponseEnvelope::ok(id, serde_json::json!({"accepted": true})))
            }
            CommandName::ListenerActivate => {
                self.service.activate().await?;
                Ok(ResponseEnvelope::ok(id, serde_json::json!({"active": true})))
            }
            CommandName::ListenerDeactivate => {
                self.service.deactivate().await?;
                Ok(ResponseEnvelope::ok(id, serde_json::json!({"active": false})))
            }
            CommandName::ConfigGet => {
                let trigger = self.service.trigger_configuration();
                Ok(ResponseEnvelope::ok(
                    id,
                    serde_json::json!({
                        "phrase": trigger.phrase,
                        "guardian_number": trigger.guardian_contact,
                    }),
                ))
            }
            CommandName::ConfigSetPhrase => self.handle_set_phrase(envelope),
            CommandName::ConfigSetGuardian => self.handle_set_guardian(envelope),
            CommandName::EscalationTrigger => {
                let outcome = self.service.trigger().await?;
                Ok(ResponseEnvelope::ok(id, serde_json::to_value(outcome)?))
            }
            CommandName::EscalationContinue => {
                let applied = self.service.continue_escalation().await?;
                Ok(ResponseEnvelope::ok(id, serde_json::json!({"applied": applied})))
            }
            CommandName::EscalationCancel => self.handle_cancel(envelope).await,
            CommandName::RecognizerTranscript => self.handle_transcript(envelope),
            CommandName::RecognizerError => self.handle_recognizer_error(envelope),
            CommandName::RecorderSamples => self.handle_samples(envelope),
            CommandName::LocationUpdate => self.handle_location(envelope),
        }
    }

    fn handle_set_phrase(&self, envelope: &CommandEnvelope) -> Result<ResponseEnvelope> {
        let raw = parse_non_empty_field(&envelope.payload, "phrase", "config.set_phrase")?;
        let phrase = self.service.on_trigger_phrase_configured(&raw)?;

        self.emit_event(
            "config.phrase_changed",
            serde_json::json!({"request_id": envelope.request_id, "phrase": phrase}),
        );

        Ok(ResponseEnvelope::ok(
            envelope.request_id.clone(),
            serde_json::json!({"accepted": true, "phrase": phrase}),
        ))
    }

    fn handle_set_guardian(&self, envelope: &CommandEnvelope) -> Result<ResponseEnvelope> {
        let raw = parse_non_empty_field(&envelope.payload, "number", "config.set_guardian")?;
        let number = self.service.on_guardian_configured(&raw)?;

        self.emit_event(
            "config.guardian_changed",
            serde_json::json!({"request_id": envelope.request_id}),
        );

        Ok(ResponseEnvelope::ok(
            envelope.request_id.clone(),
            serde_json::json!({"accepted": true, "number": number}),
        ))
    }

    /// The alert's cancel button is the primary path; a direct cancel covers
    /// the case where no alert is on screen.
    async fn handle_cancel(&self, envelope: &CommandEnvelope) -> Result<ResponseEnvelope> {
        let cancelled = if self.inputs.press_cancel() {
            true
        } else {
            self.service.cancel().await?
        };
        Ok(ResponseEnvelope::ok(
            envelope.request_id.clone(),
            serde_json::json!({"cancelled": cancelled}),
        ))
    }

    fn handle_transcript(&self, envelope: &CommandEnvelope) -> Result<ResponseEnvelope> {
        let text = parse_non_empty_field(&envelope.payload, "text", "recognizer.transcript")?;
        let is_final = envelope
            .payload
            .get("final")
            .and_then(serde_json::Value::as_bool)
            .unwrap_or(true);
        let accepted = self.inputs.feed_transcript(&text, is_final);
        Ok(ResponseEnvelope::ok(
            envelope.request_id.clone(),
            serde_json::json!({"accepted": accepted}),
        ))
    }

    fn handle_recognizer_error(&self, envelope: &CommandEnvelope) -> Result<ResponseEnvelope> {
        let Some(raw) = envelope
            .payload
            .get("code")
            .and_then(serde_json::Value::as_i64)
        else {
            return Err(HelpError::Config(
                "recognizer.error requires payload.code (integer)".to_owned(),
            ));
        };
        let code = i32::try_from(raw).map_or(RecognitionErrorCode::Unknown(i32::MAX), |c| {
            RecognitionErrorCode::from_code(c)
        });
        let accepted = self.inputs.feed_recognizer_error(code);
        Ok(ResponseEnvelope::ok(
            envelope.request_id.clone(),
            serde_json::json!({"accepted": accepted, "code": code}),
        ))
    }

    fn handle_samples(&self, envelope: &CommandEnvelope) -> Result<ResponseEnvelope> {
        let samples = parse_samples(&envelope.payload)?;
        let count = samples.len();
        let accepted = self.inputs.feed_samples(samples);
        Ok(ResponseEnvelope::ok(
            envelope.request_id.clone(),
            serde_json::json!({"accepted": accepted, "samples": count}),
        ))
    }

    fn handle_location(&self, envelope: &CommandEnvelope) -> Result<ResponseEnvelope> {
        let location = parse_location(&envelope.payload)?;
        self.inputs.update_location(location);
        Ok(ResponseEnvelope::ok(
            envelope.request_id.clone(),
            serde_json::json!({"accepted": true}),
        ))
    }

    fn emit_event(&self, event: &str, payload: serde_json::Value) {
        let _ = self.event_tx.send(EventEnvelope::new(event, payload));
    }
}

fn parse_non_empty_field(
    payload: &serde_json::Value,
    field: &str,
    command: &str,
) -> Result<String> {
    let Some(raw) = payload.get(field).and_then(serde_json::Value::as_str) else {
        return Err(HelpError::Config(format!(
            "{command} requires payload.{field}"
        )));
    };
    let value = raw.trim();
    if value.is_empty() {
        return Err(HelpError::Config(format!(
            "{command} requires a non-empty payload.{field}"
        )));
    }
    Ok(value.to_owned())
}

fn parse_samples(payload: &serde_json::Value) -> Result<Vec<i16>> {
    let Some(raw) = payload.get("samples").and_then(serde_json::Value::as_array) else {
        return Err(HelpError::Config(
            "recorder.samples requires payload.samples (array)".to_owned(),
        ));
    };
    raw.iter()
        .map(|v| {
            v.as_i64()
                .and_then(|s| i16::try_from(s).ok())
                .ok_or_else(|| {
                    HelpError::Config(format!("recorder.samples: `{v}` is not a 16-bit sample"))
                })
        })
        .collect()
}

fn parse_location(payload: &serde_json::Value) -> Result<Location> {
    let coordinate = |field: &str, limit: f64| -> Result<f64> {
        let Some(value) = payload.get(field).and_then(serde_json::Value::as_f64) else {
            return Err(HelpError::Config(format!(
                "location.update requires payload.{field} (number)"
            )));
        };
        if !(-limit..=limit).contains(&value) {
            return Err(HelpError::Config(format!(
                "location.update: {field} {value} out of range"
            )));
        }
        Ok(value)
    };
    Ok(Location {
        latitude: coordinate("latitude", 90.0)?,
        longitude: coordinate("longitude", 180.0)?,
    })
}

//! Stdin/stdout JSON bridge for the host command channel.
//!
//! Reads newline-delimited JSON `CommandEnvelope` messages from stdin,
//! dispatches them through the `HostCommandServer` router, and writes
//! `ResponseEnvelope` and `EventEnvelope` messages as newline-delimited
//! JSON to stdout.
//!
//! Stdout is exclusively reserved for the JSON protocol; all diagnostic
//! output (tracing, logs) must be routed to stderr.

use crate::capabilities::host::{HostCapabilities, HostRequests};
use crate::config::HelpConfig;
use crate::error::HelpError;
use crate::host::channel::{HostCommandClient, command_channel};
use crate::host::contract::{CommandEnvelope, CommandName, EventEnvelope, ResponseEnvelope};
use crate::runtime::RuntimeEvent;
use crate::service::{HelpService, recognition_channel};
use crate::settings::SettingsStore;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, BufWriter};
use tokio::sync::{Mutex, broadcast};

/// Default request channel capacity for the stdio bridge.
const REQUEST_CAPACITY: usize = 64;

/// Default event broadcast channel capacity for the stdio bridge.
const EVENT_CAPACITY: usize = 256;

type SharedStdout = Arc<Mutex<BufWriter<tokio::io::Stdout>>>;

/// Run the stdin/stdout JSON bridge until stdin closes or a `runtime.stop`
/// command is received.
///
/// Four concurrent tasks operate in parallel:
///
/// 1. **Service** -- the [`HelpService`] control task.
/// 2. **Runtime forwarder** -- converts [`RuntimeEvent`]s into
///    `EventEnvelope`s on the shared event stream.
/// 3. **Event writer** -- writes every `EventEnvelope` (runtime events and
///    capability requests) as a JSON line to stdout.
/// 4. **Server** -- runs the `HostCommandServer` router loop.
///
/// The reader runs on the current task. When it finishes the service is shut
/// down, which aborts a live session.
pub async fn run_stdio_bridge(
    config: HelpConfig,
    settings: Arc<dyn SettingsStore>,
) -> crate::Result<()> {
    let (event_tx, _event_rx) = broadcast::channel(EVENT_CAPACITY);
    let (recognition_tx, recognition_rx) = recognition_channel();
    let host = Arc::new(HostCapabilities::new(
        &config,
        recognition_tx,
        HostRequests::new(event_tx.clone()),
    ));
    let (service, runtime) =
        HelpService::new(config, host.capabilities(), settings, recognition_rx);
    let (client, server) =
        command_channel(REQUEST_CAPACITY, event_tx.clone(), service.clone(), host);

    let stdout = tokio::io::stdout();
    let writer = Arc::new(Mutex::new(BufWriter::new(stdout)));

    let runtime_handle = tokio::spawn(runtime.run());
    let server_handle = tokio::spawn(server.run());
    let forward_handle = tokio::spawn(forward_runtime_events(service.subscribe(), event_tx));
    let event_handle = tokio::spawn(write_events(client.subscribe_events(), Arc::clone(&writer)));

    let reader_result = run_reader(client, Arc::clone(&writer)).await;

    // `runtime.stop` already asked the service to stop; on EOF we ask here.
    if let Err(e) = service.shutdown().await {
        tracing::debug!(error = %e, "help service already stopped");
    }
    let _ = runtime_handle.await;
    let _ = server_handle.await;
    forward_handle.abort();
    event_handle.abort();
    let _ = forward_handle.await;
    let _ = event_handle.await;

    reader_result
}

/// Wrap runtime events into the host event stream.
async fn forward_runtime_events(
    mut events: broadcast::Receiver<RuntimeEvent>,
    event_tx: broadcast::Sender<EventEnvelope>,
) {
    loop {
        match events.recv().await {
            Ok(event) => {
                let payload = match serde_json::to_value(&event) {
                    Ok(payload) => payload,
                    Err(e) => {
                        tracing::error!(error = %e, "failed to serialize runtime event; skipping");
                        continue;
                    }
                };
                let _ = event_tx.send(EventEnvelope::new(event.wire_name(), payload));
            }
            Err(broadcast::error::RecvError::Lagged(n)) => {
                tracing::warn!(lagged = n, "runtime event forwarder lagged");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

async fn write_events(mut event_rx: broadcast::Receiver<EventEnvelope>, writer: SharedStdout) {
    loop {
        match event_rx.recv().await {
            Ok(event_envelope) => match serde_json::to_string(&event_envelope) {
                Ok(json) => {
                    let mut w = writer.lock().await;
                    if let Err(e) = write_line(&mut w, &json).await {
                        tracing::warn!(
                            error = %e,
                            "failed to write event envelope to stdout; stopping event forwarder"
                        );
                        break;
                    }
                }
                Err(e) => {
                    tracing::error!(error = %e, "failed to serialize event envelope; skipping");
                }
            },
            Err(broadcast::error::RecvError::Lagged(n)) => {
                tracing::warn!(lagged = n, "event forwarder lagged; some events were dropped");
            }
            Err(broadcast::error::RecvError::Closed) => {
                tracing::info!("event broadcast channel closed; stopping event forwarder");
                break;
            }
        }
    }
}

/// Read stdin line-by-line, dispatch each command, and write responses.
async fn run_reader(client: HostCommandClient, writer: SharedStdout) -> crate::Result<()> {
    let stdin = tokio::io::stdin();
    let mut reader = BufReader::new(stdin);
    let mut line = String::new();

    loop {
        line.clear();
        let bytes_read = reader
            .read_line(&mut line)
            .await
            .map_err(|e| HelpError::Channel(format!("failed to read from stdin: {e}")))?;

        if bytes_read == 0 {
            tracing::info!("stdin closed (EOF); shutting down stdio bridge");
            break;
        }

        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let (response, is_stop) = match serde_json::from_str::<CommandEnvelope>(trimmed) {
            Ok(envelope) => {
                let is_stop = envelope.command == CommandName::RuntimeStop;
                let request_id = envelope.request_id.clone();
                let response = match client.send(envelope).await {
                    Ok(resp) => resp,
                    Err(e) => {
                        tracing::warn!(error = %e, %request_id, "host command failed");
                        ResponseEnvelope::error(request_id, e.to_string())
                    }
                };
                (response, is_stop)
            }
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    raw_line = %trimmed,
                    "failed to parse command envelope from stdin"
                );
                let response = ResponseEnvelope::error(
                    "parse-error",
                    format!("failed to parse command envelope: {e}"),
                );
                (response, false)
            }
        };
        write_response(&writer, &response).await?;

        if is_stop {
            tracing::info!("runtime.stop received; shutting down stdio bridge");
            break;
        }
    }

    Ok(())
}

async fn write_response(writer: &SharedStdout, response: &ResponseEnvelope) -> crate::Result<()> {
    let json = serde_json::to_string(response)?;
    let mut w = writer.lock().await;
    write_line(&mut w, &json).await
}

/// Write a single JSON line to the buffered writer and flush.
async fn write_line(writer: &mut BufWriter<tokio::io::Stdout>, json: &str) -> crate::Result<()> {
    writer
        .write_all(json.as_bytes())
        .await
        .map_err(|e| HelpError::Channel(format!("failed to write to stdout: {e}")))?;
    writer
        .write_all(b"\n")
        .await
        .map_err(|e| HelpError::Channel(format!("failed to write newline to stdout: {e}")))?;
    writer
        .flush()
        .await
        .map_err(|e| HelpError::Channel(format!("failed to flush stdout: {e}")))?;
    Ok(())
}

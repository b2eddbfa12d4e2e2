//! Host-delegated capabilities driven through the command channel.

use helpwatch::capabilities::host::{HostCapabilities, HostRequests};
use helpwatch::config::HelpConfig;
use helpwatch::escalation::{EscalationState, STATUS_GUARDIAN_MISSING};
use helpwatch::host::channel::{HostCommandClient, command_channel};
use helpwatch::host::contract::{CommandEnvelope, CommandName, EventEnvelope, ResponseEnvelope};
use helpwatch::runtime::RuntimeEvent;
use helpwatch::service::{HelpService, HelpServiceHandle, recognition_channel};
use helpwatch::settings::MemorySettingsStore;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

struct Bridge {
    client: HostCommandClient,
    handle: HelpServiceHandle,
    host_events: broadcast::Receiver<EventEnvelope>,
    _dir: tempfile::TempDir,
}

fn spawn_bridge() -> Bridge {
    let dir = tempfile::tempdir().unwrap();
    let mut config = HelpConfig::default();
    config.escalation.recordings_dir = Some(dir.path().to_path_buf());
    config.escalation.cancel_grace_ms = 0;

    let (event_tx, _) = broadcast::channel(256);
    let (recognition_tx, recognition_rx) = recognition_channel();
    let host = HostCapabilities::new(&config, recognition_tx, HostRequests::new(event_tx.clone()));
    let (handle, service) = HelpService::new(
        config,
        host.capabilities(),
        Arc::new(MemorySettingsStore::new()),
        recognition_rx,
    );
    let (client, server) = command_channel(16, event_tx, handle.clone(), Arc::new(host));
    let host_events = client.subscribe_events();
    tokio::spawn(service.run());
    tokio::spawn(server.run());
    Bridge {
        client,
        handle,
        host_events,
        _dir: dir,
    }
}

impl Bridge {
    async fn send(&self, id: &str, command: CommandName, payload: serde_json::Value) -> ResponseEnvelope {
        self.client
            .send(CommandEnvelope::new(id, command, payload))
            .await
            .unwrap()
    }

    async fn expect_host_event(&mut self, name: &str) -> EventEnvelope {
        let wait = async {
            loop {
                match self.host_events.recv().await {
                    Ok(event) if event.event == name => return event,
                    Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {}
                    Err(broadcast::error::RecvError::Closed) => panic!("host events closed"),
                }
            }
        };
        tokio::time::timeout(Duration::from_secs(10), wait)
            .await
            .unwrap_or_else(|_| panic!("no `{name}` host event"))
    }
}

async fn expect_runtime_event(
    events: &mut broadcast::Receiver<RuntimeEvent>,
    pred: impl Fn(&RuntimeEvent) -> bool,
) -> RuntimeEvent {
    let wait = async {
        loop {
            match events.recv().await {
                Ok(event) if pred(&event) => return event,
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => panic!("runtime events closed"),
            }
        }
    };
    tokio::time::timeout(Duration::from_secs(10), wait)
        .await
        .expect("runtime event")
}

#[tokio::test]
async fn spoken_phrase_escalates_and_host_cancel_stops_it() {
    let mut bridge = spawn_bridge();
    let mut runtime_events = bridge.handle.subscribe();

    let resp = bridge
        .send("g1", CommandName::ConfigSetGuardian, json!({"number": "+15551234567"}))
        .await;
    assert!(resp.ok, "{resp:?}");
    bridge.expect_host_event("config.guardian_changed").await;

    let resp = bridge.send("a1", CommandName::ListenerActivate, json!({})).await;
    assert!(resp.ok);
    bridge.expect_host_event("recognizer.start").await;

    let resp = bridge
        .send("t1", CommandName::RecognizerTranscript, json!({"text": "please help me"}))
        .await;
    assert_eq!(resp.payload["accepted"], json!(true));

    let started = expect_runtime_event(&mut runtime_events, |e| {
        matches!(e, RuntimeEvent::SessionStarted { .. })
    })
    .await;
    let RuntimeEvent::SessionStarted {
        guardian_contact, ..
    } = started
    else {
        unreachable!()
    };
    assert_eq!(guardian_contact, "+15551234567");

    let alert = bridge.expect_host_event("alert.show").await;
    assert!(alert.payload["message"].is_string());
    let sms = bridge.expect_host_event("sms.send").await;
    assert_eq!(sms.payload["number"], json!("+15551234567"));

    let status = bridge.send("s1", CommandName::RuntimeStatus, json!({})).await;
    assert_eq!(status.payload["session"]["state"]["state"], json!("notifying"));

    let resp = bridge.send("c1", CommandName::EscalationCancel, json!({})).await;
    assert_eq!(resp.payload["cancelled"], json!(true));
    let ended = expect_runtime_event(&mut runtime_events, |e| {
        matches!(e, RuntimeEvent::SessionEnded { .. })
    })
    .await;
    assert!(matches!(
        ended,
        RuntimeEvent::SessionEnded {
            state: EscalationState::Cancelled,
            ..
        }
    ));

    // Listening comes back once the session is over.
    bridge.expect_host_event("recognizer.start").await;

    let resp = bridge.send("c2", CommandName::EscalationCancel, json!({})).await;
    assert_eq!(resp.payload["cancelled"], json!(false));
}

#[tokio::test]
async fn transcript_without_guardian_shows_status() {
    let mut bridge = spawn_bridge();
    bridge.send("a1", CommandName::ListenerActivate, json!({})).await;
    bridge.expect_host_event("recognizer.start").await;

    bridge
        .send("t1", CommandName::RecognizerTranscript, json!({"text": "HELP"}))
        .await;
    let status = bridge.expect_host_event("status.show").await;
    assert_eq!(status.payload["message"], json!(STATUS_GUARDIAN_MISSING));

    let status = bridge.send("s1", CommandName::RuntimeStatus, json!({})).await;
    assert_eq!(status.payload["session"], serde_json::Value::Null);
    assert_eq!(status.payload["guardian_configured"], json!(false));
}

#[tokio::test]
async fn transcript_is_refused_while_not_listening() {
    let bridge = spawn_bridge();
    let resp = bridge
        .send("t1", CommandName::RecognizerTranscript, json!({"text": "help", "final": false}))
        .await;
    assert!(resp.ok);
    assert_eq!(resp.payload["accepted"], json!(false));
}

#[tokio::test]
async fn phrase_round_trips_through_config_commands() {
    let mut bridge = spawn_bridge();
    let resp = bridge
        .send("p1", CommandName::ConfigSetPhrase, json!({"phrase": "  Red Apple "}))
        .await;
    assert_eq!(resp.payload["phrase"], json!("red apple"));
    let changed = bridge.expect_host_event("config.phrase_changed").await;
    assert_eq!(changed.payload["request_id"], json!("p1"));

    let config = bridge.send("g1", CommandName::ConfigGet, json!({})).await;
    assert_eq!(config.payload["phrase"], json!("red apple"));
    assert_eq!(config.payload["guardian_number"], json!(""));
}

#[tokio::test]
async fn host_location_reaches_the_location_sms() {
    let mut bridge = spawn_bridge();
    bridge
        .send("g1", CommandName::ConfigSetGuardian, json!({"number": "+15551234567"}))
        .await;
    let resp = bridge
        .send(
            "l1",
            CommandName::LocationUpdate,
            json!({"latitude": 51.5, "longitude": -0.12}),
        )
        .await;
    assert!(resp.ok, "{resp:?}");

    let resp = bridge.send("e1", CommandName::EscalationTrigger, json!({})).await;
    assert_eq!(resp.payload["outcome"], json!("started"));

    bridge.expect_host_event("sms.send").await;
    let location_sms = bridge.expect_host_event("sms.send").await;
    let body = location_sms.payload["body"].as_str().unwrap();
    assert!(body.contains("51.5"), "{body}");

    let resp = bridge.send("c1", CommandName::EscalationCancel, json!({})).await;
    assert_eq!(resp.payload["cancelled"], json!(true));
}

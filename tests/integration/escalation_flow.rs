//! End-to-end escalation sequences through `HelpService`.

use crate::helpers::{
    GUARDIAN, Runtime, eventually, instant_config, spawn_runtime, spawn_runtime_with,
};
use helpwatch::capabilities::wav_recorder::WavRecorder;
use helpwatch::capabilities::{Location, RecognitionEvent};
use helpwatch::config::HelpConfig;
use helpwatch::error::CapabilityError;
use helpwatch::escalation::{
    EscalationState, FailureReason, STATUS_CANCELLED, STATUS_GUARDIAN_MISSING, TriggerOutcome,
};
use helpwatch::guards::SESSION_KEEP_ALIVE_TAG;
use helpwatch::runtime::RuntimeEvent;
use helpwatch::testing::MockAction;
use std::sync::Arc;
use std::time::Duration;

fn is_sms(a: &MockAction) -> bool {
    matches!(a, MockAction::Sms { .. })
}

fn is_call(a: &MockAction) -> bool {
    matches!(a, MockAction::Call { .. } | MockAction::Dialer { .. })
}

async fn wait_for_end(rt: &mut Runtime) -> EscalationState {
    match rt
        .next_event(|e| matches!(e, RuntimeEvent::SessionEnded { .. }))
        .await
    {
        RuntimeEvent::SessionEnded { state, .. } => state,
        _ => unreachable!(),
    }
}

#[tokio::test]
async fn phrase_match_runs_the_whole_sequence_in_order() {
    let mut rt = spawn_runtime(instant_config(), Some(GUARDIAN));
    rt.mocks.location.set_location(Some(Location {
        latitude: 22.5726,
        longitude: 88.3639,
    }));
    rt.handle.activate().await.unwrap();
    rt.feed(RecognitionEvent::Ready).await;
    rt.say("please HELP me").await;

    assert_eq!(wait_for_end(&mut rt).await, EscalationState::Completed);

    let log = &rt.mocks.log;
    let first_sms = log.position(is_sms).expect("emergency SMS sent");
    let call = log.position(is_call).expect("call placed");
    assert!(first_sms < call, "SMS must precede the call");
    assert_eq!(log.call_attempts(), 1);

    let bodies = log.sms_bodies();
    assert_eq!(bodies[0], HelpConfig::default().escalation.emergency_message);
    assert!(bodies[1].starts_with("My current location: https://www.google.com/maps"));

    // Upload link follows and the artifact is removed afterwards.
    eventually("audio link sent", || {
        log.sms_bodies()
            .iter()
            .any(|b| b.starts_with("URGENT: Emergency audio recording: https://"))
    })
    .await;
    let dir = rt.dir.path().to_path_buf();
    eventually("artifact deleted", || {
        std::fs::read_dir(&dir).map(|d| d.count()).unwrap_or(0) == 0
    })
    .await;

    assert!(!rt.mocks.keep_alive.is_held(SESSION_KEEP_ALIVE_TAG));
    assert!(!rt.mocks.recorder.is_recording());
    let status = rt.handle.status().await.unwrap();
    assert!(status.session.is_none());
}

#[tokio::test]
async fn short_emergency_message_goes_out_as_one_sms() {
    let mut config = instant_config();
    config.escalation.emergency_message = "Help needed now. Please call me back, urgent!".into();
    assert_eq!(config.escalation.emergency_message.chars().count(), 45);
    let mut rt = spawn_runtime(config, Some(GUARDIAN));

    rt.handle.trigger().await.unwrap();
    wait_for_end(&mut rt).await;

    let sent: Vec<_> = rt
        .mocks
        .log
        .actions()
        .into_iter()
        .filter_map(|a| match a {
            MockAction::Sms { number, body } if body.starts_with("Help needed") => {
                Some((number, body))
            }
            _ => None,
        })
        .collect();
    assert_eq!(
        sent,
        vec![(
            GUARDIAN.to_owned(),
            "Help needed now. Please call me back, urgent!".to_owned()
        )]
    );
}

#[tokio::test]
async fn long_audio_link_is_split_and_delivered_in_order() {
    let mut rt = spawn_runtime(instant_config(), Some(GUARDIAN));
    let url = format!("https://storage.example.com/{}", "a".repeat(147));
    rt.mocks.storage.respond_with(Ok(url.clone()));
    let expected = format!("URGENT: Emergency audio recording: {url}");
    assert_eq!(expected.chars().count(), 210);

    rt.handle.trigger().await.unwrap();
    wait_for_end(&mut rt).await;

    let log = rt.mocks.log.clone();
    eventually("both link parts sent", || {
        log.sms_bodies()
            .iter()
            .any(|b| b.starts_with("URGENT: Emergency audio"))
            && log.sms_count() >= 3
    })
    .await;

    let bodies = log.sms_bodies();
    let start = bodies
        .iter()
        .position(|b| b.starts_with("URGENT: Emergency audio"))
        .unwrap();
    let parts = &bodies[start..];
    assert_eq!(parts.len(), 2);
    assert_eq!(parts[0].chars().count(), 153);
    assert_eq!(parts.concat(), expected);
}

#[tokio::test]
async fn failed_upload_keeps_order_and_artifact() {
    let mut rt = spawn_runtime(instant_config(), Some(GUARDIAN));
    rt.mocks
        .storage
        .respond_with(Err(CapabilityError::Failed("503 from bucket".into())));

    rt.handle.trigger().await.unwrap();
    let upload = rt
        .next_event(|e| matches!(e, RuntimeEvent::UploadFinished { .. }))
        .await;
    assert!(matches!(upload, RuntimeEvent::UploadFinished { url: None, .. }));

    let log = rt.mocks.log.clone();
    eventually("call placed", || log.call_attempts() == 1).await;
    assert!(log.position(is_sms) < log.position(is_call));
    assert!(
        !log.sms_bodies().iter().any(|b| b.starts_with("URGENT")),
        "no link without an upload"
    );
    assert!(
        log.statuses()
            .iter()
            .any(|s| s.starts_with("Upload failed"))
    );
    let remaining = std::fs::read_dir(rt.dir.path()).unwrap().count();
    assert_eq!(remaining, 1, "local artifact is kept for a later retry");
}

#[tokio::test]
async fn denied_call_permission_opens_the_dialer() {
    let mut rt = spawn_runtime(instant_config(), Some(GUARDIAN));
    rt.mocks.caller.deny_call_permission();

    rt.handle.trigger().await.unwrap();
    assert_eq!(wait_for_end(&mut rt).await, EscalationState::Completed);

    let log = &rt.mocks.log;
    assert_eq!(log.count(|a| matches!(a, MockAction::Call { .. })), 0);
    assert_eq!(log.count(|a| matches!(a, MockAction::Dialer { .. })), 1);
}

#[tokio::test]
async fn recorder_failure_skips_capture_but_still_calls() {
    let mut rt = spawn_runtime(instant_config(), Some(GUARDIAN));
    rt.mocks
        .recorder
        .fail_start_with(CapabilityError::Unavailable("mic busy".into()));

    rt.handle.trigger().await.unwrap();
    assert_eq!(wait_for_end(&mut rt).await, EscalationState::Completed);

    let log = &rt.mocks.log;
    assert_eq!(log.call_attempts(), 1);
    assert_eq!(log.count(|a| matches!(a, MockAction::Upload { .. })), 0);
    assert!(!rt.mocks.recorder.is_recording());
}

#[tokio::test]
async fn repeated_triggers_never_create_a_second_session() {
    let mut rt = spawn_runtime(HelpConfig::default(), Some(GUARDIAN));
    rt.handle.activate().await.unwrap();

    rt.say("help").await;
    let started = rt
        .next_event(|e| matches!(e, RuntimeEvent::SessionStarted { .. }))
        .await;
    let RuntimeEvent::SessionStarted { session, .. } = started else {
        unreachable!()
    };

    // The listener is suspended; more matches are dropped.
    rt.say("help help").await;
    for _ in 0..3 {
        assert_eq!(
            rt.handle.trigger().await.unwrap(),
            TriggerOutcome::AlreadyActive { session }
        );
    }
    let extra = rt
        .drain_events()
        .into_iter()
        .filter(|e| matches!(e, RuntimeEvent::SessionStarted { .. }))
        .count();
    assert_eq!(extra, 0);
    assert_eq!(
        rt.mocks
            .log
            .count(|a| matches!(a, MockAction::Alert { .. })),
        1
    );

    assert!(rt.handle.cancel().await.unwrap());
}

#[tokio::test(start_paused = true)]
async fn missing_guardian_aborts_and_keeps_listening() {
    let mut rt = spawn_runtime(HelpConfig::default(), None);
    rt.handle.activate().await.unwrap();
    rt.feed(RecognitionEvent::Ready).await;
    rt.say("help").await;

    let rejected = rt
        .next_event(|e| matches!(e, RuntimeEvent::EscalationRejected { .. }))
        .await;
    assert!(matches!(
        rejected,
        RuntimeEvent::EscalationRejected {
            reason: FailureReason::GuardianMissing
        }
    ));
    assert!(
        rt.mocks
            .log
            .statuses()
            .contains(&STATUS_GUARDIAN_MISSING.to_owned())
    );

    rt.feed(RecognitionEvent::End).await;
    tokio::time::sleep(Duration::from_millis(600)).await;
    assert_eq!(rt.mocks.log.recognizer_starts(), 2);
    assert_eq!(rt.mocks.log.sms_count(), 0);
    assert_eq!(rt.mocks.log.call_attempts(), 0);
    assert!(rt.handle.status().await.unwrap().session.is_none());
}

#[tokio::test(start_paused = true)]
async fn cancel_two_seconds_into_recording_places_no_call() {
    let mut rt = spawn_runtime(HelpConfig::default(), Some(GUARDIAN));
    rt.handle.activate().await.unwrap();
    rt.say("help").await;

    rt.next_event(|e| {
        matches!(
            e,
            RuntimeEvent::SessionStateChanged {
                state: EscalationState::Recording,
                ..
            }
        )
    })
    .await;
    assert!(rt.mocks.recorder.is_recording());

    tokio::time::sleep(Duration::from_secs(2)).await;
    assert!(rt.mocks.presenter.press_cancel());

    let ended = rt
        .next_event(|e| matches!(e, RuntimeEvent::SessionEnded { .. }))
        .await;
    assert!(matches!(
        ended,
        RuntimeEvent::SessionEnded {
            state: EscalationState::Cancelled,
            ..
        }
    ));
    eventually("recorder released", || !rt.mocks.recorder.is_recording()).await;
    assert!(!rt.mocks.keep_alive.is_held(SESSION_KEEP_ALIVE_TAG));
    assert!(rt.mocks.log.statuses().contains(&STATUS_CANCELLED.to_owned()));

    // Past every escalation deadline: still no call, no upload.
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(rt.mocks.log.call_attempts(), 0);
    assert_eq!(
        rt.mocks
            .log
            .count(|a| matches!(a, MockAction::Upload { .. })),
        0
    );
    // Listening resumed after the grace delay.
    assert!(rt.mocks.recognizer.is_listening());
}

#[tokio::test(start_paused = true)]
async fn cancel_while_notifying_skips_recording_and_call() {
    let mut rt = spawn_runtime(HelpConfig::default(), Some(GUARDIAN));
    rt.handle.trigger().await.unwrap();
    tokio::time::sleep(Duration::from_secs(5)).await;

    assert!(rt.handle.cancel().await.unwrap());
    assert!(!rt.handle.cancel().await.unwrap(), "second cancel is a no-op");

    tokio::time::sleep(Duration::from_secs(60)).await;
    let log = &rt.mocks.log;
    assert_eq!(log.call_attempts(), 0);
    assert_eq!(
        log.count(|a| matches!(a, MockAction::RecorderStart { .. })),
        0
    );
    assert_eq!(
        log.sms_bodies()[0],
        HelpConfig::default().escalation.emergency_message
    );
    assert_eq!(rt.mocks.keep_alive.held_count(), 0);
    let _ = rt.drain_events();
}

#[tokio::test(start_paused = true)]
async fn continue_skips_the_notify_window() {
    let mut rt = spawn_runtime(HelpConfig::default(), Some(GUARDIAN));
    rt.handle.trigger().await.unwrap();

    assert!(rt.handle.continue_escalation().await.unwrap());
    assert!(rt.mocks.recorder.is_recording());
    assert!(
        !rt.handle.continue_escalation().await.unwrap(),
        "continue only applies while notifying"
    );
    assert!(rt.handle.cancel().await.unwrap());
    let _ = rt.drain_events();
}

#[tokio::test(start_paused = true)]
async fn deactivating_mid_session_lets_the_session_finish() {
    let mut rt = spawn_runtime(HelpConfig::default(), Some(GUARDIAN));
    rt.handle.activate().await.unwrap();
    rt.say("help").await;
    rt.next_event(|e| matches!(e, RuntimeEvent::SessionStarted { .. }))
        .await;

    rt.handle.deactivate().await.unwrap();
    let ended = rt
        .next_event(|e| matches!(e, RuntimeEvent::SessionEnded { .. }))
        .await;
    assert!(matches!(
        ended,
        RuntimeEvent::SessionEnded {
            state: EscalationState::Completed,
            ..
        }
    ));
    assert_eq!(rt.mocks.log.call_attempts(), 1);

    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(rt.mocks.log.recognizer_starts(), 1, "listener stays off");
}

#[tokio::test(start_paused = true)]
async fn shutdown_aborts_a_live_session() {
    let mut rt = spawn_runtime(HelpConfig::default(), Some(GUARDIAN));
    rt.handle.trigger().await.unwrap();
    rt.handle.continue_escalation().await.unwrap();
    assert!(rt.mocks.recorder.is_recording());

    rt.handle.shutdown().await.unwrap();
    let ended = rt
        .next_event(|e| matches!(e, RuntimeEvent::SessionEnded { .. }))
        .await;
    assert!(matches!(
        ended,
        RuntimeEvent::SessionEnded {
            state: EscalationState::Failed(FailureReason::Shutdown),
            ..
        }
    ));
    (&mut rt.task).await.unwrap();
    eventually("recorder released", || !rt.mocks.recorder.is_recording()).await;
    assert_eq!(rt.mocks.keep_alive.held_count(), 0);
    assert_eq!(rt.mocks.log.call_attempts(), 0);
}

#[tokio::test]
async fn silent_capture_is_not_uploaded_but_the_call_goes_out() {
    let mut rt = spawn_runtime_with(instant_config(), Some(GUARDIAN), |caps| {
        caps.recorder = Arc::new(WavRecorder::default());
    });
    rt.handle.trigger().await.unwrap();

    // The upload report and the session end race; collect both.
    let (mut upload, mut end) = (None, None);
    while upload.is_none() || end.is_none() {
        match rt
            .next_event(|e| {
                matches!(
                    e,
                    RuntimeEvent::UploadFinished { .. } | RuntimeEvent::SessionEnded { .. }
                )
            })
            .await
        {
            RuntimeEvent::UploadFinished { url, error, .. } => upload = Some((url, error)),
            RuntimeEvent::SessionEnded { state, .. } => end = Some(state),
            _ => unreachable!(),
        }
    }
    let (url, error) = upload.unwrap();
    assert_eq!(url, None);
    assert!(error.is_some_and(|e| e.contains("no audio")));
    assert_eq!(end, Some(EscalationState::Completed));

    let log = &rt.mocks.log;
    assert_eq!(log.count(|a| matches!(a, MockAction::Upload { .. })), 0);
    assert_eq!(log.call_attempts(), 1);
    assert!(
        !log.sms_bodies()
            .iter()
            .any(|b| b.starts_with("URGENT: Emergency audio recording"))
    );
}

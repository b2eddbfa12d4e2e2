//! Recognition loop behavior through `HelpService`.

use crate::helpers::{GUARDIAN, spawn_runtime};
use helpwatch::capabilities::{RecognitionErrorCode, RecognitionEvent};
use helpwatch::config::HelpConfig;
use helpwatch::error::CapabilityError;
use helpwatch::guards::LISTENER_KEEP_ALIVE_TAG;
use helpwatch::listener::ListenerState;
use helpwatch::runtime::RuntimeEvent;
use helpwatch::service::STATUS_MIC_PERMISSION;
use std::time::Duration;

fn matches_count(events: &[RuntimeEvent]) -> usize {
    events
        .iter()
        .filter(|e| matches!(e, RuntimeEvent::PhraseMatched { .. }))
        .count()
}

#[tokio::test(start_paused = true)]
async fn mixed_case_candidate_matches_exactly_once() {
    let mut rt = spawn_runtime(HelpConfig::default(), Some(GUARDIAN));
    rt.handle.activate().await.unwrap();
    rt.feed(RecognitionEvent::FinalText {
        candidates: vec!["please HELP me".into(), "help help".into()],
    })
    .await;

    let matched = rt
        .next_event(|e| matches!(e, RuntimeEvent::PhraseMatched { .. }))
        .await;
    assert!(matches!(
        matched,
        RuntimeEvent::PhraseMatched { ref candidate } if candidate == "please HELP me"
    ));
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(matches_count(&rt.drain_events()), 0);
    assert!(rt.handle.cancel().await.unwrap());
}

#[tokio::test(start_paused = true)]
async fn five_network_errors_back_off_five_times() {
    let mut rt = spawn_runtime(HelpConfig::default(), Some(GUARDIAN));
    rt.handle.activate().await.unwrap();
    assert_eq!(rt.mocks.log.recognizer_starts(), 1);

    for attempt in 1..=5_u32 {
        rt.feed(RecognitionEvent::Error {
            code: RecognitionErrorCode::Network,
        })
        .await;
        let backoff = rt
            .next_event(|e| matches!(e, RuntimeEvent::ListenerBackoff { .. }))
            .await;
        assert!(matches!(
            backoff,
            RuntimeEvent::ListenerBackoff { attempt: a, delay_ms: 2_000 } if a == attempt
        ));
        // Nothing restarts before the backoff is over.
        tokio::time::sleep(Duration::from_millis(1_900)).await;
        assert_eq!(rt.mocks.log.recognizer_starts(), attempt as usize);
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(rt.mocks.log.recognizer_starts(), attempt as usize + 1);
    }

    let events = rt.drain_events();
    assert_eq!(matches_count(&events), 0);
    assert!(
        !events
            .iter()
            .any(|e| matches!(e, RuntimeEvent::ListenerPermissionDenied { .. }))
    );
    assert!(!rt.mocks.log.statuses().contains(&STATUS_MIC_PERMISSION.to_owned()));
    assert_eq!(rt.mocks.log.sms_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn end_restarts_after_the_short_delay() {
    let rt = spawn_runtime(HelpConfig::default(), Some(GUARDIAN));
    rt.handle.activate().await.unwrap();
    rt.feed(RecognitionEvent::Ready).await;
    rt.feed(RecognitionEvent::End).await;

    tokio::time::sleep(Duration::from_millis(400)).await;
    assert_eq!(rt.mocks.log.recognizer_starts(), 1);
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(rt.mocks.log.recognizer_starts(), 2);
    assert_eq!(
        rt.handle.status().await.unwrap().listener,
        ListenerState::Listening
    );
}

#[tokio::test(start_paused = true)]
async fn zero_restart_delay_is_clamped() {
    let mut config = HelpConfig::default();
    config.listener.restart_delay_ms = 0;
    let rt = spawn_runtime(config, Some(GUARDIAN));
    rt.handle.activate().await.unwrap();

    for _ in 0..3 {
        rt.feed(RecognitionEvent::End).await;
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    // A recognizer that re-ends immediately cannot spin the loop.
    assert_eq!(rt.mocks.log.recognizer_starts(), 1);
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(rt.mocks.log.recognizer_starts(), 2);
}

#[tokio::test(start_paused = true)]
async fn permission_denied_parks_until_reactivated() {
    let mut rt = spawn_runtime(HelpConfig::default(), Some(GUARDIAN));
    rt.handle.activate().await.unwrap();
    rt.feed(RecognitionEvent::Error {
        code: RecognitionErrorCode::InsufficientPermissions,
    })
    .await;

    rt.next_event(|e| matches!(e, RuntimeEvent::ListenerPermissionDenied { .. }))
        .await;
    assert!(
        rt.mocks
            .log
            .statuses()
            .contains(&STATUS_MIC_PERMISSION.to_owned())
    );

    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(rt.mocks.log.recognizer_starts(), 1, "no automatic retry");

    rt.handle.activate().await.unwrap();
    assert_eq!(rt.mocks.log.recognizer_starts(), 2);
}

#[tokio::test(start_paused = true)]
async fn refused_recognizer_start_reports_permission() {
    let mut rt = spawn_runtime(HelpConfig::default(), Some(GUARDIAN));
    rt.mocks
        .recognizer
        .fail_start_with(Some(CapabilityError::PermissionDenied("RECORD_AUDIO".into())));

    rt.handle.activate().await.unwrap();
    rt.next_event(|e| matches!(e, RuntimeEvent::ListenerPermissionDenied { .. }))
        .await;
    let status = rt.handle.status().await.unwrap();
    assert!(matches!(
        status.listener,
        ListenerState::ErrorBackoff { .. }
    ));
}

#[tokio::test]
async fn activate_holds_keep_alive_until_deactivated() {
    let rt = spawn_runtime(HelpConfig::default(), Some(GUARDIAN));
    rt.handle.activate().await.unwrap();
    rt.handle.activate().await.unwrap();
    assert!(rt.mocks.keep_alive.is_held(LISTENER_KEEP_ALIVE_TAG));
    assert_eq!(rt.mocks.log.recognizer_starts(), 1, "activate is idempotent");

    rt.handle.deactivate().await.unwrap();
    assert!(!rt.mocks.keep_alive.is_held(LISTENER_KEEP_ALIVE_TAG));
    assert!(!rt.mocks.recognizer.is_listening());

    let status = rt.handle.status().await.unwrap();
    assert!(!status.listener_active);
    assert_eq!(status.listener, ListenerState::Idle);
}

#[tokio::test(start_paused = true)]
async fn phrase_change_applies_to_the_next_batch() {
    let mut rt = spawn_runtime(HelpConfig::default(), Some(GUARDIAN));
    rt.handle.activate().await.unwrap();
    rt.handle.on_trigger_phrase_configured("Red Apple").unwrap();

    rt.say("help me").await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(matches_count(&rt.drain_events()), 0);

    rt.say("RED APPLE now").await;
    rt.next_event(|e| matches!(e, RuntimeEvent::SessionStarted { .. }))
        .await;
    assert!(rt.handle.cancel().await.unwrap());
}

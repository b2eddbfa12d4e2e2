//! `HttpStorage` against a mock object store.

use crate::helpers::{GUARDIAN, eventually, instant_config, spawn_runtime_with};
use helpwatch::capabilities::Storage;
use helpwatch::capabilities::http_storage::HttpStorage;
use helpwatch::config::StorageConfig;
use helpwatch::error::CapabilityError;
use helpwatch::runtime::RuntimeEvent;
use std::sync::Arc;
use wiremock::matchers::{header, method, path_regex};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn storage_config(server: &MockServer) -> StorageConfig {
    StorageConfig {
        upload_url: format!("{}/bucket", server.uri()),
        public_url: "https://cdn.example.org/bucket".into(),
        token: Some("secret-token".into()),
        ..StorageConfig::default()
    }
}

fn artifact(dir: &tempfile::TempDir) -> std::path::PathBuf {
    let path = dir.path().join("clip.wav");
    std::fs::write(&path, b"RIFF....WAVEfmt ").unwrap();
    path
}

#[tokio::test]
async fn put_returns_public_link() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path_regex(r"^/bucket/emergency_audio/\d+_clip\.wav$"))
        .and(header("content-type", "audio/wav"))
        .and(header("authorization", "Bearer secret-token"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let storage = HttpStorage::new(storage_config(&server)).unwrap();
    let link = storage.upload(&artifact(&dir)).await.unwrap();

    assert!(
        link.starts_with("https://cdn.example.org/bucket/emergency_audio/"),
        "{link}"
    );
    assert!(link.ends_with("_clip.wav"), "{link}");
}

#[tokio::test]
async fn forbidden_maps_to_permission_denied() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .respond_with(ResponseTemplate::new(403))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let storage = HttpStorage::new(storage_config(&server)).unwrap();
    let err = storage.upload(&artifact(&dir)).await.unwrap_err();
    assert!(matches!(err, CapabilityError::PermissionDenied(_)), "{err:?}");
}

#[tokio::test]
async fn server_error_is_a_failure_with_body() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .respond_with(ResponseTemplate::new(500).set_body_string("bucket on fire"))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let storage = HttpStorage::new(storage_config(&server)).unwrap();
    let err = storage.upload(&artifact(&dir)).await.unwrap_err();
    match err {
        CapabilityError::Failed(detail) => assert!(detail.contains("bucket on fire"), "{detail}"),
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn missing_artifact_is_unavailable() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    let storage = HttpStorage::new(storage_config(&server)).unwrap();
    let err = storage
        .upload(&dir.path().join("gone.wav"))
        .await
        .unwrap_err();
    assert!(matches!(err, CapabilityError::Unavailable(_)), "{err:?}");
    assert!(server.received_requests().await.unwrap_or_default().is_empty());
}

#[tokio::test]
async fn session_sends_link_from_real_storage() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path_regex(r"^/bucket/emergency_audio/\d+_.+\.wav$"))
        .respond_with(ResponseTemplate::new(201))
        .expect(1)
        .mount(&server)
        .await;

    let storage = Arc::new(HttpStorage::new(storage_config(&server)).unwrap());
    let mut rt = spawn_runtime_with(instant_config(), Some(GUARDIAN), |caps| {
        caps.storage = storage;
    });
    rt.handle.trigger().await.unwrap();

    let finished = rt
        .next_event(|e| matches!(e, RuntimeEvent::UploadFinished { .. }))
        .await;
    let RuntimeEvent::UploadFinished { url, error, .. } = finished else {
        unreachable!()
    };
    assert_eq!(error, None);
    let url = url.unwrap();
    assert!(url.starts_with("https://cdn.example.org/bucket/"), "{url}");

    let log = rt.mocks.log.clone();
    let expected = url.clone();
    eventually("link SMS sent", move || {
        log.sms_bodies().iter().any(|b| b.contains(&expected))
    })
    .await;
}

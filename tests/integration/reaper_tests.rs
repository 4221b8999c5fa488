//! Integration tests for the orphan reaper sweep.

use std::sync::Arc;

use maestro_term::host::HostEvent;
use maestro_term::remote::api::MaestroClient;
use maestro_term::remote::reaper;

use super::test_helpers::{hydrated_registry, session, FakeHost, StubServer};

fn remote_listing() -> String {
    serde_json::json!([
        { "id": "r1", "status": "working" },
        { "id": "r2", "status": "idle" },
        { "id": "r3", "status": "stopped" },
    ])
    .to_string()
}

async fn stub() -> StubServer {
    StubServer::start(|method, path| match (method, path) {
        ("GET", "/api/sessions") => (200, remote_listing()),
        ("PATCH", _) => (200, "{}".into()),
        _ => (404, "{}".into()),
    })
    .await
}

#[tokio::test]
async fn unbacked_active_remote_session_is_stopped_exactly_once() {
    let server = stub().await;
    let api = MaestroClient::new(server.base_url()).expect("client");

    let host = FakeHost::new();
    let test = hydrated_registry(host.as_dyn()).await;
    // Local session backs r2; nothing backs r1.
    let mut local = session("1", "shell");
    local.maestro_session_id = Some("r2".into());
    test.handle.insert(local).await.expect("insert");

    let retired = reaper::sweep(&api, &test.handle).await.expect("sweep");
    assert_eq!(retired, 1);

    let patches: Vec<_> = server
        .recorded()
        .into_iter()
        .filter(|r| r.method == "PATCH")
        .collect();
    assert_eq!(patches.len(), 1);
    assert_eq!(patches[0].path, "/api/sessions/r1");
    assert!(patches[0].body.contains("stopped"));
}

#[tokio::test]
async fn inactive_remote_sessions_are_left_alone() {
    let server = StubServer::start(|method, path| match (method, path) {
        ("GET", "/api/sessions") => (
            200,
            serde_json::json!([
                { "id": "r3", "status": "stopped" },
                { "id": "r4", "status": "completed" },
            ])
            .to_string(),
        ),
        ("PATCH", _) => (200, "{}".into()),
        _ => (404, "{}".into()),
    })
    .await;
    let api = MaestroClient::new(server.base_url()).expect("client");

    let host = FakeHost::new();
    let test = hydrated_registry(host.as_dyn()).await;

    let retired = reaper::sweep(&api, &test.handle).await.expect("sweep");
    assert_eq!(retired, 0);
    assert!(server.recorded().iter().all(|r| r.method != "PATCH"));
}

#[tokio::test]
async fn exited_local_session_no_longer_backs_its_remote_record() {
    let server = stub().await;
    let api = MaestroClient::new(server.base_url()).expect("client");

    let host = FakeHost::new();
    let test = hydrated_registry(host.as_dyn()).await;
    let mut local = session("1", "shell");
    local.maestro_session_id = Some("r2".into());
    test.handle.insert(local).await.expect("insert");
    test.handle
        .handle_host_event(HostEvent::Exit {
            id: "1".into(),
            code: Some(0),
        })
        .await
        .expect("exit");

    let retired = reaper::sweep(&api, &test.handle).await.expect("sweep");
    // Both r1 and the now-unbacked r2 get retired.
    assert_eq!(retired, 2);
}

#[tokio::test]
async fn sweep_surfaces_listing_failures_for_retry() {
    // Nothing listening on this port.
    let api = Arc::new(MaestroClient::new("http://127.0.0.1:9").expect("client"));
    let host = FakeHost::new();
    let test = hydrated_registry(host.as_dyn()).await;

    assert!(reaper::sweep(&api, &test.handle).await.is_err());
}

//! Integration tests for startup reconciliation.
//!
//! The central scenario: persisted session A whose backend id is still in
//! the alive table, and B whose backend is gone. A must be reconnected
//! without spawning; B must be recreated with its restore command
//! replayed exactly once.

use maestro_term::host::AliveProcess;
use maestro_term::persistence::state::{PersistedProjectV1, PersistedSessionV1, PersistedStateV1};
use maestro_term::reconcile;

use super::test_helpers::{fast_settings, spawn_registry, FakeHost};

fn persisted(
    persist_id: &str,
    backend: Option<&str>,
    restore: Option<&str>,
    created_at: u64,
) -> PersistedSessionV1 {
    PersistedSessionV1 {
        persist_id: persist_id.into(),
        project_id: "proj".into(),
        name: persist_id.into(),
        cwd: Some("/work".into()),
        launch_command: Some("claude".into()),
        restore_command: restore.map(Into::into),
        persistent: Some(false),
        created_at,
        maestro_session_id: None,
        backend_session_id: backend.map(Into::into),
    }
}

fn state_with(sessions: Vec<PersistedSessionV1>) -> PersistedStateV1 {
    let mut state = PersistedStateV1::empty();
    state.projects.push(PersistedProjectV1 {
        id: "proj".into(),
        title: "Project".into(),
        base_path: Some("/work".into()),
    });
    state.active_project_id = "proj".into();
    state.sessions = sessions;
    state
}

#[tokio::test]
async fn alive_session_reconnects_and_dead_session_recreates() {
    let host = FakeHost::with_alive(vec![AliveProcess {
        id: "1".into(),
        cwd: Some("/live".into()),
        command: Some("claude --continue".into()),
    }]);
    let test = spawn_registry(host.as_dyn(), fast_settings());

    let state = state_with(vec![
        persisted("a", Some("1"), Some("claude --continue"), 10),
        persisted("b", Some("2"), Some("make dev"), 20),
    ]);
    let report = reconcile::run(&host.as_dyn(), &test.handle, &state)
        .await
        .expect("reconcile");

    assert_eq!(report.reconnected, 1);
    assert_eq!(report.recreated, 1);
    assert_eq!(report.failed, 0);
    assert!(!report.default_created);

    // A adopted the live process: nothing spawned for it, live attributes win.
    let a = test
        .handle
        .find_by_persist_id("a")
        .await
        .expect("query")
        .expect("a restored");
    assert_eq!(a.id, "1");
    assert_eq!(a.cwd.as_deref(), Some("/live"));

    // Exactly one spawn happened, for B.
    assert_eq!(host.state().created.len(), 1);
    let b = test
        .handle
        .find_by_persist_id("b")
        .await
        .expect("query")
        .expect("b restored");
    assert_ne!(b.id, "2", "B must run on a fresh backend process");

    // B's restore command was replayed exactly once, with a single Enter.
    let writes = host.state().writes.clone();
    assert_eq!(writes.len(), 1);
    assert_eq!(writes[0].0, b.id);
    assert_eq!(writes[0].1, b"make dev\r".to_vec());
}

#[tokio::test]
async fn reconnected_sessions_never_replay_their_restore_command() {
    let host = FakeHost::with_alive(vec![AliveProcess {
        id: "1".into(),
        cwd: None,
        command: None,
    }]);
    let test = spawn_registry(host.as_dyn(), fast_settings());

    let state = state_with(vec![persisted("a", Some("1"), Some("claude --continue"), 10)]);
    let report = reconcile::run(&host.as_dyn(), &test.handle, &state)
        .await
        .expect("reconcile");

    assert_eq!(report.reconnected, 1);
    assert!(host.state().writes.is_empty(), "reconnect must not re-issue commands");
    assert!(host.state().created.is_empty());
}

#[tokio::test]
async fn unclaimed_processes_are_closed_as_orphans() {
    let host = FakeHost::with_alive(vec![
        AliveProcess {
            id: "1".into(),
            cwd: None,
            command: None,
        },
        AliveProcess {
            id: "9".into(),
            cwd: None,
            command: None,
        },
    ]);
    let test = spawn_registry(host.as_dyn(), fast_settings());

    let state = state_with(vec![persisted("a", Some("1"), None, 10)]);
    let report = reconcile::run(&host.as_dyn(), &test.handle, &state)
        .await
        .expect("reconcile");

    assert_eq!(report.orphans_closed, 1);
    assert_eq!(host.state().close_calls, vec!["9".to_owned()]);
}

#[tokio::test]
async fn one_failed_restore_does_not_block_the_rest() {
    let host = FakeHost::new();
    // The first spawn fails; the second succeeds.
    host.state().fail_creates = 1;
    let test = spawn_registry(host.as_dyn(), fast_settings());

    let state = state_with(vec![
        persisted("first", None, None, 10),
        persisted("second", None, None, 20),
    ]);
    let report = reconcile::run(&host.as_dyn(), &test.handle, &state)
        .await
        .expect("reconcile");

    assert_eq!(report.failed, 1);
    assert_eq!(report.recreated, 1);
    assert!(test
        .handle
        .find_by_persist_id("first")
        .await
        .expect("query")
        .is_none());
    assert!(test
        .handle
        .find_by_persist_id("second")
        .await
        .expect("query")
        .is_some());
}

#[tokio::test]
async fn projects_without_sessions_get_one_default_session() {
    let host = FakeHost::new();
    let test = spawn_registry(host.as_dyn(), fast_settings());

    let state = state_with(Vec::new());
    let report = reconcile::run(&host.as_dyn(), &test.handle, &state)
        .await
        .expect("reconcile");

    assert!(report.default_created);
    let sessions = test.handle.list_by_project("proj").await.expect("list");
    assert_eq!(sessions.len(), 1);
    // The default session opens in the active project's directory.
    assert_eq!(host.state().created[0].cwd.as_deref(), Some("/work"));
}

#[tokio::test]
async fn empty_state_starts_an_empty_registry() {
    let host = FakeHost::new();
    let test = spawn_registry(host.as_dyn(), fast_settings());

    let report = reconcile::run(&host.as_dyn(), &test.handle, &PersistedStateV1::empty())
        .await
        .expect("reconcile");

    assert_eq!(report, Default::default());
    assert!(test.handle.list_all().await.expect("list").is_empty());
    assert!(host.state().created.is_empty());
}

#[tokio::test]
async fn reconciliation_seeds_projects_and_enables_saves() {
    let host = FakeHost::new();
    let test = spawn_registry(host.as_dyn(), fast_settings());

    let state = state_with(Vec::new());
    reconcile::run(&host.as_dyn(), &test.handle, &state)
        .await
        .expect("reconcile");

    let snapshot = test.handle.snapshot().await.expect("snapshot");
    assert_eq!(snapshot.projects.len(), 1);
    assert_eq!(snapshot.active_project_id, "proj");

    // Post-hydration mutations reach disk.
    test.handle
        .insert(super::test_helpers::session("50", "post-restore"))
        .await
        .expect("insert");
    tokio::time::sleep(std::time::Duration::from_millis(600)).await;
    assert!(test.store.state_path().exists());
}

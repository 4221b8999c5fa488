//! Unit tests for the atomic state store.

use maestro_term::persistence::state::PersistedStateV1;
use maestro_term::persistence::store::StateStore;

fn temp_store() -> (tempfile::TempDir, std::sync::Arc<StateStore>) {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = StateStore::new(dir.path()).expect("store");
    (dir, store)
}

#[tokio::test]
async fn save_then_load_round_trips() {
    let (_dir, store) = temp_store();
    let mut state = PersistedStateV1::empty();
    state.active_project_id = "p1".into();

    store.save(state.clone()).await.expect("save");
    let loaded = store.load().expect("load").expect("state present");
    assert_eq!(loaded, state);
}

#[test]
fn load_missing_file_is_none() {
    let (_dir, store) = temp_store();
    assert!(store.load().expect("load").is_none());
}

#[tokio::test]
async fn unknown_schema_version_is_ignored() {
    let (_dir, store) = temp_store();
    let mut state = PersistedStateV1::empty();
    state.schema_version = 2;
    store.save(state).await.expect("save");
    assert!(store.load().expect("load").is_none());
}

#[test]
fn corrupt_file_is_an_error() {
    let (_dir, store) = temp_store();
    std::fs::write(store.state_path(), "{ not json").expect("write");
    assert!(store.load().is_err());
}

#[tokio::test]
async fn disabled_store_skips_saves_silently() {
    let (_dir, store) = temp_store();
    store.disable("secure storage locked");
    assert!(!store.is_enabled());

    store.save(PersistedStateV1::empty()).await.expect("no-op save");
    assert!(!store.state_path().exists());

    store.enable();
    assert!(store.is_enabled());
    store.save(PersistedStateV1::empty()).await.expect("save");
    assert!(store.state_path().exists());
}

#[tokio::test]
async fn save_overwrites_previous_state_atomically() {
    let (_dir, store) = temp_store();
    let mut first = PersistedStateV1::empty();
    first.active_project_id = "a".into();
    store.save(first).await.expect("save");

    let mut second = PersistedStateV1::empty();
    second.active_project_id = "b".into();
    store.save(second).await.expect("save");

    let loaded = store.load().expect("load").expect("state");
    assert_eq!(loaded.active_project_id, "b");
}

#[tokio::test]
async fn clear_removes_state_files() {
    let (_dir, store) = temp_store();
    store.save(PersistedStateV1::empty()).await.expect("save");
    store
        .save_layout(serde_json::json!({"panes": 2}))
        .await
        .expect("layout save");
    store.clear().expect("clear");
    assert!(store.load().expect("load").is_none());
    // Clearing twice is fine.
    store.clear().expect("clear again");
}

//! Unit tests for the persisted-state schema.

use chrono::{TimeZone, Utc};
use maestro_term::models::project::Project;
use maestro_term::models::session::Session;
use maestro_term::persistence::state::{
    PersistedProjectV1, PersistedSessionV1, PersistedStateV1, SCHEMA_VERSION,
};

fn sample_session() -> Session {
    let mut session = Session::new("12".into(), "proj".into(), "agent".into());
    session.cwd = Some("/work".into());
    session.launch_command = Some("claude".into());
    session.restore_command = Some("claude --continue".into());
    session.persistent = true;
    session.maestro_session_id = Some("remote-1".into());
    session.created_at = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).single().unwrap();
    session
}

#[test]
fn session_projection_keeps_identity_and_reconnect_key() {
    let session = sample_session();
    let record = PersistedSessionV1::from_session(&session);
    assert_eq!(record.persist_id, session.persist_id);
    assert_eq!(record.backend_session_id.as_deref(), Some("12"));
    assert_eq!(record.restore_command.as_deref(), Some("claude --continue"));
    assert_eq!(record.persistent, Some(true));
    assert_eq!(record.created_at_utc(), session.created_at);
}

#[test]
fn session_projection_drops_volatile_fields() {
    let mut session = sample_session();
    session.agent_working = true;
    session.closing = true;
    let json = serde_json::to_value(PersistedSessionV1::from_session(&session)).unwrap();
    let object = json.as_object().unwrap();
    assert!(!object.contains_key("agentWorking"));
    assert!(!object.contains_key("closing"));
    assert!(!object.contains_key("exited"));
}

#[test]
fn state_serializes_camel_case() {
    let mut state = PersistedStateV1::empty();
    state.projects.push(PersistedProjectV1::from_project(&Project::new(
        "demo".into(),
        Some("/work".into()),
    )));
    state.sessions.push(PersistedSessionV1::from_session(&sample_session()));
    let json = serde_json::to_value(&state).unwrap();
    assert!(json.get("schemaVersion").is_some());
    assert!(json.get("activeProjectId").is_some());
    assert!(json.get("activeSessionByProject").is_some());
    let session = &json["sessions"][0];
    assert!(session.get("persistId").is_some());
    assert!(session.get("restoreCommand").is_some());
    assert!(session.get("backendSessionId").is_some());
}

#[test]
fn state_round_trips_through_json() {
    let mut state = PersistedStateV1::empty();
    let project = Project::new("demo".into(), Some("/work".into()));
    state.active_project_id.clone_from(&project.id);
    state.projects.push(PersistedProjectV1::from_project(&project));
    state.sessions.push(PersistedSessionV1::from_session(&sample_session()));
    state
        .active_session_by_project
        .insert(project.id.clone(), state.sessions[0].persist_id.clone());

    let json = serde_json::to_string(&state).unwrap();
    let back: PersistedStateV1 = serde_json::from_str(&json).unwrap();
    assert_eq!(back, state);
}

#[test]
fn empty_state_uses_current_schema_version() {
    assert_eq!(PersistedStateV1::empty().schema_version, SCHEMA_VERSION);
    assert_eq!(SCHEMA_VERSION, 1);
}

#[test]
fn optional_fields_are_omitted_when_absent() {
    let mut session = sample_session();
    session.maestro_session_id = None;
    let json = serde_json::to_value(PersistedSessionV1::from_session(&session)).unwrap();
    assert!(json.get("maestroSessionId").is_none());
}

#[test]
fn project_projection_round_trips() {
    let project = Project::new("demo".into(), None);
    let record = PersistedProjectV1::from_project(&project);
    assert_eq!(record.to_project(), project);
}

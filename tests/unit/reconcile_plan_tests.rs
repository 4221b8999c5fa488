//! Unit tests for the reconciliation planner.

use maestro_term::host::AliveProcess;
use maestro_term::persistence::state::PersistedSessionV1;
use maestro_term::reconcile::{plan, RestoreAction};

fn persisted(persist_id: &str, backend: Option<&str>, created_at: u64) -> PersistedSessionV1 {
    PersistedSessionV1 {
        persist_id: persist_id.into(),
        project_id: "proj".into(),
        name: persist_id.into(),
        cwd: Some("/work".into()),
        launch_command: None,
        restore_command: None,
        persistent: Some(false),
        created_at,
        maestro_session_id: None,
        backend_session_id: backend.map(Into::into),
    }
}

fn alive(id: &str) -> AliveProcess {
    AliveProcess {
        id: id.into(),
        cwd: Some("/live".into()),
        command: Some("zsh -l".into()),
    }
}

#[test]
fn alive_backend_id_reconnects_and_absent_recreates() {
    let records = vec![persisted("a", Some("1"), 10), persisted("b", Some("2"), 20)];
    let plan = plan(&records, vec![alive("1")]);

    assert_eq!(plan.entries.len(), 2);
    assert!(
        matches!(&plan.entries[0].1, RestoreAction::Reconnect(p) if p.id == "1"),
        "session a should reconnect"
    );
    assert_eq!(plan.entries[1].1, RestoreAction::Recreate);
    assert!(plan.orphans.is_empty());
}

#[test]
fn entries_are_ordered_by_created_at_ascending() {
    let records = vec![
        persisted("newest", None, 30),
        persisted("oldest", None, 10),
        persisted("middle", None, 20),
    ];
    let plan = plan(&records, Vec::new());
    let order: Vec<&str> = plan.entries.iter().map(|(r, _)| r.persist_id.as_str()).collect();
    assert_eq!(order, vec!["oldest", "middle", "newest"]);
}

#[test]
fn each_alive_id_is_claimed_at_most_once() {
    // Two persisted records pointing at the same backend id: the older one
    // claims it, the other must recreate.
    let records = vec![persisted("first", Some("1"), 10), persisted("second", Some("1"), 20)];
    let plan = plan(&records, vec![alive("1")]);

    assert!(matches!(plan.entries[0].1, RestoreAction::Reconnect(_)));
    assert_eq!(plan.entries[1].1, RestoreAction::Recreate);
    assert!(plan.orphans.is_empty());
}

#[test]
fn record_without_backend_id_always_recreates() {
    let records = vec![persisted("a", None, 10)];
    let plan = plan(&records, vec![alive("1")]);
    assert_eq!(plan.entries[0].1, RestoreAction::Recreate);
    assert_eq!(plan.orphans.len(), 1);
}

#[test]
fn unclaimed_processes_are_orphans() {
    let records = vec![persisted("a", Some("1"), 10)];
    let plan = plan(&records, vec![alive("1"), alive("7"), alive("9")]);
    let orphan_ids: Vec<&str> = plan.orphans.iter().map(|p| p.id.as_str()).collect();
    assert_eq!(orphan_ids, vec!["7", "9"]);
}

#[test]
fn empty_inputs_produce_an_empty_plan() {
    let plan = plan(&[], Vec::new());
    assert!(plan.entries.is_empty());
    assert!(plan.orphans.is_empty());
}

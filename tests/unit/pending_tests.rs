//! Unit tests for pending-exit records and closing guards.

use std::time::Duration;

use maestro_term::registry::pending::{ClosingGuards, PendingExits};

#[test]
fn pending_exit_is_consumed_exactly_once() {
    let mut pending = PendingExits::default();
    pending.record("5".into(), Some(0));
    assert_eq!(pending.take("5"), Some(Some(0)));
    assert_eq!(pending.take("5"), None);
    assert!(pending.is_empty());
}

#[test]
fn pending_exit_preserves_missing_code() {
    let mut pending = PendingExits::default();
    pending.record("9".into(), None);
    assert_eq!(pending.take("9"), Some(None));
}

#[test]
fn pending_exit_for_unknown_id_is_none() {
    let mut pending = PendingExits::default();
    assert_eq!(pending.take("42"), None);
}

#[test]
fn later_record_overwrites_earlier_for_same_id() {
    let mut pending = PendingExits::default();
    pending.record("5".into(), Some(1));
    pending.record("5".into(), Some(2));
    assert_eq!(pending.len(), 1);
    assert_eq!(pending.take("5"), Some(Some(2)));
}

#[test]
fn closing_guard_suppresses_within_ttl() {
    let mut guards = ClosingGuards::with_ttl(Duration::from_millis(50));
    guards.insert("3".into());
    assert!(guards.contains("3"));
    assert!(!guards.contains("4"));
}

#[test]
fn closing_guard_expires_after_ttl() {
    let mut guards = ClosingGuards::with_ttl(Duration::from_millis(20));
    guards.insert("3".into());
    std::thread::sleep(Duration::from_millis(40));
    assert!(!guards.contains("3"));
}

#[test]
fn closing_guard_can_be_removed_early() {
    let mut guards = ClosingGuards::with_ttl(Duration::from_secs(30));
    guards.insert("3".into());
    guards.remove("3");
    assert!(!guards.contains("3"));
}

#[test]
fn default_ttl_is_thirty_seconds() {
    assert_eq!(ClosingGuards::DEFAULT_TTL, Duration::from_secs(30));
}

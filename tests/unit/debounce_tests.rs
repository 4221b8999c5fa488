//! Unit tests for the debounce value type.
//!
//! The debounce is a plain pending-value + deadline pair, so coalescing
//! semantics are checked with constructed instants and no real timers.

use std::time::Duration;

use tokio::time::Instant;

use maestro_term::persistence::scheduler::Debounce;

const DELAY: Duration = Duration::from_millis(400);

#[test]
fn starts_idle() {
    let debounce: Debounce<u32> = Debounce::new(DELAY);
    assert!(!debounce.is_armed());
    assert!(debounce.deadline().is_none());
}

#[test]
fn schedule_arms_with_deadline_delay_after_now() {
    let mut debounce = Debounce::new(DELAY);
    let now = Instant::now();
    debounce.schedule(1u32, now);
    assert!(debounce.is_armed());
    assert_eq!(debounce.deadline(), Some(now + DELAY));
}

#[test]
fn reschedule_overwrites_value_and_pushes_deadline_out() {
    let mut debounce = Debounce::new(DELAY);
    let start = Instant::now();
    debounce.schedule(1u32, start);
    // A burst of triggers: each overwrites the previous pending value.
    let later = start + Duration::from_millis(100);
    debounce.schedule(2u32, later);
    assert_eq!(debounce.deadline(), Some(later + DELAY));

    // Nothing is due at the original deadline.
    assert!(debounce.take_due(start + DELAY).is_none());
    // The most recent value is due at the pushed-out deadline.
    assert_eq!(debounce.take_due(later + DELAY), Some(2));
    assert!(!debounce.is_armed());
}

#[test]
fn take_due_before_deadline_returns_nothing() {
    let mut debounce = Debounce::new(DELAY);
    let now = Instant::now();
    debounce.schedule(7u32, now);
    assert!(debounce.take_due(now + Duration::from_millis(399)).is_none());
    assert!(debounce.is_armed());
}

#[test]
fn take_due_consumes_the_slot_once() {
    let mut debounce = Debounce::new(DELAY);
    let now = Instant::now();
    debounce.schedule(7u32, now);
    assert_eq!(debounce.take_due(now + DELAY), Some(7));
    assert!(debounce.take_due(now + DELAY * 2).is_none());
}

#[test]
fn cancel_returns_the_pending_value() {
    let mut debounce = Debounce::new(DELAY);
    debounce.schedule("layout", Instant::now());
    assert_eq!(debounce.cancel(), Some("layout"));
    assert!(!debounce.is_armed());
    assert!(debounce.cancel().is_none());
}

#[test]
fn five_triggers_coalesce_into_one_due_value() {
    let mut debounce = Debounce::new(DELAY);
    let start = Instant::now();
    let mut last = start;
    for n in 0u32..5 {
        last = start + Duration::from_millis(u64::from(n) * 25);
        debounce.schedule(n, last);
    }
    // Not due until the full delay after the *last* trigger.
    assert!(debounce.take_due(last + DELAY - Duration::from_millis(1)).is_none());
    assert_eq!(debounce.take_due(last + DELAY), Some(4));
    assert!(debounce.take_due(last + DELAY * 2).is_none());
}

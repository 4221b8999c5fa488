//! Debounce scheduling for persistence writes.
//!
//! [`Debounce`] is a plain value type — a pending value plus a deadline —
//! rather than a wrapper around an ambient timer API, so coalescing
//! behavior is unit-testable with constructed instants. The registry
//! actor drives it: every `schedule` pushes the deadline out, and the
//! actor's select loop sleeps until [`deadline`](Debounce::deadline) to
//! flush the most recent value.

use tokio::time::{Duration, Instant};

/// Pending value + deadline with overwrite-on-reschedule semantics.
///
/// A new `schedule` replaces any pending value and restarts the delay
/// from `now`, so a burst of triggers collapses into one flush `delay`
/// after the last trigger.
#[derive(Debug)]
pub struct Debounce<T> {
    delay: Duration,
    slot: Option<(T, Instant)>,
}

impl<T> Debounce<T> {
    /// Create an idle debounce with the given delay.
    #[must_use]
    pub fn new(delay: Duration) -> Self {
        Self { delay, slot: None }
    }

    /// Schedule `value` to flush `delay` after `now`, replacing any
    /// previously pending value.
    pub fn schedule(&mut self, value: T, now: Instant) {
        self.slot = Some((value, now + self.delay));
    }

    /// Drop the pending value, if any, returning it.
    pub fn cancel(&mut self) -> Option<T> {
        self.slot.take().map(|(value, _)| value)
    }

    /// Whether a flush is pending.
    #[must_use]
    pub fn is_armed(&self) -> bool {
        self.slot.is_some()
    }

    /// Deadline of the pending flush.
    #[must_use]
    pub fn deadline(&self) -> Option<Instant> {
        self.slot.as_ref().map(|(_, at)| *at)
    }

    /// Take the pending value if its deadline has passed.
    pub fn take_due(&mut self, now: Instant) -> Option<T> {
        match &self.slot {
            Some((_, at)) if *at <= now => self.slot.take().map(|(value, _)| value),
            _ => None,
        }
    }
}

/// Sleep until `deadline`, or forever when there is none.
///
/// Companion for driving a [`Debounce`] from a `select!` arm.
pub async fn sleep_until_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

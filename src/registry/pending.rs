//! Race-absorbing bookkeeping owned by the registry.
//!
//! Both structures exist because process events are delivered
//! asynchronously: an exit can arrive before the session it belongs to is
//! registered, and output can arrive after teardown has begun.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::models::session::SessionId;

/// Exit codes that arrived before their session was registered.
///
/// Consumed exactly once by the racing insert.
#[derive(Debug, Default)]
pub struct PendingExits {
    map: HashMap<SessionId, Option<i32>>,
}

impl PendingExits {
    /// Record an exit for a not-yet-registered session.
    pub fn record(&mut self, id: SessionId, code: Option<i32>) {
        self.map.insert(id, code);
    }

    /// Consume the pending exit for `id`, if one was recorded.
    pub fn take(&mut self, id: &str) -> Option<Option<i32>> {
        self.map.remove(id)
    }

    /// Number of unconsumed records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// Whether no records are pending.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

/// Time-boxed markers suppressing late output for sessions mid-teardown.
///
/// Entries auto-expire after the TTL; expiry is lazy (checked on access
/// and swept on insert) so no timer task is needed.
#[derive(Debug)]
pub struct ClosingGuards {
    ttl: Duration,
    map: HashMap<SessionId, Instant>,
}

impl ClosingGuards {
    /// Default suppression window for a session mid-teardown.
    pub const DEFAULT_TTL: Duration = Duration::from_secs(30);

    /// Create with the default 30-second TTL.
    #[must_use]
    pub fn new() -> Self {
        Self::with_ttl(Self::DEFAULT_TTL)
    }

    /// Create with a custom TTL (used by tests).
    #[must_use]
    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            ttl,
            map: HashMap::new(),
        }
    }

    /// Mark `id` as mid-teardown, sweeping expired entries.
    pub fn insert(&mut self, id: SessionId) {
        let ttl = self.ttl;
        self.map.retain(|_, at| at.elapsed() < ttl);
        self.map.insert(id, Instant::now());
    }

    /// Whether `id` is still within its suppression window.
    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.map.get(id).is_some_and(|at| at.elapsed() < self.ttl)
    }

    /// Clear the marker early (e.g. a failed close rolled back).
    pub fn remove(&mut self, id: &str) {
        self.map.remove(id);
    }
}

impl Default for ClosingGuards {
    fn default() -> Self {
        Self::new()
    }
}

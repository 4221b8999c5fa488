//! Spawn deduplication for at-least-once event delivery.
//!
//! The event stream can deliver the same `session:spawn` frame more than
//! once. Claims are keyed by the remote session id and expire after a
//! fixed window rather than on creation completion, since a duplicate can
//! race with the first creation finishing.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing::debug;

/// Default lifetime of a dedup claim.
pub const DEFAULT_DEDUP_WINDOW: Duration = Duration::from_secs(5);

/// Bounded-lifetime set of in-flight spawn claims.
#[derive(Debug)]
pub struct SpawnDedup {
    window: Duration,
    claims: Mutex<HashSet<String>>,
}

impl SpawnDedup {
    /// Create with the default claim window.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Self::with_window(DEFAULT_DEDUP_WINDOW)
    }

    /// Create with a custom claim window (used by tests).
    #[must_use]
    pub fn with_window(window: Duration) -> Arc<Self> {
        Arc::new(Self {
            window,
            claims: Mutex::new(HashSet::new()),
        })
    }

    /// Try to claim a spawn for `remote_id`.
    ///
    /// Returns `false` — drop the request — if a claim is already held.
    /// A successful claim is released automatically after the window.
    pub fn try_claim(self: &Arc<Self>, remote_id: &str) -> bool {
        {
            let Ok(mut claims) = self.claims.lock() else {
                return false;
            };
            if !claims.insert(remote_id.to_owned()) {
                debug!(remote_id, "duplicate spawn dropped");
                return false;
            }
        }

        let dedup = Arc::clone(self);
        let key = remote_id.to_owned();
        tokio::spawn(async move {
            tokio::time::sleep(dedup.window).await;
            if let Ok(mut claims) = dedup.claims.lock() {
                claims.remove(&key);
            }
        });
        true
    }

    /// Whether a claim is currently held for `remote_id`.
    #[must_use]
    pub fn is_claimed(&self, remote_id: &str) -> bool {
        self.claims
            .lock()
            .map(|claims| claims.contains(remote_id))
            .unwrap_or(false)
    }
}

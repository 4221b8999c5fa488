//! Agent activity detection.
//!
//! Each session with a matched process effect gets an [`ActivityTimer`]:
//! a background task that fires an idle event after the effect's idle
//! timeout unless reset by meaningful output. The registry actor owns the
//! timers, feeds them resets, and consumes their events from a channel,
//! so the working/idle flag is only ever flipped on the single writer.
//!
//! Chunk classification ([`is_meaningful`]) and the escape stripper it
//! relies on are pure functions; the resize suppression window itself is
//! tracked by the registry, which simply declines to classify chunks that
//! arrive too soon after a resize.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::models::session::SessionId;

/// How long after a resize output chunks are treated as redraw noise.
pub const RESIZE_SUPPRESS_WINDOW: Duration = Duration::from_millis(900);

/// Events emitted by activity timers for registry handling.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActivityEvent {
    /// The idle timeout elapsed with no meaningful output.
    Idle {
        /// Session whose agent went quiet.
        id: SessionId,
    },
}

/// Per-session idle timer.
///
/// Call [`spawn`](Self::spawn) to start the background task; the returned
/// handle resets the countdown on activity and cancels the task on drop.
pub struct ActivityTimer {
    id: SessionId,
    idle_timeout: Duration,
    event_tx: mpsc::Sender<ActivityEvent>,
    cancel: CancellationToken,
}

impl ActivityTimer {
    /// Construct a timer (does not start it yet).
    #[must_use]
    pub fn new(
        id: SessionId,
        idle_timeout: Duration,
        event_tx: mpsc::Sender<ActivityEvent>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            id,
            idle_timeout,
            event_tx,
            cancel,
        }
    }

    /// Spawn the background task and return its control handle.
    #[must_use]
    pub fn spawn(self) -> ActivityTimerHandle {
        let reset_notify = Arc::new(Notify::new());
        let cancel_for_handle = self.cancel.clone();

        let task = tokio::spawn(Self::run(
            self.id.clone(),
            self.idle_timeout,
            self.event_tx,
            self.cancel,
            Arc::clone(&reset_notify),
        ));

        ActivityTimerHandle {
            reset_notify,
            cancel: cancel_for_handle,
            join_handle: Some(task),
        }
    }

    async fn run(
        id: SessionId,
        idle_timeout: Duration,
        event_tx: mpsc::Sender<ActivityEvent>,
        cancel: CancellationToken,
        reset_notify: Arc<Notify>,
    ) {
        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    debug!(id, "activity timer cancelled");
                    return;
                }
                () = reset_notify.notified() => {}
                () = tokio::time::sleep(idle_timeout) => {
                    let _ = event_tx.send(ActivityEvent::Idle { id: id.clone() }).await;
                    // Stay parked until the next burst of output.
                    tokio::select! {
                        () = cancel.cancelled() => return,
                        () = reset_notify.notified() => {}
                    }
                }
            }
        }
    }
}

/// Handle returned from [`ActivityTimer::spawn`].
pub struct ActivityTimerHandle {
    reset_notify: Arc<Notify>,
    cancel: CancellationToken,
    join_handle: Option<JoinHandle<()>>,
}

impl ActivityTimerHandle {
    /// Restart the idle countdown (call on every meaningful chunk).
    pub fn reset(&self) {
        self.reset_notify.notify_one();
    }
}

impl Drop for ActivityTimerHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
        if let Some(handle) = self.join_handle.take() {
            handle.abort();
        }
    }
}

/// Whether a chunk counts as agent activity.
///
/// Chunks that are empty after stripping escape sequences, or contain only
/// whitespace and control characters, are redraw or bookkeeping noise.
#[must_use]
pub fn is_meaningful(data: &str) -> bool {
    strip_escapes(data)
        .chars()
        .any(|c| !c.is_whitespace() && !c.is_control())
}

/// Remove ANSI escape sequences (CSI, OSC, DCS/PM/APC, single-char).
#[must_use]
pub fn strip_escapes(data: &str) -> String {
    let mut out = String::with_capacity(data.len());
    let mut iter = data.chars().peekable();
    while let Some(ch) = iter.next() {
        if ch == '\u{1b}' {
            skip_escape_sequence(&mut iter);
        } else {
            out.push(ch);
        }
    }
    out
}

fn skip_escape_sequence(iter: &mut std::iter::Peekable<std::str::Chars<'_>>) {
    match iter.peek().copied() {
        Some('[') => {
            iter.next();
            skip_csi(iter);
        }
        Some(']') => {
            iter.next();
            skip_osc(iter);
        }
        Some('P' | '^' | '_') => {
            iter.next();
            skip_until_st(iter);
        }
        Some(_) => {
            iter.next();
        }
        None => {}
    }
}

fn skip_csi(iter: &mut std::iter::Peekable<std::str::Chars<'_>>) {
    // CSI terminates on any byte in 0x40..=0x7E.
    for ch in iter.by_ref() {
        if ('@'..='~').contains(&ch) {
            break;
        }
    }
}

fn skip_osc(iter: &mut std::iter::Peekable<std::str::Chars<'_>>) {
    while let Some(ch) = iter.next() {
        if ch == '\u{7}' {
            break;
        }
        if ch == '\u{1b}' && iter.peek().copied() == Some('\\') {
            iter.next();
            break;
        }
    }
}

fn skip_until_st(iter: &mut std::iter::Peekable<std::str::Chars<'_>>) {
    while let Some(ch) = iter.next() {
        if ch == '\u{1b}' && iter.peek().copied() == Some('\\') {
            iter.next();
            break;
        }
    }
}

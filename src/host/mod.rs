//! Process host facade: the manager's boundary to PTY process management.
//!
//! The [`ProcessHost`] trait decouples the session registry and the
//! reconciliation engine from the concrete PTY facility. The production
//! implementation is [`pty::PtyHost`]; tests substitute scripted fakes.
//! Push notifications (output, exit, foreground-command changes) are
//! delivered over an mpsc channel as [`HostEvent`] values.

pub mod pty;
pub mod stream;

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;

use crate::models::session::SessionId;
use crate::Result;

/// Boxed future alias used by [`ProcessHost`] methods.
pub type HostFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// Push notification from the process host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostEvent {
    /// Decoded output chunk from a session's PTY.
    Output {
        /// Backend process id.
        id: SessionId,
        /// UTF-8 decoded chunk; may still contain escape sequences.
        data: String,
    },
    /// The backing process exited.
    Exit {
        /// Backend process id.
        id: SessionId,
        /// Process exit code, when known.
        code: Option<i32>,
    },
    /// The shell reported a new foreground command (OSC 1337 `Command=`).
    ///
    /// An empty command means the foreground command finished and the
    /// shell is back at the prompt.
    CommandChanged {
        /// Backend process id.
        id: SessionId,
        /// Reported command line; empty at the prompt.
        command: String,
    },
    /// The shell reported a directory change (OSC 1337 `CurrentDir=`).
    CwdChanged {
        /// Backend process id.
        id: SessionId,
        /// Reported working directory.
        cwd: String,
    },
}

/// Parameters for creating a backend process.
#[derive(Debug, Clone, Default)]
pub struct SpawnSpec {
    /// Working directory; falls back to the user's home directory.
    pub cwd: Option<String>,
    /// Command line to run; `None` launches the user's login shell.
    pub command: Option<String>,
    /// Initial terminal width.
    pub cols: Option<u16>,
    /// Initial terminal height.
    pub rows: Option<u16>,
    /// Extra environment variables; invalid keys are skipped.
    pub env: HashMap<String, String>,
}

impl SpawnSpec {
    /// Spec for a plain login shell in the given directory.
    #[must_use]
    pub fn shell(cwd: Option<String>) -> Self {
        Self {
            cwd,
            ..Self::default()
        }
    }

    /// Spec for a command line in the given directory.
    #[must_use]
    pub fn command(command: String, cwd: Option<String>) -> Self {
        Self {
            cwd,
            command: Some(command),
            ..Self::default()
        }
    }
}

/// One row of the host's live-process table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AliveProcess {
    /// Backend process id.
    pub id: SessionId,
    /// Working directory the process was started in.
    pub cwd: Option<String>,
    /// Command line the process is running.
    pub command: Option<String>,
}

/// Asynchronous, per-session process management interface.
///
/// Implementations must tolerate operations on unknown ids where the
/// contract says so (`close` on a missing id is `Ok`), since teardown
/// races with exit notifications.
pub trait ProcessHost: Send + Sync {
    /// Create a backend process and return its id.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Host`](crate::AppError::Host) if the PTY cannot
    /// be opened or the process cannot be spawned.
    fn create(&self, spec: SpawnSpec) -> HostFuture<'_, SessionId>;

    /// Write bytes to a session's input stream.
    ///
    /// Writes to a session mid-teardown are silently dropped.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::NotFound`](crate::AppError::NotFound) for an
    /// unknown id, or [`AppError::Host`](crate::AppError::Host) on a
    /// write failure.
    fn write(&self, id: &str, data: &[u8]) -> HostFuture<'_, ()>;

    /// Resize a session's PTY.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::NotFound`](crate::AppError::NotFound) for an
    /// unknown id, or [`AppError::Host`](crate::AppError::Host) on failure.
    fn resize(&self, id: &str, cols: u16, rows: u16) -> HostFuture<'_, ()>;

    /// Terminate a session's process. Idempotent; `Ok` for unknown ids.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Host`](crate::AppError::Host) if the kill
    /// signal cannot be delivered.
    fn close(&self, id: &str) -> HostFuture<'_, ()>;

    /// Leave the process running but release it from lifecycle control.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::NotFound`](crate::AppError::NotFound) for an
    /// unknown id.
    fn detach(&self, id: &str) -> HostFuture<'_, ()>;

    /// Table of currently-alive backend processes.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Host`](crate::AppError::Host) if the table
    /// cannot be read.
    fn list_alive(&self) -> HostFuture<'_, Vec<AliveProcess>>;
}

//! Session model and lifecycle helpers.

use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Opaque handle to the backing PTY process, assigned by the process host.
///
/// Unique while the process is alive; not stable across application restarts
/// (that is what [`Session::persist_id`] is for).
pub type SessionId = String;

/// A live, in-memory terminal session.
///
/// Created by an explicit user action, by the reconciliation engine at
/// startup, or by a remote spawn event. At most one non-exited `Session`
/// may exist per `persist_id`; the registry rejects inserts that would
/// violate this.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    /// Backend process handle (see [`SessionId`]).
    pub id: SessionId,
    /// Stable identity surviving app restarts; correlates with the
    /// persisted record and the backend process table.
    pub persist_id: String,
    /// Owning project.
    pub project_id: String,
    /// Display name, unique within the registry.
    pub name: String,
    /// Working directory the process was started in.
    pub cwd: Option<String>,
    /// Command the session was originally launched with.
    pub launch_command: Option<String>,
    /// Command to re-issue if the process had to be recreated rather
    /// than reconnected.
    pub restore_command: Option<String>,
    /// Whether the session survives app close (detach) or dies with it.
    pub persistent: bool,
    /// Matched agent profile, if any.
    pub effect_id: Option<String>,
    /// Whether the matched agent is currently producing meaningful output.
    pub agent_working: bool,
    /// Whether the backing process has exited.
    pub exited: bool,
    /// Exit code, once exited.
    pub exit_code: Option<i32>,
    /// In-flight teardown flag; set once, never cleared except on a
    /// failed close.
    pub closing: bool,
    /// Correlation id with the remote orchestration server, if mirrored.
    pub maestro_session_id: Option<String>,
    /// Creation timestamp; drives deterministic restore order.
    pub created_at: DateTime<Utc>,
}

impl Session {
    /// Construct a new session with a generated `persist_id`.
    #[must_use]
    pub fn new(id: SessionId, project_id: String, name: String) -> Self {
        Self {
            id,
            persist_id: Uuid::new_v4().to_string(),
            project_id,
            name,
            cwd: None,
            launch_command: None,
            restore_command: None,
            persistent: false,
            effect_id: None,
            agent_working: false,
            exited: false,
            exit_code: None,
            closing: false,
            maestro_session_id: None,
            created_at: Utc::now(),
        }
    }

    /// Whether the session is live: not exited and not mid-teardown.
    #[must_use]
    pub fn is_live(&self) -> bool {
        !self.exited && !self.closing
    }

    /// Mark the backing process exited with an optional exit code.
    pub fn mark_exited(&mut self, code: Option<i32>) {
        self.exited = true;
        self.exit_code = code;
        self.agent_working = false;
    }
}

/// Partial update applied through the registry's `update` operation.
///
/// `None` fields are left untouched. Nullable session fields use a double
/// `Option` so that `Some(None)` clears the value.
#[derive(Debug, Clone, Default)]
pub struct SessionPatch {
    /// New display name.
    pub name: Option<String>,
    /// New working directory.
    pub cwd: Option<Option<String>>,
    /// New restore command.
    pub restore_command: Option<Option<String>>,
    /// Toggle persistence across app close.
    pub persistent: Option<bool>,
    /// Bind or unbind the remote orchestration session.
    pub maestro_session_id: Option<Option<String>>,
}

impl SessionPatch {
    /// Apply this patch to a session in place.
    pub fn apply(self, session: &mut Session) {
        if let Some(name) = self.name {
            session.name = name;
        }
        if let Some(cwd) = self.cwd {
            session.cwd = cwd;
        }
        if let Some(restore) = self.restore_command {
            session.restore_command = restore;
        }
        if let Some(persistent) = self.persistent {
            session.persistent = persistent;
        }
        if let Some(maestro) = self.maestro_session_id {
            session.maestro_session_id = maestro;
        }
    }
}

//! Wire types for the remote orchestration server.
//!
//! The manager only consumes the server's session CRUD and event-stream
//! contract; task and queue internals stay on the server.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::session::Session;

/// Lifecycle status of a remote session record.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RemoteSessionStatus {
    /// Session requested; local process not yet confirmed.
    Spawning,
    /// Local agent is alive but quiet.
    Idle,
    /// Local agent is producing meaningful output.
    Working,
    /// Session retired by the manager or the reaper.
    Stopped,
    /// Server marked the session's work complete.
    Completed,
    /// Server marked the session failed.
    Failed,
}

impl RemoteSessionStatus {
    /// Whether the server still considers this session live.
    #[must_use]
    pub fn is_active(self) -> bool {
        matches!(self, Self::Spawning | Self::Idle | Self::Working)
    }

    /// Status a live local session should be mirrored as.
    #[must_use]
    pub fn for_session(session: &Session) -> Self {
        if session.exited {
            Self::Stopped
        } else if session.agent_working {
            Self::Working
        } else {
            Self::Idle
        }
    }
}

/// Session record as stored by the orchestration server.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RemoteSession {
    /// Server-assigned identifier.
    pub id: String,
    /// Current status.
    pub status: RemoteSessionStatus,
    /// Tasks the server has associated with this session.
    #[serde(default)]
    pub task_ids: Vec<String>,
    /// Completion timestamp, once completed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

/// Body for creating a remote session record.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NewRemoteSession {
    /// Initial status.
    pub status: RemoteSessionStatus,
}

/// Partial update for a remote session record.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteSessionPatch {
    /// New status.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<RemoteSessionStatus>,
    /// Completion timestamp.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl RemoteSessionPatch {
    /// Patch that only changes the status.
    #[must_use]
    pub fn status(status: RemoteSessionStatus) -> Self {
        Self {
            status: Some(status),
            completed_at: None,
        }
    }
}

/// One frame from the server's event stream.
#[derive(Debug, Clone, Deserialize)]
pub struct RemoteEventFrame {
    /// Event type, e.g. `session:created` or `session:spawn`.
    pub event: String,
    /// Event payload; shape depends on the event type.
    #[serde(default)]
    pub data: serde_json::Value,
}

/// Payload of a `session:spawn` event: a request to create a local
/// session bound 1:1 to the named remote session.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SpawnRequest {
    /// Remote session id the new local session must bind to.
    pub session_id: String,
    /// Target project, when the server knows it.
    #[serde(default)]
    pub project_id: Option<String>,
    /// Working directory override.
    #[serde(default)]
    pub cwd: Option<String>,
    /// Command to launch instead of the default shell.
    #[serde(default)]
    pub command: Option<String>,
}

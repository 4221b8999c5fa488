//! Versioned on-disk state schema (`schemaVersion: 1`).
//!
//! The durable projection of the registry: projects, sessions (minus
//! volatile fields), and the active-selection maps. Field names are
//! camelCase for compatibility with the desktop frontend that reads the
//! same file.

use std::collections::HashMap;

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::models::project::Project;
use crate::models::session::Session;

/// Current schema version written by this build.
pub const SCHEMA_VERSION: u32 = 1;

/// Durable projection of a project.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PersistedProjectV1 {
    /// Project identifier.
    pub id: String,
    /// Display title.
    pub title: String,
    /// Root directory for new sessions.
    pub base_path: Option<String>,
}

impl PersistedProjectV1 {
    /// Project this record restores to.
    #[must_use]
    pub fn to_project(&self) -> Project {
        Project {
            id: self.id.clone(),
            title: self.title.clone(),
            base_path: self.base_path.clone(),
        }
    }

    /// Durable projection of a live project.
    #[must_use]
    pub fn from_project(project: &Project) -> Self {
        Self {
            id: project.id.clone(),
            title: project.title.clone(),
            base_path: project.base_path.clone(),
        }
    }
}

/// Durable projection of a session, keyed by `persist_id`.
///
/// Volatile fields (`agent_working`, `closing`, the transient effect
/// match) are intentionally absent; `backend_session_id` is the last
/// known backend process id and is only meaningful for reconciliation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PersistedSessionV1 {
    /// Stable identity surviving app restarts.
    pub persist_id: String,
    /// Owning project.
    pub project_id: String,
    /// Display name.
    pub name: String,
    /// Working directory.
    pub cwd: Option<String>,
    /// Original launch command.
    pub launch_command: Option<String>,
    /// Command to re-issue when the session is recreated.
    pub restore_command: Option<String>,
    /// Whether the session survives app close.
    pub persistent: Option<bool>,
    /// Creation time, epoch milliseconds.
    pub created_at: u64,
    /// Remote orchestration correlation id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub maestro_session_id: Option<String>,
    /// Last known backend process id; the reconnect key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backend_session_id: Option<String>,
}

impl PersistedSessionV1 {
    /// Durable projection of a live session.
    #[must_use]
    pub fn from_session(session: &Session) -> Self {
        Self {
            persist_id: session.persist_id.clone(),
            project_id: session.project_id.clone(),
            name: session.name.clone(),
            cwd: session.cwd.clone(),
            launch_command: session.launch_command.clone(),
            restore_command: session.restore_command.clone(),
            persistent: Some(session.persistent),
            created_at: u64::try_from(session.created_at.timestamp_millis()).unwrap_or(0),
            maestro_session_id: session.maestro_session_id.clone(),
            backend_session_id: Some(session.id.clone()),
        }
    }

    /// Creation timestamp as a `DateTime`, for deterministic restore order.
    #[must_use]
    pub fn created_at_utc(&self) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(i64::try_from(self.created_at).unwrap_or(0))
            .single()
            .unwrap_or_else(Utc::now)
    }
}

/// Saved prompt snippet. Managed by UI surfaces outside this core; the
/// manager only round-trips them through the state file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PersistedPromptV1 {
    /// Prompt identifier.
    pub id: String,
    /// Display title.
    pub title: String,
    /// Prompt text.
    pub content: String,
    /// Creation time, epoch milliseconds.
    pub created_at: u64,
}

/// Saved environment-variable set. Managed outside this core; contents may
/// be an opaque ciphertext when the host encrypts at rest.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PersistedEnvironmentV1 {
    /// Environment identifier.
    pub id: String,
    /// Display name.
    pub name: String,
    /// `KEY=value` lines, possibly encrypted by the host.
    pub content: String,
    /// Creation time, epoch milliseconds.
    pub created_at: u64,
}

/// Root of the persisted-state file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PersistedStateV1 {
    /// Schema version; files with any other version are ignored.
    pub schema_version: u32,
    /// Known projects.
    pub projects: Vec<PersistedProjectV1>,
    /// Most recently active project.
    pub active_project_id: String,
    /// Sessions, excluding those that were mid-teardown at save time.
    pub sessions: Vec<PersistedSessionV1>,
    /// Active session (`persist_id`) per project.
    pub active_session_by_project: HashMap<String, String>,
    /// Saved prompts, round-tripped as-is.
    #[serde(default)]
    pub prompts: Vec<PersistedPromptV1>,
    /// Saved environments, round-tripped as-is.
    #[serde(default)]
    pub environments: Vec<PersistedEnvironmentV1>,
}

impl PersistedStateV1 {
    /// An empty state at the current schema version.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            projects: Vec::new(),
            active_project_id: String::new(),
            sessions: Vec::new(),
            active_session_by_project: HashMap::new(),
            prompts: Vec::new(),
            environments: Vec::new(),
        }
    }
}

impl Default for PersistedStateV1 {
    fn default() -> Self {
        Self::empty()
    }
}

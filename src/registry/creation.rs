//! Shared session-creation path.
//!
//! Explicit user actions and remote spawn events both go through
//! [`create_session`]: spawn the backend process, classify the command,
//! then register. The reconciliation engine assembles sessions itself
//! because it must preserve persisted identity.

use std::collections::HashMap;

use tracing::warn;

use super::RegistryHandle;
use crate::host::{ProcessHost, SpawnSpec};
use crate::models::effect::match_effect;
use crate::models::session::Session;
use crate::Result;

/// Parameters for creating a brand-new session.
#[derive(Debug, Clone, Default)]
pub struct CreateSessionRequest {
    /// Owning project.
    pub project_id: String,
    /// Requested display name; deduplicated against existing sessions.
    pub name: Option<String>,
    /// Working directory.
    pub cwd: Option<String>,
    /// Command to launch; `None` launches the user's shell.
    pub command: Option<String>,
    /// Command to re-issue if the session is ever recreated.
    pub restore_command: Option<String>,
    /// Whether the session survives app close.
    pub persistent: bool,
    /// Remote orchestration session this one is bound to, if any.
    pub maestro_session_id: Option<String>,
    /// Extra environment variables for the process.
    pub env: HashMap<String, String>,
}

/// Spawn a backend process and register the resulting session.
///
/// If registration fails after the process was spawned, the process is
/// closed again on a best-effort basis so no orphan is leaked.
///
/// # Errors
///
/// Returns [`AppError::Host`](crate::AppError::Host) if the spawn fails,
/// or the registry's error if the insert is rejected.
pub async fn create_session(
    host: &dyn ProcessHost,
    registry: &RegistryHandle,
    req: CreateSessionRequest,
) -> Result<Session> {
    let existing = registry.list_all().await?;
    let taken: Vec<String> = existing.into_iter().map(|s| s.name).collect();
    let base = req
        .name
        .as_deref()
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .unwrap_or(if req.command.is_some() { "agent" } else { "shell" });
    let name = unique_name(&taken, base);

    let spec = SpawnSpec {
        cwd: req.cwd.clone(),
        command: req.command.clone(),
        cols: None,
        rows: None,
        env: req.env,
    };
    let backend_id = host.create(spec).await?;

    let mut session = Session::new(backend_id.clone(), req.project_id, name);
    session.cwd = req.cwd;
    session.launch_command = req.command.clone();
    session.restore_command = req.restore_command;
    session.persistent = req.persistent;
    session.maestro_session_id = req.maestro_session_id;
    session.effect_id = req
        .command
        .as_deref()
        .and_then(match_effect)
        .map(|effect| effect.id.to_owned());

    if let Err(err) = registry.insert(session.clone()).await {
        warn!(%err, id = %backend_id, "insert rejected; closing freshly spawned process");
        if let Err(close_err) = host.close(&backend_id).await {
            warn!(%close_err, id = %backend_id, "failed to close rejected process");
        }
        return Err(err);
    }

    Ok(session)
}

/// Pick `base`, or `base-2`, `base-3`, … — the first name not taken.
#[must_use]
pub fn unique_name(taken: &[String], base: &str) -> String {
    if !taken.iter().any(|name| name == base) {
        return base.to_owned();
    }
    let mut n = 2usize;
    loop {
        let candidate = format!("{base}-{n}");
        if !taken.iter().any(|name| name == &candidate) {
            return candidate;
        }
        n += 1;
    }
}

//! Startup reconciliation: persisted sessions vs. the live process table.
//!
//! Runs exactly once, before the registry handle is shared with anything
//! else. Planning is a pure function so the reconnect/recreate/orphan
//! split is testable without a host; execution then reconnects without
//! spawning, recreates with restore-command replay, and closes orphans.
//! A failure on one session never blocks the rest of the restore.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, info_span, warn, Instrument};

use crate::host::{AliveProcess, ProcessHost, SpawnSpec};
use crate::models::effect::match_effect;
use crate::models::session::Session;
use crate::persistence::state::{PersistedSessionV1, PersistedStateV1};
use crate::registry::creation::{create_session, CreateSessionRequest};
use crate::registry::RegistryHandle;
use crate::Result;

/// Delay before replaying a restore command into a freshly recreated
/// session, letting the shell finish starting up.
pub const RESTORE_SETTLE_DELAY: Duration = Duration::from_millis(250);

/// How one persisted session will be restored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RestoreAction {
    /// The backend process is still alive: adopt it without spawning.
    Reconnect(AliveProcess),
    /// The backend process is gone: spawn a replacement.
    Recreate,
}

/// Output of the pure planning step.
#[derive(Debug, Clone, Default)]
pub struct RestorePlan {
    /// Persisted sessions in `created_at` order, each with its action.
    pub entries: Vec<(PersistedSessionV1, RestoreAction)>,
    /// Alive processes no persisted session accounts for.
    pub orphans: Vec<AliveProcess>,
}

/// Tally of what reconciliation did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RestoreReport {
    /// Sessions adopted from still-alive processes.
    pub reconnected: usize,
    /// Sessions respawned from persisted state.
    pub recreated: usize,
    /// Sessions skipped because their restore failed.
    pub failed: usize,
    /// Unaccounted-for processes that were closed.
    pub orphans_closed: usize,
    /// Whether the default session was created.
    pub default_created: bool,
}

/// Match persisted sessions against the alive-process table.
///
/// Each alive id is claimed at most once: claimed ids are removed from the
/// local copy of the table, so a later pass cannot double-claim a process,
/// and whatever is never claimed comes back as an orphan.
#[must_use]
pub fn plan(persisted: &[PersistedSessionV1], alive: Vec<AliveProcess>) -> RestorePlan {
    let mut remaining: HashMap<String, AliveProcess> =
        alive.into_iter().map(|p| (p.id.clone(), p)).collect();

    let mut ordered: Vec<PersistedSessionV1> = persisted.to_vec();
    ordered.sort_by_key(PersistedSessionV1::created_at_utc);

    let entries = ordered
        .into_iter()
        .map(|record| {
            let action = record
                .backend_session_id
                .as_deref()
                .and_then(|id| remaining.remove(id))
                .map_or(RestoreAction::Recreate, RestoreAction::Reconnect);
            (record, action)
        })
        .collect();

    let mut orphans: Vec<AliveProcess> = remaining.into_values().collect();
    orphans.sort_by(|a, b| a.id.cmp(&b.id));

    RestorePlan { entries, orphans }
}

/// Run the full startup restore against the registry.
///
/// # Errors
///
/// Returns an error only for registry unavailability; individual session
/// failures are reported in the [`RestoreReport`] and skipped.
pub async fn run(
    host: &Arc<dyn ProcessHost>,
    registry: &RegistryHandle,
    state: &PersistedStateV1,
) -> Result<RestoreReport> {
    async {
        registry.seed(state.clone()).await?;

        let alive = match host.list_alive().await {
            Ok(alive) => alive,
            Err(err) => {
                warn!(%err, "could not read live process table; recreating everything");
                Vec::new()
            }
        };
        let plan = plan(&state.sessions, alive);

        let mut report = RestoreReport::default();
        for (record, action) in plan.entries {
            match restore_one(host.as_ref(), registry, &record, &action).await {
                Ok(()) => match action {
                    RestoreAction::Reconnect(_) => report.reconnected += 1,
                    RestoreAction::Recreate => report.recreated += 1,
                },
                Err(err) => {
                    warn!(
                        persist_id = %record.persist_id,
                        name = %record.name,
                        %err,
                        "failed to restore session; skipping"
                    );
                    report.failed += 1;
                }
            }
        }

        for orphan in plan.orphans {
            info!(id = %orphan.id, "closing orphaned backend process");
            if let Err(err) = host.close(&orphan.id).await {
                warn!(id = %orphan.id, %err, "failed to close orphan");
            }
            report.orphans_closed += 1;
        }

        let restored = report.reconnected + report.recreated;
        if restored == 0 && !state.projects.is_empty() {
            report.default_created = create_default_session(host, registry, state).await;
        }

        registry.mark_hydrated().await?;
        info!(
            reconnected = report.reconnected,
            recreated = report.recreated,
            failed = report.failed,
            orphans = report.orphans_closed,
            "reconciliation complete"
        );
        Ok(report)
    }
    .instrument(info_span!("reconcile"))
    .await
}

async fn restore_one(
    host: &dyn ProcessHost,
    registry: &RegistryHandle,
    record: &PersistedSessionV1,
    action: &RestoreAction,
) -> Result<()> {
    match action {
        RestoreAction::Reconnect(alive) => {
            // Adopt the live process: its own attributes win over the
            // persisted ones, and nothing is spawned or replayed.
            let mut session = Session::new(
                alive.id.clone(),
                record.project_id.clone(),
                record.name.clone(),
            );
            session.persist_id.clone_from(&record.persist_id);
            session.created_at = record.created_at_utc();
            session.cwd = alive.cwd.clone().or_else(|| record.cwd.clone());
            session.launch_command = alive.command.clone().or_else(|| record.launch_command.clone());
            session.restore_command.clone_from(&record.restore_command);
            session.persistent = record.persistent.unwrap_or(false);
            session.maestro_session_id.clone_from(&record.maestro_session_id);
            session.effect_id = session
                .launch_command
                .as_deref()
                .and_then(match_effect)
                .map(|effect| effect.id.to_owned());
            registry.insert(session).await
        }
        RestoreAction::Recreate => {
            let spec = SpawnSpec {
                cwd: record.cwd.clone(),
                command: record.launch_command.clone(),
                cols: None,
                rows: None,
                env: HashMap::new(),
            };
            let backend_id = host.create(spec).await?;

            let mut session = Session::new(
                backend_id.clone(),
                record.project_id.clone(),
                record.name.clone(),
            );
            session.persist_id.clone_from(&record.persist_id);
            session.created_at = record.created_at_utc();
            session.cwd.clone_from(&record.cwd);
            session.launch_command.clone_from(&record.launch_command);
            session.restore_command.clone_from(&record.restore_command);
            session.persistent = record.persistent.unwrap_or(false);
            session.maestro_session_id.clone_from(&record.maestro_session_id);
            session.effect_id = record
                .launch_command
                .as_deref()
                .and_then(match_effect)
                .map(|effect| effect.id.to_owned());
            registry.insert(session).await?;

            // Only recreated sessions replay their restore command; a
            // reconnected process already executed it.
            if let Some(restore) = record
                .restore_command
                .as_deref()
                .map(str::trim)
                .filter(|cmd| !cmd.is_empty())
            {
                tokio::time::sleep(RESTORE_SETTLE_DELAY).await;
                let line = format!("{}\r", restore.lines().collect::<Vec<_>>().join("\n"));
                host.write(&backend_id, line.as_bytes()).await?;
            }
            Ok(())
        }
    }
}

/// When projects exist but nothing was restored, open one default shell in
/// the most recently active project's directory.
async fn create_default_session(
    host: &Arc<dyn ProcessHost>,
    registry: &RegistryHandle,
    state: &PersistedStateV1,
) -> bool {
    let project = state
        .projects
        .iter()
        .find(|p| p.id == state.active_project_id)
        .or_else(|| state.projects.first());
    let Some(project) = project else {
        return false;
    };

    let request = CreateSessionRequest {
        project_id: project.id.clone(),
        name: None,
        cwd: project.base_path.clone(),
        ..CreateSessionRequest::default()
    };
    match create_session(host.as_ref(), registry, request).await {
        Ok(session) => {
            info!(id = %session.id, project = %project.id, "created default session");
            true
        }
        Err(err) => {
            warn!(%err, "failed to create default session");
            false
        }
    }
}

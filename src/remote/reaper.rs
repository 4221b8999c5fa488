//! Orphan reaper: retires remote records with no local session.
//!
//! Every 30 seconds (and once immediately after reconciliation) the
//! reaper compares the server's active session records against the set of
//! remote ids backed by a live local session, and marks the unbacked ones
//! stopped. Everything is best-effort: a network failure is logged and
//! retried on the next tick.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::api::MaestroClient;
use crate::models::remote::{RemoteSessionPatch, RemoteSessionStatus};
use crate::registry::RegistryHandle;

/// Default sweep interval.
pub const REAP_INTERVAL: Duration = Duration::from_secs(30);

/// Spawn the reaper background task.
///
/// The first sweep runs immediately; later ones every `interval`.
#[must_use]
pub fn spawn_reaper(
    api: Arc<MaestroClient>,
    registry: RegistryHandle,
    interval: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    info!("orphan reaper shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    if let Err(err) = sweep(&api, &registry).await {
                        warn!(%err, "orphan sweep failed; will retry");
                    }
                }
            }
        }
    })
}

/// One sweep: mark every active remote session without a live local
/// counterpart as stopped. Returns how many were retired.
///
/// # Errors
///
/// Returns [`AppError::Remote`](crate::AppError::Remote) if the remote
/// listing fails; individual patch failures are logged and skipped.
pub async fn sweep(api: &MaestroClient, registry: &RegistryHandle) -> crate::Result<usize> {
    let local = registry.list_all().await?;
    let backed: HashSet<String> = local
        .iter()
        .filter(|s| s.is_live())
        .filter_map(|s| s.maestro_session_id.clone())
        .collect();

    let remote = api.list_sessions().await?;
    let mut retired = 0usize;
    for record in remote {
        if !record.status.is_active() || backed.contains(&record.id) {
            continue;
        }
        match api
            .update_session(&record.id, &RemoteSessionPatch::status(RemoteSessionStatus::Stopped))
            .await
        {
            Ok(()) => {
                info!(id = %record.id, was = ?record.status, "retired orphaned remote session");
                retired += 1;
            }
            Err(err) => warn!(id = %record.id, %err, "failed to retire remote session"),
        }
    }
    debug!(retired, "orphan sweep complete");
    Ok(retired)
}

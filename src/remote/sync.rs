//! Reconnecting event-stream client for the orchestration server.
//!
//! One shared connection, driven by a single task so only one connect
//! attempt can ever be in flight. The connection lifecycle is an explicit
//! [`ConnectionState`] machine; on loss the task sleeps an exponential
//! backoff (`1s × 2^attempts`, capped at 30s) that resets to the initial
//! delay after a successful connect. A companion mirror task pushes local
//! registry changes back to the server as status patches.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::api::MaestroClient;
use super::dedup::SpawnDedup;
use crate::host::ProcessHost;
use crate::models::remote::{
    RemoteEventFrame, RemoteSession, RemoteSessionPatch, RemoteSessionStatus, SpawnRequest,
};
use crate::registry::creation::{create_session, CreateSessionRequest};
use crate::registry::{RegistryEvent, RegistryHandle};

/// Connection lifecycle of the event-stream client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No connection; a retry may be scheduled.
    Disconnected,
    /// A connect attempt is in flight.
    Connecting,
    /// Subscribed and routing events.
    Connected,
}

/// Backoff before reconnect attempt number `attempts` (0-based).
#[must_use]
pub fn backoff_delay(attempts: u32, initial: Duration, max: Duration) -> Duration {
    let factor = 2u32.saturating_pow(attempts);
    initial.saturating_mul(factor).min(max)
}

/// Timing knobs for the sync channel.
#[derive(Debug, Clone)]
pub struct SyncSettings {
    /// First-retry delay.
    pub initial_backoff: Duration,
    /// Backoff ceiling.
    pub max_backoff: Duration,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(30),
        }
    }
}

/// Observer/controller handle for the sync channel task.
#[derive(Clone)]
pub struct SyncHandle {
    state: Arc<Mutex<ConnectionState>>,
    kick: Arc<Notify>,
}

impl SyncHandle {
    /// Current connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.state
            .lock()
            .map_or(ConnectionState::Disconnected, |guard| *guard)
    }

    /// Ask the channel to connect now, skipping any pending backoff.
    ///
    /// Returns `false` without doing anything when a connection attempt is
    /// already in flight or established — only one may exist at a time.
    pub fn request_connect(&self) -> bool {
        if self.state() != ConnectionState::Disconnected {
            return false;
        }
        self.kick.notify_one();
        true
    }
}

/// Everything the event router needs to act on a frame.
struct SyncContext {
    api: Arc<MaestroClient>,
    registry: RegistryHandle,
    host: Arc<dyn ProcessHost>,
    dedup: Arc<SpawnDedup>,
}

/// Spawn the sync channel task.
#[must_use]
pub fn spawn_sync(
    api: Arc<MaestroClient>,
    registry: RegistryHandle,
    host: Arc<dyn ProcessHost>,
    dedup: Arc<SpawnDedup>,
    settings: SyncSettings,
    cancel: CancellationToken,
) -> (SyncHandle, JoinHandle<()>) {
    let state = Arc::new(Mutex::new(ConnectionState::Disconnected));
    let kick = Arc::new(Notify::new());
    let handle = SyncHandle {
        state: Arc::clone(&state),
        kick: Arc::clone(&kick),
    };
    let ctx = SyncContext {
        api,
        registry,
        host,
        dedup,
    };
    let task = tokio::spawn(run(ctx, settings, state, kick, cancel));
    (handle, task)
}

fn set_state(state: &Arc<Mutex<ConnectionState>>, next: ConnectionState) {
    if let Ok(mut guard) = state.lock() {
        *guard = next;
    }
}

async fn run(
    ctx: SyncContext,
    settings: SyncSettings,
    state: Arc<Mutex<ConnectionState>>,
    kick: Arc<Notify>,
    cancel: CancellationToken,
) {
    let mut attempts: u32 = 0;
    loop {
        if cancel.is_cancelled() {
            break;
        }

        // This task is the only state writer, so moving to Connecting here
        // short-circuits external connect requests until we fall back to
        // Disconnected — at most one attempt is ever in flight.
        set_state(&state, ConnectionState::Connecting);

        let url = ctx.api.events_url();
        match connect_async(&url).await {
            Ok((ws, _response)) => {
                set_state(&state, ConnectionState::Connected);
                attempts = 0;
                info!(url, "event stream connected");
                serve_connection(&ctx, ws, &cancel).await;
                set_state(&state, ConnectionState::Disconnected);
                if cancel.is_cancelled() {
                    break;
                }
            }
            Err(err) => {
                set_state(&state, ConnectionState::Disconnected);
                warn!(url, %err, "event stream connect failed");
            }
        }

        let delay = backoff_delay(attempts, settings.initial_backoff, settings.max_backoff);
        attempts = attempts.saturating_add(1);
        debug!(?delay, attempts, "scheduling reconnect");
        tokio::select! {
            () = cancel.cancelled() => break,
            () = tokio::time::sleep(delay) => {}
            () = kick.notified() => {}
        }
    }
    info!("sync channel stopped");
}

/// Drive one established connection until it drops or shutdown.
async fn serve_connection(
    ctx: &SyncContext,
    ws: tokio_tungstenite::WebSocketStream<
        tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
    >,
    cancel: &CancellationToken,
) {
    let (mut sink, mut stream) = ws.split();

    let subscribe = serde_json::json!({
        "event": "subscribe",
        "data": { "topics": ["session", "task"] },
    });
    if let Err(err) = sink.send(Message::Text(subscribe.to_string())).await {
        warn!(%err, "subscribe failed");
        return;
    }

    refresh_caches(ctx).await;

    loop {
        tokio::select! {
            () = cancel.cancelled() => {
                let _ = sink.close().await;
                return;
            }
            frame = stream.next() => {
                match frame {
                    Some(Ok(Message::Text(text))) => route_frame(ctx, &text).await,
                    Some(Ok(Message::Ping(payload))) => {
                        let _ = sink.send(Message::Pong(payload)).await;
                    }
                    Some(Ok(Message::Close(_)) | Err(_)) | None => {
                        info!("event stream disconnected");
                        return;
                    }
                    Some(Ok(_)) => {}
                }
            }
        }
    }
}

/// Re-pull session records into the registry's mirror cache on (re)connect.
async fn refresh_caches(ctx: &SyncContext) {
    match ctx.api.list_sessions().await {
        Ok(sessions) => {
            for session in sessions {
                let _ = ctx.registry.remote_upsert(session).await;
            }
        }
        Err(err) => warn!(%err, "session cache refresh failed"),
    }
}

async fn route_frame(ctx: &SyncContext, text: &str) {
    let frame: RemoteEventFrame = match serde_json::from_str(text) {
        Ok(frame) => frame,
        Err(err) => {
            debug!(%err, "ignoring malformed event frame");
            return;
        }
    };

    match frame.event.as_str() {
        "session:created" | "session:updated" => {
            match serde_json::from_value::<RemoteSession>(frame.data) {
                Ok(session) => {
                    let _ = ctx.registry.remote_upsert(session).await;
                }
                Err(err) => debug!(%err, "ignoring malformed session record"),
            }
        }
        "session:deleted" => {
            if let Some(id) = frame.data.get("id").and_then(|v| v.as_str()) {
                let _ = ctx.registry.remote_remove(id).await;
            }
        }
        "session:spawn" => match serde_json::from_value::<SpawnRequest>(frame.data) {
            Ok(request) => handle_spawn(ctx, request).await,
            Err(err) => debug!(%err, "ignoring malformed spawn request"),
        },
        event if event.starts_with("task:") => {
            // Task bookkeeping lives on the server; nothing to mirror.
            debug!(event, "task event ignored");
        }
        event => debug!(event, "unhandled event type"),
    }
}

/// Create the local session a `session:spawn` frame asks for, exactly once
/// per remote id within the dedup window.
async fn handle_spawn(ctx: &SyncContext, request: SpawnRequest) {
    if !ctx.dedup.try_claim(&request.session_id) {
        return;
    }

    let snapshot = match ctx.registry.snapshot().await {
        Ok(snapshot) => snapshot,
        Err(err) => {
            warn!(%err, "spawn dropped; registry unavailable");
            return;
        }
    };
    let project_id = request
        .project_id
        .clone()
        .filter(|id| snapshot.projects.iter().any(|p| &p.id == id))
        .unwrap_or_else(|| snapshot.active_project_id.clone());
    let cwd = request.cwd.clone().or_else(|| {
        snapshot
            .projects
            .iter()
            .find(|p| p.id == project_id)
            .and_then(|p| p.base_path.clone())
    });

    let create = CreateSessionRequest {
        project_id,
        name: Some(format!("maestro-{}", &request.session_id)),
        cwd,
        command: request.command.clone(),
        maestro_session_id: Some(request.session_id.clone()),
        ..CreateSessionRequest::default()
    };

    match create_session(ctx.host.as_ref(), &ctx.registry, create).await {
        Ok(session) => {
            info!(id = %session.id, remote = %request.session_id, "spawned session for remote request");
            let patch = RemoteSessionPatch::status(RemoteSessionStatus::Idle);
            if let Err(err) = ctx.api.update_session(&request.session_id, &patch).await {
                warn!(%err, "failed to acknowledge spawn");
            }
        }
        Err(err) => {
            warn!(remote = %request.session_id, %err, "remote spawn failed");
        }
    }
}

/// Spawn the mirror task: pushes local session changes to the server.
///
/// Deduplicates by last status sent per remote session so activity chatter
/// does not become a PATCH storm.
#[must_use]
pub fn spawn_mirror(
    api: Arc<MaestroClient>,
    mut events: mpsc::Receiver<RegistryEvent>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut last_sent: HashMap<String, RemoteSessionStatus> = HashMap::new();
        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                maybe_event = events.recv() => {
                    let Some(event) = maybe_event else { break };
                    mirror_event(&api, &mut last_sent, event).await;
                }
            }
        }
    })
}

async fn mirror_event(
    api: &MaestroClient,
    last_sent: &mut HashMap<String, RemoteSessionStatus>,
    event: RegistryEvent,
) {
    match event {
        RegistryEvent::SessionCreated(session) | RegistryEvent::SessionUpdated(session) => {
            let Some(remote_id) = session.maestro_session_id.clone() else {
                return;
            };
            let status = RemoteSessionStatus::for_session(&session);
            if last_sent.get(&remote_id) == Some(&status) {
                return;
            }
            match api
                .update_session(&remote_id, &RemoteSessionPatch::status(status))
                .await
            {
                Ok(()) => {
                    last_sent.insert(remote_id, status);
                }
                Err(err) => warn!(remote_id, %err, "status mirror failed"),
            }
        }
        RegistryEvent::SessionRemoved(session) => {
            let Some(remote_id) = session.maestro_session_id.clone() else {
                return;
            };
            last_sent.remove(&remote_id);
            let patch = RemoteSessionPatch::status(RemoteSessionStatus::Stopped);
            if let Err(err) = api.update_session(&remote_id, &patch).await {
                warn!(remote_id, %err, "stop mirror failed");
            }
        }
    }
}

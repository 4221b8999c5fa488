//! Session registry: the authoritative, single-writer session store.
//!
//! The registry runs as one actor task ([`actor::RegistryActor`]) owning
//! every piece of mutable session state — the session map, pending-exit
//! and closing records, activity timers, and the persistence debounces.
//! [`RegistryHandle`] is the cloneable front door: mutations and queries
//! are commands on a single queue, which gives all callers a total order
//! without locks.

mod actor;
pub mod creation;
pub mod pending;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use actor::{Command, RegistryActor};

use crate::activity::RESIZE_SUPPRESS_WINDOW;
use crate::host::{HostEvent, ProcessHost};
use crate::models::project::Project;
use crate::models::remote::RemoteSession;
use crate::models::session::{Session, SessionId, SessionPatch};
use crate::persistence::state::PersistedStateV1;
use crate::persistence::store::StateStore;
use crate::registry::pending::ClosingGuards;
use crate::{AppError, Result};

const COMMAND_QUEUE_CAPACITY: usize = 256;
const ACTIVITY_QUEUE_CAPACITY: usize = 64;
const EVENT_QUEUE_CAPACITY: usize = 256;

/// Notifications emitted by the registry for mirroring and UI surfaces.
///
/// Delivery is best-effort; a full queue drops events rather than stalling
/// the single writer.
#[derive(Debug, Clone)]
pub enum RegistryEvent {
    /// A session was inserted.
    SessionCreated(Session),
    /// A session's fields changed (including activity toggles and exit).
    SessionUpdated(Session),
    /// A session finished teardown and left the registry.
    SessionRemoved(Session),
}

/// Tunable timings for the registry actor.
#[derive(Debug, Clone)]
pub struct RegistrySettings {
    /// Suppression window after a terminal resize.
    pub resize_suppress: Duration,
    /// Idle timeout fallback when a session's effect id is unknown.
    pub default_idle: Duration,
    /// Debounce for full-state persistence.
    pub save_debounce: Duration,
    /// Debounce for workspace-layout persistence.
    pub layout_debounce: Duration,
    /// TTL of closing records.
    pub closing_guard_ttl: Duration,
}

impl Default for RegistrySettings {
    fn default() -> Self {
        Self {
            resize_suppress: RESIZE_SUPPRESS_WINDOW,
            default_idle: Duration::from_millis(1500),
            save_debounce: Duration::from_millis(400),
            layout_debounce: Duration::from_millis(500),
            closing_guard_ttl: ClosingGuards::DEFAULT_TTL,
        }
    }
}

/// Cloneable handle to the registry actor.
#[derive(Clone)]
pub struct RegistryHandle {
    tx: mpsc::Sender<Command>,
}

/// Start the registry actor.
///
/// Returns the handle, the mirror-event receiver, and the actor's join
/// handle. The actor stops on `cancel`, on [`RegistryHandle::shutdown`],
/// or when every handle is dropped — flushing pending saves in all cases.
#[must_use]
pub fn spawn(
    host: Arc<dyn ProcessHost>,
    store: Arc<StateStore>,
    settings: RegistrySettings,
    cancel: CancellationToken,
) -> (RegistryHandle, mpsc::Receiver<RegistryEvent>, JoinHandle<()>) {
    let (tx, rx) = mpsc::channel(COMMAND_QUEUE_CAPACITY);
    let (activity_tx, activity_rx) = mpsc::channel(ACTIVITY_QUEUE_CAPACITY);
    let (events_tx, events_rx) = mpsc::channel(EVENT_QUEUE_CAPACITY);

    let actor = RegistryActor::new(
        host,
        store,
        settings,
        activity_tx,
        tx.clone(),
        events_tx,
        cancel,
    );
    let task = tokio::spawn(actor.run(rx, activity_rx));

    (RegistryHandle { tx }, events_rx, task)
}

impl RegistryHandle {
    async fn send(&self, cmd: Command) -> Result<()> {
        self.tx
            .send(cmd)
            .await
            .map_err(|_| AppError::InvalidState("session registry unavailable".into()))
    }

    async fn request<T>(&self, cmd: Command, rx: oneshot::Receiver<T>) -> Result<T> {
        self.send(cmd).await?;
        rx.await
            .map_err(|_| AppError::InvalidState("session registry unavailable".into()))
    }

    /// Register a session.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::InvalidState`] if a live session already exists
    /// for the same `persist_id`.
    pub async fn insert(&self, session: Session) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.request(Command::Insert { session, reply }, rx).await?
    }

    /// Apply a partial update; unknown ids are a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::InvalidState`] if the registry has stopped.
    pub async fn update(&self, id: impl Into<SessionId>, patch: SessionPatch) -> Result<()> {
        self.send(Command::Update {
            id: id.into(),
            patch,
        })
        .await
    }

    /// Tear a session down: mark closing, close/detach the process, then
    /// drop it from the registry. Resolves once teardown finished (or
    /// immediately for unknown/already-closing ids).
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Host`](crate::AppError::Host) if the backend
    /// close failed; the session then stays registered with `closing`
    /// rolled back.
    pub async fn remove(&self, id: impl Into<SessionId>) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.request(Command::Remove { id: id.into(), reply }, rx)
            .await?
    }

    /// Look a session up by backend id.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::InvalidState`] if the registry has stopped.
    pub async fn find(&self, id: impl Into<SessionId>) -> Result<Option<Session>> {
        let (reply, rx) = oneshot::channel();
        self.request(Command::Find { id: id.into(), reply }, rx).await
    }

    /// Look a session up by persistent id.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::InvalidState`] if the registry has stopped.
    pub async fn find_by_persist_id(&self, persist_id: impl Into<String>) -> Result<Option<Session>> {
        let (reply, rx) = oneshot::channel();
        self.request(
            Command::FindByPersistId {
                persist_id: persist_id.into(),
                reply,
            },
            rx,
        )
        .await
    }

    /// Sessions belonging to a project, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::InvalidState`] if the registry has stopped.
    pub async fn list_by_project(&self, project_id: impl Into<String>) -> Result<Vec<Session>> {
        let (reply, rx) = oneshot::channel();
        self.request(
            Command::ListByProject {
                project_id: project_id.into(),
                reply,
            },
            rx,
        )
        .await
    }

    /// All sessions, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::InvalidState`] if the registry has stopped.
    pub async fn list_all(&self) -> Result<Vec<Session>> {
        let (reply, rx) = oneshot::channel();
        self.request(Command::ListAll { reply }, rx).await
    }

    /// Feed one host event into the registry queue.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::InvalidState`] if the registry has stopped.
    pub async fn handle_host_event(&self, event: HostEvent) -> Result<()> {
        self.send(Command::Host(event)).await
    }

    /// Record a resize (refreshing the output-suppression window) and
    /// forward it to the host.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::InvalidState`] if the registry has stopped.
    pub async fn resize(&self, id: impl Into<SessionId>, cols: u16, rows: u16) -> Result<()> {
        self.send(Command::Resize {
            id: id.into(),
            cols,
            rows,
        })
        .await
    }

    /// Write bytes to a session's input stream.
    ///
    /// # Errors
    ///
    /// Returns the host's error if the write fails.
    pub async fn write_input(&self, id: impl Into<SessionId>, data: Vec<u8>) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.request(
            Command::WriteInput {
                id: id.into(),
                data,
                reply,
            },
            rx,
        )
        .await?
    }

    /// Seed projects, selection maps, and pass-through state from the
    /// persisted file (startup only).
    ///
    /// # Errors
    ///
    /// Returns [`AppError::InvalidState`] if the registry has stopped.
    pub async fn seed(&self, state: PersistedStateV1) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.request(
            Command::Seed {
                state: Box::new(state),
                reply,
            },
            rx,
        )
        .await
    }

    /// Enable save scheduling once the initial load has finished.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::InvalidState`] if the registry has stopped.
    pub async fn mark_hydrated(&self) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.request(Command::MarkHydrated { reply }, rx).await
    }

    /// Add or replace a project.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::InvalidState`] if the registry has stopped.
    pub async fn upsert_project(&self, project: Project) -> Result<()> {
        self.send(Command::UpsertProject(project)).await
    }

    /// Remove a project and its selection entry.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::InvalidState`] if the registry has stopped.
    pub async fn remove_project(&self, id: impl Into<String>) -> Result<()> {
        self.send(Command::RemoveProject { id: id.into() }).await
    }

    /// Change the active project.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::InvalidState`] if the registry has stopped.
    pub async fn set_active_project(&self, id: impl Into<String>) -> Result<()> {
        self.send(Command::SetActiveProject { id: id.into() }).await
    }

    /// Record the active session for a project.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::InvalidState`] if the registry has stopped.
    pub async fn set_active_session(
        &self,
        project_id: impl Into<String>,
        persist_id: impl Into<String>,
    ) -> Result<()> {
        self.send(Command::SetActiveSession {
            project_id: project_id.into(),
            persist_id: persist_id.into(),
        })
        .await
    }

    /// Mirror a remote session record into the local cache.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::InvalidState`] if the registry has stopped.
    pub async fn remote_upsert(&self, remote: RemoteSession) -> Result<()> {
        self.send(Command::RemoteUpsert(remote)).await
    }

    /// Drop a remote session record from the local cache.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::InvalidState`] if the registry has stopped.
    pub async fn remote_remove(&self, id: impl Into<String>) -> Result<()> {
        self.send(Command::RemoteRemove { id: id.into() }).await
    }

    /// Cached remote session records.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::InvalidState`] if the registry has stopped.
    pub async fn list_remote(&self) -> Result<Vec<RemoteSession>> {
        let (reply, rx) = oneshot::channel();
        self.request(Command::ListRemote { reply }, rx).await
    }

    /// Toggle persistence (e.g. when secure storage locks or unlocks).
    ///
    /// # Errors
    ///
    /// Returns [`AppError::InvalidState`] if the registry has stopped.
    pub async fn set_persistence_enabled(&self, enabled: bool) -> Result<()> {
        self.send(Command::SetPersistenceEnabled(enabled)).await
    }

    /// Schedule workspace-layout state for its independent debounced save.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::InvalidState`] if the registry has stopped.
    pub async fn update_layout(&self, layout: serde_json::Value) -> Result<()> {
        self.send(Command::UpdateLayout(layout)).await
    }

    /// Current persistable projection of the registry.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::InvalidState`] if the registry has stopped.
    pub async fn snapshot(&self) -> Result<PersistedStateV1> {
        let (reply, rx) = oneshot::channel();
        self.request(Command::Snapshot { reply }, rx).await
    }

    /// Stop the actor: flush saves, cancel timers, then close/detach every
    /// session — unless `keep_sessions` (dev hot-reload) is set.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::InvalidState`] if the registry already stopped.
    pub async fn shutdown(&self, keep_sessions: bool) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.request(
            Command::Shutdown {
                keep_sessions,
                reply,
            },
            rx,
        )
        .await
    }

    /// Forward host events into the registry until the channel closes.
    #[must_use]
    pub fn pump_host_events(
        &self,
        mut events: mpsc::Receiver<HostEvent>,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let handle = self.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    () = cancel.cancelled() => break,
                    maybe_event = events.recv() => {
                        let Some(event) = maybe_event else { break };
                        if handle.handle_host_event(event).await.is_err() {
                            break;
                        }
                    }
                }
            }
        })
    }
}

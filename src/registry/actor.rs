//! Single-writer registry actor.
//!
//! All mutable session state lives in [`RegistryActor`], which consumes
//! typed commands from one queue. Every command is processed to completion
//! before the next is dequeued, so mutations triggered by the same event
//! are applied as one atomic state transition and no reader ever observes
//! a half-updated session. Host, network, and timer work happens in other
//! tasks and re-enters the queue as commands.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::pending::{ClosingGuards, PendingExits};
use super::{RegistryEvent, RegistrySettings};
use crate::activity::{is_meaningful, ActivityEvent, ActivityTimer, ActivityTimerHandle};
use crate::host::{HostEvent, ProcessHost};
use crate::models::effect::{effect_by_id, match_effect};
use crate::models::project::Project;
use crate::models::remote::RemoteSession;
use crate::models::session::{Session, SessionId, SessionPatch};
use crate::persistence::scheduler::{sleep_until_deadline, Debounce};
use crate::persistence::state::{
    PersistedEnvironmentV1, PersistedProjectV1, PersistedPromptV1, PersistedSessionV1,
    PersistedStateV1, SCHEMA_VERSION,
};
use crate::persistence::store::StateStore;
use crate::{AppError, Result};

pub(crate) enum Command {
    Insert {
        session: Session,
        reply: oneshot::Sender<Result<()>>,
    },
    Update {
        id: SessionId,
        patch: SessionPatch,
    },
    Remove {
        id: SessionId,
        reply: oneshot::Sender<Result<()>>,
    },
    RemoveFinalize {
        id: SessionId,
        outcome: Result<()>,
        reply: Option<oneshot::Sender<Result<()>>>,
    },
    Find {
        id: SessionId,
        reply: oneshot::Sender<Option<Session>>,
    },
    FindByPersistId {
        persist_id: String,
        reply: oneshot::Sender<Option<Session>>,
    },
    ListByProject {
        project_id: String,
        reply: oneshot::Sender<Vec<Session>>,
    },
    ListAll {
        reply: oneshot::Sender<Vec<Session>>,
    },
    Host(HostEvent),
    Resize {
        id: SessionId,
        cols: u16,
        rows: u16,
    },
    WriteInput {
        id: SessionId,
        data: Vec<u8>,
        reply: oneshot::Sender<Result<()>>,
    },
    Seed {
        state: Box<PersistedStateV1>,
        reply: oneshot::Sender<()>,
    },
    MarkHydrated {
        reply: oneshot::Sender<()>,
    },
    UpsertProject(Project),
    RemoveProject {
        id: String,
    },
    SetActiveProject {
        id: String,
    },
    SetActiveSession {
        project_id: String,
        persist_id: String,
    },
    RemoteUpsert(RemoteSession),
    RemoteRemove {
        id: String,
    },
    ListRemote {
        reply: oneshot::Sender<Vec<RemoteSession>>,
    },
    SetPersistenceEnabled(bool),
    UpdateLayout(serde_json::Value),
    Snapshot {
        reply: oneshot::Sender<PersistedStateV1>,
    },
    Shutdown {
        keep_sessions: bool,
        reply: oneshot::Sender<()>,
    },
}

pub(crate) struct RegistryActor {
    host: Arc<dyn ProcessHost>,
    store: Arc<StateStore>,
    settings: RegistrySettings,
    sessions: HashMap<SessionId, Session>,
    projects: Vec<Project>,
    active_project_id: String,
    active_session_by_project: HashMap<String, String>,
    prompts: Vec<PersistedPromptV1>,
    environments: Vec<PersistedEnvironmentV1>,
    remote_sessions: HashMap<String, RemoteSession>,
    pending_exits: PendingExits,
    closing: ClosingGuards,
    activity: HashMap<SessionId, ActivityTimerHandle>,
    resize_marks: HashMap<SessionId, Instant>,
    save: Debounce<()>,
    layout_save: Debounce<serde_json::Value>,
    hydrated: bool,
    persist_enabled: bool,
    activity_tx: mpsc::Sender<ActivityEvent>,
    self_tx: mpsc::Sender<Command>,
    events_tx: mpsc::Sender<RegistryEvent>,
    cancel: CancellationToken,
}

impl RegistryActor {
    #[allow(clippy::too_many_arguments)] // internal wiring, built only by spawn()
    pub(crate) fn new(
        host: Arc<dyn ProcessHost>,
        store: Arc<StateStore>,
        settings: RegistrySettings,
        activity_tx: mpsc::Sender<ActivityEvent>,
        self_tx: mpsc::Sender<Command>,
        events_tx: mpsc::Sender<RegistryEvent>,
        cancel: CancellationToken,
    ) -> Self {
        let save = Debounce::new(settings.save_debounce);
        let layout_save = Debounce::new(settings.layout_debounce);
        let closing = ClosingGuards::with_ttl(settings.closing_guard_ttl);
        Self {
            host,
            store,
            settings,
            sessions: HashMap::new(),
            projects: Vec::new(),
            active_project_id: String::new(),
            active_session_by_project: HashMap::new(),
            prompts: Vec::new(),
            environments: Vec::new(),
            remote_sessions: HashMap::new(),
            pending_exits: PendingExits::default(),
            closing,
            activity: HashMap::new(),
            resize_marks: HashMap::new(),
            save,
            layout_save,
            hydrated: false,
            persist_enabled: true,
            activity_tx,
            self_tx,
            events_tx,
            cancel,
        }
    }

    pub(crate) async fn run(
        mut self,
        mut rx: mpsc::Receiver<Command>,
        mut activity_rx: mpsc::Receiver<ActivityEvent>,
    ) {
        let cancel = self.cancel.clone();
        loop {
            let save_at = self.save.deadline();
            let layout_at = self.layout_save.deadline();
            tokio::select! {
                () = cancel.cancelled() => {
                    self.flush_pending().await;
                    break;
                }
                maybe_cmd = rx.recv() => {
                    match maybe_cmd {
                        Some(cmd) => {
                            if self.dispatch(cmd).await {
                                break;
                            }
                        }
                        None => {
                            self.flush_pending().await;
                            break;
                        }
                    }
                }
                Some(event) = activity_rx.recv() => self.on_activity(&event),
                () = sleep_until_deadline(save_at), if save_at.is_some() => self.flush_save(),
                () = sleep_until_deadline(layout_at), if layout_at.is_some() => self.flush_layout(),
            }
        }
        debug!("session registry stopped");
    }

    /// Process one command; returns `true` when the actor should stop.
    async fn dispatch(&mut self, cmd: Command) -> bool {
        match cmd {
            Command::Insert { session, reply } => {
                let _ = reply.send(self.insert(session));
            }
            Command::Update { id, patch } => self.update(&id, patch),
            Command::Remove { id, reply } => self.remove(id, reply),
            Command::RemoveFinalize { id, outcome, reply } => {
                let result = self.remove_finalize(&id, outcome);
                if let Some(reply) = reply {
                    let _ = reply.send(result);
                }
            }
            Command::Find { id, reply } => {
                let _ = reply.send(self.sessions.get(&id).cloned());
            }
            Command::FindByPersistId { persist_id, reply } => {
                let found = self
                    .sessions
                    .values()
                    .find(|s| s.persist_id == persist_id)
                    .cloned();
                let _ = reply.send(found);
            }
            Command::ListByProject { project_id, reply } => {
                let mut sessions: Vec<Session> = self
                    .sessions
                    .values()
                    .filter(|s| s.project_id == project_id)
                    .cloned()
                    .collect();
                sessions.sort_by_key(|s| s.created_at);
                let _ = reply.send(sessions);
            }
            Command::ListAll { reply } => {
                let mut sessions: Vec<Session> = self.sessions.values().cloned().collect();
                sessions.sort_by_key(|s| s.created_at);
                let _ = reply.send(sessions);
            }
            Command::Host(event) => self.on_host_event(event),
            Command::Resize { id, cols, rows } => self.resize(&id, cols, rows),
            Command::WriteInput { id, data, reply } => {
                let host = Arc::clone(&self.host);
                tokio::spawn(async move {
                    let _ = reply.send(host.write(&id, &data).await);
                });
            }
            Command::Seed { state, reply } => {
                self.projects = state.projects.iter().map(PersistedProjectV1::to_project).collect();
                self.active_project_id = state.active_project_id;
                self.active_session_by_project = state.active_session_by_project;
                self.prompts = state.prompts;
                self.environments = state.environments;
                let _ = reply.send(());
            }
            Command::MarkHydrated { reply } => {
                self.hydrated = true;
                let _ = reply.send(());
            }
            Command::UpsertProject(project) => {
                if let Some(existing) = self.projects.iter_mut().find(|p| p.id == project.id) {
                    *existing = project;
                } else {
                    if self.active_project_id.is_empty() {
                        self.active_project_id.clone_from(&project.id);
                    }
                    self.projects.push(project);
                }
                self.schedule_save();
            }
            Command::RemoveProject { id } => {
                self.projects.retain(|p| p.id != id);
                self.active_session_by_project.remove(&id);
                if self.active_project_id == id {
                    self.active_project_id = self
                        .projects
                        .first()
                        .map(|p| p.id.clone())
                        .unwrap_or_default();
                }
                self.schedule_save();
            }
            Command::SetActiveProject { id } => {
                if self.projects.iter().any(|p| p.id == id) {
                    self.active_project_id = id;
                    self.schedule_save();
                }
            }
            Command::SetActiveSession {
                project_id,
                persist_id,
            } => {
                self.active_session_by_project.insert(project_id, persist_id);
                self.schedule_save();
            }
            Command::RemoteUpsert(remote) => {
                self.remote_sessions.insert(remote.id.clone(), remote);
            }
            Command::RemoteRemove { id } => {
                self.remote_sessions.remove(&id);
            }
            Command::ListRemote { reply } => {
                let _ = reply.send(self.remote_sessions.values().cloned().collect());
            }
            Command::SetPersistenceEnabled(enabled) => self.set_persistence_enabled(enabled),
            Command::UpdateLayout(layout) => {
                if self.hydrated && self.persist_enabled {
                    self.layout_save.schedule(layout, Instant::now());
                }
            }
            Command::Snapshot { reply } => {
                let _ = reply.send(self.snapshot());
            }
            Command::Shutdown {
                keep_sessions,
                reply,
            } => {
                self.shutdown(keep_sessions).await;
                let _ = reply.send(());
                return true;
            }
        }
        false
    }

    // ── Mutations ────────────────────────────────────────

    fn insert(&mut self, mut session: Session) -> Result<()> {
        let duplicate = self
            .sessions
            .values()
            .any(|s| s.persist_id == session.persist_id && !s.exited);
        if duplicate {
            return Err(AppError::InvalidState(format!(
                "live session already exists for persist id {}",
                session.persist_id
            )));
        }

        // Consume an exit that raced ahead of this registration.
        if let Some(code) = self.pending_exits.take(&session.id) {
            debug!(id = %session.id, "consuming pending exit for new session");
            session.mark_exited(code);
        }

        if session.is_live() {
            if let Some(effect_id) = session.effect_id.clone() {
                self.spawn_timer(&session.id, &effect_id);
            }
        }

        self.sessions.insert(session.id.clone(), session.clone());
        self.emit(RegistryEvent::SessionCreated(session));
        self.schedule_save();
        Ok(())
    }

    /// Apply a patch; a missing id is a defensive no-op since updates race
    /// with removal.
    fn update(&mut self, id: &str, patch: SessionPatch) {
        let Some(session) = self.sessions.get_mut(id) else {
            return;
        };
        patch.apply(session);
        let session = session.clone();
        self.emit(RegistryEvent::SessionUpdated(session));
        self.schedule_save();
    }

    fn remove(&mut self, id: SessionId, reply: oneshot::Sender<Result<()>>) {
        let Some(session) = self.sessions.get_mut(&id) else {
            let _ = reply.send(Ok(()));
            return;
        };
        if session.closing {
            // Teardown already in flight; never issue a second close.
            let _ = reply.send(Ok(()));
            return;
        }
        session.closing = true;
        let persistent = session.persistent;
        let already_exited = session.exited;
        self.closing.insert(id.clone());
        self.activity.remove(&id);

        if already_exited {
            // Nothing to close; finalize inline.
            let result = self.remove_finalize(&id, Ok(()));
            let _ = reply.send(result);
            return;
        }

        let host = Arc::clone(&self.host);
        let self_tx = self.self_tx.clone();
        tokio::spawn(async move {
            let outcome = if persistent {
                host.detach(&id).await
            } else {
                host.close(&id).await
            };
            let _ = self_tx
                .send(Command::RemoveFinalize {
                    id,
                    outcome,
                    reply: Some(reply),
                })
                .await;
        });
    }

    fn remove_finalize(&mut self, id: &str, outcome: Result<()>) -> Result<()> {
        match outcome {
            Ok(()) => {
                if let Some(session) = self.sessions.remove(id) {
                    self.resize_marks.remove(id);
                    info!(id, name = %session.name, "session removed");
                    self.emit(RegistryEvent::SessionRemoved(session));
                    self.schedule_save();
                }
                Ok(())
            }
            Err(err) => {
                // Roll the teardown back so the session stays usable and a
                // later remove can retry.
                warn!(id, %err, "close failed; rolling back teardown");
                self.closing.remove(id);
                if let Some(session) = self.sessions.get_mut(id) {
                    session.closing = false;
                    let effect_id = session.effect_id.clone();
                    let live = session.is_live();
                    if live {
                        if let Some(effect_id) = effect_id {
                            self.spawn_timer(&id.to_owned(), &effect_id);
                        }
                    }
                }
                Err(err)
            }
        }
    }

    // ── Host events ──────────────────────────────────────

    fn on_host_event(&mut self, event: HostEvent) {
        match event {
            HostEvent::Output { id, data } => self.on_output(&id, &data),
            HostEvent::Exit { id, code } => self.on_exit(&id, code),
            HostEvent::CommandChanged { id, command } => self.on_command_changed(&id, &command),
            HostEvent::CwdChanged { id, cwd } => self.on_cwd_changed(&id, cwd),
        }
    }

    fn on_output(&mut self, id: &str, data: &str) {
        if self.closing.contains(id) {
            return;
        }
        let Some(session) = self.sessions.get(id) else {
            return;
        };
        if session.effect_id.is_none() || session.exited || session.closing {
            return;
        }
        // Output shortly after a resize is redraw noise, not agent work.
        if self
            .resize_marks
            .get(id)
            .is_some_and(|at| at.elapsed() < self.settings.resize_suppress)
        {
            return;
        }
        if !is_meaningful(data) {
            return;
        }

        if let Some(session) = self.sessions.get_mut(id) {
            if !session.agent_working {
                session.agent_working = true;
                let session = session.clone();
                self.emit(RegistryEvent::SessionUpdated(session));
            }
        }
        if let Some(timer) = self.activity.get(id) {
            timer.reset();
        }
    }

    fn on_exit(&mut self, id: &str, code: Option<i32>) {
        if let Some(session) = self.sessions.get_mut(id) {
            session.mark_exited(code);
            let session = session.clone();
            info!(id, ?code, "session process exited");
            self.activity.remove(id);
            self.emit(RegistryEvent::SessionUpdated(session));
            self.schedule_save();
        } else {
            // Exit raced ahead of registration; hold the code for the insert.
            debug!(id, ?code, "exit for unregistered session; recording");
            self.pending_exits.record(id.to_owned(), code);
        }
    }

    fn on_command_changed(&mut self, id: &str, command: &str) {
        let Some(session) = self.sessions.get_mut(id) else {
            return;
        };
        if !session.is_live() {
            return;
        }
        let new_effect = if command.trim().is_empty() {
            None
        } else {
            match_effect(command).map(|effect| effect.id.to_owned())
        };

        let changed = session.effect_id != new_effect || session.agent_working;
        session.effect_id.clone_from(&new_effect);
        // A new foreground command starts idle.
        session.agent_working = false;
        let session = session.clone();

        self.activity.remove(id);
        if let Some(effect_id) = new_effect {
            self.spawn_timer(&id.to_owned(), &effect_id);
        }
        if changed {
            self.emit(RegistryEvent::SessionUpdated(session));
        }
    }

    fn on_cwd_changed(&mut self, id: &str, cwd: String) {
        let Some(session) = self.sessions.get_mut(id) else {
            return;
        };
        if session.cwd.as_deref() == Some(cwd.as_str()) {
            return;
        }
        session.cwd = Some(cwd);
        let session = session.clone();
        self.emit(RegistryEvent::SessionUpdated(session));
        self.schedule_save();
    }

    fn on_activity(&mut self, event: &ActivityEvent) {
        let ActivityEvent::Idle { id } = event;
        if let Some(session) = self.sessions.get_mut(id) {
            if session.agent_working && session.is_live() {
                session.agent_working = false;
                let session = session.clone();
                self.emit(RegistryEvent::SessionUpdated(session));
            }
        }
    }

    fn resize(&mut self, id: &str, cols: u16, rows: u16) {
        if !self.sessions.contains_key(id) {
            return;
        }
        // A resize refreshes only the suppression window, never the idle timer.
        self.resize_marks.insert(id.to_owned(), Instant::now());
        let host = Arc::clone(&self.host);
        let id = id.to_owned();
        tokio::spawn(async move {
            if let Err(err) = host.resize(&id, cols, rows).await {
                warn!(id, %err, "resize failed");
            }
        });
    }

    // ── Persistence ──────────────────────────────────────

    fn schedule_save(&mut self) {
        if self.hydrated && self.persist_enabled && self.store.is_enabled() {
            self.save.schedule((), Instant::now());
        }
    }

    fn set_persistence_enabled(&mut self, enabled: bool) {
        self.persist_enabled = enabled;
        if enabled {
            self.store.enable();
            self.schedule_save();
        } else {
            self.store.disable("secure storage locked");
            self.save.cancel();
            self.layout_save.cancel();
        }
    }

    fn snapshot(&self) -> PersistedStateV1 {
        let mut sessions: Vec<PersistedSessionV1> = self
            .sessions
            .values()
            .filter(|s| !s.closing)
            .map(PersistedSessionV1::from_session)
            .collect();
        sessions.sort_by_key(|s| s.created_at);
        PersistedStateV1 {
            schema_version: SCHEMA_VERSION,
            projects: self.projects.iter().map(PersistedProjectV1::from_project).collect(),
            active_project_id: self.active_project_id.clone(),
            sessions,
            active_session_by_project: self.active_session_by_project.clone(),
            prompts: self.prompts.clone(),
            environments: self.environments.clone(),
        }
    }

    fn flush_save(&mut self) {
        self.save.cancel();
        let snapshot = self.snapshot();
        let store = Arc::clone(&self.store);
        tokio::spawn(async move {
            if let Err(err) = store.save(snapshot).await {
                warn!(%err, "state save failed");
            }
        });
    }

    fn flush_layout(&mut self) {
        if let Some(layout) = self.layout_save.cancel() {
            let store = Arc::clone(&self.store);
            tokio::spawn(async move {
                if let Err(err) = store.save_layout(layout).await {
                    warn!(%err, "layout save failed");
                }
            });
        }
    }

    async fn flush_pending(&mut self) {
        if self.save.cancel().is_some() {
            let snapshot = self.snapshot();
            if let Err(err) = self.store.save(snapshot).await {
                warn!(%err, "final state save failed");
            }
        }
        if let Some(layout) = self.layout_save.cancel() {
            if let Err(err) = self.store.save_layout(layout).await {
                warn!(%err, "final layout save failed");
            }
        }
    }

    // ── Shutdown ─────────────────────────────────────────

    async fn shutdown(&mut self, keep_sessions: bool) {
        // Timers and pending debounces stop before any process is touched.
        self.activity.clear();
        self.flush_pending().await;

        if keep_sessions {
            info!("shutdown: sessions intentionally left running");
            return;
        }

        let targets: Vec<(SessionId, bool)> = self
            .sessions
            .values()
            .filter(|s| !s.exited && !s.closing)
            .map(|s| (s.id.clone(), s.persistent))
            .collect();
        for (id, persistent) in targets {
            let result = if persistent {
                self.host.detach(&id).await
            } else {
                self.host.close(&id).await
            };
            if let Err(err) = result {
                warn!(id, %err, "failed to release session at shutdown");
            }
        }
        info!("shutdown: sessions released");
    }

    // ── Helpers ──────────────────────────────────────────

    fn spawn_timer(&mut self, id: &SessionId, effect_id: &str) {
        let idle = effect_by_id(effect_id)
            .map_or(self.settings.default_idle, |effect| effect.idle_timeout);
        let timer = ActivityTimer::new(
            id.clone(),
            idle,
            self.activity_tx.clone(),
            self.cancel.child_token(),
        );
        self.activity.insert(id.clone(), timer.spawn());
    }

    fn emit(&self, event: RegistryEvent) {
        // Best-effort: mirroring must never stall the single writer.
        let _ = self.events_tx.try_send(event);
    }
}

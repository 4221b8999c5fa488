//! `portable-pty`-backed process host.
//!
//! Each session owns a PTY pair and a spawned child. A dedicated reader
//! thread per session decodes output, extracts shell-integration
//! notifications, and reports the final exit code once the stream ends.
//! Sessions removed from lifecycle control via [`ProcessHost::detach`]
//! keep their process and PTY alive for the remainder of the host's life.

use std::collections::HashMap;
use std::io::{Read, Write};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use portable_pty::{native_pty_system, Child, ChildKiller, CommandBuilder, MasterPty, PtySize};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::stream::{decode_utf8_stream, flush_carry, scan_osc1337, valid_env_key, OscNote};
use super::{AliveProcess, HostEvent, HostFuture, ProcessHost, SpawnSpec};
use crate::models::session::SessionId;
use crate::{AppError, Result};

const READ_BUF_SIZE: usize = 8192;
const DEFAULT_COLS: u16 = 80;
const DEFAULT_ROWS: u16 = 24;

struct PtyProc {
    master: Box<dyn MasterPty + Send>,
    writer: Box<dyn Write + Send>,
    child: Box<dyn Child + Send + Sync>,
    killer: Box<dyn ChildKiller + Send + Sync>,
    command: String,
    cwd: Option<String>,
    closing: bool,
    detached: bool,
}

struct PtyHostInner {
    next_id: AtomicU64,
    procs: Mutex<HashMap<SessionId, PtyProc>>,
    events_tx: mpsc::Sender<HostEvent>,
}

/// Process host backed by the platform's native PTY facility.
#[derive(Clone)]
pub struct PtyHost {
    inner: Arc<PtyHostInner>,
}

impl PtyHost {
    /// Create the host and the receiving end of its event channel.
    #[must_use]
    pub fn new(event_capacity: usize) -> (Self, mpsc::Receiver<HostEvent>) {
        let (events_tx, events_rx) = mpsc::channel(event_capacity);
        let host = Self {
            inner: Arc::new(PtyHostInner {
                next_id: AtomicU64::new(1),
                procs: Mutex::new(HashMap::new()),
                events_tx,
            }),
        };
        (host, events_rx)
    }

    /// Terminate all non-detached processes.
    ///
    /// With `keep_sessions` set (dev hot-reload) nothing is touched and
    /// processes survive until this host is dropped.
    pub fn shutdown(&self, keep_sessions: bool) {
        if keep_sessions {
            info!("host shutdown skipped; sessions intentionally left running");
            return;
        }
        let Ok(mut procs) = self.inner.procs.lock() else {
            return;
        };
        for (id, proc) in procs.iter_mut() {
            if proc.detached || proc.closing {
                continue;
            }
            proc.closing = true;
            if let Err(err) = proc.killer.kill() {
                warn!(id, %err, "failed to kill session process at shutdown");
            }
        }
    }
}

impl PtyHostInner {
    fn lock_procs(&self) -> Result<std::sync::MutexGuard<'_, HashMap<SessionId, PtyProc>>> {
        self.procs
            .lock()
            .map_err(|_| AppError::Host("session table poisoned".into()))
    }

    fn spawn_proc(self: &Arc<Self>, spec: SpawnSpec) -> Result<SessionId> {
        let size = PtySize {
            rows: spec.rows.unwrap_or(DEFAULT_ROWS),
            cols: spec.cols.unwrap_or(DEFAULT_COLS),
            pixel_width: 0,
            pixel_height: 0,
        };

        let pty_system = native_pty_system();
        let pair = pty_system
            .openpty(size)
            .map_err(|err| AppError::Host(format!("openpty failed: {err}")))?;

        let cwd = resolve_cwd(spec.cwd.as_deref());
        let (mut cmd, shown_command) = build_command(spec.command.as_deref());
        for (key, value) in &spec.env {
            if valid_env_key(key) {
                cmd.env(key.trim(), value);
            }
        }
        cmd.env("TERM", "xterm-256color");
        cmd.env("COLORTERM", "truecolor");
        if let Some(ref dir) = cwd {
            cmd.cwd(dir);
        }

        let child = pair
            .slave
            .spawn_command(cmd)
            .map_err(|err| AppError::Host(format!("spawn failed: {err}")))?;
        let reader = pair
            .master
            .try_clone_reader()
            .map_err(|err| AppError::Host(format!("clone reader failed: {err}")))?;
        let writer = pair
            .master
            .take_writer()
            .map_err(|err| AppError::Host(format!("take writer failed: {err}")))?;
        let killer = child.clone_killer();

        let id = self.next_id.fetch_add(1, Ordering::Relaxed).to_string();
        debug!(id, command = %shown_command, ?cwd, "created pty session");

        {
            let mut procs = self.lock_procs()?;
            procs.insert(
                id.clone(),
                PtyProc {
                    master: pair.master,
                    writer,
                    child,
                    killer,
                    command: shown_command,
                    cwd,
                    closing: false,
                    detached: false,
                },
            );
        }

        let inner = Arc::clone(self);
        let thread_id = id.clone();
        std::thread::spawn(move || inner.reader_loop(&thread_id, reader));

        Ok(id)
    }

    /// Per-session reader: pumps decoded output into the event channel
    /// until EOF, then reaps the child and reports its exit.
    fn reader_loop(self: Arc<Self>, id: &str, mut reader: Box<dyn Read + Send>) {
        let mut buf = [0u8; READ_BUF_SIZE];
        let mut carry: Vec<u8> = Vec::new();
        loop {
            match reader.read(&mut buf) {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    let data = decode_utf8_stream(&mut carry, &buf[..n]);
                    if !data.is_empty() {
                        self.emit_chunk(id, data);
                    }
                }
            }
        }

        let rest = flush_carry(&mut carry);
        if !rest.is_empty() {
            self.emit_chunk(id, rest);
        }

        // The stream ended: reap the child and drop the PTY handles.
        let proc = match self.procs.lock() {
            Ok(mut procs) => procs.remove(id),
            Err(_) => None,
        };
        let code = proc.and_then(|mut p| {
            let status = p.child.wait().ok();
            drop(p.master);
            status.and_then(|s| i32::try_from(s.exit_code()).ok())
        });
        let _ = self.events_tx.blocking_send(HostEvent::Exit {
            id: id.to_owned(),
            code,
        });
    }

    fn emit_chunk(&self, id: &str, data: String) {
        for note in scan_osc1337(&data) {
            match note {
                OscNote::Command(command) => {
                    if let Ok(mut procs) = self.procs.lock() {
                        if let Some(proc) = procs.get_mut(id) {
                            if !command.is_empty() {
                                proc.command.clone_from(&command);
                            }
                        }
                    }
                    let _ = self.events_tx.blocking_send(HostEvent::CommandChanged {
                        id: id.to_owned(),
                        command,
                    });
                }
                OscNote::CurrentDir(cwd) => {
                    if let Ok(mut procs) = self.procs.lock() {
                        if let Some(proc) = procs.get_mut(id) {
                            proc.cwd = Some(cwd.clone());
                        }
                    }
                    let _ = self.events_tx.blocking_send(HostEvent::CwdChanged {
                        id: id.to_owned(),
                        cwd,
                    });
                }
            }
        }
        let _ = self.events_tx.blocking_send(HostEvent::Output {
            id: id.to_owned(),
            data,
        });
    }

    fn write(&self, id: &str, data: &[u8]) -> Result<()> {
        let mut procs = self.lock_procs()?;
        let proc = procs
            .get_mut(id)
            .ok_or_else(|| AppError::NotFound(format!("session {id} not found")))?;
        if proc.closing {
            return Ok(());
        }
        proc.writer
            .write_all(data)
            .map_err(|err| AppError::Host(format!("write failed: {err}")))?;
        proc.writer.flush().ok();
        Ok(())
    }

    fn resize(&self, id: &str, cols: u16, rows: u16) -> Result<()> {
        let procs = self.lock_procs()?;
        let proc = procs
            .get(id)
            .ok_or_else(|| AppError::NotFound(format!("session {id} not found")))?;
        if proc.closing {
            return Ok(());
        }
        proc.master
            .resize(PtySize {
                rows,
                cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|err| AppError::Host(format!("resize failed: {err}")))
    }

    fn close(&self, id: &str) -> Result<()> {
        let mut procs = self.lock_procs()?;
        let Some(proc) = procs.get_mut(id) else {
            return Ok(());
        };
        if proc.closing {
            return Ok(());
        }
        proc.closing = true;
        proc.killer
            .kill()
            .map_err(|err| AppError::Host(format!("kill failed: {err}")))
    }

    fn detach(&self, id: &str) -> Result<()> {
        let mut procs = self.lock_procs()?;
        let proc = procs
            .get_mut(id)
            .ok_or_else(|| AppError::NotFound(format!("session {id} not found")))?;
        proc.detached = true;
        debug!(id, "session detached from lifecycle control");
        Ok(())
    }

    fn list_alive(&self) -> Result<Vec<AliveProcess>> {
        let procs = self.lock_procs()?;
        Ok(procs
            .iter()
            .filter(|(_, proc)| !proc.closing)
            .map(|(id, proc)| AliveProcess {
                id: id.clone(),
                cwd: proc.cwd.clone(),
                command: Some(proc.command.clone()),
            })
            .collect())
    }
}

impl ProcessHost for PtyHost {
    fn create(&self, spec: SpawnSpec) -> HostFuture<'_, SessionId> {
        let inner = Arc::clone(&self.inner);
        Box::pin(async move {
            tokio::task::spawn_blocking(move || inner.spawn_proc(spec))
                .await
                .map_err(|err| AppError::Host(format!("spawn task panicked: {err}")))?
        })
    }

    fn write(&self, id: &str, data: &[u8]) -> HostFuture<'_, ()> {
        let inner = Arc::clone(&self.inner);
        let id = id.to_owned();
        let data = data.to_vec();
        Box::pin(async move { inner.write(&id, &data) })
    }

    fn resize(&self, id: &str, cols: u16, rows: u16) -> HostFuture<'_, ()> {
        let inner = Arc::clone(&self.inner);
        let id = id.to_owned();
        Box::pin(async move { inner.resize(&id, cols, rows) })
    }

    fn close(&self, id: &str) -> HostFuture<'_, ()> {
        let inner = Arc::clone(&self.inner);
        let id = id.to_owned();
        Box::pin(async move { inner.close(&id) })
    }

    fn detach(&self, id: &str) -> HostFuture<'_, ()> {
        let inner = Arc::clone(&self.inner);
        let id = id.to_owned();
        Box::pin(async move { inner.detach(&id) })
    }

    fn list_alive(&self) -> HostFuture<'_, Vec<AliveProcess>> {
        let inner = Arc::clone(&self.inner);
        Box::pin(async move { inner.list_alive() })
    }
}

/// The user's preferred shell, from `$SHELL` with platform fallbacks.
#[must_use]
pub fn default_user_shell() -> String {
    if let Ok(shell) = std::env::var("SHELL") {
        let trimmed = shell.trim();
        if !trimmed.is_empty() {
            return trimmed.to_owned();
        }
    }

    #[cfg(target_os = "macos")]
    {
        "/bin/zsh".to_owned()
    }
    #[cfg(all(target_family = "unix", not(target_os = "macos")))]
    {
        if Path::new("/bin/bash").is_file() {
            "/bin/bash".to_owned()
        } else {
            "/bin/sh".to_owned()
        }
    }
    #[cfg(not(target_family = "unix"))]
    {
        std::env::var("COMSPEC").unwrap_or_else(|_| "cmd.exe".to_owned())
    }
}

fn resolve_cwd(requested: Option<&str>) -> Option<String> {
    requested
        .map(str::trim)
        .filter(|dir| !dir.is_empty() && Path::new(dir).is_dir())
        .map(ToOwned::to_owned)
        .or_else(|| {
            #[cfg(target_family = "unix")]
            let home = std::env::var("HOME").ok();
            #[cfg(not(target_family = "unix"))]
            let home = std::env::var("USERPROFILE").ok();
            home.filter(|dir| Path::new(dir).is_dir())
        })
}

/// Build the command to spawn and the display string shown to the user.
fn build_command(command: Option<&str>) -> (CommandBuilder, String) {
    let shell = default_user_shell();
    let command = command.map(str::trim).unwrap_or_default();

    #[cfg(target_family = "unix")]
    {
        if command.is_empty() {
            let mut cmd = CommandBuilder::new(&shell);
            cmd.arg("-l");
            cmd.env("SHELL", &shell);
            (cmd, format!("{shell} -l"))
        } else {
            // Command strings use POSIX syntax, so always run them under a
            // POSIX-compatible shell regardless of the user's login shell.
            let posix_shell = if Path::new("/bin/bash").is_file() {
                "/bin/bash"
            } else {
                "/bin/sh"
            };
            let mut cmd = CommandBuilder::new(posix_shell);
            cmd.arg("-lc");
            cmd.arg(command);
            cmd.env("SHELL", &shell);
            (cmd, format!("{posix_shell} -lc {command}"))
        }
    }
    #[cfg(not(target_family = "unix"))]
    {
        if command.is_empty() {
            (CommandBuilder::new(&shell), shell)
        } else {
            let mut cmd = CommandBuilder::new(&shell);
            cmd.arg("/C");
            cmd.arg(command);
            (cmd, format!("{shell} /C {command}"))
        }
    }
}

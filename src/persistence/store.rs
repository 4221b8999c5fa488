//! Atomic file store for persisted state.
//!
//! Writes go to a temp file in the target directory, are fsynced, then
//! renamed over the destination so a crash never leaves a torn file.
//! Workspace-view layout state lives in its own file so its independent
//! debounce cadence never rewrites the full state.
//!
//! When the secure-storage backend is locked the store can be disabled:
//! the condition is surfaced once as a standing notice and every later
//! save becomes a silent no-op until re-enabled.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{info, warn};

use super::state::{PersistedStateV1, SCHEMA_VERSION};
use crate::{AppError, Result};

const STATE_FILE: &str = "state-v1.json";
const LAYOUT_FILE: &str = "layout-v1.json";

/// Durable store rooted at the application data directory.
pub struct StateStore {
    dir: PathBuf,
    enabled: AtomicBool,
    notice_logged: AtomicBool,
}

impl StateStore {
    /// Create a store rooted at `dir` (created if missing).
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Io`] if the directory cannot be created.
    pub fn new(dir: impl Into<PathBuf>) -> Result<Arc<Self>> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Arc::new(Self {
            dir,
            enabled: AtomicBool::new(true),
            notice_logged: AtomicBool::new(false),
        }))
    }

    /// Path of the main state file.
    #[must_use]
    pub fn state_path(&self) -> PathBuf {
        self.dir.join(STATE_FILE)
    }

    /// Whether saves are currently performed.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    /// Disable persistence (e.g. locked secure storage).
    ///
    /// The reason is surfaced once; subsequent saves no-op silently.
    pub fn disable(&self, reason: &str) {
        self.enabled.store(false, Ordering::SeqCst);
        if !self.notice_logged.swap(true, Ordering::SeqCst) {
            warn!(reason, "persistence disabled; session state will not be saved");
        }
    }

    /// Re-enable persistence and clear the standing notice.
    pub fn enable(&self) {
        self.enabled.store(true, Ordering::SeqCst);
        if self.notice_logged.swap(false, Ordering::SeqCst) {
            info!("persistence re-enabled");
        }
    }

    /// Load the persisted state.
    ///
    /// A missing file or a different schema version yields `Ok(None)`.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Io`] on a read failure other than not-found, or
    /// [`AppError::Persist`] if the file exists but cannot be parsed.
    pub fn load(&self) -> Result<Option<PersistedStateV1>> {
        let raw = match std::fs::read_to_string(self.state_path()) {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(AppError::Io(format!("read state failed: {err}"))),
        };
        let state: PersistedStateV1 = serde_json::from_str(&raw)?;
        if state.schema_version != SCHEMA_VERSION {
            warn!(
                found = state.schema_version,
                expected = SCHEMA_VERSION,
                "ignoring persisted state with unknown schema version"
            );
            return Ok(None);
        }
        Ok(Some(state))
    }

    /// Save the persisted state atomically. No-op while disabled.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Persist`] on serialization failure or
    /// [`AppError::Io`] on a write failure.
    pub async fn save(self: &Arc<Self>, state: PersistedStateV1) -> Result<()> {
        if !self.is_enabled() {
            return Ok(());
        }
        let store = Arc::clone(self);
        tokio::task::spawn_blocking(move || store.write_json(STATE_FILE, &state))
            .await
            .map_err(|err| AppError::Io(format!("save task panicked: {err}")))?
    }

    /// Save workspace-view layout state atomically. No-op while disabled.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Persist`] / [`AppError::Io`] as [`save`](Self::save).
    pub async fn save_layout(self: &Arc<Self>, layout: serde_json::Value) -> Result<()> {
        if !self.is_enabled() {
            return Ok(());
        }
        let store = Arc::clone(self);
        tokio::task::spawn_blocking(move || store.write_json(LAYOUT_FILE, &layout))
            .await
            .map_err(|err| AppError::Io(format!("save task panicked: {err}")))?
    }

    /// Delete all persisted files (`--clear-data`).
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Io`] on a deletion failure other than not-found.
    pub fn clear(&self) -> Result<()> {
        for name in [STATE_FILE, LAYOUT_FILE] {
            match std::fs::remove_file(self.dir.join(name)) {
                Ok(()) => {}
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
                Err(err) => return Err(AppError::Io(format!("delete failed: {err}"))),
            }
        }
        Ok(())
    }

    fn write_json<T: serde::Serialize>(&self, name: &str, value: &T) -> Result<()> {
        let json = serde_json::to_string_pretty(value)?;
        let path = self.dir.join(name);
        atomic_write(&self.dir, &path, json.as_bytes())
    }
}

/// Write bytes to `path` via a same-directory temp file and rename.
fn atomic_write(dir: &Path, path: &Path, bytes: &[u8]) -> Result<()> {
    let mut tmp = tempfile::NamedTempFile::new_in(dir)
        .map_err(|err| AppError::Io(format!("create temp failed: {err}")))?;
    tmp.write_all(bytes)
        .map_err(|err| AppError::Io(format!("write temp failed: {err}")))?;
    tmp.write_all(b"\n")
        .map_err(|err| AppError::Io(format!("write temp failed: {err}")))?;
    tmp.as_file().sync_all().ok();
    tmp.persist(path)
        .map_err(|err| AppError::Io(format!("rename failed: {err}")))?;
    // Best-effort: make the directory entry for the rename durable.
    let _ = std::fs::File::open(dir).and_then(|handle| handle.sync_all());
    Ok(())
}

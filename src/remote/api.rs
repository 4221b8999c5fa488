//! REST client for the orchestration server's session records.

use std::time::Duration;

use tracing::debug;

use crate::models::remote::{NewRemoteSession, RemoteSession, RemoteSessionPatch};
use crate::{AppError, Result};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Thin typed wrapper over the server's session CRUD endpoints.
#[derive(Debug, Clone)]
pub struct MaestroClient {
    base_url: String,
    http: reqwest::Client,
}

impl MaestroClient {
    /// Create a client for the server at `base_url` (scheme + authority).
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Remote`] if the HTTP client cannot be built.
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|err| AppError::Remote(format!("http client build failed: {err}")))?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_owned(),
            http,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    /// WebSocket URL of the server's event stream.
    #[must_use]
    pub fn events_url(&self) -> String {
        let ws_base = if let Some(rest) = self.base_url.strip_prefix("https://") {
            format!("wss://{rest}")
        } else if let Some(rest) = self.base_url.strip_prefix("http://") {
            format!("ws://{rest}")
        } else {
            self.base_url.clone()
        };
        format!("{ws_base}/api/events")
    }

    /// Fetch all session records.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Remote`] on a transport or status failure.
    pub async fn list_sessions(&self) -> Result<Vec<RemoteSession>> {
        let sessions = self
            .http
            .get(self.url("/api/sessions"))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(sessions)
    }

    /// Create a session record.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Remote`] on a transport or status failure.
    pub async fn create_session(&self, new: &NewRemoteSession) -> Result<RemoteSession> {
        let session = self
            .http
            .post(self.url("/api/sessions"))
            .json(new)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(session)
    }

    /// Patch a session record.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Remote`] on a transport or status failure.
    pub async fn update_session(&self, id: &str, patch: &RemoteSessionPatch) -> Result<()> {
        debug!(id, ?patch, "patching remote session");
        self.http
            .patch(self.url(&format!("/api/sessions/{id}")))
            .json(patch)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    /// Delete a session record.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Remote`] on a transport or status failure.
    pub async fn delete_session(&self, id: &str) -> Result<()> {
        self.http
            .delete(self.url(&format!("/api/sessions/{id}")))
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}

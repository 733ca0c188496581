//! In-memory session store owned by one agent.
//!
//! Sessions live only as long as the process; there is no persistence.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use serde_json::json;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::acp::message::RpcError;
use crate::bridge::permissions::PermissionMode;
use crate::{AppError, Result};

/// Snapshot of one session.
#[derive(Debug, Clone)]
pub struct Session {
    /// Opaque id handed to the client.
    pub id: String,
    /// Working directory for commands.
    pub cwd: PathBuf,
    /// Permission mode for this session.
    pub mode: PermissionMode,
}

#[derive(Debug)]
struct Entry {
    session: Session,
    turn: Option<CancellationToken>,
}

/// Sessions keyed by id.  Cheap to clone.
#[derive(Debug, Clone)]
pub struct SessionStore {
    inner: Arc<Mutex<HashMap<String, Entry>>>,
    default_mode: PermissionMode,
}

impl SessionStore {
    /// Empty store; new sessions start in `default_mode`.
    #[must_use]
    pub fn new(default_mode: PermissionMode) -> Self {
        Self {
            inner: Arc::new(Mutex::new(HashMap::new())),
            default_mode,
        }
    }

    /// Create a session with a fresh id.
    pub async fn create(&self, cwd: PathBuf) -> Session {
        let id = uuid::Uuid::new_v4().to_string();
        self.insert(id, cwd).await
    }

    /// Register `id` if unknown, e.g. when the client loads a session.
    pub async fn ensure(&self, id: &str, cwd: PathBuf) -> Session {
        if let Some(existing) = self.get(id).await {
            return existing;
        }
        self.insert(id.to_owned(), cwd).await
    }

    async fn insert(&self, id: String, cwd: PathBuf) -> Session {
        let session = Session {
            id: id.clone(),
            cwd,
            mode: self.default_mode,
        };
        info!(session_id = id.as_str(), cwd = %session.cwd.display(), "session created");
        self.inner.lock().await.insert(
            id,
            Entry {
                session: session.clone(),
                turn: None,
            },
        );
        session
    }

    /// Look up a session.
    pub async fn get(&self, id: &str) -> Option<Session> {
        self.inner.lock().await.get(id).map(|e| e.session.clone())
    }

    /// Change a session's permission mode.
    ///
    /// # Errors
    ///
    /// [`AppError::NotFound`] for an unknown session.
    pub async fn set_mode(&self, id: &str, mode: PermissionMode) -> Result<()> {
        let mut sessions = self.inner.lock().await;
        let entry = sessions
            .get_mut(id)
            .ok_or_else(|| AppError::NotFound(format!("session {id}")))?;
        entry.session.mode = mode;
        info!(session_id = id, %mode, "session mode changed");
        Ok(())
    }

    /// Start a turn and return the session with the turn's cancel token.
    ///
    /// The token is a child of `parent`, so it also fires when the
    /// connection shuts down.
    ///
    /// # Errors
    ///
    /// - [`AppError::NotFound`]: unknown session.
    /// - [`AppError::Protocol`]: a turn is already running in this session.
    pub async fn begin_turn(&self, id: &str, parent: &CancellationToken) -> Result<(Session, CancellationToken)> {
        let mut sessions = self.inner.lock().await;
        let entry = sessions
            .get_mut(id)
            .ok_or_else(|| AppError::NotFound(format!("session {id}")))?;
        if entry.turn.is_some() {
            return Err(AppError::Protocol(RpcError::invalid_request(Some(json!({
                "details": format!("session {id} already has a turn running")
            })))));
        }
        let token = parent.child_token();
        entry.turn = Some(token.clone());
        Ok((entry.session.clone(), token))
    }

    /// Mark the session's turn finished.
    pub async fn end_turn(&self, id: &str) {
        if let Some(entry) = self.inner.lock().await.get_mut(id) {
            entry.turn = None;
        }
    }

    /// Cancel the session's running turn.  Returns whether one was running.
    pub async fn cancel_turn(&self, id: &str) -> bool {
        let sessions = self.inner.lock().await;
        match sessions.get(id).and_then(|e| e.turn.as_ref()) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }
}

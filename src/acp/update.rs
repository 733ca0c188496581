//! Session update model.
//!
//! An agent reports progress of a turn as a stream of `session/update`
//! notifications, each scoped to a session id.  This module defines the
//! closed set of update variants and the single emission primitive,
//! [`UpdateEmitter::emit`].
//!
//! # Tool-call sequencing
//!
//! [`ToolCallTracker`] enforces, before anything reaches the wire, that for
//! a given session:
//!
//! - a `tool_call` id is not started twice while it is still open;
//! - a `tool_call_update` refers to an id that was started and not yet
//!   terminated;
//! - exactly one terminal update (`completed`, `failed`, `cancelled`)
//!   closes the id.
//!
//! Violations fail with [`AppError::Sequence`] and nothing is sent.  The
//! emitter holds its tracker lock across the write, so wire order always
//! matches validation order.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::acp::connection::Connection;
use crate::acp::message::RpcError;
use crate::acp::methods::ClientMethod;
use crate::{AppError, Result};

/// Lifecycle status of a tool call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolCallStatus {
    /// Announced, not yet running.
    Started,
    /// Running.
    InProgress,
    /// Finished successfully.
    Completed,
    /// Finished with an error.
    Failed,
    /// Abandoned (denied or turn cancelled).
    Cancelled,
}

impl ToolCallStatus {
    /// Whether this status closes the tool call.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

/// Status of one plan step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanStepStatus {
    /// Not started.
    Pending,
    /// Being worked on.
    InProgress,
    /// Done.
    Completed,
}

/// One entry of a plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanStep {
    /// Human-readable description.
    pub content: String,
    /// Progress.
    pub status: PlanStepStatus,
}

/// One incremental update within a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum SessionUpdate {
    /// Agent output text; chunks of one turn concatenate in emission order.
    AgentMessageChunk {
        /// Text fragment.
        text: String,
    },
    /// Agent reasoning text, shown separately from the answer.
    AgentThoughtChunk {
        /// Text fragment.
        text: String,
    },
    /// A unit of work begins.
    ToolCall {
        /// Id unique among the session's open tool calls.
        tool_call_id: String,
        /// Display title.
        title: String,
        /// Initial status; never terminal.
        status: ToolCallStatus,
        /// Tool input, e.g. `{"cmd": "ls"}`.
        #[serde(default)]
        raw_input: Value,
    },
    /// Progress or completion of an announced tool call.
    ToolCallUpdate {
        /// Id from the matching `tool_call`.
        tool_call_id: String,
        /// New status.
        status: ToolCallStatus,
        /// Tool output; for shell commands `{"output", "returncode"}`.
        #[serde(default, skip_serializing_if = "Value::is_null")]
        raw_output: Value,
    },
    /// Structured outline of the work ahead.
    Plan {
        /// Ordered steps.
        steps: Vec<PlanStep>,
    },
    /// Proposed or applied change to a file.
    Diff {
        /// File path.
        path: String,
        /// Previous content; absent for new files.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        old_text: Option<String>,
        /// New content.
        new_text: String,
        /// Tool call that produced the change, if any.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        tool_call_id: Option<String>,
    },
}

impl SessionUpdate {
    /// `agent_message_chunk`.
    #[must_use]
    pub fn message_chunk(text: impl Into<String>) -> Self {
        Self::AgentMessageChunk { text: text.into() }
    }

    /// `agent_thought_chunk`.
    #[must_use]
    pub fn thought_chunk(text: impl Into<String>) -> Self {
        Self::AgentThoughtChunk { text: text.into() }
    }

    /// `tool_call` with status `started`.
    #[must_use]
    pub fn tool_call(tool_call_id: impl Into<String>, title: impl Into<String>, raw_input: Value) -> Self {
        Self::ToolCall {
            tool_call_id: tool_call_id.into(),
            title: title.into(),
            status: ToolCallStatus::Started,
            raw_input,
        }
    }

    /// `tool_call_update`.
    #[must_use]
    pub fn tool_call_update(
        tool_call_id: impl Into<String>,
        status: ToolCallStatus,
        raw_output: Value,
    ) -> Self {
        Self::ToolCallUpdate {
            tool_call_id: tool_call_id.into(),
            status,
            raw_output,
        }
    }

    /// `diff` for `path`.
    #[must_use]
    pub fn diff(path: impl Into<String>, old_text: Option<String>, new_text: impl Into<String>) -> Self {
        Self::Diff {
            path: path.into(),
            old_text,
            new_text: new_text.into(),
            tool_call_id: None,
        }
    }

    /// Wire discriminator of this variant.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::AgentMessageChunk { .. } => "agent_message_chunk",
            Self::AgentThoughtChunk { .. } => "agent_thought_chunk",
            Self::ToolCall { .. } => "tool_call",
            Self::ToolCallUpdate { .. } => "tool_call_update",
            Self::Plan { .. } => "plan",
            Self::Diff { .. } => "diff",
        }
    }

    /// Unified diff text for a `diff` update.
    #[must_use]
    pub fn unified_diff(&self) -> Option<String> {
        match self {
            Self::Diff {
                old_text, new_text, ..
            } => {
                let old = old_text.as_deref().unwrap_or("");
                Some(diffy::create_patch(old, new_text).to_string())
            }
            _ => None,
        }
    }
}

/// `session/update` notification parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionNotification {
    /// Session the update belongs to.
    pub session_id: String,
    /// The update.
    pub update: SessionUpdate,
}

// ── Sequencing ────────────────────────────────────────────────────────────────

/// Open tool calls per session.
#[derive(Debug, Default)]
pub struct ToolCallTracker {
    open: HashMap<String, HashSet<String>>,
}

impl ToolCallTracker {
    /// Validate `update` for `session_id` and record its effect.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Sequence`] (leaving the tracker unchanged) when:
    /// - a `tool_call` starts an id that is still open, or carries a
    ///   terminal status;
    /// - a `tool_call_update` names an id that is not open, or carries
    ///   status `started`.
    pub fn apply(&mut self, session_id: &str, update: &SessionUpdate) -> Result<()> {
        match update {
            SessionUpdate::ToolCall {
                tool_call_id,
                status,
                ..
            } => {
                if status.is_terminal() {
                    return Err(AppError::Sequence(format!(
                        "tool call {tool_call_id} cannot start with terminal status {status:?}"
                    )));
                }
                let open = self.open.entry(session_id.to_owned()).or_default();
                if !open.insert(tool_call_id.clone()) {
                    return Err(AppError::Sequence(format!(
                        "tool call {tool_call_id} already started in session {session_id}"
                    )));
                }
            }
            SessionUpdate::ToolCallUpdate {
                tool_call_id,
                status,
                ..
            } => {
                if *status == ToolCallStatus::Started {
                    return Err(AppError::Sequence(format!(
                        "tool call {tool_call_id} update cannot use status started"
                    )));
                }
                let is_open = self
                    .open
                    .get(session_id)
                    .is_some_and(|ids| ids.contains(tool_call_id));
                if !is_open {
                    return Err(AppError::Sequence(format!(
                        "tool call {tool_call_id} was never started in session {session_id}"
                    )));
                }
                if status.is_terminal() {
                    if let Some(ids) = self.open.get_mut(session_id) {
                        ids.remove(tool_call_id);
                        if ids.is_empty() {
                            self.open.remove(session_id);
                        }
                    }
                }
            }
            _ => {}
        }
        Ok(())
    }

    /// Whether `tool_call_id` is open in `session_id`.
    #[must_use]
    pub fn is_open(&self, session_id: &str, tool_call_id: &str) -> bool {
        self.open
            .get(session_id)
            .is_some_and(|ids| ids.contains(tool_call_id))
    }

    /// Drop all state for a discarded session.
    pub fn forget_session(&mut self, session_id: &str) {
        self.open.remove(session_id);
    }
}

// ── Emission ──────────────────────────────────────────────────────────────────

/// Sends `session/update` notifications over a connection.
///
/// Clones share one [`ToolCallTracker`].
#[derive(Debug, Clone)]
pub struct UpdateEmitter {
    conn: Connection,
    tracker: Arc<Mutex<ToolCallTracker>>,
}

impl UpdateEmitter {
    /// Emitter with a fresh tracker.
    #[must_use]
    pub fn new(conn: Connection) -> Self {
        Self::with_tracker(conn, Arc::new(Mutex::new(ToolCallTracker::default())))
    }

    /// Emitter sharing an existing tracker.
    #[must_use]
    pub fn with_tracker(conn: Connection, tracker: Arc<Mutex<ToolCallTracker>>) -> Self {
        Self { conn, tracker }
    }

    /// Validate and send one update.
    ///
    /// Updates are best-effort: if the connection is closed or the write
    /// fails, the update is dropped and `Ok(())` is returned.
    ///
    /// # Errors
    ///
    /// - [`AppError::Sequence`] — tool-call ordering violated.
    /// - [`AppError::Protocol`] — empty `session_id`.
    pub async fn emit(&self, session_id: &str, update: SessionUpdate) -> Result<()> {
        if session_id.is_empty() {
            return Err(AppError::Protocol(RpcError::invalid_params(Some(
                serde_json::json!({ "details": "sessionId must not be empty" }),
            ))));
        }

        let mut tracker = self.tracker.lock().await;
        tracker.apply(session_id, &update)?;

        let kind = update.kind();
        let params = serde_json::to_value(SessionNotification {
            session_id: session_id.to_owned(),
            update,
        })?;

        match self
            .conn
            .send_notification(ClientMethod::SessionUpdate.name(), params)
            .await
        {
            Ok(()) => Ok(()),
            Err(AppError::ConnectionClosed | AppError::Io(_)) => {
                debug!(session_id, kind, "session update: connection gone, dropping update");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Forget tool-call state for a discarded session.
    pub async fn forget_session(&self, session_id: &str) {
        self.tracker.lock().await.forget_session(session_id);
    }
}

/// Update emitter bound to one session turn.
///
/// Once the turn's cancellation token fires, further updates are dropped
/// so nothing reaches the client after it has been told the turn stopped.
#[derive(Debug, Clone)]
pub struct TurnEmitter {
    emitter: UpdateEmitter,
    session_id: String,
    cancel: CancellationToken,
}

impl TurnEmitter {
    /// Bind `emitter` to `session_id` for a turn controlled by `cancel`.
    #[must_use]
    pub fn new(emitter: UpdateEmitter, session_id: impl Into<String>, cancel: CancellationToken) -> Self {
        Self {
            emitter,
            session_id: session_id.into(),
            cancel,
        }
    }

    /// Session this turn belongs to.
    #[must_use]
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Whether the turn has been cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Resolves when the turn is cancelled.
    pub async fn cancelled(&self) {
        self.cancel.cancelled().await;
    }

    /// Emit `update` unless the turn is cancelled.
    ///
    /// # Errors
    ///
    /// Same as [`UpdateEmitter::emit`].
    pub async fn emit(&self, update: SessionUpdate) -> Result<()> {
        if self.cancel.is_cancelled() {
            debug!(
                session_id = self.session_id.as_str(),
                kind = update.kind(),
                "session update: turn cancelled, dropping update"
            );
            return Ok(());
        }
        self.emitter.emit(&self.session_id, update).await
    }

    /// End the turn, releasing any tool call it left open.
    ///
    /// A cancelled turn may stop between a `tool_call` and its terminal
    /// update; the next turn must be free to reuse the id.
    pub async fn finish(self) {
        self.emitter.forget_session(&self.session_id).await;
    }
}

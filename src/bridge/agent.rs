//! `ShellAgent`: an [`Agent`] that runs prompts through a [`TurnRunner`].

use std::path::PathBuf;
use std::sync::Arc;

use serde_json::json;
use tracing::{debug, info};

use crate::acp::agent::{Agent, AgentSideConnection};
use crate::acp::connection::HandlerFuture;
use crate::acp::message::RpcError;
use crate::acp::schema::{
    AgentCapabilities, CancelNotification, InitializeRequest, InitializeResponse,
    LoadSessionRequest, NewSessionRequest, NewSessionResponse, PromptRequest, PromptResponse,
    SetSessionModeRequest, StopReason, PROTOCOL_VERSION,
};
use crate::bridge::permissions::PermissionMode;
use crate::bridge::runner::{TurnContext, TurnRunner};
use crate::bridge::sessions::SessionStore;
use crate::{AppError, Result};

/// Agent serving sessions from an explicit [`SessionStore`].
pub struct ShellAgent {
    conn: AgentSideConnection,
    sessions: SessionStore,
    runner: Arc<dyn TurnRunner>,
}

impl ShellAgent {
    /// Agent answering on `conn`.
    #[must_use]
    pub fn new(conn: AgentSideConnection, sessions: SessionStore, runner: Arc<dyn TurnRunner>) -> Self {
        Self {
            conn,
            sessions,
            runner,
        }
    }

    async fn run_prompt(&self, args: PromptRequest) -> Result<PromptResponse> {
        let parent = self.conn.connection().shutdown_token();
        let (session, token) = self.sessions.begin_turn(&args.session_id, &parent).await?;
        let emitter = self.conn.turn_emitter(session.id.clone(), token.clone());
        let task = args.task_text();

        let outcome = self
            .runner
            .run_turn(
                &task,
                TurnContext {
                    session: &session,
                    emitter: &emitter,
                    permissions: &self.conn,
                },
            )
            .await;

        emitter.finish().await;
        self.sessions.end_turn(&session.id).await;

        let result = outcome?;
        let stop_reason = if token.is_cancelled() {
            StopReason::Cancelled
        } else {
            result.stop_reason
        };
        info!(session_id = session.id.as_str(), ?stop_reason, "shell agent: turn finished");
        Ok(PromptResponse { stop_reason })
    }
}

/// Session mode requested by a client.
fn parse_mode(mode_id: &str) -> Result<PermissionMode> {
    mode_id.parse().map_err(|_| {
        AppError::Protocol(RpcError::invalid_params(Some(json!({
            "details": format!("unknown mode '{mode_id}'"),
        }))))
    })
}

impl Agent for ShellAgent {
    fn initialize(&self, args: InitializeRequest) -> HandlerFuture<'_, InitializeResponse> {
        Box::pin(async move {
            let protocol_version = if (1..=PROTOCOL_VERSION).contains(&args.protocol_version) {
                args.protocol_version
            } else {
                PROTOCOL_VERSION
            };
            info!(
                requested = args.protocol_version,
                protocol_version,
                read_text_file = args.client_capabilities.fs.read_text_file,
                write_text_file = args.client_capabilities.fs.write_text_file,
                "shell agent: initialize"
            );
            Ok(InitializeResponse {
                protocol_version,
                agent_capabilities: AgentCapabilities {
                    load_session: true,
                    ..AgentCapabilities::default()
                },
                auth_methods: Vec::new(),
            })
        })
    }

    fn new_session(&self, args: NewSessionRequest) -> HandlerFuture<'_, NewSessionResponse> {
        Box::pin(async move {
            let session = self.sessions.create(PathBuf::from(args.cwd)).await;
            Ok(NewSessionResponse {
                session_id: session.id,
            })
        })
    }

    fn load_session(&self, args: LoadSessionRequest) -> HandlerFuture<'_, ()> {
        Box::pin(async move {
            self.sessions
                .ensure(&args.session_id, PathBuf::from(args.cwd))
                .await;
            Ok(())
        })
    }

    fn set_session_mode(&self, args: SetSessionModeRequest) -> HandlerFuture<'_, ()> {
        Box::pin(async move {
            let mode = parse_mode(&args.mode_id)?;
            self.sessions.set_mode(&args.session_id, mode).await
        })
    }

    fn prompt(&self, args: PromptRequest) -> HandlerFuture<'_, PromptResponse> {
        Box::pin(self.run_prompt(args))
    }

    fn cancel(&self, args: CancelNotification) -> HandlerFuture<'_, ()> {
        Box::pin(async move {
            if self.sessions.cancel_turn(&args.session_id).await {
                info!(session_id = args.session_id.as_str(), "shell agent: turn cancelled");
            } else {
                debug!(session_id = args.session_id.as_str(), "shell agent: cancel with no running turn");
            }
            Ok(())
        })
    }
}

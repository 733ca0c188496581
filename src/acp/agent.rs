//! Agent-side role adapter.
//!
//! An agent implements [`Agent`]; [`AgentSideConnection::start`] wires it
//! to a stream and hands back the façade the agent uses to talk to the
//! client (updates, permission requests, file access).

use std::sync::Arc;

use serde_json::Value;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::acp::connection::{Connection, ConnectionOptions, HandlerFuture, MessageHandler};
use crate::acp::methods::{
    ext_method_name, ext_name, not_found, parse_params, parse_result, to_value, AgentMethod,
    ClientMethod,
};
use crate::acp::schema::{
    AuthenticateRequest, CancelNotification, ClientCapabilities, InitializeRequest,
    InitializeResponse, LoadSessionRequest, NewSessionRequest, NewSessionResponse, PromptRequest,
    PromptResponse, ReadTextFileRequest, ReadTextFileResponse, RequestPermissionRequest,
    RequestPermissionResponse, SetSessionModeRequest, WriteTextFileRequest,
};
use crate::acp::update::{SessionUpdate, ToolCallTracker, TurnEmitter, UpdateEmitter};
use crate::Result;

/// Operations an agent serves to its client.
///
/// `prompt` may run for a long time; it is dispatched on its own task, so
/// `cancel` and other requests are still delivered while it runs.
pub trait Agent: Send + Sync + 'static {
    /// Negotiate protocol version and capabilities.
    fn initialize(&self, args: InitializeRequest) -> HandlerFuture<'_, InitializeResponse>;

    /// Pass-through authentication hook.
    fn authenticate(&self, args: AuthenticateRequest) -> HandlerFuture<'_, ()> {
        debug!(method_id = args.method_id.as_str(), "acp agent: authenticate accepted");
        Box::pin(async { Ok(()) })
    }

    /// Create a session.
    fn new_session(&self, args: NewSessionRequest) -> HandlerFuture<'_, NewSessionResponse>;

    /// Resume a session; only called when `loadSession` is advertised.
    fn load_session(&self, _args: LoadSessionRequest) -> HandlerFuture<'_, ()> {
        Box::pin(async { Err(not_found(AgentMethod::LoadSession.name())) })
    }

    /// Switch the session's operating mode.
    fn set_session_mode(&self, _args: SetSessionModeRequest) -> HandlerFuture<'_, ()> {
        Box::pin(async { Err(not_found(AgentMethod::SetSessionMode.name())) })
    }

    /// Run one turn and report why it ended.
    fn prompt(&self, args: PromptRequest) -> HandlerFuture<'_, PromptResponse>;

    /// Advisory request to stop the session's running turn.
    ///
    /// Delivered on the connection's ordered dispatch lane: signal the turn
    /// and return, never await a request to the client here.
    fn cancel(&self, args: CancelNotification) -> HandlerFuture<'_, ()>;

    /// `_`-prefixed request; `name` has the prefix stripped.
    fn ext_method(&self, name: String, _params: Value) -> HandlerFuture<'_, Value> {
        Box::pin(async move { Err(not_found(&ext_method_name(&name))) })
    }

    /// `_`-prefixed notification; ignored by default.
    fn ext_notification(&self, name: String, _params: Value) -> HandlerFuture<'_, ()> {
        Box::pin(async move {
            debug!(name = name.as_str(), "acp agent: ignoring extension notification");
            Ok(())
        })
    }
}

type SharedCaps = Arc<RwLock<Option<ClientCapabilities>>>;

/// Routes inbound frames to an [`Agent`].
struct AgentDispatcher<A> {
    agent: A,
    client_caps: SharedCaps,
}

impl<A: Agent> AgentDispatcher<A> {
    async fn dispatch(&self, method: AgentMethod, params: Value) -> Result<Value> {
        match method {
            AgentMethod::Initialize => {
                let args: InitializeRequest = parse_params(params)?;
                let caps = args.client_capabilities.clone();
                let response = self.agent.initialize(args).await?;
                *self.client_caps.write().await = Some(caps);
                to_value(&response)
            }
            AgentMethod::Authenticate => {
                self.agent.authenticate(parse_params(params)?).await?;
                Ok(Value::Object(serde_json::Map::new()))
            }
            AgentMethod::NewSession => to_value(&self.agent.new_session(parse_params(params)?).await?),
            AgentMethod::LoadSession => {
                self.agent.load_session(parse_params(params)?).await?;
                Ok(Value::Null)
            }
            AgentMethod::SetSessionMode => {
                self.agent.set_session_mode(parse_params(params)?).await?;
                Ok(Value::Object(serde_json::Map::new()))
            }
            AgentMethod::Prompt => to_value(&self.agent.prompt(parse_params(params)?).await?),
            AgentMethod::Cancel => {
                self.agent.cancel(parse_params(params)?).await?;
                Ok(Value::Null)
            }
        }
    }
}

impl<A: Agent> MessageHandler for AgentDispatcher<A> {
    fn handle_request(&self, method: String, params: Value) -> HandlerFuture<'_, Value> {
        Box::pin(async move {
            if let Some(name) = ext_name(&method) {
                return self.agent.ext_method(name.to_owned(), params).await;
            }
            match AgentMethod::from_name(&method) {
                Some(m) => self.dispatch(m, params).await,
                None => Err(not_found(&method)),
            }
        })
    }

    fn handle_notification(&self, method: String, params: Value) -> HandlerFuture<'_, ()> {
        Box::pin(async move {
            if let Some(name) = ext_name(&method) {
                return self.agent.ext_notification(name.to_owned(), params).await;
            }
            match AgentMethod::from_name(&method) {
                Some(AgentMethod::Cancel) => self.agent.cancel(parse_params(params)?).await,
                Some(m) => {
                    debug!(method = m.name(), "acp agent: request method sent as notification, ignoring");
                    Ok(())
                }
                None => {
                    debug!(method = method.as_str(), "acp agent: unknown notification, ignoring");
                    Ok(())
                }
            }
        })
    }
}

/// Agent's view of a connection to its client.  Cheap to clone.
#[derive(Debug, Clone)]
pub struct AgentSideConnection {
    conn: Connection,
    updates: UpdateEmitter,
    client_caps: SharedCaps,
}

impl AgentSideConnection {
    /// Serve `make_agent`'s agent over `reader` / `writer`.
    ///
    /// The closure receives the façade so the agent can keep it for
    /// emitting updates and calling the client.
    pub fn start<R, W, F, A>(reader: R, writer: W, options: ConnectionOptions, make_agent: F) -> Self
    where
        R: AsyncRead + Send + 'static,
        W: AsyncWrite + Send + 'static,
        F: FnOnce(AgentSideConnection) -> A,
        A: Agent,
    {
        let client_caps: SharedCaps = Arc::new(RwLock::new(None));
        let tracker = Arc::new(Mutex::new(ToolCallTracker::default()));

        let caps = Arc::clone(&client_caps);
        let shared_tracker = Arc::clone(&tracker);
        let conn = Connection::start(reader, writer, options, move |conn| {
            let side = Self::assemble(conn, shared_tracker, Arc::clone(&caps));
            AgentDispatcher {
                agent: make_agent(side),
                client_caps: caps,
            }
        });
        Self::assemble(conn, tracker, client_caps)
    }

    fn assemble(conn: Connection, tracker: Arc<Mutex<ToolCallTracker>>, client_caps: SharedCaps) -> Self {
        Self {
            updates: UpdateEmitter::with_tracker(conn.clone(), tracker),
            conn,
            client_caps,
        }
    }

    /// Underlying connection.
    #[must_use]
    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Capabilities the client advertised in `initialize`, once received.
    pub async fn client_capabilities(&self) -> Option<ClientCapabilities> {
        self.client_caps.read().await.clone()
    }

    /// Shared update emitter.
    #[must_use]
    pub fn updates(&self) -> &UpdateEmitter {
        &self.updates
    }

    /// Emitter scoped to one turn of `session_id`.
    #[must_use]
    pub fn turn_emitter(&self, session_id: impl Into<String>, cancel: CancellationToken) -> TurnEmitter {
        TurnEmitter::new(self.updates.clone(), session_id, cancel)
    }

    /// Send one `session/update` notification.
    ///
    /// # Errors
    ///
    /// See [`UpdateEmitter::emit`].
    pub async fn session_update(&self, session_id: &str, update: SessionUpdate) -> Result<()> {
        self.updates.emit(session_id, update).await
    }

    /// Ask the client to approve a tool call.  Suspends until the user answers.
    ///
    /// # Errors
    ///
    /// Propagates connection and protocol errors from the round trip.
    pub async fn request_permission(
        &self,
        args: RequestPermissionRequest,
    ) -> Result<RequestPermissionResponse> {
        self.call(ClientMethod::RequestPermission, &args).await
    }

    /// Read a text file through the client.
    ///
    /// # Errors
    ///
    /// `Method not found` when the client did not advertise
    /// `fs.readTextFile`; otherwise connection and protocol errors.
    pub async fn read_text_file(&self, args: ReadTextFileRequest) -> Result<ReadTextFileResponse> {
        let allowed = self
            .client_capabilities()
            .await
            .is_some_and(|caps| caps.fs.read_text_file);
        if !allowed {
            return Err(not_found(ClientMethod::ReadTextFile.name()));
        }
        self.call(ClientMethod::ReadTextFile, &args).await
    }

    /// Write a text file through the client.
    ///
    /// # Errors
    ///
    /// `Method not found` when the client did not advertise
    /// `fs.writeTextFile`; otherwise connection and protocol errors.
    pub async fn write_text_file(&self, args: WriteTextFileRequest) -> Result<()> {
        let allowed = self
            .client_capabilities()
            .await
            .is_some_and(|caps| caps.fs.write_text_file);
        if !allowed {
            return Err(not_found(ClientMethod::WriteTextFile.name()));
        }
        let params = to_value(&args)?;
        self.conn
            .send_request(ClientMethod::WriteTextFile.name(), params)
            .await?;
        Ok(())
    }

    /// Call a client extension method (`name` without the `_` prefix).
    ///
    /// # Errors
    ///
    /// Propagates connection and protocol errors.
    pub async fn ext_method(&self, name: &str, params: Value) -> Result<Value> {
        self.conn.send_request(&ext_method_name(name), params).await
    }

    /// Send a client extension notification.
    ///
    /// # Errors
    ///
    /// Propagates connection errors.
    pub async fn ext_notification(&self, name: &str, params: Value) -> Result<()> {
        self.conn.send_notification(&ext_method_name(name), params).await
    }

    /// Wait until the client disconnects.
    pub async fn closed(&self) {
        self.conn.closed().await;
    }

    async fn call<T, P>(&self, method: ClientMethod, args: &P) -> Result<T>
    where
        T: serde::de::DeserializeOwned,
        P: serde::Serialize,
    {
        let result = self.conn.send_request(method.name(), to_value(args)?).await?;
        parse_result(method.name(), result)
    }
}


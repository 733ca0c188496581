//! Client-side role adapter.
//!
//! The mirror image of [`crate::acp::agent`]: a client implements
//! [`Client`] and drives the agent through [`ClientSideConnection`].

use std::sync::Arc;

use serde_json::{json, Value};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::acp::connection::{Connection, ConnectionOptions, HandlerFuture, MessageHandler};
use crate::acp::message::RpcError;
use crate::acp::methods::{
    ext_method_name, ext_name, not_found, parse_params, parse_result, to_value, AgentMethod,
    ClientMethod,
};
use crate::acp::schema::{
    AuthenticateRequest, CancelNotification, InitializeRequest, InitializeResponse,
    LoadSessionRequest, NewSessionRequest, NewSessionResponse, PromptRequest, PromptResponse,
    ReadTextFileRequest, ReadTextFileResponse, RequestPermissionRequest,
    RequestPermissionResponse, SetSessionModeRequest, WriteTextFileRequest, PROTOCOL_VERSION,
};
use crate::acp::update::SessionNotification;
use crate::{AppError, Result};

/// Operations a client serves to its agent.
pub trait Client: Send + Sync + 'static {
    /// Ask the user to approve a tool call.
    ///
    /// Runs on its own task, so the user may take as long as needed.
    fn request_permission(
        &self,
        args: RequestPermissionRequest,
    ) -> HandlerFuture<'_, RequestPermissionResponse>;

    /// One streamed update.
    ///
    /// Delivered on the ordered dispatch lane, before the response of the
    /// `prompt` it belongs to.  Must not await a request to the agent.
    fn session_update(&self, args: SessionNotification) -> HandlerFuture<'_, ()>;

    /// Serve `fs/read_text_file`; advertise `fs.readTextFile` when overriding.
    fn read_text_file(&self, _args: ReadTextFileRequest) -> HandlerFuture<'_, ReadTextFileResponse> {
        Box::pin(async { Err(not_found(ClientMethod::ReadTextFile.name())) })
    }

    /// Serve `fs/write_text_file`; advertise `fs.writeTextFile` when overriding.
    fn write_text_file(&self, _args: WriteTextFileRequest) -> HandlerFuture<'_, ()> {
        Box::pin(async { Err(not_found(ClientMethod::WriteTextFile.name())) })
    }

    /// `_`-prefixed request; `name` has the prefix stripped.
    fn ext_method(&self, name: String, _params: Value) -> HandlerFuture<'_, Value> {
        Box::pin(async move { Err(not_found(&ext_method_name(&name))) })
    }

    /// `_`-prefixed notification; ignored by default.
    fn ext_notification(&self, name: String, _params: Value) -> HandlerFuture<'_, ()> {
        Box::pin(async move {
            debug!(name = name.as_str(), "acp client: ignoring extension notification");
            Ok(())
        })
    }
}

struct ClientDispatcher<C> {
    client: C,
}

impl<C: Client> MessageHandler for ClientDispatcher<C> {
    fn handle_request(&self, method: String, params: Value) -> HandlerFuture<'_, Value> {
        Box::pin(async move {
            if let Some(name) = ext_name(&method) {
                return self.client.ext_method(name.to_owned(), params).await;
            }
            match ClientMethod::from_name(&method) {
                Some(ClientMethod::RequestPermission) => {
                    to_value(&self.client.request_permission(parse_params(params)?).await?)
                }
                Some(ClientMethod::ReadTextFile) => {
                    to_value(&self.client.read_text_file(parse_params(params)?).await?)
                }
                Some(ClientMethod::WriteTextFile) => {
                    self.client.write_text_file(parse_params(params)?).await?;
                    Ok(Value::Null)
                }
                Some(ClientMethod::SessionUpdate) => {
                    self.client.session_update(parse_params(params)?).await?;
                    Ok(Value::Null)
                }
                None => Err(not_found(&method)),
            }
        })
    }

    fn handle_notification(&self, method: String, params: Value) -> HandlerFuture<'_, ()> {
        Box::pin(async move {
            if let Some(name) = ext_name(&method) {
                return self.client.ext_notification(name.to_owned(), params).await;
            }
            match ClientMethod::from_name(&method) {
                Some(ClientMethod::SessionUpdate) => {
                    self.client.session_update(parse_params(params)?).await
                }
                _ => {
                    debug!(method = method.as_str(), "acp client: unexpected notification, ignoring");
                    Ok(())
                }
            }
        })
    }
}

/// Client's view of a connection to its agent.  Cheap to clone.
#[derive(Debug, Clone)]
pub struct ClientSideConnection {
    conn: Connection,
    agent_info: Arc<RwLock<Option<InitializeResponse>>>,
}

impl ClientSideConnection {
    /// Serve `client` over `reader` / `writer` (usually the agent's stdout
    /// and stdin).
    pub fn start<R, W, C>(reader: R, writer: W, options: ConnectionOptions, client: C) -> Self
    where
        R: AsyncRead + Send + 'static,
        W: AsyncWrite + Send + 'static,
        C: Client,
    {
        let conn = Connection::start(reader, writer, options, move |_| ClientDispatcher { client });
        Self {
            conn,
            agent_info: Arc::new(RwLock::new(None)),
        }
    }

    /// Underlying connection.
    #[must_use]
    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// The agent's `initialize` response, once negotiated.
    pub async fn agent_info(&self) -> Option<InitializeResponse> {
        self.agent_info.read().await.clone()
    }

    /// Negotiate protocol version and capabilities.
    ///
    /// # Errors
    ///
    /// `Invalid request` when the agent answers with a protocol version
    /// this crate does not speak; otherwise connection and protocol errors.
    pub async fn initialize(&self, args: InitializeRequest) -> Result<InitializeResponse> {
        let response: InitializeResponse = self.call(AgentMethod::Initialize, &args).await?;
        if response.protocol_version == 0 || response.protocol_version > PROTOCOL_VERSION {
            return Err(AppError::Protocol(RpcError::invalid_request(Some(json!({
                "details": format!(
                    "unsupported protocol version {} (supported: 1..={PROTOCOL_VERSION})",
                    response.protocol_version
                )
            })))));
        }
        info!(
            protocol_version = response.protocol_version,
            load_session = response.agent_capabilities.load_session,
            "acp client: initialized"
        );
        *self.agent_info.write().await = Some(response.clone());
        Ok(response)
    }

    /// Authenticate with one of the advertised methods.
    ///
    /// # Errors
    ///
    /// Propagates connection and protocol errors.
    pub async fn authenticate(&self, args: AuthenticateRequest) -> Result<()> {
        self.conn
            .send_request(AgentMethod::Authenticate.name(), to_value(&args)?)
            .await?;
        Ok(())
    }

    /// Create a session.
    ///
    /// # Errors
    ///
    /// Propagates connection and protocol errors.
    pub async fn new_session(&self, args: NewSessionRequest) -> Result<NewSessionResponse> {
        self.call(AgentMethod::NewSession, &args).await
    }

    /// Resume a session.
    ///
    /// # Errors
    ///
    /// `Method not found` (locally) unless the agent advertised
    /// `loadSession`; otherwise connection and protocol errors.
    pub async fn load_session(&self, args: LoadSessionRequest) -> Result<()> {
        let supported = self
            .agent_info()
            .await
            .is_some_and(|info| info.agent_capabilities.load_session);
        if !supported {
            return Err(not_found(AgentMethod::LoadSession.name()));
        }
        self.conn
            .send_request(AgentMethod::LoadSession.name(), to_value(&args)?)
            .await?;
        Ok(())
    }

    /// Switch a session's mode.
    ///
    /// # Errors
    ///
    /// Propagates connection and protocol errors.
    pub async fn set_session_mode(&self, args: SetSessionModeRequest) -> Result<()> {
        self.conn
            .send_request(AgentMethod::SetSessionMode.name(), to_value(&args)?)
            .await?;
        Ok(())
    }

    /// Run one turn.  Every update of the turn has been delivered to
    /// [`Client::session_update`] by the time this returns.
    ///
    /// # Errors
    ///
    /// Propagates connection and protocol errors.
    pub async fn prompt(&self, args: PromptRequest) -> Result<PromptResponse> {
        self.call(AgentMethod::Prompt, &args).await
    }

    /// Ask the agent to stop the session's running turn.  Does not wait.
    ///
    /// # Errors
    ///
    /// [`AppError::ConnectionClosed`] or a write failure.
    pub async fn cancel(&self, args: CancelNotification) -> Result<()> {
        self.conn
            .send_notification(AgentMethod::Cancel.name(), to_value(&args)?)
            .await
    }

    /// Call an agent extension method (`name` without the `_` prefix).
    ///
    /// # Errors
    ///
    /// Propagates connection and protocol errors.
    pub async fn ext_method(&self, name: &str, params: Value) -> Result<Value> {
        self.conn.send_request(&ext_method_name(name), params).await
    }

    /// Send an agent extension notification.
    ///
    /// # Errors
    ///
    /// Propagates connection errors.
    pub async fn ext_notification(&self, name: &str, params: Value) -> Result<()> {
        self.conn.send_notification(&ext_method_name(name), params).await
    }

    /// Shut the connection down.
    pub async fn close(&self) {
        self.conn.close().await;
    }

    async fn call<T, P>(&self, method: AgentMethod, args: &P) -> Result<T>
    where
        T: serde::de::DeserializeOwned,
        P: serde::Serialize,
    {
        let result = self.conn.send_request(method.name(), to_value(args)?).await?;
        parse_result(method.name(), result)
    }
}

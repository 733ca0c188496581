//! Bidirectional JSON-RPC connection.
//!
//! A [`Connection`] owns one framed byte stream and acts as caller and callee
//! at the same time:
//!
//! - **Outbound requests** get a fresh integer id from a monotonic counter,
//!   are registered in the pending-call table, and suspend the caller on a
//!   per-call [`oneshot`] until the matching response arrives.
//! - **Inbound requests** are each spawned as an independent task; the
//!   handler's result (or error) is written back under the same id.
//! - **Inbound notifications and responses** are queued, in arrival order,
//!   onto a single dispatch lane drained by its own task.  A caller therefore
//!   sees every notification that preceded its response on the wire before
//!   the response itself.  The reader loop never waits on a handler.
//!
//! # Lifecycle
//!
//! `Open -> Closing -> Closed`.  Teardown starts on end-of-stream, on an
//! unrecoverable I/O error, or on [`Connection::close`].  While `Closing`,
//! new outbound calls fail with [`AppError::ConnectionClosed`], queued
//! responses are still delivered, and every call left pending afterwards is
//! resolved with `ConnectionClosed`.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, oneshot, watch, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::acp::codec::MAX_LINE_BYTES;
use crate::acp::message::{self, Message, RequestId, ResponseBody};
use crate::acp::transport::{frame_stream, FrameSink, FrameStream};
use crate::{AppError, Result};

/// How long teardown waits for the dispatch lane to drain queued messages.
const LANE_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Boxed future returned by [`MessageHandler`] methods.
pub type HandlerFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// Callee side of a connection: receives inbound requests and notifications.
///
/// Implemented by the role dispatchers in [`crate::acp::agent`] and
/// [`crate::acp::client`].
pub trait MessageHandler: Send + Sync + 'static {
    /// Handle an inbound request; the returned value becomes the response.
    ///
    /// # Errors
    ///
    /// Any error is converted with [`AppError::to_rpc_error`] and sent back
    /// as the response error.
    fn handle_request(&self, method: String, params: Value) -> HandlerFuture<'_, Value>;

    /// Handle an inbound notification.  Runs on the ordered dispatch lane,
    /// so it must not await an outbound request on the same connection.
    ///
    /// # Errors
    ///
    /// Errors are logged locally; nothing is sent to the peer.
    fn handle_notification(&self, method: String, params: Value) -> HandlerFuture<'_, ()>;
}

/// Tunables for a [`Connection`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionOptions {
    /// Maximum inbound frame length in bytes.
    pub max_line_bytes: usize,
    /// Upper bound on outstanding outbound requests.
    pub max_pending_requests: usize,
    /// Per-request response deadline; `None` waits indefinitely.
    pub request_timeout: Option<Duration>,
    /// Capacity of the ordered notification/response dispatch queue.
    ///
    /// When the queue is full the reader loop waits for the notification
    /// handler to catch up, so inbound requests are held back too.
    pub dispatch_queue_depth: usize,
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self {
            max_line_bytes: MAX_LINE_BYTES,
            max_pending_requests: 256,
            request_timeout: None,
            dispatch_queue_depth: 256,
        }
    }
}

/// Connection lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Accepting outbound calls and reading frames.
    Open,
    /// Teardown in progress; pending calls are being drained.
    Closing,
    /// Fully shut down.
    Closed,
}

/// Work handed from the reader loop to the dispatch lane.
#[derive(Debug)]
enum Inbound {
    Notification { method: String, params: Value },
    Response { id: RequestId, body: ResponseBody },
}

#[derive(Debug)]
struct PendingCalls {
    accepting: bool,
    calls: HashMap<RequestId, oneshot::Sender<ResponseBody>>,
}

#[derive(Debug)]
struct Shared {
    sink: FrameSink,
    pending: Mutex<PendingCalls>,
    next_id: AtomicI64,
    state: watch::Sender<ConnectionState>,
    shutdown: CancellationToken,
    options: ConnectionOptions,
}

/// Handle to a running connection.  Cheap to clone.
#[derive(Debug, Clone)]
pub struct Connection {
    shared: Arc<Shared>,
}

impl Connection {
    /// Start a connection over `reader` / `writer` and spawn its reader loop.
    ///
    /// `make_handler` receives a handle to the new connection so the
    /// handler can call back into the peer (e.g. to emit updates).
    ///
    /// Must be called from within a tokio runtime.
    pub fn start<R, W, F, H>(reader: R, writer: W, options: ConnectionOptions, make_handler: F) -> Self
    where
        R: AsyncRead + Send + 'static,
        W: AsyncWrite + Send + 'static,
        F: FnOnce(Connection) -> H,
        H: MessageHandler,
    {
        let (state, _) = watch::channel(ConnectionState::Open);
        let frames = frame_stream(reader, options.max_line_bytes);
        let conn = Self {
            shared: Arc::new(Shared {
                sink: FrameSink::new(writer),
                pending: Mutex::new(PendingCalls {
                    accepting: true,
                    calls: HashMap::new(),
                }),
                next_id: AtomicI64::new(0),
                state,
                shutdown: CancellationToken::new(),
                options,
            }),
        };

        let handler: Arc<dyn MessageHandler> = Arc::new(make_handler(conn.clone()));
        tokio::spawn(conn.clone().run(frames, handler));
        conn
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.shared.state.borrow()
    }

    /// Token cancelled when teardown begins.
    ///
    /// Handlers derive child tokens from it so long-running work stops
    /// when the peer goes away.
    #[must_use]
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shared.shutdown.clone()
    }

    /// Number of outbound requests awaiting a response.
    pub async fn pending_count(&self) -> usize {
        self.shared.pending.lock().await.calls.len()
    }

    /// Send a request and wait for its response.
    ///
    /// # Errors
    ///
    /// - [`AppError::ConnectionClosed`] — closing/closed, or closed while waiting.
    /// - [`AppError::Overloaded`] — `max_pending_requests` already outstanding.
    /// - [`AppError::Timeout`] — no response within `request_timeout`.
    /// - [`AppError::Protocol`] — the peer answered with an error object.
    /// - [`AppError::Io`] — the request frame could not be written.
    pub async fn send_request(&self, method: &str, params: Value) -> Result<Value> {
        let id = RequestId::Number(self.shared.next_id.fetch_add(1, Ordering::Relaxed));
        let frame = message::encode(&Message::Request {
            id: id.clone(),
            method: method.to_owned(),
            params,
        })?;

        let (tx, rx) = oneshot::channel();
        {
            let mut pending = self.shared.pending.lock().await;
            if !pending.accepting {
                return Err(AppError::ConnectionClosed);
            }
            let limit = self.shared.options.max_pending_requests;
            if pending.calls.len() >= limit {
                return Err(AppError::Overloaded(format!(
                    "{limit} requests already awaiting a response"
                )));
            }
            pending.calls.insert(id.clone(), tx);
        }

        if let Err(e) = self.write_frame(frame).await {
            self.shared.forget(&id).await;
            return Err(e);
        }
        debug!(%id, method, "acp connection: request sent");

        let outcome = match self.shared.options.request_timeout {
            Some(limit) => {
                if let Ok(outcome) = tokio::time::timeout(limit, rx).await {
                    outcome
                } else {
                    self.shared.forget(&id).await;
                    return Err(AppError::Timeout(format!(
                        "{method} (id {id}) got no response within {limit:?}"
                    )));
                }
            }
            None => rx.await,
        };

        let body = outcome.map_err(|_| AppError::ConnectionClosed)?;
        body.into_result().map_err(AppError::Protocol)
    }

    /// Send a fire-and-forget notification.
    ///
    /// # Errors
    ///
    /// - [`AppError::ConnectionClosed`] — the connection is not open.
    /// - [`AppError::Io`] — the frame could not be written.
    pub async fn send_notification(&self, method: &str, params: Value) -> Result<()> {
        if self.state() != ConnectionState::Open {
            return Err(AppError::ConnectionClosed);
        }
        let frame = message::encode(&Message::Notification {
            method: method.to_owned(),
            params,
        })?;
        self.write_frame(frame).await
    }

    /// Begin teardown and shut down the write half.
    ///
    /// Returns once the connection is [`ConnectionState::Closed`].
    pub async fn close(&self) {
        self.shared.shutdown.cancel();
        if let Err(e) = self.shared.sink.close().await {
            debug!(error = %e, "acp connection: write half already broken");
        }
        self.closed().await;
    }

    /// Wait until the connection reaches [`ConnectionState::Closed`].
    pub async fn closed(&self) {
        let mut rx = self.shared.state.subscribe();
        // The sender lives in `shared`, which `self` keeps alive.
        let _ = rx.wait_for(|s| *s == ConnectionState::Closed).await;
    }

    async fn write_frame(&self, frame: String) -> Result<()> {
        if let Err(e) = self.shared.sink.send(frame).await {
            warn!(error = %e, "acp connection: transport write failed, closing");
            self.shared.shutdown.cancel();
            return Err(e);
        }
        Ok(())
    }

    async fn send_response(&self, id: RequestId, body: ResponseBody) -> Result<()> {
        let frame = message::encode(&Message::Response { id, body })?;
        self.write_frame(frame).await
    }

    // ── Reader loop ───────────────────────────────────────────────────────────

    async fn run(self, mut frames: FrameStream, handler: Arc<dyn MessageHandler>) {
        let (lane_tx, lane_rx) = mpsc::channel(self.shared.options.dispatch_queue_depth.max(1));
        let lane = tokio::spawn(run_dispatch_lane(
            Arc::clone(&self.shared),
            Arc::clone(&handler),
            lane_rx,
        ));

        let reason = loop {
            tokio::select! {
                biased;

                () = self.shared.shutdown.cancelled() => {
                    break "shutdown requested";
                }

                item = frames.next() => {
                    match item {
                        None => break "stream closed",
                        Some(Err(e)) => {
                            warn!(error = %e, "acp reader: IO error, stopping");
                            break "stream error";
                        }
                        Some(Ok(line)) => {
                            if line.trim().is_empty() {
                                continue;
                            }
                            match message::decode(&line) {
                                Err(e) => {
                                    warn!(
                                        error = %e,
                                        raw_line = %line,
                                        "acp reader: undecodable frame, skipping"
                                    );
                                    if let Some(reply) = message::rejection(&line, &e) {
                                        if let Err(e) = self.write_frame(reply).await {
                                            debug!(error = %e, "acp reader: rejection not delivered");
                                        }
                                    }
                                }
                                Ok(Message::Request { id, method, params }) => {
                                    self.spawn_request(Arc::clone(&handler), id, method, params);
                                }
                                Ok(Message::Notification { method, params }) => {
                                    warn_if_lane_full(&lane_tx);
                                    if lane_tx.send(Inbound::Notification { method, params }).await.is_err() {
                                        break "dispatch lane stopped";
                                    }
                                }
                                Ok(Message::Response { id, body }) => {
                                    warn_if_lane_full(&lane_tx);
                                    if lane_tx.send(Inbound::Response { id, body }).await.is_err() {
                                        break "dispatch lane stopped";
                                    }
                                }
                            }
                        }
                    }
                }
            }
        };

        debug!(reason, "acp reader: loop exited");
        drop(lane_tx);
        self.teardown(lane, reason).await;
    }

    fn spawn_request(
        &self,
        handler: Arc<dyn MessageHandler>,
        id: RequestId,
        method: String,
        params: Value,
    ) {
        let conn = self.clone();
        tokio::spawn(async move {
            debug!(%id, method = method.as_str(), "acp connection: dispatching request");
            let body = match handler.handle_request(method.clone(), params).await {
                Ok(result) => ResponseBody::Result(result),
                Err(e) => {
                    debug!(%id, method = method.as_str(), error = %e, "acp connection: request failed");
                    ResponseBody::Error(e.to_rpc_error())
                }
            };
            if let Err(e) = conn.send_response(id.clone(), body).await {
                debug!(%id, error = %e, "acp connection: response not delivered");
            }
        });
    }

    async fn teardown(&self, mut lane: JoinHandle<()>, reason: &str) {
        self.shared.state.send_replace(ConnectionState::Closing);
        self.shared.pending.lock().await.accepting = false;
        self.shared.shutdown.cancel();

        if tokio::time::timeout(LANE_DRAIN_TIMEOUT, &mut lane).await.is_err() {
            warn!("acp connection: dispatch lane did not drain, aborting it");
            lane.abort();
        }

        // Dropping the senders resolves every waiter with ConnectionClosed.
        let abandoned = std::mem::take(&mut self.shared.pending.lock().await.calls);
        info!(reason, abandoned = abandoned.len(), "acp connection: closed");
        drop(abandoned);

        self.shared.state.send_replace(ConnectionState::Closed);
    }
}

impl Shared {
    async fn resolve(&self, id: RequestId, body: ResponseBody) {
        let waiter = self.pending.lock().await.calls.remove(&id);
        match waiter {
            Some(tx) => {
                if tx.send(body).is_err() {
                    debug!(%id, "acp connection: caller stopped waiting for response");
                }
            }
            None => warn!(%id, "acp connection: response for unknown id, dropping"),
        }
    }

    async fn forget(&self, id: &RequestId) {
        self.pending.lock().await.calls.remove(id);
    }
}

/// The reader blocks on a full lane, which also holds back inbound requests.
fn warn_if_lane_full(lane: &mpsc::Sender<Inbound>) {
    if lane.capacity() == 0 {
        warn!(
            depth = lane.max_capacity(),
            "acp reader: dispatch lane full, waiting on a slow handler"
        );
    }
}

/// Drain notifications and responses in arrival order.
async fn run_dispatch_lane(
    shared: Arc<Shared>,
    handler: Arc<dyn MessageHandler>,
    mut rx: mpsc::Receiver<Inbound>,
) {
    while let Some(item) = rx.recv().await {
        match item {
            Inbound::Notification { method, params } => {
                if let Err(e) = handler.handle_notification(method.clone(), params).await {
                    warn!(method = %method, error = %e, "acp dispatch: notification handler failed");
                }
            }
            Inbound::Response { id, body } => shared.resolve(id, body).await,
        }
    }
}

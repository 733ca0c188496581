//! Error types shared across the application.

use std::fmt::{Display, Formatter};

use serde_json::json;

use crate::acp::message::RpcError;

/// Shared application result type.
pub type Result<T> = std::result::Result<T, AppError>;

/// Application error enumeration covering all protocol and runtime failure modes.
#[derive(Debug)]
pub enum AppError {
    /// Configuration parsing or validation failure.
    Config(String),
    /// Transport I/O failure; fatal for the connection that hit it.
    Io(String),
    /// A single frame could not be decoded; the stream stays usable.
    Framing(String),
    /// Well-formed message rejected by the peer or by a local handler.
    ///
    /// Carries the wire error object verbatim so it can be returned in a
    /// response without loss.
    Protocol(RpcError),
    /// Misuse of the session update model (e.g. duplicate tool-call start).
    Sequence(String),
    /// The connection is closing or closed.
    ConnectionClosed,
    /// An outbound request did not receive a response in time.
    Timeout(String),
    /// Too many outbound requests are outstanding.
    Overloaded(String),
    /// Requested entity (usually a session) does not exist.
    NotFound(String),
    /// Caller must authenticate before performing the requested action.
    Unauthorized(String),
    /// The external command executor failed.
    Exec(String),
}

impl AppError {
    /// Convert a handler failure into the error object sent back on the wire.
    #[must_use]
    pub fn to_rpc_error(&self) -> RpcError {
        match self {
            Self::Protocol(err) => err.clone(),
            Self::NotFound(msg) => RpcError::resource_not_found(Some(json!({ "details": msg }))),
            Self::Unauthorized(msg) => RpcError::auth_required(Some(json!({ "details": msg }))),
            other => RpcError::internal_error(Some(json!({ "details": other.to_string() }))),
        }
    }
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "config: {msg}"),
            Self::Io(msg) => write!(f, "io: {msg}"),
            Self::Framing(msg) => write!(f, "framing: {msg}"),
            Self::Protocol(err) => write!(f, "protocol: {} ({})", err.message, err.code),
            Self::Sequence(msg) => write!(f, "sequence: {msg}"),
            Self::ConnectionClosed => write!(f, "connection closed"),
            Self::Timeout(msg) => write!(f, "timeout: {msg}"),
            Self::Overloaded(msg) => write!(f, "overloaded: {msg}"),
            Self::NotFound(msg) => write!(f, "not found: {msg}"),
            Self::Unauthorized(msg) => write!(f, "unauthorized: {msg}"),
            Self::Exec(msg) => write!(f, "exec: {msg}"),
        }
    }
}

impl std::error::Error for AppError {}

impl From<RpcError> for AppError {
    fn from(err: RpcError) -> Self {
        Self::Protocol(err)
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(format!("invalid config: {err}"))
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        Self::Framing(format!("json: {err}"))
    }
}

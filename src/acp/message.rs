//! JSON-RPC message shapes and the frame <-> message codec.
//!
//! Three shapes travel on an ACP stream:
//!
//! | Shape          | `id` | `method` | body                   |
//! |----------------|------|----------|------------------------|
//! | Request        | yes  | yes      | `params`               |
//! | Notification   | no   | yes      | `params`               |
//! | Response       | yes  | no       | `result` *or* `error`  |
//!
//! Every outbound frame carries `"jsonrpc":"2.0"`.  Inbound frames may omit
//! the tag; if present it must be `"2.0"`.  Unknown fields are ignored.

use std::fmt::{Display, Formatter};

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{json, Map, Value};

use crate::{AppError, Result};

/// JSON-RPC protocol tag written on every outbound frame.
pub const JSONRPC_VERSION: &str = "2.0";

/// Request correlation id: an integer or a string chosen by the sender.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    /// Integer id (used for every request this crate originates).
    Number(i64),
    /// String id, accepted from peers.
    Str(String),
}

impl Display for RequestId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::Str(s) => write!(f, "{s}"),
        }
    }
}

impl From<i64> for RequestId {
    fn from(n: i64) -> Self {
        Self::Number(n)
    }
}

impl From<&str> for RequestId {
    fn from(s: &str) -> Self {
        Self::Str(s.to_owned())
    }
}

/// Error object carried in a failed response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcError {
    /// Numeric error code (JSON-RPC reserved range or application range).
    pub code: i64,
    /// Short human-readable description.
    pub message: String,
    /// Optional structured detail.  An explicit `null` decodes as
    /// `Some(Value::Null)`, distinct from an absent field.
    #[serde(
        default,
        deserialize_with = "present_value",
        skip_serializing_if = "Option::is_none"
    )]
    pub data: Option<Value>,
}

fn present_value<'de, D>(deserializer: D) -> std::result::Result<Option<Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Value::deserialize(deserializer).map(Some)
}

impl RpcError {
    /// Invalid JSON was received.
    pub const PARSE_ERROR: i64 = -32700;
    /// The JSON sent is not a valid request object.
    pub const INVALID_REQUEST: i64 = -32600;
    /// The method does not exist or is not available.
    pub const METHOD_NOT_FOUND: i64 = -32601;
    /// Invalid method parameters.
    pub const INVALID_PARAMS: i64 = -32602;
    /// Internal handler error.
    pub const INTERNAL_ERROR: i64 = -32603;
    /// Application range: authentication is required first.
    pub const AUTH_REQUIRED: i64 = -32000;
    /// Application range: a referenced resource (e.g. a session) is unknown.
    pub const RESOURCE_NOT_FOUND: i64 = -32002;

    /// Build an error object from its parts.
    #[must_use]
    pub fn new(code: i64, message: impl Into<String>, data: Option<Value>) -> Self {
        Self {
            code,
            message: message.into(),
            data,
        }
    }

    /// `-32700 Parse error`.
    #[must_use]
    pub fn parse_error(data: Option<Value>) -> Self {
        Self::new(Self::PARSE_ERROR, "Parse error", data)
    }

    /// `-32600 Invalid request`.
    #[must_use]
    pub fn invalid_request(data: Option<Value>) -> Self {
        Self::new(Self::INVALID_REQUEST, "Invalid request", data)
    }

    /// `-32601 Method not found`, naming the method in `data`.
    #[must_use]
    pub fn method_not_found(method: &str) -> Self {
        Self::new(
            Self::METHOD_NOT_FOUND,
            "Method not found",
            Some(json!({ "method": method })),
        )
    }

    /// `-32602 Invalid params`.
    #[must_use]
    pub fn invalid_params(data: Option<Value>) -> Self {
        Self::new(Self::INVALID_PARAMS, "Invalid params", data)
    }

    /// `-32603 Internal error`.
    #[must_use]
    pub fn internal_error(data: Option<Value>) -> Self {
        Self::new(Self::INTERNAL_ERROR, "Internal error", data)
    }

    /// `-32000 Authentication required`.
    #[must_use]
    pub fn auth_required(data: Option<Value>) -> Self {
        Self::new(Self::AUTH_REQUIRED, "Authentication required", data)
    }

    /// `-32002 Resource not found`.
    #[must_use]
    pub fn resource_not_found(data: Option<Value>) -> Self {
        Self::new(Self::RESOURCE_NOT_FOUND, "Resource not found", data)
    }
}

/// Body of a response: exactly one of `result` or `error`.
#[derive(Debug, Clone, PartialEq)]
pub enum ResponseBody {
    /// Successful result (may be `null`).
    Result(Value),
    /// Failure.
    Error(RpcError),
}

impl ResponseBody {
    /// Collapse into a standard `Result`.
    ///
    /// # Errors
    ///
    /// Returns the carried [`RpcError`] for an error body.
    pub fn into_result(self) -> std::result::Result<Value, RpcError> {
        match self {
            Self::Result(v) => Ok(v),
            Self::Error(e) => Err(e),
        }
    }
}

/// One decoded ACP message.
///
/// `params` is `Value::Null` when absent; a `null` params field is omitted
/// on encode so that the two forms are indistinguishable.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    /// A call expecting a response.
    Request {
        /// Correlation id.
        id: RequestId,
        /// Method name.
        method: String,
        /// Method parameters.
        params: Value,
    },
    /// The answer to a request.
    Response {
        /// Id of the request being answered.
        id: RequestId,
        /// Result or error.
        body: ResponseBody,
    },
    /// A one-way message.
    Notification {
        /// Method name.
        method: String,
        /// Method parameters.
        params: Value,
    },
}

/// Decode one frame into a [`Message`].
///
/// Classification follows the presence of `method` and `id`: both makes a
/// request, `method` alone a notification, `id` alone a response.
///
/// # Errors
///
/// - [`AppError::Framing`]`("malformed json: …")` — not a JSON object.
/// - [`AppError::Framing`]`("unsupported jsonrpc version: …")` — wrong tag.
/// - [`AppError::Framing`]`("invalid message: …")` — missing or mistyped
///   discriminator fields (`method`, `id`, `error`).
pub fn decode(frame: &str) -> Result<Message> {
    let obj: Map<String, Value> = serde_json::from_str(frame)
        .map_err(|e| AppError::Framing(format!("malformed json: {e}")))?;

    match obj.get("jsonrpc") {
        None => {}
        Some(Value::String(v)) if v == JSONRPC_VERSION => {}
        Some(other) => {
            return Err(AppError::Framing(format!(
                "unsupported jsonrpc version: {other}"
            )))
        }
    }

    let method = match obj.get("method") {
        None => None,
        Some(Value::String(m)) => Some(m.clone()),
        Some(other) => {
            return Err(AppError::Framing(format!(
                "invalid message: method must be a string, got {other}"
            )))
        }
    };

    let id = match obj.get("id") {
        None => None,
        Some(raw) => Some(parse_id(raw)?),
    };

    let params = obj.get("params").cloned().unwrap_or(Value::Null);

    match (method, id) {
        (Some(method), Some(id)) => Ok(Message::Request { id, method, params }),
        (Some(method), None) => Ok(Message::Notification { method, params }),
        (None, Some(id)) => {
            let body = match obj.get("error") {
                Some(raw) if !raw.is_null() => {
                    let err: RpcError = serde_json::from_value(raw.clone()).map_err(|e| {
                        AppError::Framing(format!("invalid message: error object: {e}"))
                    })?;
                    ResponseBody::Error(err)
                }
                _ => ResponseBody::Result(obj.get("result").cloned().unwrap_or(Value::Null)),
            };
            Ok(Message::Response { id, body })
        }
        (None, None) => Err(AppError::Framing(
            "invalid message: neither method nor id present".into(),
        )),
    }
}

/// Encode a [`Message`] as a single-line JSON frame (without the newline).
///
/// # Errors
///
/// Returns [`AppError::Framing`] if serialization fails, which cannot happen
/// for values built from `serde_json::Value`.
pub fn encode(message: &Message) -> Result<String> {
    let mut obj = Map::new();
    obj.insert("jsonrpc".into(), Value::String(JSONRPC_VERSION.into()));

    match message {
        Message::Request { id, method, params } => {
            obj.insert("id".into(), serde_json::to_value(id)?);
            obj.insert("method".into(), Value::String(method.clone()));
            if !params.is_null() {
                obj.insert("params".into(), params.clone());
            }
        }
        Message::Notification { method, params } => {
            obj.insert("method".into(), Value::String(method.clone()));
            if !params.is_null() {
                obj.insert("params".into(), params.clone());
            }
        }
        Message::Response { id, body } => {
            obj.insert("id".into(), serde_json::to_value(id)?);
            match body {
                ResponseBody::Result(v) => {
                    obj.insert("result".into(), v.clone());
                }
                ResponseBody::Error(e) => {
                    obj.insert("error".into(), serde_json::to_value(e)?);
                }
            }
        }
    }

    Ok(serde_json::to_string(&Value::Object(obj))?)
}

/// Error reply owed for a frame that [`decode`] rejected.
///
/// A frame that names a `method` and carries an `id` is a request the peer
/// is waiting on, so it is answered with `-32600 Invalid request`.  The id
/// is echoed when usable and written as `null` otherwise.  Anything else
/// yields `None` and is dropped silently.
#[must_use]
pub fn rejection(frame: &str, reason: &AppError) -> Option<String> {
    let obj: Map<String, Value> = serde_json::from_str(frame).ok()?;
    if !obj.contains_key("method") {
        return None;
    }
    let raw_id = obj.get("id")?;
    let id = if parse_id(raw_id).is_ok() {
        raw_id.clone()
    } else {
        Value::Null
    };
    let error = RpcError::invalid_request(Some(json!({ "details": reason.to_string() })));
    let reply = json!({
        "jsonrpc": JSONRPC_VERSION,
        "id": id,
        "error": serde_json::to_value(error).ok()?,
    });
    Some(reply.to_string())
}

fn parse_id(raw: &Value) -> Result<RequestId> {
    match raw {
        Value::String(s) => Ok(RequestId::Str(s.clone())),
        Value::Number(n) => n.as_i64().map(RequestId::Number).ok_or_else(|| {
            AppError::Framing(format!("invalid message: id must be an integer, got {n}"))
        }),
        other => Err(AppError::Framing(format!(
            "invalid message: id must be an integer or string, got {other}"
        ))),
    }
}

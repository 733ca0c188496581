//! Closed method tables for each role.
//!
//! Dispatch never looks handlers up by arbitrary string: an inbound method
//! name is first resolved to one of these enums, and anything that does not
//! resolve (and is not an `_`-prefixed extension) is `Method not found`.
//!
//! | Method                       | Handled by | Kind         |
//! |------------------------------|------------|--------------|
//! | `initialize`                 | agent      | request      |
//! | `authenticate`               | agent      | request      |
//! | `session/new`                | agent      | request      |
//! | `session/load`               | agent      | request      |
//! | `session/set_mode`           | agent      | request      |
//! | `session/prompt`             | agent      | request      |
//! | `session/cancel`             | agent      | notification |
//! | `session/update`             | client     | notification |
//! | `session/request_permission` | client     | request      |
//! | `fs/read_text_file`          | client     | request      |
//! | `fs/write_text_file`         | client     | request      |

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};

use crate::acp::message::RpcError;
use crate::{AppError, Result};

/// Prefix marking a non-standard extension method.
pub const EXT_PREFIX: char = '_';

/// Legacy name accepted for [`ClientMethod::RequestPermission`].
const LEGACY_PERMISSION_REQUEST: &str = "permission/request";

/// Methods an agent serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AgentMethod {
    /// `initialize`
    Initialize,
    /// `authenticate`
    Authenticate,
    /// `session/new`
    NewSession,
    /// `session/load`
    LoadSession,
    /// `session/set_mode`
    SetSessionMode,
    /// `session/prompt`
    Prompt,
    /// `session/cancel`
    Cancel,
}

impl AgentMethod {
    /// Every agent method.
    pub const ALL: [Self; 7] = [
        Self::Initialize,
        Self::Authenticate,
        Self::NewSession,
        Self::LoadSession,
        Self::SetSessionMode,
        Self::Prompt,
        Self::Cancel,
    ];

    /// Wire name.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Initialize => "initialize",
            Self::Authenticate => "authenticate",
            Self::NewSession => "session/new",
            Self::LoadSession => "session/load",
            Self::SetSessionMode => "session/set_mode",
            Self::Prompt => "session/prompt",
            Self::Cancel => "session/cancel",
        }
    }

    /// Resolve a wire name.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|m| m.name() == name)
    }

    /// Whether the method is sent as a notification.
    #[must_use]
    pub fn is_notification(self) -> bool {
        matches!(self, Self::Cancel)
    }
}

/// Methods a client serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClientMethod {
    /// `session/update`
    SessionUpdate,
    /// `session/request_permission`
    RequestPermission,
    /// `fs/read_text_file`
    ReadTextFile,
    /// `fs/write_text_file`
    WriteTextFile,
}

impl ClientMethod {
    /// Every client method.
    pub const ALL: [Self; 4] = [
        Self::SessionUpdate,
        Self::RequestPermission,
        Self::ReadTextFile,
        Self::WriteTextFile,
    ];

    /// Wire name.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::SessionUpdate => "session/update",
            Self::RequestPermission => "session/request_permission",
            Self::ReadTextFile => "fs/read_text_file",
            Self::WriteTextFile => "fs/write_text_file",
        }
    }

    /// Resolve a wire name.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        if name == LEGACY_PERMISSION_REQUEST {
            return Some(Self::RequestPermission);
        }
        Self::ALL.into_iter().find(|m| m.name() == name)
    }

    /// Whether the method is sent as a notification.
    #[must_use]
    pub fn is_notification(self) -> bool {
        matches!(self, Self::SessionUpdate)
    }
}

/// Extension name of an `_`-prefixed method, without the prefix.
#[must_use]
pub fn ext_name(method: &str) -> Option<&str> {
    method.strip_prefix(EXT_PREFIX)
}

/// Wire name for extension `name`.
#[must_use]
pub fn ext_method_name(name: &str) -> String {
    format!("{EXT_PREFIX}{name}")
}

/// Deserialize inbound `params`; a schema mismatch is `Invalid params`.
pub(crate) fn parse_params<T: DeserializeOwned>(params: Value) -> Result<T> {
    serde_json::from_value(params).map_err(|e| {
        AppError::Protocol(RpcError::invalid_params(Some(
            json!({ "details": e.to_string() }),
        )))
    })
}

/// Deserialize the result of an outbound request.
pub(crate) fn parse_result<T: DeserializeOwned>(method: &str, result: Value) -> Result<T> {
    serde_json::from_value(result)
        .map_err(|e| AppError::Framing(format!("unexpected {method} result: {e}")))
}

/// Serialize a typed value for the wire.
pub(crate) fn to_value<T: Serialize>(value: &T) -> Result<Value> {
    serde_json::to_value(value).map_err(|e| {
        AppError::Protocol(RpcError::internal_error(Some(
            json!({ "details": e.to_string() }),
        )))
    })
}

/// `Method not found` as a local error.
pub(crate) fn not_found(method: &str) -> AppError {
    AppError::Protocol(RpcError::method_not_found(method))
}

//! Permission gate for shell commands.
//!
//! In `confirm` mode every command that does not match a whitelist pattern
//! is put to the user through `session/request_permission`.  In `yolo`
//! mode nothing is asked.

use std::fmt::{Display, Formatter};
use std::future::Future;
use std::pin::Pin;
use std::str::FromStr;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{info, warn};

use crate::acp::agent::AgentSideConnection;
use crate::acp::schema::{
    PermissionOption, PermissionOptionKind, PermissionToolCall, RequestPermissionOutcome,
    RequestPermissionRequest,
};
use crate::{AppError, Result};

/// Option id that approves a single command.
pub const ALLOW_ONCE: &str = "allow-once";
/// Option id that approves this and later identical commands.
pub const ALLOW_ALWAYS: &str = "allow-always";
/// Option id that rejects a single command.
pub const REJECT_ONCE: &str = "reject-once";

/// Whether commands need the user's approval.
#[derive(Debug, Copy, Clone, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PermissionMode {
    /// Ask before each non-whitelisted command.
    #[default]
    Confirm,
    /// Never ask.
    Yolo,
}

impl Display for PermissionMode {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Confirm => write!(f, "confirm"),
            Self::Yolo => write!(f, "yolo"),
        }
    }
}

impl FromStr for PermissionMode {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "confirm" => Ok(Self::Confirm),
            "yolo" => Ok(Self::Yolo),
            other => Err(AppError::Config(format!(
                "unknown permission mode '{other}' (expected confirm or yolo)"
            ))),
        }
    }
}

/// Compiled whitelist.
#[derive(Debug, Clone, Default)]
pub struct Whitelist {
    patterns: Vec<Regex>,
}

impl Whitelist {
    /// Compile `patterns`.  Each pattern must match at the start of the
    /// command line.
    ///
    /// # Errors
    ///
    /// [`AppError::Config`] naming the first pattern that does not compile.
    pub fn new(patterns: &[String]) -> Result<Self> {
        let patterns = patterns
            .iter()
            .map(|p| {
                Regex::new(p)
                    .map_err(|err| AppError::Config(format!("invalid whitelist pattern '{p}': {err}")))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { patterns })
    }

    /// Pattern that `cmd` matches, if any.
    #[must_use]
    pub fn matching(&self, cmd: &str) -> Option<&str> {
        self.patterns
            .iter()
            .find(|re| re.find(cmd).is_some_and(|m| m.start() == 0))
            .map(Regex::as_str)
    }
}

/// Decides whether a command may run without asking.
#[derive(Debug, Clone, Default)]
pub struct PermissionPolicy {
    whitelist: Whitelist,
}

impl PermissionPolicy {
    /// Policy over a compiled whitelist.
    #[must_use]
    pub fn new(whitelist: Whitelist) -> Self {
        Self { whitelist }
    }

    /// Whether `cmd` must be confirmed under `mode`.
    #[must_use]
    pub fn needs_confirmation(&self, mode: PermissionMode, cmd: &str) -> bool {
        if mode == PermissionMode::Yolo || cmd.trim().is_empty() {
            return false;
        }
        if let Some(rule) = self.whitelist.matching(cmd) {
            info!(cmd, matched_rule = rule, "permission: whitelisted, not asking");
            return false;
        }
        true
    }
}

/// Boxed future returned by [`PermissionPrompt::confirm`].
pub type ConfirmFuture<'a> = Pin<Box<dyn Future<Output = bool> + Send + 'a>>;

/// Asks the user whether a tool call may run.
pub trait PermissionPrompt: Send + Sync {
    /// `true` when the user allowed the call.  Any failure counts as a denial.
    fn confirm<'a>(&'a self, session_id: &'a str, tool_call_id: &'a str, cmd: &'a str) -> ConfirmFuture<'a>;
}

/// Build the permission request sent for a shell command.
#[must_use]
pub fn command_permission_request(session_id: &str, tool_call_id: &str, cmd: &str) -> RequestPermissionRequest {
    RequestPermissionRequest {
        session_id: session_id.to_owned(),
        tool_call: PermissionToolCall {
            tool_call_id: tool_call_id.to_owned(),
            title: Some("run".into()),
            raw_input: json!({ "cmd": cmd }),
        },
        options: vec![
            PermissionOption {
                option_id: ALLOW_ONCE.into(),
                name: "Allow once".into(),
                kind: PermissionOptionKind::AllowOnce,
            },
            PermissionOption {
                option_id: REJECT_ONCE.into(),
                name: "Reject".into(),
                kind: PermissionOptionKind::RejectOnce,
            },
        ],
    }
}

/// Whether `outcome` approves the call.
#[must_use]
pub fn is_allowed(outcome: &RequestPermissionOutcome) -> bool {
    matches!(
        outcome,
        RequestPermissionOutcome::Selected { option_id }
            if option_id == ALLOW_ONCE || option_id == ALLOW_ALWAYS
    )
}

impl PermissionPrompt for AgentSideConnection {
    fn confirm<'a>(&'a self, session_id: &'a str, tool_call_id: &'a str, cmd: &'a str) -> ConfirmFuture<'a> {
        Box::pin(async move {
            let request = command_permission_request(session_id, tool_call_id, cmd);
            match self.request_permission(request).await {
                Ok(response) => is_allowed(&response.outcome),
                Err(err) => {
                    warn!(session_id, tool_call_id, error = %err, "permission: request failed, denying");
                    false
                }
            }
        })
    }
}

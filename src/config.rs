//! Global configuration parsing, validation, and environment overrides.

use std::env;
use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use tracing::info;

use crate::acp::codec::MAX_LINE_BYTES;
use crate::acp::connection::ConnectionOptions;
use crate::bridge::permissions::{PermissionMode, Whitelist};
use crate::{AppError, Result};

/// Environment variable overriding `[agent] mode`.
pub const ENV_MODE: &str = "ACP_LINK_MODE";
/// Environment variable overriding `[agent] whitelist_actions` (JSON array).
pub const ENV_WHITELIST: &str = "ACP_LINK_WHITELIST";

/// Connection tunables shared by both roles.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct ConnectionConfig {
    /// Maximum inbound frame length in bytes.
    #[serde(default = "default_max_line_bytes")]
    pub max_line_bytes: usize,
    /// Upper bound on outstanding outbound requests.
    #[serde(default = "default_max_pending_requests")]
    pub max_pending_requests: usize,
    /// Per-request response deadline; 0 means no timeout.
    #[serde(default)]
    pub request_timeout_seconds: u64,
    /// Capacity of the ordered notification/response queue.
    #[serde(default = "default_dispatch_queue_depth")]
    pub dispatch_queue_depth: usize,
}

fn default_max_line_bytes() -> usize {
    MAX_LINE_BYTES
}

fn default_max_pending_requests() -> usize {
    256
}

fn default_dispatch_queue_depth() -> usize {
    256
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            max_line_bytes: default_max_line_bytes(),
            max_pending_requests: default_max_pending_requests(),
            request_timeout_seconds: 0,
            dispatch_queue_depth: default_dispatch_queue_depth(),
        }
    }
}

impl ConnectionConfig {
    /// Runtime options for [`crate::acp::connection::Connection::start`].
    #[must_use]
    pub fn options(&self) -> ConnectionOptions {
        ConnectionOptions {
            max_line_bytes: self.max_line_bytes,
            max_pending_requests: self.max_pending_requests,
            request_timeout: (self.request_timeout_seconds > 0)
                .then(|| Duration::from_secs(self.request_timeout_seconds)),
            dispatch_queue_depth: self.dispatch_queue_depth,
        }
    }
}

/// Shell agent behaviour.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct AgentConfig {
    /// `confirm` asks before running commands, `yolo` never asks.
    #[serde(default)]
    pub mode: PermissionMode,
    /// Regexes; a command matching one (from its start) runs without asking.
    #[serde(default)]
    pub whitelist_actions: Vec<String>,
    /// Per-command time limit.
    #[serde(default = "default_command_timeout")]
    pub command_timeout_seconds: u64,
    /// Shell used as `<shell> -c <cmd>`.
    #[serde(default = "default_shell")]
    pub shell: String,
}

fn default_command_timeout() -> u64 {
    120
}

fn default_shell() -> String {
    "sh".into()
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            mode: PermissionMode::default(),
            whitelist_actions: Vec::new(),
            command_timeout_seconds: default_command_timeout(),
            shell: default_shell(),
        }
    }
}

/// Global configuration parsed from `config.toml`.
///
/// Every field has a default, so an empty file (or no file) is valid.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct GlobalConfig {
    /// Connection tunables.
    #[serde(default)]
    pub connection: ConnectionConfig,
    /// Shell agent settings.
    #[serde(default)]
    pub agent: AgentConfig,
}

impl GlobalConfig {
    /// Load and validate configuration from a TOML file path.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the file cannot be read or contains
    /// invalid TOML, or if validation fails.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|err| AppError::Config(format!("failed to read config: {err}")))?;
        Self::from_toml_str(&raw)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if parsing or validation fails.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `ACP_LINK_MODE` and `ACP_LINK_WHITELIST` from the environment.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if a variable is set but malformed, or if
    /// the resulting configuration fails validation.
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        if let Ok(mode) = env::var(ENV_MODE) {
            self.agent.mode = mode.parse()?;
            info!(mode = %self.agent.mode, "config: mode overridden from environment");
        }
        if let Ok(raw) = env::var(ENV_WHITELIST) {
            if !raw.trim().is_empty() {
                self.agent.whitelist_actions = serde_json::from_str(&raw).map_err(|err| {
                    AppError::Config(format!("{ENV_WHITELIST} must be a JSON array of strings: {err}"))
                })?;
                info!(
                    patterns = self.agent.whitelist_actions.len(),
                    "config: whitelist overridden from environment"
                );
            }
        }
        self.validate()
    }

    fn validate(&self) -> Result<()> {
        if self.connection.max_line_bytes == 0 {
            return Err(AppError::Config(
                "connection.max_line_bytes must be greater than zero".into(),
            ));
        }

        if self.connection.max_pending_requests == 0 {
            return Err(AppError::Config(
                "connection.max_pending_requests must be greater than zero".into(),
            ));
        }

        if self.connection.dispatch_queue_depth == 0 {
            return Err(AppError::Config(
                "connection.dispatch_queue_depth must be greater than zero".into(),
            ));
        }

        if self.agent.command_timeout_seconds == 0 {
            return Err(AppError::Config(
                "agent.command_timeout_seconds must be greater than zero".into(),
            ));
        }

        if self.agent.shell.trim().is_empty() {
            return Err(AppError::Config("agent.shell must not be empty".into()));
        }

        Whitelist::new(&self.agent.whitelist_actions)?;

        Ok(())
    }
}

//! Glue between the protocol core and a concrete agent.
//!
//! [`ShellAgent`] owns a [`SessionStore`] and delegates each turn to a
//! [`TurnRunner`]; the bundled [`CommandRunner`] runs shell commands
//! through a [`CommandExecutor`], gated by a [`PermissionPolicy`].

pub mod agent;
pub mod executor;
pub mod permissions;
pub mod runner;
pub mod sessions;

use std::sync::Arc;
use std::time::Duration;

pub use agent::ShellAgent;
pub use executor::{CommandExecutor, CommandOutput, ShellExecutor};
pub use permissions::{PermissionMode, PermissionPolicy, PermissionPrompt, Whitelist};
pub use runner::{CommandRunner, TurnContext, TurnResult, TurnRunner};
pub use sessions::{Session, SessionStore};

use crate::config::AgentConfig;
use crate::Result;

/// Build the shell-command runner described by `[agent]` settings.
///
/// # Errors
///
/// [`crate::AppError::Config`] when a whitelist pattern does not compile.
pub fn command_runner(config: &AgentConfig) -> Result<Arc<dyn TurnRunner>> {
    let whitelist = Whitelist::new(&config.whitelist_actions)?;
    let executor = Arc::new(ShellExecutor::new(
        config.shell.clone(),
        Duration::from_secs(config.command_timeout_seconds),
    ));
    Ok(Arc::new(CommandRunner::new(
        executor,
        PermissionPolicy::new(whitelist),
    )))
}

//! Opaque command execution.
//!
//! The turn runner only sees `{output, returncode}`; how a command actually
//! runs is behind [`CommandExecutor`].

use std::future::Future;
use std::path::Path;
use std::pin::Pin;
use std::process::Stdio;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tracing::{debug, warn};

use crate::{AppError, Result};

/// Return code reported when a command exceeds its time limit.
pub const TIMEOUT_RETURNCODE: i32 = 124;

/// Boxed future returned by [`CommandExecutor::execute`].
pub type ExecFuture<'a> = Pin<Box<dyn Future<Output = Result<CommandOutput>> + Send + 'a>>;

/// Captured result of one command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandOutput {
    /// Combined stdout and stderr.
    pub output: String,
    /// Process exit code.
    pub returncode: i32,
}

/// Runs one shell command to completion.
pub trait CommandExecutor: Send + Sync + 'static {
    /// Execute `cmd` in `cwd`.
    ///
    /// # Errors
    ///
    /// [`AppError::Exec`] when the command could not be started at all.
    /// A command that runs and fails is `Ok` with a non-zero `returncode`.
    fn execute<'a>(&'a self, cmd: &'a str, cwd: &'a Path) -> ExecFuture<'a>;
}

/// Executes commands with `<shell> -c`.
#[derive(Debug, Clone)]
pub struct ShellExecutor {
    shell: String,
    timeout: Duration,
}

impl ShellExecutor {
    /// Executor using `shell` with a per-command `timeout`.
    #[must_use]
    pub fn new(shell: impl Into<String>, timeout: Duration) -> Self {
        Self {
            shell: shell.into(),
            timeout,
        }
    }

    async fn run(&self, cmd: &str, cwd: &Path) -> Result<CommandOutput> {
        let child = Command::new(&self.shell)
            .arg("-c")
            .arg(cmd)
            .current_dir(cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|err| AppError::Exec(format!("failed to spawn {}: {err}", self.shell)))?;

        // On timeout the child is dropped, which kills it.
        match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(Ok(out)) => {
                let mut output = String::from_utf8_lossy(&out.stdout).into_owned();
                output.push_str(&String::from_utf8_lossy(&out.stderr));
                let returncode = out.status.code().unwrap_or(-1);
                debug!(cmd, returncode, "shell executor: command finished");
                Ok(CommandOutput { output, returncode })
            }
            Ok(Err(err)) => Err(AppError::Exec(format!("failed to collect output: {err}"))),
            Err(_elapsed) => {
                warn!(cmd, timeout = ?self.timeout, "shell executor: command timed out");
                Ok(CommandOutput {
                    output: format!("command timed out after {:?}", self.timeout),
                    returncode: TIMEOUT_RETURNCODE,
                })
            }
        }
    }
}

impl CommandExecutor for ShellExecutor {
    fn execute<'a>(&'a self, cmd: &'a str, cwd: &'a Path) -> ExecFuture<'a> {
        Box::pin(self.run(cmd, cwd))
    }
}

//! Turn execution.
//!
//! A [`TurnRunner`] turns one prompt into a stream of session updates and a
//! stop reason.  [`CommandRunner`] is the bundled implementation: it runs
//! the shell commands found in the prompt, one tool call per command.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde_json::json;
use tracing::{debug, info, warn};

use crate::acp::schema::StopReason;
use crate::acp::update::{SessionUpdate, ToolCallStatus, TurnEmitter};
use crate::bridge::executor::{CommandExecutor, CommandOutput};
use crate::bridge::permissions::{PermissionPolicy, PermissionPrompt};
use crate::bridge::sessions::Session;
use crate::Result;

/// Final text of a turn that ran to completion.
pub const DONE_TEXT: &str = "Done.";

/// Output recorded for a command the user refused.
const DENIED_OUTPUT: &str = "Permission denied by user";

/// How a turn ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TurnResult {
    /// Stop reason returned to the client.
    pub stop_reason: StopReason,
}

impl TurnResult {
    /// A turn stopped by cancellation.
    #[must_use]
    pub fn cancelled() -> Self {
        Self {
            stop_reason: StopReason::Cancelled,
        }
    }
}

/// Everything a runner may touch during one turn.
#[derive(Clone, Copy)]
pub struct TurnContext<'a> {
    /// Session the turn runs in.
    pub session: &'a Session,
    /// Update sink for this turn; also the cancellation signal.
    pub emitter: &'a TurnEmitter,
    /// Asks the user before a tool call runs.
    pub permissions: &'a dyn PermissionPrompt,
}

/// Boxed future returned by [`TurnRunner::run_turn`].
pub type TurnFuture<'a> = Pin<Box<dyn Future<Output = Result<TurnResult>> + Send + 'a>>;

/// Produces the updates of one turn.
pub trait TurnRunner: Send + Sync + 'static {
    /// Run `task` to completion or until `ctx.emitter` reports cancellation.
    ///
    /// # Errors
    ///
    /// Any error fails the `prompt` request it serves.
    fn run_turn<'a>(&'a self, task: &'a str, ctx: TurnContext<'a>) -> TurnFuture<'a>;
}

/// Runs each command in the prompt as a tool call.
///
/// Commands are the contents of fenced ```` ```bash ```` / ```` ```sh ````
/// blocks when the prompt has any, otherwise every non-empty line.
pub struct CommandRunner {
    executor: Arc<dyn CommandExecutor>,
    policy: PermissionPolicy,
}

impl CommandRunner {
    /// Runner executing through `executor`, asking according to `policy`.
    #[must_use]
    pub fn new(executor: Arc<dyn CommandExecutor>, policy: PermissionPolicy) -> Self {
        Self { executor, policy }
    }

    async fn run(&self, task: &str, ctx: TurnContext<'_>) -> Result<TurnResult> {
        let emitter = ctx.emitter;
        let commands = extract_commands(task);
        info!(
            session_id = emitter.session_id(),
            commands = commands.len(),
            "command runner: turn started"
        );

        for (n, cmd) in commands.iter().enumerate() {
            if emitter.is_cancelled() {
                return Ok(TurnResult::cancelled());
            }
            let tool_call_id = format!("t{}", n + 1);
            emitter
                .emit(SessionUpdate::tool_call(&tool_call_id, "run", json!({ "cmd": cmd })))
                .await?;

            if self.policy.needs_confirmation(ctx.session.mode, cmd) {
                let allowed = tokio::select! {
                    allowed = ctx.permissions.confirm(&ctx.session.id, &tool_call_id, cmd) => allowed,
                    () = emitter.cancelled() => return Ok(TurnResult::cancelled()),
                };
                if !allowed {
                    debug!(tool_call_id = tool_call_id.as_str(), cmd = cmd.as_str(), "command runner: denied");
                    emitter
                        .emit(SessionUpdate::tool_call_update(
                            &tool_call_id,
                            ToolCallStatus::Cancelled,
                            json!({ "output": DENIED_OUTPUT, "returncode": 0 }),
                        ))
                        .await?;
                    continue;
                }
            }

            let result = tokio::select! {
                result = self.executor.execute(cmd, &ctx.session.cwd) => result,
                () = emitter.cancelled() => return Ok(TurnResult::cancelled()),
            };
            let output = result.unwrap_or_else(|err| {
                warn!(tool_call_id = tool_call_id.as_str(), error = %err, "command runner: executor failed");
                CommandOutput {
                    output: err.to_string(),
                    returncode: -1,
                }
            });
            let status = if output.returncode == 0 {
                ToolCallStatus::Completed
            } else {
                ToolCallStatus::Failed
            };
            emitter
                .emit(SessionUpdate::tool_call_update(
                    &tool_call_id,
                    status,
                    serde_json::to_value(&output)?,
                ))
                .await?;
        }

        if emitter.is_cancelled() {
            return Ok(TurnResult::cancelled());
        }
        emitter.emit(SessionUpdate::message_chunk(DONE_TEXT)).await?;
        Ok(TurnResult {
            stop_reason: StopReason::EndTurn,
        })
    }
}

impl TurnRunner for CommandRunner {
    fn run_turn<'a>(&'a self, task: &'a str, ctx: TurnContext<'a>) -> TurnFuture<'a> {
        Box::pin(self.run(task, ctx))
    }
}

/// Commands contained in a prompt.
#[must_use]
pub fn extract_commands(task: &str) -> Vec<String> {
    let mut fenced = Vec::new();
    let mut block: Option<Vec<&str>> = None;
    for line in task.lines() {
        let trimmed = line.trim();
        match block.take() {
            Some(mut lines) => {
                if trimmed == "```" {
                    let cmd = lines.join("\n").trim().to_owned();
                    if !cmd.is_empty() {
                        fenced.push(cmd);
                    }
                } else {
                    lines.push(line);
                    block = Some(lines);
                }
            }
            None => {
                if trimmed == "```bash" || trimmed == "```sh" {
                    block = Some(Vec::new());
                }
            }
        }
    }
    if !fenced.is_empty() {
        return fenced;
    }
    task.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with("```"))
        .map(str::to_owned)
        .collect()
}

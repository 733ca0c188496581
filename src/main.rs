#![forbid(unsafe_code)]

//! `acp-link`: run a shell-command ACP agent on stdio, or drive an ACP
//! agent process from the terminal.

use std::path::PathBuf;
use std::process::Stdio;

use clap::{Parser, Subcommand, ValueEnum};
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};
use tokio::process::Command;
use tokio::sync::{mpsc, oneshot};
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use acp_link::acp::agent::AgentSideConnection;
use acp_link::acp::client::{Client, ClientSideConnection};
use acp_link::acp::connection::HandlerFuture;
use acp_link::acp::schema::{
    CancelNotification, ClientCapabilities, InitializeRequest, NewSessionRequest, PromptRequest,
    RequestPermissionOutcome, RequestPermissionRequest, RequestPermissionResponse,
    PROTOCOL_VERSION,
};
use acp_link::acp::transport;
use acp_link::acp::update::{SessionNotification, SessionUpdate};
use acp_link::bridge::{self, SessionStore, ShellAgent};
use acp_link::config::GlobalConfig;
use acp_link::{AppError, Result};

#[derive(Debug, Copy, Clone, Default, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "acp-link", about = "Agent Client Protocol over stdio", version, long_about = None)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log output format (text or json). Logs always go to stderr.
    #[arg(long, value_enum, default_value_t = LogFormat::Text, global = true)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Serve the shell-command agent on stdin/stdout.
    Agent,
    /// Spawn an agent process and chat with it from the terminal.
    Client {
        /// Agent program and its arguments, after `--`.
        #[arg(last = true, required = true)]
        command: Vec<String>,
    },
}

fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(args.log_format)?;

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| AppError::Config(format!("failed to build tokio runtime: {err}")))?
        .block_on(run(args))
}

async fn run(args: Cli) -> Result<()> {
    let mut config = match &args.config {
        Some(path) => GlobalConfig::load_from_path(path)?,
        None => GlobalConfig::default(),
    };
    config.apply_env_overrides()?;
    info!("configuration loaded");

    match args.command {
        Commands::Agent => run_agent(config).await,
        Commands::Client { command } => run_client(config, command).await,
    }
}

// ── Agent role ────────────────────────────────────────────────────────────────

async fn run_agent(config: GlobalConfig) -> Result<()> {
    let runner = bridge::command_runner(&config.agent)?;
    let mode = config.agent.mode;
    let (stdin, stdout) = transport::stdio();

    let side = AgentSideConnection::start(stdin, stdout, config.connection.options(), move |conn| {
        ShellAgent::new(conn, SessionStore::new(mode), runner)
    });
    info!(%mode, "acp agent ready on stdio");

    tokio::select! {
        () = side.closed() => info!("client disconnected"),
        () = shutdown_signal() => {
            info!("shutdown signal received");
            side.connection().close().await;
        }
    }
    info!("acp-link agent shut down");
    Ok(())
}

// ── Client role ───────────────────────────────────────────────────────────────

/// A permission question forwarded from the connection to the terminal loop.
struct PermissionAsk {
    request: RequestPermissionRequest,
    reply: oneshot::Sender<RequestPermissionOutcome>,
}

/// Prints updates and forwards permission questions to the terminal.
struct TerminalClient {
    asks: mpsc::Sender<PermissionAsk>,
}

impl Client for TerminalClient {
    fn request_permission(
        &self,
        args: RequestPermissionRequest,
    ) -> HandlerFuture<'_, RequestPermissionResponse> {
        Box::pin(async move {
            let (reply, answer) = oneshot::channel();
            let outcome = if self.asks.send(PermissionAsk { request: args, reply }).await.is_ok() {
                answer.await.unwrap_or(RequestPermissionOutcome::Cancelled)
            } else {
                RequestPermissionOutcome::Cancelled
            };
            Ok(RequestPermissionResponse { outcome })
        })
    }

    fn session_update(&self, args: SessionNotification) -> HandlerFuture<'_, ()> {
        Box::pin(async move {
            render_update(&args.update);
            Ok(())
        })
    }
}

fn render_update(update: &SessionUpdate) {
    match update {
        SessionUpdate::AgentMessageChunk { text } => println!("{text}"),
        SessionUpdate::AgentThoughtChunk { text } => println!("(thinking) {text}"),
        SessionUpdate::ToolCall {
            tool_call_id,
            title,
            raw_input,
            ..
        } => println!("[{tool_call_id}] {title}: {raw_input}"),
        SessionUpdate::ToolCallUpdate {
            tool_call_id,
            status,
            raw_output,
        } => {
            println!("[{tool_call_id}] {status:?}");
            if let Some(output) = raw_output.get("output").and_then(|o| o.as_str()) {
                print!("{output}");
            }
        }
        SessionUpdate::Plan { steps } => {
            for step in steps {
                println!("  - [{:?}] {}", step.status, step.content);
            }
        }
        SessionUpdate::Diff { path, .. } => {
            println!("--- diff {path}");
            if let Some(patch) = update.unified_diff() {
                print!("{patch}");
            }
        }
    }
}

async fn run_client(config: GlobalConfig, command: Vec<String>) -> Result<()> {
    let Some((program, program_args)) = command.split_first() else {
        return Err(AppError::Config("missing agent program".into()));
    };

    let mut child = Command::new(program)
        .args(program_args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::inherit())
        .kill_on_drop(true)
        .spawn()
        .map_err(|err| AppError::Config(format!("failed to spawn agent {program}: {err}")))?;
    let agent_stdin = child
        .stdin
        .take()
        .ok_or_else(|| AppError::Io("failed to capture agent stdin".into()))?;
    let agent_stdout = child
        .stdout
        .take()
        .ok_or_else(|| AppError::Io("failed to capture agent stdout".into()))?;

    let (asks, mut ask_rx) = mpsc::channel(8);
    let client = ClientSideConnection::start(
        agent_stdout,
        agent_stdin,
        config.connection.options(),
        TerminalClient { asks },
    );

    client
        .initialize(InitializeRequest {
            protocol_version: PROTOCOL_VERSION,
            client_capabilities: ClientCapabilities::default(),
        })
        .await?;
    let cwd = std::env::current_dir()?.to_string_lossy().into_owned();
    let session_id = client
        .new_session(NewSessionRequest {
            cwd,
            mcp_servers: Vec::new(),
        })
        .await?
        .session_id;
    info!(session_id = session_id.as_str(), "session ready; type a prompt, ctrl-c cancels a turn");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let task = line.trim();
        if task.is_empty() {
            continue;
        }

        let turn = client.prompt(PromptRequest::text(session_id.as_str(), task));
        tokio::pin!(turn);
        loop {
            tokio::select! {
                result = &mut turn => {
                    match result {
                        Ok(response) => println!("[turn ended: {:?}]", response.stop_reason),
                        Err(err) => error!(%err, "prompt failed"),
                    }
                    break;
                }
                Some(ask) = ask_rx.recv() => {
                    let outcome = ask_on_terminal(&ask.request, &mut lines).await?;
                    if ask.reply.send(outcome).is_err() {
                        warn!("permission answer arrived after the request was dropped");
                    }
                }
                result = tokio::signal::ctrl_c() => {
                    if let Err(err) = result {
                        warn!(%err, "ctrl-c handler failed");
                    }
                    client
                        .cancel(CancelNotification { session_id: session_id.clone() })
                        .await?;
                }
            }
        }
    }

    client.close().await;
    if let Err(err) = child.wait().await {
        warn!(%err, "agent process did not exit cleanly");
    }
    info!("acp-link client shut down");
    Ok(())
}

async fn ask_on_terminal(
    request: &RequestPermissionRequest,
    lines: &mut Lines<BufReader<Stdin>>,
) -> Result<RequestPermissionOutcome> {
    println!(
        "permission requested for [{}] {}",
        request.tool_call.tool_call_id, request.tool_call.raw_input
    );
    for (n, option) in request.options.iter().enumerate() {
        println!("  {}) {}", n + 1, option.name);
    }
    let Some(answer) = lines.next_line().await? else {
        return Ok(RequestPermissionOutcome::Cancelled);
    };
    let picked = answer
        .trim()
        .parse::<usize>()
        .ok()
        .and_then(|n| n.checked_sub(1))
        .and_then(|n| request.options.get(n));
    Ok(match picked {
        Some(option) => RequestPermissionOutcome::Selected {
            option_id: option.option_id.clone(),
        },
        None => RequestPermissionOutcome::Cancelled,
    })
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(err) => {
                warn!(%err, "failed to register SIGTERM handler, using ctrl-c only");
                let _ = ctrl_c.await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(err) = ctrl_c.await {
            error!(%err, "ctrl-c signal handler failed");
        }
    }
}

fn init_tracing(log_format: LogFormat) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr);

    match log_format {
        LogFormat::Text => subscriber
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
        LogFormat::Json => subscriber
            .json()
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
    }

    Ok(())
}

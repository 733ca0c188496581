//! Wire-level contract tests for the shell agent.
//!
//! A raw line-level client talks to `ShellAgent` over an in-memory pipe and
//! checks the exact JSON the agent writes: error codes, id echo, response
//! shapes and `session/update` payloads.

use std::time::Duration;

use serde_json::{json, Value};
use tokio::io::{
    split, AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream, Lines, ReadHalf, WriteHalf,
};

use acp_link::acp::agent::AgentSideConnection;
use acp_link::acp::connection::ConnectionOptions;
use acp_link::bridge::{self, PermissionMode, SessionStore, ShellAgent};
use acp_link::config::AgentConfig;

const WAIT: Duration = Duration::from_secs(5);

struct Wire {
    _agent: AgentSideConnection,
    lines: Lines<BufReader<ReadHalf<DuplexStream>>>,
    writer: WriteHalf<DuplexStream>,
}

impl Wire {
    fn start(mode: PermissionMode) -> Self {
        let config = AgentConfig {
            mode,
            ..AgentConfig::default()
        };
        let runner = bridge::command_runner(&config).expect("valid agent config");
        let (agent_io, client_io) = tokio::io::duplex(64 * 1024);
        let (reader, writer) = split(agent_io);
        let agent = AgentSideConnection::start(reader, writer, ConnectionOptions::default(), move |conn| {
            ShellAgent::new(conn, SessionStore::new(mode), runner)
        });
        let (reader, writer) = split(client_io);
        Self {
            _agent: agent,
            lines: BufReader::new(reader).lines(),
            writer,
        }
    }

    async fn send(&mut self, value: Value) {
        self.writer
            .write_all(format!("{value}\n").as_bytes())
            .await
            .expect("write");
    }

    async fn recv(&mut self) -> Value {
        let line = tokio::time::timeout(WAIT, self.lines.next_line())
            .await
            .expect("timed out waiting for a frame")
            .expect("read")
            .expect("agent closed the stream");
        serde_json::from_str(&line).expect("agent writes valid JSON")
    }

    async fn call(&mut self, id: i64, method: &str, params: Value) -> Value {
        self.send(json!({ "jsonrpc": "2.0", "id": id, "method": method, "params": params }))
            .await;
        self.recv().await
    }

    async fn open_session(&mut self) -> String {
        self.call(1, "initialize", json!({ "protocolVersion": 1 })).await;
        let response = self
            .call(2, "session/new", json!({ "cwd": std::env::temp_dir(), "mcpServers": [] }))
            .await;
        response["result"]["sessionId"]
            .as_str()
            .expect("session id")
            .to_owned()
    }
}

// ── Errors ───────────────────────────────────────────────────────────────────

/// An unknown method is answered with -32601, the same id and the method name.
#[tokio::test]
async fn unknown_method_is_method_not_found() {
    let mut wire = Wire::start(PermissionMode::Yolo);
    let response = wire.call(41, "session/teleport", json!({})).await;

    assert_eq!(response["jsonrpc"], "2.0");
    assert_eq!(response["id"], 41);
    assert_eq!(response["error"]["code"], -32601);
    assert_eq!(response["error"]["data"]["method"], "session/teleport");
    assert!(response.get("result").is_none());
}

/// Extension methods the agent does not implement are also -32601.
#[tokio::test]
async fn unhandled_extension_method_is_method_not_found() {
    let mut wire = Wire::start(PermissionMode::Yolo);
    let response = wire.call(5, "_vendor/ping", json!({})).await;

    assert_eq!(response["error"]["code"], -32601);
    assert_eq!(response["error"]["data"]["method"], "_vendor/ping");
}

/// Params that do not match the method schema are -32602.
#[tokio::test]
async fn mismatched_params_are_invalid_params() {
    let mut wire = Wire::start(PermissionMode::Yolo);
    let response = wire
        .call(3, "session/prompt", json!({ "sessionId": 7, "prompt": "nope" }))
        .await;

    assert_eq!(response["id"], 3);
    assert_eq!(response["error"]["code"], -32602);
}

/// Prompting an unknown session is -32002.
#[tokio::test]
async fn unknown_session_is_resource_not_found() {
    let mut wire = Wire::start(PermissionMode::Yolo);
    wire.open_session().await;
    let response = wire
        .call(
            9,
            "session/prompt",
            json!({ "sessionId": "ghost", "prompt": [{ "type": "text", "text": "ls" }] }),
        )
        .await;

    assert_eq!(response["error"]["code"], -32002);
}

/// Unknown notifications get no reply; the next request is answered
/// normally.
#[tokio::test]
async fn unknown_notification_gets_no_reply() {
    let mut wire = Wire::start(PermissionMode::Yolo);
    wire.send(json!({ "jsonrpc": "2.0", "method": "session/wave", "params": {} }))
        .await;
    wire.send(json!({ "jsonrpc": "2.0", "method": "_vendor/tick" })).await;

    let response = wire.call(8, "initialize", json!({ "protocolVersion": 1 })).await;
    assert_eq!(response["id"], 8, "first frame back must answer the request");
}

// ── Result shapes ────────────────────────────────────────────────────────────

/// `initialize` reports the negotiated version and `loadSession`.
#[tokio::test]
async fn initialize_response_shape() {
    let mut wire = Wire::start(PermissionMode::Yolo);
    let response = wire
        .call(1, "initialize", json!({ "protocolVersion": 1, "clientCapabilities": {} }))
        .await;

    let result = &response["result"];
    assert_eq!(result["protocolVersion"], 1);
    assert_eq!(result["agentCapabilities"]["loadSession"], true);
    assert_eq!(result["authMethods"], json!([]));
}

/// A client newer than the agent is answered with the agent's version.
#[tokio::test]
async fn newer_client_version_is_downgraded() {
    let mut wire = Wire::start(PermissionMode::Yolo);
    let response = wire.call(1, "initialize", json!({ "protocolVersion": 99 })).await;
    assert_eq!(response["result"]["protocolVersion"], 1);
}

/// String ids are echoed unchanged.
#[tokio::test]
async fn string_ids_are_echoed() {
    let mut wire = Wire::start(PermissionMode::Yolo);
    wire.send(json!({ "jsonrpc": "2.0", "id": "init-1", "method": "initialize", "params": { "protocolVersion": 1 } }))
        .await;
    assert_eq!(wire.recv().await["id"], "init-1");
}

// ── session/update payloads ──────────────────────────────────────────────────

/// A yolo turn writes tool_call, tool_call_update and the final chunk as
/// notifications, then the prompt response.
#[tokio::test]
async fn prompt_turn_wire_sequence() {
    let mut wire = Wire::start(PermissionMode::Yolo);
    let session_id = wire.open_session().await;
    wire.send(json!({
        "jsonrpc": "2.0",
        "id": 10,
        "method": "session/prompt",
        "params": { "sessionId": session_id, "prompt": [{ "type": "text", "text": "echo hi" }] },
    }))
    .await;

    let started = wire.recv().await;
    assert_eq!(started["method"], "session/update");
    assert!(started.get("id").is_none());
    assert_eq!(started["params"]["sessionId"], session_id.as_str());
    assert_eq!(
        started["params"]["update"],
        json!({
            "type": "tool_call",
            "toolCallId": "t1",
            "title": "run",
            "status": "started",
            "rawInput": { "cmd": "echo hi" },
        })
    );

    let finished = wire.recv().await;
    assert_eq!(
        finished["params"]["update"],
        json!({
            "type": "tool_call_update",
            "toolCallId": "t1",
            "status": "completed",
            "rawOutput": { "output": "hi\n", "returncode": 0 },
        })
    );

    let chunk = wire.recv().await;
    assert_eq!(
        chunk["params"]["update"],
        json!({ "type": "agent_message_chunk", "text": "Done." })
    );

    let response = wire.recv().await;
    assert_eq!(response["id"], 10);
    assert_eq!(response["result"], json!({ "stopReason": "end_turn" }));
}

/// In confirm mode the agent asks with a request carrying the tool call and
/// the allow/reject options.
#[tokio::test]
async fn permission_request_wire_shape() {
    let mut wire = Wire::start(PermissionMode::Confirm);
    let session_id = wire.open_session().await;
    wire.send(json!({
        "jsonrpc": "2.0",
        "id": 11,
        "method": "session/prompt",
        "params": { "sessionId": session_id, "prompt": [{ "type": "text", "text": "echo ok" }] },
    }))
    .await;

    let (mut ask, mut saw_tool_call) = (None, false);
    while ask.is_none() {
        let frame = wire.recv().await;
        let method = frame["method"].as_str().map(str::to_owned);
        match method.as_deref() {
            Some("session/update") => saw_tool_call = true,
            Some("session/request_permission") => ask = Some(frame),
            other => panic!("unexpected frame {other:?}: {frame}"),
        }
    }
    let ask = ask.expect("permission request");
    assert!(ask["id"].is_i64(), "agent-originated ids are integers");
    let params = &ask["params"];
    assert_eq!(params["sessionId"], session_id.as_str());
    assert_eq!(params["toolCall"]["toolCallId"], "t1");
    assert_eq!(params["toolCall"]["rawInput"], json!({ "cmd": "echo ok" }));
    let option_ids: Vec<&str> = params["options"]
        .as_array()
        .expect("options array")
        .iter()
        .filter_map(|o| o["optionId"].as_str())
        .collect();
    assert_eq!(option_ids, ["allow-once", "reject-once"]);

    wire.send(json!({
        "jsonrpc": "2.0",
        "id": ask["id"],
        "result": { "outcome": { "outcome": "cancelled" } },
    }))
    .await;

    loop {
        let frame = wire.recv().await;
        if frame.get("method").is_some() {
            saw_tool_call = true;
            continue;
        }
        assert_eq!(frame["id"], 11);
        assert_eq!(frame["result"]["stopReason"], "end_turn");
        break;
    }
    assert!(saw_tool_call);
}

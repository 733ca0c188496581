//! Unit tests for the session update model: wire shapes and tool-call
//! sequencing.

use serde_json::{json, Value};
use tokio::io::{split, AsyncBufReadExt, BufReader};

use acp_link::acp::connection::{Connection, ConnectionOptions, HandlerFuture, MessageHandler};
use acp_link::acp::message::RpcError;
use acp_link::acp::update::{
    PlanStep, PlanStepStatus, SessionNotification, SessionUpdate, ToolCallStatus, ToolCallTracker,
    UpdateEmitter,
};
use acp_link::AppError;

fn assert_sequence_error(result: acp_link::Result<()>) {
    assert!(
        matches!(result, Err(AppError::Sequence(_))),
        "expected AppError::Sequence, got: {result:?}"
    );
}

fn start(tracker: &mut ToolCallTracker, id: &str) {
    tracker
        .apply("s1", &SessionUpdate::tool_call(id, "run", json!({ "cmd": "ls" })))
        .expect("start must succeed");
}

fn finish(tracker: &mut ToolCallTracker, id: &str, status: ToolCallStatus) -> acp_link::Result<()> {
    tracker.apply("s1", &SessionUpdate::tool_call_update(id, status, Value::Null))
}

// ── Sequencing ───────────────────────────────────────────────────────────────

/// An update for an id that was never started is rejected.
#[test]
fn update_for_unknown_tool_call_is_rejected() {
    let mut tracker = ToolCallTracker::default();
    assert_sequence_error(finish(&mut tracker, "t9", ToolCallStatus::Completed));
}

/// Starting an id that is still open is rejected.
#[test]
fn duplicate_start_is_rejected() {
    let mut tracker = ToolCallTracker::default();
    start(&mut tracker, "t1");
    assert_sequence_error(
        tracker.apply("s1", &SessionUpdate::tool_call("t1", "run", json!({}))),
    );
}

/// A terminal update closes the id; a second terminal update is rejected.
#[test]
fn exactly_one_terminal_update_per_call() {
    let mut tracker = ToolCallTracker::default();
    start(&mut tracker, "t1");

    finish(&mut tracker, "t1", ToolCallStatus::Failed).expect("first terminal update");
    assert!(!tracker.is_open("s1", "t1"));
    assert_sequence_error(finish(&mut tracker, "t1", ToolCallStatus::Completed));
}

/// After its terminal update, the id may be started again.
#[test]
fn closed_id_can_be_restarted() {
    let mut tracker = ToolCallTracker::default();
    start(&mut tracker, "t1");
    finish(&mut tracker, "t1", ToolCallStatus::Cancelled).expect("terminal update");

    start(&mut tracker, "t1");
    assert!(tracker.is_open("s1", "t1"));
}

/// A tool call cannot be announced already finished.
#[test]
fn terminal_status_on_start_is_rejected() {
    let mut tracker = ToolCallTracker::default();
    let update = SessionUpdate::ToolCall {
        tool_call_id: "t1".into(),
        title: "run".into(),
        status: ToolCallStatus::Completed,
        raw_input: Value::Null,
    };
    assert_sequence_error(tracker.apply("s1", &update));
    assert!(!tracker.is_open("s1", "t1"), "a rejected start leaves no state");
}

/// `started` is only valid on the announcing `tool_call`.
#[test]
fn started_status_on_update_is_rejected() {
    let mut tracker = ToolCallTracker::default();
    start(&mut tracker, "t1");
    assert_sequence_error(finish(&mut tracker, "t1", ToolCallStatus::Started));
    assert!(tracker.is_open("s1", "t1"));
}

/// Message, thought, plan and diff updates carry no sequencing constraints.
#[test]
fn non_tool_updates_always_pass() {
    let mut tracker = ToolCallTracker::default();
    for update in [
        SessionUpdate::message_chunk("hi"),
        SessionUpdate::thought_chunk("hmm"),
        SessionUpdate::Plan { steps: Vec::new() },
        SessionUpdate::diff("a.txt", None, "new"),
    ] {
        tracker.apply("s1", &update).expect("always accepted");
    }
}

/// Forgetting a session releases its open ids.
#[test]
fn forget_session_releases_open_ids() {
    let mut tracker = ToolCallTracker::default();
    start(&mut tracker, "t1");
    tracker.forget_session("s1");

    assert!(!tracker.is_open("s1", "t1"));
    start(&mut tracker, "t1");
}

// ── Wire shapes ──────────────────────────────────────────────────────────────

/// `tool_call` serializes with a `type` tag and camelCase fields.
#[test]
fn tool_call_wire_shape() {
    let value = serde_json::to_value(SessionNotification {
        session_id: "s1".into(),
        update: SessionUpdate::tool_call("t1", "run", json!({ "cmd": "echo hi" })),
    })
    .expect("serialize");

    assert_eq!(
        value,
        json!({
            "sessionId": "s1",
            "update": {
                "type": "tool_call",
                "toolCallId": "t1",
                "title": "run",
                "status": "started",
                "rawInput": { "cmd": "echo hi" },
            },
        })
    );
}

/// `tool_call_update` omits a null `rawOutput`.
#[test]
fn tool_call_update_omits_null_output() {
    let value = serde_json::to_value(SessionUpdate::tool_call_update(
        "t1",
        ToolCallStatus::InProgress,
        Value::Null,
    ))
    .expect("serialize");

    assert_eq!(
        value,
        json!({ "type": "tool_call_update", "toolCallId": "t1", "status": "in_progress" })
    );
}

/// Message chunks and plans use their snake_case tags.
#[test]
fn chunk_and_plan_wire_shapes() {
    assert_eq!(
        serde_json::to_value(SessionUpdate::message_chunk("Done.")).expect("serialize"),
        json!({ "type": "agent_message_chunk", "text": "Done." })
    );

    let plan = SessionUpdate::Plan {
        steps: vec![PlanStep {
            content: "list files".into(),
            status: PlanStepStatus::InProgress,
        }],
    };
    assert_eq!(
        serde_json::to_value(plan).expect("serialize"),
        json!({ "type": "plan", "steps": [{ "content": "list files", "status": "in_progress" }] })
    );
}

/// Inbound notifications parse back into the typed model.
#[test]
fn diff_update_parses_from_wire() {
    let parsed: SessionNotification = serde_json::from_value(json!({
        "sessionId": "s1",
        "update": { "type": "diff", "path": "a.txt", "oldText": "a\n", "newText": "b\n" },
    }))
    .expect("parse");

    assert_eq!(parsed.update.kind(), "diff");
    let patch = parsed.update.unified_diff().expect("diff renders a patch");
    assert!(patch.contains("-a"), "patch: {patch}");
    assert!(patch.contains("+b"), "patch: {patch}");
}

/// An unknown update type is a parse error, not a silent default.
#[test]
fn unknown_update_type_fails_to_parse() {
    let parsed = serde_json::from_value::<SessionUpdate>(json!({ "type": "teleport" }));
    assert!(parsed.is_err());
}

// ── Emitter ──────────────────────────────────────────────────────────────────

struct Silent;

impl MessageHandler for Silent {
    fn handle_request(&self, method: String, _params: Value) -> HandlerFuture<'_, Value> {
        Box::pin(async move { Err(AppError::Protocol(RpcError::method_not_found(&method))) })
    }

    fn handle_notification(&self, _method: String, _params: Value) -> HandlerFuture<'_, ()> {
        Box::pin(async { Ok(()) })
    }
}

/// The emitter rejects an empty session id and writes nothing for a
/// sequencing violation; valid updates reach the wire in order.
#[tokio::test]
async fn emitter_validates_before_writing() {
    let (ours, theirs) = tokio::io::duplex(16 * 1024);
    let (reader, writer) = split(ours);
    let conn = Connection::start(reader, writer, ConnectionOptions::default(), |_| Silent);
    let emitter = UpdateEmitter::new(conn.clone());

    let empty = emitter.emit("", SessionUpdate::message_chunk("x")).await;
    assert!(
        matches!(empty, Err(AppError::Protocol(ref e)) if e.code == RpcError::INVALID_PARAMS),
        "got: {empty:?}"
    );

    let stray = emitter
        .emit(
            "s1",
            SessionUpdate::tool_call_update("t1", ToolCallStatus::Completed, Value::Null),
        )
        .await;
    assert!(matches!(stray, Err(AppError::Sequence(_))), "got: {stray:?}");

    emitter
        .emit("s1", SessionUpdate::message_chunk("first"))
        .await
        .expect("emit");
    emitter
        .emit("s1", SessionUpdate::message_chunk("second"))
        .await
        .expect("emit");

    let (peer_reader, _peer_writer) = split(theirs);
    let mut lines = BufReader::new(peer_reader).lines();
    for expected in ["first", "second"] {
        let line = lines
            .next_line()
            .await
            .expect("read")
            .expect("a frame was written");
        let frame: Value = serde_json::from_str(&line).expect("json");
        assert_eq!(frame["method"], "session/update");
        assert!(frame.get("id").is_none(), "updates are notifications");
        assert_eq!(frame["params"]["update"]["text"], expected);
    }
}

/// After the connection is closed, emitting is a silent no-op.
#[tokio::test]
async fn emit_after_close_is_dropped_silently() {
    let (ours, _theirs) = tokio::io::duplex(1024);
    let (reader, writer) = split(ours);
    let conn = Connection::start(reader, writer, ConnectionOptions::default(), |_| Silent);
    conn.close().await;

    UpdateEmitter::new(conn)
        .emit("s1", SessionUpdate::message_chunk("late"))
        .await
        .expect("closed connection drops updates without error");
}

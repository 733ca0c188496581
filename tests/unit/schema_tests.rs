//! Unit tests for ACP method parameter and result shapes.

use serde_json::json;

use acp_link::acp::methods::{AgentMethod, ClientMethod};
use acp_link::acp::schema::{
    ContentBlock, InitializeRequest, InitializeResponse, PromptRequest, PromptResponse,
    RequestPermissionOutcome, RequestPermissionResponse, StopReason,
};

#[test]
fn initialize_request_is_camel_case() {
    let parsed: InitializeRequest = serde_json::from_value(json!({
        "protocolVersion": 1,
        "clientCapabilities": { "fs": { "readTextFile": true } },
    }))
    .expect("parse");

    assert_eq!(parsed.protocol_version, 1);
    assert!(parsed.client_capabilities.fs.read_text_file);
    assert!(!parsed.client_capabilities.fs.write_text_file);
}

/// Capabilities default to "nothing offered" when omitted.
#[test]
fn initialize_response_defaults_missing_capabilities() {
    let parsed: InitializeResponse =
        serde_json::from_value(json!({ "protocolVersion": 1 })).expect("parse");

    assert!(!parsed.agent_capabilities.load_session);
    assert!(parsed.auth_methods.is_empty());
}

#[test]
fn prompt_text_joins_text_blocks_only() {
    let request = PromptRequest {
        session_id: "s1".into(),
        prompt: vec![
            ContentBlock::text("ls"),
            ContentBlock::ResourceLink {
                uri: "file:///tmp/a".into(),
                name: "a".into(),
            },
            ContentBlock::text("pwd"),
        ],
    };
    assert_eq!(request.task_text(), "ls\npwd");
}

#[test]
fn prompt_request_wire_shape() {
    let value = serde_json::to_value(PromptRequest::text("s1", "echo hi")).expect("serialize");
    assert_eq!(
        value,
        json!({ "sessionId": "s1", "prompt": [{ "type": "text", "text": "echo hi" }] })
    );
}

#[test]
fn stop_reasons_are_snake_case() {
    assert_eq!(
        serde_json::to_value(PromptResponse {
            stop_reason: StopReason::EndTurn
        })
        .expect("serialize"),
        json!({ "stopReason": "end_turn" })
    );
    assert_eq!(
        serde_json::to_value(StopReason::MaxTurnRequests).expect("serialize"),
        json!("max_turn_requests")
    );
}

/// The permission outcome is tagged by `outcome`.
#[test]
fn permission_outcome_is_tagged() {
    let selected = RequestPermissionResponse {
        outcome: RequestPermissionOutcome::Selected {
            option_id: "allow-once".into(),
        },
    };
    assert_eq!(
        serde_json::to_value(&selected).expect("serialize"),
        json!({ "outcome": { "outcome": "selected", "optionId": "allow-once" } })
    );

    let cancelled: RequestPermissionResponse =
        serde_json::from_value(json!({ "outcome": { "outcome": "cancelled" } })).expect("parse");
    assert_eq!(cancelled.outcome, RequestPermissionOutcome::Cancelled);
}

/// Exactly one method per role travels as a notification.
#[test]
fn notification_methods_are_cancel_and_update() {
    let agent: Vec<_> = AgentMethod::ALL
        .into_iter()
        .filter(|m| m.is_notification())
        .map(AgentMethod::name)
        .collect();
    let client: Vec<_> = ClientMethod::ALL
        .into_iter()
        .filter(|m| m.is_notification())
        .map(ClientMethod::name)
        .collect();

    assert_eq!(agent, ["session/cancel"]);
    assert_eq!(client, ["session/update"]);
}

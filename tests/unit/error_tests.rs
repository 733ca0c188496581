//! Unit tests for `AppError` display format and wire error mapping.

use acp_link::acp::message::RpcError;
use acp_link::AppError;
use serde_json::json;

// ── Display ──────────────────────────────────────────────────────────────────

#[test]
fn display_uses_lowercase_kind_prefix() {
    let cases = [
        (AppError::Config("bad".into()), "config: bad"),
        (AppError::Io("broken pipe".into()), "io: broken pipe"),
        (AppError::Framing("malformed json".into()), "framing: malformed json"),
        (AppError::Sequence("dup".into()), "sequence: dup"),
        (AppError::ConnectionClosed, "connection closed"),
        (AppError::Timeout("initialize".into()), "timeout: initialize"),
        (AppError::Overloaded("256 pending".into()), "overloaded: 256 pending"),
        (AppError::NotFound("session s1".into()), "not found: session s1"),
        (AppError::Unauthorized("login".into()), "unauthorized: login"),
        (AppError::Exec("spawn failed".into()), "exec: spawn failed"),
    ];
    for (err, expected) in cases {
        assert_eq!(err.to_string(), expected);
    }
}

#[test]
fn protocol_display_includes_message_and_code() {
    let err = AppError::Protocol(RpcError::method_not_found("x"));
    assert_eq!(err.to_string(), "protocol: Method not found (-32601)");
}

#[test]
fn error_messages_have_no_trailing_period() {
    let err = AppError::Io("write failed".into());
    assert!(!err.to_string().ends_with('.'));
}

// ── Wire mapping ─────────────────────────────────────────────────────────────

/// Protocol errors are returned to the peer unchanged.
#[test]
fn protocol_error_passes_through() {
    let original = RpcError::invalid_params(Some(json!({ "details": "sessionId" })));
    let mapped = AppError::Protocol(original.clone()).to_rpc_error();
    assert_eq!(mapped, original);
}

/// Unknown resources map to the application `Resource not found` code.
#[test]
fn not_found_maps_to_resource_not_found() {
    let mapped = AppError::NotFound("session s1".into()).to_rpc_error();
    assert_eq!(mapped.code, RpcError::RESOURCE_NOT_FOUND);
    assert_eq!(mapped.data, Some(json!({ "details": "session s1" })));
}

#[test]
fn unauthorized_maps_to_auth_required() {
    let mapped = AppError::Unauthorized("token".into()).to_rpc_error();
    assert_eq!(mapped.code, RpcError::AUTH_REQUIRED);
}

/// Everything else is an internal error carrying the display text.
#[test]
fn other_errors_map_to_internal_error() {
    for err in [
        AppError::Exec("boom".into()),
        AppError::Sequence("dup".into()),
        AppError::Timeout("slow".into()),
    ] {
        let text = err.to_string();
        let mapped = err.to_rpc_error();
        assert_eq!(mapped.code, RpcError::INTERNAL_ERROR);
        assert_eq!(mapped.data, Some(json!({ "details": text })));
    }
}

// ── Conversions ──────────────────────────────────────────────────────────────

#[test]
fn io_error_converts_to_io_variant() {
    let err: AppError = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe gone").into();
    assert!(matches!(err, AppError::Io(ref msg) if msg.contains("pipe gone")));
}

#[test]
fn json_error_converts_to_framing_variant() {
    let raw = serde_json::from_str::<serde_json::Value>("{").expect_err("invalid json");
    let err: AppError = raw.into();
    assert!(err.to_string().starts_with("framing: json:"));
}

#[test]
fn toml_error_converts_to_config_variant() {
    let raw = toml::from_str::<toml::Value>("= nope").expect_err("invalid toml");
    let err: AppError = raw.into();
    assert!(err.to_string().starts_with("config: invalid config:"));
}

//! Unit tests for configuration parsing, validation, and environment
//! overrides.

use std::time::Duration;

use serial_test::serial;

use acp_link::acp::codec::MAX_LINE_BYTES;
use acp_link::bridge::PermissionMode;
use acp_link::config::{GlobalConfig, ENV_MODE, ENV_WHITELIST};
use acp_link::AppError;

fn sample_toml() -> &'static str {
    r#"
[connection]
max_line_bytes = 65536
max_pending_requests = 8
request_timeout_seconds = 30
dispatch_queue_depth = 32

[agent]
mode = "yolo"
whitelist_actions = ["^ls", "^git status"]
command_timeout_seconds = 10
shell = "bash"
"#
}

fn config_error(result: acp_link::Result<GlobalConfig>) -> String {
    match result {
        Err(AppError::Config(msg)) => msg,
        other => panic!("expected AppError::Config, got: {other:?}"),
    }
}

// ── Parsing ──────────────────────────────────────────────────────────────────

#[test]
fn parses_full_config() {
    let config = GlobalConfig::from_toml_str(sample_toml()).expect("valid config");

    assert_eq!(config.connection.max_line_bytes, 65536);
    assert_eq!(config.connection.max_pending_requests, 8);
    assert_eq!(config.agent.mode, PermissionMode::Yolo);
    assert_eq!(config.agent.whitelist_actions, vec!["^ls", "^git status"]);
    assert_eq!(config.agent.command_timeout_seconds, 10);
    assert_eq!(config.agent.shell, "bash");
}

/// An empty file is valid and yields the defaults.
#[test]
fn empty_config_uses_defaults() {
    let config = GlobalConfig::from_toml_str("").expect("empty config is valid");

    assert_eq!(config, GlobalConfig::default());
    assert_eq!(config.connection.max_line_bytes, MAX_LINE_BYTES);
    assert_eq!(config.connection.max_pending_requests, 256);
    assert_eq!(config.connection.request_timeout_seconds, 0);
    assert_eq!(config.agent.mode, PermissionMode::Confirm);
    assert!(config.agent.whitelist_actions.is_empty());
    assert_eq!(config.agent.command_timeout_seconds, 120);
    assert_eq!(config.agent.shell, "sh");
}

#[test]
fn options_convert_timeout_seconds() {
    let config = GlobalConfig::from_toml_str(sample_toml()).expect("valid config");
    let options = config.connection.options();

    assert_eq!(options.max_line_bytes, 65536);
    assert_eq!(options.max_pending_requests, 8);
    assert_eq!(options.request_timeout, Some(Duration::from_secs(30)));
    assert_eq!(options.dispatch_queue_depth, 32);
}

/// A zero request timeout means "wait indefinitely".
#[test]
fn zero_request_timeout_disables_deadline() {
    let config = GlobalConfig::default();
    assert_eq!(config.connection.options().request_timeout, None);
}

// ── Validation ───────────────────────────────────────────────────────────────

#[test]
fn zero_limits_are_rejected() {
    for (section, key) in [
        ("connection", "max_line_bytes"),
        ("connection", "max_pending_requests"),
        ("connection", "dispatch_queue_depth"),
        ("agent", "command_timeout_seconds"),
    ] {
        let raw = format!("[{section}]\n{key} = 0\n");
        let msg = config_error(GlobalConfig::from_toml_str(&raw));
        assert!(msg.contains(key), "error for {key} must name it, got: {msg}");
    }
}

#[test]
fn empty_shell_is_rejected() {
    let msg = config_error(GlobalConfig::from_toml_str("[agent]\nshell = \"  \"\n"));
    assert!(msg.contains("agent.shell"), "got: {msg}");
}

#[test]
fn invalid_whitelist_pattern_is_rejected() {
    let msg = config_error(GlobalConfig::from_toml_str(
        "[agent]\nwhitelist_actions = [\"(unclosed\"]\n",
    ));
    assert!(msg.contains("(unclosed"), "error must name the pattern, got: {msg}");
}

#[test]
fn unknown_mode_is_rejected() {
    let result = GlobalConfig::from_toml_str("[agent]\nmode = \"human\"\n");
    assert!(matches!(result, Err(AppError::Config(_))), "got: {result:?}");
}

#[test]
fn malformed_toml_is_rejected() {
    let result = GlobalConfig::from_toml_str("[connection\nmax_line_bytes = 1");
    assert!(matches!(result, Err(AppError::Config(_))), "got: {result:?}");
}

// ── Loading from disk ────────────────────────────────────────────────────────

#[test]
fn load_from_path_reads_file() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("config.toml");
    std::fs::write(&path, sample_toml()).expect("write config");

    let config = GlobalConfig::load_from_path(&path).expect("load");
    assert_eq!(config.agent.shell, "bash");
}

#[test]
fn load_from_missing_path_is_config_error() {
    let dir = tempfile::tempdir().expect("tempdir");
    let msg = config_error(GlobalConfig::load_from_path(dir.path().join("absent.toml")));
    assert!(msg.contains("failed to read config"), "got: {msg}");
}

// ── Environment overrides ────────────────────────────────────────────────────

/// Removes the override variables when dropped.
struct EnvGuard;

impl Drop for EnvGuard {
    fn drop(&mut self) {
        std::env::remove_var(ENV_MODE);
        std::env::remove_var(ENV_WHITELIST);
    }
}

#[test]
#[serial]
fn env_overrides_mode_and_whitelist() {
    let _guard = EnvGuard;
    std::env::set_var(ENV_MODE, "YOLO");
    std::env::set_var(ENV_WHITELIST, r#"["^echo ", "^pwd$"]"#);

    let mut config = GlobalConfig::default();
    config.apply_env_overrides().expect("overrides apply");

    assert_eq!(config.agent.mode, PermissionMode::Yolo);
    assert_eq!(config.agent.whitelist_actions, vec!["^echo ", "^pwd$"]);
}

#[test]
#[serial]
fn env_whitelist_must_be_json_array() {
    let _guard = EnvGuard;
    std::env::set_var(ENV_WHITELIST, "^ls,^pwd");

    let mut config = GlobalConfig::default();
    let err = config.apply_env_overrides().expect_err("non-JSON whitelist");
    assert!(
        matches!(err, AppError::Config(ref msg) if msg.contains(ENV_WHITELIST)),
        "got: {err:?}"
    );
}

#[test]
#[serial]
fn env_override_with_unknown_mode_fails() {
    let _guard = EnvGuard;
    std::env::set_var(ENV_MODE, "sometimes");

    let mut config = GlobalConfig::default();
    assert!(matches!(config.apply_env_overrides(), Err(AppError::Config(_))));
}

#[test]
#[serial]
fn no_env_leaves_config_untouched() {
    let _guard = EnvGuard;
    std::env::remove_var(ENV_MODE);
    std::env::remove_var(ENV_WHITELIST);

    let mut config = GlobalConfig::from_toml_str(sample_toml()).expect("valid config");
    let before = config.clone();
    config.apply_env_overrides().expect("no-op");
    assert_eq!(config, before);
}

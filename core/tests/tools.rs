#![cfg(unix)]
#![expect(clippy::expect_used)]

use std::time::Duration;

use maplit::btreemap;
use mcpshell_core::ToolDefinition;
use mcpshell_core::ToolErr;
use mcpshell_core::ToolHandler;
use mcpshell_core::ToolRegistry;
use mcpshell_core::ToolsConfig;
use mcpshell_core::config::OutputConfig;
use mcpshell_core::config::RunConfig;
use mcpshell_core::params::Args;
use mcpshell_core::params::ParamSpec;
use pretty_assertions::assert_eq;
use serde_json::Value;
use serde_json::json;
use tokio_util::sync::CancellationToken;

const TOOLS: &str = r#"
shell = "/bin/sh"

[[tools]]
name = "hello"
description = "Say hello"
constraints = ["name.size() <= 20", "!name.contains(';')"]

[tools.params.name]
type = "string"
description = "Who to greet"
required = true

[tools.run]
command = "echo 'Hello, {{ .name }}'"

[tools.output]
prefix = "Greeting for {{ .name }}:"

[[tools]]
name = "count"
description = "Count to n"
constraints = ["n > 0.0 && n <= 5.0"]

[tools.params.n]
type = "number"
default = 3

[tools.run]
command = "for i in $(seq 1 {{ .n }}); do\n  echo $i\ndone"
use_tmpfile = true
"#;

fn args(value: Value) -> Args {
    match value {
        Value::Object(map) => map,
        _ => Args::new(),
    }
}

async fn registry() -> ToolRegistry {
    let config = ToolsConfig::from_toml_str(TOOLS).expect("config should parse");
    ToolRegistry::from_config(&config)
        .await
        .expect("tools should activate")
}

#[tokio::test]
async fn greeting_with_prefix() {
    let registry = registry().await;
    let hello = registry.get("hello").expect("hello is registered");
    let output = hello
        .execute(args(json!({"name": "Alice"})), &CancellationToken::new())
        .await
        .expect("call should succeed");
    assert_eq!(output, "Greeting for Alice:\n\nHello, Alice");
}

#[tokio::test]
async fn constraint_failure_blocks_the_command() {
    let registry = registry().await;
    let hello = registry.get("hello").expect("hello is registered");
    let err = hello
        .execute(
            args(json!({"name": "Alice; rm -rf /"})),
            &CancellationToken::new(),
        )
        .await
        .expect_err("call should be rejected");
    match err {
        ToolErr::PolicyRejection(failures) => {
            assert_eq!(failures.len(), 1);
            assert!(failures[0].starts_with("Constraint '!name.contains(';')' failed"));
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn defaults_fill_missing_arguments() {
    let registry = registry().await;
    let count = registry.get("count").expect("count is registered");
    let cancel = CancellationToken::new();

    let output = count
        .execute(Args::new(), &cancel)
        .await
        .expect("call should succeed");
    assert_eq!(output, "1\n2\n3");

    let err = count
        .execute(args(json!({"n": 9})), &cancel)
        .await
        .expect_err("n=9 is out of range");
    assert!(matches!(err, ToolErr::PolicyRejection(_)), "got {err:?}");
}

#[tokio::test]
async fn missing_required_argument() {
    let registry = registry().await;
    let hello = registry.get("hello").expect("hello is registered");
    let err = hello
        .execute(Args::new(), &CancellationToken::new())
        .await
        .expect_err("name is required");
    assert!(matches!(err, ToolErr::MissingArgument(name) if name == "name"));
}

#[tokio::test]
async fn protocol_call_reports_errors_in_the_result() {
    let registry = registry().await;
    let hello = registry.get("hello").expect("hello is registered");
    let cancel = CancellationToken::new();

    let ok = hello
        .handle_call(Some(json!({"name": "Bob"})), &cancel)
        .await;
    assert!(!ok.is_error());
    assert_eq!(ok.text_content(), "Greeting for Bob:\n\nHello, Bob");

    let rejected = hello
        .handle_call(Some(json!({"name": "x".repeat(30)})), &cancel)
        .await;
    assert!(rejected.is_error());
    assert!(
        rejected
            .text_content()
            .contains("command blocked by constraints")
    );

    let malformed = hello.handle_call(Some(json!(["Bob"])), &cancel).await;
    assert!(malformed.is_error());
}

#[tokio::test]
async fn tool_specs_describe_parameters() {
    let registry = registry().await;
    let specs = serde_json::to_value(registry.tool_specs()).expect("specs serialize");
    assert_eq!(
        specs[1],
        json!({
            "name": "hello",
            "description": "Say hello",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "name": {"type": "string", "description": "Who to greet"}
                },
                "required": ["name"]
            }
        })
    );
}

#[tokio::test]
async fn unknown_tool_lookup() {
    let registry = registry().await;
    assert!(matches!(
        registry.get("nope"),
        Err(ToolErr::UnknownTool(name)) if name == "nope"
    ));
}

fn env_tool() -> ToolDefinition {
    ToolDefinition {
        name: "env".to_string(),
        params: btreemap! {
            "greeting".to_string() => ParamSpec {
                kind: "string".to_string(),
                required: true,
                ..Default::default()
            },
        },
        run: RunConfig {
            command: "echo \"$GREETING|$MCPSHELL_TEST_PLAIN|$MCPSHELL_TEST_UNSET\"".to_string(),
            env: vec![
                "GREETING={{ .greeting | upper }}".to_string(),
                "MCPSHELL_TEST_PLAIN=plain".to_string(),
                "MCPSHELL_TEST_UNSET".to_string(),
            ],
            timeout: Some(5),
            ..Default::default()
        },
        output: OutputConfig::default(),
        ..Default::default()
    }
}

#[tokio::test]
async fn env_entries_are_rendered_per_call() {
    let handler = ToolHandler::new(env_tool(), Some("/bin/sh".to_string()))
        .await
        .expect("tool should activate");
    let output = handler
        .execute(args(json!({"greeting": "hi"})), &CancellationToken::new())
        .await
        .expect("call should succeed");
    assert_eq!(output, "HI|plain|");
}

#[tokio::test]
async fn tool_timeout_stops_long_commands() {
    let mut tool = env_tool();
    tool.params.clear();
    tool.run.command = "sleep 30".to_string();
    tool.run.timeout = Some(1);
    let handler = ToolHandler::new(tool, Some("/bin/sh".to_string()))
        .await
        .expect("tool should activate");
    let err = handler
        .execute(Args::new(), &CancellationToken::new())
        .await
        .expect_err("should time out");
    assert!(
        matches!(err, ToolErr::Timeout(d) if d == Duration::from_secs(1)),
        "got {err:?}"
    );
}

#[tokio::test]
async fn docker_without_image_fails_activation() {
    let mut tool = env_tool();
    tool.run.runner = "docker".to_string();
    let result = ToolHandler::new(tool, None).await;
    assert!(matches!(result, Err(ToolErr::Config(_))));
}

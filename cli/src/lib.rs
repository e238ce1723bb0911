mod cli;

use std::sync::Arc;

use anyhow::Context;
pub use cli::Cli;
pub use cli::Command;
pub use cli::ExeCommand;
pub use cli::ToolsFile;
use mcpshell_core::ToolRegistry;
use mcpshell_core::ToolsConfig;
use mcpshell_core::error::get_error_message_ui;
use mcpshell_core::params::Args;
use mcpshell_core::params::ParamSchema;
use mcpshell_core::protocol::ToolSpec;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

pub async fn run_main(cli: Cli) -> anyhow::Result<()> {
    let default_level = if cli.verbose { "debug" } else { "error" };
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .try_init();

    match cli.command {
        Command::Exe(exe) => run_exe(exe).await,
        Command::Validate(ToolsFile { tools }) => {
            let config = ToolsConfig::load_from_path(&tools)?;
            let registry = ToolRegistry::from_config(&config).await?;
            println!("{} tool(s) OK", registry.len());
            Ok(())
        }
        Command::List(ToolsFile { tools }) => {
            let config = ToolsConfig::load_from_path(&tools)?;
            let specs: Vec<ToolSpec> = config.tools.iter().map(ToolSpec::from_definition).collect();
            println!("{}", serde_json::to_string_pretty(&specs)?);
            Ok(())
        }
    }
}

async fn run_exe(exe: ExeCommand) -> anyhow::Result<()> {
    let ExeCommand {
        tools_file,
        options,
        tool,
        args,
    } = exe;

    let config = ToolsConfig::load_from_path(&tools_file.tools)?;
    let definition = config
        .tools
        .iter()
        .find(|t| t.name == tool)
        .with_context(|| format!("unknown tool: {tool}"))?;

    let mut call_args = parse_key_values(&args, &definition.params)?;
    if let Some(options) = options {
        let options: Value =
            serde_json::from_str(&options).context("--options must be a JSON object")?;
        call_args.insert("options".to_string(), options);
    }
    let handler = mcpshell_core::ToolHandler::new(definition.clone(), config.shell_for(definition))
        .await
        .with_context(|| format!("failed to activate tool {tool}"))?;
    tracing::debug!("running {} with the {} runner", handler.name(), handler.runner_type());
    let handler = Arc::new(handler);

    let cancel = CancellationToken::new();
    let ctrl_c_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("interrupted, cancelling");
            ctrl_c_cancel.cancel();
        }
    });

    // Run the call on its own task so a panic is reported rather than
    // unwinding through main.
    let task_cancel = cancel.clone();
    let result = tokio::spawn(async move { handler.execute(call_args, &task_cancel).await })
        .await
        .context("tool execution panicked")?;

    match result {
        Ok(output) => {
            println!("{output}");
            Ok(())
        }
        Err(e) => anyhow::bail!("{}", get_error_message_ui(&e)),
    }
}

/// Parses `key=value` pairs. Declared parameters are converted to their
/// declared type; undeclared keys keep their JSON type when they parse as
/// JSON and are strings otherwise.
pub fn parse_key_values(pairs: &[String], schema: &ParamSchema) -> anyhow::Result<Args> {
    let mut args = Args::new();
    for pair in pairs {
        let (key, raw) = pair
            .split_once('=')
            .with_context(|| format!("expected KEY=VALUE, got {pair:?}"))?;
        if key.is_empty() {
            anyhow::bail!("empty argument name in {pair:?}");
        }
        let declared = schema.get(key).and_then(|spec| spec.param_type());
        let value = match declared {
            Some(param_type) => param_type
                .parse_text(raw)
                .map_err(|e| anyhow::anyhow!("argument {key}: {e}"))?,
            None => serde_json::from_str::<Value>(raw)
                .unwrap_or_else(|_| Value::String(raw.to_string())),
        };
        args.insert(key.to_string(), value);
    }
    Ok(args)
}

#[cfg(test)]
mod tests {
    use super::*;
    use mcpshell_core::params::ParamSpec;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn schema() -> ParamSchema {
        let spec = |kind: &str| ParamSpec {
            kind: kind.to_string(),
            ..Default::default()
        };
        let mut schema = ParamSchema::new();
        schema.insert("file".to_string(), spec("string"));
        schema.insert("count".to_string(), spec("number"));
        schema.insert("loud".to_string(), spec("boolean"));
        schema
    }

    fn pairs(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn declared_parameters_use_their_type() -> anyhow::Result<()> {
        let args = parse_key_values(
            &pairs(&["file=2024", "count=3", "loud=true", "expr=a=b"]),
            &schema(),
        )?;
        assert_eq!(
            Value::Object(args),
            json!({"file": "2024", "count": 3, "loud": true, "expr": "a=b"})
        );

        let args = parse_key_values(&pairs(&["file=null", "extra=null"]), &schema())?;
        assert_eq!(Value::Object(args), json!({"file": "null", "extra": null}));
        Ok(())
    }

    #[test]
    fn undeclared_values_keep_json_types() -> anyhow::Result<()> {
        let args = parse_key_values(&pairs(&["n=3", "flag=false", "empty="]), &ParamSchema::new())?;
        assert_eq!(Value::Object(args), json!({"n": 3, "flag": false, "empty": ""}));
        Ok(())
    }

    #[test]
    fn mistyped_values_are_rejected() {
        assert!(parse_key_values(&pairs(&["count=many"]), &schema()).is_err());
        assert!(parse_key_values(&pairs(&["loud=yes"]), &schema()).is_err());
    }

    #[test]
    fn pairs_need_an_equals_sign() {
        assert!(parse_key_values(&pairs(&["name"]), &schema()).is_err());
        assert!(parse_key_values(&pairs(&["=x"]), &schema()).is_err());
    }
}

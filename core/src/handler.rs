//! One activated tool: compiled policy plus a ready runner.

use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::warn;

use crate::config::ToolDefinition;
use crate::constraints::CompiledPolicy;
use crate::error::Result;
use crate::error::ToolErr;
use crate::error::get_error_message_ui;
use crate::exec::RunParams;
use crate::exec_env::resolve_env;
use crate::params::Args;
use crate::params::apply_defaults;
use crate::protocol::CallToolResult;
use crate::protocol::ToolSpec;
use crate::runner::Runner;
use crate::runner::RunnerOptions;
use crate::runner::RunnerType;
use crate::runner::merge_options;
use crate::template;

/// Argument key carrying a per-call runner options override.
const OPTIONS_ARG: &str = "options";

#[derive(Debug)]
pub struct ToolHandler {
    definition: ToolDefinition,
    shell: Option<String>,
    policy: CompiledPolicy,
    runner_type: RunnerType,
    runner: Runner,
}

impl ToolHandler {
    /// Activates `definition`: compiles its constraints, builds its runner
    /// and verifies the runner can work on this host.
    pub async fn new(definition: ToolDefinition, shell: Option<String>) -> Result<Self> {
        let handler = Self::build(definition, shell)?;
        handler.runner.check_requirements().await?;
        info!(
            "activated tool {} ({} runner, {} constraint(s))",
            handler.definition.name,
            handler.runner_type,
            handler.definition.constraints.len()
        );
        Ok(handler)
    }

    fn build(definition: ToolDefinition, shell: Option<String>) -> Result<Self> {
        let policy = CompiledPolicy::compile(&definition.constraints, &definition.params)?;
        let runner_type: RunnerType = definition.run.runner.parse()?;
        let runner = Runner::new(runner_type, &definition.run.options)?;
        Ok(Self {
            definition,
            shell,
            policy,
            runner_type,
            runner,
        })
    }

    pub fn name(&self) -> &str {
        &self.definition.name
    }

    pub fn definition(&self) -> &ToolDefinition {
        &self.definition
    }

    pub fn runner_type(&self) -> RunnerType {
        self.runner_type
    }

    pub fn spec(&self) -> ToolSpec {
        ToolSpec::from_definition(&self.definition)
    }

    /// Protocol entry point. Failures are reported in the result payload.
    pub async fn handle_call(
        &self,
        arguments: Option<Value>,
        cancel: &CancellationToken,
    ) -> CallToolResult {
        let args = match arguments {
            None | Some(Value::Null) => Args::new(),
            Some(Value::Object(map)) => map,
            Some(other) => {
                return CallToolResult::error(format!(
                    "arguments must be an object, got {other}"
                ));
            }
        };
        match self.execute(args, cancel).await {
            Ok(output) => CallToolResult::text(output),
            Err(e) if e.is_activation_error() => {
                error!("tool {} could not run: {e}", self.definition.name);
                CallToolResult::error(get_error_message_ui(&e))
            }
            Err(e) => {
                warn!("tool {} failed: {e}", self.definition.name);
                CallToolResult::error(get_error_message_ui(&e))
            }
        }
    }

    /// Runs one call: validate, render, run, then post-process the output.
    pub async fn execute(&self, mut args: Args, cancel: &CancellationToken) -> Result<String> {
        if cancel.is_cancelled() {
            return Err(ToolErr::Cancelled);
        }
        let overrides = self.take_options_override(&mut args)?;

        apply_defaults(&self.definition.params, &mut args);
        for (name, spec) in &self.definition.params {
            let present = !matches!(args.get(name), None | Some(Value::Null));
            if spec.required && !present {
                return Err(ToolErr::MissingArgument(name.clone()));
            }
        }

        let verdict = self.policy.evaluate(&args)?;
        if !verdict.allowed {
            info!(
                "tool {} blocked by {} constraint(s)",
                self.definition.name,
                verdict.failures.len()
            );
            return Err(ToolErr::PolicyRejection(verdict.failures));
        }

        let command = template::render(&self.definition.run.command, &args)?;
        let env = resolve_env(&self.definition.run.env, &args);
        debug!("tool {} rendered command: {command}", self.definition.name);

        let call_runner;
        let runner = match overrides {
            Some(overrides) => {
                let merged = merge_options(&self.definition.run.options, Some(&overrides));
                call_runner = Runner::new(self.runner_type, &merged)?;
                &call_runner
            }
            None => &self.runner,
        };
        // The host may have changed since activation.
        runner.check_requirements().await?;

        let params = RunParams {
            shell: self.shell.clone(),
            command,
            env,
            params: args,
            use_tmpfile: self.definition.run.use_tmpfile,
            timeout: self.definition.run.timeout_duration(),
        };
        let output = runner.run(cancel, &params).await?;
        self.post_process(&output, &params.params)
    }

    /// Removes the `options` argument, unless the tool declares a parameter
    /// with that name.
    fn take_options_override(&self, args: &mut Args) -> Result<Option<RunnerOptions>> {
        if self.definition.params.contains_key(OPTIONS_ARG) {
            return Ok(None);
        }
        match args.remove(OPTIONS_ARG) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::Object(map)) => Ok(Some(map)),
            Some(other) => Err(ToolErr::InvalidArguments(format!(
                "'{OPTIONS_ARG}' must be an object, got {other}"
            ))),
        }
    }

    fn post_process(&self, output: &str, args: &Args) -> Result<String> {
        let output = output.trim();
        let prefix = &self.definition.output.prefix;
        if prefix.trim().is_empty() {
            return Ok(output.to_string());
        }
        let prefix = template::render(prefix, args)?;
        Ok(format!("{}\n\n{output}", prefix.trim()).trim().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OutputConfig;
    use crate::config::RunConfig;
    use crate::params::ParamSpec;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn args(value: Value) -> Args {
        match value {
            Value::Object(map) => map,
            _ => Args::new(),
        }
    }

    fn definition(command: &str, constraints: &[&str]) -> ToolDefinition {
        let mut tool = ToolDefinition {
            name: "greet".to_string(),
            description: "Greets".to_string(),
            constraints: constraints.iter().map(|s| s.to_string()).collect(),
            run: RunConfig {
                command: command.to_string(),
                ..Default::default()
            },
            ..Default::default()
        };
        tool.params.insert(
            "name".to_string(),
            ParamSpec {
                kind: "string".to_string(),
                required: true,
                ..Default::default()
            },
        );
        tool
    }

    #[tokio::test]
    async fn unknown_runner_type_fails_activation() {
        let mut tool = definition("true", &[]);
        tool.run.runner = "chroot".to_string();
        let result = ToolHandler::new(tool, None).await;
        assert!(matches!(result, Err(ToolErr::Config(_))));
    }

    #[tokio::test]
    async fn bad_constraint_fails_activation() {
        let tool = definition("true", &["nobody == 'x'"]);
        let result = ToolHandler::new(tool, None).await;
        assert!(matches!(result, Err(ToolErr::Compile { .. })));
    }

    #[tokio::test]
    async fn rejection_lists_the_failing_expression() -> Result<()> {
        let handler = ToolHandler::new(definition("true", &["name.size() <= 5"]), None).await?;
        let result = handler
            .execute(args(json!({"name": "Elizabeth"})), &CancellationToken::new())
            .await;
        match result {
            Err(ToolErr::PolicyRejection(failures)) => {
                assert_eq!(failures.len(), 1);
                assert!(failures[0].contains("name.size() <= 5"));
            }
            other => panic!("expected a rejection, got {other:?}"),
        }
        Ok(())
    }

    #[tokio::test]
    async fn missing_required_argument() -> Result<()> {
        let handler = ToolHandler::new(definition("true", &[]), None).await?;
        let result = handler.execute(Args::new(), &CancellationToken::new()).await;
        assert!(matches!(result, Err(ToolErr::MissingArgument(name)) if name == "name"));
        Ok(())
    }

    #[tokio::test]
    async fn cancelled_before_start() -> Result<()> {
        let handler = ToolHandler::new(definition("echo hi", &[]), None).await?;
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = handler.execute(args(json!({"name": "a"})), &cancel).await;
        assert!(matches!(result, Err(ToolErr::Cancelled)));
        Ok(())
    }

    #[tokio::test]
    async fn options_must_be_an_object() -> Result<()> {
        let handler = ToolHandler::new(definition("true", &[]), None).await?;
        let result = handler
            .execute(
                args(json!({"name": "a", "options": "fast"})),
                &CancellationToken::new(),
            )
            .await;
        assert!(matches!(result, Err(ToolErr::InvalidArguments(_))));
        Ok(())
    }

    #[tokio::test]
    async fn override_builds_a_private_runner() -> Result<()> {
        let handler = ToolHandler::new(definition("true", &[]), None).await?;
        let result = handler
            .execute(
                args(json!({"name": "a", "options": {"workdir": 7}})),
                &CancellationToken::new(),
            )
            .await;
        assert!(matches!(result, Err(ToolErr::Config(_))));
        Ok(())
    }

    /// A runner type whose requirements this host never meets.
    fn unavailable_runner() -> &'static str {
        if cfg!(target_os = "macos") {
            "firejail"
        } else {
            "sandbox-exec"
        }
    }

    #[tokio::test]
    async fn requirements_are_checked_on_every_call() -> Result<()> {
        let mut tool = definition("true", &[]);
        tool.run.runner = unavailable_runner().to_string();
        let activation = ToolHandler::new(tool.clone(), None).await;
        assert!(matches!(activation, Err(ToolErr::UnmetRequirement(_))));

        let handler = ToolHandler::build(tool, None)?;
        let result = handler
            .execute(args(json!({"name": "a"})), &CancellationToken::new())
            .await;
        assert!(
            matches!(result, Err(ToolErr::UnmetRequirement(_))),
            "got {result:?}"
        );
        Ok(())
    }

    #[tokio::test]
    async fn prefix_is_separated_by_a_blank_line() -> Result<()> {
        let mut tool = definition("true", &[]);
        tool.output = OutputConfig {
            prefix: "Result for {{ .name }}:".to_string(),
        };
        let handler = ToolHandler::new(tool, None).await?;
        let out = handler.post_process("  hello\n", &args(json!({"name": "bob"})))?;
        assert_eq!(out, "Result for bob:\n\nhello");
        Ok(())
    }

    #[tokio::test]
    async fn handle_call_reports_errors_in_band() -> Result<()> {
        let handler = ToolHandler::new(definition("true", &["name == 'ok'"]), None).await?;
        let result = handler
            .handle_call(Some(json!({"name": "bad"})), &CancellationToken::new())
            .await;
        assert!(result.is_error());
        assert!(
            result
                .text_content()
                .starts_with("command blocked by constraints:")
        );

        let result = handler
            .handle_call(Some(json!(["not", "an", "object"])), &CancellationToken::new())
            .await;
        assert!(result.is_error());
        Ok(())
    }
}

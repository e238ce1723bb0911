//! Selection and construction of the isolation backend for a tool.

use std::fmt;
use std::str::FromStr;

use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::docker::DockerRunner;
use crate::error::Result;
use crate::error::ToolErr;
use crate::exec::ExecRunner;
use crate::exec::RunParams;
use crate::firejail::FirejailRunner;
use crate::seatbelt::SandboxExecRunner;

/// Untyped runner options as written in the tool definition.
pub type RunnerOptions = serde_json::Map<String, Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RunnerType {
    #[default]
    Exec,
    SandboxExec,
    Firejail,
    Docker,
}

impl FromStr for RunnerType {
    type Err = ToolErr;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "" | "exec" => Ok(RunnerType::Exec),
            "sandbox-exec" => Ok(RunnerType::SandboxExec),
            "firejail" => Ok(RunnerType::Firejail),
            "docker" => Ok(RunnerType::Docker),
            other => Err(ToolErr::Config(format!(
                "unknown runner type '{other}', expected one of exec, sandbox-exec, firejail, docker"
            ))),
        }
    }
}

impl fmt::Display for RunnerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RunnerType::Exec => "exec",
            RunnerType::SandboxExec => "sandbox-exec",
            RunnerType::Firejail => "firejail",
            RunnerType::Docker => "docker",
        })
    }
}

/// Returns `base` with every key of `overrides` replacing its counterpart.
pub fn merge_options(base: &RunnerOptions, overrides: Option<&RunnerOptions>) -> RunnerOptions {
    let mut merged = base.clone();
    if let Some(overrides) = overrides {
        for (key, value) in overrides {
            merged.insert(key.clone(), value.clone());
        }
    }
    merged
}

fn typed_options<T: DeserializeOwned>(kind: RunnerType, options: &RunnerOptions) -> Result<T> {
    serde_json::from_value(Value::Object(options.clone()))
        .map_err(|e| ToolErr::Config(format!("invalid {kind} runner options: {e}")))
}

#[derive(Debug, Clone)]
pub enum Runner {
    Exec(ExecRunner),
    SandboxExec(SandboxExecRunner),
    Firejail(FirejailRunner),
    Docker(DockerRunner),
}

impl Runner {
    /// Builds the backend for `kind` from untyped options. Unknown keys are
    /// ignored; malformed or missing required keys are a config error.
    pub fn new(kind: RunnerType, options: &RunnerOptions) -> Result<Self> {
        debug!("creating {kind} runner");
        Ok(match kind {
            RunnerType::Exec => Runner::Exec(ExecRunner::new(typed_options(kind, options)?)),
            RunnerType::SandboxExec => {
                Runner::SandboxExec(SandboxExecRunner::new(typed_options(kind, options)?))
            }
            RunnerType::Firejail => {
                Runner::Firejail(FirejailRunner::new(typed_options(kind, options)?))
            }
            RunnerType::Docker => Runner::Docker(DockerRunner::new(typed_options(kind, options)?)?),
        })
    }

    pub fn kind(&self) -> RunnerType {
        match self {
            Runner::Exec(_) => RunnerType::Exec,
            Runner::SandboxExec(_) => RunnerType::SandboxExec,
            Runner::Firejail(_) => RunnerType::Firejail,
            Runner::Docker(_) => RunnerType::Docker,
        }
    }

    /// Fails with [`ToolErr::UnmetRequirement`] when this host cannot run
    /// the backend.
    pub async fn check_requirements(&self) -> Result<()> {
        match self {
            Runner::Exec(runner) => runner.check_requirements(),
            Runner::SandboxExec(runner) => runner.check_requirements(),
            Runner::Firejail(runner) => runner.check_requirements(),
            Runner::Docker(runner) => runner.check_requirements().await,
        }
    }

    pub async fn run(&self, cancel: &CancellationToken, params: &RunParams) -> Result<String> {
        match self {
            Runner::Exec(runner) => runner.run(cancel, params).await,
            Runner::SandboxExec(runner) => runner.run(cancel, params).await,
            Runner::Firejail(runner) => runner.run(cancel, params).await,
            Runner::Docker(runner) => runner.run(cancel, params).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn options(value: Value) -> RunnerOptions {
        match value {
            Value::Object(map) => map,
            _ => RunnerOptions::new(),
        }
    }

    #[test]
    fn runner_type_names() {
        assert_eq!("".parse::<RunnerType>().ok(), Some(RunnerType::Exec));
        assert_eq!("exec".parse::<RunnerType>().ok(), Some(RunnerType::Exec));
        assert_eq!(
            "sandbox-exec".parse::<RunnerType>().ok(),
            Some(RunnerType::SandboxExec)
        );
        assert_eq!("firejail".parse::<RunnerType>().ok(), Some(RunnerType::Firejail));
        assert_eq!("docker".parse::<RunnerType>().ok(), Some(RunnerType::Docker));
        assert!(matches!(
            "chroot".parse::<RunnerType>(),
            Err(ToolErr::Config(_))
        ));
    }

    #[test]
    fn overrides_replace_keys() {
        let base = options(json!({"image": "alpine", "allow_networking": false}));
        let overrides = options(json!({"allow_networking": true}));
        let merged = merge_options(&base, Some(&overrides));
        assert_eq!(
            Value::Object(merged),
            json!({"image": "alpine", "allow_networking": true})
        );
        assert_eq!(merge_options(&base, None), base);
    }

    #[test]
    fn unknown_option_keys_are_ignored() -> Result<()> {
        let runner = Runner::new(
            RunnerType::SandboxExec,
            &options(json!({"allow_networking": true, "colour": "blue"})),
        )?;
        assert_eq!(runner.kind(), RunnerType::SandboxExec);
        Ok(())
    }

    #[test]
    fn mistyped_options_are_config_errors() {
        let result = Runner::new(
            RunnerType::Firejail,
            &options(json!({"allow_read_folders": "not-a-list"})),
        );
        assert!(matches!(result, Err(ToolErr::Config(_))));
    }

    #[test]
    fn docker_without_image_fails_at_construction() {
        let result = Runner::new(RunnerType::Docker, &RunnerOptions::new());
        assert!(matches!(result, Err(ToolErr::Config(_))));
    }

    #[tokio::test]
    async fn exec_has_no_requirements() -> Result<()> {
        let runner = Runner::new(RunnerType::Exec, &RunnerOptions::new())?;
        runner.check_requirements().await
    }
}

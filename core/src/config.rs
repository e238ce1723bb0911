//! Tool definitions loaded from a TOML file.
//!
//! ```toml
//! [[tools]]
//! name = "hello"
//! description = "Greets someone"
//! constraints = ["name.size() <= 20"]
//!
//! [tools.params.name]
//! type = "string"
//! required = true
//!
//! [tools.run]
//! command = "echo 'Hello, {{ .name }}'"
//! ```

use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use serde::Serialize;

use crate::error::Result;
use crate::error::ToolErr;
use crate::params::ParamSchema;
use crate::runner::RunnerOptions;

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
pub struct ToolsConfig {
    /// Shell used by every tool that does not set its own.
    #[serde(default)]
    pub shell: Option<String>,

    #[serde(default)]
    pub tools: Vec<ToolDefinition>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
pub struct ToolDefinition {
    pub name: String,

    #[serde(default)]
    pub description: String,

    #[serde(default)]
    pub params: ParamSchema,

    /// Policy expressions; all must hold for a call to run.
    #[serde(default)]
    pub constraints: Vec<String>,

    pub run: RunConfig,

    #[serde(default)]
    pub output: OutputConfig,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
pub struct RunConfig {
    /// Command template.
    pub command: String,

    /// `exec` (default), `sandbox-exec`, `firejail` or `docker`.
    #[serde(default)]
    pub runner: String,

    #[serde(default)]
    pub options: RunnerOptions,

    /// `NAME`, `NAME=value` or `NAME={{ template }}` entries.
    #[serde(default)]
    pub env: Vec<String>,

    #[serde(default)]
    pub shell: Option<String>,

    /// Seconds before the command is killed.
    #[serde(default)]
    pub timeout: Option<u64>,

    /// Run shell commands from a temporary script file instead of `-c`.
    #[serde(default)]
    pub use_tmpfile: bool,
}

impl RunConfig {
    pub fn timeout_duration(&self) -> Option<Duration> {
        self.timeout.map(Duration::from_secs)
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
pub struct OutputConfig {
    /// Template prepended to the command output.
    #[serde(default)]
    pub prefix: String,
}

impl ToolsConfig {
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            tracing::error!("Failed to read {}: {e}", path.display());
            e
        })?;
        let config = Self::from_toml_str(&contents)?;
        tracing::info!(
            "loaded {} tool(s) from {}",
            config.tools.len(),
            path.display()
        );
        Ok(config)
    }

    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let config: Self = toml::from_str(contents).map_err(|e| {
            tracing::error!("Failed to parse tools config: {e}");
            e
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Structural checks that do not depend on the host.
    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for tool in &self.tools {
            let name = tool.name.trim();
            if name.is_empty() {
                return Err(ToolErr::InvalidTool("tool with empty name".to_string()));
            }
            if !seen.insert(name) {
                return Err(ToolErr::InvalidTool(format!("duplicate tool name '{name}'")));
            }
            if tool.run.command.trim().is_empty() {
                return Err(ToolErr::InvalidTool(format!("tool '{name}' has no command")));
            }
            if tool.run.timeout == Some(0) {
                return Err(ToolErr::InvalidTool(format!(
                    "tool '{name}' has a zero timeout"
                )));
            }
            for (param, spec) in &tool.params {
                if let (true, Some(default)) = (spec.required, &spec.default) {
                    tracing::warn!(
                        "tool '{name}': required parameter '{param}' also has default {default}"
                    );
                }
            }
        }
        Ok(())
    }

    /// Shell for `tool`: its own override, else the file-wide one.
    pub fn shell_for(&self, tool: &ToolDefinition) -> Option<String> {
        tool.run
            .shell
            .clone()
            .filter(|s| !s.trim().is_empty())
            .or_else(|| self.shell.clone())
            .filter(|s| !s.trim().is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    const SAMPLE: &str = r#"
shell = "/bin/bash"

[[tools]]
name = "hello"
description = "Greets someone"
constraints = ["name.size() <= 5"]

[tools.params.name]
type = "string"
description = "Who to greet"
required = true

[tools.params.times]
type = "number"
default = 1

[tools.run]
command = "echo 'Hello, {{ .name }}'"
env = ["HOME", "GREETING=hi"]
timeout = 5

[tools.output]
prefix = "Greeting for {{ .name }}:"

[[tools]]
name = "ls"
[tools.run]
command = "ls -la"
runner = "docker"
shell = "/bin/sh"
[tools.run.options]
image = "alpine:3"
allow_networking = false
"#;

    #[test]
    fn parses_a_full_definition() -> Result<()> {
        let config = ToolsConfig::from_toml_str(SAMPLE)?;
        assert_eq!(config.tools.len(), 2);

        let hello = &config.tools[0];
        assert_eq!(hello.name, "hello");
        assert_eq!(hello.constraints, vec!["name.size() <= 5".to_string()]);
        assert!(hello.params["name"].required);
        assert_eq!(hello.params["times"].default, Some(json!(1)));
        assert_eq!(hello.run.timeout_duration(), Some(Duration::from_secs(5)));
        assert_eq!(hello.output.prefix, "Greeting for {{ .name }}:");
        assert_eq!(config.shell_for(hello), Some("/bin/bash".to_string()));

        let ls = &config.tools[1];
        assert_eq!(ls.run.runner, "docker");
        assert_eq!(ls.run.options.get("image"), Some(&json!("alpine:3")));
        assert_eq!(config.shell_for(ls), Some("/bin/sh".to_string()));
        Ok(())
    }

    #[test]
    fn rejects_duplicate_names() {
        let toml = r#"
[[tools]]
name = "a"
run = { command = "true" }
[[tools]]
name = "a"
run = { command = "false" }
"#;
        assert!(matches!(
            ToolsConfig::from_toml_str(toml),
            Err(ToolErr::InvalidTool(_))
        ));
    }

    #[test]
    fn rejects_empty_command() {
        let toml = r#"
[[tools]]
name = "a"
run = { command = "  " }
"#;
        assert!(matches!(
            ToolsConfig::from_toml_str(toml),
            Err(ToolErr::InvalidTool(_))
        ));
    }

    #[test]
    fn syntax_errors_surface_as_toml_errors() {
        assert!(matches!(
            ToolsConfig::from_toml_str("[[tools]\nname ="),
            Err(ToolErr::Toml(_))
        ));
    }

    #[test]
    fn empty_file_has_no_tools() -> Result<()> {
        assert_eq!(ToolsConfig::from_toml_str("")?, ToolsConfig::default());
        Ok(())
    }
}

use std::io;
use std::time::Duration;

use thiserror::Error;
use tokio::task::JoinError;

use crate::template::TemplateError;

pub type Result<T> = std::result::Result<T, ToolErr>;

/// Failure of a spawned child process.
#[derive(Error, Debug)]
pub enum ExecErr {
    /// The child could not be started at all.
    #[error("failed to spawn `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    /// The child ran and exited unsuccessfully.
    #[error("command exited with status {exit_code}: {detail}")]
    Exit { exit_code: i32, detail: String },

    /// The child was terminated by a signal.
    #[error("command was killed by signal {0}")]
    Signal(i32),
}

#[derive(Error, Debug)]
pub enum ToolErr {
    /// Bad or missing runner options, unknown runner type.
    #[error("invalid runner configuration: {0}")]
    Config(String),

    /// The selected runner cannot work on this host.
    #[error("runner requirements not met: {0}")]
    UnmetRequirement(String),

    /// A constraint expression failed to compile, or a parameter declares an
    /// unsupported type.
    #[error("failed to compile constraint `{expression}`: {message}")]
    Compile { expression: String, message: String },

    /// A constraint could not be evaluated to a boolean.
    #[error("failed to evaluate constraint `{expression}`: {message}")]
    Eval { expression: String, message: String },

    /// Every constraint was evaluated and at least one returned false.
    #[error("command blocked by constraints: {}", .0.join("; "))]
    PolicyRejection(Vec<String>),

    #[error("template error: {0}")]
    Render(#[from] TemplateError),

    #[error(transparent)]
    Execution(#[from] ExecErr),

    /// The caller's cancellation token fired.
    #[error("command was cancelled")]
    Cancelled,

    #[error("command timed out after {}s", .0.as_secs_f64())]
    Timeout(Duration),

    #[error("invalid tool configuration: {0}")]
    InvalidTool(String),

    #[error("unknown tool: {0}")]
    UnknownTool(String),

    #[error("missing required argument: {0}")]
    MissingArgument(String),

    #[error("invalid arguments: {0}")]
    InvalidArguments(String),

    // -----------------------------------------------------------------
    // Automatic conversions for common external error types
    // -----------------------------------------------------------------
    #[error(transparent)]
    Io(#[from] io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Toml(#[from] toml::de::Error),

    #[error(transparent)]
    TokioJoin(#[from] JoinError),
}

impl ToolErr {
    /// Errors raised while activating a tool, as opposed to during a call.
    pub fn is_activation_error(&self) -> bool {
        matches!(
            self,
            ToolErr::Config(_)
                | ToolErr::UnmetRequirement(_)
                | ToolErr::Compile { .. }
                | ToolErr::InvalidTool(_)
        )
    }
}

/// Text suitable for handing back to the calling agent.
pub fn get_error_message_ui(e: &ToolErr) -> String {
    match e {
        ToolErr::Execution(ExecErr::Exit { detail, .. }) => detail.to_string(),
        ToolErr::PolicyRejection(failed) => {
            let mut msg = String::from("command blocked by constraints:");
            for failure in failed {
                msg.push_str("\n- ");
                msg.push_str(failure);
            }
            msg
        }
        ToolErr::Timeout(_) => "error: command timed out".to_string(),
        _ => e.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn exit_failure_prefers_detail() {
        let err = ToolErr::Execution(ExecErr::Exit {
            exit_code: 2,
            detail: "ls: cannot access 'nope'".to_string(),
        });
        assert_eq!(get_error_message_ui(&err), "ls: cannot access 'nope'");
    }

    #[test]
    fn policy_rejection_lists_every_failure() {
        let err = ToolErr::PolicyRejection(vec!["a failed".to_string(), "b failed".to_string()]);
        assert_eq!(
            get_error_message_ui(&err),
            "command blocked by constraints:\n- a failed\n- b failed"
        );
    }

    #[test]
    fn activation_errors_are_classified() {
        assert!(ToolErr::Config("image is required".to_string()).is_activation_error());
        assert!(!ToolErr::Cancelled.is_activation_error());
    }
}

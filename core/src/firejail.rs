use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::Result;
use crate::error::ToolErr;
use crate::exec::ExecRunner;
use crate::exec::Invocation;
use crate::exec::RunParams;
use crate::exec::command_invocation;
use crate::exec::write_profile;
use crate::params::Args;
use crate::seatbelt::SandboxOptions;
use crate::seatbelt::profile_data;
use crate::template;

const FIREJAIL_PROFILE_TEMPLATE: &str = include_str!("firejail_profile.tmpl");

const FIREJAIL_EXECUTABLE: &str = "firejail";

/// Produces the firejail profile for one call.
pub fn render_profile(options: &SandboxOptions, params: &Args) -> Result<String> {
    if !options.custom_profile.trim().is_empty() {
        return Ok(options.custom_profile.clone());
    }
    Ok(template::render(
        FIREJAIL_PROFILE_TEMPLATE,
        &profile_data(options, params),
    )?)
}

/// Runs commands inside a Linux `firejail` namespace jail.
#[derive(Debug, Clone)]
pub struct FirejailRunner {
    options: SandboxOptions,
    exec: ExecRunner,
}

impl FirejailRunner {
    pub fn new(options: SandboxOptions) -> Self {
        Self {
            options,
            exec: ExecRunner::default(),
        }
    }

    pub fn check_requirements(&self) -> Result<()> {
        let mut unmet = Vec::new();
        if !cfg!(target_os = "linux") {
            unmet.push("firejail runner is only available on Linux".to_string());
        }
        if which::which(FIREJAIL_EXECUTABLE).is_err() {
            unmet.push(format!("{FIREJAIL_EXECUTABLE} not found on PATH"));
        }
        if unmet.is_empty() {
            Ok(())
        } else {
            Err(ToolErr::UnmetRequirement(unmet.join("; ")))
        }
    }

    pub async fn run(&self, cancel: &CancellationToken, params: &RunParams) -> Result<String> {
        if cancel.is_cancelled() {
            return Err(ToolErr::Cancelled);
        }

        let profile = render_profile(&self.options, &params.params)?;
        let profile_path = write_profile("mcpshell-firejail-", ".profile", &profile)?;
        debug!("firejail profile written to {}", profile_path.display());

        let shell = params.resolved_shell();
        let Invocation {
            argv: command_argv,
            script: _script,
        } = command_invocation(&shell, &params.command, params.use_tmpfile)?;

        let mut argv = vec![
            FIREJAIL_EXECUTABLE.to_string(),
            "--quiet".to_string(),
            format!("--profile={}", profile_path.display()),
        ];
        argv.extend(command_argv);

        self.exec
            .run_argv(cancel, argv, &params.env, params.timeout)
            .await
    }
}

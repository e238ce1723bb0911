#[cfg(unix)]
use std::os::unix::process::ExitStatusExt;

use std::io;
use std::io::Write;
use std::path::PathBuf;
use std::process::ExitStatus;
use std::time::Duration;
use std::time::Instant;

use serde::Deserialize;
use tempfile::TempPath;
use tokio::io::AsyncRead;
use tokio::io::AsyncReadExt;
use tokio::io::BufReader;
use tokio::process::Child;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::warn;

use crate::error::ExecErr;
use crate::error::Result;
use crate::error::ToolErr;
use crate::exec_env::env_pairs;
use crate::params::Args;
use crate::shell::resolve_executable;
use crate::shell::resolve_shell;
use crate::shell::shell_invocation;
use crate::spawn::ProcessGroupGuard;
use crate::spawn::StdioPolicy;
use crate::spawn::spawn_child_async;

/// Maximum number of bytes kept from each of stdout and stderr.
pub const MAX_STREAM_OUTPUT: usize = 1024 * 1024;

/// Everything a runner needs to execute one rendered command.
#[derive(Debug, Clone, Default)]
pub struct RunParams {
    /// Shell override from the tool definition; `None` uses `$SHELL`.
    pub shell: Option<String>,
    /// The rendered command.
    pub command: String,
    /// Resolved `NAME=value` assignments added to the child environment.
    pub env: Vec<String>,
    /// Call arguments, used by runners that render their own templates.
    pub params: Args,
    /// Run non-direct commands from a script file instead of `-c`.
    pub use_tmpfile: bool,
    pub timeout: Option<Duration>,
}

impl RunParams {
    pub(crate) fn resolved_shell(&self) -> String {
        resolve_shell(self.shell.as_deref())
    }
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct ExecOptions {
    /// Working directory for the child; inherits ours when unset.
    pub workdir: Option<PathBuf>,
}

/// Runs commands directly on the host with no isolation.
#[derive(Debug, Clone, Default)]
pub struct ExecRunner {
    options: ExecOptions,
}

impl ExecRunner {
    pub fn new(options: ExecOptions) -> Self {
        Self { options }
    }

    pub fn check_requirements(&self) -> Result<()> {
        Ok(())
    }

    pub async fn run(&self, cancel: &CancellationToken, params: &RunParams) -> Result<String> {
        if cancel.is_cancelled() {
            return Err(ToolErr::Cancelled);
        }
        let shell = params.resolved_shell();
        let Invocation {
            argv,
            script: _script,
        } = command_invocation(&shell, &params.command, params.use_tmpfile)?;
        self.run_argv(cancel, argv, &params.env, params.timeout)
            .await
    }

    /// Spawns `argv` as-is and collects its output.
    pub(crate) async fn run_argv(
        &self,
        cancel: &CancellationToken,
        argv: Vec<String>,
        env: &[String],
        timeout: Option<Duration>,
    ) -> Result<String> {
        if cancel.is_cancelled() {
            return Err(ToolErr::Cancelled);
        }
        let (program, args) = argv.split_first().ok_or_else(|| {
            ToolErr::Io(io::Error::new(
                io::ErrorKind::InvalidInput,
                "command args are empty",
            ))
        })?;

        debug!("executing {argv:?}");
        let start = Instant::now();
        let child = spawn_child_async(
            PathBuf::from(program),
            args.to_vec(),
            self.options.workdir.clone(),
            StdioPolicy::RedirectForShellTool,
            env_pairs(env),
        )
        .await
        .map_err(|source| ExecErr::Spawn {
            program: program.clone(),
            source,
        })?;

        let output = consume_output(child, cancel, timeout).await;
        let duration = start.elapsed();
        match output {
            Ok(raw) => {
                info!("{program} finished in {duration:?}");
                raw.into_result()
            }
            Err(err) => {
                error!("exec error: {err}");
                Err(err)
            }
        }
    }
}

/// How a command is handed to the OS. The script file, if any, is removed
/// when this value is dropped.
pub(crate) struct Invocation {
    pub argv: Vec<String>,
    pub script: Option<TempPath>,
}

/// Builds the argument vector for `command`.
///
/// A single-token command naming an executable is spawned directly.
/// Anything else runs through `shell`, either with `-c` or from a script file
/// when `use_tmpfile` is set.
pub(crate) fn command_invocation(
    shell: &str,
    command: &str,
    use_tmpfile: bool,
) -> Result<Invocation> {
    if let Some(executable) = resolve_executable(command) {
        debug!("running {command} directly as {}", executable.display());
        return Ok(Invocation {
            argv: vec![executable.to_string_lossy().into_owned()],
            script: None,
        });
    }

    if use_tmpfile {
        let script = write_script(shell, command)?;
        let argv = vec![shell.to_string(), script.to_string_lossy().into_owned()];
        return Ok(Invocation {
            argv,
            script: Some(script),
        });
    }

    Ok(Invocation {
        argv: shell_invocation(shell, command),
        script: None,
    })
}

/// Writes `body` to a fresh owner-only executable file.
pub(crate) fn write_script(shell: &str, body: &str) -> Result<TempPath> {
    let mut file = tempfile::Builder::new()
        .prefix("mcpshell-")
        .suffix(".sh")
        .tempfile()?;
    writeln!(file, "#!{shell}")?;
    writeln!(file, "{body}")?;
    file.as_file().sync_all()?;
    set_owner_executable(file.path())?;
    Ok(file.into_temp_path())
}

#[cfg(unix)]
fn set_owner_executable(path: &std::path::Path) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o700))
}

#[cfg(not(unix))]
fn set_owner_executable(_path: &std::path::Path) -> io::Result<()> {
    Ok(())
}

/// Writes a generated profile to a fresh temp file and flushes it to disk.
pub(crate) fn write_profile(prefix: &str, suffix: &str, contents: &str) -> Result<TempPath> {
    let mut file = tempfile::Builder::new()
        .prefix(prefix)
        .suffix(suffix)
        .tempfile()?;
    file.write_all(contents.as_bytes())?;
    file.as_file().sync_all()?;
    Ok(file.into_temp_path())
}

#[derive(Debug)]
pub struct RawExecOutput {
    pub exit_status: ExitStatus,
    pub stdout: String,
    pub stderr: String,
}

impl RawExecOutput {
    /// Successful output, or an [`ExecErr`] that prefers stderr as detail.
    pub fn into_result(self) -> Result<String> {
        #[cfg(unix)]
        if let Some(signal) = self.exit_status.signal() {
            return Err(ExecErr::Signal(signal).into());
        }

        let exit_code = self.exit_status.code().unwrap_or(-1);
        if exit_code == 0 {
            return Ok(self.stdout);
        }

        let stderr = self.stderr.trim();
        let detail = if stderr.is_empty() {
            format!("exit status {exit_code}")
        } else {
            stderr.to_string()
        };
        Err(ExecErr::Exit { exit_code, detail }.into())
    }
}

/// Waits for `child` while draining its output.
///
/// The child and every process it started are killed when `cancel` fires or
/// `timeout` elapses; those cases return [`ToolErr::Cancelled`] and
/// [`ToolErr::Timeout`]. Dropping the returned future does the same.
pub async fn consume_output(
    mut child: Child,
    cancel: &CancellationToken,
    timeout: Option<Duration>,
) -> Result<RawExecOutput> {
    // Both stdout and stderr were configured with `Stdio::piped()`, so
    // `take()` only fails if the child was spawned some other way.
    let stdout_reader = child.stdout.take().ok_or_else(|| {
        ToolErr::Io(io::Error::other(
            "stdout pipe was unexpectedly not available",
        ))
    })?;
    let stderr_reader = child.stderr.take().ok_or_else(|| {
        ToolErr::Io(io::Error::other(
            "stderr pipe was unexpectedly not available",
        ))
    })?;

    let mut group = ProcessGroupGuard::new(&child);

    let stdout_handle = tokio::spawn(read_capped(
        BufReader::new(stdout_reader),
        MAX_STREAM_OUTPUT,
    ));
    let stderr_handle = tokio::spawn(read_capped(
        BufReader::new(stderr_reader),
        MAX_STREAM_OUTPUT,
    ));

    let deadline = async {
        match timeout {
            Some(timeout) => tokio::time::sleep(timeout).await,
            None => std::future::pending::<()>().await,
        }
    };

    let interrupted = tokio::select! {
        result = child.wait() => Ok(result?),
        _ = cancel.cancelled() => Err(ToolErr::Cancelled),
        _ = deadline => Err(ToolErr::Timeout(timeout.unwrap_or_default())),
    };

    let exit_status = match interrupted {
        Ok(exit_status) => {
            group.disarm();
            exit_status
        }
        Err(err) => {
            warn!("killing child process group: {err}");
            group.kill();
            if let Err(e) = child.start_kill() {
                debug!("child already gone: {e}");
            }
            // Reap it so no zombie is left behind.
            let _ = child.wait().await;
            stdout_handle.abort();
            stderr_handle.abort();
            return Err(err);
        }
    };

    let stdout = stdout_handle.await??;
    let stderr = stderr_handle.await??;

    Ok(RawExecOutput {
        exit_status,
        stdout: String::from_utf8_lossy(&stdout).into_owned(),
        stderr: String::from_utf8_lossy(&stderr).into_owned(),
    })
}

async fn read_capped<R: AsyncRead + Unpin>(
    mut reader: R,
    max_output: usize,
) -> io::Result<Vec<u8>> {
    let mut buf = Vec::with_capacity(max_output.min(8 * 1024));
    let mut tmp = [0u8; 8192];
    let mut truncated = false;

    loop {
        let n = reader.read(&mut tmp).await?;
        if n == 0 {
            break;
        }
        let remaining = max_output - buf.len();
        if n > remaining {
            truncated = true;
        }
        buf.extend_from_slice(&tmp[..n.min(remaining)]);
        // Keep reading to EOF to avoid back-pressure, discarding past the cap.
    }

    if truncated {
        warn!("output truncated to {max_output} bytes");
    }
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[cfg(unix)]
    fn exit_status(code: i32) -> ExitStatus {
        ExitStatus::from_raw(code << 8)
    }

    #[cfg(unix)]
    #[test]
    fn failed_exit_prefers_stderr() {
        let raw = RawExecOutput {
            exit_status: exit_status(2),
            stdout: "partial".to_string(),
            stderr: "  no such file\n".to_string(),
        };
        match raw.into_result() {
            Err(ToolErr::Execution(ExecErr::Exit { exit_code, detail })) => {
                assert_eq!(exit_code, 2);
                assert_eq!(detail, "no such file");
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[cfg(unix)]
    #[test]
    fn failed_exit_without_stderr_reports_status() {
        let raw = RawExecOutput {
            exit_status: exit_status(3),
            stdout: String::new(),
            stderr: String::new(),
        };
        match raw.into_result() {
            Err(ToolErr::Execution(ExecErr::Exit { detail, .. })) => {
                assert_eq!(detail, "exit status 3");
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[cfg(unix)]
    #[test]
    fn single_token_commands_skip_the_shell() -> Result<()> {
        let invocation = command_invocation("/bin/sh", "sh", false)?;
        assert_eq!(invocation.argv.len(), 1);
        assert!(invocation.script.is_none());

        let invocation = command_invocation("/bin/sh", "echo hello", false)?;
        assert_eq!(invocation.argv, vec!["/bin/sh", "-c", "echo hello"]);
        Ok(())
    }

    #[cfg(unix)]
    #[test]
    fn script_file_is_removed_on_drop() -> Result<()> {
        let invocation = command_invocation("/bin/sh", "echo hi | wc -c", true)?;
        let path = invocation
            .script
            .as_ref()
            .map(|p| p.to_path_buf())
            .ok_or_else(|| ToolErr::Config("missing script".to_string()))?;
        let body = std::fs::read_to_string(&path)?;
        assert_eq!(body, "#!/bin/sh\necho hi | wc -c\n");
        assert_eq!(invocation.argv[1], path.to_string_lossy());
        drop(invocation);
        assert!(!path.exists());
        Ok(())
    }

    #[tokio::test]
    async fn read_capped_discards_past_the_limit() -> io::Result<()> {
        let data = vec![b'x'; 100];
        let out = read_capped(&data[..], 10).await?;
        assert_eq!(out.len(), 10);
        Ok(())
    }
}

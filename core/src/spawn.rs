use std::io;
use std::path::PathBuf;
use std::process::Stdio;

use tokio::process::Child;
use tokio::process::Command;
use tracing::trace;
#[cfg(unix)]
use tracing::warn;

#[derive(Debug, Clone, Copy)]
pub enum StdioPolicy {
    /// stdin is closed, stdout and stderr are captured.
    RedirectForShellTool,
    /// All three streams are connected to the null device.
    Discard,
}

/// Spawns `program` with `args`, appending `env` to the inherited
/// environment. The child is killed if the returned handle is dropped.
///
/// On unix the child leads a new process group, so everything it starts can
/// be stopped together with [`ProcessGroupGuard`].
pub async fn spawn_child_async(
    program: PathBuf,
    args: Vec<String>,
    cwd: Option<PathBuf>,
    stdio_policy: StdioPolicy,
    env: Vec<(String, String)>,
) -> io::Result<Child> {
    trace!(
        "spawn_child_async: {program:?} {args:?} {cwd:?} {stdio_policy:?} {} env var(s)",
        env.len()
    );

    let mut cmd = Command::new(&program);
    cmd.args(&args);
    if let Some(cwd) = cwd {
        cmd.current_dir(cwd);
    }
    cmd.envs(env);
    #[cfg(unix)]
    cmd.process_group(0);

    match stdio_policy {
        StdioPolicy::RedirectForShellTool => {
            cmd.stdin(Stdio::null());
            cmd.stdout(Stdio::piped()).stderr(Stdio::piped());
        }
        StdioPolicy::Discard => {
            cmd.stdin(Stdio::null())
                .stdout(Stdio::null())
                .stderr(Stdio::null());
        }
    }

    cmd.kill_on_drop(true).spawn()
}

/// Kills the whole process group of a child spawned by
/// [`spawn_child_async`] when dropped, unless disarmed first.
#[derive(Debug)]
pub(crate) struct ProcessGroupGuard {
    pgid: Option<u32>,
}

impl ProcessGroupGuard {
    pub(crate) fn new(child: &Child) -> Self {
        Self { pgid: child.id() }
    }

    /// Call once the group leader has been reaped; its id may be reused.
    pub(crate) fn disarm(&mut self) {
        self.pgid = None;
    }

    pub(crate) fn kill(&mut self) {
        if let Some(pgid) = self.pgid.take() {
            kill_process_group(pgid);
        }
    }
}

impl Drop for ProcessGroupGuard {
    fn drop(&mut self) {
        self.kill();
    }
}

#[cfg(unix)]
fn kill_process_group(pgid: u32) {
    let Ok(pgid) = libc::pid_t::try_from(pgid) else {
        return;
    };
    // SAFETY: killpg takes plain integers and touches no memory.
    let rc = unsafe { libc::killpg(pgid, libc::SIGKILL) };
    if rc != 0 {
        let err = io::Error::last_os_error();
        if err.raw_os_error() != Some(libc::ESRCH) {
            warn!("failed to kill process group {pgid}: {err}");
        }
    }
}

#[cfg(not(unix))]
fn kill_process_group(_pgid: u32) {}

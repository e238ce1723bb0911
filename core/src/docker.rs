use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;
use tempfile::TempPath;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::info;
use tracing::warn;
use uuid::Uuid;

use crate::error::Result;
use crate::error::ToolErr;
use crate::exec::ExecRunner;
use crate::exec::RunParams;
use crate::exec::write_script;
use crate::exec_env::env_pairs;
use crate::shell::is_single_token;
use crate::spawn::StdioPolicy;
use crate::spawn::spawn_child_async;

/// Where the generated script is mounted inside the container.
const CONTAINER_SCRIPT_PATH: &str = "/tmp/mcpshell-script.sh";

const CONTAINER_SHELL: &str = "/bin/sh";

const ENGINE_PROBE_TIMEOUT: Duration = Duration::from_secs(3);

const CONTAINER_REMOVE_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct DockerOptions {
    /// Image to run. Required.
    pub image: String,
    /// `docker` or `podman`; picked from `PATH` when empty.
    pub engine: String,
    pub allow_networking: bool,
    /// Explicit `--network` value; overrides `allow_networking`.
    pub network: String,
    pub user: String,
    pub workdir: String,
    /// `host:container[:mode]` bind mounts.
    pub mounts: Vec<String>,
    /// Extra arguments passed to `run` verbatim (shell-split).
    pub docker_run_opts: String,
    /// Command run inside the container before the tool command.
    pub prepare_command: String,
    pub memory: String,
    pub memory_reservation: String,
    pub memory_swap: String,
    pub memory_swappiness: Option<i64>,
    pub cap_add: Vec<String>,
    pub cap_drop: Vec<String>,
    pub dns: Vec<String>,
    pub dns_search: Vec<String>,
    pub platform: String,
}

/// Builds the arguments that follow the engine executable, in the order
/// `run --rm --name`, isolation flags, pass-through options, mounts,
/// environment, then image and command.
pub fn build_run_args(
    options: &DockerOptions,
    name: &str,
    extra_mounts: &[String],
    env: &[String],
    command: &[String],
) -> Result<Vec<String>> {
    let mut args = vec![
        "run".to_string(),
        "--rm".to_string(),
        "--name".to_string(),
        name.to_string(),
    ];

    if !options.network.is_empty() {
        args.extend(["--network".to_string(), options.network.clone()]);
    } else if !options.allow_networking {
        args.extend(["--network".to_string(), "none".to_string()]);
    }

    let valued = [
        ("--user", &options.user),
        ("--workdir", &options.workdir),
        ("--memory", &options.memory),
        ("--memory-reservation", &options.memory_reservation),
        ("--memory-swap", &options.memory_swap),
    ];
    for (flag, value) in valued {
        if !value.is_empty() {
            args.extend([flag.to_string(), value.clone()]);
        }
    }
    if let Some(swappiness) = options.memory_swappiness.filter(|s| *s >= 0) {
        args.extend(["--memory-swappiness".to_string(), swappiness.to_string()]);
    }

    let repeated = [
        ("--cap-add", &options.cap_add),
        ("--cap-drop", &options.cap_drop),
        ("--dns", &options.dns),
        ("--dns-search", &options.dns_search),
    ];
    for (flag, values) in repeated {
        for value in values.iter().filter(|v| !v.is_empty()) {
            args.extend([flag.to_string(), value.clone()]);
        }
    }

    if !options.platform.is_empty() {
        args.extend(["--platform".to_string(), options.platform.clone()]);
    }

    if !options.docker_run_opts.trim().is_empty() {
        let extra = shlex::split(&options.docker_run_opts).ok_or_else(|| {
            ToolErr::Config(format!(
                "docker_run_opts is not valid shell syntax: {}",
                options.docker_run_opts
            ))
        })?;
        args.extend(extra);
    }

    for mount in options.mounts.iter().chain(extra_mounts) {
        args.extend(["-v".to_string(), mount.clone()]);
    }

    for (name, value) in env_pairs(env) {
        args.extend(["-e".to_string(), format!("{name}={value}")]);
    }

    args.push(options.image.clone());
    args.extend(command.iter().cloned());
    Ok(args)
}

/// Script body run inside the container in scripted mode.
fn container_script(env: &[String], prepare_command: &str, command: &str) -> String {
    let mut script = String::new();
    for (name, value) in env_pairs(env) {
        let quoted = shlex::try_quote(&value)
            .map(|q| q.into_owned())
            .unwrap_or_else(|_| "''".to_string());
        script.push_str(&format!("export {name}={quoted}\n"));
    }
    if !prepare_command.trim().is_empty() {
        script.push_str(prepare_command.trim());
        script.push('\n');
    }
    script.push_str(command);
    script
}

fn resolve_engine(engine: &str) -> Result<String> {
    match engine.trim() {
        "docker" | "podman" => Ok(engine.trim().to_string()),
        "" => {
            if which::which("docker").is_err() && which::which("podman").is_ok() {
                Ok("podman".to_string())
            } else {
                Ok("docker".to_string())
            }
        }
        other => Err(ToolErr::Config(format!(
            "unsupported container engine '{other}', expected docker or podman"
        ))),
    }
}

/// Runs commands in a throwaway container.
#[derive(Debug, Clone)]
pub struct DockerRunner {
    options: DockerOptions,
    engine: String,
    exec: ExecRunner,
}

impl DockerRunner {
    pub fn new(options: DockerOptions) -> Result<Self> {
        if options.image.trim().is_empty() {
            return Err(ToolErr::Config(
                "docker runner requires the 'image' option".to_string(),
            ));
        }
        let engine = resolve_engine(&options.engine)?;
        Ok(Self {
            options,
            engine,
            exec: ExecRunner::default(),
        })
    }

    pub fn engine(&self) -> &str {
        &self.engine
    }

    /// Requires the engine on `PATH` and a responsive daemon.
    pub async fn check_requirements(&self) -> Result<()> {
        let engine_path = which::which(&self.engine).map_err(|_| {
            ToolErr::UnmetRequirement(format!("{} not found on PATH", self.engine))
        })?;
        if probe_engine(engine_path).await {
            Ok(())
        } else {
            Err(ToolErr::UnmetRequirement(format!(
                "`{} info` failed; is the daemon running?",
                self.engine
            )))
        }
    }

    pub async fn run(&self, cancel: &CancellationToken, params: &RunParams) -> Result<String> {
        if cancel.is_cancelled() {
            return Err(ToolErr::Cancelled);
        }

        let ContainerInvocation { argv, name, script } = self.invocation(params)?;
        let run_string = shlex::try_join(argv.iter().map(String::as_str)).map_err(|e| {
            ToolErr::Config(format!("cannot quote container command: {e}"))
        })?;
        debug!("container run: {run_string}");

        let exec_params = RunParams {
            shell: None,
            command: run_string,
            env: Vec::new(),
            params: params.params.clone(),
            use_tmpfile: false,
            timeout: params.timeout,
        };
        let result = self.exec.run(cancel, &exec_params).await;
        if matches!(result, Err(ToolErr::Cancelled | ToolErr::Timeout(_))) {
            // Killing the client leaves the container running.
            self.remove_container(&name).await;
        }
        drop(script);
        result
    }

    /// Builds the engine command line for one call. A single-token command
    /// with no `prepare_command` runs as the container's command; anything
    /// else is written to a script that is mounted read-only and run by the
    /// container shell.
    pub(crate) fn invocation(&self, params: &RunParams) -> Result<ContainerInvocation> {
        let name = format!("mcpshell-{}", Uuid::new_v4());
        let direct =
            self.options.prepare_command.trim().is_empty() && is_single_token(&params.command);

        let mut script = None;
        let run_args = if direct {
            build_run_args(
                &self.options,
                &name,
                &[],
                &params.env,
                &[params.command.trim().to_string()],
            )?
        } else {
            let shell = params
                .shell
                .as_deref()
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .unwrap_or(CONTAINER_SHELL)
                .to_string();
            let body = container_script(
                &params.env,
                &self.options.prepare_command,
                &params.command,
            );
            let path = write_script(&shell, &body)?;
            let mount = format!("{}:{CONTAINER_SCRIPT_PATH}:ro", path.display());
            let args = build_run_args(
                &self.options,
                &name,
                &[mount],
                &params.env,
                &[shell, CONTAINER_SCRIPT_PATH.to_string()],
            )?;
            script = Some(path);
            args
        };

        let mut argv = vec![self.engine.clone()];
        argv.extend(run_args);
        Ok(ContainerInvocation { argv, name, script })
    }

    /// Force-removes container `name`, stopping it if it is still running.
    async fn remove_container(&self, name: &str) {
        let engine_path =
            which::which(&self.engine).unwrap_or_else(|_| PathBuf::from(&self.engine));
        let args = vec!["rm".to_string(), "-f".to_string(), name.to_string()];
        if run_engine_quietly(engine_path, args, CONTAINER_REMOVE_TIMEOUT).await {
            info!("removed container {name}");
        } else {
            warn!("could not remove container {name}");
        }
    }
}

/// The engine command line for one call. The mounted script, if any, is
/// removed when this value is dropped.
pub(crate) struct ContainerInvocation {
    pub argv: Vec<String>,
    pub name: String,
    pub script: Option<TempPath>,
}

async fn probe_engine(engine_path: PathBuf) -> bool {
    run_engine_quietly(engine_path, vec!["info".to_string()], ENGINE_PROBE_TIMEOUT).await
}

/// Runs the engine with `args` and reports whether it exited successfully
/// within `timeout`.
async fn run_engine_quietly(engine_path: PathBuf, args: Vec<String>, timeout: Duration) -> bool {
    let child = spawn_child_async(
        engine_path,
        args,
        None,
        StdioPolicy::Discard,
        Vec::new(),
    )
    .await;
    let mut child = match child {
        Ok(child) => child,
        Err(e) => {
            info!("container engine failed to start: {e}");
            return false;
        }
    };
    match tokio::time::timeout(timeout, child.wait()).await {
        Ok(Ok(status)) => status.success(),
        Ok(Err(e)) => {
            info!("container engine failed: {e}");
            false
        }
        Err(_) => {
            info!("container engine timed out");
            // kill_on_drop reaps the child
            false
        }
    }
}

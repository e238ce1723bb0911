#![cfg(unix)]
#![expect(clippy::expect_used)]

//! Temp-file hygiene for every runner. Kept in its own test binary because it
//! redirects the process-wide temp directory.

use std::path::Path;
use std::time::Duration;

use mcpshell_core::ToolErr;
use mcpshell_core::exec::RunParams;
use mcpshell_core::params::Args;
use mcpshell_core::runner::Runner;
use mcpshell_core::runner::RunnerOptions;
use mcpshell_core::runner::RunnerType;
use pretty_assertions::assert_eq;
use serde_json::Value;
use serde_json::json;
use tokio_util::sync::CancellationToken;

fn options(value: Value) -> RunnerOptions {
    match value {
        Value::Object(map) => map,
        _ => RunnerOptions::new(),
    }
}

fn leftovers(dir: &Path) -> Vec<String> {
    std::fs::read_dir(dir)
        .expect("temp dir should be readable")
        .map(|entry| {
            entry
                .expect("dir entry")
                .file_name()
                .to_string_lossy()
                .into_owned()
        })
        .collect()
}

fn runners() -> Vec<Runner> {
    [
        (RunnerType::Exec, json!({})),
        (RunnerType::SandboxExec, json!({"allow_read_folders": ["/usr"]})),
        (RunnerType::Firejail, json!({"allow_read_folders": ["/usr"]})),
        (
            RunnerType::Docker,
            json!({
                "image": "mcpshell-absent-image:never",
                "engine": "docker",
                "docker_run_opts": "--pull=never",
            }),
        ),
    ]
    .into_iter()
    .map(|(kind, opts)| Runner::new(kind, &options(opts)).expect("runner options are valid"))
    .collect()
}

#[tokio::test]
async fn runners_leave_no_files_behind() {
    let tmp = tempfile::tempdir().expect("should be able to create temp dir");
    tempfile::env::override_temp_dir(tmp.path()).expect("temp dir is only overridden here");

    let params = RunParams {
        shell: Some("/bin/sh".to_string()),
        command: "echo one\necho two".to_string(),
        env: Vec::new(),
        params: Args::new(),
        use_tmpfile: true,
        timeout: Some(Duration::from_secs(20)),
    };

    let cancelled = CancellationToken::new();
    cancelled.cancel();
    for runner in runners() {
        let err = runner
            .run(&cancelled, &params)
            .await
            .expect_err("cancelled calls never run");
        assert!(matches!(err, ToolErr::Cancelled), "got {err:?}");
        assert_eq!(
            leftovers(tmp.path()),
            Vec::<String>::new(),
            "{} created files for a cancelled call",
            runner.kind()
        );
    }

    // Whether or not this host has the backend, the profile and script files
    // are gone once the call returns.
    for runner in runners() {
        let result = runner.run(&CancellationToken::new(), &params).await;
        eprintln!("{} finished with {result:?}", runner.kind());
        assert_eq!(
            leftovers(tmp.path()),
            Vec::<String>::new(),
            "{} left files behind",
            runner.kind()
        );
    }
}

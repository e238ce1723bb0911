use std::path::Path;

use serde::Deserialize;
use serde_json::Value;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::warn;

use crate::error::Result;
use crate::error::ToolErr;
use crate::exec::ExecRunner;
use crate::exec::Invocation;
use crate::exec::RunParams;
use crate::exec::command_invocation;
use crate::exec::write_profile;
use crate::params::Args;
use crate::template;

const SEATBELT_PROFILE_TEMPLATE: &str = include_str!("seatbelt_profile.sbpl.tmpl");

/// Only the system copy of `sandbox-exec` is used, never one found on PATH.
const MACOS_PATH_TO_SEATBELT_EXECUTABLE: &str = "/usr/bin/sandbox-exec";

/// Folders under the home directory that hold personal data.
pub(crate) const USER_DATA_FOLDERS: &[&str] = &[
    "Desktop",
    "Documents",
    "Downloads",
    "Movies",
    "Music",
    "Pictures",
    "Library",
    ".ssh",
    ".gnupg",
    ".aws",
    ".config",
];

/// Options shared by the profile-based runners (`sandbox-exec`, `firejail`).
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct SandboxOptions {
    pub allow_networking: bool,
    pub allow_user_folders: bool,
    /// Extra readable folders; each entry may be a template.
    pub allow_read_folders: Vec<String>,
    /// Extra writable folders; each entry may be a template.
    pub allow_write_folders: Vec<String>,
    /// Complete profile text. When set, no profile is generated.
    pub custom_profile: String,
}

/// Renders each folder entry against `params`, keeping the literal entry
/// when it fails to render. Entries that are not usable as a profile path
/// are dropped.
pub(crate) fn render_folders(folders: &[String], params: &Args) -> Vec<String> {
    folders
        .iter()
        .filter_map(|folder| {
            let rendered = match template::render(folder, params) {
                Ok(rendered) => rendered,
                Err(e) => {
                    warn!("using folder {folder:?} unrendered: {e}");
                    folder.clone()
                }
            };
            let rendered = rendered.trim().to_string();
            if rendered.is_empty() {
                return None;
            }
            match check_profile_path(&rendered) {
                Ok(()) => Some(rendered),
                Err(reason) => {
                    warn!("dropping folder {rendered:?}: {reason}");
                    None
                }
            }
        })
        .collect()
}

/// A folder is written into a profile as a single line (firejail) or a
/// quoted string (seatbelt), so it must be one absolute path with nothing
/// that could end the line or the string.
fn check_profile_path(path: &str) -> std::result::Result<(), &'static str> {
    if path.chars().any(char::is_control) {
        return Err("contains a control character");
    }
    if path.contains(['"', '\\']) {
        return Err("contains a quote or backslash");
    }
    if !Path::new(path).is_absolute() {
        return Err("not an absolute path");
    }
    Ok(())
}

/// Home-relative user data folders, or none when the home directory is
/// unknown.
pub(crate) fn user_data_folders() -> Vec<String> {
    let Some(home) = dirs::home_dir() else {
        return Vec::new();
    };
    USER_DATA_FOLDERS
        .iter()
        .map(|folder| home.join(folder).to_string_lossy().into_owned())
        .collect()
}

/// Values made available to the built-in profile templates.
pub(crate) fn profile_data(options: &SandboxOptions, params: &Args) -> Args {
    let data = json!({
        "allow_networking": options.allow_networking,
        "allow_user_folders": options.allow_user_folders,
        "allow_read_folders": render_folders(&options.allow_read_folders, params),
        "allow_write_folders": render_folders(&options.allow_write_folders, params),
        "user_folders": user_data_folders(),
    });
    match data {
        Value::Object(map) => map,
        _ => Args::new(),
    }
}

/// Produces the seatbelt profile for one call.
pub fn render_profile(options: &SandboxOptions, params: &Args) -> Result<String> {
    if !options.custom_profile.trim().is_empty() {
        return Ok(options.custom_profile.clone());
    }
    Ok(template::render(
        SEATBELT_PROFILE_TEMPLATE,
        &profile_data(options, params),
    )?)
}

/// Runs commands under the macOS `sandbox-exec` seatbelt.
#[derive(Debug, Clone)]
pub struct SandboxExecRunner {
    options: SandboxOptions,
    exec: ExecRunner,
}

impl SandboxExecRunner {
    pub fn new(options: SandboxOptions) -> Self {
        Self {
            options,
            exec: ExecRunner::default(),
        }
    }

    pub fn check_requirements(&self) -> Result<()> {
        let mut unmet = Vec::new();
        if !cfg!(target_os = "macos") {
            unmet.push("sandbox-exec runner is only available on macOS".to_string());
        }
        if !Path::new(MACOS_PATH_TO_SEATBELT_EXECUTABLE).exists() {
            unmet.push(format!("{MACOS_PATH_TO_SEATBELT_EXECUTABLE} not found"));
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
        let profile_path = write_profile("mcpshell-seatbelt-", ".sb", &profile)?;
        debug!("seatbelt profile written to {}", profile_path.display());

        let shell = params.resolved_shell();
        let Invocation {
            argv: command_argv,
            script: _script,
        } = command_invocation(&shell, &params.command, params.use_tmpfile)?;

        let mut argv = vec![
            MACOS_PATH_TO_SEATBELT_EXECUTABLE.to_string(),
            "-f".to_string(),
            profile_path.to_string_lossy().into_owned(),
        ];
        argv.extend(command_argv);

        self.exec
            .run_argv(cancel, argv, &params.env, params.timeout)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn params() -> Args {
        let mut params = Args::new();
        params.insert("project".to_string(), Value::String("/work/app".to_string()));
        params
    }

    fn render(options: &SandboxOptions) -> String {
        match render_profile(options, &params()) {
            Ok(profile) => profile,
            Err(e) => panic!("profile failed to render: {e}"),
        }
    }

    #[test]
    fn default_profile_denies_network() {
        let profile = render(&SandboxOptions::default());
        assert!(profile.starts_with("(version 1)"));
        assert!(profile.contains("(deny network*)"));
        assert!(profile.contains("; user data folders"));
    }

    #[test]
    fn allowances_remove_denials() {
        let profile = render(&SandboxOptions {
            allow_networking: true,
            allow_user_folders: true,
            ..Default::default()
        });
        assert!(!profile.contains("(deny network*)"));
        assert!(!profile.contains("; user data folders"));
    }

    #[test]
    fn folders_are_rendered_per_entry() {
        let profile = render(&SandboxOptions {
            allow_read_folders: vec![
                "{{ .project }}/src".to_string(),
                "/opt/{{ if }}".to_string(),
            ],
            allow_write_folders: vec!["{{ .project }}/out".to_string()],
            ..Default::default()
        });
        assert!(profile.contains(r#"(subpath "/work/app/src")"#));
        assert!(profile.contains(r#"(subpath "/opt/{{ if }}")"#));
        assert!(profile.contains(r#"(subpath "/work/app/out")"#));
    }

    #[test]
    fn custom_profile_is_used_verbatim() {
        let custom = "(version 1)\n(allow default)\n".to_string();
        let profile = render(&SandboxOptions {
            custom_profile: custom.clone(),
            ..Default::default()
        });
        assert_eq!(profile, custom);
    }

    #[test]
    fn empty_rendered_folders_are_dropped() {
        let folders = render_folders(&["{{ .missing }}".to_string()], &params());
        assert_eq!(folders, Vec::<String>::new());
    }

    #[test]
    fn folders_cannot_smuggle_profile_syntax() {
        let mut params = params();
        params.insert(
            "dir".to_string(),
            Value::String("/tmp\nread-write /usr\nwhitelist ~/.ssh".to_string()),
        );
        params.insert(
            "quoted".to_string(),
            Value::String(r#"/tmp") (allow file-write* (subpath "/"#.to_string()),
        );
        let folders = render_folders(
            &[
                "{{ .dir }}".to_string(),
                "{{ .quoted }}".to_string(),
                "relative/dir".to_string(),
                "{{ .project }}".to_string(),
            ],
            &params,
        );
        assert_eq!(folders, vec!["/work/app".to_string()]);
    }

    #[cfg(not(target_os = "macos"))]
    #[test]
    fn unavailable_off_macos() {
        let runner = SandboxExecRunner::new(SandboxOptions::default());
        assert!(matches!(
            runner.check_requirements(),
            Err(ToolErr::UnmetRequirement(_))
        ));
    }
}

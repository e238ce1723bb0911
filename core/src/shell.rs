use std::path::Path;
use std::path::PathBuf;

/// Characters that require a shell to interpret the command.
const SHELL_METACHARACTERS: &[char] = &[
    '|', '&', ';', '<', '>', '(', ')', '{', '}', '[', ']', '$', '`', '\'', '"', '\n', '\\', '*',
    '?', '~', '#',
];

const DEFAULT_SHELL: &str = "/bin/sh";

/// Picks the shell used for non-direct commands: the explicit override, then
/// `$SHELL`, then `/bin/sh`.
pub fn resolve_shell(override_shell: Option<&str>) -> String {
    if let Some(shell) = override_shell.map(str::trim).filter(|s| !s.is_empty()) {
        return shell.to_string();
    }
    match std::env::var("SHELL") {
        Ok(shell) if !shell.trim().is_empty() => shell,
        _ => DEFAULT_SHELL.to_string(),
    }
}

/// True when `command` is one word with nothing a shell would interpret.
pub fn is_single_token(command: &str) -> bool {
    let command = command.trim();
    !command.is_empty()
        && !command.chars().any(char::is_whitespace)
        && !command.contains(SHELL_METACHARACTERS)
}

/// Resolves a single-token command to an executable, either a path to an
/// executable file or a name found on `PATH`.
pub fn resolve_executable(command: &str) -> Option<PathBuf> {
    let command = command.trim();
    if !is_single_token(command) {
        return None;
    }
    if command.contains(std::path::MAIN_SEPARATOR) {
        let path = Path::new(command);
        return is_executable_file(path).then(|| path.to_path_buf());
    }
    which::which(command).ok()
}

#[cfg(unix)]
fn is_executable_file(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    std::fs::metadata(path)
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable_file(path: &Path) -> bool {
    path.is_file()
}

/// Arguments that make `shell` run `command` inline.
pub(crate) fn shell_invocation(shell: &str, command: &str) -> Vec<String> {
    vec![shell.to_string(), "-c".to_string(), command.to_string()]
}

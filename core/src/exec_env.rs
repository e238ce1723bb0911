use tracing::warn;

use crate::params::Args;
use crate::template;

/// Resolves a tool's environment declarations into `NAME=value` assignments.
///
/// Each declaration takes one of three forms:
/// - `NAME` copies the variable from this process. An unset variable still
///   yields `NAME=` so the child sees it defined and empty.
/// - `NAME=literal` is passed through unchanged.
/// - `NAME={{ ... }}` renders the value against `args`, falling back to the
///   unrendered text if rendering fails.
pub fn resolve_env(declarations: &[String], args: &Args) -> Vec<String> {
    declarations
        .iter()
        .filter(|decl| !decl.trim().is_empty())
        .map(|decl| resolve_one(decl.trim(), args))
        .collect()
}

fn resolve_one(decl: &str, args: &Args) -> String {
    let Some((name, value)) = decl.split_once('=') else {
        let inherited = std::env::var(decl).unwrap_or_default();
        return format!("{decl}={inherited}");
    };

    if !value.contains("{{") {
        return decl.to_string();
    }

    match template::render(value, args) {
        Ok(rendered) => format!("{name}={rendered}"),
        Err(e) => {
            warn!("failed to render environment value for {name}: {e}");
            decl.to_string()
        }
    }
}

/// Splits `NAME=value` assignments into pairs, skipping malformed entries.
pub(crate) fn env_pairs(env: &[String]) -> Vec<(String, String)> {
    env.iter()
        .filter_map(|entry| {
            let (name, value) = entry.split_once('=')?;
            if name.is_empty() {
                return None;
            }
            Some((name.to_string(), value.to_string()))
        })
        .collect()
}

//! Root of the `mcpshell-core` library: policy-gated execution of
//! templated commands under a choice of isolation backends.

// Prevent accidental direct writes to stdout/stderr in library code. All
// user-visible output must go through the caller or the tracing stack.
#![deny(clippy::print_stdout, clippy::print_stderr)]

pub mod config;
pub mod constraints;
pub mod docker;
pub mod error;
pub mod exec;
pub mod exec_env;
pub mod firejail;
pub mod handler;
pub mod params;
pub mod protocol;
pub mod registry;
pub mod runner;
pub mod seatbelt;
pub mod shell;
pub mod spawn;
pub mod template;

pub use config::ToolDefinition;
pub use config::ToolsConfig;
pub use error::Result;
pub use error::ToolErr;
pub use handler::ToolHandler;
pub use registry::ToolRegistry;

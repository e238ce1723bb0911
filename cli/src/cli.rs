use std::path::PathBuf;

use clap::Parser;

/// Run configured command-line tools behind constraint checks and sandboxes.
#[derive(Debug, Parser)]
#[command(name = "mcpshell", version)]
pub struct Cli {
    /// Log at debug level unless RUST_LOG says otherwise.
    #[arg(long, short = 'v', global = true, default_value_t = false)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, clap::Subcommand)]
pub enum Command {
    /// Run one tool directly and print its output.
    #[clap(visible_alias = "e")]
    Exe(ExeCommand),

    /// Activate every tool in the file and report the first failure.
    Validate(ToolsFile),

    /// Print the tool specifications as JSON.
    List(ToolsFile),
}

#[derive(Debug, Parser)]
pub struct ToolsFile {
    /// TOML file with the tool definitions.
    #[arg(long = "tools", short = 't', value_name = "FILE")]
    pub tools: PathBuf,
}

#[derive(Debug, Parser)]
pub struct ExeCommand {
    #[clap(flatten)]
    pub tools_file: ToolsFile,

    /// JSON object overriding the tool's runner options for this call.
    #[arg(long = "options", value_name = "JSON")]
    pub options: Option<String>,

    /// Name of the tool to run.
    pub tool: String,

    /// Arguments as `key=value`. Values are parsed as JSON when possible and
    /// passed as strings otherwise.
    #[arg(value_name = "KEY=VALUE")]
    pub args: Vec<String>,
}

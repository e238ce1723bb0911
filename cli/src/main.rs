use clap::Parser;
use mcpshell_cli::Cli;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    mcpshell_cli::run_main(cli).await
}

mod cli;

use anyhow::Result;
use clap::{Parser, Subcommand};
use cli::DaemonOptions;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "dindtest",
    about = "Throwaway Docker-in-Docker daemons for test suites"
)]
struct Cli {
    #[command(flatten)]
    options: DaemonOptions,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start a nested daemon, print its URL and keep it until Ctrl-C
    Up,
    /// Start a nested daemon, ping it through a fresh client, then remove it
    Check,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = cli.options.resolve()?;

    match cli.command {
        Commands::Up => cli::up(config).await,
        Commands::Check => cli::check(config).await,
    }
}

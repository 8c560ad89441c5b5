//! meshgate CLI
//!
//! Runs a transport-setup node and provides helpers for preparing and
//! checking its configuration.

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod commands;

use commands::{check, keygen, run};

#[derive(Parser)]
#[command(name = "meshgate")]
#[command(about = "meshgate - trusted-peer transport setup node", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Config file path
    #[arg(short, long, global = true, default_value = "meshgate.toml")]
    config: PathBuf,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the transport-setup listener until Ctrl+C
    Run(run::RunCommand),

    /// Generate a node key pair and print a config skeleton
    Keygen(keygen::KeygenCommand),

    /// Validate a config file and print what it resolves to
    Check,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::Run(cmd) => run::handle_run_command(cmd, &cli.config).await?,
        Commands::Keygen(cmd) => keygen::handle_keygen_command(cmd)?,
        Commands::Check => check::handle_check_command(&cli.config)?,
    }

    Ok(())
}

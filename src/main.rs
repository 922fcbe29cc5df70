use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod cmd;

#[derive(Parser)]
#[command(name = "testpilot")]
#[command(version, about = "Resumable quality and end-to-end test orchestrator")]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[arg(long, global = true)]
    pub project_dir: Option<PathBuf>,

    /// Path to testpilot.toml (defaults to .testpilot/testpilot.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Path to the state file. Overrides testpilot.toml and TESTPILOT_STATE_FILE.
    #[arg(long, global = true)]
    pub state_file: Option<PathBuf>,

    /// Defaults to `run` when omitted
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the quality and E2E phases, resuming from saved state
    Run,
    /// Show the saved state without running anything
    Status,
    /// Delete the saved state so the next run starts over
    Reset {
        #[arg(long)]
        force: bool,
    },
    /// View or validate configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand, Clone)]
pub enum ConfigCommands {
    /// Show effective configuration
    Show,
    /// Validate configuration and show any warnings
    Validate,
    /// Write a default testpilot.toml
    Init,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    testpilot::telemetry::init_tracing(cli.verbose);

    let project_dir = match cli.project_dir.clone() {
        Some(dir) => dir,
        None => std::env::current_dir().context("Failed to get current directory")?,
    };

    match &cli.command {
        None | Some(Commands::Run) => cmd::run_orchestrator(&cli, project_dir).await?,
        Some(Commands::Status) => cmd::cmd_status(&cli, project_dir)?,
        Some(Commands::Reset { force }) => cmd::cmd_reset(&cli, project_dir, *force)?,
        Some(Commands::Config { command }) => {
            cmd::cmd_config(&cli, project_dir, command.clone())?
        }
    }

    Ok(())
}

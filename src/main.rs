use std::fs::OpenOptions;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::{fmt, EnvFilter};

use pcron::presentation::cli::commands::{CheckCommand, RunCommand, RunJobCommand};
use pcron::presentation::cli::{Cli, Commands};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let directory = cli.resolve_directory()?;

    let filter = if cli.verbose {
        EnvFilter::new("pcron=debug,info")
    } else {
        EnvFilter::new("pcron=info")
    };

    match &cli.command {
        Commands::Run { foreground } => {
            // Log lines keep their module target so records are tagged with
            // the component they came from.
            if *foreground {
                fmt()
                    .with_env_filter(filter)
                    .with_ansi(false)
                    .with_writer(std::io::stderr)
                    .init();
            } else {
                std::fs::create_dir_all(&directory)
                    .with_context(|| format!("failed to create {}", directory.display()))?;
                let log_file = OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(directory.join("logfile.txt"))
                    .context("cannot open log file")?;
                fmt()
                    .with_env_filter(filter)
                    .with_ansi(false)
                    .with_writer(Arc::new(log_file))
                    .init();
            }
            RunCommand::execute(&directory).await
        }
        Commands::Check { dump } => {
            fmt()
                .with_env_filter(filter)
                .with_target(false)
                .with_writer(std::io::stderr)
                .init();
            CheckCommand::execute(&directory, *dump)
        }
        Commands::RunJob { job } => {
            fmt()
                .with_env_filter(filter)
                .with_target(false)
                .with_writer(std::io::stderr)
                .init();
            RunJobCommand::execute(&directory, job)
        }
    }
}

pub mod commands;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "pcron")]
#[command(version)]
#[command(about = "Per-user periodic command runner", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    #[arg(
        short,
        long,
        value_name = "DIR",
        help = "Configuration directory (default: $PCRONDIR, else ~/.pcron)"
    )]
    pub directory: Option<PathBuf>,

    #[arg(short, long)]
    pub verbose: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    #[command(about = "Run the scheduling engine")]
    Run {
        #[arg(short, long, help = "Log to stderr instead of the log file")]
        foreground: bool,
    },

    #[command(about = "Validate the catalog and print a summary")]
    Check {
        #[arg(long, help = "Print the fully-resolved catalog")]
        dump: bool,
    },

    #[command(about = "Run a single job immediately", name = "run-job")]
    RunJob {
        #[arg(value_name = "JOB", help = "Job id from the catalog")]
        job: String,
    },
}

impl Cli {
    /// Resolves the configuration directory: the flag wins, then the
    /// `PCRONDIR` environment variable, then `~/.pcron`.
    pub fn resolve_directory(&self) -> Result<PathBuf> {
        if let Some(directory) = &self.directory {
            return Ok(directory.clone());
        }
        if let Ok(directory) = std::env::var("PCRONDIR") {
            if !directory.is_empty() {
                return Ok(PathBuf::from(directory));
            }
        }
        let home = std::env::var("HOME").context("HOME is not set; use --directory")?;
        Ok(PathBuf::from(home).join(".pcron"))
    }
}

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// prodstack - production install for a PHP web application stack
#[derive(Parser)]
#[command(name = "prodstack")]
#[command(about = "Provision database, queue workers, scheduler and web server for a production app")]
#[command(version)]
pub struct Cli {
    /// Dry-run mode: show what would be executed without making changes.
    ///
    /// Mutating commands (package installs, service reloads, file writes)
    /// are logged and skipped. Read-only probes still execute so the
    /// requirement report stays accurate.
    #[arg(long, global = true)]
    pub dry_run: bool,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the production install
    Install {
        /// Configuration file (defaults apply when omitted)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// JSON array of prompt answers for unattended runs
        #[arg(short, long)]
        answers: Option<PathBuf>,
    },
    /// Check host requirements only
    Check {
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
    /// Validate a configuration file
    Validate {
        /// Path to configuration file to validate
        config: PathBuf,
    },
}

impl Cli {
    pub fn parse_args() -> Self {
        <Self as clap::Parser>::parse()
    }
}

use std::path::PathBuf;

use clap::{ArgAction, Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(name = "elif-migrate")]
#[command(version, about = "Schema migrations for elif.rs projects")]
pub struct Cli {
    /// Configuration file (defaults to elif-migrations.yaml in the project directory)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Data context to use
    #[arg(long, short = 'c', global = true)]
    pub context: Option<String>,

    /// Project directory
    #[arg(long, global = true, default_value = ".")]
    pub project_dir: PathBuf,

    /// Namespace prefix recorded in scaffolded migrations
    #[arg(long, global = true)]
    pub root_namespace: Option<String>,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(long, short, global = true, action = ArgAction::Count)]
    pub verbose: u8,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    pub json_logs: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Scaffold a new migration from model changes
    Add {
        /// Migration name
        name: String,
    },

    /// List migrations
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Generate a SQL script
    Script {
        /// Starting migration (defaults to the initial database)
        #[arg(long)]
        from: Option<String>,

        /// Ending migration (defaults to the latest migration)
        #[arg(long)]
        to: Option<String>,

        /// Guard every migration so the script can be re-run
        #[arg(long)]
        idempotent: bool,

        /// Write the script to a file instead of stdout
        #[arg(long, short)]
        output: Option<PathBuf>,
    },

    /// Update the database to a migration
    Update {
        /// Target migration (defaults to the latest; "0" reverts everything)
        target: Option<String>,
    },

    /// Remove the latest migration
    Remove,
}

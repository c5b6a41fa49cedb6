//! batchfetch CLI - Command-line interface
//!
//! Downloads single files or manifest-driven batches with the batchfetch
//! library.

mod commands;
mod error;
mod manifest;
mod runner;

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use commands::batch::BatchArgs;
use commands::config::ConfigAction;
use commands::get::GetArgs;
use error::CliError;
use runner::CliRunner;

#[derive(Parser)]
#[command(name = "batchfetch")]
#[command(version, about = "Concurrent batch file downloader", long_about = None)]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,

    #[command(subcommand)]
    command: Commands,
}

/// Options shared by every command.
#[derive(Args, Debug, Default)]
pub struct GlobalArgs {
    /// Connection timeout in seconds (overrides config)
    #[arg(long, global = true)]
    pub timeout: Option<u64>,

    /// Maximum files open at once per batch group (overrides config)
    #[arg(long, global = true)]
    pub max_open_files: Option<usize>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Download one URL to a file
    Get {
        /// Source URL
        url: String,

        /// Destination file path
        dest: PathBuf,

        /// Correlation id reported in output (defaults to the file name)
        #[arg(long)]
        id: Option<String>,
    },

    /// Download every unit listed in a manifest file
    Batch {
        /// Manifest path: one `<id> <url> <destination> [resume] [sha256=HEX]` per line
        manifest: PathBuf,

        /// Batch id
        #[arg(long, default_value = "batch")]
        id: String,
    },

    /// Inspect the configuration file
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Print the config file location
    Path,
    /// Print the effective settings
    Show,
    /// Write a config file with default settings
    Init,
}

fn main() {
    let cli = Cli::parse();

    if let Err(e) = run(cli) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<(), CliError> {
    match cli.command {
        Commands::Get { url, dest, id } => {
            let runner = CliRunner::new(&cli.global)?;
            commands::get::run(&runner, GetArgs { url, dest, id })
        }
        Commands::Batch { manifest, id } => {
            let runner = CliRunner::new(&cli.global)?;
            commands::batch::run(&runner, BatchArgs { manifest, id })
        }
        Commands::Config { command } => commands::config::run(match command {
            ConfigCommands::Path => ConfigAction::Path,
            ConfigCommands::Show => ConfigAction::Show,
            ConfigCommands::Init => ConfigAction::Init,
        }),
    }
}

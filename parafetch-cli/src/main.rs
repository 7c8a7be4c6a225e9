//! Parafetch command-line interface.

mod commands;
mod error;
mod logging;
mod ui;

use std::path::PathBuf;

use clap::{ArgAction, Parser, Subcommand};

use commands::config::ConfigCommands;
use commands::get::GetArgs;

#[derive(Debug, Parser)]
#[command(name = "parafetch")]
#[command(version, about = "Resumable multi-connection downloads", long_about = None)]
struct Cli {
    /// Increase log verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    /// Use this configuration file instead of the default
    #[arg(long, value_name = "PATH", global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Download one or more URLs
    Get(GetArgs),

    /// View or change saved defaults
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

fn main() {
    let cli = Cli::parse();
    logging::init(cli.verbose);

    let config_path = cli.config.as_deref();
    let result = match cli.command {
        Commands::Get(args) => commands::get::run(args, config_path),
        Commands::Config { command } => commands::config::run(command, config_path),
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(e.exit_code());
    }
}

//! burrow - VPN client for the olm tunnel engine
//!
//! Runs a tunnel session in the foreground and keeps the host interface,
//! the engine and the network path in agreement.

use burrow_core::{error::BurrowError, init_logging, types::PowerMode};
use clap::{Parser, Subcommand};

mod cli;

#[derive(Parser)]
#[command(name = "burrow")]
#[command(about = "VPN client that keeps the tunnel, the engine and the network path in sync")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Bring the tunnel up and stay in the foreground until Ctrl+C
    Up {
        /// Engine power mode to switch to once the tunnel has started
        #[arg(long, value_name = "low|normal")]
        power_mode: Option<PowerMode>,

        /// Log level handed to the engine
        #[arg(long, default_value = "info")]
        engine_log_level: String,
    },
    /// Manage the configuration file (init/show/validate)
    Config {
        #[command(subcommand)]
        action: ConfigCommands,
    },
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Create the configuration interactively
    Init,
    /// Print the active configuration
    Show,
    /// Check the configuration file and environment
    Validate,
}

fn main() {
    if let Err(e) = init_logging() {
        eprintln!("Failed to initialize logging: {}", e);
        std::process::exit(2);
    }

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Up {
            power_mode,
            engine_log_level,
        } => cli::up::run_up(power_mode, &engine_log_level),
        Commands::Config { action } => match action {
            ConfigCommands::Init => cli::config::run_config_init(),
            ConfigCommands::Show => cli::config::run_config_show(),
            ConfigCommands::Validate => cli::config::run_config_validate(),
        },
    };

    match result {
        Ok(()) => std::process::exit(0),
        Err(e) => {
            let exit_code = match e {
                // Configuration errors (exit code 2)
                BurrowError::Config(_) | BurrowError::Toml(_) | BurrowError::TomlSerialize(_) => 2,
                BurrowError::Engine(burrow_core::error::EngineError::InvalidConfig { .. }) => 2,
                // Runtime errors (exit code 1)
                BurrowError::Engine(_)
                | BurrowError::Tunnel(_)
                | BurrowError::Settings(_)
                | BurrowError::Io(_) => 1,
            };

            eprintln!("{}", e);
            std::process::exit(exit_code);
        }
    }
}

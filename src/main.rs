//! tagbridge CLI entry point.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use tagbridge::config::NodeConfig;
use tagbridge::node::AcquisitionNode;

/// Real-time data-acquisition and control bridge
#[derive(Parser, Debug)]
#[command(name = "tagbridge", version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run an acquisition node
    Run {
        /// Configuration file path
        config: PathBuf,
    },

    /// Validate a configuration file without starting anything
    Check {
        /// Configuration file path
        config: PathBuf,
    },

    /// Print an example configuration
    ExampleConfig,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Run { config } => {
            let config = match NodeConfig::load(&config) {
                Ok(config) => config,
                Err(e) => {
                    eprintln!("Error: {}", e);
                    return ExitCode::FAILURE;
                }
            };
            if let Err(e) = AcquisitionNode::new(config).run().await {
                eprintln!("Error: {}", e);
                return ExitCode::FAILURE;
            }
            ExitCode::SUCCESS
        }
        Commands::Check { config } => match NodeConfig::load(&config) {
            Ok(parsed) => {
                println!(
                    "OK: node {:?}, {} pmu device(s), {} modbus register(s), {} write-back tag(s)",
                    parsed.node.name,
                    parsed.pmu.len(),
                    parsed.modbus.as_ref().map_or(0, |m| m.registers.len()),
                    parsed.writeback.as_ref().map_or(0, |w| w.tags.len()),
                );
                ExitCode::SUCCESS
            }
            Err(e) => {
                eprintln!("Error: {}", e);
                ExitCode::FAILURE
            }
        },
        Commands::ExampleConfig => {
            println!("{}", NodeConfig::example());
            ExitCode::SUCCESS
        }
    }
}

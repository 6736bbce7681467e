//! CLI Definitions
//!
//! Command-line surface for the Kestrel trading agent.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Kestrel - AI-assisted perpetual futures trading agent for OKX
#[derive(Parser, Debug)]
#[command(
    name = "kestrel",
    version = env!("CARGO_PKG_VERSION"),
    about = "AI-assisted perpetual futures trading agent for OKX",
    long_about = "Kestrel runs a fixed-cadence trading loop: it snapshots a basket of \
                  perpetual swaps, asks an inference oracle for decisions, clamps them \
                  against hard risk limits, executes the survivors on OKX and persists \
                  every outcome to a crash-safe state file."
)]
pub struct CliApp {
    /// The command to execute
    #[command(subcommand)]
    pub command: Command,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Enable debug logging
    #[arg(long, global = true)]
    pub debug: bool,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start the trading loop
    Run(RunCmd),

    /// Show account value and open positions from the state file
    Status(StatusCmd),

    /// Print the performance summary and exit
    Performance(PerformanceCmd),

    /// Destroy history and reinitialize the trading state
    Reset(ResetCmd),

    /// Export trading history and performance to a JSON file
    Export(ExportCmd),
}

/// Start the trading loop
#[derive(Parser, Debug)]
pub struct RunCmd {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE", default_value = "config/default.toml")]
    pub config: PathBuf,

    /// Override the cycle interval in minutes
    #[arg(long, value_name = "MINUTES")]
    pub interval: Option<u64>,

    /// Route orders to OKX's simulated-trading environment
    #[arg(long)]
    pub sandbox: bool,

    /// Analysis only: validate decisions but never execute them
    #[arg(long)]
    pub analyze: bool,

    /// Replace the oracle with the no-decision stub (implies offline analysis)
    #[arg(long)]
    pub offline: bool,

    /// Log full oracle prompts and responses
    #[arg(long)]
    pub log_oracle: bool,

    /// Initial account value when no state file exists yet
    #[arg(long, value_name = "USD")]
    pub initial_value: Option<f64>,
}

/// Show current status
#[derive(Parser, Debug)]
pub struct StatusCmd {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE", default_value = "config/default.toml")]
    pub config: PathBuf,
}

/// Print performance summary
#[derive(Parser, Debug)]
pub struct PerformanceCmd {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE", default_value = "config/default.toml")]
    pub config: PathBuf,
}

/// Reset trading state
#[derive(Parser, Debug)]
pub struct ResetCmd {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE", default_value = "config/default.toml")]
    pub config: PathBuf,

    /// New initial account value (defaults to the configured one)
    #[arg(long, value_name = "USD")]
    pub initial_value: Option<f64>,

    /// Skip the confirmation prompt
    #[arg(short = 'y', long)]
    pub yes: bool,
}

/// Export history
#[derive(Parser, Debug)]
pub struct ExportCmd {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE", default_value = "config/default.toml")]
    pub config: PathBuf,

    /// Output file
    #[arg(short, long, value_name = "FILE", default_value = "trading_history_export.json")]
    pub output: PathBuf,
}

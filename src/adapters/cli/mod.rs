//! CLI Adapter

mod commands;

pub use commands::{
    CliApp, Command, ExportCmd, PerformanceCmd, ResetCmd, RunCmd, StatusCmd,
};

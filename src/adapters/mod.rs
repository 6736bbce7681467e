//! Adapters Layer - Implementations of the ports against real services
//!
//! - `okx`: signed REST market data and execution
//! - `oracle`: chat-completions decision oracle + offline stub
//! - `blacklist`: 24h-volume eligibility filter
//! - `cli`: command-line surface

pub mod blacklist;
pub mod cli;
pub mod okx;
pub mod oracle;

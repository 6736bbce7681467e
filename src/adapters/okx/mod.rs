//! OKX Adapter
//!
//! REST integration with the OKX v5 API: signed client, market data pulls
//! with derived indicators, and order execution.

mod client;
mod execution;
pub mod indicators;
mod market_data;

pub use client::{CredentialError, OkxClient, OkxConfig, OkxCredentials};
pub use execution::OkxExecution;
pub use market_data::OkxMarketData;

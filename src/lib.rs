//! Kestrel - AI-assisted perpetual futures trading agent for OKX
//!
//! A fixed-cadence decision-validate-execute-persist loop: market
//! snapshots go to an inference oracle, the oracle's decisions are clamped
//! against hard risk limits, the survivors are executed on the exchange
//! and every outcome lands in a crash-safe JSON ledger.
//!
//! # Modules
//!
//! - `domain`: Core business logic (decisions, risk, positions, ledger, state store)
//! - `ports`: Trait abstractions (MarketDataPort, OraclePort, ExchangePort, EligibilityPort)
//! - `adapters`: External implementations (OKX, DeepSeek oracle, blacklist, CLI)
//! - `application`: Execution engine and loop controller
//! - `config`: Configuration loading and validation

pub mod adapters;
pub mod application;
pub mod config;
pub mod domain;
pub mod ports;

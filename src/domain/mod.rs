//! Domain Layer - Core business logic for the Kestrel trading agent
//!
//! This module contains pure domain types and logic with no external
//! dependencies. All external interactions happen through the ports layer.
//!
//! The decision-validate-execute-persist loop lives on these types:
//! - `decision` / `market`: what the oracle sees and proposes
//! - `risk`: the pure accept/clamp/reject constraint model
//! - `position` / `account` / `trade`: open exposure and the closed ledger
//! - `state` / `state_store`: the durable aggregate and its crash recovery
//! - `performance`: metrics re-derived from the ledger on demand

pub mod account;
pub mod decision;
pub mod instrument;
pub mod market;
pub mod performance;
pub mod position;
pub mod risk;
pub mod state;
pub mod state_store;
pub mod trade;

pub use account::AccountState;
pub use decision::{Decision, Side};
pub use instrument::Instrument;
pub use market::{AccountSummary, MarketSnapshot, PositionSummary};
pub use performance::{analyze, PerformanceReport};
pub use position::{Position, PositionError};
pub use risk::{Assessment, Instruction, OpenOrder, RiskLimits, RiskManager, Verdict};
pub use state::{SessionMarker, TradingState};
pub use state_store::{StateError, StateStore, DEFAULT_STATE_FILE};
pub use trade::{TradeOutcome, TradeRecord};

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::decision::Side;
use crate::domain::instrument::Instrument;

#[derive(Debug, Error)]
pub enum ExchangeError {
    #[error("Exchange request failed: {0}")]
    Network(String),
    #[error("Exchange request timed out")]
    Timeout,
    #[error("Rate limited by exchange")]
    RateLimited,
    #[error("Exchange API error {code}: {message}")]
    Api { code: String, message: String },
    #[error("Order rejected: {0}")]
    Rejected(String),
    #[error("Malformed exchange response: {0}")]
    Malformed(String),
}

impl ExchangeError {
    /// Whether retrying the same request can reasonably succeed
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ExchangeError::Network(_) | ExchangeError::Timeout | ExchangeError::RateLimited
        )
    }
}

/// Actual execution outcome reported by the exchange. Fill price and size
/// may differ from the requested values due to slippage; callers must use
/// these, never the requested targets.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderFill {
    pub order_id: String,
    pub price: f64,
    pub size: f64,
}

/// A position as the exchange reports it. The exchange is the source of
/// truth for position existence.
#[derive(Debug, Clone, PartialEq)]
pub struct LivePosition {
    pub symbol: String,
    pub side: Side,
    pub size: f64,
    pub entry_price: f64,
    pub leverage: u32,
    pub unrealized_pnl: f64,
}

#[async_trait]
pub trait ExchangePort: Send + Sync {
    /// Set the leverage used for subsequent orders on this contract
    async fn set_leverage(&self, instrument: &Instrument, leverage: u32)
        -> Result<(), ExchangeError>;

    /// Submit a market order; `size` is in coins, already rounded to the
    /// contract's lot size
    async fn place_market_order(
        &self,
        instrument: &Instrument,
        side: Side,
        size: f64,
    ) -> Result<OrderFill, ExchangeError>;

    /// Fully close any open position on the contract
    async fn close_position(&self, instrument: &Instrument) -> Result<OrderFill, ExchangeError>;

    /// Query the live position, `None` when flat
    async fn fetch_position(
        &self,
        instrument: &Instrument,
    ) -> Result<Option<LivePosition>, ExchangeError>;
}

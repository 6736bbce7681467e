use async_trait::async_trait;
use thiserror::Error;

use crate::domain::instrument::Instrument;
use crate::domain::market::MarketSnapshot;

#[derive(Debug, Error)]
pub enum DataError {
    #[error("Market data unavailable: {0}")]
    Unavailable(String),
    #[error("Market data request timed out")]
    Timeout,
    #[error("Malformed market data: {0}")]
    Malformed(String),
}

/// Pull interface for per-instrument market state. A failed pull is a
/// transient condition scoped to that instrument: the cycle continues for
/// the rest of the basket.
#[async_trait]
pub trait MarketDataPort: Send + Sync {
    async fn snapshot(&self, instrument: &Instrument) -> Result<MarketSnapshot, DataError>;
}

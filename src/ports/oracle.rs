use async_trait::async_trait;
use thiserror::Error;

use crate::domain::decision::Decision;
use crate::domain::market::{AccountSummary, MarketSnapshot};

#[derive(Debug, Error)]
pub enum OracleError {
    /// Network failure or timeout reaching the inference service
    #[error("Oracle unavailable: {0}")]
    Unavailable(String),
    /// The response could not be decoded into any decisions at all.
    /// Single malformed entries degrade only their instrument and do not
    /// produce this error.
    #[error("Oracle response malformed: {0}")]
    Malformed(String),
}

/// The decision oracle: given fresh snapshots and an account summary,
/// propose one decision per instrument. Implementations must return at
/// most one decision per snapshot instrument; instruments the oracle is
/// silent about are treated as flat by the caller.
#[async_trait]
pub trait OraclePort: Send + Sync {
    async fn propose(
        &self,
        snapshots: &[MarketSnapshot],
        account: &AccountSummary,
    ) -> Result<Vec<Decision>, OracleError>;
}

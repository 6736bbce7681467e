//! Stub Oracle
//!
//! A no-decision oracle for offline and dry analysis runs: every
//! instrument comes back flat. The loop controller exercises it exactly
//! like the real adapter.

use async_trait::async_trait;

use crate::domain::decision::Decision;
use crate::domain::market::{AccountSummary, MarketSnapshot};
use crate::ports::oracle::{OracleError, OraclePort};

#[derive(Debug, Default)]
pub struct StubOracle;

impl StubOracle {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl OraclePort for StubOracle {
    async fn propose(
        &self,
        snapshots: &[MarketSnapshot],
        _account: &AccountSummary,
    ) -> Result<Vec<Decision>, OracleError> {
        tracing::debug!(
            instruments = snapshots.len(),
            "stub oracle returning flat for all instruments"
        );
        Ok(snapshots.iter().map(|s| Decision::flat(&s.symbol)).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::decision::Side;
    use crate::ports::mocks::snapshot;

    #[tokio::test]
    async fn test_stub_returns_flat_per_snapshot() {
        let oracle = StubOracle::new();
        let snaps = vec![snapshot("BTC", 50000.0), snapshot("ETH", 3000.0)];
        let account = AccountSummary {
            total_value: 10000.0,
            available_margin: 10000.0,
            total_return_pct: 0.0,
            open_positions: vec![],
            oracle_calls: 0,
            minutes_since_start: 0,
        };

        let decisions = oracle.propose(&snaps, &account).await.unwrap();
        assert_eq!(decisions.len(), 2);
        assert!(decisions.iter().all(|d| d.side == Side::Flat));
    }
}

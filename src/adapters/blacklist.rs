//! Volume Blacklist
//!
//! Eligibility filter excluding instruments whose 24h traded volume sits
//! under a configured floor. Each instrument's verdict is cached and
//! rechecked once per configured interval (daily by default); the
//! bookkeeping is entirely internal to this adapter.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::domain::instrument::Instrument;
use crate::ports::eligibility::EligibilityPort;
use crate::ports::market_data::MarketDataPort;

#[derive(Debug, Clone)]
pub struct BlacklistConfig {
    pub min_volume_usd: f64,
    pub recheck_interval: Duration,
}

impl Default for BlacklistConfig {
    fn default() -> Self {
        Self {
            min_volume_usd: 1_000_000.0,
            recheck_interval: Duration::hours(24),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Verdict {
    eligible: bool,
    checked_at: DateTime<Utc>,
}

pub struct VolumeBlacklist {
    config: BlacklistConfig,
    market: Arc<dyn MarketDataPort>,
    verdicts: Mutex<HashMap<String, Verdict>>,
}

impl VolumeBlacklist {
    pub fn new(config: BlacklistConfig, market: Arc<dyn MarketDataPort>) -> Self {
        Self {
            config,
            market,
            verdicts: Mutex::new(HashMap::new()),
        }
    }

    fn cached(&self, symbol: &str) -> Option<Verdict> {
        self.verdicts.lock().unwrap().get(symbol).copied()
    }

    fn remember(&self, symbol: &str, eligible: bool) {
        self.verdicts.lock().unwrap().insert(
            symbol.to_string(),
            Verdict {
                eligible,
                checked_at: Utc::now(),
            },
        );
    }
}

#[async_trait]
impl EligibilityPort for VolumeBlacklist {
    async fn is_eligible(&self, instrument: &Instrument) -> bool {
        if let Some(verdict) = self.cached(&instrument.symbol) {
            if Utc::now() - verdict.checked_at < self.config.recheck_interval {
                return verdict.eligible;
            }
        }

        match self.market.snapshot(instrument).await {
            Ok(snapshot) => {
                let eligible = snapshot.volume_24h >= self.config.min_volume_usd;
                if !eligible {
                    tracing::info!(
                        symbol = %instrument.symbol,
                        volume = snapshot.volume_24h,
                        floor = self.config.min_volume_usd,
                        "instrument blacklisted on 24h volume"
                    );
                }
                self.remember(&instrument.symbol, eligible);
                eligible
            }
            Err(e) => {
                // A data failure is not evidence of low volume; keep the
                // previous verdict, defaulting to eligible
                tracing::warn!(symbol = %instrument.symbol, error = %e, "volume check failed");
                self.cached(&instrument.symbol)
                    .map(|v| v.eligible)
                    .unwrap_or(true)
            }
        }
    }
}

/// Pass-through filter used when the blacklist is disabled
#[derive(Debug, Default)]
pub struct AllowAll;

#[async_trait]
impl EligibilityPort for AllowAll {
    async fn is_eligible(&self, _instrument: &Instrument) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::instrument::default_basket;
    use crate::domain::market::MarketSnapshot;
    use crate::ports::market_data::DataError;

    mockall::mock! {
        Market {}

        #[async_trait]
        impl MarketDataPort for Market {
            async fn snapshot(&self, instrument: &Instrument) -> Result<MarketSnapshot, DataError>;
        }
    }

    fn btc() -> Instrument {
        default_basket().into_iter().find(|i| i.symbol == "BTC").unwrap()
    }

    fn snapshot_with_volume(volume: f64) -> MarketSnapshot {
        let mut snap = crate::ports::mocks::snapshot("BTC", 50000.0);
        snap.volume_24h = volume;
        snap
    }

    fn config() -> BlacklistConfig {
        BlacklistConfig {
            min_volume_usd: 1_000_000.0,
            recheck_interval: Duration::hours(24),
        }
    }

    #[tokio::test]
    async fn test_high_volume_is_eligible() {
        let mut market = MockMarket::new();
        market
            .expect_snapshot()
            .times(1)
            .returning(|_| Ok(snapshot_with_volume(5_000_000.0)));

        let blacklist = VolumeBlacklist::new(config(), Arc::new(market));
        assert!(blacklist.is_eligible(&btc()).await);
    }

    #[tokio::test]
    async fn test_low_volume_is_excluded() {
        let mut market = MockMarket::new();
        market
            .expect_snapshot()
            .times(1)
            .returning(|_| Ok(snapshot_with_volume(10_000.0)));

        let blacklist = VolumeBlacklist::new(config(), Arc::new(market));
        assert!(!blacklist.is_eligible(&btc()).await);
    }

    #[tokio::test]
    async fn test_verdict_is_cached_within_interval() {
        let mut market = MockMarket::new();
        // One data pull serves both checks
        market
            .expect_snapshot()
            .times(1)
            .returning(|_| Ok(snapshot_with_volume(10_000.0)));

        let blacklist = VolumeBlacklist::new(config(), Arc::new(market));
        assert!(!blacklist.is_eligible(&btc()).await);
        assert!(!blacklist.is_eligible(&btc()).await);
    }

    #[tokio::test]
    async fn test_recheck_after_interval_elapses() {
        let mut market = MockMarket::new();
        market
            .expect_snapshot()
            .times(2)
            .returning(|_| Ok(snapshot_with_volume(5_000_000.0)));

        let blacklist = VolumeBlacklist::new(
            BlacklistConfig {
                min_volume_usd: 1_000_000.0,
                recheck_interval: Duration::zero(),
            },
            Arc::new(market),
        );
        assert!(blacklist.is_eligible(&btc()).await);
        assert!(blacklist.is_eligible(&btc()).await);
    }

    #[tokio::test]
    async fn test_data_failure_defaults_to_eligible() {
        let mut market = MockMarket::new();
        market
            .expect_snapshot()
            .returning(|_| Err(DataError::Unavailable("down".to_string())));

        let blacklist = VolumeBlacklist::new(config(), Arc::new(market));
        assert!(blacklist.is_eligible(&btc()).await);
    }

    #[tokio::test]
    async fn test_data_failure_keeps_previous_verdict() {
        let mut market = MockMarket::new();
        let mut calls = 0;
        market.expect_snapshot().returning(move |_| {
            calls += 1;
            if calls == 1 {
                Ok(snapshot_with_volume(10_000.0))
            } else {
                Err(DataError::Timeout)
            }
        });

        let blacklist = VolumeBlacklist::new(
            BlacklistConfig {
                min_volume_usd: 1_000_000.0,
                recheck_interval: Duration::zero(),
            },
            Arc::new(market),
        );
        assert!(!blacklist.is_eligible(&btc()).await);
        // The failed recheck must not flip a blacklisted instrument back on
        assert!(!blacklist.is_eligible(&btc()).await);
    }
}

//! Hand-rolled port mocks used by application and integration tests.
//! Each mock records its calls and serves responses configured up front.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};

use crate::domain::decision::{Decision, Side};
use crate::domain::instrument::Instrument;
use crate::domain::market::{AccountSummary, MarketSnapshot};

use super::eligibility::EligibilityPort;
use super::exchange::{ExchangeError, ExchangePort, LivePosition, OrderFill};
use super::market_data::{DataError, MarketDataPort};
use super::oracle::{OracleError, OraclePort};

/// Build a plausible snapshot for tests
pub fn snapshot(symbol: &str, price: f64) -> MarketSnapshot {
    MarketSnapshot {
        symbol: symbol.to_string(),
        last_price: price,
        ema20: price * 0.99,
        macd: 0.5,
        rsi14: 55.0,
        atr14: price * 0.01,
        funding_rate: 0.0001,
        volume_24h: 5_000_000.0,
        recent_closes: vec![price * 0.99, price * 0.995, price],
        timestamp: Utc::now(),
    }
}

/// Market data mock serving fixed prices per symbol
#[derive(Default)]
pub struct MockMarketData {
    prices: Mutex<HashMap<String, f64>>,
    failing: Mutex<HashSet<String>>,
    calls: Arc<Mutex<Vec<String>>>,
}

impl MockMarketData {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_price(self, symbol: &str, price: f64) -> Self {
        self.prices.lock().unwrap().insert(symbol.to_string(), price);
        self
    }

    /// Make snapshots for this symbol fail with `DataError::Unavailable`
    pub fn with_failure(self, symbol: &str) -> Self {
        self.failing.lock().unwrap().insert(symbol.to_string());
        self
    }

    pub fn set_price(&self, symbol: &str, price: f64) {
        self.prices.lock().unwrap().insert(symbol.to_string(), price);
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl MarketDataPort for MockMarketData {
    async fn snapshot(&self, instrument: &Instrument) -> Result<MarketSnapshot, DataError> {
        self.calls.lock().unwrap().push(instrument.symbol.clone());
        if self.failing.lock().unwrap().contains(&instrument.symbol) {
            return Err(DataError::Unavailable("mock failure".to_string()));
        }
        let price = self
            .prices
            .lock()
            .unwrap()
            .get(&instrument.symbol)
            .copied()
            .ok_or_else(|| DataError::Unavailable("no price configured".to_string()))?;
        Ok(snapshot(&instrument.symbol, price))
    }
}

/// Oracle mock replaying scripted decision batches in order; empty script
/// means every instrument is flat
#[derive(Default)]
pub struct MockOracle {
    responses: Mutex<VecDeque<Result<Vec<Decision>, OracleError>>>,
    calls: Arc<Mutex<Vec<Vec<String>>>>,
}

impl MockOracle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_decisions(self, decisions: Vec<Decision>) -> Self {
        self.responses.lock().unwrap().push_back(Ok(decisions));
        self
    }

    pub fn with_error(self, error: OracleError) -> Self {
        self.responses.lock().unwrap().push_back(Err(error));
        self
    }

    /// Symbols of the snapshots passed on each call
    pub fn calls(&self) -> Vec<Vec<String>> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl OraclePort for MockOracle {
    async fn propose(
        &self,
        snapshots: &[MarketSnapshot],
        _account: &AccountSummary,
    ) -> Result<Vec<Decision>, OracleError> {
        self.calls
            .lock()
            .unwrap()
            .push(snapshots.iter().map(|s| s.symbol.clone()).collect());
        match self.responses.lock().unwrap().pop_front() {
            Some(result) => result,
            None => Ok(snapshots.iter().map(|s| Decision::flat(&s.symbol)).collect()),
        }
    }
}

/// What the exchange mock did, in order
#[derive(Debug, Clone, PartialEq)]
pub enum ExchangeCall {
    SetLeverage(String, u32),
    Order(String, Side, f64),
    Close(String),
    FetchPosition(String),
}

/// Exchange mock: fills orders at configured prices, can fail the next N
/// calls per symbol, and serves scripted live positions
#[derive(Default)]
pub struct MockExchange {
    fill_prices: Mutex<HashMap<String, f64>>,
    failures_remaining: Mutex<HashMap<String, u32>>,
    positions: Mutex<HashMap<String, LivePosition>>,
    calls: Arc<Mutex<Vec<ExchangeCall>>>,
    next_order_id: Mutex<u64>,
}

impl MockExchange {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_fill_price(self, symbol: &str, price: f64) -> Self {
        self.fill_prices
            .lock()
            .unwrap()
            .insert(symbol.to_string(), price);
        self
    }

    /// Fail the next `count` order/close calls for the symbol with a
    /// transient error before succeeding
    pub fn with_transient_failures(self, symbol: &str, count: u32) -> Self {
        self.failures_remaining
            .lock()
            .unwrap()
            .insert(symbol.to_string(), count);
        self
    }

    pub fn with_live_position(self, position: LivePosition) -> Self {
        self.positions
            .lock()
            .unwrap()
            .insert(position.symbol.clone(), position);
        self
    }

    pub fn calls(&self) -> Vec<ExchangeCall> {
        self.calls.lock().unwrap().clone()
    }

    fn consume_failure(&self, symbol: &str) -> bool {
        let mut failures = self.failures_remaining.lock().unwrap();
        if let Some(remaining) = failures.get_mut(symbol) {
            if *remaining > 0 {
                *remaining -= 1;
                return true;
            }
        }
        false
    }

    fn fill(&self, symbol: &str, size: f64) -> Result<OrderFill, ExchangeError> {
        let price = self
            .fill_prices
            .lock()
            .unwrap()
            .get(symbol)
            .copied()
            .ok_or_else(|| ExchangeError::Rejected("no fill price configured".to_string()))?;
        let mut id = self.next_order_id.lock().unwrap();
        *id += 1;
        Ok(OrderFill {
            order_id: format!("mock-{}", *id),
            price,
            size,
        })
    }
}

#[async_trait]
impl ExchangePort for MockExchange {
    async fn set_leverage(
        &self,
        instrument: &Instrument,
        leverage: u32,
    ) -> Result<(), ExchangeError> {
        self.calls
            .lock()
            .unwrap()
            .push(ExchangeCall::SetLeverage(instrument.symbol.clone(), leverage));
        Ok(())
    }

    async fn place_market_order(
        &self,
        instrument: &Instrument,
        side: Side,
        size: f64,
    ) -> Result<OrderFill, ExchangeError> {
        self.calls
            .lock()
            .unwrap()
            .push(ExchangeCall::Order(instrument.symbol.clone(), side, size));
        if self.consume_failure(&instrument.symbol) {
            return Err(ExchangeError::Timeout);
        }
        let fill = self.fill(&instrument.symbol, size)?;
        self.positions.lock().unwrap().insert(
            instrument.symbol.clone(),
            LivePosition {
                symbol: instrument.symbol.clone(),
                side,
                size,
                entry_price: fill.price,
                leverage: 1,
                unrealized_pnl: 0.0,
            },
        );
        Ok(fill)
    }

    async fn close_position(&self, instrument: &Instrument) -> Result<OrderFill, ExchangeError> {
        self.calls
            .lock()
            .unwrap()
            .push(ExchangeCall::Close(instrument.symbol.clone()));
        if self.consume_failure(&instrument.symbol) {
            return Err(ExchangeError::Timeout);
        }
        let size = self
            .positions
            .lock()
            .unwrap()
            .get(&instrument.symbol)
            .map(|p| p.size)
            .unwrap_or(0.0);
        let fill = self.fill(&instrument.symbol, size)?;
        self.positions.lock().unwrap().remove(&instrument.symbol);
        Ok(fill)
    }

    async fn fetch_position(
        &self,
        instrument: &Instrument,
    ) -> Result<Option<LivePosition>, ExchangeError> {
        self.calls
            .lock()
            .unwrap()
            .push(ExchangeCall::FetchPosition(instrument.symbol.clone()));
        Ok(self
            .positions
            .lock()
            .unwrap()
            .get(&instrument.symbol)
            .cloned())
    }
}

/// Eligibility mock excluding a fixed set of symbols
#[derive(Default)]
pub struct MockEligibility {
    excluded: HashSet<String>,
}

impl MockEligibility {
    pub fn allowing_all() -> Self {
        Self::default()
    }

    pub fn excluding(symbols: &[&str]) -> Self {
        Self {
            excluded: symbols.iter().map(|s| s.to_string()).collect(),
        }
    }
}

#[async_trait]
impl EligibilityPort for MockEligibility {
    async fn is_eligible(&self, instrument: &Instrument) -> bool {
        !self.excluded.contains(&instrument.symbol)
    }
}

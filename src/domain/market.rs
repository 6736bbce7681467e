//! Market Snapshot
//!
//! Per-instrument market state collected once per cycle and handed to the
//! oracle. Snapshots are never persisted; they are rebuilt fresh each cycle.

use chrono::{DateTime, Utc};
use serde::Serialize;

/// One instrument's market state at a point in time
#[derive(Debug, Clone, Serialize)]
pub struct MarketSnapshot {
    pub symbol: String,
    pub last_price: f64,
    /// 20-period EMA (trend direction)
    pub ema20: f64,
    /// MACD line (momentum change)
    pub macd: f64,
    /// 14-period RSI (overbought/oversold)
    pub rsi14: f64,
    /// 14-period ATR (volatility)
    pub atr14: f64,
    /// Current perp funding rate (market sentiment)
    pub funding_rate: f64,
    /// 24h traded volume in quote currency
    pub volume_24h: f64,
    /// Tail of recent closes, oldest to newest, for oracle context
    pub recent_closes: Vec<f64>,
    pub timestamp: DateTime<Utc>,
}

/// Account state summary sent to the oracle alongside the snapshots
#[derive(Debug, Clone, Serialize)]
pub struct AccountSummary {
    pub total_value: f64,
    pub available_margin: f64,
    pub total_return_pct: f64,
    pub open_positions: Vec<PositionSummary>,
    pub oracle_calls: u64,
    pub minutes_since_start: i64,
}

/// Condensed open-position view for the oracle prompt
#[derive(Debug, Clone, Serialize)]
pub struct PositionSummary {
    pub symbol: String,
    pub side: String,
    pub size: f64,
    pub entry_price: f64,
    pub mark_price: f64,
    pub leverage: u32,
    pub unrealized_pnl: f64,
    pub stop_loss: Option<f64>,
    pub take_profit: Option<f64>,
}

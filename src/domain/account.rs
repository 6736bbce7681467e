//! Account State
//!
//! Current account value, margin, open positions and running counters.
//! Total value is always recomputed from initial value + realized PnL +
//! unrealized PnL; there is no separately stored balance to drift.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::position::Position;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AccountState {
    /// Sum of realized PnL over all closed trades
    pub realized_pnl: f64,
    /// Open positions keyed by coin symbol; at most one per instrument
    pub open_positions: BTreeMap<String, Position>,
    /// Number of oracle invocations since the first start
    pub oracle_calls: u64,
    pub total_trades: u64,
    pub successful_trades: u64,
    pub failed_trades: u64,
}

impl AccountState {
    /// Total account value given current mark prices. Instruments missing a
    /// mark fall back to their entry price (zero unrealized contribution).
    pub fn total_value(&self, initial_value: f64, marks: &BTreeMap<String, f64>) -> f64 {
        initial_value + self.realized_pnl + self.unrealized_pnl(marks)
    }

    pub fn unrealized_pnl(&self, marks: &BTreeMap<String, f64>) -> f64 {
        self.open_positions
            .values()
            .map(|p| {
                let mark = marks.get(&p.symbol).copied().unwrap_or(p.entry_price);
                p.unrealized_pnl(mark)
            })
            .sum()
    }

    /// Margin not locked by open positions
    pub fn available_margin(&self, initial_value: f64, marks: &BTreeMap<String, f64>) -> f64 {
        let locked: f64 = self
            .open_positions
            .values()
            .map(|p| {
                let mark = marks.get(&p.symbol).copied().unwrap_or(p.entry_price);
                p.margin(mark)
            })
            .sum();
        self.total_value(initial_value, marks) - locked
    }

    pub fn position(&self, symbol: &str) -> Option<&Position> {
        self.open_positions.get(symbol)
    }

    pub fn open_position_count(&self) -> usize {
        self.open_positions.len()
    }
}

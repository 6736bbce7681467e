//! Performance Analyzer
//!
//! Pure metrics over the trade ledger. Everything here is re-derived from
//! the TradeRecord sequence on demand; there are no running totals that
//! could drift from the persisted history.

use serde::Serialize;
use statrs::statistics::Statistics;

use super::trade::{TradeOutcome, TradeRecord};

#[derive(Debug, Clone, Default, Serialize)]
pub struct PerformanceReport {
    pub total_closed: usize,
    pub wins: usize,
    pub losses: usize,
    pub breakeven: usize,
    /// wins / total closed trades, 0.0 when no trades
    pub win_rate: f64,
    pub total_pnl: f64,
    /// Largest peak-to-trough decline of the cumulative PnL curve
    pub max_drawdown: f64,
    pub best_trade: f64,
    pub worst_trade: f64,
    /// Mean over standard deviation of per-trade PnL; 0.0 below 2 trades
    pub risk_adjusted_return: f64,
}

/// Compute all metrics by replaying the ledger in order
pub fn analyze(history: &[TradeRecord]) -> PerformanceReport {
    if history.is_empty() {
        return PerformanceReport::default();
    }

    let pnls: Vec<f64> = history.iter().map(|t| t.realized_pnl).collect();

    let wins = history
        .iter()
        .filter(|t| t.outcome == TradeOutcome::Win)
        .count();
    let losses = history
        .iter()
        .filter(|t| t.outcome == TradeOutcome::Loss)
        .count();
    let breakeven = history.len() - wins - losses;

    let total_pnl: f64 = pnls.iter().sum();
    let best_trade = pnls.iter().copied().fold(f64::MIN, f64::max);
    let worst_trade = pnls.iter().copied().fold(f64::MAX, f64::min);

    // Replay the cumulative curve, tracking the running peak
    let mut cumulative = 0.0;
    let mut peak = 0.0;
    let mut max_drawdown = 0.0;
    for pnl in &pnls {
        cumulative += pnl;
        if cumulative > peak {
            peak = cumulative;
        }
        let drawdown = peak - cumulative;
        if drawdown > max_drawdown {
            max_drawdown = drawdown;
        }
    }

    let risk_adjusted_return = if pnls.len() < 2 {
        0.0
    } else {
        let mean = pnls.iter().copied().mean();
        let std_dev = pnls.iter().copied().std_dev();
        if std_dev > 0.0 {
            mean / std_dev
        } else {
            0.0
        }
    };

    PerformanceReport {
        total_closed: history.len(),
        wins,
        losses,
        breakeven,
        win_rate: wins as f64 / history.len() as f64,
        total_pnl,
        max_drawdown,
        best_trade,
        worst_trade,
        risk_adjusted_return,
    }
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::decision::Side;

#[derive(Debug, Error)]
pub enum PositionError {
    #[error("Invalid size: {0}")]
    InvalidSize(f64),
    #[error("Invalid entry price: {0}")]
    InvalidEntryPrice(f64),
    #[error("Invalid leverage: {0}")]
    InvalidLeverage(u32),
    #[error("A flat position cannot be opened")]
    FlatSide,
}

/// Open exposure on one instrument. At most one Position exists per
/// instrument at any time; the account's position map enforces that.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub symbol: String,
    pub side: Side,
    pub entry_price: f64,
    /// Size in coins
    pub size: f64,
    pub leverage: u32,
    /// `None` only for positions adopted from the exchange during
    /// reconciliation; always set for positions this agent opened.
    pub stop_loss: Option<f64>,
    pub take_profit: Option<f64>,
    /// Oracle confidence when the position was entered
    #[serde(default)]
    pub entry_confidence: f64,
    pub opened_at: DateTime<Utc>,
}

impl Position {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        symbol: String,
        side: Side,
        entry_price: f64,
        size: f64,
        leverage: u32,
        stop_loss: Option<f64>,
        take_profit: Option<f64>,
        entry_confidence: f64,
        opened_at: DateTime<Utc>,
    ) -> Result<Self, PositionError> {
        if side == Side::Flat {
            return Err(PositionError::FlatSide);
        }
        if size <= 0.0 || !size.is_finite() {
            return Err(PositionError::InvalidSize(size));
        }
        if entry_price <= 0.0 || !entry_price.is_finite() {
            return Err(PositionError::InvalidEntryPrice(entry_price));
        }
        if leverage == 0 {
            return Err(PositionError::InvalidLeverage(leverage));
        }

        Ok(Self {
            symbol,
            side,
            entry_price,
            size,
            leverage,
            stop_loss,
            take_profit,
            entry_confidence,
            opened_at,
        })
    }

    /// Dollar exposure at the given mark price
    pub fn notional(&self, mark_price: f64) -> f64 {
        self.size * mark_price
    }

    /// Margin locked by this position
    pub fn margin(&self, mark_price: f64) -> f64 {
        self.notional(mark_price) / self.leverage as f64
    }

    /// Unrealized PnL at the given mark price; sign follows the side
    pub fn unrealized_pnl(&self, mark_price: f64) -> f64 {
        match self.side {
            Side::Long => (mark_price - self.entry_price) * self.size,
            Side::Short => (self.entry_price - mark_price) * self.size,
            Side::Flat => 0.0,
        }
    }

    /// Realized PnL if the position were closed at the given fill price
    pub fn realized_pnl(&self, fill_price: f64) -> f64 {
        self.unrealized_pnl(fill_price)
    }

    /// True when the mark price has crossed the stop-loss level
    pub fn stop_loss_triggered(&self, mark_price: f64) -> bool {
        match (self.side, self.stop_loss) {
            (Side::Long, Some(sl)) => mark_price <= sl,
            (Side::Short, Some(sl)) => mark_price >= sl,
            _ => false,
        }
    }

    /// True when the mark price has crossed the take-profit level
    pub fn take_profit_triggered(&self, mark_price: f64) -> bool {
        match (self.side, self.take_profit) {
            (Side::Long, Some(tp)) => mark_price >= tp,
            (Side::Short, Some(tp)) => mark_price <= tp,
            _ => false,
        }
    }
}

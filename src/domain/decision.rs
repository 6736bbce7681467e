//! Oracle Decision
//!
//! The per-instrument proposal produced by the decision oracle. Decisions
//! are transient: produced once per cycle, consumed by the risk manager,
//! and discarded. Only the validated, executed form reaches the ledger.

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Long,
    Short,
    Flat,
}

impl Side {
    /// The order side used when opening exposure in this direction
    pub fn order_side(&self) -> &'static str {
        match self {
            Side::Long => "buy",
            Side::Short => "sell",
            Side::Flat => "none",
        }
    }

    pub fn is_open(&self) -> bool {
        !matches!(self, Side::Flat)
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Long => write!(f, "long"),
            Side::Short => write!(f, "short"),
            Side::Flat => write!(f, "flat"),
        }
    }
}

/// One instrument's proposed action for this cycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    pub symbol: String,
    pub side: Side,
    /// Requested dollar exposure before leverage
    pub target_notional: f64,
    pub leverage: u32,
    pub stop_loss: Option<f64>,
    pub take_profit: Option<f64>,
    /// Oracle confidence in [0, 1]
    pub confidence: f64,
}

impl Decision {
    /// A no-action decision for an instrument, used when the oracle omitted
    /// it or its entry failed validation
    pub fn flat(symbol: &str) -> Self {
        Self {
            symbol: symbol.to_string(),
            side: Side::Flat,
            target_notional: 0.0,
            leverage: 1,
            stop_loss: None,
            take_profit: None,
            confidence: 0.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_side_order_side() {
        assert_eq!(Side::Long.order_side(), "buy");
        assert_eq!(Side::Short.order_side(), "sell");
    }

    #[test]
    fn test_side_is_open() {
        assert!(Side::Long.is_open());
        assert!(Side::Short.is_open());
        assert!(!Side::Flat.is_open());
    }

    #[test]
    fn test_flat_decision() {
        let d = Decision::flat("ETH");
        assert_eq!(d.symbol, "ETH");
        assert_eq!(d.side, Side::Flat);
        assert_eq!(d.target_notional, 0.0);
        assert_eq!(d.confidence, 0.0);
    }

    #[test]
    fn test_side_serde_lowercase() {
        assert_eq!(serde_json::to_string(&Side::Long).unwrap(), "\"long\"");
        let side: Side = serde_json::from_str("\"short\"").unwrap();
        assert_eq!(side, Side::Short);
    }
}

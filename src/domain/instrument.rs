//! Instrument Basket
//!
//! The fixed set of tradable perpetual swaps and their contract metadata.
//! Instruments are identified by coin symbol ("BTC") and map to an OKX
//! instrument id ("BTC-USDT-SWAP").

use serde::{Deserialize, Serialize};

/// Contract metadata for one tradable perpetual swap
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instrument {
    /// Coin symbol, e.g. "BTC"
    pub symbol: String,
    /// Exchange instrument id, e.g. "BTC-USDT-SWAP"
    pub inst_id: String,
    /// Maximum leverage the exchange allows on this contract
    pub max_leverage: u32,
    /// Minimum size increment in coins
    pub lot_size: f64,
}

impl Instrument {
    fn new(symbol: &str, max_leverage: u32, lot_size: f64) -> Self {
        Self {
            symbol: symbol.to_string(),
            inst_id: format!("{}-USDT-SWAP", symbol),
            max_leverage,
            lot_size,
        }
    }

    /// Round a coin quantity down to the contract's size increment.
    /// The epsilon absorbs binary-representation noise in the division so
    /// an exact multiple of the lot never rounds a whole lot short.
    pub fn round_to_lot(&self, quantity: f64) -> f64 {
        if self.lot_size <= 0.0 {
            return quantity;
        }
        ((quantity / self.lot_size) + 1e-9).floor() * self.lot_size
    }
}

/// The supported basket: BTC, ETH, SOL, BNB, DOGE, XRP perpetuals
pub fn default_basket() -> Vec<Instrument> {
    vec![
        Instrument::new("BTC", 100, 0.001),
        Instrument::new("ETH", 100, 0.01),
        Instrument::new("SOL", 50, 0.1),
        Instrument::new("BNB", 50, 0.01),
        Instrument::new("DOGE", 50, 10.0),
        Instrument::new("XRP", 50, 1.0),
    ]
}

/// Look up an instrument in a basket by coin symbol
pub fn find<'a>(basket: &'a [Instrument], symbol: &str) -> Option<&'a Instrument> {
    basket.iter().find(|i| i.symbol == symbol)
}

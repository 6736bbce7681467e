//! Risk Manager
//!
//! Pure validation and clamping of oracle decisions against hard limits.
//! The risk manager never raises the oracle's requested risk; it only holds
//! steady or reduces it. Every outcome is returned as a structured
//! [`Assessment`] so the caller can log a complete audit trail.

use serde::{Deserialize, Serialize};

use super::account::AccountState;
use super::decision::{Decision, Side};
use super::instrument::Instrument;
use super::position::Position;

/// Hard limits enforced on every new entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskLimits {
    /// Global leverage ceiling, applied after the instrument's own ceiling
    pub max_leverage: u32,
    /// Maximum share of total account value at risk on a single new position
    pub risk_fraction: f64,
    pub max_positions: usize,
    /// Decisions below this confidence are rejected outright
    pub min_confidence: f64,
}

impl Default for RiskLimits {
    fn default() -> Self {
        Self {
            max_leverage: 15,
            risk_fraction: 0.05,
            max_positions: 6,
            min_confidence: 0.75,
        }
    }
}

/// How the risk manager disposed of a decision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Verdict {
    Accepted,
    Clamped,
    Rejected,
}

/// A validated open order carrying post-clamp values
#[derive(Debug, Clone, PartialEq)]
pub struct OpenOrder {
    pub symbol: String,
    pub side: Side,
    pub notional: f64,
    pub leverage: u32,
    pub stop_loss: f64,
    pub take_profit: f64,
    pub confidence: f64,
}

/// What the execution engine should do for one instrument
#[derive(Debug, Clone, PartialEq)]
pub enum Instruction {
    Open(OpenOrder),
    Close { symbol: String },
    /// Close the existing position, then open in the opposite direction.
    /// The close leg must be confirmed before the open is submitted.
    Flip { symbol: String, open: OpenOrder },
    /// Adjust protective levels on an existing same-side position
    UpdateProtection {
        symbol: String,
        stop_loss: Option<f64>,
        take_profit: Option<f64>,
    },
}

/// Structured outcome of validating one decision
#[derive(Debug, Clone)]
pub struct Assessment {
    pub symbol: String,
    pub verdict: Verdict,
    pub instruction: Option<Instruction>,
    pub reason: Option<String>,
}

impl Assessment {
    fn accepted(symbol: &str, instruction: Option<Instruction>) -> Self {
        Self {
            symbol: symbol.to_string(),
            verdict: Verdict::Accepted,
            instruction,
            reason: None,
        }
    }

    fn clamped(symbol: &str, instruction: Instruction, reason: String) -> Self {
        Self {
            symbol: symbol.to_string(),
            verdict: Verdict::Clamped,
            instruction: Some(instruction),
            reason: Some(reason),
        }
    }

    fn rejected(symbol: &str, reason: String) -> Self {
        Self {
            symbol: symbol.to_string(),
            verdict: Verdict::Rejected,
            instruction: None,
            reason: Some(reason),
        }
    }
}

pub struct RiskManager {
    limits: RiskLimits,
}

impl RiskManager {
    pub fn new(limits: RiskLimits) -> Self {
        Self { limits }
    }

    pub fn limits(&self) -> &RiskLimits {
        &self.limits
    }

    /// Validate one decision against the account, the existing position on
    /// the same instrument (if any), and the configured limits. Pure: no
    /// I/O, no mutation.
    pub fn assess(
        &self,
        decision: &Decision,
        account: &AccountState,
        position: Option<&Position>,
        mark_price: f64,
        instrument: &Instrument,
        total_value: f64,
    ) -> Assessment {
        match (decision.side, position) {
            // Flat with nothing open: nothing to do
            (Side::Flat, None) => Assessment::accepted(&decision.symbol, None),

            // Flat with an open position: close it
            (Side::Flat, Some(_)) => Assessment::accepted(
                &decision.symbol,
                Some(Instruction::Close {
                    symbol: decision.symbol.clone(),
                }),
            ),

            // Same direction already open: hold, or update protective levels
            (side, Some(pos)) if side == pos.side => {
                let sl_changed = decision.stop_loss.is_some() && decision.stop_loss != pos.stop_loss;
                let tp_changed =
                    decision.take_profit.is_some() && decision.take_profit != pos.take_profit;
                if !sl_changed && !tp_changed {
                    return Assessment::accepted(&decision.symbol, None);
                }
                if let Err(reason) = validate_levels(
                    side,
                    mark_price,
                    decision.stop_loss.or(pos.stop_loss),
                    decision.take_profit.or(pos.take_profit),
                ) {
                    return Assessment::rejected(
                        &decision.symbol,
                        format!("protection update refused: {}", reason),
                    );
                }
                Assessment::accepted(
                    &decision.symbol,
                    Some(Instruction::UpdateProtection {
                        symbol: decision.symbol.clone(),
                        stop_loss: decision.stop_loss,
                        take_profit: decision.take_profit,
                    }),
                )
            }

            // Opposite direction open: close first, then enter the new side.
            // The close frees both the position slot and its margin, so the
            // open leg is validated as if the old position were gone.
            (_, Some(_)) => {
                match self.validate_entry(decision, account, mark_price, instrument, total_value, 1)
                {
                    Entry::Ok(open) => Assessment::accepted(
                        &decision.symbol,
                        Some(Instruction::Flip {
                            symbol: decision.symbol.clone(),
                            open,
                        }),
                    ),
                    Entry::Clamped(open, reason) => Assessment::clamped(
                        &decision.symbol,
                        Instruction::Flip {
                            symbol: decision.symbol.clone(),
                            open,
                        },
                        reason,
                    ),
                    // A bad open leg still closes the old exposure; reducing
                    // risk is always allowed
                    Entry::Rejected(reason) => Assessment::clamped(
                        &decision.symbol,
                        Instruction::Close {
                            symbol: decision.symbol.clone(),
                        },
                        format!("flip reduced to close: {}", reason),
                    ),
                }
            }

            // Fresh entry
            (_, None) => {
                match self.validate_entry(decision, account, mark_price, instrument, total_value, 0)
                {
                    Entry::Ok(open) => {
                        Assessment::accepted(&decision.symbol, Some(Instruction::Open(open)))
                    }
                    Entry::Clamped(open, reason) => {
                        Assessment::clamped(&decision.symbol, Instruction::Open(open), reason)
                    }
                    Entry::Rejected(reason) => Assessment::rejected(&decision.symbol, reason),
                }
            }
        }
    }

    fn validate_entry(
        &self,
        decision: &Decision,
        account: &AccountState,
        mark_price: f64,
        instrument: &Instrument,
        total_value: f64,
        freed_slots: usize,
    ) -> Entry {
        if decision.confidence < self.limits.min_confidence {
            return Entry::Rejected(format!(
                "confidence {:.2} below minimum {:.2}",
                decision.confidence, self.limits.min_confidence
            ));
        }

        if account.open_position_count().saturating_sub(freed_slots) >= self.limits.max_positions {
            return Entry::Rejected("max positions reached".to_string());
        }

        if decision.leverage == 0 {
            return Entry::Rejected("leverage must be at least 1".to_string());
        }

        if !decision.target_notional.is_finite() || decision.target_notional <= 0.0 {
            return Entry::Rejected(format!(
                "target notional {} is not a positive finite value",
                decision.target_notional
            ));
        }

        let (stop_loss, take_profit) = match (decision.stop_loss, decision.take_profit) {
            (Some(sl), Some(tp)) => (sl, tp),
            _ => return Entry::Rejected("stop-loss and take-profit are required".to_string()),
        };
        if let Err(reason) = validate_levels(decision.side, mark_price, Some(stop_loss), Some(take_profit))
        {
            return Entry::Rejected(reason);
        }

        let mut clamps = Vec::new();

        let leverage_cap = instrument.max_leverage.min(self.limits.max_leverage);
        let leverage = decision.leverage.min(leverage_cap);
        if leverage < decision.leverage {
            clamps.push(format!(
                "leverage {} -> {}",
                decision.leverage, leverage
            ));
        }

        let notional_cap = self.limits.risk_fraction * total_value;
        if notional_cap <= 0.0 {
            return Entry::Rejected("no margin available for new exposure".to_string());
        }
        let notional = decision.target_notional.min(notional_cap);
        if notional < decision.target_notional {
            clamps.push(format!(
                "notional {:.2} -> {:.2}",
                decision.target_notional, notional
            ));
        }

        let open = OpenOrder {
            symbol: decision.symbol.clone(),
            side: decision.side,
            notional,
            leverage,
            stop_loss,
            take_profit,
            confidence: decision.confidence,
        };

        if clamps.is_empty() {
            Entry::Ok(open)
        } else {
            Entry::Clamped(open, clamps.join(", "))
        }
    }
}

enum Entry {
    Ok(OpenOrder),
    Clamped(OpenOrder, String),
    Rejected(String),
}

/// Protective levels must be finite and on the correct side of the mark
/// price for the trade direction.
fn validate_levels(
    side: Side,
    mark_price: f64,
    stop_loss: Option<f64>,
    take_profit: Option<f64>,
) -> Result<(), String> {
    let (sl, tp) = match (stop_loss, take_profit) {
        (Some(sl), Some(tp)) => (sl, tp),
        _ => return Err("stop-loss and take-profit are required".to_string()),
    };
    if !sl.is_finite() || !tp.is_finite() || sl <= 0.0 || tp <= 0.0 {
        return Err(format!("non-finite protective levels: sl={}, tp={}", sl, tp));
    }
    match side {
        Side::Long => {
            if sl >= mark_price {
                return Err(format!("stop-loss {} above entry {} for a long", sl, mark_price));
            }
            if tp <= mark_price {
                return Err(format!("take-profit {} below entry {} for a long", tp, mark_price));
            }
        }
        Side::Short => {
            if sl <= mark_price {
                return Err(format!("stop-loss {} below entry {} for a short", sl, mark_price));
            }
            if tp >= mark_price {
                return Err(format!("take-profit {} above entry {} for a short", tp, mark_price));
            }
        }
        Side::Flat => {}
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn instrument() -> Instrument {
        crate::domain::instrument::default_basket()
            .into_iter()
            .find(|i| i.symbol == "BTC")
            .unwrap()
    }

    fn long_decision() -> Decision {
        Decision {
            symbol: "BTC".to_string(),
            side: Side::Long,
            target_notional: 400.0,
            leverage: 10,
            stop_loss: Some(48000.0),
            take_profit: Some(55000.0),
            confidence: 0.9,
        }
    }

    fn open_position(side: Side) -> Position {
        Position::new(
            "BTC".to_string(),
            side,
            50000.0,
            0.01,
            10,
            Some(48000.0),
            Some(55000.0),
            0.8,
            Utc::now(),
        )
        .unwrap()
    }

    fn manager() -> RiskManager {
        RiskManager::new(RiskLimits::default())
    }

    #[test]
    fn test_flat_no_position_is_noop() {
        let a = manager().assess(
            &Decision::flat("BTC"),
            &AccountState::default(),
            None,
            50000.0,
            &instrument(),
            10000.0,
        );
        assert_eq!(a.verdict, Verdict::Accepted);
        assert!(a.instruction.is_none());
    }

    #[test]
    fn test_flat_with_position_closes() {
        let pos = open_position(Side::Long);
        let a = manager().assess(
            &Decision::flat("BTC"),
            &AccountState::default(),
            Some(&pos),
            50000.0,
            &instrument(),
            10000.0,
        );
        assert_eq!(a.verdict, Verdict::Accepted);
        assert!(matches!(a.instruction, Some(Instruction::Close { .. })));
    }

    #[test]
    fn test_same_side_identical_levels_holds() {
        let pos = open_position(Side::Long);
        let a = manager().assess(
            &long_decision(),
            &AccountState::default(),
            Some(&pos),
            50000.0,
            &instrument(),
            10000.0,
        );
        assert_eq!(a.verdict, Verdict::Accepted);
        assert!(a.instruction.is_none());
    }

    #[test]
    fn test_same_side_new_levels_updates_protection() {
        let pos = open_position(Side::Long);
        let mut decision = long_decision();
        decision.stop_loss = Some(49000.0);
        let a = manager().assess(
            &decision,
            &AccountState::default(),
            Some(&pos),
            50000.0,
            &instrument(),
            10000.0,
        );
        assert_eq!(a.verdict, Verdict::Accepted);
        match a.instruction {
            Some(Instruction::UpdateProtection { stop_loss, .. }) => {
                assert_eq!(stop_loss, Some(49000.0));
            }
            other => panic!("expected protection update, got {:?}", other),
        }
    }

    #[test]
    fn test_opposite_side_emits_flip() {
        let pos = open_position(Side::Long);
        let decision = Decision {
            symbol: "BTC".to_string(),
            side: Side::Short,
            target_notional: 400.0,
            leverage: 5,
            stop_loss: Some(52000.0),
            take_profit: Some(46000.0),
            confidence: 0.9,
        };
        let a = manager().assess(
            &decision,
            &AccountState::default(),
            Some(&pos),
            50000.0,
            &instrument(),
            10000.0,
        );
        match a.instruction {
            Some(Instruction::Flip { open, .. }) => {
                assert_eq!(open.side, Side::Short);
                assert_eq!(open.leverage, 5);
            }
            other => panic!("expected flip, got {:?}", other),
        }
    }

    #[test]
    fn test_flip_with_bad_open_leg_reduces_to_close() {
        let pos = open_position(Side::Long);
        let decision = Decision {
            symbol: "BTC".to_string(),
            side: Side::Short,
            target_notional: 400.0,
            leverage: 5,
            // wrong side for a short: stop below mark
            stop_loss: Some(46000.0),
            take_profit: Some(52000.0),
            confidence: 0.9,
        };
        let a = manager().assess(
            &decision,
            &AccountState::default(),
            Some(&pos),
            50000.0,
            &instrument(),
            10000.0,
        );
        assert_eq!(a.verdict, Verdict::Clamped);
        assert!(matches!(a.instruction, Some(Instruction::Close { .. })));
    }

    #[test]
    fn test_notional_clamped_to_risk_fraction() {
        // Spec scenario: 10000 account, 5% risk fraction, 5000 requested
        let mut decision = long_decision();
        decision.target_notional = 5000.0;
        let a = manager().assess(
            &decision,
            &AccountState::default(),
            None,
            50000.0,
            &instrument(),
            10000.0,
        );
        assert_eq!(a.verdict, Verdict::Clamped);
        match a.instruction {
            Some(Instruction::Open(open)) => {
                assert!(open.notional <= 500.0, "notional {} not clamped", open.notional);
            }
            other => panic!("expected open, got {:?}", other),
        }
    }

    #[test]
    fn test_adversarial_leverage_clamped() {
        let mut decision = long_decision();
        decision.leverage = 1000;
        let a = manager().assess(
            &decision,
            &AccountState::default(),
            None,
            50000.0,
            &instrument(),
            10000.0,
        );
        assert_eq!(a.verdict, Verdict::Clamped);
        match a.instruction {
            Some(Instruction::Open(open)) => assert_eq!(open.leverage, 15),
            other => panic!("expected open, got {:?}", other),
        }
    }

    #[test]
    fn test_adversarial_notional_ten_times_account() {
        let mut decision = long_decision();
        decision.target_notional = 100_000.0;
        decision.leverage = 1000;
        let a = manager().assess(
            &decision,
            &AccountState::default(),
            None,
            50000.0,
            &instrument(),
            10000.0,
        );
        match a.instruction {
            Some(Instruction::Open(open)) => {
                assert!(open.notional <= 0.05 * 10000.0);
                assert!(open.leverage <= 15);
            }
            other => panic!("expected open, got {:?}", other),
        }
    }

    #[test]
    fn test_max_positions_rejected() {
        let mut account = AccountState::default();
        for symbol in ["ETH", "SOL", "BNB", "DOGE", "XRP", "LTC"] {
            let pos = Position::new(
                symbol.to_string(),
                Side::Long,
                100.0,
                1.0,
                2,
                Some(90.0),
                Some(120.0),
                0.8,
                Utc::now(),
            )
            .unwrap();
            account.open_positions.insert(symbol.to_string(), pos);
        }

        let a = manager().assess(
            &long_decision(),
            &account,
            None,
            50000.0,
            &instrument(),
            10000.0,
        );
        assert_eq!(a.verdict, Verdict::Rejected);
        assert_eq!(a.reason.as_deref(), Some("max positions reached"));
    }

    #[test]
    fn test_missing_stops_rejected() {
        let mut decision = long_decision();
        decision.stop_loss = None;
        let a = manager().assess(
            &decision,
            &AccountState::default(),
            None,
            50000.0,
            &instrument(),
            10000.0,
        );
        assert_eq!(a.verdict, Verdict::Rejected);
    }

    #[test]
    fn test_stop_on_wrong_side_rejected() {
        let mut decision = long_decision();
        decision.stop_loss = Some(51000.0); // above entry for a long
        let a = manager().assess(
            &decision,
            &AccountState::default(),
            None,
            50000.0,
            &instrument(),
            10000.0,
        );
        assert_eq!(a.verdict, Verdict::Rejected);
        assert!(a.reason.unwrap().contains("stop-loss"));
    }

    #[test]
    fn test_non_finite_stop_rejected() {
        let mut decision = long_decision();
        decision.take_profit = Some(f64::INFINITY);
        let a = manager().assess(
            &decision,
            &AccountState::default(),
            None,
            50000.0,
            &instrument(),
            10000.0,
        );
        assert_eq!(a.verdict, Verdict::Rejected);
    }

    #[test]
    fn test_low_confidence_rejected() {
        let mut decision = long_decision();
        decision.confidence = 0.4;
        let a = manager().assess(
            &decision,
            &AccountState::default(),
            None,
            50000.0,
            &instrument(),
            10000.0,
        );
        assert_eq!(a.verdict, Verdict::Rejected);
        assert!(a.reason.unwrap().contains("confidence"));
    }

    #[test]
    fn test_within_limits_accepted_unchanged() {
        let decision = long_decision();
        let a = manager().assess(
            &decision,
            &AccountState::default(),
            None,
            50000.0,
            &instrument(),
            10000.0,
        );
        assert_eq!(a.verdict, Verdict::Accepted);
        match a.instruction {
            Some(Instruction::Open(open)) => {
                assert_eq!(open.notional, 400.0);
                assert_eq!(open.leverage, 10);
            }
            other => panic!("expected open, got {:?}", other),
        }
    }
}

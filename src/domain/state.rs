//! Trading State
//!
//! The full persisted aggregate: first-ever start time, account state,
//! trade ledger, and session markers. One instance exists per process and
//! all mutation goes through the state store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::account::AccountState;
use super::trade::TradeRecord;

/// One continuous process run, recorded for auditability. Session
/// boundaries never reset the account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionMarker {
    pub id: u64,
    pub started_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradingState {
    /// First-ever start, preserved across restarts and sessions
    pub started_at: DateTime<Utc>,
    pub initial_value: f64,
    pub account: AccountState,
    /// Append-only, chronological by confirmation time
    #[serde(default)]
    pub history: Vec<TradeRecord>,
    #[serde(default)]
    pub sessions: Vec<SessionMarker>,
}

impl TradingState {
    pub fn new(initial_value: f64, now: DateTime<Utc>) -> Self {
        Self {
            started_at: now,
            initial_value,
            account: AccountState::default(),
            history: Vec::new(),
            sessions: vec![SessionMarker { id: 1, started_at: now }],
        }
    }

    pub fn current_session_id(&self) -> u64 {
        self.sessions.last().map(|s| s.id).unwrap_or(1)
    }

    pub fn total_value(&self, marks: &BTreeMap<String, f64>) -> f64 {
        self.account.total_value(self.initial_value, marks)
    }

    pub fn available_margin(&self, marks: &BTreeMap<String, f64>) -> f64 {
        self.account.available_margin(self.initial_value, marks)
    }

    pub fn total_return_pct(&self, marks: &BTreeMap<String, f64>) -> f64 {
        if self.initial_value <= 0.0 {
            return 0.0;
        }
        (self.total_value(marks) - self.initial_value) / self.initial_value * 100.0
    }
}

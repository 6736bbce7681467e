//! State Store
//!
//! Owns the durable [`TradingState`] record and is the only component that
//! writes it. Saves are atomic (write to a temp file, then rename) so a
//! reader never observes a half-written state. On startup, a missing file
//! initializes a fresh state while an unreadable one is a fatal error:
//! the process refuses to run with ungrounded state.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

use super::position::Position;
use super::state::{SessionMarker, TradingState};
use super::trade::{TradeOutcome, TradeRecord};

/// Default state file name
pub const DEFAULT_STATE_FILE: &str = "trading_state.json";

#[derive(Debug, Error)]
pub enum StateError {
    #[error("Failed to read state file: {0}")]
    Read(String),

    #[error("State file is corrupt: {0}")]
    Corrupt(String),

    #[error("Failed to serialize state: {0}")]
    Serialize(String),

    #[error("Failed to write state file: {0}")]
    Write(String),

    #[error("No position open for {0}")]
    NoPosition(String),

    #[error("Position already open for {0}")]
    AlreadyOpen(String),
}

pub struct StateStore {
    path: PathBuf,
    state: TradingState,
}

impl StateStore {
    /// Load the persisted state, or initialize a fresh one with the given
    /// initial account value when no file exists yet.
    pub fn load(path: impl Into<PathBuf>, initial_value: f64) -> Result<Self, StateError> {
        let path = path.into();
        if !path.exists() {
            let state = TradingState::new(initial_value, Utc::now());
            let store = Self { path, state };
            store.save()?;
            tracing::info!(
                initial_value,
                "no prior state found, initialized fresh trading state"
            );
            return Ok(store);
        }

        let content = fs::read_to_string(&path).map_err(|e| StateError::Read(e.to_string()))?;
        let state: TradingState =
            serde_json::from_str(&content).map_err(|e| StateError::Corrupt(e.to_string()))?;

        tracing::info!(
            sessions = state.sessions.len(),
            trades = state.history.len(),
            open_positions = state.account.open_position_count(),
            "trading state loaded"
        );
        Ok(Self { path, state })
    }

    /// Atomically persist the full state
    pub fn save(&self) -> Result<(), StateError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|e| StateError::Write(e.to_string()))?;
            }
        }

        let content = serde_json::to_string_pretty(&self.state)
            .map_err(|e| StateError::Serialize(e.to_string()))?;

        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, content).map_err(|e| StateError::Write(e.to_string()))?;
        fs::rename(&tmp, &self.path).map_err(|e| StateError::Write(e.to_string()))?;
        Ok(())
    }

    pub fn state(&self) -> &TradingState {
        &self.state
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append a session marker for this process run. Does not touch the
    /// account.
    pub fn begin_session(&mut self) -> Result<u64, StateError> {
        let id = self.state.sessions.last().map(|s| s.id + 1).unwrap_or(1);
        self.state.sessions.push(SessionMarker {
            id,
            started_at: Utc::now(),
        });
        self.save()?;
        Ok(id)
    }

    pub fn increment_oracle_calls(&mut self) {
        self.state.account.oracle_calls += 1;
    }

    pub fn record_execution_failure(&mut self) {
        self.state.account.failed_trades += 1;
    }

    /// Track a newly opened position, created from the actual fill
    pub fn open_position(&mut self, position: Position) -> Result<(), StateError> {
        if self.state.account.open_positions.contains_key(&position.symbol) {
            return Err(StateError::AlreadyOpen(position.symbol));
        }
        self.state
            .account
            .open_positions
            .insert(position.symbol.clone(), position);
        Ok(())
    }

    /// Close an open position at the actual fill price, appending the
    /// resulting trade record and persisting.
    pub fn close_position(
        &mut self,
        symbol: &str,
        fill_price: f64,
        exit_time: DateTime<Utc>,
    ) -> Result<TradeRecord, StateError> {
        let position = self
            .state
            .account
            .open_positions
            .remove(symbol)
            .ok_or_else(|| StateError::NoPosition(symbol.to_string()))?;

        let realized = position.realized_pnl(fill_price);
        let record = TradeRecord {
            symbol: position.symbol.clone(),
            side: position.side,
            size: position.size,
            leverage: position.leverage,
            entry_time: position.opened_at,
            exit_time,
            entry_price: position.entry_price,
            exit_price: fill_price,
            realized_pnl: realized,
            outcome: TradeOutcome::from_pnl(realized),
            entry_confidence: position.entry_confidence,
            session_id: self.state.current_session_id(),
        };

        self.state.account.realized_pnl += realized;
        self.state.account.total_trades += 1;
        self.state.account.successful_trades += 1;
        self.state.history.push(record.clone());
        self.save()?;
        Ok(record)
    }

    /// Adjust protective levels on an open position
    pub fn update_protection(
        &mut self,
        symbol: &str,
        stop_loss: Option<f64>,
        take_profit: Option<f64>,
    ) -> Result<(), StateError> {
        let position = self
            .state
            .account
            .open_positions
            .get_mut(symbol)
            .ok_or_else(|| StateError::NoPosition(symbol.to_string()))?;
        if stop_loss.is_some() {
            position.stop_loss = stop_loss;
        }
        if take_profit.is_some() {
            position.take_profit = take_profit;
        }
        Ok(())
    }

    /// Adopt a position discovered live on the exchange but unknown locally
    pub fn adopt_position(&mut self, position: Position) {
        tracing::warn!(
            symbol = %position.symbol,
            side = %position.side,
            size = position.size,
            "adopting position found on exchange but missing locally"
        );
        self.state
            .account
            .open_positions
            .insert(position.symbol.clone(), position);
    }

    /// Drop a locally-known position that no longer exists on the exchange.
    /// No trade record is fabricated: the ledger only holds confirmed fills.
    pub fn drop_position(&mut self, symbol: &str) {
        if self.state.account.open_positions.remove(symbol).is_some() {
            tracing::warn!(symbol, "dropping local position absent on exchange");
        }
    }

    /// Destroy history and counters and reinitialize with a new value
    pub fn reset(&mut self, initial_value: f64) -> Result<(), StateError> {
        self.state = TradingState::new(initial_value, Utc::now());
        self.save()
    }

    /// Set the initial account value if it was never configured
    pub fn set_initial_value_if_unset(&mut self, value: f64) -> Result<bool, StateError> {
        if self.state.initial_value > 0.0 {
            return Ok(false);
        }
        self.state.initial_value = value;
        self.save()?;
        Ok(true)
    }

    /// Export the full state plus a derived performance summary
    pub fn export(&self, path: &Path) -> Result<(), StateError> {
        #[derive(Serialize)]
        struct Export<'a> {
            state: &'a TradingState,
            performance: crate::domain::performance::PerformanceReport,
            exported_at: DateTime<Utc>,
        }

        let export = Export {
            state: &self.state,
            performance: crate::domain::performance::analyze(&self.state.history),
            exported_at: Utc::now(),
        };
        let content = serde_json::to_string_pretty(&export)
            .map_err(|e| StateError::Serialize(e.to_string()))?;
        fs::write(path, content).map_err(|e| StateError::Write(e.to_string()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::decision::Side;
    use tempfile::tempdir;

    fn test_position(symbol: &str, side: Side, entry: f64, size: f64) -> Position {
        Position::new(
            symbol.to_string(),
            side,
            entry,
            size,
            10,
            Some(entry * 0.95),
            Some(entry * 1.1),
            0.8,
            Utc::now(),
        )
        .unwrap()
    }

    #[test]
    fn test_load_missing_file_initializes() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(DEFAULT_STATE_FILE);

        let store = StateStore::load(&path, 10000.0).unwrap();
        assert_eq!(store.state().initial_value, 10000.0);
        assert!(store.state().history.is_empty());
        assert_eq!(store.state().sessions.len(), 1);
        assert!(path.exists());
    }

    #[test]
    fn test_save_load_roundtrip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(DEFAULT_STATE_FILE);

        let mut store = StateStore::load(&path, 10000.0).unwrap();
        store
            .open_position(test_position("BTC", Side::Long, 50000.0, 0.01))
            .unwrap();
        store.save().unwrap();

        let reloaded = StateStore::load(&path, 0.0).unwrap();
        assert_eq!(reloaded.state(), store.state());
        assert!(reloaded.state().account.position("BTC").is_some());
    }

    #[test]
    fn test_save_of_loaded_state_is_idempotent() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(DEFAULT_STATE_FILE);

        let mut store = StateStore::load(&path, 10000.0).unwrap();
        store
            .open_position(test_position("ETH", Side::Short, 3000.0, 1.0))
            .unwrap();
        store.save().unwrap();

        let first = fs::read_to_string(&path).unwrap();
        let reloaded = StateStore::load(&path, 0.0).unwrap();
        reloaded.save().unwrap();
        let second = fs::read_to_string(&path).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_corrupt_file_is_fatal() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(DEFAULT_STATE_FILE);
        fs::write(&path, "{ not valid json").unwrap();

        let result = StateStore::load(&path, 10000.0);
        assert!(matches!(result, Err(StateError::Corrupt(_))));
    }

    #[test]
    fn test_begin_session_appends_marker() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(DEFAULT_STATE_FILE);

        let mut store = StateStore::load(&path, 10000.0).unwrap();
        let account_before = store.state().account.clone();
        let id = store.begin_session().unwrap();

        assert_eq!(id, 2);
        assert_eq!(store.state().sessions.len(), 2);
        assert_eq!(store.state().account, account_before);
    }

    #[test]
    fn test_close_position_appends_record_and_updates_account() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(DEFAULT_STATE_FILE);

        let mut store = StateStore::load(&path, 10000.0).unwrap();
        store
            .open_position(test_position("BTC", Side::Long, 50000.0, 0.01))
            .unwrap();

        let record = store.close_position("BTC", 51000.0, Utc::now()).unwrap();
        assert!((record.realized_pnl - 10.0).abs() < 1e-9);
        assert_eq!(record.outcome, TradeOutcome::Win);

        let state = store.state();
        assert!(state.account.position("BTC").is_none());
        assert!((state.account.realized_pnl - 10.0).abs() < 1e-9);
        assert_eq!(state.account.total_trades, 1);
        assert_eq!(state.history.len(), 1);
    }

    #[test]
    fn test_close_unknown_position_errors() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(DEFAULT_STATE_FILE);

        let mut store = StateStore::load(&path, 10000.0).unwrap();
        let result = store.close_position("BTC", 50000.0, Utc::now());
        assert!(matches!(result, Err(StateError::NoPosition(_))));
    }

    #[test]
    fn test_double_open_errors() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(DEFAULT_STATE_FILE);

        let mut store = StateStore::load(&path, 10000.0).unwrap();
        store
            .open_position(test_position("BTC", Side::Long, 50000.0, 0.01))
            .unwrap();
        let result = store.open_position(test_position("BTC", Side::Long, 50000.0, 0.01));
        assert!(matches!(result, Err(StateError::AlreadyOpen(_))));
    }

    #[test]
    fn test_update_protection() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(DEFAULT_STATE_FILE);

        let mut store = StateStore::load(&path, 10000.0).unwrap();
        store
            .open_position(test_position("BTC", Side::Long, 50000.0, 0.01))
            .unwrap();
        store
            .update_protection("BTC", Some(49000.0), None)
            .unwrap();

        let pos = store.state().account.position("BTC").unwrap();
        assert_eq!(pos.stop_loss, Some(49000.0));
        // take-profit untouched by a stop-only update
        assert_eq!(pos.take_profit, Some(50000.0 * 1.1));
    }

    #[test]
    fn test_reset_clears_history() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(DEFAULT_STATE_FILE);

        let mut store = StateStore::load(&path, 10000.0).unwrap();
        store
            .open_position(test_position("BTC", Side::Long, 50000.0, 0.01))
            .unwrap();
        store.close_position("BTC", 51000.0, Utc::now()).unwrap();
        store.begin_session().unwrap();

        store.reset(25000.0).unwrap();

        let reloaded = StateStore::load(&path, 0.0).unwrap();
        assert_eq!(reloaded.state().initial_value, 25000.0);
        assert!(reloaded.state().history.is_empty());
        assert_eq!(reloaded.state().sessions.len(), 1);
        assert_eq!(reloaded.state().account.total_trades, 0);
    }

    #[test]
    fn test_crash_recovery_reports_open_position() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(DEFAULT_STATE_FILE);

        {
            let mut store = StateStore::load(&path, 10000.0).unwrap();
            store
                .open_position(test_position("SOL", Side::Long, 100.0, 5.0))
                .unwrap();
            store.save().unwrap();
            // store dropped here, simulating a kill before any further save
        }

        let recovered = StateStore::load(&path, 0.0).unwrap();
        let pos = recovered.state().account.position("SOL").unwrap();
        assert_eq!(pos.side, Side::Long);
        assert_eq!(pos.size, 5.0);
    }

    #[test]
    fn test_set_initial_value_only_when_unset() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(DEFAULT_STATE_FILE);

        let mut store = StateStore::load(&path, 0.0).unwrap();
        assert!(store.set_initial_value_if_unset(5000.0).unwrap());
        assert!(!store.set_initial_value_if_unset(9999.0).unwrap());
        assert_eq!(store.state().initial_value, 5000.0);
    }

    #[test]
    fn test_export_writes_summary() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(DEFAULT_STATE_FILE);
        let export_path = dir.path().join("export.json");

        let mut store = StateStore::load(&path, 10000.0).unwrap();
        store
            .open_position(test_position("BTC", Side::Long, 50000.0, 0.01))
            .unwrap();
        store.close_position("BTC", 51000.0, Utc::now()).unwrap();
        store.export(&export_path).unwrap();

        let content = fs::read_to_string(&export_path).unwrap();
        assert!(content.contains("performance"));
        assert!(content.contains("win_rate"));
    }
}

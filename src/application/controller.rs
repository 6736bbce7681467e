//! Loop Controller
//!
//! Owns the trading lifecycle: on a fixed interval it collects market
//! snapshots, asks the oracle for decisions, validates them through the
//! risk manager, executes the survivors and persists the outcome. A
//! single instrument's failure never blocks the rest of the basket, and
//! the in-flight cycle always runs to Persisting before a stop takes
//! effect.

use chrono::Utc;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{Mutex, Notify, RwLock};
use tokio::task::JoinSet;

use crate::application::executor::{ExecutionEngine, ExecutionError, ExecutionReport};
use crate::domain::decision::Decision;
use crate::domain::instrument::{self, Instrument};
use crate::domain::market::{AccountSummary, MarketSnapshot, PositionSummary};
use crate::domain::performance;
use crate::domain::position::Position;
use crate::domain::risk::{Instruction, RiskManager, Verdict};
use crate::domain::state_store::{StateError, StateStore};
use crate::ports::eligibility::EligibilityPort;
use crate::ports::market_data::MarketDataPort;
use crate::ports::oracle::OraclePort;

/// Cycle state machine phases
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopPhase {
    Idle,
    Collecting,
    Deciding,
    Validating,
    Executing,
    Persisting,
    Stopping,
    Faulted,
}

impl fmt::Display for LoopPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LoopPhase::Idle => "idle",
            LoopPhase::Collecting => "collecting",
            LoopPhase::Deciding => "deciding",
            LoopPhase::Validating => "validating",
            LoopPhase::Executing => "executing",
            LoopPhase::Persisting => "persisting",
            LoopPhase::Stopping => "stopping",
            LoopPhase::Faulted => "faulted",
        };
        write!(f, "{}", name)
    }
}

#[derive(Debug, Error)]
pub enum ControllerError {
    #[error(transparent)]
    State(#[from] StateError),

    /// Account value reached zero or below; terminal, never clamped
    #[error("Account depleted: total value {0:.2}")]
    AccountDepleted(f64),
}

#[derive(Debug, Clone)]
pub struct ControllerConfig {
    pub interval: Duration,
    /// False in analysis-only mode: decisions are validated and logged but
    /// never executed
    pub execute_orders: bool,
    /// Log a performance summary every N cycles
    pub summary_every: u64,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(180),
            execute_orders: true,
            summary_every: 10,
        }
    }
}

/// What one cycle accomplished
#[derive(Debug, Default, Clone)]
pub struct CycleOutcome {
    pub snapshots: usize,
    pub instructions: usize,
    pub executed: usize,
    pub failures: usize,
}

pub struct LoopController {
    market: Arc<dyn MarketDataPort>,
    oracle: Arc<dyn OraclePort>,
    eligibility: Arc<dyn EligibilityPort>,
    engine: ExecutionEngine,
    store: Mutex<StateStore>,
    risk: RiskManager,
    basket: Vec<Instrument>,
    config: ControllerConfig,
    is_running: RwLock<bool>,
    phase: RwLock<LoopPhase>,
    stop_signal: Notify,
    cycles: std::sync::Mutex<u64>,
}

impl LoopController {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        market: Arc<dyn MarketDataPort>,
        oracle: Arc<dyn OraclePort>,
        eligibility: Arc<dyn EligibilityPort>,
        engine: ExecutionEngine,
        store: StateStore,
        risk: RiskManager,
        basket: Vec<Instrument>,
        config: ControllerConfig,
    ) -> Self {
        Self {
            market,
            oracle,
            eligibility,
            engine,
            store: Mutex::new(store),
            risk,
            basket,
            config,
            is_running: RwLock::new(false),
            phase: RwLock::new(LoopPhase::Idle),
            stop_signal: Notify::new(),
            cycles: std::sync::Mutex::new(0),
        }
    }

    /// Run the trading loop until stopped or faulted
    pub async fn run(&self) -> Result<(), ControllerError> {
        *self.is_running.write().await = true;
        tracing::info!(
            interval_secs = self.config.interval.as_secs(),
            execute_orders = self.config.execute_orders,
            "starting trading loop"
        );

        if self.config.execute_orders {
            self.reconcile_all().await?;
        }

        {
            let mut store = self.store.lock().await;
            let session = store.begin_session()?;
            tracing::info!(session, "session started");
            self.log_performance(&store);
        }

        loop {
            if !*self.is_running.read().await {
                break;
            }

            match self.tick().await {
                Ok(outcome) => {
                    tracing::info!(
                        snapshots = outcome.snapshots,
                        instructions = outcome.instructions,
                        executed = outcome.executed,
                        failures = outcome.failures,
                        "cycle complete"
                    );
                }
                Err(e) => {
                    self.set_phase(LoopPhase::Faulted).await;
                    tracing::error!(error = %e, "non-recoverable failure, entering faulted state");
                    *self.is_running.write().await = false;
                    return Err(e);
                }
            }

            let count = {
                let mut cycles = self.cycles.lock().unwrap();
                *cycles += 1;
                *cycles
            };
            if count % self.config.summary_every == 0 {
                let store = self.store.lock().await;
                self.log_performance(&store);
            }

            tokio::select! {
                _ = tokio::time::sleep(self.config.interval) => {}
                _ = self.stop_signal.notified() => break,
            }
        }

        self.set_phase(LoopPhase::Stopping).await;
        {
            let store = self.store.lock().await;
            self.log_performance(&store);
        }
        self.set_phase(LoopPhase::Idle).await;
        tracing::info!("trading loop stopped");
        Ok(())
    }

    /// Request a graceful stop; the in-flight cycle finishes first
    pub async fn stop(&self) {
        *self.is_running.write().await = false;
        self.stop_signal.notify_waiters();
        tracing::info!("stop signal sent to trading loop");
    }

    pub async fn is_running(&self) -> bool {
        *self.is_running.read().await
    }

    pub async fn phase(&self) -> LoopPhase {
        *self.phase.read().await
    }

    /// Execute one full cycle: collect, decide, validate, execute, persist
    pub async fn tick(&self) -> Result<CycleOutcome, ControllerError> {
        let mut outcome = CycleOutcome::default();

        // Collecting
        self.set_phase(LoopPhase::Collecting).await;
        let snapshots = self.collect_snapshots().await;
        outcome.snapshots = snapshots.len();
        let marks: BTreeMap<String, f64> = snapshots
            .iter()
            .map(|s| (s.symbol.clone(), s.last_price))
            .collect();

        let total_value = {
            let store = self.store.lock().await;
            store.state().total_value(&marks)
        };
        if total_value <= 0.0 {
            return Err(ControllerError::AccountDepleted(total_value));
        }

        let protective_closes = self.protective_closes(&marks).await;

        // Deciding
        self.set_phase(LoopPhase::Deciding).await;
        let decisions = self.decide(&snapshots, &marks, total_value).await;

        // Validating
        self.set_phase(LoopPhase::Validating).await;
        let instructions = self
            .validate(&snapshots, decisions, protective_closes, total_value)
            .await;
        outcome.instructions = instructions.len();

        // Executing
        if self.config.execute_orders {
            self.set_phase(LoopPhase::Executing).await;
            for (instruction, mark) in &instructions {
                match self.execute_one(instruction, *mark).await {
                    Ok(true) => outcome.executed += 1,
                    Ok(false) => {}
                    Err(e) => {
                        outcome.failures += 1;
                        tracing::error!(error = %e, "instruction failed, continuing with others");
                    }
                }
            }
        } else if !instructions.is_empty() {
            tracing::info!(
                count = instructions.len(),
                "analysis mode: instructions validated but not executed"
            );
        }

        // Persisting
        self.set_phase(LoopPhase::Persisting).await;
        {
            let store = self.store.lock().await;
            store.save()?;
        }

        self.set_phase(LoopPhase::Idle).await;
        Ok(outcome)
    }

    async fn collect_snapshots(&self) -> Vec<MarketSnapshot> {
        let mut eligible = Vec::new();
        for instrument in &self.basket {
            if self.eligibility.is_eligible(instrument).await {
                eligible.push(instrument.clone());
            } else {
                tracing::debug!(symbol = %instrument.symbol, "instrument ineligible this cycle");
            }
        }

        // Independent pulls are read-only; dispatch them concurrently
        let mut set = JoinSet::new();
        for instrument in eligible {
            let market = Arc::clone(&self.market);
            set.spawn(async move { (instrument.symbol.clone(), market.snapshot(&instrument).await) });
        }

        let mut snapshots = Vec::new();
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((_, Ok(snapshot))) => snapshots.push(snapshot),
                Ok((symbol, Err(e))) => {
                    tracing::warn!(%symbol, error = %e, "snapshot failed, skipping instrument");
                }
                Err(e) => tracing::warn!(error = %e, "snapshot task panicked"),
            }
        }
        snapshots.sort_by(|a, b| a.symbol.cmp(&b.symbol));
        snapshots
    }

    /// Close instructions for open positions whose protective levels have
    /// been crossed at current marks
    async fn protective_closes(&self, marks: &BTreeMap<String, f64>) -> Vec<Instruction> {
        let store = self.store.lock().await;
        let mut closes = Vec::new();
        for (symbol, position) in &store.state().account.open_positions {
            let Some(&mark) = marks.get(symbol) else { continue };
            if position.stop_loss_triggered(mark) {
                tracing::info!(%symbol, mark, stop_loss = ?position.stop_loss, "stop-loss hit");
                closes.push(Instruction::Close { symbol: symbol.clone() });
            } else if position.take_profit_triggered(mark) {
                tracing::info!(%symbol, mark, take_profit = ?position.take_profit, "take-profit hit");
                closes.push(Instruction::Close { symbol: symbol.clone() });
            }
        }
        closes
    }

    async fn decide(
        &self,
        snapshots: &[MarketSnapshot],
        marks: &BTreeMap<String, f64>,
        total_value: f64,
    ) -> Vec<Decision> {
        if snapshots.is_empty() {
            return Vec::new();
        }

        let summary = {
            let mut store = self.store.lock().await;
            store.increment_oracle_calls();
            let state = store.state();
            AccountSummary {
                total_value,
                available_margin: state.available_margin(marks),
                total_return_pct: state.total_return_pct(marks),
                open_positions: state
                    .account
                    .open_positions
                    .values()
                    .map(|p| {
                        let mark = marks.get(&p.symbol).copied().unwrap_or(p.entry_price);
                        PositionSummary {
                            symbol: p.symbol.clone(),
                            side: p.side.to_string(),
                            size: p.size,
                            entry_price: p.entry_price,
                            mark_price: mark,
                            leverage: p.leverage,
                            unrealized_pnl: p.unrealized_pnl(mark),
                            stop_loss: p.stop_loss,
                            take_profit: p.take_profit,
                        }
                    })
                    .collect(),
                oracle_calls: state.account.oracle_calls,
                minutes_since_start: (Utc::now() - state.started_at).num_minutes(),
            }
        };

        match self.oracle.propose(snapshots, &summary).await {
            Ok(decisions) => decisions,
            Err(e) => {
                // The oracle being down only costs this cycle's decisions;
                // protective closes still run
                tracing::warn!(error = %e, "oracle call failed, no decisions this cycle");
                Vec::new()
            }
        }
    }

    async fn validate(
        &self,
        snapshots: &[MarketSnapshot],
        decisions: Vec<Decision>,
        protective_closes: Vec<Instruction>,
        total_value: f64,
    ) -> Vec<(Instruction, f64)> {
        let store = self.store.lock().await;
        let mut instructions: Vec<(Instruction, f64)> = Vec::new();

        let protected: Vec<String> = protective_closes
            .iter()
            .map(|i| match i {
                Instruction::Close { symbol } => symbol.clone(),
                _ => String::new(),
            })
            .collect();
        for close in protective_closes {
            if let Instruction::Close { symbol } = &close {
                let mark = snapshots
                    .iter()
                    .find(|s| &s.symbol == symbol)
                    .map(|s| s.last_price)
                    .unwrap_or(0.0);
                instructions.push((close, mark));
            }
        }

        for snapshot in snapshots {
            // A protective close supersedes whatever the oracle wants
            if protected.contains(&snapshot.symbol) {
                continue;
            }
            let Some(instrument) = instrument::find(&self.basket, &snapshot.symbol) else {
                continue;
            };
            let decision = decisions
                .iter()
                .find(|d| d.symbol == snapshot.symbol)
                .cloned()
                .unwrap_or_else(|| Decision::flat(&snapshot.symbol));

            let position = store.state().account.position(&snapshot.symbol);
            let assessment = self.risk.assess(
                &decision,
                &store.state().account,
                position,
                snapshot.last_price,
                instrument,
                total_value,
            );

            // Audit trail: requested vs granted for every verdict
            match assessment.verdict {
                Verdict::Rejected => tracing::warn!(
                    symbol = %assessment.symbol,
                    side = %decision.side,
                    requested_notional = decision.target_notional,
                    requested_leverage = decision.leverage,
                    reason = assessment.reason.as_deref().unwrap_or(""),
                    "decision rejected"
                ),
                Verdict::Clamped => tracing::info!(
                    symbol = %assessment.symbol,
                    side = %decision.side,
                    requested_notional = decision.target_notional,
                    requested_leverage = decision.leverage,
                    reason = assessment.reason.as_deref().unwrap_or(""),
                    "decision clamped"
                ),
                Verdict::Accepted => {
                    if assessment.instruction.is_some() {
                        tracing::info!(
                            symbol = %assessment.symbol,
                            side = %decision.side,
                            notional = decision.target_notional,
                            leverage = decision.leverage,
                            "decision accepted"
                        );
                    }
                }
            }

            if let Some(instruction) = assessment.instruction {
                instructions.push((instruction, snapshot.last_price));
            }
        }
        instructions
    }

    /// Execute one instruction and fold the confirmed fills into state.
    /// Returns whether anything was executed.
    async fn execute_one(
        &self,
        instruction: &Instruction,
        mark: f64,
    ) -> Result<bool, ControllerError> {
        let symbol = match instruction {
            Instruction::Open(order) => &order.symbol,
            Instruction::Close { symbol } => symbol,
            Instruction::Flip { symbol, .. } => symbol,
            Instruction::UpdateProtection { symbol, .. } => symbol,
        };
        let Some(instrument) = instrument::find(&self.basket, symbol) else {
            return Ok(false);
        };

        match self.engine.execute(instruction, instrument, mark).await {
            Ok(ExecutionReport::Opened { order, fill }) => {
                let position = Position::new(
                    order.symbol.clone(),
                    order.side,
                    fill.price,
                    fill.size,
                    order.leverage,
                    Some(order.stop_loss),
                    Some(order.take_profit),
                    order.confidence,
                    Utc::now(),
                );
                match position {
                    Ok(position) => {
                        tracing::info!(
                            symbol = %order.symbol,
                            side = %order.side,
                            fill_price = fill.price,
                            fill_size = fill.size,
                            "position opened"
                        );
                        let mut store = self.store.lock().await;
                        store.open_position(position)?;
                        Ok(true)
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "fill produced an invalid position");
                        let mut store = self.store.lock().await;
                        store.record_execution_failure();
                        Ok(false)
                    }
                }
            }

            Ok(ExecutionReport::Closed { symbol, fill }) => {
                let mut store = self.store.lock().await;
                let record = store.close_position(&symbol, fill.price, Utc::now())?;
                tracing::info!(
                    %symbol,
                    fill_price = fill.price,
                    realized_pnl = record.realized_pnl,
                    outcome = ?record.outcome,
                    "position closed"
                );
                Ok(true)
            }

            Ok(ExecutionReport::Flipped { order, closed, opened }) => {
                let mut store = self.store.lock().await;
                let record = store.close_position(&order.symbol, closed.price, Utc::now())?;
                tracing::info!(
                    symbol = %order.symbol,
                    realized_pnl = record.realized_pnl,
                    "close leg of flip confirmed"
                );
                match Position::new(
                    order.symbol.clone(),
                    order.side,
                    opened.price,
                    opened.size,
                    order.leverage,
                    Some(order.stop_loss),
                    Some(order.take_profit),
                    order.confidence,
                    Utc::now(),
                ) {
                    Ok(position) => {
                        store.open_position(position)?;
                        tracing::info!(symbol = %order.symbol, side = %order.side, "flip complete");
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "flip fill produced an invalid position");
                        store.record_execution_failure();
                    }
                }
                Ok(true)
            }

            Ok(ExecutionReport::ProtectionUpdated {
                symbol,
                stop_loss,
                take_profit,
            }) => {
                let mut store = self.store.lock().await;
                store.update_protection(&symbol, stop_loss, take_profit)?;
                tracing::info!(%symbol, ?stop_loss, ?take_profit, "protective levels updated");
                Ok(true)
            }

            // The close leg filled before the open failed: record the close
            Err(ExecutionError::OpenLegFailed { symbol, closed, source }) => {
                tracing::error!(%symbol, error = %source, "open leg failed after confirmed close");
                let mut store = self.store.lock().await;
                store.close_position(&symbol, closed.price, Utc::now())?;
                store.record_execution_failure();
                Ok(true)
            }

            Err(e) => {
                let mut store = self.store.lock().await;
                store.record_execution_failure();
                tracing::error!(error = %e, "execution failed, state untouched");
                Ok(false)
            }
        }
    }

    /// Reconcile local open positions against the exchange. The exchange
    /// is the source of truth for existence; the store keeps history and
    /// attribution.
    pub async fn reconcile_all(&self) -> Result<(), ControllerError> {
        let local: Vec<String> = {
            let store = self.store.lock().await;
            store.state().account.open_positions.keys().cloned().collect()
        };

        for instrument in &self.basket {
            let live = match self.engine.reconcile(instrument).await {
                Ok(live) => live,
                Err(e) => {
                    tracing::warn!(
                        symbol = %instrument.symbol,
                        error = %e,
                        "reconciliation read failed, instrument stays quarantined"
                    );
                    continue;
                }
            };

            let mut store = self.store.lock().await;
            match live {
                None => {
                    if local.contains(&instrument.symbol) {
                        store.drop_position(&instrument.symbol);
                    }
                }
                Some(live) => {
                    if let Some(position) = store.state().account.position(&instrument.symbol) {
                        if (position.size - live.size).abs() > f64::EPSILON {
                            tracing::warn!(
                                symbol = %instrument.symbol,
                                local_size = position.size,
                                live_size = live.size,
                                "position size differs from exchange, adopting live values"
                            );
                            let mut adopted = position.clone();
                            adopted.size = live.size;
                            adopted.entry_price = live.entry_price;
                            store.adopt_position(adopted);
                        }
                    } else {
                        let adopted = Position::new(
                            live.symbol.clone(),
                            live.side,
                            live.entry_price,
                            live.size,
                            live.leverage.max(1),
                            None,
                            None,
                            0.0,
                            Utc::now(),
                        );
                        match adopted {
                            Ok(position) => store.adopt_position(position),
                            Err(e) => tracing::warn!(
                                symbol = %live.symbol,
                                error = %e,
                                "live position could not be adopted"
                            ),
                        }
                    }
                }
            }
        }

        let store = self.store.lock().await;
        store.save()?;
        Ok(())
    }

    async fn set_phase(&self, phase: LoopPhase) {
        let mut current = self.phase.write().await;
        if *current != phase {
            tracing::debug!(from = %*current, to = %phase, "loop phase transition");
            *current = phase;
        }
    }

    fn log_performance(&self, store: &StateStore) {
        let state = store.state();
        let report = performance::analyze(&state.history);
        tracing::info!(
            initial_value = state.initial_value,
            realized_pnl = state.account.realized_pnl,
            total_trades = report.total_closed,
            win_rate = report.win_rate,
            max_drawdown = report.max_drawdown,
            best_trade = report.best_trade,
            worst_trade = report.worst_trade,
            risk_adjusted = report.risk_adjusted_return,
            sessions = state.sessions.len(),
            oracle_calls = state.account.oracle_calls,
            "performance summary"
        );
    }

    /// Snapshot of controller state for the status surface
    pub async fn open_position_count(&self) -> usize {
        self.store.lock().await.state().account.open_position_count()
    }
}

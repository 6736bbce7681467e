//! Execution Engine
//!
//! Turns validated risk instructions into exchange calls. Execution is
//! serialized per instrument behind an async lock so an open can never
//! race a close on the same contract. Transient failures retry with
//! bounded exponential backoff; an order that still fails leaves local
//! state untouched, flags the instrument suspect, and a reconciliation
//! read must resolve the ambiguity before the instrument trades again.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;

use crate::domain::instrument::Instrument;
use crate::domain::risk::{Instruction, OpenOrder};
use crate::ports::exchange::{ExchangeError, ExchangePort, LivePosition, OrderFill};

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
        }
    }
}

/// What actually happened on the exchange, with real fills
#[derive(Debug, Clone)]
pub enum ExecutionReport {
    Opened {
        order: OpenOrder,
        fill: OrderFill,
    },
    Closed {
        symbol: String,
        fill: OrderFill,
    },
    Flipped {
        order: OpenOrder,
        closed: OrderFill,
        opened: OrderFill,
    },
    ProtectionUpdated {
        symbol: String,
        stop_loss: Option<f64>,
        take_profit: Option<f64>,
    },
}

#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("Execution failed for {symbol}: {source}")]
    Failed {
        symbol: String,
        #[source]
        source: ExchangeError,
    },

    /// The close leg of a flip failed; the open was never attempted
    #[error("Close leg failed for {symbol}, open not attempted: {source}")]
    CloseLegFailed {
        symbol: String,
        #[source]
        source: ExchangeError,
    },

    /// The close leg filled but the open leg failed; the caller must still
    /// record the confirmed close
    #[error("Open leg failed for {symbol} after close confirmed: {source}")]
    OpenLegFailed {
        symbol: String,
        closed: OrderFill,
        #[source]
        source: ExchangeError,
    },

    #[error("Instrument {0} is quarantined pending reconciliation")]
    Quarantined(String),

    #[error("Computed size {size} is below lot size for {symbol}")]
    BelowLotSize { symbol: String, size: f64 },
}

pub struct ExecutionEngine {
    exchange: Arc<dyn ExchangePort>,
    retry: RetryPolicy,
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    suspects: std::sync::Mutex<HashSet<String>>,
}

impl ExecutionEngine {
    pub fn new(exchange: Arc<dyn ExchangePort>, retry: RetryPolicy) -> Self {
        Self {
            exchange,
            retry,
            locks: Mutex::new(HashMap::new()),
            suspects: std::sync::Mutex::new(HashSet::new()),
        }
    }

    /// Execute one validated instruction. `mark_price` converts the
    /// instruction's notional into a coin size.
    pub async fn execute(
        &self,
        instruction: &Instruction,
        instrument: &Instrument,
        mark_price: f64,
    ) -> Result<ExecutionReport, ExecutionError> {
        let lock = self.instrument_lock(&instrument.symbol).await;
        let _guard = lock.lock().await;

        if self.is_suspect(&instrument.symbol) {
            return Err(ExecutionError::Quarantined(instrument.symbol.clone()));
        }

        match instruction {
            Instruction::Open(order) => {
                let fill = self.open_leg(order, instrument, mark_price).await?;
                Ok(ExecutionReport::Opened {
                    order: order.clone(),
                    fill,
                })
            }

            Instruction::Close { symbol } => {
                let fill = self.close_leg(instrument).await.map_err(|source| {
                    self.mark_suspect(symbol);
                    ExecutionError::Failed {
                        symbol: symbol.clone(),
                        source,
                    }
                })?;
                Ok(ExecutionReport::Closed {
                    symbol: symbol.clone(),
                    fill,
                })
            }

            Instruction::Flip { symbol, open } => {
                // The close must be confirmed before the open is submitted
                let closed = self.close_leg(instrument).await.map_err(|source| {
                    self.mark_suspect(symbol);
                    ExecutionError::CloseLegFailed {
                        symbol: symbol.clone(),
                        source,
                    }
                })?;

                match self.open_leg(open, instrument, mark_price).await {
                    Ok(opened) => Ok(ExecutionReport::Flipped {
                        order: open.clone(),
                        closed,
                        opened,
                    }),
                    // Whatever stopped the open leg, the confirmed close
                    // must survive for the caller to record
                    Err(e) => {
                        let source = match e {
                            ExecutionError::Failed { source, .. } => source,
                            other => ExchangeError::Rejected(other.to_string()),
                        };
                        Err(ExecutionError::OpenLegFailed {
                            symbol: symbol.clone(),
                            closed,
                            source,
                        })
                    }
                }
            }

            Instruction::UpdateProtection {
                symbol,
                stop_loss,
                take_profit,
            } => Ok(ExecutionReport::ProtectionUpdated {
                symbol: symbol.clone(),
                stop_loss: *stop_loss,
                take_profit: *take_profit,
            }),
        }
    }

    async fn open_leg(
        &self,
        order: &OpenOrder,
        instrument: &Instrument,
        mark_price: f64,
    ) -> Result<OrderFill, ExecutionError> {
        let size = instrument.round_to_lot(order.notional / mark_price);
        if size <= 0.0 {
            return Err(ExecutionError::BelowLotSize {
                symbol: order.symbol.clone(),
                size,
            });
        }

        self.with_retry(|| self.exchange.set_leverage(instrument, order.leverage))
            .await
            .map_err(|source| ExecutionError::Failed {
                symbol: order.symbol.clone(),
                source,
            })?;

        self.with_retry(|| self.exchange.place_market_order(instrument, order.side, size))
            .await
            .map_err(|source| {
                // An order that may or may not have reached the book leaves
                // the true position unknown until a reconciliation read
                self.mark_suspect(&order.symbol);
                ExecutionError::Failed {
                    symbol: order.symbol.clone(),
                    source,
                }
            })
    }

    async fn close_leg(&self, instrument: &Instrument) -> Result<OrderFill, ExchangeError> {
        self.with_retry(|| self.exchange.close_position(instrument)).await
    }

    async fn with_retry<T, F, Fut>(&self, call: F) -> Result<T, ExchangeError>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = Result<T, ExchangeError>>,
    {
        let mut last_error = None;
        for attempt in 0..self.retry.max_attempts {
            match call().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && attempt + 1 < self.retry.max_attempts => {
                    let backoff = self.retry.base_delay * 2u32.pow(attempt);
                    let jitter = Duration::from_millis(rand::random::<u64>() % 250);
                    tracing::warn!(
                        attempt = attempt + 1,
                        max = self.retry.max_attempts,
                        delay_ms = (backoff + jitter).as_millis() as u64,
                        error = %e,
                        "transient exchange failure, backing off"
                    );
                    tokio::time::sleep(backoff + jitter).await;
                    last_error = Some(e);
                }
                Err(e) => return Err(e),
            }
        }
        Err(last_error.unwrap_or(ExchangeError::Timeout))
    }

    /// Query the live position for a suspect instrument; a successful read
    /// resolves the ambiguity and lifts the quarantine.
    pub async fn reconcile(
        &self,
        instrument: &Instrument,
    ) -> Result<Option<LivePosition>, ExchangeError> {
        let live = self.exchange.fetch_position(instrument).await?;
        self.clear_suspect(&instrument.symbol);
        Ok(live)
    }

    pub fn is_suspect(&self, symbol: &str) -> bool {
        self.suspects.lock().unwrap().contains(symbol)
    }

    pub fn suspects(&self) -> Vec<String> {
        self.suspects.lock().unwrap().iter().cloned().collect()
    }

    fn mark_suspect(&self, symbol: &str) {
        tracing::warn!(symbol, "flagging instrument for reconciliation");
        self.suspects.lock().unwrap().insert(symbol.to_string());
    }

    fn clear_suspect(&self, symbol: &str) {
        self.suspects.lock().unwrap().remove(symbol);
    }

    async fn instrument_lock(&self, symbol: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        locks
            .entry(symbol.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}

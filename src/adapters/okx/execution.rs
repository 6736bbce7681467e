//! OKX Execution Adapter
//!
//! Implements `ExchangePort` over OKX private endpoints: leverage setup,
//! market orders, full closes and position queries. All positions use
//! cross margin in net mode, matching the account configuration the agent
//! expects. Sizes cross this boundary in coins; OKX itself counts
//! contracts, with the instrument's lot size as the contract size.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;

use crate::domain::decision::Side;
use crate::domain::instrument::Instrument;
use crate::ports::exchange::{ExchangeError, ExchangePort, LivePosition, OrderFill};

use super::client::OkxClient;

/// Attempts to observe a market order reach the filled state
const FILL_POLL_ATTEMPTS: u32 = 5;
const FILL_POLL_DELAY: Duration = Duration::from_millis(200);

#[derive(Debug, Deserialize)]
struct OrderAck {
    #[serde(rename = "ordId")]
    ord_id: String,
}

#[derive(Debug, Deserialize)]
struct OrderDetail {
    #[serde(rename = "avgPx")]
    avg_px: String,
    #[serde(rename = "accFillSz")]
    acc_fill_sz: String,
    state: String,
}

#[derive(Debug, Deserialize)]
struct PositionData {
    #[serde(rename = "pos")]
    pos: String,
    #[serde(rename = "avgPx")]
    avg_px: String,
    #[serde(rename = "lever")]
    lever: String,
    #[serde(rename = "upl", default)]
    upl: String,
}

pub struct OkxExecution {
    client: OkxClient,
}

impl OkxExecution {
    pub fn new(client: OkxClient) -> Self {
        Self { client }
    }

    async fn await_fill(
        &self,
        instrument: &Instrument,
        ord_id: &str,
    ) -> Result<OrderFill, ExchangeError> {
        for attempt in 0..FILL_POLL_ATTEMPTS {
            let details: Vec<OrderDetail> = self
                .client
                .get_private(&format!(
                    "/api/v5/trade/order?instId={}&ordId={}",
                    instrument.inst_id, ord_id
                ))
                .await?;
            if let Some(detail) = details.first() {
                if detail.state == "filled" {
                    let price = parse_f64(&detail.avg_px, "avgPx")?;
                    let contracts = parse_f64(&detail.acc_fill_sz, "accFillSz")?;
                    return Ok(OrderFill {
                        order_id: ord_id.to_string(),
                        price,
                        size: contracts_to_coins(contracts, instrument),
                    });
                }
                if detail.state == "canceled" {
                    return Err(ExchangeError::Rejected(format!(
                        "order {} canceled before fill",
                        ord_id
                    )));
                }
            }
            if attempt + 1 < FILL_POLL_ATTEMPTS {
                tokio::time::sleep(FILL_POLL_DELAY).await;
            }
        }
        Err(ExchangeError::Rejected(format!(
            "order {} not confirmed filled",
            ord_id
        )))
    }
}

#[async_trait]
impl ExchangePort for OkxExecution {
    async fn set_leverage(
        &self,
        instrument: &Instrument,
        leverage: u32,
    ) -> Result<(), ExchangeError> {
        let body = json!({
            "instId": instrument.inst_id,
            "lever": leverage.to_string(),
            "mgnMode": "cross",
        });
        let _: Vec<serde_json::Value> = self
            .client
            .post_private("/api/v5/account/set-leverage", &body)
            .await?;
        Ok(())
    }

    async fn place_market_order(
        &self,
        instrument: &Instrument,
        side: Side,
        size: f64,
    ) -> Result<OrderFill, ExchangeError> {
        let contracts = coins_to_contracts(size, instrument);
        if contracts <= 0.0 {
            return Err(ExchangeError::Rejected(format!(
                "size {} below lot size {} for {}",
                size, instrument.lot_size, instrument.symbol
            )));
        }

        let body = json!({
            "instId": instrument.inst_id,
            "tdMode": "cross",
            "side": side.order_side(),
            "ordType": "market",
            "sz": format_contracts(contracts),
        });
        let acks: Vec<OrderAck> = self.client.post_private("/api/v5/trade/order", &body).await?;
        let ack = acks
            .first()
            .ok_or_else(|| ExchangeError::Malformed("empty order response".to_string()))?;

        self.await_fill(instrument, &ack.ord_id).await
    }

    async fn close_position(&self, instrument: &Instrument) -> Result<OrderFill, ExchangeError> {
        let position = self
            .fetch_position(instrument)
            .await?
            .ok_or_else(|| ExchangeError::Rejected(format!("no open position on {}", instrument.symbol)))?;

        // Close by submitting the reverse order for the full size
        let close_side = match position.side {
            Side::Long => Side::Short,
            Side::Short => Side::Long,
            Side::Flat => {
                return Err(ExchangeError::Rejected("position reported flat".to_string()))
            }
        };
        let fill = self
            .place_market_order(instrument, close_side, position.size)
            .await?;

        // The close is only confirmed once the exchange reports flat
        if self.fetch_position(instrument).await?.is_some() {
            return Err(ExchangeError::Rejected(format!(
                "residual position on {} after close",
                instrument.symbol
            )));
        }
        Ok(fill)
    }

    async fn fetch_position(
        &self,
        instrument: &Instrument,
    ) -> Result<Option<LivePosition>, ExchangeError> {
        let data: Vec<PositionData> = self
            .client
            .get_private(&format!(
                "/api/v5/account/positions?instId={}",
                instrument.inst_id
            ))
            .await?;
        match data.first() {
            None => Ok(None),
            Some(pos) => live_position_from_data(pos, instrument),
        }
    }
}

fn coins_to_contracts(coins: f64, instrument: &Instrument) -> f64 {
    if instrument.lot_size <= 0.0 {
        return 0.0;
    }
    // Same representation-noise guard as Instrument::round_to_lot
    ((coins / instrument.lot_size) + 1e-9).floor()
}

fn contracts_to_coins(contracts: f64, instrument: &Instrument) -> f64 {
    contracts * instrument.lot_size
}

fn format_contracts(contracts: f64) -> String {
    // Whole contracts only after flooring
    format!("{}", contracts as u64)
}

fn live_position_from_data(
    data: &PositionData,
    instrument: &Instrument,
) -> Result<Option<LivePosition>, ExchangeError> {
    let contracts = parse_f64(&data.pos, "pos")?;
    if contracts == 0.0 {
        return Ok(None);
    }
    let side = if contracts > 0.0 { Side::Long } else { Side::Short };
    Ok(Some(LivePosition {
        symbol: instrument.symbol.clone(),
        side,
        size: contracts_to_coins(contracts.abs(), instrument),
        entry_price: parse_f64(&data.avg_px, "avgPx")?,
        leverage: parse_f64(&data.lever, "lever")? as u32,
        unrealized_pnl: data.upl.parse::<f64>().unwrap_or(0.0),
    }))
}

fn parse_f64(value: &str, field: &str) -> Result<f64, ExchangeError> {
    value
        .parse::<f64>()
        .map_err(|_| ExchangeError::Malformed(format!("{} is not a number: {:?}", field, value)))
}

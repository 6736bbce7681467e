//! OKX Market Data Adapter
//!
//! Implements `MarketDataPort` over OKX public endpoints: ticker, 3-minute
//! candles and the current funding rate. Indicator values are derived from
//! the candle history on every pull.

use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;

use crate::domain::instrument::Instrument;
use crate::domain::market::MarketSnapshot;
use crate::ports::exchange::ExchangeError;
use crate::ports::market_data::{DataError, MarketDataPort};

use super::client::OkxClient;
use super::indicators::{self, Candle};

/// Bars requested per pull; enough history for EMA26/ATR14 to settle
const CANDLE_LIMIT: u32 = 100;
const CANDLE_BAR: &str = "3m";
/// Closes forwarded to the oracle as short-term context
const RECENT_CLOSES: usize = 10;

#[derive(Debug, Deserialize)]
struct TickerData {
    last: String,
    #[serde(rename = "volCcy24h")]
    vol_ccy_24h: String,
}

#[derive(Debug, Deserialize)]
struct FundingRateData {
    #[serde(rename = "fundingRate")]
    funding_rate: String,
}

pub struct OkxMarketData {
    client: OkxClient,
}

impl OkxMarketData {
    pub fn new(client: OkxClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl MarketDataPort for OkxMarketData {
    async fn snapshot(&self, instrument: &Instrument) -> Result<MarketSnapshot, DataError> {
        let ticker: Vec<TickerData> = self
            .client
            .get_public(&format!("/api/v5/market/ticker?instId={}", instrument.inst_id))
            .await
            .map_err(map_exchange_error)?;
        let ticker = ticker
            .first()
            .ok_or_else(|| DataError::Malformed("empty ticker response".to_string()))?;

        let rows: Vec<Vec<String>> = self
            .client
            .get_public(&format!(
                "/api/v5/market/candles?instId={}&bar={}&limit={}",
                instrument.inst_id, CANDLE_BAR, CANDLE_LIMIT
            ))
            .await
            .map_err(map_exchange_error)?;
        let candles = parse_candles(&rows)?;
        if candles.len() < 30 {
            return Err(DataError::Malformed(format!(
                "only {} candles returned for {}",
                candles.len(),
                instrument.inst_id
            )));
        }

        let funding: Vec<FundingRateData> = self
            .client
            .get_public(&format!(
                "/api/v5/public/funding-rate?instId={}",
                instrument.inst_id
            ))
            .await
            .map_err(map_exchange_error)?;
        let funding_rate = funding
            .first()
            .map(|f| parse_f64(&f.funding_rate, "fundingRate"))
            .transpose()?
            .unwrap_or(0.0);

        let closes: Vec<f64> = candles.iter().map(|c| c.close).collect();
        let ema20 = *indicators::ema(&closes, 20)
            .last()
            .ok_or_else(|| DataError::Malformed("empty close series".to_string()))?;

        let tail_start = closes.len().saturating_sub(RECENT_CLOSES);

        Ok(MarketSnapshot {
            symbol: instrument.symbol.clone(),
            last_price: parse_f64(&ticker.last, "last")?,
            ema20,
            macd: indicators::macd(&closes),
            rsi14: indicators::rsi(&closes, 14),
            atr14: indicators::atr(&candles, 14),
            funding_rate,
            volume_24h: parse_f64(&ticker.vol_ccy_24h, "volCcy24h")?,
            recent_closes: closes[tail_start..].to_vec(),
            timestamp: Utc::now(),
        })
    }
}

fn map_exchange_error(e: ExchangeError) -> DataError {
    match e {
        ExchangeError::Timeout => DataError::Timeout,
        ExchangeError::Malformed(msg) => DataError::Malformed(msg),
        other => DataError::Unavailable(other.to_string()),
    }
}

fn parse_f64(value: &str, field: &str) -> Result<f64, DataError> {
    value
        .parse::<f64>()
        .map_err(|_| DataError::Malformed(format!("{} is not a number: {:?}", field, value)))
}

/// OKX returns candle rows newest-first as string arrays
/// `[ts, open, high, low, close, vol, ...]`; reorder oldest-first.
fn parse_candles(rows: &[Vec<String>]) -> Result<Vec<Candle>, DataError> {
    let mut candles = Vec::with_capacity(rows.len());
    for row in rows {
        if row.len() < 6 {
            return Err(DataError::Malformed(format!(
                "candle row has {} fields, expected at least 6",
                row.len()
            )));
        }
        candles.push(Candle {
            timestamp_ms: row[0]
                .parse::<i64>()
                .map_err(|_| DataError::Malformed(format!("bad candle timestamp {:?}", row[0])))?,
            open: parse_f64(&row[1], "open")?,
            high: parse_f64(&row[2], "high")?,
            low: parse_f64(&row[3], "low")?,
            close: parse_f64(&row[4], "close")?,
            volume: parse_f64(&row[5], "volume")?,
        });
    }
    candles.sort_by_key(|c| c.timestamp_ms);
    Ok(candles)
}

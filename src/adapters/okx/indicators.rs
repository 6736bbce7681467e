//! Technical Indicators
//!
//! EMA, MACD, RSI and ATR computed over candle history. Inputs are ordered
//! oldest to newest; outputs describe the newest bar.

/// One OHLCV bar
#[derive(Debug, Clone, PartialEq)]
pub struct Candle {
    pub timestamp_ms: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

/// Exponential moving average series; seeded with the first value
pub fn ema(values: &[f64], span: usize) -> Vec<f64> {
    if values.is_empty() || span == 0 {
        return Vec::new();
    }
    let alpha = 2.0 / (span as f64 + 1.0);
    let mut out = Vec::with_capacity(values.len());
    let mut current = values[0];
    out.push(current);
    for &v in &values[1..] {
        current = alpha * v + (1.0 - alpha) * current;
        out.push(current);
    }
    out
}

/// MACD line (EMA12 - EMA26) for the newest bar
pub fn macd(closes: &[f64]) -> f64 {
    if closes.is_empty() {
        return 0.0;
    }
    let ema12 = ema(closes, 12);
    let ema26 = ema(closes, 26);
    ema12.last().unwrap() - ema26.last().unwrap()
}

/// Relative strength index over the last `period` deltas, 0-100.
/// All-gain windows read 100, all-loss windows 0, and a flat window is
/// neutral 50.
pub fn rsi(closes: &[f64], period: usize) -> f64 {
    if closes.len() < period + 1 || period == 0 {
        return 50.0;
    }
    let deltas: Vec<f64> = closes.windows(2).map(|w| w[1] - w[0]).collect();
    let recent = &deltas[deltas.len() - period..];

    let avg_gain: f64 = recent.iter().filter(|d| **d > 0.0).sum::<f64>() / period as f64;
    let avg_loss: f64 = -recent.iter().filter(|d| **d < 0.0).sum::<f64>() / period as f64;

    if avg_loss == 0.0 && avg_gain == 0.0 {
        return 50.0;
    }
    if avg_loss == 0.0 {
        return 100.0;
    }
    let rs = avg_gain / avg_loss;
    100.0 - 100.0 / (1.0 + rs)
}

/// Average true range over the last `period` bars
pub fn atr(candles: &[Candle], period: usize) -> f64 {
    if candles.len() < 2 || period == 0 {
        return 0.0;
    }
    let true_ranges: Vec<f64> = candles
        .windows(2)
        .map(|w| {
            let prev_close = w[0].close;
            let c = &w[1];
            (c.high - c.low)
                .max((c.high - prev_close).abs())
                .max((c.low - prev_close).abs())
        })
        .collect();

    let n = period.min(true_ranges.len());
    true_ranges[true_ranges.len() - n..].iter().sum::<f64>() / n as f64
}

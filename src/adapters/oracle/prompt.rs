//! Oracle Prompt Construction
//!
//! Renders the per-cycle market snapshots and account summary into the
//! prompt pair sent to the inference service, and spells out the JSON
//! document the service must answer with.

use crate::domain::market::{AccountSummary, MarketSnapshot};

pub fn system_prompt() -> String {
    "You are a professional cryptocurrency perpetual-futures trading AI for the \
     BTC, ETH, SOL, BNB, DOGE and XRP USDT swaps.\n\
     Trading rules:\n\
     - Only trade the six listed instruments.\n\
     - Leveraged trading; never request more leverage than you can justify.\n\
     - Every entry must carry a stop-loss and a take-profit price.\n\
     - Single-trade risk must stay small relative to total capital.\n\
     - Diversify; do not concentrate on a single instrument.\n\
     Technical context provided per instrument: EMA20 (trend), MACD \
     (momentum), RSI (overbought/oversold), ATR (volatility), funding rate \
     (sentiment).\n\
     Respond with a single JSON object of the form\n\
     {\"decisions\": [{\"symbol\": \"BTC\", \"side\": \"long|short|flat\", \
     \"notional_usd\": 0, \"leverage\": 1, \"stop_loss\": 0, \
     \"take_profit\": 0, \"confidence\": 0.0}]}\n\
     Omit instruments with no signal or mark them flat. Confidence is in \
     [0, 1]. All prices must be positive finite numbers. Do not add any \
     text outside the JSON object."
        .to_string()
}

pub fn user_prompt(snapshots: &[MarketSnapshot], account: &AccountSummary) -> String {
    let mut prompt = String::new();

    prompt.push_str(&format!(
        "You have been running for {} minutes and invoked {} times.\n\
         All series below are ordered oldest to newest at 3-minute intervals.\n\n\
         CURRENT MARKET STATE\n",
        account.minutes_since_start, account.oracle_calls
    ));

    for snap in snapshots {
        prompt.push_str(&format!(
            "\n{} DATA\n\
             current_price = {:.6}, ema20 = {:.6}, macd = {:.6}, rsi14 = {:.3}, \
             atr14 = {:.6}\n\
             funding_rate = {:.6}, volume_24h = {:.0}\n\
             recent closes: {:?}\n",
            snap.symbol,
            snap.last_price,
            snap.ema20,
            snap.macd,
            snap.rsi14,
            snap.atr14,
            snap.funding_rate,
            snap.volume_24h,
            snap.recent_closes,
        ));
    }

    prompt.push_str(&format!(
        "\nACCOUNT INFORMATION\n\
         Total return: {:.2}%\n\
         Account value: {:.2}\n\
         Available margin: {:.2}\n",
        account.total_return_pct, account.total_value, account.available_margin
    ));

    if account.open_positions.is_empty() {
        prompt.push_str("No open positions.\n");
    } else {
        prompt.push_str("Open positions:\n");
        for pos in &account.open_positions {
            prompt.push_str(&format!(
                "  {} {} size={} entry={} mark={} lev={}x upnl={:.2} sl={:?} tp={:?}\n",
                pos.symbol,
                pos.side,
                pos.size,
                pos.entry_price,
                pos.mark_price,
                pos.leverage,
                pos.unrealized_pnl,
                pos.stop_loss,
                pos.take_profit,
            ));
        }
    }

    prompt.push_str(
        "\nAnalyze the data and reply with your decisions as the JSON object \
         described in the system prompt. Consider existing positions and \
         their exit plans before proposing changes.",
    );
    prompt
}

//! DeepSeek Oracle Adapter
//!
//! Implements `OraclePort` against a chat-completions API. The model is
//! instructed to answer with a strict JSON document; the response is
//! schema-decoded and range-validated per instrument. A malformed entry
//! degrades only its instrument to flat; an undecodable response is a
//! `Malformed` failure for the cycle.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use crate::domain::decision::{Decision, Side};
use crate::domain::instrument::{self, Instrument};
use crate::domain::market::{AccountSummary, MarketSnapshot};
use crate::ports::oracle::{OracleError, OraclePort};

use super::prompt;

/// Missing or unreadable oracle credential; fatal at startup
#[derive(Debug, Error)]
pub enum TokenError {
    #[error("Oracle token file not found: {0}")]
    NotFound(String),
    #[error("Failed to read oracle token file {0}: {1}")]
    Unreadable(String, String),
    #[error("Oracle token file {0} is empty")]
    Empty(String),
}

/// Read the API credential from a local secret file
pub fn load_token(path: &Path) -> Result<String, TokenError> {
    if !path.exists() {
        return Err(TokenError::NotFound(path.display().to_string()));
    }
    let token = std::fs::read_to_string(path)
        .map_err(|e| TokenError::Unreadable(path.display().to_string(), e.to_string()))?;
    let token = token.trim().to_string();
    if token.is_empty() {
        return Err(TokenError::Empty(path.display().to_string()));
    }
    Ok(token)
}

#[derive(Debug, Clone)]
pub struct DeepSeekConfig {
    pub api_url: String,
    pub model: String,
    pub temperature: f64,
    pub timeout: Duration,
    /// Log full prompts and raw responses at info level
    pub log_calls: bool,
}

impl Default for DeepSeekConfig {
    fn default() -> Self {
        Self {
            api_url: "https://api.deepseek.com".to_string(),
            model: "deepseek-chat".to_string(),
            temperature: 0.7,
            timeout: Duration::from_secs(90),
            log_calls: false,
        }
    }
}

pub struct DeepSeekOracle {
    config: DeepSeekConfig,
    token: String,
    basket: Vec<Instrument>,
    http: Client,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f64,
    response_format: ResponseFormat<'a>,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct ResponseFormat<'a> {
    #[serde(rename = "type")]
    kind: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Deserialize)]
struct ChatResponseMessage {
    content: String,
}

/// The decision document as the model writes it, before validation
#[derive(Debug, Deserialize)]
struct RawDocument {
    #[serde(default)]
    decisions: Vec<RawDecision>,
}

#[derive(Debug, Deserialize)]
struct RawDecision {
    symbol: String,
    side: String,
    #[serde(default)]
    notional_usd: f64,
    #[serde(default = "default_leverage")]
    leverage: u32,
    #[serde(default)]
    stop_loss: Option<f64>,
    #[serde(default)]
    take_profit: Option<f64>,
    #[serde(default)]
    confidence: f64,
}

fn default_leverage() -> u32 {
    1
}

impl DeepSeekOracle {
    pub fn new(
        config: DeepSeekConfig,
        token: String,
        basket: Vec<Instrument>,
    ) -> Result<Self, OracleError> {
        let http = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| OracleError::Unavailable(format!("failed to create HTTP client: {}", e)))?;
        Ok(Self {
            config,
            token,
            basket,
            http,
        })
    }
}

#[async_trait]
impl OraclePort for DeepSeekOracle {
    async fn propose(
        &self,
        snapshots: &[MarketSnapshot],
        account: &AccountSummary,
    ) -> Result<Vec<Decision>, OracleError> {
        let system = prompt::system_prompt();
        let user = prompt::user_prompt(snapshots, account);

        if self.config.log_calls {
            tracing::info!(prompt = %user, "oracle request");
        } else {
            tracing::debug!(chars = user.len(), "oracle request built");
        }

        let request = ChatRequest {
            model: &self.config.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: &system,
                },
                ChatMessage {
                    role: "user",
                    content: &user,
                },
            ],
            temperature: self.config.temperature,
            response_format: ResponseFormat { kind: "json_object" },
        };

        let response = self
            .http
            .post(format!("{}/chat/completions", self.config.api_url))
            .bearer_auth(&self.token)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    OracleError::Unavailable("oracle request timed out".to_string())
                } else {
                    OracleError::Unavailable(e.to_string())
                }
            })?;

        let status = response.status();
        if status.is_server_error() || status.as_u16() == 429 {
            return Err(OracleError::Unavailable(format!("oracle returned {}", status)));
        }
        if !status.is_success() {
            return Err(OracleError::Malformed(format!("oracle returned {}", status)));
        }

        let chat: ChatResponse = response
            .json()
            .await
            .map_err(|e| OracleError::Malformed(e.to_string()))?;
        let content = chat
            .choices
            .first()
            .map(|c| c.message.content.as_str())
            .ok_or_else(|| OracleError::Malformed("response carried no choices".to_string()))?;

        if self.config.log_calls {
            tracing::info!(response = %content, "oracle response");
        }

        parse_decisions(content, &self.basket)
    }
}

/// Decode and validate the model's answer. Returns the decisions that
/// survived validation; entries that fail range checks degrade to flat.
pub fn parse_decisions(content: &str, basket: &[Instrument]) -> Result<Vec<Decision>, OracleError> {
    let json = extract_json(content);
    let document: RawDocument = serde_json::from_str(json)
        .map_err(|e| OracleError::Malformed(format!("undecodable decision document: {}", e)))?;

    let mut decisions: Vec<Decision> = Vec::new();
    for raw in document.decisions {
        let symbol = raw.symbol.to_uppercase();
        let Some(instrument) = instrument::find(basket, &symbol) else {
            tracing::warn!(symbol = %raw.symbol, "oracle proposed an unknown instrument, ignoring");
            continue;
        };
        if decisions.iter().any(|d| d.symbol == symbol) {
            tracing::warn!(%symbol, "duplicate decision entry, keeping the first");
            continue;
        }
        match validate_entry(&raw, instrument) {
            Ok(decision) => decisions.push(decision),
            Err(reason) => {
                tracing::warn!(%symbol, %reason, "malformed oracle entry, treating as flat");
                decisions.push(Decision::flat(&symbol));
            }
        }
    }
    Ok(decisions)
}

fn validate_entry(raw: &RawDecision, instrument: &Instrument) -> Result<Decision, String> {
    let side = match raw.side.to_lowercase().as_str() {
        "long" | "buy" => Side::Long,
        "short" | "sell" => Side::Short,
        "flat" | "hold" | "none" => Side::Flat,
        other => return Err(format!("unknown side {:?}", other)),
    };

    if side == Side::Flat {
        return Ok(Decision::flat(&instrument.symbol));
    }

    if raw.leverage == 0 || raw.leverage > instrument.max_leverage {
        return Err(format!(
            "leverage {} outside [1, {}]",
            raw.leverage, instrument.max_leverage
        ));
    }
    if !raw.notional_usd.is_finite() || raw.notional_usd <= 0.0 {
        return Err(format!("notional {} is not positive finite", raw.notional_usd));
    }
    if !(0.0..=1.0).contains(&raw.confidence) {
        return Err(format!("confidence {} outside [0, 1]", raw.confidence));
    }
    for (name, level) in [("stop_loss", raw.stop_loss), ("take_profit", raw.take_profit)] {
        match level {
            Some(v) if v.is_finite() && v > 0.0 => {}
            _ => return Err(format!("{} missing or non-finite", name)),
        }
    }

    Ok(Decision {
        symbol: instrument.symbol.clone(),
        side,
        target_notional: raw.notional_usd,
        leverage: raw.leverage,
        stop_loss: raw.stop_loss,
        take_profit: raw.take_profit,
        confidence: raw.confidence,
    })
}

/// Strip a markdown code fence if the model wrapped its JSON in one
fn extract_json(content: &str) -> &str {
    let trimmed = content.trim();
    if let Some(rest) = trimmed.strip_prefix("```json") {
        return rest.trim_end_matches("```").trim();
    }
    if let Some(rest) = trimmed.strip_prefix("```") {
        return rest.trim_end_matches("```").trim();
    }
    trimmed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::instrument::default_basket;

    fn entry(symbol: &str) -> String {
        format!(
            r#"{{"symbol":"{}","side":"long","notional_usd":500,"leverage":10,
                "stop_loss":48000,"take_profit":55000,"confidence":0.8}}"#,
            symbol
        )
    }

    #[test]
    fn test_parse_valid_document() {
        let content = format!(r#"{{"decisions":[{}]}}"#, entry("BTC"));
        let decisions = parse_decisions(&content, &default_basket()).unwrap();
        assert_eq!(decisions.len(), 1);
        assert_eq!(decisions[0].symbol, "BTC");
        assert_eq!(decisions[0].side, Side::Long);
        assert_eq!(decisions[0].leverage, 10);
    }

    #[test]
    fn test_parse_fenced_document() {
        let content = format!("```json\n{{\"decisions\":[{}]}}\n```", entry("ETH"));
        let decisions = parse_decisions(&content, &default_basket()).unwrap();
        assert_eq!(decisions[0].symbol, "ETH");
    }

    #[test]
    fn test_garbage_is_malformed() {
        let result = parse_decisions("I think you should buy BTC", &default_basket());
        assert!(matches!(result, Err(OracleError::Malformed(_))));
    }

    #[test]
    fn test_unknown_symbol_is_ignored() {
        let content = format!(r#"{{"decisions":[{}]}}"#, entry("SHIB"));
        let decisions = parse_decisions(&content, &default_basket()).unwrap();
        assert!(decisions.is_empty());
    }

    #[test]
    fn test_excessive_leverage_degrades_to_flat() {
        let content = r#"{"decisions":[{"symbol":"BTC","side":"long",
            "notional_usd":500,"leverage":1000,"stop_loss":48000,
            "take_profit":55000,"confidence":0.8}]}"#;
        let decisions = parse_decisions(content, &default_basket()).unwrap();
        assert_eq!(decisions.len(), 1);
        assert_eq!(decisions[0].side, Side::Flat);
    }

    #[test]
    fn test_missing_stop_degrades_to_flat() {
        let content = r#"{"decisions":[{"symbol":"BTC","side":"long",
            "notional_usd":500,"leverage":10,"take_profit":55000,
            "confidence":0.8}]}"#;
        let decisions = parse_decisions(content, &default_basket()).unwrap();
        assert_eq!(decisions[0].side, Side::Flat);
    }

    #[test]
    fn test_non_finite_price_degrades_to_flat() {
        // JSON cannot carry infinity; a negative stop exercises the same check
        let content = r#"{"decisions":[{"symbol":"BTC","side":"long",
            "notional_usd":500,"leverage":10,"stop_loss":-5,
            "take_profit":55000,"confidence":0.8}]}"#;
        let decisions = parse_decisions(content, &default_basket()).unwrap();
        assert_eq!(decisions[0].side, Side::Flat);
    }

    #[test]
    fn test_flat_entry_passes_without_levels() {
        let content = r#"{"decisions":[{"symbol":"BTC","side":"flat"}]}"#;
        let decisions = parse_decisions(content, &default_basket()).unwrap();
        assert_eq!(decisions[0].side, Side::Flat);
    }

    #[test]
    fn test_sell_alias_maps_to_short() {
        let content = r#"{"decisions":[{"symbol":"BTC","side":"sell",
            "notional_usd":500,"leverage":10,"stop_loss":52000,
            "take_profit":45000,"confidence":0.9}]}"#;
        let decisions = parse_decisions(content, &default_basket()).unwrap();
        assert_eq!(decisions[0].side, Side::Short);
    }

    #[test]
    fn test_duplicate_symbol_keeps_first() {
        let content = format!(r#"{{"decisions":[{},{}]}}"#, entry("BTC"), entry("BTC"));
        let decisions = parse_decisions(&content, &default_basket()).unwrap();
        assert_eq!(decisions.len(), 1);
    }

    #[test]
    fn test_load_token_missing_file() {
        let result = load_token(Path::new("/nonexistent/oracle.token"));
        assert!(matches!(result, Err(TokenError::NotFound(_))));
    }

    #[test]
    fn test_load_token_trims_whitespace() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("oracle.token");
        std::fs::write(&path, "sk-test-token\n").unwrap();
        assert_eq!(load_token(&path).unwrap(), "sk-test-token");
    }

    #[test]
    fn test_load_token_empty_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("oracle.token");
        std::fs::write(&path, "  \n").unwrap();
        assert!(matches!(load_token(&path), Err(TokenError::Empty(_))));
    }
}

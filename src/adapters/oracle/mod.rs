//! Oracle Adapter
//!
//! Chat-completions integration with the decision oracle, plus the
//! no-decision stub used for offline analysis.

mod deepseek;
mod prompt;
mod stub;

pub use deepseek::{load_token, parse_decisions, DeepSeekConfig, DeepSeekOracle, TokenError};
pub use prompt::{system_prompt, user_prompt};
pub use stub::StubOracle;

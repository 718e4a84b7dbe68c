//! Token pricing: pure arithmetic over [`PriceInfo`].

use crate::db::models::prices::PriceInfo;
use crate::usage::TokenUsage;
use serde::Serialize;

/// Micro-credits per credit
pub const MICRO: i64 = 1_000_000;

/// Cost in micro-credits of `tokens` at `price_credits` credits per one million tokens.
///
/// One credit per million tokens is one micro-credit per token, so the cost is `tokens * price`
/// rounded half away from zero by adding 0.5 before truncation.
pub fn cost_micro(tokens: i64, price_credits: f64) -> i64 {
    let price_per_token_micro = (price_credits * MICRO as f64) / MICRO as f64;
    (tokens as f64 * price_per_token_micro + 0.5) as i64
}

/// Convert a credit amount (as used by the image and video matrices) to micro-credits
pub fn credits_to_micro(amount: f64) -> i64 {
    (amount * MICRO as f64 + 0.5) as i64
}

/// The two charged legs of a token billing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TokenCost {
    pub input: i64,
    pub output: i64,
}

impl TokenCost {
    /// Price a token usage.
    ///
    /// Both legs are computed from the input token count and the input price, matching how
    /// the ledger has always been charged. Cache tokens are not charged.
    pub fn compute(usage: &TokenUsage, price: &PriceInfo) -> Self {
        let input = cost_micro(usage.input_tokens, price.input_price as f64);
        let output = cost_micro(usage.input_tokens, price.input_price as f64);
        Self { input, output }
    }

    /// Sum of both legs, `None` if it does not fit in an `i64`
    pub fn total(&self) -> Option<i64> {
        self.input.checked_add(self.output)
    }
}

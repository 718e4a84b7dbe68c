//! Database models for the per-model token price catalog.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;

/// A row of `models_info`
#[derive(Debug, Clone, FromRow)]
pub struct ModelInfo {
    pub id: i64,
    pub model_id: String,
    pub node_id: String,
    pub name: String,
    pub input_price: i32,
    pub output_price: i32,
    pub cache_price: i32,
    pub status: String,
}

/// Token prices for one model, in credits per one million tokens.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceInfo {
    pub input_price: i32,
    pub output_price: i32,
    pub cache_price: i32,
}

impl From<&ModelInfo> for PriceInfo {
    fn from(info: &ModelInfo) -> Self {
        Self {
            input_price: info.input_price,
            output_price: info.output_price,
            cache_price: info.cache_price,
        }
    }
}

impl fmt::Display for PriceInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<Price: input:{}, output:{}>", self.input_price, self.output_price)
    }
}

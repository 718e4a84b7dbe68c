//! Database models for the consumption ledger.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Kind of usage a consumption row bills, stored as TEXT
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, sqlx::Type, PartialEq, Eq)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ConsumeType {
    #[default]
    Text,
    Image,
    Video,
}

/// Database request for appending a consumption row
#[derive(Debug, Clone, Default)]
pub struct ConsumptionCreateDBRequest {
    pub user_id: i64,
    pub node_id: String,
    pub caller: String,
    pub model: String,
    pub model_id: String,
    pub actual_provider: String,
    pub actual_provider_id: String,
    pub consume_type: ConsumeType,
    pub total_consumed: i64,
    pub input_tokens: i64,
    pub output_tokens: i64,
    pub cache_tokens: i64,
    pub input_price: i32,
    pub output_price: i32,
    pub cache_price: i32,
}

/// Immutable audit row of one billed usage event. This is also the outbound confirmation payload.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow, PartialEq)]
pub struct ConsumptionRecord {
    pub id: i64,
    pub user_id: i64,
    pub node_id: String,
    pub caller: String,
    pub model: String,
    pub model_id: String,
    pub actual_provider: String,
    pub actual_provider_id: String,
    pub consume_type: ConsumeType,
    /// Stored for downstream reconciliation, never computed here
    pub discount_amount: i64,
    /// Micro-credits debited from the wallet
    pub total_consumed: i64,
    pub input_tokens: i64,
    pub output_tokens: i64,
    pub cache_tokens: i64,
    pub input_price: i32,
    pub output_price: i32,
    pub cache_price: i32,
    pub created_at: DateTime<Utc>,
}

/// Detail row for an image billing
#[derive(Debug, Clone, PartialEq)]
pub struct ImageDetailCreateDBRequest {
    pub quality: String,
    pub size: String,
    pub count: i64,
    pub unit_price: f64,
}

/// Detail row for a video billing
#[derive(Debug, Clone, PartialEq)]
pub struct VideoDetailCreateDBRequest {
    pub seconds: f64,
    pub size: String,
    pub unit_price: f64,
}

/// Detail attached to a consumption row, depending on the usage kind
#[derive(Debug, Clone, PartialEq)]
pub enum ConsumptionDetail {
    Image(ImageDetailCreateDBRequest),
    Video(VideoDetailCreateDBRequest),
}

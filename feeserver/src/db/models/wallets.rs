//! Database models for user wallets.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A user's wallet. `balance` is held in micro-credits and may be negative.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow, PartialEq)]
pub struct UserWallet {
    pub id: i64,
    pub user_id: i64,
    pub balance: i64,
    pub updated_at: DateTime<Utc>,
}

//! Token price lookup by billing model id.
//!
//! [`PriceCache`] reads `models_info` through the [`ModelPrices`] repository. Lookups are
//! serialized under one async mutex shared by every worker. With `price_cache.enabled` the same
//! mutex also guards an in-process map of found prices; a miss always falls through to the
//! database, and not-found results are never cached.

use crate::config::PriceCacheConfig;
use crate::db::{handlers::ModelPrices, models::prices::PriceInfo};
use crate::errors::Result;
use async_trait::async_trait;
use metrics::counter;
use sqlx::PgPool;
use std::collections::HashMap;
use tokio::sync::Mutex;
use tracing::{error, trace};

/// Resolves a billing model id to its token prices
#[async_trait]
pub trait PriceSource: Send + Sync {
    /// `Ok(None)` when the model has no price row. `Err` means the store could not be asked.
    async fn fetch_price(&self, model_id: &str) -> Result<Option<PriceInfo>>;
}

pub struct PriceCache {
    pool: PgPool,
    enabled: bool,
    prices: Mutex<HashMap<String, PriceInfo>>,
}

impl PriceCache {
    pub fn new(pool: PgPool, config: &PriceCacheConfig) -> Self {
        Self {
            pool,
            enabled: config.enabled,
            prices: Mutex::new(HashMap::new()),
        }
    }

    /// Drop every cached entry, forcing the next lookups to the database
    pub async fn invalidate(&self) {
        self.prices.lock().await.clear();
    }
}

#[async_trait]
impl PriceSource for PriceCache {
    async fn fetch_price(&self, model_id: &str) -> Result<Option<PriceInfo>> {
        let mut prices = self.prices.lock().await;

        if self.enabled {
            if let Some(price) = prices.get(model_id) {
                counter!("feeserver_price_cache_hits_total").increment(1);
                return Ok(Some(*price));
            }
        }

        let mut conn = self.pool.acquire().await?;
        let price = ModelPrices::new(&mut conn).get_price(model_id).await.map_err(|e| {
            error!(error = %e, model_id = model_id, "Failed to fetch model price");
            e
        })?;

        match price {
            Some(price) => {
                trace!(model_id = model_id, %price, "Fetched model price");
                if self.enabled {
                    prices.insert(model_id.to_string(), price);
                }
            }
            None => error!(model_id = model_id, "No price configured for model"),
        }

        Ok(price)
    }
}

//! Fee deduction for usage batches.
//!
//! [`FeeEngine::process`] turns one decoded [`UsageBatch`] into wallet debits and ledger rows.
//!
//! # Flow
//!
//! ```text
//! UsageBatch
//!     ↓
//! Phase 1: Price (no transaction open)
//!   - drop zero-usage events
//!   - text  → PriceSource (models_info by model_id)
//!   - image → PricingCatalog image matrix
//!   - video → PricingCatalog video matrix
//!   - any missing price aborts the whole batch (permanent)
//!   - a charge that overflows i64 aborts the whole batch (permanent)
//!     ↓
//! Phase 2: Deduct (one transaction for the whole batch)
//!   - SELECT wallet            (missing → retryable)
//!   - UPDATE balance if unchanged (0 rows → retryable)
//!   - INSERT user_consume (+ detail row for image/video)
//!   - COMMIT
//!     ↓
//! Phase 3: Record metrics, return the new ConsumptionRecords
//! ```
//!
//! Any failure in phase 2 drops the transaction, so either every event of the batch is billed
//! or none is. The engine is not idempotent: a batch redelivered after a successful commit (for
//! example because the ack was lost) is billed again.

use crate::db::handlers::{Consumptions, Wallets};
use crate::db::models::consumption::{
    ConsumeType, ConsumptionCreateDBRequest, ConsumptionDetail, ConsumptionRecord, ImageDetailCreateDBRequest,
    VideoDetailCreateDBRequest,
};
use crate::db::models::prices::PriceInfo;
use crate::errors::{Error, Result};
use crate::price_cache::PriceSource;
use crate::pricing::{PricingCatalog, TokenCost, credits_to_micro};
use crate::queue::{Confirmations, Consumer};
use crate::usage::{Usage, UsageBatch, UsageEvent};
use async_trait::async_trait;
use metrics::{counter, histogram};
use sqlx::PgPool;
use std::sync::Arc;
use tracing::{Instrument, debug, error, info, info_span, trace};

/// How one event is charged
#[derive(Debug, Clone, PartialEq)]
enum Charge {
    Tokens { price: PriceInfo, cost: TokenCost },
    Image { unit_price: f64, count: u32, amount: i64 },
    Video { unit_price: f64, amount: i64 },
}

impl Charge {
    /// Micro-credits to debit
    fn total(&self) -> Result<i64> {
        match self {
            Charge::Tokens { cost, .. } => cost.total().ok_or_else(|| Error::Overflow {
                operation: "token cost".to_string(),
            }),
            Charge::Image { amount, .. } | Charge::Video { amount, .. } => Ok(*amount),
        }
    }
}

/// A priced event, ready to be written
#[derive(Debug)]
struct BillableInstance<'a> {
    user_id: i64,
    event: &'a UsageEvent,
    charge: Charge,
    /// Micro-credits to debit
    cost: i64,
}

impl BillableInstance<'_> {
    fn to_create_request(&self) -> ConsumptionCreateDBRequest {
        let event = self.event;
        let mut request = ConsumptionCreateDBRequest {
            user_id: self.user_id,
            node_id: event.node_id.clone(),
            caller: event.caller.clone(),
            model: event.model.clone(),
            model_id: event.model_id.clone(),
            actual_provider: event.actual_provider.clone(),
            actual_provider_id: event.actual_provider_id.clone(),
            total_consumed: self.cost,
            ..Default::default()
        };

        match (&self.charge, &event.usage) {
            (Charge::Tokens { price, .. }, Usage::Text(tokens)) => {
                request.consume_type = ConsumeType::Text;
                request.input_tokens = tokens.input_tokens;
                request.output_tokens = tokens.output_tokens;
                request.cache_tokens = tokens.cache_tokens;
                request.input_price = price.input_price;
                request.output_price = price.output_price;
                request.cache_price = price.cache_price;
            }
            (Charge::Image { .. }, _) => request.consume_type = ConsumeType::Image,
            (Charge::Video { .. }, _) => request.consume_type = ConsumeType::Video,
            (Charge::Tokens { .. }, _) => {}
        }

        request
    }

    fn detail(&self) -> Option<ConsumptionDetail> {
        match (&self.charge, &self.event.usage) {
            (Charge::Image { unit_price, count, .. }, Usage::Image(image)) => {
                Some(ConsumptionDetail::Image(ImageDetailCreateDBRequest {
                    quality: image.quality.clone(),
                    size: image.size.clone(),
                    count: i64::from(*count),
                    unit_price: *unit_price,
                }))
            }
            (Charge::Video { unit_price, .. }, Usage::Video(video)) => {
                Some(ConsumptionDetail::Video(VideoDetailCreateDBRequest {
                    seconds: video.seconds,
                    size: video.size.clone(),
                    unit_price: *unit_price,
                }))
            }
            _ => None,
        }
    }
}

/// Bills usage batches against user wallets
pub struct FeeEngine {
    pool: PgPool,
    prices: Arc<dyn PriceSource>,
    catalog: Arc<PricingCatalog>,
}

impl FeeEngine {
    pub fn new(pool: PgPool, prices: Arc<dyn PriceSource>, catalog: Arc<PricingCatalog>) -> Self {
        Self { pool, prices, catalog }
    }

    /// Bill a batch.
    ///
    /// Returns the ledger rows written, which is empty when every event was a no-op. On error,
    /// [`Error::is_retryable`] says whether the batch may succeed on redelivery.
    pub async fn process(&self, batch: &UsageBatch) -> Result<Vec<ConsumptionRecord>> {
        let span = info_span!("process_usage_batch", batch_size = batch.len());

        async {
            let start = std::time::Instant::now();
            trace!(events = batch.len(), "Received usage batch");

            // Phase 1: price every billable event
            let instances = self.price_batch(batch).await.inspect_err(|e| {
                counter!("feeserver_batch_errors_total", "phase" => "price").increment(1);
                error!(error = %e, retryable = e.is_retryable(), "Failed to price usage batch");
            })?;

            if instances.is_empty() {
                debug!("Usage batch had nothing to bill");
                return Ok(Vec::new());
            }

            // Phase 2: one transaction for the whole batch
            let records = self.deduct_fees(&instances).await.inspect_err(|e| {
                counter!("feeserver_batch_errors_total", "phase" => "deduct").increment(1);
                error!(
                    error = %e,
                    retryable = e.is_retryable(),
                    batch = %serde_json::to_string(batch).unwrap_or_default(),
                    "Failed to deduct fees"
                );
            })?;

            // Phase 3: metrics
            let debited: i64 = records.iter().map(|r| r.total_consumed).sum();
            counter!("feeserver_billed_events_total").increment(records.len() as u64);
            histogram!("feeserver_batch_debit_micro_credits").record(debited as f64);
            histogram!("feeserver_batch_duration_seconds").record(start.elapsed().as_secs_f64());
            debug!(records = records.len(), debited = debited, "Billed usage batch");

            Ok(records)
        }
        .instrument(span)
        .await
    }

    async fn price_batch<'a>(&self, batch: &'a UsageBatch) -> Result<Vec<BillableInstance<'a>>> {
        let mut instances = Vec::with_capacity(batch.len());
        for event in batch {
            if event.usage.is_zero() {
                trace!(event = %event, "Skipping zero-usage event");
                continue;
            }

            let charge = self.price_event(event).await?;
            let cost = charge.total()?;
            let user_id = event.user_id()?;
            info!(
                user = %event.caller,
                provider = %event.provider,
                model = %event.model,
                charge = ?charge,
                "Consume info"
            );
            instances.push(BillableInstance {
                user_id,
                event,
                charge,
                cost,
            });
        }
        Ok(instances)
    }

    async fn price_event(&self, event: &UsageEvent) -> Result<Charge> {
        match &event.usage {
            Usage::Text(tokens) => {
                let price = self
                    .prices
                    .fetch_price(&event.model_id)
                    .await?
                    .ok_or_else(|| Error::MissingPrice {
                        model: event.model_id.clone(),
                        detail: Some(event.model.clone()),
                    })?;
                let cost = TokenCost::compute(tokens, &price);
                Ok(Charge::Tokens { price, cost })
            }
            Usage::Image(image) => {
                let pricing = self.catalog.image();
                let missing = || Error::MissingPrice {
                    model: event.model.clone(),
                    detail: Some(format!("{}/{}", image.quality, image.size)),
                };
                let unit_price = pricing.price(&event.model, &image.quality, &image.size).ok_or_else(missing)?;
                let cost = pricing
                    .cost(&event.model, &image.quality, &image.size, image.count)
                    .ok_or_else(missing)?;
                Ok(Charge::Image {
                    unit_price,
                    count: image.count,
                    amount: credits_to_micro(cost),
                })
            }
            Usage::Video(video) => {
                let pricing = self.catalog.video();
                let missing = || Error::MissingPrice {
                    model: event.model.clone(),
                    detail: Some(video.size.clone()),
                };
                let unit_price = pricing.price(&event.model, &video.size).ok_or_else(missing)?;
                let cost = pricing.cost(&event.model, &video.size, video.seconds).ok_or_else(missing)?;
                Ok(Charge::Video {
                    unit_price,
                    amount: credits_to_micro(cost),
                })
            }
        }
    }

    /// Debit every instance and append its ledger row inside one transaction.
    async fn deduct_fees(&self, instances: &[BillableInstance<'_>]) -> Result<Vec<ConsumptionRecord>> {
        let mut tx = self.pool.begin().await?;
        let mut records = Vec::with_capacity(instances.len());

        for instance in instances {
            let cost = instance.cost;

            let wallet = Wallets::new(&mut tx)
                .get_by_user_id(instance.user_id)
                .await?
                .ok_or(Error::WalletNotFound {
                    user_id: instance.user_id,
                })?;

            let new_balance = wallet.balance.checked_sub(cost).ok_or_else(|| Error::Overflow {
                operation: format!("balance for user {}", instance.user_id),
            })?;
            let rows = Wallets::new(&mut tx)
                .update_balance(wallet.id, wallet.balance, new_balance)
                .await?;
            if rows == 0 {
                error!(user_id = instance.user_id, cost = cost, "Update user balance matched no rows");
                return Err(Error::BalanceConflict {
                    user_id: instance.user_id,
                    cost,
                });
            }

            let mut consumptions = Consumptions::new(&mut tx);
            let record = consumptions.create(&instance.to_create_request()).await?;
            if let Some(detail) = instance.detail() {
                consumptions.create_detail(record.id, &detail).await?;
            }
            records.push(record);
        }

        tx.commit().await?;
        Ok(records)
    }
}

/// Queue consumer that bills each batch and publishes the resulting ledger rows
pub struct FeeConsumer {
    engine: Arc<FeeEngine>,
    confirmations: Confirmations,
}

impl FeeConsumer {
    pub fn new(engine: Arc<FeeEngine>, confirmations: Confirmations) -> Self {
        Self { engine, confirmations }
    }
}

#[async_trait]
impl Consumer for FeeConsumer {
    async fn consume(&self, batch: UsageBatch) -> Result<()> {
        let records = self.engine.process(&batch).await?;
        if !records.is_empty() {
            // Billing is committed; a lost confirmation is only logged
            let _ = self.confirmations.publish(&records).await;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PriceCacheConfig;
    use crate::db::handlers::ModelPrices;
    use crate::price_cache::PriceCache;
    use crate::queue::tests::RecordingBroker;
    use crate::usage::{ImageUsage, TokenUsage, VideoUsage};

    fn event(caller: &str, model: &str, model_id: &str, usage: Usage) -> UsageEvent {
        UsageEvent {
            id: format!("req-{caller}-{model}"),
            node_id: "node-1".into(),
            model: model.into(),
            model_id: model_id.into(),
            actual_model: model.into(),
            provider: "openai".into(),
            actual_provider: "openai".into(),
            actual_provider_id: "prov-1".into(),
            caller: caller.into(),
            caller_key: "sk-test".into(),
            client_version: None,
            agent_version: None,
            stream: false,
            usage,
        }
    }

    fn tokens(input: i64, output: i64, cache: i64) -> Usage {
        Usage::Text(TokenUsage {
            input_tokens: input,
            output_tokens: output,
            cache_tokens: cache,
            ..Default::default()
        })
    }

    fn engine(pool: &PgPool) -> FeeEngine {
        let prices = Arc::new(PriceCache::new(pool.clone(), &PriceCacheConfig::default()));
        FeeEngine::new(pool.clone(), prices, Arc::new(PricingCatalog::default()))
    }

    async fn seed_price(pool: &PgPool, model_id: &str, input_price: i32) {
        let mut conn = pool.acquire().await.unwrap();
        ModelPrices::new(&mut conn)
            .create(
                model_id,
                model_id,
                PriceInfo {
                    input_price,
                    output_price: 60,
                    cache_price: 5,
                },
            )
            .await
            .unwrap();
    }

    async fn seed_wallet(pool: &PgPool, user_id: i64, balance: i64) {
        let mut conn = pool.acquire().await.unwrap();
        Wallets::new(&mut conn).create(user_id, balance).await.unwrap();
    }

    async fn balance(pool: &PgPool, user_id: i64) -> Option<i64> {
        let mut conn = pool.acquire().await.unwrap();
        Wallets::new(&mut conn)
            .get_by_user_id(user_id)
            .await
            .unwrap()
            .map(|w| w.balance)
    }

    async fn ledger_rows(pool: &PgPool) -> i64 {
        sqlx::query_scalar("SELECT COUNT(*) FROM user_consume")
            .fetch_one(pool)
            .await
            .unwrap()
    }

    struct UnavailablePrices;

    #[async_trait]
    impl PriceSource for UnavailablePrices {
        async fn fetch_price(&self, _model_id: &str) -> Result<Option<PriceInfo>> {
            Err(Error::from(sqlx::Error::PoolTimedOut))
        }
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_zero_usage_batch_writes_nothing(pool: PgPool) {
        seed_wallet(&pool, 1, 1_000).await;
        let batch = UsageBatch::from(vec![
            event("1", "gpt-4o", "unpriced", tokens(0, 0, 0)),
            event(
                "1",
                "sora-2",
                "",
                Usage::Video(VideoUsage {
                    seconds: 0.0,
                    size: "1280x720".into(),
                }),
            ),
        ]);

        let records = engine(&pool).process(&batch).await.unwrap();

        assert!(records.is_empty());
        assert_eq!(balance(&pool, 1).await, Some(1_000));
        assert_eq!(ledger_rows(&pool).await, 0);
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_text_batch_debits_and_records(pool: PgPool) {
        seed_price(&pool, "m-gpt4o", 20).await;
        seed_wallet(&pool, 1, 100_000).await;
        seed_wallet(&pool, 2, 0).await;

        let batch = UsageBatch::from(vec![
            event("1", "gpt-4o", "m-gpt4o", tokens(1000, 500, 0)),
            event("2", "gpt-4o", "m-gpt4o", tokens(10, 0, 7)),
            event("1", "gpt-4o", "m-gpt4o", tokens(1, 0, 0)),
        ]);

        let records = engine(&pool).process(&batch).await.unwrap();

        assert_eq!(records.len(), 3);
        assert_eq!(records[0].total_consumed, 40_000);
        assert_eq!(records[0].input_tokens, 1000);
        assert_eq!(records[0].output_tokens, 500);
        assert_eq!(records[0].input_price, 20);
        assert_eq!(records[0].output_price, 60);
        assert_eq!(records[0].cache_price, 5);
        assert_eq!(records[0].model_id, "m-gpt4o");
        assert_eq!(records[0].consume_type, ConsumeType::Text);
        assert_eq!(records[1].total_consumed, 400);
        assert_eq!(records[2].total_consumed, 40);

        assert_eq!(balance(&pool, 1).await, Some(100_000 - 40_000 - 40));
        // Wallets may go negative
        assert_eq!(balance(&pool, 2).await, Some(-400));
        assert_eq!(ledger_rows(&pool).await, 3);
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_image_and_video_billing(pool: PgPool) {
        seed_wallet(&pool, 3, 10_000_000).await;

        let batch = UsageBatch::from(vec![
            event(
                "3",
                "gpt-image-1",
                "",
                Usage::Image(ImageUsage {
                    quality: "low".into(),
                    size: "1024x1024".into(),
                    count: 3,
                }),
            ),
            event(
                "3",
                "sora-2-pro",
                "",
                Usage::Video(VideoUsage {
                    seconds: 12.5,
                    size: "1024x1792".into(),
                }),
            ),
        ]);

        let records = engine(&pool).process(&batch).await.unwrap();

        assert_eq!(records[0].consume_type, ConsumeType::Image);
        assert_eq!(records[0].total_consumed, 33_000);
        assert_eq!(records[1].consume_type, ConsumeType::Video);
        assert_eq!(records[1].total_consumed, 6_250_000);
        assert_eq!(balance(&pool, 3).await, Some(10_000_000 - 33_000 - 6_250_000));

        let (images, videos): (i64, i64) = sqlx::query_as(
            "SELECT (SELECT COUNT(*) FROM user_consume_detail_image), (SELECT COUNT(*) FROM user_consume_detail_video)",
        )
        .fetch_one(&pool)
        .await
        .unwrap();
        assert_eq!((images, videos), (1, 1));
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_missing_wallet_rolls_back_whole_batch(pool: PgPool) {
        seed_price(&pool, "m-gpt4o", 20).await;
        seed_wallet(&pool, 1, 100_000).await;

        let batch = UsageBatch::from(vec![
            event("1", "gpt-4o", "m-gpt4o", tokens(1000, 0, 0)),
            event("404", "gpt-4o", "m-gpt4o", tokens(1000, 0, 0)),
        ]);

        let err = engine(&pool).process(&batch).await.unwrap_err();

        assert!(matches!(err, Error::WalletNotFound { user_id: 404 }));
        assert!(err.is_retryable());
        assert_eq!(balance(&pool, 1).await, Some(100_000));
        assert_eq!(ledger_rows(&pool).await, 0);
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_missing_price_is_permanent(pool: PgPool) {
        seed_price(&pool, "m-gpt4o", 20).await;
        seed_wallet(&pool, 1, 100_000).await;

        let batch = UsageBatch::from(vec![
            event("1", "gpt-4o", "m-gpt4o", tokens(1000, 0, 0)),
            event("1", "mystery", "m-unknown", tokens(1000, 0, 0)),
        ]);
        let err = engine(&pool).process(&batch).await.unwrap_err();
        assert!(matches!(err, Error::MissingPrice { .. }));
        assert!(!err.is_retryable());

        let image_batch = UsageBatch::from(vec![event(
            "1",
            "dall-e-2",
            "",
            Usage::Image(ImageUsage {
                quality: "hd".into(),
                size: "1024x1024".into(),
                count: 1,
            }),
        )]);
        let err = engine(&pool).process(&image_batch).await.unwrap_err();
        assert!(matches!(err, Error::MissingPrice { .. }));

        assert_eq!(balance(&pool, 1).await, Some(100_000));
        assert_eq!(ledger_rows(&pool).await, 0);
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_overflowing_token_cost_is_permanent(pool: PgPool) {
        seed_price(&pool, "m-gpt4o", 20).await;
        seed_wallet(&pool, 1, 1).await;

        // Each leg saturates at i64::MAX, so their sum does not fit
        let batch = UsageBatch::from(vec![
            event("1", "gpt-4o", "m-gpt4o", tokens(1000, 0, 0)),
            event("1", "gpt-4o", "m-gpt4o", tokens(i64::MAX, 0, 0)),
        ]);
        let err = engine(&pool).process(&batch).await.unwrap_err();

        assert!(matches!(err, Error::Overflow { .. }));
        assert!(!err.is_retryable());
        assert_eq!(balance(&pool, 1).await, Some(1));
        assert_eq!(ledger_rows(&pool).await, 0);
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_overflowing_balance_is_permanent(pool: PgPool) {
        seed_wallet(&pool, 1, -10).await;

        // The charge itself fits (saturated) but the debited balance would not
        let batch = UsageBatch::from(vec![event(
            "1",
            "sora-2",
            "",
            Usage::Video(VideoUsage {
                seconds: 1e30,
                size: "1280x720".into(),
            }),
        )]);
        let err = engine(&pool).process(&batch).await.unwrap_err();

        assert!(matches!(err, Error::Overflow { .. }));
        assert!(!err.is_retryable());
        assert_eq!(balance(&pool, 1).await, Some(-10));
        assert_eq!(ledger_rows(&pool).await, 0);
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_concurrent_balance_change_conflicts(pool: PgPool) {
        seed_price(&pool, "m-gpt4o", 20).await;
        seed_wallet(&pool, 1, 100_000).await;

        // Another writer debits the wallet and holds the row lock
        let mut other = pool.begin().await.unwrap();
        sqlx::query("UPDATE user_wallet SET balance = balance - 1 WHERE user_id = 1")
            .execute(&mut *other)
            .await
            .unwrap();

        let engine = engine(&pool);
        let batch = UsageBatch::from(vec![event("1", "gpt-4o", "m-gpt4o", tokens(1000, 0, 0))]);
        let billing = tokio::spawn(async move { engine.process(&batch).await });

        // Wait until the engine's conditional update is blocked on that lock
        tokio::time::timeout(std::time::Duration::from_secs(10), async {
            loop {
                let waiting: i64 = sqlx::query_scalar(
                    "SELECT COUNT(*) FROM pg_stat_activity WHERE datname = current_database() AND wait_event_type = 'Lock'",
                )
                .fetch_one(&pool)
                .await
                .unwrap();
                if waiting > 0 {
                    break;
                }
                tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("billing never blocked on the wallet row");

        other.commit().await.unwrap();
        let err = billing.await.unwrap().unwrap_err();

        assert!(matches!(err, Error::BalanceConflict { user_id: 1, cost: 40_000 }));
        assert!(err.is_retryable());
        // Only the concurrent debit landed
        assert_eq!(balance(&pool, 1).await, Some(99_999));
        assert_eq!(ledger_rows(&pool).await, 0);
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_large_image_count_is_recorded(pool: PgPool) {
        seed_wallet(&pool, 3, 0).await;

        let batch = UsageBatch::from(vec![event(
            "3",
            "gpt-image-1",
            "",
            Usage::Image(ImageUsage {
                quality: "low".into(),
                size: "1024x1024".into(),
                count: u32::MAX,
            }),
        )]);
        let records = engine(&pool).process(&batch).await.unwrap();

        let count: i64 = sqlx::query_scalar("SELECT count FROM user_consume_detail_image WHERE consume_id = $1")
            .bind(records[0].id)
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(count, i64::from(u32::MAX));
        assert_eq!(records[0].total_consumed, credits_to_micro(0.011 * u32::MAX as f64));
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_price_store_failure_is_retryable(pool: PgPool) {
        seed_wallet(&pool, 1, 100).await;
        let engine = FeeEngine::new(pool.clone(), Arc::new(UnavailablePrices), Arc::new(PricingCatalog::default()));

        let batch = UsageBatch::from(vec![event("1", "gpt-4o", "m-gpt4o", tokens(1, 0, 0))]);
        let err = engine.process(&batch).await.unwrap_err();

        assert!(err.is_retryable());
        assert_eq!(balance(&pool, 1).await, Some(100));
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_redelivery_after_commit_bills_again(pool: PgPool) {
        seed_price(&pool, "m-gpt4o", 20).await;
        seed_wallet(&pool, 1, 100_000).await;
        let engine = engine(&pool);
        let batch = UsageBatch::from(vec![event("1", "gpt-4o", "m-gpt4o", tokens(1000, 0, 0))]);

        engine.process(&batch).await.unwrap();
        engine.process(&batch).await.unwrap();

        assert_eq!(balance(&pool, 1).await, Some(100_000 - 2 * 40_000));
        assert_eq!(ledger_rows(&pool).await, 2);
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_fee_consumer_publishes_records(pool: PgPool) {
        seed_price(&pool, "m-gpt4o", 20).await;
        seed_wallet(&pool, 1, 100_000).await;

        let broker = Arc::new(RecordingBroker::default());
        let consumer = FeeConsumer::new(Arc::new(engine(&pool)), Confirmations::new(broker.clone()));

        consumer
            .consume(UsageBatch::from(vec![event("1", "gpt-4o", "m-gpt4o", tokens(1000, 0, 0))]))
            .await
            .unwrap();
        consumer
            .consume(UsageBatch::from(vec![event("1", "gpt-4o", "m-gpt4o", tokens(0, 0, 0))]))
            .await
            .unwrap();

        let published = broker.published();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].0, crate::queue::RESULTS_SUBJECT);
        let records: Vec<ConsumptionRecord> = serde_json::from_slice(&published[0].1).unwrap();
        assert_eq!(records[0].total_consumed, 40_000);
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_publish_failure_does_not_fail_consume(pool: PgPool) {
        seed_price(&pool, "m-gpt4o", 20).await;
        seed_wallet(&pool, 1, 100_000).await;

        let broker = Arc::new(RecordingBroker::failing());
        let consumer = FeeConsumer::new(Arc::new(engine(&pool)), Confirmations::new(broker));

        let result = consumer
            .consume(UsageBatch::from(vec![event("1", "gpt-4o", "m-gpt4o", tokens(1000, 0, 0))]))
            .await;

        assert!(result.is_ok());
        assert_eq!(balance(&pool, 1).await, Some(60_000));
    }
}

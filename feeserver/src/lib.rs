//! # feeserver: usage billing for model gateways
//!
//! `feeserver` turns usage reports streamed by gateway nodes into charges against per-user
//! balances. Nodes publish batches of usage events (LLM tokens, image generations, video renders)
//! to a NATS JetStream subject; this service prices every event, debits the user's wallet and
//! writes an audit row per event, all in one database transaction per batch, then publishes the
//! resulting records as billing confirmations.
//!
//! ## Architecture
//!
//! ```text
//! JetStream ──► queue::nats ──► queue::Gateway ──► fee::FeeConsumer ──► fee::FeeEngine
//!                    ▲              (buffer +            │                   │
//!                    │             worker pool)          │            pricing + price_cache
//!                    │                                   │                   │
//!                    └── billing.userConsume ◄───────────┘            db (one tx per batch)
//! ```
//!
//! - [`queue`]: subscription, bounded buffering, competing workers and the ack state machine.
//! - [`fee`]: batch pricing and the transactional deduction.
//! - [`pricing`]: token cost arithmetic and the image and video price matrices.
//! - [`price_cache`]: token price lookup by billing model id.
//! - [`db`]: repositories over `user_wallet`, `models_info` and `user_consume*`.
//!
//! Delivery is at least once. A batch either commits completely or not at all; whether a
//! failed batch is redelivered depends on [`errors::Error::is_retryable`].
//!
//! ## Running
//!
//! ```bash
//! DATABASE_URL=postgres://localhost/billing feeserver -f config.yaml
//! ```
//!
//! Migrations in `migrations/` run at startup. See [`config`] for every setting.

pub mod config;
pub mod db;
pub mod errors;
pub mod fee;
pub mod price_cache;
pub mod pricing;
pub mod queue;
pub mod telemetry;
pub mod usage;

use std::sync::Arc;
use std::time::Duration;

use sqlx::{PgPool, postgres::PgPoolOptions};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

pub use config::Config;

use config::PoolSettings;
use fee::{FeeConsumer, FeeEngine};
use price_cache::PriceCache;
use pricing::PricingCatalog;
use queue::{
    Gateway,
    nats::{JetStreamDelivery, NatsBroker},
};

/// Get the feeserver database migrator
pub fn migrator() -> sqlx::migrate::Migrator {
    sqlx::migrate!("./migrations")
}

/// Connect a pool with the configured limits
async fn connect_pool(url: &str, settings: &PoolSettings) -> anyhow::Result<PgPool> {
    let optional = |secs: u64| (secs > 0).then(|| Duration::from_secs(secs));

    let pool = PgPoolOptions::new()
        .max_connections(settings.max_connections)
        .min_connections(settings.min_connections)
        .acquire_timeout(Duration::from_secs(settings.acquire_timeout_secs))
        .idle_timeout(optional(settings.idle_timeout_secs))
        .max_lifetime(optional(settings.max_lifetime_secs))
        .connect(url)
        .await?;
    Ok(pool)
}

/// The assembled service: database pool, broker connection and gateway with its fee workers.
///
/// # Lifecycle
///
/// 1. **Create**: [`Application::new`] connects the pool, runs migrations, loads the price
///    matrices, connects to NATS and registers `nats.workers` fee consumers
/// 2. **Serve**: [`Application::serve`] subscribes and starts the gateway
/// 3. **Shutdown**: when the shutdown future resolves, workers finish their current message, the
///    broker connection is flushed and the pool is closed
pub struct Application {
    pool: PgPool,
    broker: Arc<NatsBroker>,
    gateway: Gateway<JetStreamDelivery>,
}

impl Application {
    /// Create a new application instance with all resources initialized
    pub async fn new(config: Config) -> anyhow::Result<Self> {
        debug!("Starting feeserver with configuration: {:#?}", config);

        let url = config
            .database_url()
            .ok_or_else(|| anyhow::anyhow!("database.url is not configured"))?;
        let pool = connect_pool(url, &config.database.pool).await?;
        migrator().run(&pool).await?;
        info!("Database ready");

        let catalog = Arc::new(PricingCatalog::load(&config.pricing)?);
        let prices = Arc::new(PriceCache::new(pool.clone(), &config.price_cache));
        let engine = Arc::new(FeeEngine::new(pool.clone(), prices, catalog));

        let broker = Arc::new(NatsBroker::connect(&config.nats).await?);
        let gateway = Gateway::new(config.nats.buffer_size, broker.clone(), CancellationToken::new());

        for i in 0..config.nats.workers {
            gateway.register_consumer(
                format!("fee-{i}"),
                Arc::new(FeeConsumer::new(engine.clone(), gateway.confirmations())),
            );
        }

        Ok(Self { pool, broker, gateway })
    }

    /// Consume until `shutdown` resolves, then stop gracefully
    pub async fn serve<F>(self, shutdown: F) -> anyhow::Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let deliveries = self.broker.subscribe().await?;
        self.gateway.start(deliveries)?;
        info!(consumers = ?self.gateway.consumer_names(), "Fee server consuming");

        shutdown.await;

        info!("Stopping consumers...");
        self.gateway.close().await?;

        info!("Closing database connections...");
        self.pool.close().await;

        Ok(())
    }
}

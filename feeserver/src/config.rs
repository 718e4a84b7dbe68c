//! Application configuration management.
//!
//! Configuration is loaded from a YAML file with environment variable overrides. The file path
//! defaults to `config.yaml` and can be set with the `-f` flag or `FEESERVER_CONFIG`.
//!
//! ## Loading Priority
//!
//! Sources are merged in this order (later sources override earlier ones):
//!
//! 1. **YAML config file** - Base configuration (default: `config.yaml`)
//! 2. **Environment variables** - Variables prefixed with `FEESERVER_` override YAML values
//! 3. **DATABASE_URL** - Special case: overrides `database.url` if set
//!
//! Nested values use double underscores, e.g. `FEESERVER_NATS__BUFFER_SIZE=500` sets
//! `nats.buffer_size`.
//!
//! ## Example
//!
//! ```yaml
//! database:
//!   url: postgres://feeserver@localhost/billing
//! nats:
//!   url: nats://localhost:4222
//!   topic: modelgate
//!   consumer: feeserver
//!   buffer_size: 100
//!   ack_wait: 10m
//!   workers: 4
//! pricing:
//!   image_overlay: config/image_pricing.yaml
//!   video_overlay: config/video_pricing.yaml
//! ```

use clap::Parser;
use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::errors::Error;

/// Simple CLI args - just for specifying config file
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Path to configuration file
    #[arg(short = 'f', long, env = "FEESERVER_CONFIG", default_value = "config.yaml")]
    pub config: String,

    /// Validate configuration and exit without connecting to anything.
    #[arg(long)]
    pub validate: bool,
}

/// Root configuration, loaded from YAML and environment variables.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub database: DatabaseConfig,
    pub nats: NatsConfig,
    pub pricing: PricingConfig,
    pub price_cache: PriceCacheConfig,
    /// Default tracing filter when `RUST_LOG` is unset
    pub log_level: LogLevel,
    /// Set from the `DATABASE_URL` environment variable
    #[serde(skip_serializing)]
    pub database_url: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct DatabaseConfig {
    /// PostgreSQL connection string
    pub url: Option<String>,
    pub pool: PoolSettings,
}

/// Connection pool parameters passed through to sqlx.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct PoolSettings {
    /// Maximum number of connections in the pool
    pub max_connections: u32,
    /// Minimum number of idle connections to maintain
    pub min_connections: u32,
    /// Maximum time to wait for a connection (seconds)
    pub acquire_timeout_secs: u64,
    /// Time before idle connections are closed (seconds, 0 = never)
    pub idle_timeout_secs: u64,
    /// Maximum lifetime of a connection (seconds, 0 = never)
    pub max_lifetime_secs: u64,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            max_connections: 10,
            min_connections: 0,
            acquire_timeout_secs: 30,
            idle_timeout_secs: 600,  // 10 minutes
            max_lifetime_secs: 1800, // 30 minutes
        }
    }
}

/// JetStream subscription settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct NatsConfig {
    pub url: String,
    pub user: Option<String>,
    #[serde(skip_serializing)]
    pub password: Option<String>,
    /// Subject usage batches are published on
    pub topic: String,
    /// Stream holding `topic`; looked up by subject when unset
    pub stream: Option<String>,
    /// Durable consumer name, shared by every instance in the deployment
    pub consumer: String,
    /// Capacity of the in-process buffer and the broker's max un-acked messages
    pub buffer_size: usize,
    /// How long the broker waits for an ack before redelivering
    #[serde(with = "humantime_serde")]
    pub ack_wait: Duration,
    /// Number of fee consumers competing for the buffer
    pub workers: usize,
}

impl Default for NatsConfig {
    fn default() -> Self {
        Self {
            url: "nats://localhost:4222".to_string(),
            user: None,
            password: None,
            topic: "modelgate".to_string(),
            stream: None,
            consumer: "feeserver".to_string(),
            buffer_size: 100,
            ack_wait: Duration::from_secs(10 * 60),
            workers: 4,
        }
    }
}

/// Overlay files for the image and video price matrices. A missing file keeps the built-in table.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct PricingConfig {
    pub image_overlay: Option<PathBuf>,
    pub video_overlay: Option<PathBuf>,
}

impl Default for PricingConfig {
    fn default() -> Self {
        Self {
            image_overlay: Some(PathBuf::from("config/image_pricing.yaml")),
            video_overlay: Some(PathBuf::from("config/video_pricing.yaml")),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct PriceCacheConfig {
    /// Keep found token prices in memory. Off by default so price edits apply immediately.
    pub enabled: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

impl Config {
    #[allow(clippy::result_large_err)]
    pub fn load(args: &Args) -> Result<Self, figment::Error> {
        let mut config: Self = Self::figment(args).extract()?;

        if let Some(url) = config.database_url.take() {
            config.database.url = Some(url);
        }

        config.validate().map_err(|e| figment::Error::from(e.to_string()))?;
        Ok(config)
    }

    pub fn figment(args: &Args) -> Figment {
        Figment::new()
            .merge(Yaml::file(&args.config))
            // FEESERVER_CONFIG names the file itself
            .merge(Env::prefixed("FEESERVER_").ignore(&["CONFIG"]).split("__"))
            .merge(Env::raw().only(&["DATABASE_URL"]))
    }

    /// The database connection string, once loading has resolved it
    pub fn database_url(&self) -> Option<&str> {
        self.database.url.as_deref()
    }

    /// Validate the configuration for consistency and required fields
    pub fn validate(&self) -> Result<(), Error> {
        let invalid = |message: &str| Error::Internal {
            operation: format!("Config validation: {message}"),
        };

        if self.database_url().is_none_or(|url| url.trim().is_empty()) {
            return Err(invalid(
                "database.url is not configured. Set DATABASE_URL or add database.url to the config file.",
            ));
        }
        if self.nats.topic.trim().is_empty() {
            return Err(invalid("nats.topic cannot be empty"));
        }
        if self.nats.consumer.trim().is_empty() {
            return Err(invalid("nats.consumer cannot be empty"));
        }
        if self.nats.buffer_size == 0 {
            return Err(invalid("nats.buffer_size must be at least 1"));
        }
        if self.nats.workers == 0 {
            return Err(invalid("nats.workers must be at least 1"));
        }
        if self.nats.user.is_some() != self.nats.password.is_some() {
            return Err(invalid("nats.user and nats.password must be set together"));
        }
        if self.database.pool.max_connections == 0 {
            return Err(invalid("database.pool.max_connections must be at least 1"));
        }

        Ok(())
    }
}

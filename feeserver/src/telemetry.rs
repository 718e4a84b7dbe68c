//! Tracing subscriber setup.
//!
//! Console output only. `RUST_LOG` takes precedence over the configured `log_level`, e.g.
//!
//! ```bash
//! RUST_LOG=feeserver=debug,sqlx=warn feeserver -f config.yaml
//! ```

use tracing::info;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::config::LogLevel;

/// Install the global subscriber: an env filter plus a fmt layer.
///
/// Fails if a global subscriber is already set.
pub fn init_telemetry(default_level: LogLevel) -> anyhow::Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level.as_str()));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .try_init()?;

    info!(default_level = default_level.as_str(), "Telemetry initialized");
    Ok(())
}

//! Queue consumption and dispatch.
//!
//! # Architecture
//!
//! ```text
//! JetStream durable consumer
//!          ↓  (pump task)
//!   bounded mpsc buffer  ← backpressure: the pump blocks when full
//!          ↓
//!   ┌──────┼──────┐      workers compete: each message goes to exactly one
//! fee-0  fee-1  fee-N    (registered named consumers)
//!          ↓
//!   decode → Consumer::consume → AckAction → settle
//! ```
//!
//! The buffer is shared, not broadcast: registering several consumers adds workers pulling from
//! the same queue. Each worker finishes a message (including its ack) before taking the next.
//!
//! # Acknowledgment
//!
//! | Outcome                         | Action                     |
//! |---------------------------------|----------------------------|
//! | undecodable or empty batch      | `Ack` (dropped)            |
//! | consumer succeeded              | `Ack`                      |
//! | consumer failed, retryable      | `Nak` after [`NAK_DELAY`]  |
//! | consumer failed, permanent      | `Term`                     |
//!
//! Redelivery is capped at [`MAX_DELIVER`] by the broker.

pub mod gateway;
pub mod nats;

use crate::errors::{Error, Result};
use crate::usage::UsageBatch;
use async_trait::async_trait;
use metrics::counter;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error};

pub use gateway::Gateway;

/// Subject billing confirmations are published to
pub const RESULTS_SUBJECT: &str = "billing.userConsume";
/// Delay before a retryable failure is redelivered
pub const NAK_DELAY: Duration = Duration::from_secs(5 * 60);
/// Maximum deliveries of one message before the broker drops it
pub const MAX_DELIVER: i64 = 5;
/// Bound on waiting for the broker to acknowledge a publish
pub const PUBLISH_ACK_WAIT: Duration = Duration::from_secs(30);

/// What to tell the broker about a delivered message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckAction {
    Ack,
    Nak(Duration),
    Term,
}

impl AckAction {
    /// Decide the action for a consumer's outcome
    pub fn for_outcome(outcome: &Result<()>) -> Self {
        match outcome {
            Ok(()) => AckAction::Ack,
            Err(e) if e.is_retryable() => AckAction::Nak(NAK_DELAY),
            Err(_) => AckAction::Term,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AckAction::Ack => "ack",
            AckAction::Nak(_) => "nak",
            AckAction::Term => "term",
        }
    }
}

/// A message handed out by the broker, awaiting settlement
#[async_trait]
pub trait Delivery: Send + Sync + 'static {
    fn payload(&self) -> &[u8];

    /// How many times the broker has delivered this message, if known
    fn attempt(&self) -> Option<i64> {
        None
    }

    async fn settle(&self, action: AckAction) -> Result<()>;
}

/// Handles decoded batches. Returning an error decides between redelivery and termination via
/// [`Error::is_retryable`].
#[async_trait]
pub trait Consumer: Send + Sync + 'static {
    async fn consume(&self, batch: UsageBatch) -> Result<()>;
}

/// Outbound side of the broker connection
#[async_trait]
pub trait Broker: Send + Sync + 'static {
    /// Publish and wait for the broker's acknowledgment
    async fn publish(&self, subject: String, payload: Vec<u8>) -> Result<()>;

    /// Release the connection. Un-acked deliveries are left to broker redelivery.
    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

/// Publishes billing confirmations to [`RESULTS_SUBJECT`]
#[derive(Clone)]
pub struct Confirmations {
    broker: Arc<dyn Broker>,
}

impl Confirmations {
    pub fn new(broker: Arc<dyn Broker>) -> Self {
        Self { broker }
    }

    /// Serialize `data` as JSON and publish it, waiting at most [`PUBLISH_ACK_WAIT`].
    ///
    /// Failures are logged here and returned; callers that already committed billing ignore them.
    pub async fn publish<T: Serialize + Sync>(&self, data: &T) -> Result<()> {
        let result = async {
            let payload = serde_json::to_vec(data)?;
            let size = payload.len();
            tokio::time::timeout(PUBLISH_ACK_WAIT, self.broker.publish(RESULTS_SUBJECT.to_string(), payload))
                .await
                .map_err(|_| Error::Transport(format!("publish ack not received within {PUBLISH_ACK_WAIT:?}")))??;
            Ok::<_, Error>(size)
        }
        .await;

        match result {
            Ok(size) => {
                debug!(subject = RESULTS_SUBJECT, bytes = size, "Published message");
                counter!("feeserver_confirmations_published_total").increment(1);
                Ok(())
            }
            Err(e) => {
                error!(subject = RESULTS_SUBJECT, error = %e, "Failed to publish message");
                counter!("feeserver_confirmations_failed_total").increment(1);
                Err(e)
            }
        }
    }
}

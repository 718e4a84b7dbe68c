//! NATS JetStream transport.
//!
//! Inbound messages come from a durable pull consumer on the configured topic. Every gateway
//! instance binding the same durable name shares one cursor, so the server load-balances
//! deliveries across processes the way a queue group would.

use async_nats::jetstream::{
    self, AckKind,
    consumer::{AckPolicy, PullConsumer, pull},
};
use async_trait::async_trait;
use futures::{StreamExt, stream::BoxStream};
use tracing::{debug, error, info, warn};

use super::{AckAction, Broker, Delivery, MAX_DELIVER};
use crate::config::NatsConfig;
use crate::errors::{Error, Result};

fn transport_err(operation: &str, e: impl std::fmt::Display) -> Error {
    Error::Transport(format!("{operation}: {e}"))
}

pub struct NatsBroker {
    client: async_nats::Client,
    jetstream: jetstream::Context,
    config: NatsConfig,
}

impl NatsBroker {
    /// Connect to the server, authenticating when a user is configured.
    pub async fn connect(config: &NatsConfig) -> Result<Self> {
        let options = match (&config.user, &config.password) {
            (Some(user), Some(password)) => async_nats::ConnectOptions::with_user_and_password(user.clone(), password.clone()),
            _ => async_nats::ConnectOptions::new(),
        };

        let client = options
            .name("feeserver")
            .connect(config.url.as_str())
            .await
            .map_err(|e| transport_err("connect", e))?;
        info!(url = %config.url, "Connected to NATS");

        Ok(Self {
            jetstream: jetstream::new(client.clone()),
            client,
            config: config.clone(),
        })
    }

    /// Bind the durable consumer and stream its deliveries.
    ///
    /// Errors on individual pulls are logged and skipped; the underlying stream reconnects.
    pub async fn subscribe(&self) -> Result<BoxStream<'static, JetStreamDelivery>> {
        let stream_name = match &self.config.stream {
            Some(name) => name.clone(),
            None => self
                .jetstream
                .stream_by_subject(self.config.topic.clone())
                .await
                .map_err(|e| transport_err("look up stream", e))?,
        };

        let stream = self
            .jetstream
            .get_stream(&stream_name)
            .await
            .map_err(|e| transport_err("get stream", e))?;

        let consumer: PullConsumer = stream
            .get_or_create_consumer(
                &self.config.consumer,
                pull::Config {
                    durable_name: Some(self.config.consumer.clone()),
                    filter_subject: self.config.topic.clone(),
                    ack_policy: AckPolicy::Explicit,
                    ack_wait: self.config.ack_wait,
                    max_deliver: MAX_DELIVER,
                    max_ack_pending: self.config.buffer_size as i64,
                    ..Default::default()
                },
            )
            .await
            .map_err(|e| transport_err("bind consumer", e))?;

        let messages = consumer.messages().await.map_err(|e| transport_err("subscribe", e))?;
        info!(
            stream = %stream_name,
            topic = %self.config.topic,
            consumer = %self.config.consumer,
            "Subscribed to durable consumer"
        );

        Ok(messages
            .filter_map(|message| async move {
                match message {
                    Ok(message) => Some(JetStreamDelivery { message }),
                    Err(e) => {
                        warn!(error = %e, "Failed to pull message");
                        None
                    }
                }
            })
            .boxed())
    }
}

#[async_trait]
impl Broker for NatsBroker {
    async fn publish(&self, subject: String, payload: Vec<u8>) -> Result<()> {
        let ack = self
            .jetstream
            .publish(subject, payload.into())
            .await
            .map_err(|e| transport_err("publish", e))?;
        let ack = ack.await.map_err(|e| transport_err("publish ack", e))?;
        debug!(stream = %ack.stream, sequence = ack.sequence, "Publish acknowledged");
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.client.flush().await.map_err(|e| transport_err("flush", e))?;
        info!("NATS connection flushed");
        Ok(())
    }
}

/// A JetStream message awaiting explicit acknowledgment
pub struct JetStreamDelivery {
    message: jetstream::Message,
}

#[async_trait]
impl Delivery for JetStreamDelivery {
    fn payload(&self) -> &[u8] {
        &self.message.payload
    }

    fn attempt(&self) -> Option<i64> {
        self.message.info().ok().map(|info| info.delivered)
    }

    async fn settle(&self, action: AckAction) -> Result<()> {
        let kind = match action {
            AckAction::Ack => AckKind::Ack,
            AckAction::Nak(delay) => AckKind::Nak(Some(delay)),
            AckAction::Term => AckKind::Term,
        };
        self.message.ack_with(kind).await.map_err(|e| {
            error!(error = %e, subject = %self.message.subject, "Failed to acknowledge message");
            transport_err("ack", e)
        })
    }
}

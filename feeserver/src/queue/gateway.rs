//! Gateway: bounded buffer, named workers, ack decisions.
//!
//! ```text
//! gateway.start(source)
//!   ├─ pump (spawned task):
//!   │    ├─ source.next()                  // transport deliveries
//!   │    └─ buffer_tx.send(delivery) ──────────────┐  blocks while the buffer is full
//!   │                                              │
//!   └─ one worker per registered consumer:         ▼
//!        ├─ lock shared receiver, recv ◄── competitive, never broadcast
//!        ├─ UsageBatch::decode()
//!        │    └─ malformed / empty → Ack
//!        ├─ consumer.consume(batch)        // a panic settles Term
//!        └─ delivery.settle(AckAction::for_outcome(..))
//! ```
//!
//! Stopping: the gateway's token cancels the pump and every worker; each worker also owns a
//! child token so [`Gateway::remove_consumer`] can stop one without touching the others. A
//! worker only observes cancellation while waiting on the buffer, never mid-message. Handles of
//! removed or replaced workers are kept so [`Gateway::close`] still waits for their last message.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex};

use futures::{FutureExt, Stream, StreamExt};
use metrics::counter;
use serde::Serialize;
use tokio::sync::{Mutex as AsyncMutex, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, info_span, warn};

use super::{AckAction, Broker, Confirmations, Consumer, Delivery};
use crate::errors::{Error, Result};
use crate::usage::UsageBatch;

type SharedReceiver<D> = Arc<AsyncMutex<mpsc::Receiver<D>>>;

// --- Registration ---

struct Registration {
    consumer: Arc<dyn Consumer>,
    stop: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

struct State {
    consumers: HashMap<String, Registration>,
    started: bool,
    pump: Option<JoinHandle<()>>,
    /// Workers that were stopped individually and may still be settling a message
    retired: Vec<JoinHandle<()>>,
}

// --- Gateway ---

pub struct Gateway<D: Delivery> {
    buffer_tx: mpsc::Sender<D>,
    buffer_rx: SharedReceiver<D>,
    broker: Arc<dyn Broker>,
    confirmations: Confirmations,
    shutdown: CancellationToken,
    state: Mutex<State>,
}

impl<D: Delivery> Gateway<D> {
    /// Create a gateway with a buffer of `buffer_size` messages.
    ///
    /// Cancelling `shutdown` stops the pump and all workers.
    pub fn new(buffer_size: usize, broker: Arc<dyn Broker>, shutdown: CancellationToken) -> Self {
        let (buffer_tx, buffer_rx) = mpsc::channel(buffer_size.max(1));
        Self {
            buffer_tx,
            buffer_rx: Arc::new(AsyncMutex::new(buffer_rx)),
            confirmations: Confirmations::new(broker.clone()),
            broker,
            shutdown,
            state: Mutex::new(State {
                consumers: HashMap::new(),
                started: false,
                pump: None,
                retired: Vec::new(),
            }),
        }
    }

    /// Publisher for billing confirmations sharing this gateway's broker connection
    pub fn confirmations(&self) -> Confirmations {
        self.confirmations.clone()
    }

    /// Bind a named worker to the shared buffer.
    ///
    /// Workers registered before [`start`](Self::start) are launched by it; later registrations
    /// start immediately. Re-using a name replaces (and stops) the previous worker.
    pub fn register_consumer(&self, name: impl Into<String>, consumer: Arc<dyn Consumer>) {
        let name = name.into();
        let mut state = self.lock_state();

        if let Some(previous) = state.consumers.remove(&name) {
            warn!(consumer = %name, "Replacing registered consumer");
            previous.stop.cancel();
            state.retired.extend(previous.handle);
        }

        let mut registration = Registration {
            consumer,
            stop: self.shutdown.child_token(),
            handle: None,
        };
        if state.started {
            registration.handle = Some(self.spawn_worker(&name, &registration));
        }
        state.consumers.insert(name, registration);
    }

    /// Stop and deregister one worker. Returns false if no consumer has that name.
    ///
    /// A message the worker is currently handling is finished and settled first, and
    /// [`close`](Self::close) waits for it.
    pub fn remove_consumer(&self, name: &str) -> bool {
        let mut state = self.lock_state();
        match state.consumers.remove(name) {
            Some(registration) => {
                registration.stop.cancel();
                state.retired.extend(registration.handle);
                info!(consumer = %name, "Consumer removed");
                true
            }
            None => false,
        }
    }

    /// Names of the registered consumers
    pub fn consumer_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.lock_state().consumers.keys().cloned().collect();
        names.sort();
        names
    }

    /// Launch the workers and start pumping deliveries from `source` into the buffer.
    pub fn start<S>(&self, source: S) -> Result<()>
    where
        S: Stream<Item = D> + Send + 'static,
    {
        let mut state = self.lock_state();
        if state.consumers.is_empty() {
            return Err(Error::Internal {
                operation: "start gateway: no consumers registered".to_string(),
            });
        }
        if state.started {
            return Err(Error::Internal {
                operation: "start gateway: already started".to_string(),
            });
        }

        for (name, registration) in state.consumers.iter_mut() {
            let handle = self.spawn_worker(name, registration);
            registration.handle = Some(handle);
        }

        state.pump = Some(tokio::spawn(run_pump(source, self.buffer_tx.clone(), self.shutdown.clone())));
        state.started = true;
        Ok(())
    }

    /// Publish a payload to the results subject. See [`Confirmations::publish`].
    pub async fn publish<T: Serialize + Sync>(&self, data: &T) -> Result<()> {
        self.confirmations.publish(data).await
    }

    /// Stop everything, wait for in-flight messages to settle, then release the broker.
    pub async fn close(&self) -> Result<()> {
        self.shutdown.cancel();

        let handles: Vec<JoinHandle<()>> = {
            let mut state = self.lock_state();
            let mut handles: Vec<JoinHandle<()>> = state
                .consumers
                .drain()
                .filter_map(|(_, mut registration)| registration.handle.take())
                .collect();
            handles.append(&mut state.retired);
            handles.extend(state.pump.take());
            handles
        };

        for handle in handles {
            if let Err(e) = handle.await {
                error!(error = %e, "Gateway task panicked");
            }
        }

        self.broker.close().await?;
        info!("Gateway closed");
        Ok(())
    }

    fn spawn_worker(&self, name: &str, registration: &Registration) -> JoinHandle<()> {
        tokio::spawn(run_worker(
            name.to_string(),
            registration.consumer.clone(),
            self.buffer_rx.clone(),
            registration.stop.clone(),
        ))
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, State> {
        // A panic while holding this lock leaves the map itself consistent
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

// --- Tasks ---

/// Move deliveries from the transport into the bounded buffer until cancelled or exhausted.
async fn run_pump<D, S>(source: S, buffer_tx: mpsc::Sender<D>, shutdown: CancellationToken)
where
    D: Delivery,
    S: Stream<Item = D> + Send + 'static,
{
    let mut source = std::pin::pin!(source);
    loop {
        let delivery = tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            next = source.next() => match next {
                Some(delivery) => delivery,
                None => {
                    warn!("Delivery source ended");
                    break;
                }
            },
        };

        tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            sent = buffer_tx.send(delivery) => {
                if sent.is_err() {
                    break;
                }
            }
        }
    }
    debug!("Delivery pump stopped");
}

async fn run_worker<D: Delivery>(
    name: String,
    consumer: Arc<dyn Consumer>,
    buffer_rx: SharedReceiver<D>,
    stop: CancellationToken,
) {
    info!(consumer = %name, "Consumer started");
    loop {
        let delivery = tokio::select! {
            biased;
            _ = stop.cancelled() => break,
            next = async { buffer_rx.lock().await.recv().await } => match next {
                Some(delivery) => delivery,
                None => break,
            },
        };

        handle_delivery(&name, consumer.as_ref(), delivery).await;
    }
    info!(consumer = %name, "Consumer stopped");
}

/// Decode, consume and settle one message.
async fn handle_delivery<D: Delivery>(name: &str, consumer: &dyn Consumer, delivery: D) {
    let span = info_span!("handle_delivery", consumer = %name, attempt = ?delivery.attempt());

    async {
        let action = match UsageBatch::decode(delivery.payload()) {
            Err(e) => {
                error!(error = %e, payload = %String::from_utf8_lossy(delivery.payload()), "Failed to decode usage batch");
                AckAction::Ack
            }
            Ok(batch) if batch.is_empty() => AckAction::Ack,
            Ok(batch) => {
                let events = batch.len();
                match AssertUnwindSafe(consumer.consume(batch)).catch_unwind().await {
                    Ok(outcome) => {
                        if let Err(e) = &outcome {
                            warn!(error = %e, retryable = e.is_retryable(), events = events, "Consumer failed");
                        }
                        AckAction::for_outcome(&outcome)
                    }
                    Err(panic) => {
                        let reason = panic
                            .downcast_ref::<&str>()
                            .map(|s| s.to_string())
                            .or_else(|| panic.downcast_ref::<String>().cloned())
                            .unwrap_or_default();
                        error!(reason = %reason, events = events, "Consumer panicked");
                        counter!("feeserver_consumer_panics_total").increment(1);
                        AckAction::Term
                    }
                }
            }
        };

        counter!("feeserver_messages_total", "action" => action.as_str()).increment(1);
        match delivery.settle(action).await {
            Ok(()) => debug!(action = action.as_str(), "Message settled"),
            Err(e) => error!(error = %e, action = action.as_str(), "Failed to settle message"),
        }
    }
    .instrument(span)
    .await
}

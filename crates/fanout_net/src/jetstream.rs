//! NATS JetStream delivery substrate.
//!
//! Broker primitives map onto JetStream as follows:
//!
//! | Broker concept      | JetStream                                              |
//! |---------------------|--------------------------------------------------------|
//! | direct exchange     | stream over `<exchange>.>`, interest retention, file   |
//! | durable queue       | durable pull consumer, explicit ack                    |
//! | binding key         | the consumer's filter subject                          |
//! | persistent publish  | publish awaiting the stream's ack                      |
//! | prefetch            | pull batch size, `max_ack_pending` on the consumer     |
//!
//! Interest retention drops messages no consumer filters on, which matches
//! an exchange discarding unroutable messages. A delivery dropped without
//! being settled is NAKed from a spawned task; if that NAK never reaches the
//! server the message is redelivered once [`ACK_WAIT`] elapses. Until one of
//! the two happens, `max_ack_pending` keeps the queue's other consumers
//! waiting.

use std::pin::Pin;
use std::time::Duration;

use async_nats::jetstream::{
    self, AckKind,
    consumer::{AckPolicy, PullConsumer, pull},
    stream,
};
use futures::StreamExt;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::NetError;
use crate::routing;
use crate::substrate::{Consumer, Delivery, DeliverySubstrate, QueueOptions};

/// The environment variable the substrate URL is read from.
pub const NATS_URL_ENV: &str = "NATS_URL";

/// Server-side cap on unacknowledged messages per queue.
pub const MAX_ACK_PENDING: i64 = 1;

/// How long the server waits for an ack before redelivering.
pub const ACK_WAIT: Duration = Duration::from_secs(30);

/// How long one pull request waits before it is reissued.
const PULL_EXPIRY: Duration = Duration::from_secs(30);

/// A JetStream-backed [`DeliverySubstrate`].
///
/// The connection is opened by [`JetStreamSubstrate::connect`]; the exchange
/// stream is declared lazily on first use. Reconnects are handled by the
/// `async-nats` client.
pub struct JetStreamSubstrate {
    client: async_nats::Client,
    context: jetstream::Context,
    exchange: String,
    /// Idle time after which a non-durable queue is discarded.
    inactive_threshold: Duration,
    stream: OnceCell<stream::Stream>,
}

impl std::fmt::Debug for JetStreamSubstrate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JetStreamSubstrate")
            .field("exchange", &self.exchange)
            .field("inactive_threshold", &self.inactive_threshold)
            .field("stream_declared", &self.stream.initialized())
            .finish_non_exhaustive()
    }
}

impl JetStreamSubstrate {
    /// Connect to NATS at `url`, routing through `exchange`.
    ///
    /// # Errors
    ///
    /// Returns [`NetError::Connect`] if the connection cannot be established.
    pub async fn connect(url: &str, exchange: &str) -> Result<Self, NetError> {
        info!(url, exchange, "connecting to NATS");
        let client = async_nats::connect(url).await?;
        info!("NATS connection established");
        let context = jetstream::new(client.clone());
        Ok(Self {
            client,
            context,
            exchange: exchange.to_string(),
            inactive_threshold: Duration::from_secs(20 * 60),
            stream: OnceCell::new(),
        })
    }

    /// Set how long a non-durable queue may sit idle before the server
    /// discards it.
    #[must_use]
    pub fn with_inactive_threshold(mut self, threshold: Duration) -> Self {
        self.inactive_threshold = threshold;
        self
    }

    /// Flush pending publishes and release the connection.
    ///
    /// # Errors
    ///
    /// Returns [`NetError::Nats`] if the flush fails.
    pub async fn close(self) -> Result<(), NetError> {
        self.client.flush().await.map_err(NetError::nats)?;
        info!(exchange = self.exchange, "NATS connection closed");
        Ok(())
    }

    async fn exchange(&self) -> Result<&stream::Stream, NetError> {
        self.stream
            .get_or_try_init(|| async {
                debug!(exchange = self.exchange, "declaring exchange stream");
                self.context
                    .get_or_create_stream(stream::Config {
                        name: self.exchange.clone(),
                        subjects: vec![routing::exchange_subjects(&self.exchange)],
                        retention: stream::RetentionPolicy::Interest,
                        storage: stream::StorageType::File,
                        ..Default::default()
                    })
                    .await
                    .map_err(NetError::nats)
            })
            .await
    }
}

/// Pull consumer backing `queue`, filtered on `routing_key`.
///
/// A durable queue never expires; a transient one is discarded by the server
/// after `inactive_threshold` without a consumer.
#[must_use]
pub fn consumer_config(
    exchange: &str,
    queue: &str,
    routing_key: &str,
    durable: bool,
    inactive_threshold: Duration,
) -> pull::Config {
    let name = routing::consumer_name(queue);
    pull::Config {
        durable_name: durable.then(|| name.clone()),
        name: Some(name),
        filter_subject: routing::routed_subject(exchange, routing_key),
        ack_policy: AckPolicy::Explicit,
        ack_wait: ACK_WAIT,
        max_ack_pending: MAX_ACK_PENDING,
        inactive_threshold: if durable {
            Duration::ZERO
        } else {
            inactive_threshold
        },
        ..Default::default()
    }
}

impl DeliverySubstrate for JetStreamSubstrate {
    type Consumer = JetStreamConsumer;

    async fn declare_queue(&self, queue: &str, options: QueueOptions) -> Result<(), NetError> {
        let stream = self.exchange().await?;
        let consumer: PullConsumer = stream
            .get_or_create_consumer(
                &routing::consumer_name(queue),
                consumer_config(
                    &self.exchange,
                    queue,
                    queue,
                    options.durable,
                    self.inactive_threshold,
                ),
            )
            .await
            .map_err(NetError::nats)?;

        let existing_durable = consumer.cached_info().config.durable_name.is_some();
        if existing_durable != options.durable {
            return Err(NetError::QueueMismatch {
                queue: queue.to_string(),
                existing_durable,
            });
        }
        debug!(queue, durable = options.durable, "queue declared");
        Ok(())
    }

    async fn bind_queue(&self, queue: &str, routing_key: &str) -> Result<(), NetError> {
        let stream = self.exchange().await?;
        let consumer: PullConsumer = stream
            .get_consumer(&routing::consumer_name(queue))
            .await
            .map_err(|_| NetError::QueueNotFound(queue.to_string()))?;

        let info = consumer.cached_info();
        let subject = routing::routed_subject(&self.exchange, routing_key);
        if info.config.filter_subject == subject {
            return Ok(());
        }

        let durable = info.config.durable_name.is_some();
        stream
            .create_consumer(consumer_config(
                &self.exchange,
                queue,
                routing_key,
                durable,
                self.inactive_threshold,
            ))
            .await
            .map_err(NetError::nats)?;
        debug!(queue, routing_key, "queue rebound");
        Ok(())
    }

    async fn publish_persistent(
        &self,
        routing_key: &str,
        payload: Vec<u8>,
    ) -> Result<(), NetError> {
        self.exchange().await?;
        let subject = routing::routed_subject(&self.exchange, routing_key);
        let ack = self
            .context
            .publish(subject, payload.into())
            .await
            .map_err(NetError::nats)?;
        ack.await.map_err(NetError::nats)?;
        Ok(())
    }

    async fn consume(&self, queue: &str, prefetch: u16) -> Result<JetStreamConsumer, NetError> {
        let stream = self.exchange().await?;
        let consumer: PullConsumer = stream
            .get_consumer(&routing::consumer_name(queue))
            .await
            .map_err(|_| NetError::QueueNotFound(queue.to_string()))?;
        Ok(JetStreamConsumer {
            consumer,
            tag: format!("ctag-{}", Uuid::new_v4()),
            batch_size: usize::from(prefetch.max(1)),
            batch: None,
        })
    }

    async fn delete_queue(&self, queue: &str) -> Result<(), NetError> {
        let stream = self.exchange().await?;
        let name = routing::consumer_name(queue);
        if stream.get_consumer::<pull::Config>(&name).await.is_err() {
            debug!(queue, "queue already absent");
            return Ok(());
        }
        stream.delete_consumer(&name).await.map_err(NetError::nats)?;
        debug!(queue, "queue deleted");
        Ok(())
    }
}

/// A pull session on one JetStream consumer.
pub struct JetStreamConsumer {
    consumer: PullConsumer,
    tag: String,
    batch_size: usize,
    batch: Option<Pin<Box<pull::Batch>>>,
}

impl std::fmt::Debug for JetStreamConsumer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JetStreamConsumer")
            .field("tag", &self.tag)
            .field("batch_size", &self.batch_size)
            .finish_non_exhaustive()
    }
}

impl Consumer for JetStreamConsumer {
    type Delivery = JetStreamDelivery;

    fn tag(&self) -> &str {
        &self.tag
    }

    async fn next(&mut self) -> Result<JetStreamDelivery, NetError> {
        loop {
            if self.batch.is_none() {
                let batch = self
                    .consumer
                    .batch()
                    .max_messages(self.batch_size)
                    .expires(PULL_EXPIRY)
                    .messages()
                    .await
                    .map_err(NetError::nats)?;
                self.batch = Some(Box::pin(batch));
            }
            let Some(batch) = self.batch.as_mut() else {
                continue;
            };

            match batch.next().await {
                Some(Ok(message)) => {
                    return Ok(JetStreamDelivery {
                        message: Some(message),
                    });
                }
                Some(Err(err)) => {
                    self.batch = None;
                    return Err(NetError::nats(err));
                }
                // Pull request expired or was filled; issue another.
                None => self.batch = None,
            }
        }
    }

    async fn cancel(self) -> Result<(), NetError> {
        debug!(consumer = self.tag, "consumer cancelled");
        Ok(())
    }
}

/// A message pulled from a JetStream consumer.
///
/// `None` once settled.
#[derive(Debug)]
pub struct JetStreamDelivery {
    message: Option<jetstream::Message>,
}

impl Delivery for JetStreamDelivery {
    fn payload(&self) -> &[u8] {
        self.message
            .as_ref()
            .map_or(&[][..], |message| message.payload.as_ref())
    }

    fn redelivered(&self) -> bool {
        self.message
            .as_ref()
            .and_then(|message| message.info().ok())
            .is_some_and(|info| info.delivered > 1)
    }

    async fn ack(mut self) -> Result<(), NetError> {
        match self.message.take() {
            Some(message) => message.ack().await.map_err(NetError::nats),
            None => Ok(()),
        }
    }

    async fn requeue(mut self) -> Result<(), NetError> {
        match self.message.take() {
            Some(message) => message
                .ack_with(AckKind::Nak(None))
                .await
                .map_err(NetError::nats),
            None => Ok(()),
        }
    }
}

impl Drop for JetStreamDelivery {
    fn drop(&mut self) {
        let Some(message) = self.message.take() else {
            return;
        };
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!("delivery dropped outside a runtime; redelivery waits for the ack timeout");
            return;
        };
        runtime.spawn(async move {
            if let Err(err) = message.ack_with(AckKind::Nak(None)).await {
                warn!(%err, "failed to release dropped delivery");
            }
        });
    }
}

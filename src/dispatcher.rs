// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Subscriptions
//!
//! This module binds a queue to an exchange and consumes it in a dedicated
//! tokio task. Each subscription owns one channel, limited to
//! [`SUBSCRIBER_PREFETCH_COUNT`] unacknowledged deliveries, which is the only
//! backpressure between the broker and a slow handler.
//!
//! The worker handles deliveries strictly one after the other, in the order
//! the broker sends them. It stops when the delivery stream ends, which
//! happens when the connection is closed.

use crate::{
    channel::{AmqpConnection, DeclaredQueue},
    codec::{BincodeCodec, Codec, JsonCodec},
    consumer::consume,
    delivery::AckDecision,
    errors::AmqpError,
    otel::CONSUMER_TRACER_NAME,
    queue::QueueDurability,
    routing::DEFAULT_DEAD_LETTER_EXCHANGE,
    topology::declare_and_bind,
};
use futures_util::StreamExt;
use lapin::options::{BasicConsumeOptions, BasicQosOptions};
use opentelemetry::global;
use serde::de::DeserializeOwned;
use std::future::Future;
use tokio::task::JoinHandle;
use tracing::{debug, error};

/// Maximum number of unacknowledged deliveries per subscription channel
pub const SUBSCRIBER_PREFETCH_COUNT: u16 = 10;

/// What a subscription does with a payload its codec cannot decode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DecodeFailurePolicy {
    /// Reject without requeue, the dead-letter exchange receives it
    #[default]
    NackDiscard,
    /// Issue no acknowledgment; the broker redelivers it once this consumer is gone
    Ignore,
}

/// Where and how a subscription consumes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionDefinition {
    pub(crate) exchange: String,
    pub(crate) queue_name: String,
    pub(crate) routing_key: String,
    pub(crate) durability: QueueDurability,
    pub(crate) dead_letter_exchange: String,
    pub(crate) on_decode_error: DecodeFailurePolicy,
}

impl SubscriptionDefinition {
    /// Creates a subscription definition.
    ///
    /// The queue dead-letters to `peril_dlx` and undecodable payloads are
    /// discarded unless configured otherwise.
    ///
    /// # Parameters
    /// * `exchange` - Exchange the queue is bound to
    /// * `queue_name` - Queue to declare and consume
    /// * `routing_key` - Binding key, `*` matches one segment on topic exchanges
    /// * `durability` - Durability profile of the queue
    pub fn new(
        exchange: &str,
        queue_name: &str,
        routing_key: &str,
        durability: QueueDurability,
    ) -> SubscriptionDefinition {
        SubscriptionDefinition {
            exchange: exchange.to_owned(),
            queue_name: queue_name.to_owned(),
            routing_key: routing_key.to_owned(),
            durability,
            dead_letter_exchange: DEFAULT_DEAD_LETTER_EXCHANGE.to_owned(),
            on_decode_error: DecodeFailurePolicy::default(),
        }
    }

    pub fn dead_letter_exchange(mut self, exchange: &str) -> Self {
        self.dead_letter_exchange = exchange.to_owned();
        self
    }

    pub fn on_decode_error(mut self, policy: DecodeFailurePolicy) -> Self {
        self.on_decode_error = policy;
        self
    }
}

/// A running subscription.
///
/// Dropping it does not stop the worker; the worker lives until the
/// connection is closed or [`Subscription::cancel`] is called.
#[derive(Debug)]
pub struct Subscription {
    queue: DeclaredQueue,
    worker: JoinHandle<()>,
}

impl Subscription {
    /// The queue consumed by this subscription.
    pub fn queue(&self) -> &DeclaredQueue {
        &self.queue
    }

    /// Stops the worker at its next suspension point.
    ///
    /// A delivery being handled at that moment stays unsettled and is
    /// redelivered by the broker later.
    pub fn cancel(&self) {
        self.worker.abort();
    }

    /// Waits until the worker exits.
    pub async fn join(self) -> Result<(), AmqpError> {
        match self.worker.await {
            Ok(()) => Ok(()),
            Err(err) if err.is_cancelled() => Ok(()),
            Err(err) => {
                error!(error = err.to_string(), "tokio process error");
                Err(AmqpError::InternalError)
            }
        }
    }
}

/// Declares, binds and starts consuming a queue.
///
/// Setup errors (channel, declaration, bind, QoS, consumer) are returned
/// before anything is consumed. Once the worker is spawned the call returns;
/// from then on, per-message errors are only logged.
///
/// # Parameters
/// * `connection` - The broker connection, a new channel is opened on it
/// * `def` - Exchange, queue, routing key and durability to use
/// * `codec` - Codec the payloads are decoded with
/// * `handler` - Called for each decoded value, returns the ack decision
///
/// # Returns
/// The running subscription
pub async fn subscribe<T, C, F, Fut>(
    connection: &dyn AmqpConnection,
    def: &SubscriptionDefinition,
    codec: C,
    handler: F,
) -> Result<Subscription, AmqpError>
where
    T: DeserializeOwned + Send + 'static,
    C: Codec,
    F: Fn(T) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = AckDecision> + Send + 'static,
{
    let (channel, queue) = declare_and_bind(
        connection,
        &def.dead_letter_exchange,
        &def.exchange,
        &def.queue_name,
        &def.routing_key,
        def.durability,
    )
    .await?;

    match channel
        .basic_qos(SUBSCRIBER_PREFETCH_COUNT, BasicQosOptions { global: false })
        .await
    {
        Err(err) => {
            error!(error = err.to_string(), "error to configure qos");
            Err(AmqpError::QoSDeclarationError(queue.name.clone()))
        }
        _ => Ok(()),
    }?;

    let mut consumer = match channel
        .basic_consume(
            &queue.name,
            "",
            BasicConsumeOptions {
                no_local: false,
                no_ack: false,
                exclusive: false,
                nowait: false,
            },
        )
        .await
    {
        Err(err) => {
            error!(error = err.to_string(), "error to create the consumer");
            Err(AmqpError::BindingConsumerError(queue.name.clone()))
        }
        Ok(c) => Ok(c),
    }?;

    let queue_name = queue.name.clone();
    let on_decode_error = def.on_decode_error;

    let worker = tokio::spawn(async move {
        // the channel must outlive its delivery stream
        let _channel = channel;
        let tracer = global::tracer(CONSUMER_TRACER_NAME);

        while let Some(result) = consumer.next().await {
            match result {
                Ok(delivery) => {
                    // settle failures are already logged by the delivery
                    let _ = consume(
                        &tracer,
                        &queue_name,
                        delivery,
                        &codec,
                        &handler,
                        on_decode_error,
                    )
                    .await;
                }

                Err(err) => error!(error = err.to_string(), "errors consume msg"),
            }
        }

        debug!(queue = queue_name.as_str(), "delivery stream ended");
    });

    debug!(queue = queue.name.as_str(), "subscription started");

    Ok(Subscription { queue, worker })
}

/// Subscribes with JSON payloads.
pub async fn subscribe_json<T, F, Fut>(
    connection: &dyn AmqpConnection,
    def: &SubscriptionDefinition,
    handler: F,
) -> Result<Subscription, AmqpError>
where
    T: DeserializeOwned + Send + 'static,
    F: Fn(T) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = AckDecision> + Send + 'static,
{
    subscribe(connection, def, JsonCodec, handler).await
}

/// Subscribes with bincode payloads.
pub async fn subscribe_binary<T, F, Fut>(
    connection: &dyn AmqpConnection,
    def: &SubscriptionDefinition,
    handler: F,
) -> Result<Subscription, AmqpError>
where
    T: DeserializeOwned + Send + 'static,
    F: Fn(T) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = AckDecision> + Send + 'static,
{
    subscribe(connection, def, BincodeCodec, handler).await
}

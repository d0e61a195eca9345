// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Message Publisher
//!
//! This module publishes typed values to exchanges. The value is encoded
//! with a [`Codec`], tagged with the codec's content type and a fresh message
//! id, and handed to the channel as a non-mandatory, non-immediate publish.
//! The current OpenTelemetry context travels in the message headers.
//!
//! Publishing is at-most-once: nothing is retried, and an encoding failure
//! means nothing was sent.
//!
//! The free functions publish on the channel they are given; a channel is
//! not safe for concurrent publishers, so each publisher role should own its
//! channel. [`AmqpPublisher`] wraps a channel and serializes its callers.

use crate::{
    channel::{AmqpChannel, OutboundMessage},
    codec::{BincodeCodec, Codec, JsonCodec},
    errors::AmqpError,
    otel,
};
use lapin::options::BasicPublishOptions;
use opentelemetry::Context;
use serde::Serialize;
use std::{collections::BTreeMap, sync::Arc};
use tokio::sync::Mutex;
use tracing::{debug, error};
use uuid::Uuid;

/// Encodes `value` with `codec` and publishes it.
///
/// # Parameters
/// * `channel` - Channel owned by the calling publisher role
/// * `codec` - Codec used to encode the payload
/// * `exchange` - Target exchange
/// * `routing_key` - Routing key matched against the exchange bindings
/// * `value` - Value to publish
///
/// # Returns
/// Ok(()) once the broker accepted the message, `AmqpError::EncodingError` if
/// the value could not be encoded, `AmqpError::PublishingError` otherwise
pub async fn publish<C, T>(
    channel: &dyn AmqpChannel,
    codec: &C,
    exchange: &str,
    routing_key: &str,
    value: &T,
) -> Result<(), AmqpError>
where
    C: Codec,
    T: Serialize + ?Sized,
{
    let data = codec.encode(value).inspect_err(|err| {
        error!(error = err.to_string(), exchange, routing_key, "error encoding message");
    })?;

    let mut headers = BTreeMap::new();
    otel::inject(&Context::current(), &mut headers);

    let message = OutboundMessage {
        data,
        content_type: codec.content_type().to_owned(),
        message_id: Uuid::new_v4().to_string(),
        headers,
    };

    match channel
        .basic_publish(
            exchange,
            routing_key,
            BasicPublishOptions {
                mandatory: false,
                immediate: false,
            },
            message,
        )
        .await
    {
        Err(err) => {
            error!(error = err.to_string(), exchange, routing_key, "error publishing message");
            Err(AmqpError::PublishingError(err.to_string()))
        }
        _ => {
            debug!(exchange, routing_key, "message published");
            Ok(())
        }
    }
}

/// Publishes `value` as JSON.
pub async fn publish_json<T>(
    channel: &dyn AmqpChannel,
    exchange: &str,
    routing_key: &str,
    value: &T,
) -> Result<(), AmqpError>
where
    T: Serialize + ?Sized,
{
    publish(channel, &JsonCodec, exchange, routing_key, value).await
}

/// Publishes `value` as bincode.
pub async fn publish_binary<T>(
    channel: &dyn AmqpChannel,
    exchange: &str,
    routing_key: &str,
    value: &T,
) -> Result<(), AmqpError>
where
    T: Serialize + ?Sized,
{
    publish(channel, &BincodeCodec, exchange, routing_key, value).await
}

/// A publisher role owning one channel.
///
/// Calls are serialized, so the publisher can be shared between tasks
/// (e.g. the command loop and subscription handlers) without interleaving
/// writes on the channel.
pub struct AmqpPublisher {
    channel: Mutex<Arc<dyn AmqpChannel>>,
}

impl AmqpPublisher {
    /// Creates a new publisher.
    ///
    /// # Parameters
    /// * `channel` - A channel dedicated to this publisher
    ///
    /// # Returns
    /// An Arc-wrapped AmqpPublisher instance for thread-safe sharing
    pub fn new(channel: Arc<dyn AmqpChannel>) -> Arc<AmqpPublisher> {
        Arc::new(AmqpPublisher {
            channel: Mutex::new(channel),
        })
    }

    pub async fn publish<C, T>(
        &self,
        codec: &C,
        exchange: &str,
        routing_key: &str,
        value: &T,
    ) -> Result<(), AmqpError>
    where
        C: Codec,
        T: Serialize + ?Sized,
    {
        let channel = self.channel.lock().await;
        publish(channel.as_ref(), codec, exchange, routing_key, value).await
    }

    pub async fn publish_json<T>(
        &self,
        exchange: &str,
        routing_key: &str,
        value: &T,
    ) -> Result<(), AmqpError>
    where
        T: Serialize + ?Sized,
    {
        self.publish(&JsonCodec, exchange, routing_key, value).await
    }

    pub async fn publish_binary<T>(
        &self,
        exchange: &str,
        routing_key: &str,
        value: &T,
    ) -> Result<(), AmqpError>
    where
        T: Serialize + ?Sized,
    {
        self.publish(&BincodeCodec, exchange, routing_key, value).await
    }
}

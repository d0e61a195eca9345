// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # AMQP Connection and Channel Management
//!
//! This module defines the broker surface the rest of the crate depends on
//! ([`AmqpConnection`], [`AmqpChannel`]) and implements it on top of `lapin`.
//! Topology, publishing and subscribing only talk to these traits, which
//! lets them run against an in-memory broker in tests.
//!
//! Trait methods return `AmqpError::TransportError` carrying the broker's
//! reason; callers translate it into the error of the operation they were
//! performing.

use crate::{
    configs::AppConfigs,
    delivery::{Acker, Delivery, DeliveryStream},
    errors::AmqpError,
    exchange::ExchangeKind,
};
use async_trait::async_trait;
use futures_util::StreamExt;
use lapin::{
    acker::Acker as LapinAckHandle,
    options::{
        BasicAckOptions, BasicConsumeOptions, BasicNackOptions, BasicPublishOptions,
        BasicQosOptions, ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions,
    },
    types::{AMQPValue, FieldTable, LongString, ShortString},
    BasicProperties, Channel, Connection, ConnectionProperties,
};
use std::{collections::BTreeMap, sync::Arc};
use tracing::{debug, error};

/// Reply code sent when closing the connection normally
const AMQP_REPLY_SUCCESS: u16 = 200;

/// Queue as reported by the broker after a declaration.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DeclaredQueue {
    pub name: String,
    pub message_count: u32,
    pub consumer_count: u32,
}

/// Message handed to [`AmqpChannel::basic_publish`].
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct OutboundMessage {
    pub data: Vec<u8>,
    pub content_type: String,
    pub message_id: String,
    pub headers: BTreeMap<String, String>,
}

/// A live session with the broker.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AmqpConnection: Send + Sync {
    /// Opens a new channel multiplexed over this connection.
    async fn create_channel(&self) -> Result<Arc<dyn AmqpChannel>, AmqpError>;

    /// Closes the connection, ending every channel and delivery stream.
    async fn close(&self) -> Result<(), AmqpError>;
}

/// A channel over an [`AmqpConnection`].
///
/// A channel is not a concurrent-write resource: callers sharing one must
/// serialize their calls.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AmqpChannel: Send + Sync {
    async fn exchange_declare(
        &self,
        name: &str,
        kind: ExchangeKind,
        options: ExchangeDeclareOptions,
        arguments: FieldTable,
    ) -> Result<(), AmqpError>;

    async fn queue_declare(
        &self,
        name: &str,
        options: QueueDeclareOptions,
        arguments: FieldTable,
    ) -> Result<DeclaredQueue, AmqpError>;

    async fn queue_bind(
        &self,
        queue: &str,
        exchange: &str,
        routing_key: &str,
        options: QueueBindOptions,
    ) -> Result<(), AmqpError>;

    async fn basic_qos(&self, prefetch_count: u16, options: BasicQosOptions)
        -> Result<(), AmqpError>;

    async fn basic_publish(
        &self,
        exchange: &str,
        routing_key: &str,
        options: BasicPublishOptions,
        message: OutboundMessage,
    ) -> Result<(), AmqpError>;

    async fn basic_consume(
        &self,
        queue: &str,
        consumer_tag: &str,
        options: BasicConsumeOptions,
    ) -> Result<DeliveryStream, AmqpError>;
}

/// Opens the process-wide connection to RabbitMQ.
///
/// # Parameters
/// * `cfg` - Configuration containing the RabbitMQ connection details and app name
///
/// # Returns
/// The connection on success, or `AmqpError::ConnectionError`
pub async fn new_amqp_connection(cfg: &AppConfigs) -> Result<Arc<LapinConnection>, AmqpError> {
    debug!("creating amqp connection...");
    let options =
        ConnectionProperties::default().with_connection_name(LongString::from(cfg.name.clone()));

    let conn = match Connection::connect(&cfg.rabbitmq.uri(), options).await {
        Ok(c) => Ok(c),
        Err(err) => {
            error!(error = err.to_string(), "failure to connect");
            Err(AmqpError::ConnectionError)
        }
    }?;
    debug!("amqp connected");

    Ok(Arc::new(LapinConnection { conn }))
}

/// [`AmqpConnection`] backed by a `lapin` connection.
pub struct LapinConnection {
    conn: Connection,
}

#[async_trait]
impl AmqpConnection for LapinConnection {
    async fn create_channel(&self) -> Result<Arc<dyn AmqpChannel>, AmqpError> {
        debug!("creating amqp channel...");
        match self.conn.create_channel().await {
            Ok(channel) => {
                debug!(id = channel.id(), "channel created");
                Ok(Arc::new(LapinChannel { channel }))
            }
            Err(err) => {
                error!(error = err.to_string(), "error to create the channel");
                Err(AmqpError::ChannelError)
            }
        }
    }

    async fn close(&self) -> Result<(), AmqpError> {
        debug!("closing amqp connection");
        self.conn
            .close(AMQP_REPLY_SUCCESS, "shutdown")
            .await
            .map_err(transport)
    }
}

/// [`AmqpChannel`] backed by a `lapin` channel.
pub struct LapinChannel {
    channel: Channel,
}

#[async_trait]
impl AmqpChannel for LapinChannel {
    async fn exchange_declare(
        &self,
        name: &str,
        kind: ExchangeKind,
        options: ExchangeDeclareOptions,
        arguments: FieldTable,
    ) -> Result<(), AmqpError> {
        self.channel
            .exchange_declare(name, kind.into(), options, arguments)
            .await
            .map_err(transport)
    }

    async fn queue_declare(
        &self,
        name: &str,
        options: QueueDeclareOptions,
        arguments: FieldTable,
    ) -> Result<DeclaredQueue, AmqpError> {
        let queue = self
            .channel
            .queue_declare(name, options, arguments)
            .await
            .map_err(transport)?;

        Ok(DeclaredQueue {
            name: queue.name().to_string(),
            message_count: queue.message_count(),
            consumer_count: queue.consumer_count(),
        })
    }

    async fn queue_bind(
        &self,
        queue: &str,
        exchange: &str,
        routing_key: &str,
        options: QueueBindOptions,
    ) -> Result<(), AmqpError> {
        self.channel
            .queue_bind(queue, exchange, routing_key, options, FieldTable::default())
            .await
            .map_err(transport)
    }

    async fn basic_qos(
        &self,
        prefetch_count: u16,
        options: BasicQosOptions,
    ) -> Result<(), AmqpError> {
        self.channel
            .basic_qos(prefetch_count, options)
            .await
            .map_err(transport)
    }

    async fn basic_publish(
        &self,
        exchange: &str,
        routing_key: &str,
        options: BasicPublishOptions,
        message: OutboundMessage,
    ) -> Result<(), AmqpError> {
        let headers: BTreeMap<ShortString, AMQPValue> = message
            .headers
            .into_iter()
            .map(|(key, value)| {
                (
                    ShortString::from(key),
                    AMQPValue::LongString(LongString::from(value)),
                )
            })
            .collect();

        let properties = BasicProperties::default()
            .with_content_type(ShortString::from(message.content_type))
            .with_message_id(ShortString::from(message.message_id))
            .with_headers(FieldTable::from(headers));

        self.channel
            .basic_publish(exchange, routing_key, options, &message.data, properties)
            .await
            .map(|_| ())
            .map_err(transport)
    }

    async fn basic_consume(
        &self,
        queue: &str,
        consumer_tag: &str,
        options: BasicConsumeOptions,
    ) -> Result<DeliveryStream, AmqpError> {
        let consumer = self
            .channel
            .basic_consume(queue, consumer_tag, options, FieldTable::default())
            .await
            .map_err(transport)?;

        Ok(consumer
            .map(|result| result.map(into_delivery).map_err(transport))
            .boxed())
    }
}

struct LapinAcker {
    acker: LapinAckHandle,
}

#[async_trait]
impl Acker for LapinAcker {
    async fn ack(&self, options: BasicAckOptions) -> Result<(), AmqpError> {
        self.acker.ack(options).await.map_err(transport)
    }

    async fn nack(&self, options: BasicNackOptions) -> Result<(), AmqpError> {
        self.acker.nack(options).await.map_err(transport)
    }
}

fn transport(err: lapin::Error) -> AmqpError {
    AmqpError::TransportError(err.to_string())
}

fn into_delivery(delivery: lapin::message::Delivery) -> Delivery {
    let content_type = delivery
        .properties
        .content_type()
        .as_ref()
        .map(|value| value.to_string());
    let headers = delivery
        .properties
        .headers()
        .as_ref()
        .map(string_headers)
        .unwrap_or_default();

    let mut out = Delivery::new(
        delivery.delivery_tag,
        delivery.data,
        Arc::new(LapinAcker {
            acker: delivery.acker,
        }),
    )
    .with_routing(delivery.exchange.as_str(), delivery.routing_key.as_str())
    .with_headers(headers)
    .redelivered(delivery.redelivered);

    if let Some(content_type) = content_type {
        out = out.with_content_type(&content_type);
    }

    out
}

/// Keeps the string-valued headers of a message, dropping everything else.
fn string_headers(table: &FieldTable) -> BTreeMap<String, String> {
    table
        .inner()
        .iter()
        .filter_map(|(key, value)| {
            let value = match value {
                AMQPValue::LongString(v) => String::from_utf8_lossy(v.as_bytes()).into_owned(),
                AMQPValue::ShortString(v) => v.to_string(),
                _ => return None,
            };
            Some((key.to_string(), value))
        })
        .collect()
}

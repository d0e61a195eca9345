// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Deliveries and Acknowledgment
//!
//! A [`Delivery`] is one message handed from the broker to a consumer. It
//! carries the payload, a few routing properties and a handle used to
//! settle it. Settling consumes the delivery, so exactly one of ack,
//! nack-requeue or nack-discard can be issued against it.

use crate::errors::AmqpError;
use async_trait::async_trait;
use futures_util::stream::BoxStream;
use lapin::options::{BasicAckOptions, BasicNackOptions};
use std::{collections::BTreeMap, fmt, sync::Arc};
use tracing::error;

/// Stream of deliveries produced by a consumer.
pub type DeliveryStream = BoxStream<'static, Result<Delivery, AmqpError>>;

/// Decision returned by a subscription handler for each message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AckDecision {
    /// Processed, remove it from the queue
    Ack,
    /// Not processed now, put it back on the queue
    NackRequeue,
    /// Reject it, the broker dead-letters it
    NackDiscard,
}

/// Broker-side acknowledgment calls for one delivery.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Acker: Send + Sync {
    async fn ack(&self, options: BasicAckOptions) -> Result<(), AmqpError>;

    async fn nack(&self, options: BasicNackOptions) -> Result<(), AmqpError>;
}

/// A message received from a queue.
pub struct Delivery {
    pub delivery_tag: u64,
    pub exchange: String,
    pub routing_key: String,
    pub redelivered: bool,
    pub content_type: Option<String>,
    pub headers: BTreeMap<String, String>,
    pub data: Vec<u8>,
    acker: Arc<dyn Acker>,
}

impl fmt::Debug for Delivery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Delivery")
            .field("delivery_tag", &self.delivery_tag)
            .field("exchange", &self.exchange)
            .field("routing_key", &self.routing_key)
            .field("redelivered", &self.redelivered)
            .field("content_type", &self.content_type)
            .field("len", &self.data.len())
            .finish()
    }
}

impl Delivery {
    /// Creates a delivery with no routing information or properties.
    ///
    /// # Parameters
    /// * `delivery_tag` - Channel-scoped tag assigned by the broker
    /// * `data` - The raw payload
    /// * `acker` - Handle used to settle the delivery
    pub fn new(delivery_tag: u64, data: Vec<u8>, acker: Arc<dyn Acker>) -> Delivery {
        Delivery {
            delivery_tag,
            exchange: String::new(),
            routing_key: String::new(),
            redelivered: false,
            content_type: None,
            headers: BTreeMap::default(),
            data,
            acker,
        }
    }

    pub fn with_routing(mut self, exchange: &str, routing_key: &str) -> Self {
        self.exchange = exchange.to_owned();
        self.routing_key = routing_key.to_owned();
        self
    }

    pub fn with_content_type(mut self, content_type: &str) -> Self {
        self.content_type = Some(content_type.to_owned());
        self
    }

    pub fn with_headers(mut self, headers: BTreeMap<String, String>) -> Self {
        self.headers = headers;
        self
    }

    pub fn redelivered(mut self, redelivered: bool) -> Self {
        self.redelivered = redelivered;
        self
    }

    /// Acknowledges this single delivery.
    pub async fn ack(self) -> Result<(), AmqpError> {
        self.acker
            .ack(BasicAckOptions { multiple: false })
            .await
            .map_err(|err| {
                error!(error = err.to_string(), "failure to ack message");
                AmqpError::AckMessageError
            })
    }

    /// Negatively acknowledges this single delivery.
    ///
    /// # Parameters
    /// * `requeue` - Put the message back on the queue instead of dead-lettering it
    pub async fn nack(self, requeue: bool) -> Result<(), AmqpError> {
        self.acker
            .nack(BasicNackOptions {
                multiple: false,
                requeue,
            })
            .await
            .map_err(|err| {
                error!(error = err.to_string(), requeue, "failure to nack message");
                AmqpError::NackMessageError
            })
    }

    /// Issues the broker call matching a handler decision.
    pub async fn settle(self, decision: AckDecision) -> Result<(), AmqpError> {
        match decision {
            AckDecision::Ack => self.ack().await,
            AckDecision::NackRequeue => self.nack(true).await,
            AckDecision::NackDiscard => self.nack(false).await,
        }
    }
}

// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Error Types for the Publish/Subscribe Layer
//!
//! This module provides the error type shared by every broker operation.
//! The `AmqpError` enum covers connection and channel setup, topology
//! declaration, payload encoding/decoding, publishing and acknowledgment.

use thiserror::Error;

/// Represents errors that can occur during AMQP/RabbitMQ operations.
///
/// Setup failures (connection, declaration, QoS, consumer) are returned to the
/// caller synchronously. Per-message failures (decoding, ack/nack transport)
/// only surface in the consumer worker, where they are logged.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AmqpError {
    /// Internal errors that don't fit into other categories
    #[error("internal error")]
    InternalError,

    /// Configuration could not be loaded or deserialized
    #[error("invalid configs: {0}")]
    InvalidConfigs(String),

    /// Error establishing a connection to the RabbitMQ server
    #[error("failure to connect")]
    ConnectionError,

    /// Error creating a channel from an established connection
    #[error("failure to create a channel")]
    ChannelError,

    /// Raw failure reported by the broker client for a single protocol call
    #[error("broker transport failure: {0}")]
    TransportError(String),

    /// Error declaring an exchange with the given name
    #[error("failure to declare an exchange `{0}`")]
    DeclareExchangeError(String),

    /// Error declaring a queue with the given name
    #[error("failure to declare a queue `{0}`")]
    DeclareQueueError(String),

    /// Error binding an exchange to a queue
    #[error("failure to binding exchange `{0}` to queue `{1}`")]
    BindingExchangeToQueueError(String, String),

    /// Error configuring Quality of Service parameters
    #[error("failure to configure qos `{0}`")]
    QoSDeclarationError(String),

    /// Error binding a consumer to a queue
    #[error("failure to declare consumer `{0}`")]
    BindingConsumerError(String),

    /// Error serializing a value, nothing was sent
    #[error("failure to encode payload: {0}")]
    EncodingError(String),

    /// Error deserializing a received payload
    #[error("failure to decode payload: {0}")]
    DecodingError(String),

    /// Error publishing a message
    #[error("failure to publish: {0}")]
    PublishingError(String),

    /// Error acknowledging a message
    #[error("failure to ack message")]
    AckMessageError,

    /// Error negative-acknowledging a message
    #[error("failure to nack message")]
    NackMessageError,
}

impl AmqpError {
    /// Reports whether the error belongs to the topology/consumer declaration family.
    pub fn is_declaration_error(&self) -> bool {
        matches!(
            self,
            AmqpError::DeclareExchangeError(_)
                | AmqpError::DeclareQueueError(_)
                | AmqpError::BindingExchangeToQueueError(_, _)
                | AmqpError::QoSDeclarationError(_)
                | AmqpError::BindingConsumerError(_)
        )
    }
}

// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Payload Codecs
//!
//! A codec turns a typed message into the bytes carried by an AMQP message
//! and back. Publishers and subscribers are generic over [`Codec`], so the
//! same topology can carry readable JSON or compact bincode payloads.
//!
//! The codec's content type is written into the message properties on
//! publish and checked against the delivery on consume.

use crate::errors::AmqpError;
use serde::{de::DeserializeOwned, Serialize};

/// Content type for JSON payloads
pub const JSON_CONTENT_TYPE: &str = "application/json";
/// Content type for bincode payloads
pub const BINCODE_CONTENT_TYPE: &str = "application/x-bincode";

/// Encode/decode pair for message payloads.
pub trait Codec: Send + Sync + 'static {
    /// Value of the `content-type` property identifying this codec.
    fn content_type(&self) -> &'static str;

    /// Serializes a value into bytes.
    ///
    /// # Errors
    /// Returns `AmqpError::EncodingError` if the value cannot be represented
    /// in this format.
    fn encode<T: Serialize + ?Sized>(&self, value: &T) -> Result<Vec<u8>, AmqpError>;

    /// Deserializes bytes back into a value.
    ///
    /// # Errors
    /// Returns `AmqpError::DecodingError` if the bytes are malformed or don't
    /// match the expected type.
    fn decode<T: DeserializeOwned>(&self, data: &[u8]) -> Result<T, AmqpError>;
}

/// Structured-text codec backed by `serde_json`.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl Codec for JsonCodec {
    fn content_type(&self) -> &'static str {
        JSON_CONTENT_TYPE
    }

    fn encode<T: Serialize + ?Sized>(&self, value: &T) -> Result<Vec<u8>, AmqpError> {
        serde_json::to_vec(value).map_err(|err| AmqpError::EncodingError(err.to_string()))
    }

    fn decode<T: DeserializeOwned>(&self, data: &[u8]) -> Result<T, AmqpError> {
        serde_json::from_slice(data).map_err(|err| AmqpError::DecodingError(err.to_string()))
    }
}

/// Binary codec backed by `bincode`.
///
/// The format carries no field names, so producer and consumer must agree on
/// the exact shape of the value.
#[derive(Debug, Clone, Copy, Default)]
pub struct BincodeCodec;

impl Codec for BincodeCodec {
    fn content_type(&self) -> &'static str {
        BINCODE_CONTENT_TYPE
    }

    fn encode<T: Serialize + ?Sized>(&self, value: &T) -> Result<Vec<u8>, AmqpError> {
        bincode::serialize(value).map_err(|err| AmqpError::EncodingError(err.to_string()))
    }

    fn decode<T: DeserializeOwned>(&self, data: &[u8]) -> Result<T, AmqpError> {
        bincode::deserialize(data).map_err(|err| AmqpError::DecodingError(err.to_string()))
    }
}

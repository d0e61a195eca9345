// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Publish/Subscribe over AMQP
//!
//! Typed publish/subscribe on top of an AMQP 0-9-1 broker:
//! - [`topology::declare_and_bind`] declares a queue with a dead-letter
//!   exchange and binds it to an exchange
//! - [`publisher`] encodes values with a [`codec::Codec`] and publishes them
//! - [`dispatcher::subscribe`] consumes a queue in a dedicated task, handing
//!   each decoded value to a handler that decides to ack, requeue or discard

mod consumer;
mod otel;

pub mod channel;
pub mod codec;
pub mod configs;
pub mod delivery;
pub mod dispatcher;
pub mod errors;
pub mod exchange;
pub mod publisher;
pub mod queue;
pub mod routing;
pub mod topology;

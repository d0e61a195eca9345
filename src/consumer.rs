// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Delivery Processing
//!
//! This module handles one delivery at a time for a subscription worker:
//! 1. Opens a consumer span parented by the trace context in the headers
//! 2. Decodes the payload with the subscription's codec
//! 3. Awaits the application handler for its [`AckDecision`]
//! 4. Issues the matching ack/nack on the delivery
//!
//! A payload that cannot be decoded never reaches the handler; the
//! subscription's [`DecodeFailurePolicy`] decides what happens to it.

use crate::{
    codec::Codec,
    delivery::{AckDecision, Delivery},
    dispatcher::DecodeFailurePolicy,
    errors::AmqpError,
    otel,
};
use opentelemetry::{
    global::BoxedTracer,
    trace::{Span, Status},
};
use serde::de::DeserializeOwned;
use std::future::Future;
use tracing::{debug, error, warn};

/// Processes one delivery.
///
/// # Parameters
/// * `tracer` - OpenTelemetry tracer for creating spans
/// * `queue` - Name of the queue the delivery came from
/// * `delivery` - The delivery to process
/// * `codec` - Codec of the subscription
/// * `handler` - Application handler returning the ack decision
/// * `on_decode_error` - What to do with payloads that fail to decode
///
/// # Returns
/// Ok(()) when the delivery was settled (or deliberately left unsettled),
/// or the acknowledgment error
pub(crate) async fn consume<T, C, F, Fut>(
    tracer: &BoxedTracer,
    queue: &str,
    delivery: Delivery,
    codec: &C,
    handler: &F,
    on_decode_error: DecodeFailurePolicy,
) -> Result<(), AmqpError>
where
    T: DeserializeOwned,
    C: Codec,
    F: Fn(T) -> Fut,
    Fut: Future<Output = AckDecision>,
{
    let (_ctx, mut span) = otel::new_span(&delivery.headers, tracer, queue);

    debug!(
        queue,
        tag = delivery.delivery_tag,
        exchange = delivery.exchange.as_str(),
        routing_key = delivery.routing_key.as_str(),
        redelivered = delivery.redelivered,
        "received message"
    );

    let value = match decode::<T, C>(codec, &delivery) {
        Ok(value) => value,
        Err(err) => {
            error!(error = err.to_string(), queue, "failure to decode message");
            span.record_error(&err);
            span.set_status(Status::error("failure to decode message"));

            return match on_decode_error {
                DecodeFailurePolicy::NackDiscard => {
                    warn!(queue, "discarding undecodable message");
                    delivery.settle(AckDecision::NackDiscard).await
                }
                DecodeFailurePolicy::Ignore => Ok(()),
            };
        }
    };

    let decision = handler(value).await;
    debug!(queue, ?decision, "message handled");

    match delivery.settle(decision).await {
        Err(err) => {
            span.record_error(&err);
            span.set_status(Status::error("failure to settle message"));
            Err(err)
        }
        Ok(()) => {
            span.set_status(Status::Ok);
            Ok(())
        }
    }
}

/// Decodes the payload, rejecting deliveries tagged with another codec's content type.
///
/// Only the media type is compared; parameters such as `charset` are ignored.
fn decode<T, C>(codec: &C, delivery: &Delivery) -> Result<T, AmqpError>
where
    T: DeserializeOwned,
    C: Codec,
{
    match delivery.content_type.as_deref() {
        Some(content_type) if !accepts(codec, content_type) => {
            Err(AmqpError::DecodingError(format!(
                "unexpected content type `{content_type}`, expected `{}`",
                codec.content_type()
            )))
        }
        _ => codec.decode(&delivery.data),
    }
}

fn accepts<C: Codec>(codec: &C, content_type: &str) -> bool {
    let media_type = content_type.split(';').next().unwrap_or_default().trim();
    media_type.is_empty() || media_type.eq_ignore_ascii_case(codec.content_type())
}

// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Routing Names
//!
//! Exchange names and routing-key prefixes agreed between publishers,
//! subscribers and the broker topology. They are plain configuration values
//! so tests and deployments can use arbitrary names.
//!
//! Routing keys are dot-separated segments. On topic exchanges a `*`
//! segment matches exactly one segment, so `army_moves.*` receives
//! `army_moves.alice` but not `army_moves.alice.north`.

use serde::Deserialize;

/// Separator between routing-key segments
pub const ROUTING_KEY_SEPARATOR: &str = ".";
/// Single-segment wildcard for topic exchanges
pub const SINGLE_SEGMENT_WILDCARD: &str = "*";
/// Dead-letter exchange used when none is configured
pub const DEFAULT_DEAD_LETTER_EXCHANGE: &str = "peril_dlx";

/// Well-known topology names.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RoutingConfigs {
    pub direct_exchange: String,
    pub topic_exchange: String,
    pub dead_letter_exchange: String,
    pub dead_letter_queue: String,
    pub pause_key: String,
    pub army_moves_prefix: String,
    pub war_recognitions_prefix: String,
    pub game_log_slug: String,
}

impl Default for RoutingConfigs {
    fn default() -> Self {
        RoutingConfigs {
            direct_exchange: "peril_direct".to_owned(),
            topic_exchange: "peril_topic".to_owned(),
            dead_letter_exchange: DEFAULT_DEAD_LETTER_EXCHANGE.to_owned(),
            dead_letter_queue: "peril_dlq".to_owned(),
            pause_key: "pause".to_owned(),
            army_moves_prefix: "army_moves".to_owned(),
            war_recognitions_prefix: "war".to_owned(),
            game_log_slug: "game_logs".to_owned(),
        }
    }
}

/// Joins a prefix and a segment into a routing key, e.g. `pause.alice`.
pub fn routing_key(prefix: &str, segment: &str) -> String {
    format!("{prefix}{ROUTING_KEY_SEPARATOR}{segment}")
}

/// Pattern matching every key with one segment after `prefix`, e.g. `army_moves.*`.
pub fn single_segment_pattern(prefix: &str) -> String {
    routing_key(prefix, SINGLE_SEGMENT_WILDCARD)
}

// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # RabbitMQ Topology Management
//!
//! This module declares the broker-side entities the pub/sub layer relies
//! on. It offers two entry points:
//! - [`declare_and_bind`]: the per-subscription declarator. Opens a channel,
//!   declares one queue with a dead-letter exchange and binds it to an
//!   exchange.
//! - [`AmqpTopology`]: installs a whole set of exchanges, queues and
//!   bindings, such as the well-known game exchanges and the dead-letter
//!   queue.

use crate::{
    channel::{AmqpChannel, AmqpConnection, DeclaredQueue},
    errors::AmqpError,
    exchange::ExchangeDefinition,
    queue::{QueueBinding, QueueDefinition, QueueDurability},
    routing::RoutingConfigs,
};
use async_trait::async_trait;
use lapin::{options::QueueBindOptions, types::FieldTable};
use std::sync::Arc;
use tracing::{debug, error};

/// Constant for the argument used to specify a dead letter exchange
pub const AMQP_HEADERS_DEAD_LETTER_EXCHANGE: &str = "x-dead-letter-exchange";

/// Ensures a queue exists and is bound to an exchange.
///
/// A fresh channel is opened on the connection and returned along with the
/// queue as reported by the broker. Durable queues survive a broker restart;
/// transient queues are exclusive and auto-deleted. Every queue is declared
/// with `dead_letter_exchange` as its `x-dead-letter-exchange` argument.
///
/// Repeating the call with identical arguments is harmless. Declaring an
/// existing queue with a different durability is rejected by the broker and
/// reported as `AmqpError::DeclareQueueError`; a failed bind (e.g. a missing
/// exchange) as `AmqpError::BindingExchangeToQueueError`. Nothing is retried.
///
/// # Parameters
/// * `connection` - The broker connection
/// * `dead_letter_exchange` - Exchange receiving messages the queue rejects
/// * `exchange` - Exchange to bind the queue to
/// * `queue_name` - Queue name, empty to let the broker choose one
/// * `routing_key` - Binding key, may contain `*` on topic exchanges
/// * `durability` - Durability profile of the queue
pub async fn declare_and_bind(
    connection: &dyn AmqpConnection,
    dead_letter_exchange: &str,
    exchange: &str,
    queue_name: &str,
    routing_key: &str,
    durability: QueueDurability,
) -> Result<(Arc<dyn AmqpChannel>, DeclaredQueue), AmqpError> {
    let channel = connection.create_channel().await?;

    let def = QueueDefinition::new(queue_name)
        .durability(durability)
        .dead_letter_exchange(dead_letter_exchange);

    let queue = declare_queue(channel.as_ref(), &def).await?;

    let binding = QueueBinding::new(&queue.name)
        .exchange(exchange)
        .routing_key(routing_key);

    bind_queue(channel.as_ref(), &binding).await?;

    Ok((channel, queue))
}

async fn declare_queue(
    channel: &dyn AmqpChannel,
    def: &QueueDefinition,
) -> Result<DeclaredQueue, AmqpError> {
    debug!("creating queue: {}", def.name);

    match channel
        .queue_declare(&def.name, def.declare_options(), def.arguments())
        .await
    {
        Err(err) => {
            error!(
                error = err.to_string(),
                name = def.name.as_str(),
                "error to declare the queue"
            );
            Err(AmqpError::DeclareQueueError(def.name.clone()))
        }
        Ok(queue) => {
            debug!("queue: {} was created", queue.name);
            Ok(queue)
        }
    }
}

async fn bind_queue(channel: &dyn AmqpChannel, binding: &QueueBinding) -> Result<(), AmqpError> {
    debug!(
        "binding queue: {} to the exchange: {} with the key: {}",
        binding.queue_name, binding.exchange_name, binding.routing_key
    );

    match channel
        .queue_bind(
            &binding.queue_name,
            &binding.exchange_name,
            &binding.routing_key,
            QueueBindOptions { nowait: false },
        )
        .await
    {
        Err(err) => {
            error!(error = err.to_string(), "error to bind queue to exchange");
            Err(AmqpError::BindingExchangeToQueueError(
                binding.exchange_name.clone(),
                binding.queue_name.clone(),
            ))
        }
        _ => Ok(()),
    }
}

/// Trait defining the interface for topology management.
///
/// This trait provides methods for registering exchanges, queues, and bindings,
/// as well as installing the topology to the RabbitMQ server.
#[async_trait]
pub trait Topology {
    /// Adds an exchange definition to the topology.
    fn exchange(self, def: ExchangeDefinition) -> Self;

    /// Adds a queue definition to the topology.
    fn queue(self, def: QueueDefinition) -> Self;

    /// Adds a queue-to-exchange binding to the topology.
    fn queue_binding(self, binding: QueueBinding) -> Self;

    /// Installs the topology to the RabbitMQ server.
    async fn install(&self) -> Result<(), AmqpError>;
}

/// RabbitMQ implementation of the Topology trait.
pub struct AmqpTopology {
    channel: Arc<dyn AmqpChannel>,
    pub(crate) exchanges: Vec<ExchangeDefinition>,
    pub(crate) queues: Vec<QueueDefinition>,
    pub(crate) queues_binding: Vec<QueueBinding>,
}

impl AmqpTopology {
    /// Creates an empty topology installed through the given channel.
    pub fn new(channel: Arc<dyn AmqpChannel>) -> AmqpTopology {
        AmqpTopology {
            channel,
            exchanges: vec![],
            queues: vec![],
            queues_binding: vec![],
        }
    }

    /// The exchanges and dead-letter queue every game process expects.
    ///
    /// Declares the durable direct and topic exchanges, the durable fanout
    /// dead-letter exchange and a durable dead-letter queue bound to it.
    pub fn well_known(channel: Arc<dyn AmqpChannel>, names: &RoutingConfigs) -> AmqpTopology {
        AmqpTopology::new(channel)
            .exchange(
                ExchangeDefinition::new(&names.direct_exchange)
                    .direct()
                    .durable(),
            )
            .exchange(
                ExchangeDefinition::new(&names.topic_exchange)
                    .topic()
                    .durable(),
            )
            .exchange(
                ExchangeDefinition::new(&names.dead_letter_exchange)
                    .fanout()
                    .durable(),
            )
            .queue(QueueDefinition::new(&names.dead_letter_queue).durability(QueueDurability::Durable))
            .queue_binding(
                QueueBinding::new(&names.dead_letter_queue).exchange(&names.dead_letter_exchange),
            )
    }
}

#[async_trait]
impl Topology for AmqpTopology {
    fn exchange(mut self, def: ExchangeDefinition) -> Self {
        self.exchanges.push(def);
        self
    }

    fn queue(mut self, def: QueueDefinition) -> Self {
        self.queues.push(def);
        self
    }

    fn queue_binding(mut self, binding: QueueBinding) -> Self {
        self.queues_binding.push(binding);
        self
    }

    /// Installs the topology to the RabbitMQ server.
    ///
    /// Exchanges are created first, then queues, then queue bindings. The
    /// first failure aborts the installation.
    async fn install(&self) -> Result<(), AmqpError> {
        self.install_exchange().await?;
        self.install_queue().await?;
        self.binding_queues().await
    }
}

impl AmqpTopology {
    async fn install_exchange(&self) -> Result<(), AmqpError> {
        for exch in &self.exchanges {
            debug!("creating exchange: {}", exch.name);

            match self
                .channel
                .exchange_declare(
                    &exch.name,
                    exch.kind,
                    exch.declare_options(),
                    FieldTable::default(),
                )
                .await
            {
                Err(err) => {
                    error!(
                        error = err.to_string(),
                        name = exch.name.as_str(),
                        "error to declare the exchange"
                    );
                    Err(AmqpError::DeclareExchangeError(exch.name.clone()))
                }
                _ => Ok(()),
            }?;

            debug!("exchange: {} was created", exch.name);
        }

        Ok(())
    }

    async fn install_queue(&self) -> Result<(), AmqpError> {
        for def in &self.queues {
            declare_queue(self.channel.as_ref(), def).await?;
        }

        Ok(())
    }

    async fn binding_queues(&self) -> Result<(), AmqpError> {
        for binding in &self.queues_binding {
            bind_queue(self.channel.as_ref(), binding).await?;
        }

        debug!("queues were bound");

        Ok(())
    }
}

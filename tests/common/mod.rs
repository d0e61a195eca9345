// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! In-memory broker implementing the crate's connection/channel traits.
//!
//! It keeps just enough AMQP behaviour to exercise the pub/sub layer:
//! direct/topic/fanout routing, queue declaration checks, per-channel
//! prefetch, requeue and dead-lettering. Every protocol call is recorded.

#![allow(dead_code)]

use async_trait::async_trait;
use futures_util::{stream, StreamExt};
use lapin::{
    options::{
        BasicAckOptions, BasicConsumeOptions, BasicNackOptions, BasicPublishOptions,
        BasicQosOptions, ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions,
    },
    types::FieldTable,
};
use pubsub::{
    channel::{AmqpChannel, AmqpConnection, DeclaredQueue, OutboundMessage},
    delivery::{Acker, Delivery, DeliveryStream},
    errors::AmqpError,
    exchange::ExchangeKind,
    routing::RoutingConfigs,
    topology::{AmqpTopology, Topology, AMQP_HEADERS_DEAD_LETTER_EXCHANGE},
};
use std::{
    collections::{BTreeMap, HashMap, VecDeque},
    sync::{Arc, Mutex},
    time::Duration,
};
use tokio::sync::mpsc;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    ExchangeDeclare {
        name: String,
        kind: ExchangeKind,
    },
    QueueDeclare {
        name: String,
        durable: bool,
        auto_delete: bool,
        exclusive: bool,
        dead_letter_exchange: Option<String>,
    },
    QueueBind {
        queue: String,
        exchange: String,
        routing_key: String,
    },
    Qos {
        prefetch_count: u16,
        global: bool,
    },
    Publish {
        exchange: String,
        routing_key: String,
        content_type: String,
        mandatory: bool,
        immediate: bool,
    },
    Consume {
        queue: String,
        consumer_tag: String,
        no_ack: bool,
    },
    Ack {
        queue: String,
        delivery_tag: u64,
        multiple: bool,
    },
    Nack {
        queue: String,
        delivery_tag: u64,
        multiple: bool,
        requeue: bool,
    },
}

#[derive(Debug, Clone)]
struct Message {
    exchange: String,
    routing_key: String,
    content_type: String,
    headers: BTreeMap<String, String>,
    data: Vec<u8>,
    redelivered: bool,
}

struct Consumer {
    sender: mpsc::UnboundedSender<Result<Delivery, AmqpError>>,
    prefetch: u16,
    unacked: HashMap<u64, Message>,
}

struct Queue {
    durable: bool,
    auto_delete: bool,
    exclusive: bool,
    dead_letter_exchange: Option<String>,
    ready: VecDeque<Message>,
    consumer: Option<Consumer>,
    max_unacked: usize,
}

#[derive(Default)]
struct State {
    closed: bool,
    exchanges: HashMap<String, ExchangeKind>,
    queues: HashMap<String, Queue>,
    bindings: Vec<(String, String, String)>,
    calls: Vec<Call>,
    next_tag: u64,
    generated: u64,
}

type Shared = Arc<Mutex<State>>;

/// The fake broker doubles as the process connection.
#[derive(Clone, Default)]
pub struct FakeBroker {
    shared: Shared,
}

impl FakeBroker {
    pub fn new() -> FakeBroker {
        FakeBroker::default()
    }

    /// A broker with the well-known exchanges and dead-letter queue installed.
    pub async fn with_topology() -> FakeBroker {
        let broker = FakeBroker::new();
        let channel = broker.create_channel().await.unwrap();
        AmqpTopology::well_known(channel, &RoutingConfigs::default())
            .install()
            .await
            .unwrap();
        broker
    }

    pub fn calls(&self) -> Vec<Call> {
        self.shared.lock().unwrap().calls.clone()
    }

    pub fn acks(&self) -> Vec<Call> {
        self.calls()
            .into_iter()
            .filter(|c| matches!(c, Call::Ack { .. }))
            .collect()
    }

    pub fn nacks(&self) -> Vec<Call> {
        self.calls()
            .into_iter()
            .filter(|c| matches!(c, Call::Nack { .. }))
            .collect()
    }

    pub fn publishes(&self) -> Vec<Call> {
        self.calls()
            .into_iter()
            .filter(|c| matches!(c, Call::Publish { .. }))
            .collect()
    }

    pub fn unacked(&self, queue: &str) -> usize {
        self.with_queue(queue, |q| {
            q.consumer.as_ref().map(|c| c.unacked.len()).unwrap_or(0)
        })
    }

    pub fn max_unacked(&self, queue: &str) -> usize {
        self.with_queue(queue, |q| q.max_unacked)
    }

    pub fn ready(&self, queue: &str) -> usize {
        self.with_queue(queue, |q| q.ready.len())
    }

    pub fn bindings_of(&self, queue: &str) -> Vec<(String, String)> {
        self.shared
            .lock()
            .unwrap()
            .bindings
            .iter()
            .filter(|(_, _, q)| q == queue)
            .map(|(ex, key, _)| (ex.clone(), key.clone()))
            .collect()
    }

    /// Puts raw bytes straight onto a queue, bypassing any codec.
    pub fn inject(&self, queue: &str, data: &[u8], content_type: &str) {
        let mut state = self.shared.lock().unwrap();
        enqueue(
            &self.shared,
            &mut state,
            queue,
            Message {
                exchange: String::new(),
                routing_key: queue.to_owned(),
                content_type: content_type.to_owned(),
                headers: BTreeMap::new(),
                data: data.to_vec(),
                redelivered: false,
            },
        );
    }

    fn with_queue<R: Default>(&self, queue: &str, f: impl FnOnce(&Queue) -> R) -> R {
        self.shared
            .lock()
            .unwrap()
            .queues
            .get(queue)
            .map(f)
            .unwrap_or_default()
    }
}

#[async_trait]
impl AmqpConnection for FakeBroker {
    async fn create_channel(&self) -> Result<Arc<dyn AmqpChannel>, AmqpError> {
        if self.shared.lock().unwrap().closed {
            return Err(AmqpError::ChannelError);
        }
        Ok(Arc::new(FakeChannel {
            shared: self.shared.clone(),
            prefetch: Mutex::new(0),
        }))
    }

    async fn close(&self) -> Result<(), AmqpError> {
        let mut state = self.shared.lock().unwrap();
        state.closed = true;
        for queue in state.queues.values_mut() {
            if let Some(consumer) = queue.consumer.take() {
                for (_, message) in consumer.unacked {
                    queue.ready.push_front(Message {
                        redelivered: true,
                        ..message
                    });
                }
            }
        }
        Ok(())
    }
}

pub struct FakeChannel {
    shared: Shared,
    prefetch: Mutex<u16>,
}

impl FakeChannel {
    fn open(&self) -> Result<std::sync::MutexGuard<'_, State>, AmqpError> {
        let state = self.shared.lock().unwrap();
        if state.closed {
            return Err(AmqpError::TransportError("channel closed".to_owned()));
        }
        Ok(state)
    }
}

#[async_trait]
impl AmqpChannel for FakeChannel {
    async fn exchange_declare(
        &self,
        name: &str,
        kind: ExchangeKind,
        _options: ExchangeDeclareOptions,
        _arguments: FieldTable,
    ) -> Result<(), AmqpError> {
        let mut state = self.open()?;
        state.calls.push(Call::ExchangeDeclare {
            name: name.to_owned(),
            kind,
        });

        match state.exchanges.get(name) {
            Some(existing) if *existing != kind => Err(AmqpError::TransportError(format!(
                "PRECONDITION_FAILED - inequivalent arg 'type' for exchange '{name}'"
            ))),
            _ => {
                state.exchanges.insert(name.to_owned(), kind);
                Ok(())
            }
        }
    }

    async fn queue_declare(
        &self,
        name: &str,
        options: QueueDeclareOptions,
        arguments: FieldTable,
    ) -> Result<DeclaredQueue, AmqpError> {
        let mut state = self.open()?;
        let dead_letter_exchange = arguments
            .inner()
            .get(AMQP_HEADERS_DEAD_LETTER_EXCHANGE)
            .and_then(|v| v.as_long_string())
            .map(|v| String::from_utf8_lossy(v.as_bytes()).into_owned());

        state.calls.push(Call::QueueDeclare {
            name: name.to_owned(),
            durable: options.durable,
            auto_delete: options.auto_delete,
            exclusive: options.exclusive,
            dead_letter_exchange: dead_letter_exchange.clone(),
        });

        let name = if name.is_empty() {
            state.generated += 1;
            format!("amq.gen-{}", state.generated)
        } else {
            name.to_owned()
        };

        if let Some(existing) = state.queues.get(&name) {
            if existing.durable != options.durable
                || existing.exclusive != options.exclusive
                || existing.auto_delete != options.auto_delete
                || existing.dead_letter_exchange != dead_letter_exchange
            {
                return Err(AmqpError::TransportError(format!(
                    "PRECONDITION_FAILED - inequivalent arg 'durable' for queue '{name}'"
                )));
            }
        } else {
            state.queues.insert(
                name.clone(),
                Queue {
                    durable: options.durable,
                    auto_delete: options.auto_delete,
                    exclusive: options.exclusive,
                    dead_letter_exchange,
                    ready: VecDeque::new(),
                    consumer: None,
                    max_unacked: 0,
                },
            );
        }

        let queue = &state.queues[&name];
        Ok(DeclaredQueue {
            name: name.clone(),
            message_count: queue.ready.len() as u32,
            consumer_count: u32::from(queue.consumer.is_some()),
        })
    }

    async fn queue_bind(
        &self,
        queue: &str,
        exchange: &str,
        routing_key: &str,
        _options: QueueBindOptions,
    ) -> Result<(), AmqpError> {
        let mut state = self.open()?;
        state.calls.push(Call::QueueBind {
            queue: queue.to_owned(),
            exchange: exchange.to_owned(),
            routing_key: routing_key.to_owned(),
        });

        if !state.exchanges.contains_key(exchange) {
            return Err(not_found("exchange", exchange));
        }
        if !state.queues.contains_key(queue) {
            return Err(not_found("queue", queue));
        }

        let binding = (exchange.to_owned(), routing_key.to_owned(), queue.to_owned());
        if !state.bindings.contains(&binding) {
            state.bindings.push(binding);
        }
        Ok(())
    }

    async fn basic_qos(
        &self,
        prefetch_count: u16,
        options: BasicQosOptions,
    ) -> Result<(), AmqpError> {
        let mut state = self.open()?;
        state.calls.push(Call::Qos {
            prefetch_count,
            global: options.global,
        });
        *self.prefetch.lock().unwrap() = prefetch_count;
        Ok(())
    }

    async fn basic_publish(
        &self,
        exchange: &str,
        routing_key: &str,
        options: BasicPublishOptions,
        message: OutboundMessage,
    ) -> Result<(), AmqpError> {
        let mut state = self.open()?;
        state.calls.push(Call::Publish {
            exchange: exchange.to_owned(),
            routing_key: routing_key.to_owned(),
            content_type: message.content_type.clone(),
            mandatory: options.mandatory,
            immediate: options.immediate,
        });

        let targets = route(&state, exchange, routing_key)?;
        for target in targets {
            enqueue(
                &self.shared,
                &mut state,
                &target,
                Message {
                    exchange: exchange.to_owned(),
                    routing_key: routing_key.to_owned(),
                    content_type: message.content_type.clone(),
                    headers: message.headers.clone(),
                    data: message.data.clone(),
                    redelivered: false,
                },
            );
        }
        Ok(())
    }

    async fn basic_consume(
        &self,
        queue: &str,
        consumer_tag: &str,
        options: BasicConsumeOptions,
    ) -> Result<DeliveryStream, AmqpError> {
        let mut state = self.open()?;
        state.calls.push(Call::Consume {
            queue: queue.to_owned(),
            consumer_tag: consumer_tag.to_owned(),
            no_ack: options.no_ack,
        });

        let prefetch = *self.prefetch.lock().unwrap();
        let (sender, mut receiver) = mpsc::unbounded_channel();
        match state.queues.get_mut(queue) {
            Some(q) => {
                q.consumer = Some(Consumer {
                    sender,
                    prefetch,
                    unacked: HashMap::new(),
                })
            }
            None => return Err(not_found("queue", queue)),
        }
        dispatch(&self.shared, &mut state, queue);

        Ok(stream::poll_fn(move |cx| receiver.poll_recv(cx)).boxed())
    }
}

struct FakeAcker {
    shared: Shared,
    queue: String,
    tag: u64,
}

#[async_trait]
impl Acker for FakeAcker {
    async fn ack(&self, options: BasicAckOptions) -> Result<(), AmqpError> {
        let mut state = self.shared.lock().unwrap();
        state.calls.push(Call::Ack {
            queue: self.queue.clone(),
            delivery_tag: self.tag,
            multiple: options.multiple,
        });
        settle(&self.shared, &mut state, &self.queue, self.tag, None)
    }

    async fn nack(&self, options: BasicNackOptions) -> Result<(), AmqpError> {
        let mut state = self.shared.lock().unwrap();
        state.calls.push(Call::Nack {
            queue: self.queue.clone(),
            delivery_tag: self.tag,
            multiple: options.multiple,
            requeue: options.requeue,
        });
        settle(
            &self.shared,
            &mut state,
            &self.queue,
            self.tag,
            Some(options.requeue),
        )
    }
}

fn not_found(what: &str, name: &str) -> AmqpError {
    AmqpError::TransportError(format!("NOT_FOUND - no {what} '{name}'"))
}

/// Single-segment `*` and multi-segment `#` topic matching.
fn topic_matches(pattern: &[&str], key: &[&str]) -> bool {
    match (pattern.first(), key.first()) {
        (None, None) => true,
        (Some(&"#"), _) => {
            topic_matches(&pattern[1..], key) || (!key.is_empty() && topic_matches(pattern, &key[1..]))
        }
        (Some(&"*"), Some(_)) => topic_matches(&pattern[1..], &key[1..]),
        (Some(p), Some(k)) if p == k => topic_matches(&pattern[1..], &key[1..]),
        _ => false,
    }
}

fn route(state: &State, exchange: &str, routing_key: &str) -> Result<Vec<String>, AmqpError> {
    if exchange.is_empty() {
        return Ok(state
            .queues
            .contains_key(routing_key)
            .then(|| routing_key.to_owned())
            .into_iter()
            .collect());
    }

    let kind = *state
        .exchanges
        .get(exchange)
        .ok_or_else(|| not_found("exchange", exchange))?;
    let key: Vec<&str> = routing_key.split('.').collect();

    let mut targets: Vec<String> = state
        .bindings
        .iter()
        .filter(|(ex, _, _)| ex == exchange)
        .filter(|(_, pattern, _)| match kind {
            ExchangeKind::Fanout => true,
            ExchangeKind::Topic => {
                let pattern: Vec<&str> = pattern.split('.').collect();
                topic_matches(&pattern, &key)
            }
            _ => pattern == routing_key,
        })
        .map(|(_, _, queue)| queue.clone())
        .collect();
    targets.sort();
    targets.dedup();
    Ok(targets)
}

fn enqueue(shared: &Shared, state: &mut State, queue: &str, message: Message) {
    if let Some(q) = state.queues.get_mut(queue) {
        q.ready.push_back(message);
        dispatch(shared, state, queue);
    }
}

/// Pushes ready messages to the queue's consumer while its prefetch allows.
fn dispatch(shared: &Shared, state: &mut State, queue_name: &str) {
    loop {
        let tag = state.next_tag + 1;
        let Some(queue) = state.queues.get_mut(queue_name) else {
            return;
        };
        let Some(consumer) = queue.consumer.as_mut() else {
            return;
        };
        if consumer.prefetch > 0 && consumer.unacked.len() >= usize::from(consumer.prefetch) {
            return;
        }
        let Some(message) = queue.ready.pop_front() else {
            return;
        };

        let acker: Arc<dyn Acker> = Arc::new(FakeAcker {
            shared: shared.clone(),
            queue: queue_name.to_owned(),
            tag,
        });
        let mut delivery = Delivery::new(tag, message.data.clone(), acker)
            .with_routing(&message.exchange, &message.routing_key)
            .with_headers(message.headers.clone())
            .redelivered(message.redelivered);
        if !message.content_type.is_empty() {
            delivery = delivery.with_content_type(&message.content_type);
        }

        if consumer.sender.send(Ok(delivery)).is_err() {
            queue.ready.push_front(message);
            queue.consumer = None;
            return;
        }

        consumer.unacked.insert(tag, message);
        queue.max_unacked = queue.max_unacked.max(consumer.unacked.len());
        state.next_tag = tag;
    }
}

fn settle(
    shared: &Shared,
    state: &mut State,
    queue_name: &str,
    tag: u64,
    nack_requeue: Option<bool>,
) -> Result<(), AmqpError> {
    if state.closed {
        return Err(AmqpError::TransportError("channel closed".to_owned()));
    }

    let message = state
        .queues
        .get_mut(queue_name)
        .and_then(|q| q.consumer.as_mut())
        .and_then(|c| c.unacked.remove(&tag))
        .ok_or_else(|| {
            AmqpError::TransportError(format!("PRECONDITION_FAILED - unknown delivery tag {tag}"))
        })?;

    match nack_requeue {
        Some(true) => {
            if let Some(q) = state.queues.get_mut(queue_name) {
                q.ready.push_front(Message {
                    redelivered: true,
                    ..message
                });
            }
        }
        Some(false) => {
            let dlx = state
                .queues
                .get(queue_name)
                .and_then(|q| q.dead_letter_exchange.clone());
            if let Some(dlx) = dlx {
                if let Ok(targets) = route(state, &dlx, &message.routing_key) {
                    for target in targets {
                        enqueue(shared, state, &target, message.clone());
                    }
                }
            }
        }
        None => {}
    }

    dispatch(shared, state, queue_name);
    Ok(())
}

/// Polls `condition` until it holds, failing the test after two seconds.
pub async fn eventually(what: &str, condition: impl Fn() -> bool) {
    for _ in 0..400 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("timed out waiting for {what}");
}

//! In-process broker.
//!
//! `MemoryBroker` keeps exchanges and consumer bindings in memory and routes
//! messages the way an AMQP broker would (direct, topic and fanout
//! exchanges). It can also misbehave on request: refuse connections, fail
//! sends, or drop every live connection at once. Each `MemoryTransport`
//! created from the same broker shares its state.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};
use uuid::Uuid;

use super::{ClosedSignal, Connection, Consumer, ConsumerTag, Delivery, Transport};
use crate::messenger::topic::{ExchangeKind, TopicDescriptor};
use crate::utils::error::TransportError;

/// Deliveries a consumer may have queued before the broker starts dropping.
const CONSUMER_CAPACITY: usize = 1024;

#[derive(Debug, Clone, Default)]
pub struct MemoryBroker {
    inner: Arc<Mutex<BrokerState>>,
}

#[derive(Debug, Default)]
struct BrokerState {
    exchanges: HashMap<String, ExchangeKind>,
    bindings: HashMap<ConsumerTag, Binding>,
    connections: HashMap<u64, oneshot::Sender<TransportError>>,
    next_connection: u64,
    next_consumer: u64,
    refuse_connects: u32,
    fail_sends: u32,
    connect_attempts: u64,
    send_attempts: u64,
}

#[derive(Debug)]
struct Binding {
    connection: u64,
    topic: TopicDescriptor,
    tx: mpsc::Sender<Delivery>,
}

impl BrokerState {
    fn ensure_open(&self, connection: u64) -> Result<(), TransportError> {
        if self.connections.contains_key(&connection) {
            Ok(())
        } else {
            Err(TransportError::Closed(format!(
                "connection {connection} was closed by the broker"
            )))
        }
    }

    fn drop_connection(&mut self, connection: u64) {
        self.connections.remove(&connection);
        self.bindings.retain(|_, b| b.connection != connection);
    }

    fn route(&mut self, topic: &TopicDescriptor, body: &[u8]) -> usize {
        let routing_key = topic.routing_key_or_empty();
        let delivery = Delivery {
            exchange: topic.name().to_string(),
            routing_key: topic.routing_key().map(str::to_string),
            body: body.to_vec(),
            message_id: Uuid::new_v4().to_string(),
            timestamp: chrono::Utc::now().timestamp_millis(),
        };

        let mut reached = 0;
        for (tag, binding) in &self.bindings {
            if binding.topic.name() != topic.name() || !binding.topic.accepts(routing_key) {
                continue;
            }
            match binding.tx.try_send(delivery.clone()) {
                Ok(()) => reached += 1,
                Err(e) => warn!(consumer = %tag, error = %e, "Dropping delivery for consumer"),
            }
        }
        reached
    }
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, BrokerState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn transport(&self) -> MemoryTransport {
        MemoryTransport {
            broker: self.clone(),
        }
    }

    /// The next `n` connection attempts fail.
    pub fn fail_next_connects(&self, n: u32) {
        self.state().refuse_connects = n;
    }

    /// The next `n` sends fail. Sends on closed connections do not count.
    pub fn fail_next_sends(&self, n: u32) {
        self.state().fail_sends = n;
    }

    /// Closes every live connection, as if the broker restarted. Exchanges
    /// survive. Returns the number of connections closed.
    pub fn disconnect_all(&self) -> usize {
        let mut state = self.state();
        let connections: Vec<_> = state.connections.drain().collect();
        state.bindings.clear();
        let count = connections.len();
        for (id, closed) in connections {
            debug!(connection = id, "Closing memory connection");
            let _ = closed.send(TransportError::Closed(format!(
                "connection {id} reset by broker"
            )));
        }
        count
    }

    /// Publishes as a third party would, bypassing any messenger. Returns the
    /// number of consumers the message was routed to.
    pub fn publish(&self, topic: &TopicDescriptor, body: &[u8]) -> usize {
        self.state().route(topic, body)
    }

    pub fn exchange_kind(&self, name: &str) -> Option<ExchangeKind> {
        self.state().exchanges.get(name).copied()
    }

    pub fn connection_count(&self) -> usize {
        self.state().connections.len()
    }

    pub fn consumer_count(&self) -> usize {
        self.state().bindings.len()
    }

    pub fn consumer_count_for(&self, exchange: &str) -> usize {
        self.state()
            .bindings
            .values()
            .filter(|b| b.topic.name() == exchange)
            .count()
    }

    pub fn connect_attempts(&self) -> u64 {
        self.state().connect_attempts
    }

    pub fn send_attempts(&self) -> u64 {
        self.state().send_attempts
    }
}

#[derive(Debug, Clone)]
pub struct MemoryTransport {
    broker: MemoryBroker,
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn connect(&self) -> Result<Box<dyn Connection>, TransportError> {
        let mut state = self.broker.state();
        state.connect_attempts += 1;
        if state.refuse_connects > 0 {
            state.refuse_connects -= 1;
            return Err(TransportError::Connect("connection refused".to_string()));
        }

        state.next_connection += 1;
        let id = state.next_connection;
        let (closed_tx, closed) = oneshot::channel();
        state.connections.insert(id, closed_tx);
        debug!(connection = id, "Opened memory connection");

        Ok(Box::new(MemoryConnection {
            broker: self.broker.clone(),
            id,
            closed: Some(closed),
        }))
    }
}

#[derive(Debug)]
pub struct MemoryConnection {
    broker: MemoryBroker,
    id: u64,
    closed: Option<oneshot::Receiver<TransportError>>,
}

#[async_trait]
impl Connection for MemoryConnection {
    async fn declare_destination(&mut self, topic: &TopicDescriptor) -> Result<(), TransportError> {
        let mut state = self.broker.state();
        state.ensure_open(self.id)?;
        match state.exchanges.get(topic.name()) {
            Some(kind) if *kind != topic.kind() => Err(TransportError::Declare {
                exchange: topic.name().to_string(),
                reason: format!("exchange exists as {kind}, requested {}", topic.kind()),
            }),
            Some(_) => Ok(()),
            None => {
                state
                    .exchanges
                    .insert(topic.name().to_string(), topic.kind());
                Ok(())
            }
        }
    }

    async fn open_consumer(&mut self, topic: &TopicDescriptor) -> Result<Consumer, TransportError> {
        let mut state = self.broker.state();
        state.ensure_open(self.id)?;
        if !state.exchanges.contains_key(topic.name()) {
            return Err(TransportError::Consumer(format!(
                "no exchange named {}",
                topic.name()
            )));
        }

        state.next_consumer += 1;
        let tag = ConsumerTag(format!("ctag-{}-{}", self.id, state.next_consumer));
        let (tx, deliveries) = mpsc::channel(CONSUMER_CAPACITY);
        state.bindings.insert(
            tag.clone(),
            Binding {
                connection: self.id,
                topic: topic.clone(),
                tx,
            },
        );
        Ok(Consumer { tag, deliveries })
    }

    async fn cancel_consumer(&mut self, tag: &ConsumerTag) -> Result<(), TransportError> {
        let mut state = self.broker.state();
        state.ensure_open(self.id)?;
        state.bindings.remove(tag);
        Ok(())
    }

    async fn send(&mut self, topic: &TopicDescriptor, body: &[u8]) -> Result<(), TransportError> {
        let mut state = self.broker.state();
        state.ensure_open(self.id)?;
        state.send_attempts += 1;
        if state.fail_sends > 0 {
            state.fail_sends -= 1;
            return Err(TransportError::Send("injected send failure".to_string()));
        }
        if !state.exchanges.contains_key(topic.name()) {
            return Err(TransportError::Send(format!(
                "no exchange named {}",
                topic.name()
            )));
        }
        state.route(topic, body);
        Ok(())
    }

    fn on_closed(&mut self) -> ClosedSignal {
        ClosedSignal::from_receiver(self.closed.take())
    }
}

impl Drop for MemoryConnection {
    fn drop(&mut self) {
        self.broker.state().drop_connection(self.id);
    }
}

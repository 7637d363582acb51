//! The `transport` module is the messenger's view of a broker connection.
//!
//! [`Transport`] opens connections; a [`Connection`] declares destinations,
//! opens consumers, sends messages and reports when it dies. The messenger
//! only ever drives a connection from its event loop, so implementations do
//! not need to be shareable between tasks.
//!
//! Two implementations ship with the crate:
//! - [`websocket`]: talks the popsub JSON protocol over a WebSocket.
//! - [`memory`]: an in-process broker with exchange routing and fault
//!   injection, used by the tests and handy for local wiring.

pub mod memory;
pub mod message;
pub mod websocket;

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};

use crate::codec::Codec;
use crate::messenger::topic::TopicDescriptor;
use crate::utils::error::{CodecError, TransportError};

pub use memory::{MemoryBroker, MemoryTransport};
pub use websocket::{Credentials, WebSocketTransport};

/// An inbound message as handed to subscribers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub exchange: String,
    pub routing_key: Option<String>,
    pub body: Vec<u8>,
    pub message_id: String,
    /// Milliseconds since the Unix epoch, as stamped by the broker.
    pub timestamp: i64,
}

impl Delivery {
    pub fn decode<T, C>(&self, codec: &C) -> Result<T, CodecError>
    where
        T: serde::de::DeserializeOwned,
        C: Codec,
    {
        codec.unmarshal(&self.body)
    }
}

/// Broker-side handle of a consumer, used to cancel it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConsumerTag(pub String);

impl fmt::Display for ConsumerTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A consumer opened on a connection. `deliveries` ends when the consumer is
/// cancelled or the connection goes away.
#[derive(Debug)]
pub struct Consumer {
    pub tag: ConsumerTag,
    pub deliveries: mpsc::Receiver<Delivery>,
}

#[async_trait]
pub trait Transport: Send + Sync + 'static {
    async fn connect(&self) -> Result<Box<dyn Connection>, TransportError>;
}

#[async_trait]
pub trait Connection: Send {
    /// Makes sure `topic`'s exchange exists with the right kind.
    async fn declare_destination(&mut self, topic: &TopicDescriptor) -> Result<(), TransportError>;

    /// Binds a new consumer to `topic`, using its routing key as binding key.
    async fn open_consumer(&mut self, topic: &TopicDescriptor) -> Result<Consumer, TransportError>;

    async fn cancel_consumer(&mut self, tag: &ConsumerTag) -> Result<(), TransportError>;

    async fn send(&mut self, topic: &TopicDescriptor, body: &[u8]) -> Result<(), TransportError>;

    /// Resolves when the connection is lost. Only the first call is armed;
    /// later calls return a signal that never fires.
    fn on_closed(&mut self) -> ClosedSignal;
}

/// Future resolving with the reason a connection closed.
#[derive(Debug)]
pub struct ClosedSignal {
    rx: Option<oneshot::Receiver<TransportError>>,
}

impl ClosedSignal {
    /// Returns the signal and the sender used to fire it.
    pub fn channel() -> (oneshot::Sender<TransportError>, ClosedSignal) {
        let (tx, rx) = oneshot::channel();
        (tx, ClosedSignal { rx: Some(rx) })
    }

    pub fn never() -> Self {
        ClosedSignal { rx: None }
    }

    pub fn from_receiver(rx: Option<oneshot::Receiver<TransportError>>) -> Self {
        ClosedSignal { rx }
    }
}

impl Future for ClosedSignal {
    type Output = TransportError;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let Some(rx) = self.rx.as_mut() else {
            return Poll::Pending;
        };
        match Pin::new(rx).poll(cx) {
            Poll::Pending => Poll::Pending,
            Poll::Ready(result) => {
                self.rx = None;
                Poll::Ready(result.unwrap_or_else(|_| {
                    TransportError::Closed("connection dropped without notice".to_string())
                }))
            }
        }
    }
}

#[cfg(test)]
mod tests;

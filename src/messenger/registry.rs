//! Subscription registry
//!
//! Maps each subscriber's [`StreamId`] to the topic it asked for, the sending
//! half of its stream, and the broker-side consumer currently feeding it.
//! The registry is owned by the event loop and never shared: every change
//! arrives as a control message, so no locking is involved.
//!
//! Bindings belong to a single connection. When a session ends they are all
//! dropped (which stops their forwarders) and the next session rebinds every
//! subscription from scratch; the subscriber keeps reading the same stream.

use std::collections::HashMap;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::topic::TopicDescriptor;
use crate::stream::{StreamId, StreamSender};
use crate::transport::{Connection, Consumer, ConsumerTag, Delivery};
use crate::utils::error::{MessengerError, Result, TransportError};

/// Fan-in channel shared by every forwarder of a session.
pub(crate) type Inbound = mpsc::Sender<(StreamId, Delivery)>;

#[derive(Debug)]
pub(crate) struct SubscriptionRequest {
    pub topic: TopicDescriptor,
    pub sink: StreamSender<Delivery>,
}

#[derive(Debug)]
pub(crate) struct Subscription {
    pub topic: TopicDescriptor,
    pub sink: StreamSender<Delivery>,
    pub binding: Option<Binding>,
}

/// A consumer opened for a subscription plus the task forwarding its
/// deliveries into the session's fan-in channel.
#[derive(Debug)]
pub(crate) struct Binding {
    pub tag: ConsumerTag,
    forwarder: JoinHandle<()>,
}

impl Drop for Binding {
    fn drop(&mut self) {
        self.forwarder.abort();
    }
}

#[derive(Debug, Default)]
pub(crate) struct Registry {
    subscriptions: HashMap<StreamId, Subscription>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a subscription without binding it.
    pub fn add(&mut self, request: SubscriptionRequest) -> StreamId {
        let id = request.sink.id();
        self.subscriptions.insert(
            id,
            Subscription {
                topic: request.topic,
                sink: request.sink,
                binding: None,
            },
        );
        id
    }

    /// Removes a subscription. Unknown ids are ignored.
    pub fn remove(&mut self, id: StreamId) -> Option<Subscription> {
        self.subscriptions.remove(&id)
    }

    pub fn sink(&self, id: StreamId) -> Option<&StreamSender<Delivery>> {
        self.subscriptions.get(&id).map(|s| &s.sink)
    }

    pub fn len(&self) -> usize {
        self.subscriptions.len()
    }

    #[cfg(test)]
    pub fn bound_count(&self) -> usize {
        self.subscriptions
            .values()
            .filter(|s| s.binding.is_some())
            .count()
    }

    /// Declares the subscription's destination on `conn`, opens a consumer and
    /// starts forwarding its deliveries to `inbound`. A previous binding of the
    /// same subscription is released first.
    ///
    /// Only an unknown id is an error. A subscription the broker refuses is
    /// logged and left unbound until the next session; `Ok(false)` reports it.
    pub async fn bind(
        &mut self,
        id: StreamId,
        conn: &mut dyn Connection,
        inbound: &Inbound,
    ) -> Result<bool> {
        let sub = self
            .subscriptions
            .get_mut(&id)
            .ok_or(MessengerError::SubscriptionNotFound(id))?;
        sub.binding = None;

        let consumer = match open(conn, &sub.topic).await {
            Ok(consumer) => consumer,
            Err(e) => {
                warn!(stream = %id, topic = %sub.topic, error = %e, "Failed to bind subscription");
                return Ok(false);
            }
        };
        debug!(stream = %id, topic = %sub.topic, consumer = %consumer.tag, "Subscription bound");

        let forwarder = tokio::spawn(forward(id, consumer.deliveries, inbound.clone()));
        sub.binding = Some(Binding {
            tag: consumer.tag,
            forwarder,
        });
        Ok(true)
    }

    /// Binds every registered subscription. Returns how many were bound.
    pub async fn rebind_all(&mut self, conn: &mut dyn Connection, inbound: &Inbound) -> usize {
        let ids: Vec<StreamId> = self.subscriptions.keys().copied().collect();
        let mut bound = 0;
        for id in ids {
            if let Ok(true) = self.bind(id, conn, inbound).await {
                bound += 1;
            }
        }
        bound
    }

    /// Forgets every binding. Called when the connection they live on is gone.
    pub fn invalidate(&mut self) {
        for sub in self.subscriptions.values_mut() {
            sub.binding = None;
        }
    }

    /// Empties the registry, leaving a final `Shutdown` entry in every stream
    /// that has room for it. Returns the number of subscriptions dropped.
    pub fn shutdown(&mut self) -> usize {
        let count = self.subscriptions.len();
        for (_, sub) in self.subscriptions.drain() {
            let _ = sub.sink.try_send(Err(MessengerError::Shutdown));
        }
        count
    }
}

async fn open(conn: &mut dyn Connection, topic: &TopicDescriptor) -> Result<Consumer, TransportError> {
    conn.declare_destination(topic).await?;
    conn.open_consumer(topic).await
}

async fn forward(id: StreamId, mut deliveries: mpsc::Receiver<Delivery>, inbound: Inbound) {
    while let Some(delivery) = deliveries.recv().await {
        if inbound.send((id, delivery)).await.is_err() {
            break;
        }
    }
}

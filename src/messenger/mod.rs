//! Messenger
//!
//! The client-side half of the pub/sub system. A [`Messenger`] multiplexes any
//! number of subscriptions and publishes over a single broker connection and
//! keeps them alive across reconnects.
//!
//! Concurrency and usage notes:
//! - Every `Messenger` handle (they are cheap to clone) only writes to
//!   bounded control channels. A single background task, the supervisor,
//!   owns the connection and the subscription registry and is the only one
//!   touching either.
//! - `publish` returns once the message is queued; the send happens later on
//!   the background task. Failed sends are retried up to `max_retries` times.
//! - `subscribe` hands back a [`Stream`] right away; the broker-side consumer
//!   is created by the background task, and recreated after every reconnect
//!   without any action from the subscriber.
//! - A subscriber that stops reading eventually fills its stream's buffer.
//!   The background task then waits for room, which stalls every other
//!   subscription with it. Size `stream_buffer` accordingly.

pub mod topic;

mod event_loop;
mod publish;
mod registry;
mod supervisor;

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::codec::{Codec, JsonCodec};
use crate::config::MessengerSettings;
use crate::stream::{self, Stream, StreamId};
use crate::transport::{Delivery, Transport};
use crate::utils::error::{MessengerError, Result};
use event_loop::{ControlChannels, LoopContext};
use publish::OutboundMessage;
use registry::{Registry, SubscriptionRequest};
use supervisor::Supervisor;
use topic::TopicDescriptor;

/// Tuning knobs of a messenger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessengerConfig {
    /// Extra attempts granted to a message whose send failed.
    pub max_retries: u32,
    /// Pause between losing a connection and opening the next one.
    pub retry_interval: Duration,
    /// Capacity of every subscriber stream.
    pub stream_buffer: usize,
    /// Capacity of the publish, subscribe and unsubscribe queues.
    pub control_buffer: usize,
}

impl MessengerConfig {
    pub const DEFAULT_MAX_RETRIES: u32 = 10;
    pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_secs(10);
    pub const DEFAULT_STREAM_BUFFER: usize = 50;
    pub const DEFAULT_CONTROL_BUFFER: usize = 50;
}

impl Default for MessengerConfig {
    fn default() -> Self {
        Self {
            max_retries: Self::DEFAULT_MAX_RETRIES,
            retry_interval: Self::DEFAULT_RETRY_INTERVAL,
            stream_buffer: Self::DEFAULT_STREAM_BUFFER,
            control_buffer: Self::DEFAULT_CONTROL_BUFFER,
        }
    }
}

impl From<&MessengerSettings> for MessengerConfig {
    fn from(settings: &MessengerSettings) -> Self {
        Self {
            max_retries: settings.max_retries,
            retry_interval: Duration::from_secs(settings.retry_interval_secs),
            stream_buffer: settings.stream_buffer,
            control_buffer: settings.control_buffer,
        }
    }
}

/// Lifecycle of the supervised connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Running,
    /// Shutdown was requested; the messenger will not reconnect.
    Closed,
}

pub struct MessengerBuilder<C: Codec = JsonCodec> {
    transport: Arc<dyn Transport>,
    config: MessengerConfig,
    codec: C,
}

impl<C: Codec> MessengerBuilder<C> {
    pub fn config(mut self, config: MessengerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.config.max_retries = max_retries;
        self
    }

    pub fn retry_interval(mut self, retry_interval: Duration) -> Self {
        self.config.retry_interval = retry_interval;
        self
    }

    pub fn stream_buffer(mut self, stream_buffer: usize) -> Self {
        self.config.stream_buffer = stream_buffer;
        self
    }

    pub fn control_buffer(mut self, control_buffer: usize) -> Self {
        self.config.control_buffer = control_buffer;
        self
    }

    pub fn codec<D: Codec>(self, codec: D) -> MessengerBuilder<D> {
        MessengerBuilder {
            transport: self.transport,
            config: self.config,
            codec,
        }
    }

    /// Starts the background task and returns a handle to it.
    ///
    /// The task runs until `shutdown` turns `true` (or its sender is dropped).
    /// Must be called from within a tokio runtime.
    pub fn spawn(self, shutdown: watch::Receiver<bool>) -> (Messenger<C>, JoinHandle<()>) {
        let capacity = self.config.control_buffer.max(1);
        let (publish_tx, publish_rx) = mpsc::channel(capacity);
        let (subscribe_tx, subscribe_rx) = mpsc::channel(capacity);
        let (unsubscribe_tx, unsubscribe_rx) = mpsc::channel(capacity);
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);

        let supervisor = Supervisor {
            transport: self.transport,
            state: state_tx,
            ctx: LoopContext {
                config: self.config.clone(),
                shutdown,
                channels: ControlChannels {
                    publish: publish_rx,
                    subscribe: subscribe_rx,
                    unsubscribe: unsubscribe_rx,
                },
                registry: Registry::new(),
                retry_queue: VecDeque::new(),
            },
        };
        let handle = tokio::spawn(supervisor.run());

        let messenger = Messenger {
            codec: Arc::new(self.codec),
            stream_buffer: self.config.stream_buffer,
            publish_tx,
            subscribe_tx,
            unsubscribe_tx,
            state: state_rx,
        };
        (messenger, handle)
    }
}

/// Handle to a running messenger.
pub struct Messenger<C: Codec = JsonCodec> {
    codec: Arc<C>,
    stream_buffer: usize,
    publish_tx: mpsc::Sender<OutboundMessage>,
    subscribe_tx: mpsc::Sender<SubscriptionRequest>,
    unsubscribe_tx: mpsc::Sender<StreamId>,
    state: watch::Receiver<ConnectionState>,
}

impl<C: Codec> Clone for Messenger<C> {
    fn clone(&self) -> Self {
        Self {
            codec: self.codec.clone(),
            stream_buffer: self.stream_buffer,
            publish_tx: self.publish_tx.clone(),
            subscribe_tx: self.subscribe_tx.clone(),
            unsubscribe_tx: self.unsubscribe_tx.clone(),
            state: self.state.clone(),
        }
    }
}

impl Messenger<JsonCodec> {
    pub fn builder<T: Transport>(transport: T) -> MessengerBuilder<JsonCodec> {
        MessengerBuilder {
            transport: Arc::new(transport),
            config: MessengerConfig::default(),
            codec: JsonCodec,
        }
    }
}

impl<C: Codec> Messenger<C> {
    /// Serializes `message` and queues it for `topic`.
    ///
    /// Serialization errors are returned right away and nothing is queued.
    /// `Ok` only means the message was queued; send failures are retried and
    /// logged by the background task, never reported here.
    pub async fn publish<M>(&self, topic: &TopicDescriptor, message: &M) -> Result<()>
    where
        M: Serialize + ?Sized,
    {
        let body = self.codec.marshal(message)?;
        self.enqueue(OutboundMessage::new(topic.clone(), body)).await
    }

    /// Like [`publish`](Self::publish), and returns a stream that receives
    /// `Ok(())` once the message was sent, or `Err(PublishDropped)` if it was
    /// given up on.
    pub async fn publish_confirmed<M>(
        &self,
        topic: &TopicDescriptor,
        message: &M,
    ) -> Result<Stream<()>>
    where
        M: Serialize + ?Sized,
    {
        let body = self.codec.marshal(message)?;
        let (confirm, confirmation) = stream::channel(1);
        self.enqueue(OutboundMessage::new(topic.clone(), body).with_confirm(confirm))
            .await?;
        Ok(confirmation)
    }

    async fn enqueue(&self, msg: OutboundMessage) -> Result<()> {
        self.publish_tx
            .send(msg)
            .await
            .map_err(|_| MessengerError::Shutdown)
    }

    /// Subscribes to `topic`. Deliveries start once the background task has
    /// bound the subscription, and keep coming across reconnects until
    /// [`unsubscribe`](Self::unsubscribe) is called or the stream is dropped.
    pub async fn subscribe(&self, topic: &TopicDescriptor) -> Result<Stream<Delivery>> {
        let (sink, stream) = stream::channel(self.stream_buffer);
        self.subscribe_tx
            .send(SubscriptionRequest {
                topic: topic.clone(),
                sink,
            })
            .await
            .map_err(|_| MessengerError::Shutdown)?;
        Ok(stream)
    }

    /// Ends the subscription behind `stream`. Entries already buffered can
    /// still be read; after them `recv` returns `None`. Calling this again,
    /// or after shutdown, does nothing.
    pub async fn unsubscribe(&self, stream: &Stream<Delivery>) {
        let _ = self.unsubscribe_tx.send(stream.id()).await;
    }

    pub fn codec(&self) -> &C {
        &self.codec
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Watch channel following the supervisor's state changes.
    pub fn connection_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    /// Check suitable for [`HealthMonitor`](crate::health::HealthMonitor):
    /// ready while connected.
    pub fn readiness_check(
        &self,
    ) -> impl Fn() -> std::result::Result<(), String> + Send + Sync + 'static {
        let state = self.state.clone();
        move || match *state.borrow() {
            ConnectionState::Running => Ok(()),
            other => Err(format!("broker connection is {other:?}")),
        }
    }
}

//! The `stream` module provides the bounded, typed channel used to hand
//! results to a single consumer.
//!
//! Every entry is a `Result`: subscribers receive `Ok(Delivery)` for each
//! inbound message, and the messenger may push a final `Err` (for example
//! [`MessengerError::Shutdown`]) before it lets go of the sending side.
//! There is no explicit close; `recv` returns `None` once every
//! [`StreamSender`] is gone.

use std::fmt;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::sync::mpsc;
use uuid::Uuid;

use crate::utils::error::MessengerError;

pub type StreamItem<T> = Result<T, MessengerError>;

/// Identity of a stream. Both halves of a channel share it, which is what
/// lets `Messenger::unsubscribe` find the subscription behind a `Stream`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StreamId(Uuid);

impl StreamId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for StreamId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "stream-{}", self.0)
    }
}

/// Allocates a stream holding at most `buffer` undelivered entries.
///
/// A zero buffer is treated as one.
pub fn channel<T>(buffer: usize) -> (StreamSender<T>, Stream<T>) {
    let id = StreamId::new();
    let (tx, rx) = mpsc::channel(buffer.max(1));
    (StreamSender { id, tx }, Stream { id, rx })
}

/// Producing half of a stream.
#[derive(Debug)]
pub struct StreamSender<T> {
    id: StreamId,
    tx: mpsc::Sender<StreamItem<T>>,
}

impl<T> Clone for StreamSender<T> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            tx: self.tx.clone(),
        }
    }
}

impl<T> StreamSender<T> {
    pub fn id(&self) -> StreamId {
        self.id
    }

    /// Waits for buffer space, then enqueues `item`.
    pub async fn send(&self, item: StreamItem<T>) -> Result<(), MessengerError> {
        self.tx
            .send(item)
            .await
            .map_err(|_| MessengerError::StreamClosed(self.id))
    }

    /// Enqueues `item` only if there is room right now. Returns `false` when
    /// the entry was not accepted (buffer full or receiver dropped).
    pub fn try_send(&self, item: StreamItem<T>) -> bool {
        self.tx.try_send(item).is_ok()
    }

    /// `true` once the consumer dropped its [`Stream`].
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Consuming half of a stream.
#[derive(Debug)]
pub struct Stream<T> {
    id: StreamId,
    rx: mpsc::Receiver<StreamItem<T>>,
}

impl<T> Stream<T> {
    pub fn id(&self) -> StreamId {
        self.id
    }

    /// Waits for the next entry. `None` means the producing side is gone.
    pub async fn recv(&mut self) -> Option<StreamItem<T>> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<StreamItem<T>> {
        self.rx.try_recv().ok()
    }

    /// Number of entries waiting to be received.
    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}

impl<T> futures::Stream for Stream<T> {
    type Item = StreamItem<T>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

//! Event loop
//!
//! One session of the messenger: runs on a freshly opened connection until
//! shutdown (`Ok`) or until the connection has to be given up (`Err`). Each
//! iteration handles exactly one event, picked in this order of priority:
//!
//! 1. shutdown signal
//! 2. connection closed
//! 3. a message waiting in the retry queue
//! 4. a new outbound message
//! 5. a subscribe request
//! 6. an unsubscribe request
//! 7. an inbound delivery
//!
//! Inbound deliveries from every consumer arrive through a single fan-in
//! channel, tagged with the subscriber's stream id, so the set of sources the
//! loop waits on never changes while subscriptions come and go.

use std::collections::VecDeque;

use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use super::MessengerConfig;
use super::publish::{self, OutboundMessage};
use super::registry::{Inbound, Registry, SubscriptionRequest};
use super::supervisor::cancelled;
use crate::stream::StreamId;
use crate::transport::{ClosedSignal, Connection, Delivery};
use crate::utils::error::Result;

/// Receiving ends of the channels `Messenger` handles write to.
#[derive(Debug)]
pub(crate) struct ControlChannels {
    pub publish: mpsc::Receiver<OutboundMessage>,
    pub subscribe: mpsc::Receiver<SubscriptionRequest>,
    pub unsubscribe: mpsc::Receiver<StreamId>,
}

/// State that outlives a single connection.
#[derive(Debug)]
pub(crate) struct LoopContext {
    pub config: MessengerConfig,
    pub shutdown: watch::Receiver<bool>,
    pub channels: ControlChannels,
    pub registry: Registry,
    pub retry_queue: VecDeque<OutboundMessage>,
}

pub(crate) async fn run(mut conn: Box<dyn Connection>, ctx: &mut LoopContext) -> Result<()> {
    let (inbound_tx, inbound_rx) = mpsc::channel(ctx.config.stream_buffer.max(1));
    let closed = conn.on_closed();

    let result = serve(conn.as_mut(), ctx, inbound_tx, inbound_rx, closed).await;

    ctx.registry.invalidate();
    result
}

async fn serve(
    conn: &mut dyn Connection,
    ctx: &mut LoopContext,
    inbound_tx: Inbound,
    mut inbound_rx: mpsc::Receiver<(StreamId, Delivery)>,
    mut closed: ClosedSignal,
) -> Result<()> {
    let bound = ctx.registry.rebind_all(conn, &inbound_tx).await;
    debug!(subscriptions = ctx.registry.len(), bound, "Subscriptions rebound");

    loop {
        tokio::select! {
            biased;

            _ = cancelled(&mut ctx.shutdown) => return Ok(()),

            reason = &mut closed => return Err(reason.into()),

            _ = std::future::ready(()), if !ctx.retry_queue.is_empty() => {
                if let Some(msg) = ctx.retry_queue.pop_front() {
                    publish::publish(conn, msg, ctx.config.max_retries, &mut ctx.retry_queue).await?;
                }
            }

            Some(msg) = ctx.channels.publish.recv() => {
                publish::publish(conn, msg, ctx.config.max_retries, &mut ctx.retry_queue).await?;
            }

            Some(request) = ctx.channels.subscribe.recv() => {
                let topic = request.topic.clone();
                let id = ctx.registry.add(request);
                info!(stream = %id, topic = %topic, "Subscription added");
                ctx.registry.bind(id, conn, &inbound_tx).await?;
            }

            Some(id) = ctx.channels.unsubscribe.recv() => {
                remove_subscription(&mut ctx.registry, conn, id).await;
            }

            Some((id, delivery)) = inbound_rx.recv() => {
                let Some(sink) = ctx.registry.sink(id).cloned() else {
                    debug!(stream = %id, "Discarding delivery for removed subscription");
                    continue;
                };
                tokio::select! {
                    biased;
                    _ = cancelled(&mut ctx.shutdown) => return Ok(()),
                    sent = sink.send(Ok(delivery)) => {
                        if sent.is_err() {
                            info!(stream = %id, "Subscriber dropped its stream");
                            remove_subscription(&mut ctx.registry, conn, id).await;
                        }
                    }
                }
            }
        }
    }
}

async fn remove_subscription(registry: &mut Registry, conn: &mut dyn Connection, id: StreamId) {
    let Some(sub) = registry.remove(id) else {
        debug!(stream = %id, "Unsubscribe for unknown stream ignored");
        return;
    };

    if let Some(binding) = &sub.binding {
        if let Err(e) = conn.cancel_consumer(&binding.tag).await {
            warn!(stream = %id, consumer = %binding.tag, error = %e, "Failed to cancel consumer");
        }
    }
    info!(stream = %id, topic = %sub.topic, "Subscription removed");
}

//! Publish engine
//!
//! Outbound messages are already serialized when they get here. A send that
//! fails is queued again with its retry counter bumped, until the counter
//! reaches `max_retries`; after that the message is dropped. Either way the
//! failure is returned to the event loop, which treats it as a broken
//! connection.
//!
//! A body the transport rejects as invalid is dropped on the first attempt
//! and the connection is kept.

use std::collections::VecDeque;

use tracing::{debug, error, warn};

use super::topic::TopicDescriptor;
use crate::stream::StreamSender;
use crate::transport::Connection;
use crate::utils::error::{MessengerError, Result, TransportError};

#[derive(Debug)]
pub(crate) struct OutboundMessage {
    pub topic: TopicDescriptor,
    pub body: Vec<u8>,
    pub retries: u32,
    pub confirm: Option<StreamSender<()>>,
}

impl OutboundMessage {
    pub fn new(topic: TopicDescriptor, body: Vec<u8>) -> Self {
        Self {
            topic,
            body,
            retries: 0,
            confirm: None,
        }
    }

    pub fn with_confirm(mut self, confirm: StreamSender<()>) -> Self {
        self.confirm = Some(confirm);
        self
    }

    /// 1-based number of the attempt about to be made.
    pub fn attempt(&self) -> u32 {
        self.retries.saturating_add(1)
    }
}

pub(crate) async fn publish(
    conn: &mut dyn Connection,
    mut msg: OutboundMessage,
    max_retries: u32,
    retry_queue: &mut VecDeque<OutboundMessage>,
) -> Result<()> {
    let outcome = match conn.declare_destination(&msg.topic).await {
        Ok(()) => conn.send(&msg.topic, &msg.body).await,
        Err(e) => Err(e),
    };

    let source = match outcome {
        Ok(()) => {
            debug!(topic = %msg.topic, attempt = msg.attempt(), bytes = msg.body.len(), "Message published");
            if let Some(confirm) = &msg.confirm {
                let _ = confirm.try_send(Ok(()));
            }
            return Ok(());
        }
        Err(e) => e,
    };

    let attempt = msg.attempt();
    let exchange = msg.topic.name().to_string();
    let routing_key = msg.topic.routing_key_or_empty().to_string();

    if !source.is_retryable() {
        error!(
            exchange = %exchange,
            routing_key = %routing_key,
            attempts = attempt,
            error = %source,
            "Message rejected by transport, dropping it"
        );
        drop_message(msg, attempt, &source);
        return Ok(());
    }

    if msg.retries < max_retries {
        warn!(
            exchange = %exchange,
            routing_key = %routing_key,
            attempt,
            max_attempts = max_retries.saturating_add(1),
            error = %source,
            "Publish failed, message queued for retry"
        );
        msg.retries += 1;
        retry_queue.push_back(msg);
    } else {
        error!(
            exchange = %exchange,
            routing_key = %routing_key,
            attempts = attempt,
            error = %source,
            "Publish failed, dropping message"
        );
        drop_message(msg, attempt, &source);
    }

    Err(MessengerError::PublishFailed {
        exchange,
        routing_key,
        attempt,
        source,
    })
}

fn drop_message(msg: OutboundMessage, attempts: u32, reason: &TransportError) {
    if let Some(confirm) = msg.confirm {
        let _ = confirm.try_send(Err(MessengerError::PublishDropped {
            attempts,
            reason: reason.to_string(),
        }));
    }
}

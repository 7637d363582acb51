//! The `error` module defines the error types used across `popsub-messenger`.
//!
//! Errors are split by the layer that produces them: the transport (broker
//! connection), the codec (payload serialization) and the messenger itself.
//! `MessengerError` wraps the first two so callers only ever match on one type.

use thiserror::Error;

use crate::stream::StreamId;

/// Errors raised by a [`Transport`](crate::transport::Transport) or one of its
/// connections. None of them is fatal. The supervisor reconnects after any
/// retryable one; see [`TransportError::is_retryable`].
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("failed to connect to broker: {0}")]
    Connect(String),

    #[error("broker rejected credentials: {0}")]
    Authentication(String),

    #[error("connection closed: {0}")]
    Closed(String),

    #[error("failed to declare destination {exchange}: {reason}")]
    Declare { exchange: String, reason: String },

    #[error("consumer error: {0}")]
    Consumer(String),

    #[error("failed to send message: {0}")]
    Send(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    /// The broker can never accept this body, on any connection.
    #[error("invalid payload: {0}")]
    InvalidPayload(String),
}

impl TransportError {
    /// Whether sending the same message again, after a reconnect, could
    /// succeed.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, TransportError::InvalidPayload(_))
    }
}

/// Errors raised while encoding or decoding a payload.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("failed to serialize payload with {codec}: {reason}")]
    Serialize { codec: &'static str, reason: String },

    #[error("failed to deserialize payload with {codec}: {reason}")]
    Deserialize { codec: &'static str, reason: String },
}

#[derive(Debug, Error)]
pub enum MessengerError {
    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    /// A send attempt failed. Ends the current session.
    #[error(
        "failed to publish message (exchange={exchange}, routing_key={routing_key}, attempt={attempt}): {source}"
    )]
    PublishFailed {
        exchange: String,
        routing_key: String,
        attempt: u32,
        #[source]
        source: TransportError,
    },

    /// The message was given up on after exhausting its retries.
    #[error("message dropped after {attempts} attempts: {reason}")]
    PublishDropped { attempts: u32, reason: String },

    #[error("no subscription registered for stream {0}")]
    SubscriptionNotFound(StreamId),

    #[error("stream {0} has no receiver")]
    StreamClosed(StreamId),

    #[error("messenger is shut down")]
    Shutdown,
}

pub type Result<T, E = MessengerError> = std::result::Result<T, E>;

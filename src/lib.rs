//! # PopSub Messenger
//!
//! `popsub-messenger` is the client side of a publish/subscribe system. It keeps
//! a single broker connection alive, multiplexes any number of subscriptions
//! and publishes over it, and hides reconnects from the code using it.
//!
//! ## Core Modules
//!
//! - `messenger`: The `Messenger` handle, its background event loop and the
//!   connection supervisor that reconnects with a fixed backoff.
//! - `stream`: Bounded, typed channels handed to subscribers.
//! - `transport`: The broker connection abstraction, with a WebSocket
//!   implementation for popsub brokers and an in-memory broker.
//! - `codec`: Payload serialization (JSON, YAML, XML).
//! - `config`: Loads settings from `config/default.*` and `POPSUB__*`
//!   environment variables.
//! - `health`: Named readiness checks.
//! - `utils`: Error types and logging setup.
//!
//! ## Example
//!
//! ```no_run
//! use popsub_messenger::messenger::Messenger;
//! use popsub_messenger::messenger::topic::TopicDescriptor;
//! use popsub_messenger::transport::{Credentials, WebSocketTransport};
//!
//! # async fn run() -> Result<(), popsub_messenger::utils::error::MessengerError> {
//! let (_stop, shutdown) = tokio::sync::watch::channel(false);
//! let transport = WebSocketTransport::new("127.0.0.1", 8080, Credentials::new("admin", "password"));
//! let (messenger, _task) = Messenger::builder(transport).spawn(shutdown);
//!
//! let chat = TopicDescriptor::fanout("chat");
//! let mut stream = messenger.subscribe(&chat).await?;
//! messenger.publish(&chat, &"hello").await?;
//! if let Some(Ok(delivery)) = stream.recv().await {
//!     println!("{}", String::from_utf8_lossy(&delivery.body));
//! }
//! # Ok(())
//! # }
//! ```

pub mod codec;
pub mod config;
pub mod health;
pub mod messenger;
pub mod stream;
pub mod transport;
pub mod utils;

pub use messenger::topic::{ExchangeKind, TopicDescriptor};
pub use messenger::{ConnectionState, Messenger, MessengerConfig};
pub use stream::{Stream, StreamId};
pub use transport::Delivery;
pub use utils::error::{MessengerError, Result};

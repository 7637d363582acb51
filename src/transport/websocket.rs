//! WebSocket transport
//!
//! Connects to a popsub broker and speaks its JSON protocol. Responsibilities:
//! - Log in and authenticate before the connection is handed out
//! - Keep one wire subscription per exchange name, shared by every local
//!   consumer bound to that exchange
//! - Demultiplex inbound `message` frames to consumers, matching routing keys
//!   locally
//! - Acknowledge QoS=1 deliveries
//! - Report when the socket goes away
//!
//! The broker creates topics on first use, so declaring a destination is a
//! no-op on this transport.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{Sink, SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{Mutex, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, info, warn};
use tungstenite::protocol::Message as WsMessage;
use uuid::Uuid;

use super::message::{ClientMessage, ServerMessage};
use super::{ClosedSignal, Connection, Consumer, ConsumerTag, Delivery, Transport};
use crate::config::BrokerSettings;
use crate::messenger::topic::TopicDescriptor;
use crate::utils::error::TransportError;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type SharedSink = Arc<Mutex<SplitSink<WsStream, WsMessage>>>;

/// Deliveries a consumer may have queued before the reader starts dropping.
const CONSUMER_CAPACITY: usize = 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub user: String,
    pub password: String,
}

impl Credentials {
    pub fn new(user: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            password: password.into(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct WebSocketTransport {
    url: String,
    credentials: Credentials,
}

impl WebSocketTransport {
    pub fn new(host: &str, port: u16, credentials: Credentials) -> Self {
        Self {
            url: format!("ws://{host}:{port}"),
            credentials,
        }
    }

    pub fn from_settings(settings: &BrokerSettings) -> Self {
        Self::new(
            &settings.host,
            settings.port,
            Credentials::new(settings.user.clone(), settings.password.clone()),
        )
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn connect(&self) -> Result<Box<dyn Connection>, TransportError> {
        let (mut ws, _response) = connect_async(self.url.as_str())
            .await
            .map_err(|e| TransportError::Connect(format!("{}: {e}", self.url)))?;

        authenticate(&mut ws, &self.credentials).await?;
        info!(url = %self.url, user = %self.credentials.user, "Authenticated with broker");

        let (sink, stream) = ws.split();
        let sink: SharedSink = Arc::new(Mutex::new(sink));
        let routes = Arc::new(StdMutex::new(Routes::default()));
        let (closed_tx, closed) = ClosedSignal::channel();
        let reader = tokio::spawn(read_loop(stream, routes.clone(), sink.clone(), closed_tx));

        Ok(Box::new(WebSocketConnection {
            sink,
            routes,
            reader,
            closed: Some(closed),
        }))
    }
}

async fn authenticate(ws: &mut WsStream, credentials: &Credentials) -> Result<(), TransportError> {
    send_frame(
        ws,
        &ClientMessage::Login {
            username: credentials.user.clone(),
            password: credentials.password.clone(),
        },
    )
    .await?;

    let token = match next_server_message(ws).await? {
        ServerMessage::LoginResponse { token } => token,
        ServerMessage::Error { message } => return Err(TransportError::Authentication(message)),
        other => {
            return Err(TransportError::Protocol(format!(
                "expected login_response, got {other:?}"
            )));
        }
    };

    send_frame(ws, &ClientMessage::Auth { token }).await?;

    match next_server_message(ws).await? {
        ServerMessage::Authenticated {} => Ok(()),
        ServerMessage::Error { message } => Err(TransportError::Authentication(message)),
        other => Err(TransportError::Protocol(format!(
            "expected authenticated, got {other:?}"
        ))),
    }
}

async fn next_server_message(ws: &mut WsStream) -> Result<ServerMessage, TransportError> {
    loop {
        match ws.next().await {
            Some(Ok(WsMessage::Text(text))) => {
                return serde_json::from_str(text.as_str())
                    .map_err(|e| TransportError::Protocol(format!("invalid frame: {e}")));
            }
            Some(Ok(WsMessage::Close(_))) | None => {
                return Err(TransportError::Closed(
                    "broker closed the socket during login".to_string(),
                ));
            }
            Some(Ok(_)) => continue,
            Some(Err(e)) => return Err(TransportError::Connect(e.to_string())),
        }
    }
}

async fn send_frame<S>(sink: &mut S, msg: &ClientMessage) -> Result<(), TransportError>
where
    S: Sink<WsMessage, Error = tungstenite::Error> + Unpin,
{
    let text = serde_json::to_string(msg)
        .map_err(|e| TransportError::Protocol(format!("failed to encode frame: {e}")))?;
    sink.send(WsMessage::Text(text.into()))
        .await
        .map_err(|e| TransportError::Send(e.to_string()))
}

struct Route {
    topic: TopicDescriptor,
    tx: mpsc::Sender<Delivery>,
}

#[derive(Default)]
struct Routes {
    consumers: HashMap<ConsumerTag, Route>,
}

impl Routes {
    fn bound_to(&self, exchange: &str) -> usize {
        self.consumers
            .values()
            .filter(|r| r.topic.name() == exchange)
            .count()
    }

    fn dispatch(&self, delivery: &Delivery) {
        let routing_key = delivery.routing_key.as_deref().unwrap_or("");
        for (tag, route) in &self.consumers {
            if route.topic.name() != delivery.exchange || !route.topic.accepts(routing_key) {
                continue;
            }
            if let Err(e) = route.tx.try_send(delivery.clone()) {
                warn!(consumer = %tag, error = %e, "Dropping delivery for consumer");
            }
        }
    }
}

fn lock(routes: &StdMutex<Routes>) -> MutexGuard<'_, Routes> {
    routes.lock().unwrap_or_else(PoisonError::into_inner)
}

async fn read_loop(
    mut stream: SplitStream<WsStream>,
    routes: Arc<StdMutex<Routes>>,
    sink: SharedSink,
    closed: oneshot::Sender<TransportError>,
) {
    let reason = loop {
        let text = match stream.next().await {
            Some(Ok(WsMessage::Text(text))) => text,
            Some(Ok(WsMessage::Close(frame))) => {
                break TransportError::Closed(format!("broker sent close frame: {frame:?}"));
            }
            Some(Ok(_)) => continue,
            Some(Err(e)) => break TransportError::Closed(e.to_string()),
            None => break TransportError::Closed("broker closed the socket".to_string()),
        };

        match serde_json::from_str::<ServerMessage>(text.as_str()) {
            Ok(ServerMessage::Message {
                topic,
                payload,
                timestamp,
                message_id,
                qos,
                routing_key,
            }) => {
                let delivery = Delivery {
                    exchange: topic,
                    routing_key,
                    body: payload.into_bytes(),
                    message_id: message_id.clone(),
                    timestamp,
                };
                lock(&routes).dispatch(&delivery);

                if qos > 0 {
                    let mut sink = sink.lock().await;
                    if let Err(e) = send_frame(&mut *sink, &ClientMessage::Ack { message_id }).await
                    {
                        break e;
                    }
                }
            }
            Ok(ServerMessage::Error { message }) => {
                warn!(error = %message, "Broker reported an error");
            }
            Ok(other) => debug!(frame = ?other, "Ignoring unexpected frame"),
            Err(e) => {
                let preview: String = text.as_str().chars().take(100).collect();
                warn!(error = %e, frame = %preview, "Invalid frame from broker");
            }
        }
    };

    debug!(reason = %reason, "WebSocket reader stopped");
    let _ = closed.send(reason);
}

pub struct WebSocketConnection {
    sink: SharedSink,
    routes: Arc<StdMutex<Routes>>,
    reader: JoinHandle<()>,
    closed: Option<ClosedSignal>,
}

impl WebSocketConnection {
    async fn send_frame(&self, msg: &ClientMessage) -> Result<(), TransportError> {
        let mut sink = self.sink.lock().await;
        send_frame(&mut *sink, msg).await
    }
}

#[async_trait]
impl Connection for WebSocketConnection {
    async fn declare_destination(&mut self, topic: &TopicDescriptor) -> Result<(), TransportError> {
        debug!(topic = %topic, "Topics are created on first use");
        Ok(())
    }

    async fn open_consumer(&mut self, topic: &TopicDescriptor) -> Result<Consumer, TransportError> {
        let tag = ConsumerTag(format!("ws-{}", Uuid::new_v4()));
        let (tx, deliveries) = mpsc::channel(CONSUMER_CAPACITY);
        let first = {
            let mut routes = lock(&self.routes);
            let first = routes.bound_to(topic.name()) == 0;
            routes.consumers.insert(
                tag.clone(),
                Route {
                    topic: topic.clone(),
                    tx,
                },
            );
            first
        };

        if first {
            self.send_frame(&ClientMessage::Subscribe {
                topic: topic.name().to_string(),
            })
            .await?;
        }
        Ok(Consumer { tag, deliveries })
    }

    async fn cancel_consumer(&mut self, tag: &ConsumerTag) -> Result<(), TransportError> {
        let last = {
            let mut routes = lock(&self.routes);
            match routes.consumers.remove(tag) {
                Some(route) if routes.bound_to(route.topic.name()) == 0 => {
                    Some(route.topic.name().to_string())
                }
                _ => None,
            }
        };

        if let Some(topic) = last {
            self.send_frame(&ClientMessage::Unsubscribe { topic }).await?;
        }
        Ok(())
    }

    async fn send(&mut self, topic: &TopicDescriptor, body: &[u8]) -> Result<(), TransportError> {
        let payload = std::str::from_utf8(body)
            .map_err(|e| TransportError::InvalidPayload(format!("not valid UTF-8: {e}")))?;
        self.send_frame(&ClientMessage::Publish {
            topic: topic.name().to_string(),
            payload: payload.to_string(),
            message_id: Some(Uuid::new_v4().to_string()),
            qos: Some(0),
            routing_key: topic.routing_key().map(str::to_string),
        })
        .await
    }

    fn on_closed(&mut self) -> ClosedSignal {
        self.closed.take().unwrap_or_else(ClosedSignal::never)
    }
}

impl Drop for WebSocketConnection {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

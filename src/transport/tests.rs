use super::*;
use crate::codec::JsonCodec;
use crate::messenger::topic::ExchangeKind;
use std::time::Duration;
use tokio::time::timeout;

async fn connect(broker: &MemoryBroker) -> Box<dyn Connection> {
    broker.transport().connect().await.expect("memory connect")
}

#[tokio::test]
async fn test_topic_exchange_routing() {
    let broker = MemoryBroker::new();
    let mut conn = connect(&broker).await;
    let errors = TopicDescriptor::topic("logs", "*.error");
    let everything = TopicDescriptor::topic("logs", "#");

    conn.declare_destination(&errors).await.unwrap();
    let mut error_consumer = conn.open_consumer(&errors).await.unwrap();
    let mut all_consumer = conn.open_consumer(&everything).await.unwrap();
    assert_ne!(error_consumer.tag, all_consumer.tag);
    assert_eq!(broker.consumer_count_for("logs"), 2);

    conn.send(&TopicDescriptor::topic("logs", "db.error"), b"boom")
        .await
        .unwrap();
    conn.send(&TopicDescriptor::topic("logs", "db.info"), b"fine")
        .await
        .unwrap();

    let first = error_consumer.deliveries.recv().await.unwrap();
    assert_eq!(first.exchange, "logs");
    assert_eq!(first.routing_key.as_deref(), Some("db.error"));
    assert_eq!(first.body, b"boom");
    assert!(!first.message_id.is_empty());
    assert!(error_consumer.deliveries.try_recv().is_err());

    assert_eq!(all_consumer.deliveries.recv().await.unwrap().body, b"boom");
    assert_eq!(all_consumer.deliveries.recv().await.unwrap().body, b"fine");
}

#[tokio::test]
async fn test_exchange_kind_conflict() {
    let broker = MemoryBroker::new();
    let mut conn = connect(&broker).await;

    conn.declare_destination(&TopicDescriptor::fanout("events"))
        .await
        .unwrap();
    assert_eq!(broker.exchange_kind("events"), Some(ExchangeKind::Fanout));

    let err = conn
        .declare_destination(&TopicDescriptor::direct("events", "k"))
        .await
        .unwrap_err();
    assert!(matches!(err, TransportError::Declare { ref exchange, .. } if exchange == "events"));
}

#[tokio::test]
async fn test_consumer_and_send_need_an_exchange() {
    let broker = MemoryBroker::new();
    let mut conn = connect(&broker).await;
    let missing = TopicDescriptor::fanout("missing");

    assert!(matches!(
        conn.open_consumer(&missing).await,
        Err(TransportError::Consumer(_))
    ));
    assert!(matches!(
        conn.send(&missing, b"x").await,
        Err(TransportError::Send(_))
    ));
}

#[tokio::test]
async fn test_injected_failures() {
    let broker = MemoryBroker::new();
    broker.fail_next_connects(1);
    assert!(matches!(
        broker.transport().connect().await,
        Err(TransportError::Connect(_))
    ));

    let mut conn = connect(&broker).await;
    assert_eq!(broker.connect_attempts(), 2);

    let events = TopicDescriptor::fanout("events");
    conn.declare_destination(&events).await.unwrap();
    broker.fail_next_sends(1);
    assert!(conn.send(&events, b"1").await.is_err());
    assert!(conn.send(&events, b"2").await.is_ok());
    assert_eq!(broker.send_attempts(), 2);
}

#[tokio::test]
async fn test_disconnect_fires_closed_signal() {
    let broker = MemoryBroker::new();
    let mut conn = connect(&broker).await;
    let events = TopicDescriptor::fanout("events");
    conn.declare_destination(&events).await.unwrap();
    let mut consumer = conn.open_consumer(&events).await.unwrap();

    let closed = conn.on_closed();
    assert_eq!(broker.disconnect_all(), 1);

    let reason = timeout(Duration::from_secs(1), closed).await.unwrap();
    assert!(matches!(reason, TransportError::Closed(_)));
    assert!(consumer.deliveries.recv().await.is_none());
    assert!(matches!(
        conn.send(&events, b"late").await,
        Err(TransportError::Closed(_))
    ));
    assert_eq!(broker.exchange_kind("events"), Some(ExchangeKind::Fanout));
}

#[tokio::test]
async fn test_on_closed_is_armed_once() {
    let broker = MemoryBroker::new();
    let mut conn = connect(&broker).await;
    let _first = conn.on_closed();
    let second = conn.on_closed();

    broker.disconnect_all();
    assert!(
        timeout(Duration::from_millis(50), second).await.is_err(),
        "only the first signal fires"
    );
}

#[tokio::test]
async fn test_cancel_and_drop_release_consumers() {
    let broker = MemoryBroker::new();
    let mut conn = connect(&broker).await;
    let events = TopicDescriptor::fanout("events");
    conn.declare_destination(&events).await.unwrap();

    let mut cancelled = conn.open_consumer(&events).await.unwrap();
    let _kept = conn.open_consumer(&events).await.unwrap();
    conn.cancel_consumer(&cancelled.tag).await.unwrap();
    assert!(cancelled.deliveries.recv().await.is_none());
    assert_eq!(broker.consumer_count(), 1);
    assert_eq!(broker.publish(&events, b"x"), 1);

    drop(conn);
    assert_eq!(broker.connection_count(), 0);
    assert_eq!(broker.consumer_count(), 0);
}

#[tokio::test]
async fn test_closed_signal_variants() {
    let never = ClosedSignal::never();
    assert!(timeout(Duration::from_millis(20), never).await.is_err());

    let (tx, signal) = ClosedSignal::channel();
    drop(tx);
    assert!(matches!(signal.await, TransportError::Closed(_)));

    let (tx, signal) = ClosedSignal::channel();
    tx.send(TransportError::Protocol("bad frame".to_string()))
        .unwrap();
    assert!(matches!(signal.await, TransportError::Protocol(_)));
}

#[test]
fn test_delivery_decode() {
    #[derive(serde::Deserialize, Debug, PartialEq)]
    struct Ping {
        n: u8,
    }

    let delivery = Delivery {
        exchange: "e".to_string(),
        routing_key: None,
        body: br#"{"n":4}"#.to_vec(),
        message_id: "m-1".to_string(),
        timestamp: 0,
    };
    assert_eq!(delivery.decode::<Ping, _>(&JsonCodec).unwrap(), Ping { n: 4 });
    assert!(delivery.decode::<Vec<u8>, _>(&JsonCodec).is_err());
}

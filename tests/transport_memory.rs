// tests/transport_memory.rs

//! Reference-semantics tests for the in-memory transport.

use std::time::Duration;

use serde_json::{json, Map, Value};
use tokio::time::timeout;

use mom_streams::{
    //
    create_memory_factory,
    ChannelId,
    Connection,
    ConnectionFactory,
    Consumer,
    ContextConfig,
    Error,
    Payload,
    Producer,
    Session,
};

const RECV_BUDGET: Duration = Duration::from_millis(100);

#[tokio::test]
async fn consumer_receives_injected_text() {
    // ---
    // Arrange
    // ---
    let (factory, broker) = create_memory_factory();
    let config = ContextConfig::memory("mem-recv");

    let connection = factory.create_connection(&config).await.expect("connect");
    connection.start().await.expect("start");
    let session = connection.create_session().await.expect("session");

    let channel = ChannelId::from("quotes");
    let consumer = session.create_consumer(&channel).await.expect("consumer");
    let mut inbox = consumer.take_inbox().expect("inbox");

    // ---
    // Act
    // ---
    broker.inject_text("quotes", "t1:GOOG:101");

    // ---
    // Assert
    // ---
    let payload = timeout(RECV_BUDGET, inbox.recv())
        .await
        .expect("timed out waiting for payload")
        .expect("inbox closed unexpectedly");

    assert_eq!(payload, Payload::Text("t1:GOOG:101".to_string()));
}

#[tokio::test]
async fn session_before_start_is_rejected() {
    // ---
    let (factory, _broker) = create_memory_factory();
    let config = ContextConfig::memory("mem-early");

    let connection = factory.create_connection(&config).await.expect("connect");

    let err = connection.create_session().await.expect_err("must reject");
    assert!(matches!(err, Error::Connection(_)), "{err:?}");
}

#[tokio::test]
async fn connection_close_is_idempotent_and_ends_inboxes() {
    // ---
    let (factory, broker) = create_memory_factory();
    let config = ContextConfig::memory("mem-close");

    let connection = factory.create_connection(&config).await.expect("connect");
    connection.start().await.expect("start");
    let session = connection.create_session().await.expect("session");

    let channel = ChannelId::from("quotes");
    let consumer = session.create_consumer(&channel).await.expect("consumer");
    let mut inbox = consumer.take_inbox().expect("inbox");

    connection.close().await.expect("close");
    connection.close().await.expect("second close is a no-op");

    assert_eq!(broker.connection_close_count(), 1);

    // Registered inboxes end when the connection closes.
    let ended = timeout(RECV_BUDGET, inbox.recv())
        .await
        .expect("timed out waiting for inbox end");
    assert!(ended.is_none());
}

#[tokio::test]
async fn producer_records_sends_and_delivers() {
    // ---
    let (factory, broker) = create_memory_factory();
    let config = ContextConfig::memory("mem-send");

    let connection = factory.create_connection(&config).await.expect("connect");
    connection.start().await.expect("start");
    let session = connection.create_session().await.expect("session");

    let channel = ChannelId::from("quotes");
    let consumer = session.create_consumer(&channel).await.expect("consumer");
    let mut inbox = consumer.take_inbox().expect("inbox");
    let producer = session.create_producer(&channel).await.expect("producer");

    producer.send(Payload::from("a")).await.expect("send a");
    producer.send(Payload::from("b")).await.expect("send b");

    let sent: Vec<String> = broker.sent().into_iter().map(|(_, text)| text).collect();
    assert_eq!(sent, vec!["a".to_string(), "b".to_string()]);

    let first = timeout(RECV_BUDGET, inbox.recv()).await.expect("recv").expect("payload");
    assert_eq!(first, Payload::Text("a".to_string()));
}

#[tokio::test]
async fn consumer_inbox_honors_single_listener_invariant() {
    // ---
    let (factory, _broker) = create_memory_factory();
    let config = ContextConfig::memory("mem-listener");

    let connection = factory.create_connection(&config).await.expect("connect");
    connection.start().await.expect("start");
    let session = connection.create_session().await.expect("session");

    let channel = ChannelId::from("quotes");
    let consumer = session.create_consumer(&channel).await.expect("consumer");

    assert!(consumer.take_inbox().is_some());
    assert!(consumer.take_inbox().is_none(), "second take must yield None");
}

#[test]
fn map_payload_flattens_to_json_text() {
    // ---
    let mut map = Map::new();
    map.insert("symbol".to_string(), json!("GOOG"));
    map.insert("price".to_string(), json!(101));

    let text = Payload::Map(map).into_text().expect("flatten");
    let parsed: Value = serde_json::from_str(&text).expect("valid json");
    assert_eq!(parsed, json!({ "symbol": "GOOG", "price": 101 }));
}

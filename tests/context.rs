// tests/context.rs

//! Context lifecycle, error-classification, and end-to-end scenarios.

use std::time::Duration;

use futures::{future, StreamExt};
use tokio::time::{sleep, timeout};

use mom_streams::{create_memory_factory, Context, ContextConfig, Error, MemoryBroker};

const RECV_BUDGET: Duration = Duration::from_millis(200);

/// Poll `cond` until it holds or the budget elapses.
async fn wait_until(cond: impl Fn() -> bool) {
    // ---
    for _ in 0..200 {
        if cond() {
            return;
        }
        sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached within budget");
}

async fn open_context(id: &str) -> (Context, MemoryBroker) {
    // ---
    let (factory, broker) = create_memory_factory();
    let context = Context::with_factory(factory, ContextConfig::memory(id))
        .await
        .expect("context open failed");
    (context, broker)
}

#[tokio::test]
async fn dispose_closes_connection_exactly_once() {
    // ---
    let (context, broker) = open_context("ctx-dispose").await;

    let _publisher = context.new_publisher("quotes").await.expect("publisher");
    let subscriber = context.new_subscriber("quotes").await.expect("subscriber");
    let _stream = subscriber.attach().await.expect("attach");

    context.dispose().await.expect("dispose");
    context.dispose().await.expect("second dispose is a no-op");

    assert_eq!(broker.connection_close_count(), 1);
    assert_eq!(broker.consumer_close_count(), 1);
}

#[tokio::test]
async fn failed_establishment_rejects_open() {
    // ---
    let (factory, broker) = create_memory_factory();
    broker.refuse_connections();

    let err = Context::with_factory(factory, ContextConfig::memory("ctx-refused"))
        .await
        .expect_err("open must reject");
    assert!(matches!(err, Error::Connection(_)), "{err:?}");
}

#[tokio::test]
async fn failed_session_creation_closes_started_connection() {
    // ---
    // The connection is started before session creation; rejecting the
    // session must not strand it in the started state.
    // ---
    let (factory, broker) = create_memory_factory();
    broker.refuse_sessions();

    let err = Context::with_factory(factory, ContextConfig::memory("ctx-no-session"))
        .await
        .expect_err("open must reject");
    assert!(matches!(err, Error::Connection(_)), "{err:?}");
    assert_eq!(broker.connection_close_count(), 1);
}

#[tokio::test]
async fn endpoint_creation_failure_stays_local() {
    // ---
    let (context, broker) = open_context("ctx-endpoint").await;

    broker.refuse_endpoints(true);
    let err = context.new_publisher("quotes").await.expect_err("must reject");
    assert!(matches!(err, Error::Endpoint { .. }), "{err:?}");

    // The context registers no broken endpoint and keeps working.
    broker.refuse_endpoints(false);
    let publisher = context.new_publisher("quotes").await.expect("publisher");
    publisher.send("ok").expect("send");
    wait_until(|| broker.sent().len() == 1).await;

    context.dispose().await.expect("dispose");
}

#[tokio::test]
async fn transient_errors_leave_endpoints_untouched() {
    // ---
    // Arrange
    // ---
    let (context, broker) = open_context("ctx-transient").await;
    let publisher = context.new_publisher("orders").await.expect("publisher");
    let subscriber = context.new_subscriber("quotes").await.expect("subscriber");
    let mut stream = subscriber.attach().await.expect("attach");

    // ---
    // Act: every named self-healing shape, plus the ack-receipt timeout.
    // ---
    for shape in [
        "Connection dropped by peer",
        "connection interrupted",
        "broker unreachable, attempting to reconnect",
        "Connection restored",
        "message receipt was not received within 30s",
    ] {
        broker.raise_error(shape);
    }
    sleep(Duration::from_millis(50)).await;

    // ---
    // Assert: zero notifications, zero disposals.
    // ---
    assert_eq!(broker.consumer_close_count(), 0);
    publisher.send("still-alive").expect("publisher untouched");
    broker.inject_text("quotes", "still-flowing");

    let item = timeout(RECV_BUDGET, stream.next())
        .await
        .expect("timed out")
        .expect("stream ended unexpectedly")
        .expect("stream must not observe a transient error");
    assert_eq!(item, "still-flowing");

    context.dispose().await.expect("dispose");
}

#[tokio::test]
async fn fatal_error_notifies_sinks_then_tears_down() {
    // ---
    let (context, broker) = open_context("ctx-fatal").await;
    let publisher = context.new_publisher("quotes").await.expect("publisher");
    let subscriber = context.new_subscriber("quotes").await.expect("subscriber");
    let mut stream = subscriber.attach().await.expect("attach");

    broker.raise_error("authentication rejected");

    // Attached sinks observe the terminal error, then the stream ends.
    let item = timeout(RECV_BUDGET, stream.next())
        .await
        .expect("timed out")
        .expect("stream ended without the error");
    assert!(matches!(item, Err(Error::Transport(_))), "{item:?}");

    let ended = timeout(RECV_BUDGET, stream.next()).await.expect("timed out");
    assert!(ended.is_none());

    // Every endpoint is disposed; the context refuses new ones.
    wait_until(|| broker.consumer_close_count() == 1).await;
    wait_until(|| publisher.send("late").is_err()).await;

    let err = context.new_publisher("other").await.expect_err("must refuse");
    assert_eq!(err, Error::Disposed);

    // The connection itself is closed by dispose, not by the fatal path.
    assert_eq!(broker.connection_close_count(), 0);
    context.dispose().await.expect("dispose");
    assert_eq!(broker.connection_close_count(), 1);
}

#[tokio::test]
async fn fatal_path_is_idempotent() {
    // ---
    let (context, broker) = open_context("ctx-fatal-twice").await;
    let subscriber = context.new_subscriber("quotes").await.expect("subscriber");
    let _stream = subscriber.attach().await.expect("attach");

    broker.raise_error("broker exploded");
    broker.raise_error("broker exploded again");
    sleep(Duration::from_millis(50)).await;

    // No double-close of already-closed consumers.
    assert_eq!(broker.consumer_close_count(), 1);

    context.dispose().await.expect("dispose after fatal teardown");
    assert_eq!(broker.connection_close_count(), 1);
}

#[tokio::test]
async fn rising_price_stream_scenario() {
    // ---
    // End-to-end: extract the numeric third field and keep values that
    // rise over the previous one.
    // ---
    let (context, broker) = open_context("ctx-stock").await;
    let subscriber = context.new_subscriber("stock").await.expect("subscriber");
    let stream = subscriber.attach().await.expect("attach");

    let rising = stream
        .filter_map(|item| future::ready(item.ok()))
        .filter_map(|text| {
            future::ready(text.split(':').nth(2).and_then(|p| p.parse::<i64>().ok()))
        })
        .scan(None::<i64>, |prev, price| {
            let rose = prev.map_or(true, |last| price > last);
            *prev = Some(price);
            future::ready(Some((price, rose)))
        })
        .filter_map(|(price, rose)| future::ready(rose.then_some(price)))
        .take(2);

    broker.inject_text("stock", "t1:GOOG:101");
    broker.inject_text("stock", "t2:GOOG:102");
    broker.inject_text("stock", "t3:GOOG:99");

    let observed: Vec<i64> = timeout(RECV_BUDGET, rising.collect())
        .await
        .expect("timed out collecting rising prices");
    assert_eq!(observed, vec![101, 102]);

    context.dispose().await.expect("dispose");
}

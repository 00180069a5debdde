// demos/stock_ticker.rs

//! Stock ticker demo.
//!
//! Feeds price ticks through a publisher, subscribes to the same channel,
//! and composes the subscriber stream with `StreamExt` operators to keep
//! only prices that rose over the previous one.
//!
//! Run with: `cargo run --example stock_ticker`

use std::time::Duration;

use futures::{future, StreamExt};
use tokio::time::sleep;

use mom_streams::{create_memory_factory, Context, ContextConfig, Result};

const TICKS: [&str; 6] = [
    "t1:GOOG:101",
    "t2:GOOG:102",
    "t3:GOOG:99",
    "t4:GOOG:103",
    "t5:GOOG:98",
    "t6:GOOG:104",
];

#[tokio::main]
async fn main() -> Result<()> {
    // ---
    let (factory, _broker) = create_memory_factory();
    let context = Context::with_factory(factory, ContextConfig::memory("ticker-demo")).await?;

    let subscriber = context.new_subscriber("stock").await?;
    let quotes = subscriber.attach().await?;

    // Feed the ticks from a publisher on the same channel.
    let publisher = context.new_publisher("stock").await?;
    let feeder = tokio::spawn(async move {
        // ---
        for tick in TICKS {
            publisher.send(tick)?;
            sleep(Duration::from_millis(50)).await;
        }
        Ok::<(), mom_streams::Error>(())
    });

    // Third colon-separated field is the price; keep rising prices only.
    let rising = quotes
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
        .take(4);
    tokio::pin!(rising);

    while let Some(price) = rising.next().await {
        println!("price up: {price}");
    }

    feeder.await.expect("feeder task panicked")?;
    context.dispose().await
}

//! Live Reconfiguration Example
//!
//! Shows how `batch_size` and `flush_interval` can be changed while producers
//! are running, and how a parent cancellation token reaches the handler when
//! the accumulator is closed without flushing.
//!
//! Usage:
//!   cargo run --example live_reconfigure

use batch_accumulator::{handler_fn, AccumulatorBuilder, CancellationToken};
use std::time::Duration;
use tokio::time::Instant;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("batch_accumulator=debug")),
        )
        .init();

    println!("=== Live Reconfiguration Demo ===\n");

    let shutdown = CancellationToken::new();
    let started = Instant::now();
    let acc = AccumulatorBuilder::new()
        .handler(handler_fn(move |ctx, batch: &[u64]| {
            println!(
                "{:>6}ms  batch of {:>3} items{}",
                started.elapsed().as_millis(),
                batch.len(),
                if ctx.is_cancelled() { " (shutting down)" } else { "" }
            );
        }))
        .batch_size(10)
        .flush_interval(Duration::from_millis(100))
        .cancellation(shutdown.clone())
        .build_fast()?;

    let producer = {
        let acc = acc.clone();
        tokio::spawn(async move {
            for i in 0u64.. {
                if acc.is_closed() {
                    break;
                }
                acc.put(i).await;
                tokio::time::sleep(Duration::from_millis(2)).await;
            }
        })
    };

    tokio::time::sleep(Duration::from_millis(300)).await;
    println!("\n-> batch_size 10 -> 40\n");
    acc.set_batch_size(40);

    tokio::time::sleep(Duration::from_millis(300)).await;
    println!("\n-> flush_interval 100ms -> 50ms, batch_size 40 -> 1000\n");
    acc.set_flush_interval(Duration::from_millis(50));
    acc.set_batch_size(1000);

    tokio::time::sleep(Duration::from_millis(300)).await;
    println!("\n-> close without flush\n");
    acc.close(false).await?;
    producer.await?;

    println!("\nstats: {:?}", acc.stats());
    Ok(())
}

//! Batch Accumulator Example
//!
//! Demonstrates both accumulator variants feeding a simulated bulk writer:
//! - `Accumulator` with a bounded handoff queue and `try_put`
//! - `FastAccumulator` with pooled buffers and a dedicated dispatch task
//! - configuration loaded from `BATCH_ACCUMULATOR_*` environment variables
//!
//! Usage:
//!   RUST_LOG=batch_accumulator=debug cargo run --example batch_accumulator

use async_trait::async_trait;
use batch_accumulator::{
    Accumulator, AccumulatorBuilder, AccumulatorConfig, BatchHandler, CancellationToken,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// Pretends to write rows to a database, one round trip per batch.
struct BulkWriter {
    name: &'static str,
    rows: AtomicUsize,
}

impl BulkWriter {
    fn new(name: &'static str) -> Arc<Self> {
        Arc::new(Self {
            name,
            rows: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl BatchHandler<String> for BulkWriter {
    async fn handle(&self, ctx: &CancellationToken, batch: &[String]) {
        if batch.is_empty() {
            return;
        }
        tokio::select! {
            _ = tokio::time::sleep(Duration::from_millis(5)) => {
                let total = self.rows.fetch_add(batch.len(), Ordering::Relaxed) + batch.len();
                println!("[{}] wrote {:>3} rows (total {})", self.name, batch.len(), total);
            }
            _ = ctx.cancelled() => {
                println!("[{}] write of {} rows abandoned", self.name, batch.len());
            }
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("batch_accumulator=info")),
        )
        .init();

    println!("=== Batch Accumulator Demo ===\n");

    let config = AccumulatorConfig::new()
        .with_batch_size(50)
        .with_flush_interval(Duration::from_millis(200))
        .with_queue_capacity(64)
        .with_env_overrides(|key| std::env::var(key).ok())?;
    println!("Effective config: {:?}\n", config);

    demo_simple(config.clone()).await?;
    demo_fast(config).await?;

    Ok(())
}

async fn demo_simple(config: AccumulatorConfig) -> anyhow::Result<()> {
    println!("--- Accumulator: four producers, 500 events ---\n");

    let writer = BulkWriter::new("simple");
    let acc: Accumulator<String> = AccumulatorBuilder::<String>::new()
        .shared_handler(writer.clone())
        .config(config)
        .build()?;

    let mut producers = Vec::new();
    for p in 0..4 {
        let acc = acc.clone();
        producers.push(tokio::spawn(async move {
            for i in 0..125 {
                acc.put(format!("producer-{}/event-{}", p, i)).await;
            }
        }));
    }
    for producer in producers {
        producer.await?;
    }

    // best effort: dropped when the queue is full
    acc.try_put("late event".to_string());

    acc.close(true).await?;
    println!("\nstats: {:?}\n", acc.stats());
    Ok(())
}

async fn demo_fast(config: AccumulatorConfig) -> anyhow::Result<()> {
    println!("--- FastAccumulator: four producers, 500 events ---\n");

    let writer = BulkWriter::new("fast");
    let acc = AccumulatorBuilder::<String>::new()
        .shared_handler(writer.clone())
        .config(config)
        .pool_retention(4)
        .build_fast()?;

    let mut producers = Vec::new();
    for p in 0..4 {
        let acc = acc.clone();
        producers.push(tokio::spawn(async move {
            for i in 0..125 {
                acc.put(format!("producer-{}/event-{}", p, i)).await;
            }
        }));
    }
    for producer in producers {
        producer.await?;
    }

    acc.close(true).await?;
    let stats = acc.stats();
    println!("\nstats: {:?}", stats);
    println!(
        "average batch: {:.1} items, rows written: {}",
        stats.average_batch_len(),
        writer.rows.load(Ordering::Relaxed)
    );
    Ok(())
}

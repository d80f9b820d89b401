//! # batch-accumulator
//!
//! 并发批处理累加器：按数量阈值或时间间隔（先到者为准）将条目分组交给处理器。
//!
//! Concurrent batching accumulators for tokio applications: items submitted by
//! any number of producers are grouped and handed to a user-supplied handler
//! when either `batch_size` items are pending or `flush_interval` elapsed,
//! whichever comes first.
//!
//! ## Variants
//!
//! | Type | Producer path | Handler runs on | Extras |
//! |------|---------------|-----------------|--------|
//! | [`Accumulator`] | per-item handoff through a bounded queue | the coordinator task | [`Accumulator::try_put`] |
//! | [`FastAccumulator`] | append under a lock, swap when full | a dedicated dispatch task | pooled buffers ([`BufferPool`]) |
//!
//! Both variants share the same contract:
//!
//! - every accepted item is delivered exactly once, in per-producer order
//! - batches are dispatched in completion order
//! - `batch_size` and `flush_interval` can be changed while running
//! - [`close`](Accumulator::close) with `flush = true` delivers everything
//!   already accepted (plus a final, possibly empty, call); with
//!   `flush = false` pending items are discarded
//! - items submitted after `close` are silently dropped
//!
//! ## Quick Start
//!
//! ```rust
//! use batch_accumulator::{handler_fn, AccumulatorBuilder};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> batch_accumulator::Result<()> {
//!     let acc = AccumulatorBuilder::new()
//!         .handler(handler_fn(|_ctx, batch: &[u64]| {
//!             println!("writing {} rows", batch.len());
//!         }))
//!         .batch_size(100)
//!         .flush_interval(Duration::from_millis(250))
//!         .build()?;
//!
//!     for i in 0..1_000 {
//!         acc.put(i).await;
//!     }
//!     acc.close(true).await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Handler panics
//!
//! A panicking handler does not take the accumulator down: the panic is
//! logged, counted in [`AccumulatorStats::handler_panics`], the batch is
//! treated as consumed and dispatch continues.
//!
//! ## Module Organization
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`config`] | Options, defaults and environment overrides |
//! | [`handler`] | The [`BatchHandler`] trait and closure adapter |
//! | [`pool`] | Reusable buffer pool |
//! | [`stats`] | Diagnostic counters |

mod accumulator;
mod builder;
pub mod config;
pub mod error;
mod fast;
mod handoff;
pub mod handler;
pub mod pool;
mod runtime;
pub mod stats;

pub use accumulator::Accumulator;
pub use builder::AccumulatorBuilder;
pub use config::{
    AccumulatorConfig, DEFAULT_BATCH_SIZE, DEFAULT_FLUSH_INTERVAL, DEFAULT_QUEUE_CAPACITY,
};
pub use error::{Error, ErrorContext};
pub use fast::FastAccumulator;
pub use handler::{handler_fn, BatchHandler, HandlerFn};
pub use pool::{BufferPool, PoolStats};
pub use stats::AccumulatorStats;

/// Handlers receive a cancellation token alongside each batch.
pub use tokio_util::sync::CancellationToken;

/// Result type alias for the library
pub type Result<T> = std::result::Result<T, Error>;

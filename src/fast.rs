//! Lock-and-swap accumulator with pooled buffers.
//!
//! Producers append straight into a shared buffer. When it is full, or when
//! the ticker fires, the buffer is swapped for an empty one from the
//! [`BufferPool`] and pushed onto a bounded queue. A dispatch task drains the
//! queue, runs the handler and returns the buffer to the pool.
//!
//! The buffer lock stays held while a full buffer is enqueued, which keeps
//! batches in completion order and makes `put` wait when the queue is full.
//! With a queue capacity of `0` a full buffer is only handed over while the
//! dispatcher is idle, so at most one batch is in flight.

use crate::config::{AccumulatorConfig, SharedSettings};
use crate::handler::{invoke, BatchHandler};
use crate::handoff;
use crate::pool::BufferPool;
use crate::runtime::{current_runtime, join, FlushReason};
use crate::stats::{AccumulatorStats, AtomicStats};
use crate::Result;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

const SOURCE: &str = "fast_accumulator";

/// High-throughput accumulator: no per-item channel handoff, handler runs on
/// its own task. There is no `try_put`; every accepted item lands in a batch.
///
/// ```rust
/// use batch_accumulator::{handler_fn, AccumulatorConfig, FastAccumulator};
///
/// # #[tokio::main]
/// # async fn main() -> batch_accumulator::Result<()> {
/// let acc = FastAccumulator::new(
///     handler_fn(|_ctx, batch: &[String]| println!("{:?}", batch)),
///     AccumulatorConfig::new().with_batch_size(2),
/// )?;
/// acc.put("a".to_string()).await;
/// acc.put("b".to_string()).await;
/// acc.close(true).await?;
/// # Ok(())
/// # }
/// ```
pub struct FastAccumulator<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for FastAccumulator<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

/// The buffer currently being filled, and the way out of it.
struct OpenBuffer<T> {
    batch: Vec<T>,
    /// `None` once the accumulator is closed.
    tx: Option<handoff::Sender<Vec<T>>>,
}

struct Shared<T> {
    open: Mutex<OpenBuffer<T>>,
    pool: BufferPool<T>,
    settings: SharedSettings,
    stats: AtomicStats,
}

impl<T> Shared<T> {
    /// Replace the open buffer with a pooled one and enqueue the full one.
    async fn swap(&self, open: &mut OpenBuffer<T>, reason: FlushReason) {
        let Some(tx) = open.tx.as_ref() else {
            return;
        };
        let fresh = self.pool.get(self.settings.batch_size());
        let full = std::mem::replace(&mut open.batch, fresh);
        tracing::trace!(reason = reason.as_str(), len = full.len(), "swapping batch");
        if let Err(lost) = tx.send(full).await {
            tracing::warn!(len = lost.len(), "dispatcher stopped, batch dropped");
            self.stats.dropped_many(lost.len());
        }
    }

    fn swap_blocking(&self, open: &mut OpenBuffer<T>) {
        let Some(tx) = open.tx.as_ref() else {
            return;
        };
        let fresh = self.pool.get(self.settings.batch_size());
        let full = std::mem::replace(&mut open.batch, fresh);
        tracing::trace!(reason = FlushReason::Size.as_str(), len = full.len(), "swapping batch");
        if let Err(lost) = tx.blocking_send(full) {
            tracing::warn!(len = lost.len(), "dispatcher stopped, batch dropped");
            self.stats.dropped_many(lost.len());
        }
    }
}

struct Tasks {
    ticker: JoinHandle<()>,
    dispatcher: JoinHandle<()>,
}

struct Inner<T> {
    shared: Arc<Shared<T>>,
    closed: AtomicBool,
    config: AccumulatorConfig,
    handler_ctx: CancellationToken,
    ticker_stop: CancellationToken,
    dispatcher_stop: CancellationToken,
    /// Cancelled when the last handle is dropped without `close`.
    detach: CancellationToken,
    tasks: Mutex<Option<Tasks>>,
}

impl<T> FastAccumulator<T>
where
    T: Send + Sync + 'static,
{
    /// Start the accumulator and its ticker and dispatch tasks on the current
    /// tokio runtime.
    pub fn new<H>(handler: H, config: AccumulatorConfig) -> Result<Self>
    where
        H: BatchHandler<T> + 'static,
    {
        Self::spawn(Arc::new(handler), config, None)
    }

    pub(crate) fn spawn(
        handler: Arc<dyn BatchHandler<T>>,
        config: AccumulatorConfig,
        parent: Option<CancellationToken>,
    ) -> Result<Self> {
        config.validate()?;
        let runtime = current_runtime(SOURCE)?;

        let (tx, rx) = handoff::channel(config.queue_capacity);
        let pool = BufferPool::new(config.pool_retention);
        let batch = pool.get(config.batch_size);
        let shared = Arc::new(Shared {
            open: Mutex::new(OpenBuffer { batch, tx: Some(tx) }),
            pool,
            settings: SharedSettings::from_config(&config),
            stats: AtomicStats::new(),
        });

        let handler_ctx = parent.map(|p| p.child_token()).unwrap_or_default();
        let ticker_stop = CancellationToken::new();
        let dispatcher_stop = CancellationToken::new();
        let detach = CancellationToken::new();

        let ticker = runtime.spawn(run_ticker(Arc::clone(&shared), ticker_stop.clone()));
        let dispatcher = Dispatcher {
            shared: Arc::clone(&shared),
            rx,
            handler,
            ctx: handler_ctx.clone(),
            reuse_buffers: config.reuse_buffers,
        };
        let dispatcher = runtime.spawn(dispatcher.run(dispatcher_stop.clone(), detach.clone()));

        tracing::debug!(
            batch_size = config.batch_size,
            flush_interval_ms = config.flush_interval.as_millis() as u64,
            queue_capacity = config.queue_capacity,
            reuse_buffers = config.reuse_buffers,
            "fast accumulator started"
        );

        Ok(Self {
            inner: Arc::new(Inner {
                shared,
                closed: AtomicBool::new(false),
                config,
                handler_ctx,
                ticker_stop,
                dispatcher_stop,
                detach,
                tasks: Mutex::new(Some(Tasks { ticker, dispatcher })),
            }),
        })
    }

    /// Append an item. When this fills the batch, the batch is enqueued for
    /// dispatch, waiting while the completed-batch queue is full (or, with a
    /// queue capacity of `0`, until the dispatcher is idle).
    ///
    /// Items submitted after [`close`](Self::close) are discarded.
    pub async fn put(&self, item: T) {
        let shared = &self.inner.shared;
        if self.is_closed() {
            shared.stats.dropped();
            return;
        }

        let mut open = shared.open.lock().await;
        if open.tx.is_none() {
            shared.stats.dropped();
            return;
        }
        open.batch.push(item);
        shared.stats.accepted();
        if open.batch.len() >= shared.settings.batch_size() {
            shared.swap(&mut open, FlushReason::Size).await;
        }
    }

    /// [`put`](Self::put) for producers running on plain threads.
    ///
    /// # Panics
    ///
    /// Panics when called from within an asynchronous execution context.
    pub fn blocking_put(&self, item: T) {
        let shared = &self.inner.shared;
        if self.is_closed() {
            shared.stats.dropped();
            return;
        }

        let mut open = shared.open.blocking_lock();
        if open.tx.is_none() {
            shared.stats.dropped();
            return;
        }
        open.batch.push(item);
        shared.stats.accepted();
        if open.batch.len() >= shared.settings.batch_size() {
            shared.swap_blocking(&mut open);
        }
    }

    /// Stop the accumulator and wait for both background tasks.
    ///
    /// With `flush`, the ticker is stopped, the open buffer is enqueued one
    /// last time and every queued batch is dispatched. Without it, ticker and
    /// dispatcher stop right away: the open buffer and queued batches are
    /// discarded and the handler's cancellation token is cancelled. Only the
    /// first call has an effect.
    pub async fn close(&self, flush: bool) -> Result<()> {
        let mut tasks = self.inner.tasks.lock().await;
        self.inner.closed.store(true, Ordering::SeqCst);
        let Some(Tasks { ticker, dispatcher }) = tasks.take() else {
            return Ok(());
        };
        tracing::info!(flush, "closing fast accumulator");

        self.inner.ticker_stop.cancel();
        if !flush {
            // A ticker blocked on a full queue is released once the
            // dispatcher closes it, so stop both before joining either.
            self.inner.handler_ctx.cancel();
            self.inner.dispatcher_stop.cancel();
        }
        join(ticker, "ticker", SOURCE).await?;

        let shared = &self.inner.shared;
        if flush {
            let mut open = shared.open.lock().await;
            let remaining = std::mem::take(&mut open.batch);
            if let Some(tx) = open.tx.take() {
                if let Err(lost) = tx.send(remaining).await {
                    shared.stats.dropped_many(lost.len());
                }
            }
        }

        join(dispatcher, "dispatcher", SOURCE).await?;

        if !flush {
            let mut open = shared.open.lock().await;
            open.tx = None;
            let discarded = open.batch.len();
            open.batch.clear();
            shared.stats.dropped_many(discarded);
            tracing::debug!(discarded, "fast accumulator stopped without flush");
        }
        Ok(())
    }
}

impl<T> FastAccumulator<T> {
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Change the flush threshold. `0` is treated as `1`.
    pub fn set_batch_size(&self, size: usize) {
        self.inner.shared.settings.set_batch_size(size);
    }

    /// Change the tick period; applies from the next tick on.
    pub fn set_flush_interval(&self, interval: Duration) {
        self.inner.shared.settings.set_flush_interval(interval);
    }

    pub fn batch_size(&self) -> usize {
        self.inner.shared.settings.batch_size()
    }

    pub fn flush_interval(&self) -> Duration {
        self.inner.shared.settings.flush_interval()
    }

    pub fn config(&self) -> &AccumulatorConfig {
        &self.inner.config
    }

    /// Counters, including buffer pool accounting.
    pub fn stats(&self) -> AccumulatorStats {
        let mut stats = self.inner.shared.stats.to_stats();
        stats.pool = Some(self.inner.shared.pool.stats());
        stats
    }
}

impl<T> std::fmt::Debug for FastAccumulator<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FastAccumulator")
            .field("batch_size", &self.batch_size())
            .field("flush_interval", &self.flush_interval())
            .field("closed", &self.is_closed())
            .field("pool", &self.inner.shared.pool)
            .finish()
    }
}

impl<T> Drop for Inner<T> {
    fn drop(&mut self) {
        if self.closed.load(Ordering::Acquire) {
            return;
        }
        tracing::warn!("fast accumulator dropped without close, flushing in background");
        self.ticker_stop.cancel();
        self.detach.cancel();
    }
}

async fn run_ticker<T>(shared: Arc<Shared<T>>, stop: CancellationToken) {
    loop {
        let interval = shared.settings.flush_interval();
        tokio::select! {
            biased;
            _ = stop.cancelled() => return,
            _ = tokio::time::sleep(interval) => {
                let mut open = shared.open.lock().await;
                shared.swap(&mut open, FlushReason::Interval).await;
            }
        }
    }
}

struct Dispatcher<T> {
    shared: Arc<Shared<T>>,
    rx: handoff::Receiver<Vec<T>>,
    handler: Arc<dyn BatchHandler<T>>,
    ctx: CancellationToken,
    reuse_buffers: bool,
}

impl<T> Dispatcher<T>
where
    T: Send + Sync + 'static,
{
    async fn run(mut self, stop: CancellationToken, detach: CancellationToken) {
        loop {
            tokio::select! {
                biased;
                _ = stop.cancelled() => {
                    self.rx.close();
                    let mut discarded = 0;
                    while let Some(batch) = self.rx.try_recv() {
                        discarded += batch.len();
                    }
                    self.shared.stats.dropped_many(discarded);
                    return;
                }
                _ = detach.cancelled() => {
                    self.finish_detached().await;
                    return;
                }
                batch = self.rx.recv() => match batch {
                    Some(batch) => self.dispatch(batch).await,
                    None => return,
                },
            }
        }
    }

    /// Every handle is gone: take the open buffer and deliver what is still
    /// queued, then the remainder as the final (possibly empty) batch.
    async fn finish_detached(&mut self) {
        // Keep receiving while waiting for the lock; the ticker may hold it
        // while blocked on a full queue.
        let remainder = loop {
            tokio::select! {
                biased;
                batch = self.rx.recv() => match batch {
                    Some(batch) => self.dispatch(batch).await,
                    None => break Vec::new(),
                },
                mut open = self.shared.open.lock() => {
                    open.tx = None;
                    break std::mem::take(&mut open.batch);
                }
            }
        };

        self.rx.close();
        while let Some(batch) = self.rx.recv().await {
            self.dispatch(batch).await;
        }
        self.dispatch(remainder).await;
        tracing::debug!("fast accumulator drained after drop");
    }

    async fn dispatch(&self, batch: Vec<T>) {
        let len = batch.len();
        tracing::trace!(len, "dispatching batch");
        let completed = invoke(self.handler.as_ref(), &self.ctx, &batch).await;
        self.shared.stats.flushed(len);
        if !completed {
            self.shared.stats.panicked();
            return;
        }
        if self.reuse_buffers {
            self.shared.pool.put(batch);
        }
    }
}

//! Single-coordinator accumulator.
//!
//! Producers hand items one at a time to a coordinator task through a
//! bounded queue. The coordinator owns the open batch, so the batch itself
//! needs no lock, and it runs the handler inline: a slow handler throttles
//! ingestion through the queue. Use [`FastAccumulator`](crate::FastAccumulator)
//! when dispatch must not hold up batch building.

use crate::config::{AccumulatorConfig, SharedSettings};
use crate::handler::{invoke, BatchHandler};
use crate::handoff;
use crate::runtime::{current_runtime, join, FlushReason};
use crate::stats::{AccumulatorStats, AtomicStats};
use crate::Result;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

const SOURCE: &str = "accumulator";

/// Collects items and delivers them to a [`BatchHandler`] when `batch_size`
/// items are pending or `flush_interval` elapsed since the previous flush.
///
/// Cloning is cheap; all clones feed the same batch.
///
/// ```rust
/// use batch_accumulator::{handler_fn, Accumulator, AccumulatorConfig};
/// use std::time::Duration;
///
/// # #[tokio::main]
/// # async fn main() -> batch_accumulator::Result<()> {
/// let acc = Accumulator::new(
///     handler_fn(|_ctx, batch: &[u32]| println!("got {} items", batch.len())),
///     AccumulatorConfig::new()
///         .with_batch_size(10)
///         .with_flush_interval(Duration::from_millis(100)),
/// )?;
///
/// for i in 0..25 {
///     acc.put(i).await;
/// }
/// acc.close(true).await?;
/// # Ok(())
/// # }
/// ```
pub struct Accumulator<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for Accumulator<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct Inner<T> {
    tx: handoff::Sender<T>,
    closed: AtomicBool,
    settings: Arc<SharedSettings>,
    stats: Arc<AtomicStats>,
    config: AccumulatorConfig,
    /// Handed to the handler; cancelled by `close(false)`.
    handler_ctx: CancellationToken,
    drain: CancellationToken,
    stop: CancellationToken,
    coordinator: Mutex<Option<JoinHandle<()>>>,
}

impl<T> Accumulator<T>
where
    T: Send + Sync + 'static,
{
    /// Start an accumulator on the current tokio runtime.
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
        let settings = Arc::new(SharedSettings::from_config(&config));
        let stats = Arc::new(AtomicStats::new());
        let handler_ctx = parent.map(|p| p.child_token()).unwrap_or_default();
        let drain = CancellationToken::new();
        let stop = CancellationToken::new();

        let batch = if config.reuse_buffers {
            Vec::with_capacity(config.batch_size)
        } else {
            Vec::new()
        };
        let coordinator = Coordinator {
            rx,
            batch,
            handler,
            ctx: handler_ctx.clone(),
            settings: Arc::clone(&settings),
            stats: Arc::clone(&stats),
            reuse_buffers: config.reuse_buffers,
        };
        let task = runtime.spawn(coordinator.run(drain.clone(), stop.clone()));

        tracing::debug!(
            batch_size = config.batch_size,
            flush_interval_ms = config.flush_interval.as_millis() as u64,
            queue_capacity = config.queue_capacity,
            reuse_buffers = config.reuse_buffers,
            "accumulator started"
        );

        Ok(Self {
            inner: Arc::new(Inner {
                tx,
                closed: AtomicBool::new(false),
                settings,
                stats,
                config,
                handler_ctx,
                drain,
                stop,
                coordinator: Mutex::new(Some(task)),
            }),
        })
    }

    /// Submit an item, waiting while the handoff queue is full (or, with a
    /// queue capacity of `0`, until the coordinator takes it).
    ///
    /// Items submitted after [`close`](Self::close) are discarded.
    pub async fn put(&self, item: T) {
        if self.is_closed() {
            self.inner.stats.dropped();
            return;
        }
        match self.inner.tx.send(item).await {
            Ok(()) => self.inner.stats.accepted(),
            Err(_) => self.inner.stats.dropped(),
        }
    }

    /// [`put`](Self::put) for producers running on plain threads.
    ///
    /// # Panics
    ///
    /// Panics when called from within an asynchronous execution context.
    pub fn blocking_put(&self, item: T) {
        if self.is_closed() {
            self.inner.stats.dropped();
            return;
        }
        match self.inner.tx.blocking_send(item) {
            Ok(()) => self.inner.stats.accepted(),
            Err(_) => self.inner.stats.dropped(),
        }
    }

    /// Submit an item without waiting. The item is dropped when the handoff
    /// queue is full, when the queue capacity is `0` and the coordinator is
    /// busy, or when the accumulator is closed.
    pub fn try_put(&self, item: T) {
        if self.is_closed() {
            self.inner.stats.dropped();
            return;
        }
        match self.inner.tx.try_send(item) {
            Ok(()) => self.inner.stats.accepted(),
            Err(_) => self.inner.stats.dropped(),
        }
    }

    /// Stop the accumulator and wait for the coordinator to finish.
    ///
    /// With `flush`, every item already queued is still batched and the
    /// handler receives a final call with the remainder (possibly empty).
    /// Without it, pending items are discarded and the handler's
    /// cancellation token is cancelled. Only the first call has an effect.
    pub async fn close(&self, flush: bool) -> Result<()> {
        if !self.inner.closed.swap(true, Ordering::SeqCst) {
            tracing::info!(flush, "closing accumulator");
            if flush {
                self.inner.drain.cancel();
            } else {
                self.inner.handler_ctx.cancel();
                self.inner.stop.cancel();
            }
        }

        let mut coordinator = self.inner.coordinator.lock().await;
        if let Some(task) = coordinator.take() {
            join(task, "coordinator", SOURCE).await?;
        }
        Ok(())
    }
}

impl<T> Accumulator<T> {
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Change the flush threshold. `0` is treated as `1`.
    pub fn set_batch_size(&self, size: usize) {
        self.inner.settings.set_batch_size(size);
    }

    /// Change the flush interval; applies once the current timer is re-armed.
    pub fn set_flush_interval(&self, interval: Duration) {
        self.inner.settings.set_flush_interval(interval);
    }

    pub fn batch_size(&self) -> usize {
        self.inner.settings.batch_size()
    }

    pub fn flush_interval(&self) -> Duration {
        self.inner.settings.flush_interval()
    }

    /// Configuration the accumulator was started with.
    pub fn config(&self) -> &AccumulatorConfig {
        &self.inner.config
    }

    pub fn stats(&self) -> AccumulatorStats {
        self.inner.stats.to_stats()
    }
}

impl<T> std::fmt::Debug for Accumulator<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Accumulator")
            .field("batch_size", &self.batch_size())
            .field("flush_interval", &self.flush_interval())
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl<T> Drop for Inner<T> {
    fn drop(&mut self) {
        if !self.closed.load(Ordering::Acquire) {
            tracing::warn!("accumulator dropped without close, flushing in background");
            self.drain.cancel();
        }
    }
}

struct Coordinator<T> {
    rx: handoff::Receiver<T>,
    batch: Vec<T>,
    handler: Arc<dyn BatchHandler<T>>,
    ctx: CancellationToken,
    settings: Arc<SharedSettings>,
    stats: Arc<AtomicStats>,
    reuse_buffers: bool,
}

impl<T> Coordinator<T>
where
    T: Send + Sync + 'static,
{
    async fn run(mut self, drain: CancellationToken, stop: CancellationToken) {
        let timer = tokio::time::sleep(self.settings.flush_interval());
        tokio::pin!(timer);

        loop {
            tokio::select! {
                biased;
                _ = stop.cancelled() => {
                    self.rx.close();
                    let mut discarded = self.batch.len();
                    while self.rx.try_recv().is_some() {
                        discarded += 1;
                    }
                    tracing::debug!(discarded, "accumulator stopped without flush");
                    self.stats.dropped_many(discarded);
                    return;
                }
                _ = drain.cancelled() => {
                    self.drain().await;
                    return;
                }
                _ = &mut timer => {
                    self.rx.withdraw();
                    self.flush(FlushReason::Interval).await;
                    timer.as_mut().reset(Instant::now() + self.settings.flush_interval());
                }
                item = self.rx.recv() => match item {
                    Some(item) => {
                        if self.append(item).await {
                            timer.as_mut().reset(Instant::now() + self.settings.flush_interval());
                        }
                    }
                    None => {
                        self.drain().await;
                        return;
                    }
                },
            }
        }
    }

    /// Append and apply the size trigger. Returns whether a flush happened.
    async fn append(&mut self, item: T) -> bool {
        self.batch.push(item);
        if self.batch.len() >= self.settings.batch_size() {
            self.flush(FlushReason::Size).await;
            true
        } else {
            false
        }
    }

    async fn drain(&mut self) {
        self.rx.close();
        while let Some(item) = self.rx.recv().await {
            self.append(item).await;
        }
        self.flush(FlushReason::Close).await;
        tracing::debug!("accumulator drained");
    }

    async fn flush(&mut self, reason: FlushReason) {
        let len = self.batch.len();
        tracing::trace!(reason = reason.as_str(), len, "flushing batch");

        if !invoke(self.handler.as_ref(), &self.ctx, &self.batch).await {
            self.stats.panicked();
        }
        self.stats.flushed(len);

        if self.reuse_buffers {
            self.batch.clear();
        } else {
            self.batch = Vec::new();
        }
    }
}

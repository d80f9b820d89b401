//! Diagnostic counters.

use std::sync::atomic::{AtomicU64, Ordering};

/// Point-in-time copy of an accumulator's counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AccumulatorStats {
    /// Items accepted by `put` / `try_put`.
    pub items_accepted: u64,
    /// Items dropped because the queue was full (`try_put`) or the accumulator was closed.
    pub items_dropped: u64,
    /// Handler invocations, including empty interval and final flushes.
    pub batches_flushed: u64,
    /// Items handed to the handler.
    pub items_flushed: u64,
    /// Handler invocations that panicked.
    pub handler_panics: u64,
    /// Buffer pool counters (fast variant only).
    pub pool: Option<crate::pool::PoolStats>,
}

impl AccumulatorStats {
    /// Average number of items per handler invocation.
    pub fn average_batch_len(&self) -> f64 {
        if self.batches_flushed == 0 {
            0.0
        } else {
            self.items_flushed as f64 / self.batches_flushed as f64
        }
    }
}

#[derive(Debug, Default)]
pub(crate) struct AtomicStats {
    items_accepted: AtomicU64,
    items_dropped: AtomicU64,
    batches_flushed: AtomicU64,
    items_flushed: AtomicU64,
    handler_panics: AtomicU64,
}

impl AtomicStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn accepted(&self) {
        self.items_accepted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn dropped(&self) {
        self.items_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn dropped_many(&self, n: usize) {
        self.items_dropped.fetch_add(n as u64, Ordering::Relaxed);
    }

    pub fn flushed(&self, len: usize) {
        self.batches_flushed.fetch_add(1, Ordering::Relaxed);
        self.items_flushed.fetch_add(len as u64, Ordering::Relaxed);
    }

    pub fn panicked(&self) {
        self.handler_panics.fetch_add(1, Ordering::Relaxed);
    }

    pub fn to_stats(&self) -> AccumulatorStats {
        AccumulatorStats {
            items_accepted: self.items_accepted.load(Ordering::Relaxed),
            items_dropped: self.items_dropped.load(Ordering::Relaxed),
            batches_flushed: self.batches_flushed.load(Ordering::Relaxed),
            items_flushed: self.items_flushed.load(Ordering::Relaxed),
            handler_panics: self.handler_panics.load(Ordering::Relaxed),
            pool: None,
        }
    }
}

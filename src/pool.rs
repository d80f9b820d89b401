//! Free list of emptied batch buffers.
//!
//! A buffer is always owned by exactly one party: the producer-side open
//! batch, the completed-batch queue, the dispatcher, or this pool. Buffers
//! move by value, so two owners can never touch the same storage.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

/// Pool accounting snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Buffers created because the pool was empty.
    pub allocated: u64,
    /// Buffers handed out again after being returned.
    pub recycled: u64,
    /// Returned buffers dropped because the pool was full.
    pub discarded: u64,
    /// Buffers currently idle in the pool.
    pub idle: usize,
}

/// Thread-safe pool of reusable `Vec<T>` buffers.
///
/// Only empty buffers are ever stored; `put` clears before retaining and the
/// backing allocation is kept.
pub struct BufferPool<T> {
    free: Mutex<Vec<Vec<T>>>,
    max_retained: usize,
    allocated: AtomicU64,
    recycled: AtomicU64,
    discarded: AtomicU64,
}

impl<T> BufferPool<T> {
    pub fn new(max_retained: usize) -> Self {
        Self {
            free: Mutex::new(Vec::with_capacity(max_retained)),
            max_retained,
            allocated: AtomicU64::new(0),
            recycled: AtomicU64::new(0),
            discarded: AtomicU64::new(0),
        }
    }

    /// Take an idle buffer, or allocate one with room for `capacity` items.
    pub fn get(&self, capacity: usize) -> Vec<T> {
        let reused = self.free.lock().ok().and_then(|mut free| free.pop());
        match reused {
            Some(mut buf) => {
                self.recycled.fetch_add(1, Ordering::Relaxed);
                if buf.capacity() < capacity {
                    buf.reserve(capacity);
                }
                buf
            }
            None => {
                self.allocated.fetch_add(1, Ordering::Relaxed);
                Vec::with_capacity(capacity)
            }
        }
    }

    /// Return a consumed buffer. Its contents are dropped, its capacity kept.
    pub fn put(&self, mut buf: Vec<T>) {
        buf.clear();
        if let Ok(mut free) = self.free.lock() {
            if free.len() < self.max_retained {
                free.push(buf);
                return;
            }
        }
        self.discarded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn idle(&self) -> usize {
        self.free.lock().map(|free| free.len()).unwrap_or(0)
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            allocated: self.allocated.load(Ordering::Relaxed),
            recycled: self.recycled.load(Ordering::Relaxed),
            discarded: self.discarded.load(Ordering::Relaxed),
            idle: self.idle(),
        }
    }
}

impl<T> std::fmt::Debug for BufferPool<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufferPool")
            .field("max_retained", &self.max_retained)
            .field("stats", &self.stats())
            .finish()
    }
}

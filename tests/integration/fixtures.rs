//! Shared handlers for integration tests

use async_trait::async_trait;
use batch_accumulator::{BatchHandler, CancellationToken};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Semaphore;

/// Records every batch in delivery order.
#[derive(Clone)]
pub struct Collector<T> {
    batches: Arc<Mutex<Vec<Vec<T>>>>,
}

impl<T: Clone> Collector<T> {
    pub fn new() -> Self {
        Self {
            batches: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn batches(&self) -> Vec<Vec<T>> {
        self.batches.lock().unwrap().clone()
    }

    pub fn non_empty_batches(&self) -> Vec<Vec<T>> {
        self.batches()
            .into_iter()
            .filter(|b| !b.is_empty())
            .collect()
    }

    /// All delivered items, in delivery order.
    pub fn items(&self) -> Vec<T> {
        self.batches().into_iter().flatten().collect()
    }

    /// Poll until `n` items were delivered; panics after five seconds.
    pub async fn wait_for_items(&self, n: usize) {
        let delivered = async {
            while self.items().len() < n {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        };
        if tokio::time::timeout(Duration::from_secs(5), delivered).await.is_err() {
            panic!("only {} of {} items delivered", self.items().len(), n);
        }
    }
}

#[async_trait]
impl<T> BatchHandler<T> for Collector<T>
where
    T: Clone + Send + Sync + 'static,
{
    async fn handle(&self, _ctx: &CancellationToken, batch: &[T]) {
        self.batches.lock().unwrap().push(batch.to_vec());
    }
}

/// Blocks inside the handler until the gate is opened or the handler's
/// token is cancelled. Records what it was given before blocking.
#[derive(Clone)]
pub struct GatedCollector {
    pub gate: Arc<Semaphore>,
    pub inner: Collector<u32>,
    pub entered: Arc<Semaphore>,
}

impl GatedCollector {
    pub fn new() -> Self {
        Self {
            gate: Arc::new(Semaphore::new(0)),
            inner: Collector::new(),
            entered: Arc::new(Semaphore::new(0)),
        }
    }

    pub fn open(&self) {
        self.gate.add_permits(1 << 20);
    }

    /// Wait until the handler has been entered `n` more times.
    pub async fn wait_entered(&self, n: u32) {
        self.entered
            .acquire_many(n)
            .await
            .expect("semaphore closed")
            .forget();
    }
}

#[async_trait]
impl BatchHandler<u32> for GatedCollector {
    async fn handle(&self, ctx: &CancellationToken, batch: &[u32]) {
        self.inner.batches.lock().unwrap().push(batch.to_vec());
        self.entered.add_permits(1);
        tokio::select! {
            _ = self.gate.acquire() => {}
            _ = ctx.cancelled() => {}
        }
    }
}

/// Records each batch, then keeps the dispatcher busy for `delay`
/// regardless of cancellation.
#[derive(Clone)]
pub struct SlowCollector {
    pub delay: Duration,
    pub inner: Collector<u32>,
}

impl SlowCollector {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            inner: Collector::new(),
        }
    }
}

#[async_trait]
impl BatchHandler<u32> for SlowCollector {
    async fn handle(&self, _ctx: &CancellationToken, batch: &[u32]) {
        self.inner.batches.lock().unwrap().push(batch.to_vec());
        tokio::time::sleep(self.delay).await;
    }
}

/// Items tagged with their producer, to check per-producer ordering.
pub type Tagged = (usize, usize);

/// Assert every producer's items arrived exactly once and in submission order.
pub fn assert_per_producer_order(delivered: &[Tagged], producers: usize, per_producer: usize) {
    let mut next: HashMap<usize, usize> = HashMap::new();
    for &(producer, seq) in delivered {
        let expected = next.entry(producer).or_insert(0);
        assert_eq!(
            seq, *expected,
            "producer {} delivered {} out of order (expected {})",
            producer, seq, expected
        );
        *expected += 1;
    }
    assert_eq!(next.len(), producers);
    for (producer, count) in next {
        assert_eq!(count, per_producer, "producer {} lost items", producer);
    }
}

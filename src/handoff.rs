//! Bounded handoff from producers to an accumulator's background task.
//!
//! With a non-zero capacity this is a plain bounded queue. A capacity of `0`
//! is a rendezvous: a sender may only hand over an item while the receiver
//! is parked waiting for one. The receiver advertises that by releasing a
//! single permit, and takes it back when it leaves to do other work, so at
//! most one item is ever in transit.

use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::Semaphore;

/// Create a handoff with room for `capacity` pending items (`0` = rendezvous).
pub(crate) fn channel<T>(capacity: usize) -> (Sender<T>, Receiver<T>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let ready = (capacity == 0).then(|| Arc::new(Semaphore::new(0)));
    (
        Sender {
            tx,
            ready: ready.clone(),
        },
        Receiver {
            rx,
            ready,
            offered: false,
        },
    )
}

pub(crate) struct Sender<T> {
    tx: mpsc::Sender<T>,
    /// Present for rendezvous handoffs only.
    ready: Option<Arc<Semaphore>>,
}

impl<T> Sender<T> {
    /// Hand `item` over, waiting for room or for the receiver.
    /// The item is given back when the receiver is closed.
    pub async fn send(&self, item: T) -> Result<(), T> {
        match &self.ready {
            None => self.tx.send(item).await.map_err(|e| e.0),
            Some(ready) => match ready.acquire().await {
                Ok(permit) => {
                    permit.forget();
                    // the permit guarantees a free slot
                    self.tx.try_send(item).map_err(into_inner)
                }
                Err(_) => Err(item),
            },
        }
    }

    /// [`send`](Self::send) for callers outside the async runtime.
    pub fn blocking_send(&self, item: T) -> Result<(), T> {
        match &self.ready {
            None => self.tx.blocking_send(item).map_err(|e| e.0),
            Some(ready) => match futures::executor::block_on(ready.acquire()) {
                Ok(permit) => {
                    permit.forget();
                    self.tx.try_send(item).map_err(into_inner)
                }
                Err(_) => Err(item),
            },
        }
    }

    /// Hand `item` over only if that is possible without waiting.
    pub fn try_send(&self, item: T) -> Result<(), T> {
        if let Some(ready) = &self.ready {
            match ready.try_acquire() {
                Ok(permit) => permit.forget(),
                Err(_) => return Err(item),
            }
        }
        self.tx.try_send(item).map_err(into_inner)
    }
}

fn into_inner<T>(err: TrySendError<T>) -> T {
    match err {
        TrySendError::Full(item) | TrySendError::Closed(item) => item,
    }
}

pub(crate) struct Receiver<T> {
    rx: mpsc::Receiver<T>,
    ready: Option<Arc<Semaphore>>,
    /// A permit is outstanding (unused or held by a sender in transit).
    offered: bool,
}

impl<T> Receiver<T> {
    /// Wait for the next item. `None` once closed and empty.
    pub async fn recv(&mut self) -> Option<T> {
        self.offer();
        let item = self.rx.recv().await;
        if item.is_some() {
            self.offered = false;
        }
        item
    }

    pub fn try_recv(&mut self) -> Option<T> {
        self.rx.try_recv().ok()
    }

    /// Take back an unused rendezvous permit before doing other work.
    ///
    /// A permit already taken by a sender stays outstanding; its item is
    /// picked up by the next `recv`.
    pub fn withdraw(&mut self) {
        if let Some(ready) = &self.ready {
            if self.offered {
                if let Ok(permit) = ready.try_acquire() {
                    permit.forget();
                    self.offered = false;
                }
            }
        }
    }

    /// Refuse further items. Senders waiting for the receiver get their item back.
    pub fn close(&mut self) {
        if let Some(ready) = &self.ready {
            ready.close();
        }
        self.rx.close();
    }

    fn offer(&mut self) {
        if let Some(ready) = &self.ready {
            if !self.offered && !ready.is_closed() {
                ready.add_permits(1);
                self.offered = true;
            }
        }
    }
}

//! Batch handler contract.

use async_trait::async_trait;
use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use tokio_util::sync::CancellationToken;

/// Receives every completed batch, exactly once, in completion order.
///
/// The slice is only valid for the duration of the call: with buffer reuse
/// enabled the same storage is refilled by later batches. Handlers that need
/// to keep items must copy or clone them out.
///
/// `ctx` is cancelled when the accumulator is closed without flushing (and
/// when the parent token passed at construction is cancelled). The
/// accumulator never interrupts a running handler; observing `ctx` is up to
/// the handler.
#[async_trait]
pub trait BatchHandler<T>: Send + Sync
where
    T: Send + Sync,
{
    async fn handle(&self, ctx: &CancellationToken, batch: &[T]);
}

/// Adapter turning a synchronous closure into a [`BatchHandler`].
#[derive(Clone)]
pub struct HandlerFn<F> {
    f: F,
}

/// Wrap `f` as a batch handler.
///
/// ```rust
/// use batch_accumulator::handler_fn;
///
/// let handler = handler_fn(|_ctx, batch: &[u64]| {
///     println!("flushing {} items", batch.len());
/// });
/// # let _ = handler;
/// ```
pub fn handler_fn<T, F>(f: F) -> HandlerFn<F>
where
    F: Fn(&CancellationToken, &[T]) + Send + Sync,
{
    HandlerFn { f }
}

#[async_trait]
impl<T, F> BatchHandler<T> for HandlerFn<F>
where
    T: Send + Sync,
    F: Fn(&CancellationToken, &[T]) + Send + Sync,
{
    async fn handle(&self, ctx: &CancellationToken, batch: &[T]) {
        (self.f)(ctx, batch)
    }
}

impl<F> std::fmt::Debug for HandlerFn<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerFn").finish_non_exhaustive()
    }
}

/// Run the handler, isolating panics. Returns `false` when it panicked.
pub(crate) async fn invoke<T, H>(handler: &H, ctx: &CancellationToken, batch: &[T]) -> bool
where
    T: Send + Sync,
    H: BatchHandler<T> + ?Sized,
{
    match AssertUnwindSafe(handler.handle(ctx, batch))
        .catch_unwind()
        .await
    {
        Ok(()) => true,
        Err(payload) => {
            tracing::error!(
                batch_len = batch.len(),
                panic = %panic_message(payload.as_ref()),
                "batch handler panicked, batch skipped"
            );
            false
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

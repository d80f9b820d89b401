use crate::config::AccumulatorConfig;
use crate::handler::BatchHandler;
use crate::{Accumulator, Error, ErrorContext, FastAccumulator, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Builder for both accumulator variants.
///
/// A handler is mandatory: building without one is a configuration error and
/// never yields an instance.
pub struct AccumulatorBuilder<T> {
    handler: Option<Arc<dyn BatchHandler<T>>>,
    config: AccumulatorConfig,
    cancellation: Option<CancellationToken>,
}

impl<T> AccumulatorBuilder<T>
where
    T: Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self {
            handler: None,
            config: AccumulatorConfig::default(),
            cancellation: None,
        }
    }

    /// Handler invoked once per completed batch.
    pub fn handler<H>(mut self, handler: H) -> Self
    where
        H: BatchHandler<T> + 'static,
    {
        self.handler = Some(Arc::new(handler));
        self
    }

    /// Share one handler between several accumulators.
    pub fn shared_handler(mut self, handler: Arc<dyn BatchHandler<T>>) -> Self {
        self.handler = Some(handler);
        self
    }

    /// Replace the whole configuration.
    pub fn config(mut self, config: AccumulatorConfig) -> Self {
        self.config = config;
        self
    }

    pub fn batch_size(mut self, size: usize) -> Self {
        self.config.batch_size = size;
        self
    }

    pub fn flush_interval(mut self, interval: Duration) -> Self {
        self.config.flush_interval = interval;
        self
    }

    pub fn reuse_buffers(mut self, reuse: bool) -> Self {
        self.config.reuse_buffers = reuse;
        self
    }

    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.config.queue_capacity = capacity;
        self
    }

    pub fn pool_retention(mut self, retention: usize) -> Self {
        self.config.pool_retention = retention;
        self
    }

    /// Parent token for the handler's cancellation token.
    ///
    /// Cancelling it is visible to the handler only; the accumulator keeps
    /// running until closed.
    pub fn cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }

    /// Start a single-coordinator [`Accumulator`].
    pub fn build(self) -> Result<Accumulator<T>> {
        let (handler, config, parent) = self.into_parts()?;
        Accumulator::spawn(handler, config, parent)
    }

    /// Start a lock-and-swap [`FastAccumulator`].
    pub fn build_fast(self) -> Result<FastAccumulator<T>> {
        let (handler, config, parent) = self.into_parts()?;
        FastAccumulator::spawn(handler, config, parent)
    }

    fn into_parts(
        self,
    ) -> Result<(
        Arc<dyn BatchHandler<T>>,
        AccumulatorConfig,
        Option<CancellationToken>,
    )> {
        let handler = self.handler.ok_or_else(|| {
            Error::configuration_with_context(
                "handler must be defined",
                ErrorContext::new()
                    .with_field_path("handler")
                    .with_source("accumulator_builder"),
            )
        })?;
        Ok((handler, self.config, self.cancellation))
    }
}

impl<T> Default for AccumulatorBuilder<T>
where
    T: Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

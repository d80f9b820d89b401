//! Helpers for the background tasks owned by an accumulator.

use crate::{Error, ErrorContext, Result};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;

/// Why a batch left the open buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FlushReason {
    Size,
    Interval,
    Close,
}

impl FlushReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            FlushReason::Size => "size",
            FlushReason::Interval => "interval",
            FlushReason::Close => "close",
        }
    }
}

/// The runtime background tasks are spawned on.
pub(crate) fn current_runtime(source: &'static str) -> Result<Handle> {
    Handle::try_current().map_err(|e| {
        Error::runtime_with_context(
            "accumulator must be created inside a tokio runtime",
            ErrorContext::new()
                .with_details(e.to_string())
                .with_source(source),
        )
    })
}

/// Wait for a background task, turning a join failure into [`Error::Runtime`].
pub(crate) async fn join(handle: JoinHandle<()>, task: &'static str, source: &'static str) -> Result<()> {
    handle.await.map_err(|e| {
        Error::runtime_with_context(
            format!("{} task did not stop cleanly", task),
            ErrorContext::new()
                .with_details(e.to_string())
                .with_source(source),
        )
    })
}

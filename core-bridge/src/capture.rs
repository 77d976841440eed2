//! Capturing failures of caller-supplied work into futures.

use std::future::Future;
use std::panic::{self, AssertUnwindSafe};

use futures::FutureExt;
use tracing::{debug, warn};

use crate::blocking::BlockingFuture;
use crate::error::TaskError;

/// Runs `block`, storing any error or panic on `future`.
///
/// Returns the block's value on success and `None` once a failure has been
/// recorded; the caller decides what to do with a successful value.
pub fn capture_exceptions<T, R, F>(future: &BlockingFuture<T>, block: F) -> Option<R>
where
    T: Send + 'static,
    F: FnOnce() -> anyhow::Result<R>,
{
    match panic::catch_unwind(AssertUnwindSafe(block)) {
        Ok(Ok(value)) => Some(value),
        Ok(Err(error)) => {
            record(future, TaskError::from(error));
            None
        }
        Err(payload) => {
            let error = TaskError::from_panic(payload);
            warn!(%error, "Loop work panicked");
            record(future, error);
            None
        }
    }
}

/// Async counterpart of [`capture_exceptions`] for cooperative units.
pub async fn capture_exceptions_async<T, R, Fut>(
    future: &BlockingFuture<T>,
    unit: Fut,
) -> Option<R>
where
    T: Send + 'static,
    Fut: Future<Output = anyhow::Result<R>>,
{
    match AssertUnwindSafe(unit).catch_unwind().await {
        Ok(Ok(value)) => Some(value),
        Ok(Err(error)) => {
            record(future, TaskError::from(error));
            None
        }
        Err(payload) => {
            let error = TaskError::from_panic(payload);
            warn!(%error, "Cooperative unit panicked");
            record(future, error);
            None
        }
    }
}

fn record<T: Send + 'static>(future: &BlockingFuture<T>, error: TaskError) {
    if future.set_exception(error).is_err() {
        debug!("Dropping failure for a future that already settled");
    }
}

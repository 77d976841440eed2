//! Chaining futures across the loop boundary.
//!
//! Each direction copies the source's outcome onto a target of the other
//! kind: value, failure or cancellation. When the value is itself a future,
//! it is re-wrapped as a future of the target's kind, so a chain of any depth
//! can be resolved from either side.

use tracing::{debug, warn};

use crate::blocking::BlockingFuture;
use crate::context::{self, LoopLocal};
use crate::cooperative::CooperativeFuture;
use crate::error::{BridgeError, Result, TaskError};
use crate::outcome::Outcome;
use crate::value::{LoopValue, ThreadValue};

/// Propagates the outcome of a loop future onto a blocking future.
///
/// Must be called on the loop thread that owns `source`. The target is
/// settled inline when `source` settles.
pub fn chain_cooperative_to_blocking<T>(
    source: &CooperativeFuture<LoopValue<T>>,
    target: BlockingFuture<ThreadValue<T>>,
) where
    T: Clone + Send + 'static,
{
    source.add_done_callback(move |done| {
        let settled = match done.outcome() {
            Some(Outcome::Value(value)) => target.set_result(into_thread_value(value)),
            Some(Outcome::Failed(error)) => target.set_exception(error),
            Some(Outcome::Cancelled) => {
                target.cancel();
                Ok(())
            }
            None => return,
        };
        if settled.is_err() {
            debug!("Blocking target already settled; outcome dropped");
        }
    });
}

/// Propagates the outcome of a blocking future onto a loop future.
///
/// Must be called on the loop thread that owns `target`. `source` may settle
/// on any thread; the outcome is posted back to the loop and applied there.
///
/// # Errors
///
/// [`BridgeError::NoLoop`] when the current thread drives no loop.
pub fn chain_blocking_to_cooperative<T>(
    source: &BlockingFuture<ThreadValue<T>>,
    target: CooperativeFuture<LoopValue<T>>,
) -> Result<()>
where
    T: Clone + Send + 'static,
{
    let handle = context::current_handle().ok_or(BridgeError::NoLoop)?;
    let target = LoopLocal::new(target)?;

    source.add_done_callback(move |done| {
        let Some(outcome) = done.outcome() else {
            return;
        };
        let posted = handle.post(move || match target.take() {
            Ok(target) => settle_cooperative(&target, outcome),
            Err(err) => warn!(%err, "Cooperative target is unreachable"),
        });
        if posted.is_err() {
            warn!("Loop stopped before a blocking outcome could be delivered");
        }
    });
    Ok(())
}

fn settle_cooperative<T>(target: &CooperativeFuture<LoopValue<T>>, outcome: Outcome<ThreadValue<T>>)
where
    T: Clone + Send + 'static,
{
    let settled = match outcome {
        Outcome::Value(ThreadValue::Ready(value)) => target.set_result(LoopValue::Ready(value)),
        Outcome::Value(ThreadValue::Deferred(inner)) => match to_cooperative(&inner) {
            Ok(future) => target.set_result(LoopValue::Deferred(future)),
            Err(err) => target.set_exception(TaskError::from(err)),
        },
        Outcome::Failed(error) => target.set_exception(error),
        Outcome::Cancelled => {
            target.cancel();
            Ok(())
        }
    };
    if settled.is_err() {
        debug!("Cooperative target already settled; outcome dropped");
    }
}

/// Converts a loop-side value into its caller-side form.
///
/// A deferred value gets a fresh blocking future chained to it; this must run
/// on the loop thread that owns it.
pub fn into_thread_value<T>(value: LoopValue<T>) -> ThreadValue<T>
where
    T: Clone + Send + 'static,
{
    match value {
        LoopValue::Ready(value) => ThreadValue::Ready(value),
        LoopValue::Deferred(future) => ThreadValue::Deferred(to_blocking(&future)),
    }
}

/// A new blocking future that settles like `source`.
pub fn to_blocking<T>(source: &CooperativeFuture<LoopValue<T>>) -> BlockingFuture<ThreadValue<T>>
where
    T: Clone + Send + 'static,
{
    let target = BlockingFuture::new();
    chain_cooperative_to_blocking(source, target.clone());
    target
}

/// A new loop future, owned by the current loop, that settles like `source`.
pub fn to_cooperative<T>(source: &BlockingFuture<ThreadValue<T>>) -> Result<CooperativeFuture<LoopValue<T>>>
where
    T: Clone + Send + 'static,
{
    let target = CooperativeFuture::new();
    chain_blocking_to_cooperative(source, target.clone())?;
    Ok(target)
}

//! Loop-bound futures.
//!
//! A [`CooperativeFuture`] lives on exactly one loop thread. It is `!Send`,
//! settles without locking, and is awaited by cooperative units. Done
//! callbacks run inline on the loop thread at the moment the future settles.

use std::cell::RefCell;
use std::fmt;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll, Waker};

use core_async::dispatch::panic_message;
use tracing::error;

use crate::error::{BridgeError, Result, TaskError};
use crate::outcome::Outcome;

type DoneCallback<T> = Box<dyn FnOnce(&CooperativeFuture<T>) + 'static>;

struct State<T> {
    outcome: Option<Outcome<T>>,
    callbacks: Vec<DoneCallback<T>>,
    wakers: Vec<Waker>,
}

/// A settle-once future owned by the loop thread.
pub struct CooperativeFuture<T> {
    inner: Rc<RefCell<State<T>>>,
}

impl<T> Clone for CooperativeFuture<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T: 'static> Default for CooperativeFuture<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: 'static> CooperativeFuture<T> {
    pub fn new() -> Self {
        Self {
            inner: Rc::new(RefCell::new(State {
                outcome: None,
                callbacks: Vec::new(),
                wakers: Vec::new(),
            })),
        }
    }

    pub fn set_result(&self, value: T) -> Result<()> {
        self.settle(Outcome::Value(value))
    }

    pub fn set_exception(&self, error: impl Into<TaskError>) -> Result<()> {
        self.settle(Outcome::Failed(error.into()))
    }

    /// Cancels the future unless it already settled.
    pub fn cancel(&self) -> bool {
        self.settle(Outcome::Cancelled).is_ok()
    }

    fn settle(&self, outcome: Outcome<T>) -> Result<()> {
        let (callbacks, wakers) = {
            let mut state = self.inner.borrow_mut();
            if state.outcome.is_some() {
                return Err(BridgeError::InvalidState);
            }
            state.outcome = Some(outcome);
            (
                std::mem::take(&mut state.callbacks),
                std::mem::take(&mut state.wakers),
            )
        };

        for waker in wakers {
            waker.wake();
        }
        for callback in callbacks {
            self.invoke(callback);
        }
        Ok(())
    }

    pub fn done(&self) -> bool {
        self.inner.borrow().outcome.is_some()
    }

    pub fn cancelled(&self) -> bool {
        matches!(self.inner.borrow().outcome, Some(Outcome::Cancelled))
    }

    /// Registers `callback` to run when the future settles; runs it right
    /// away if it already has.
    pub fn add_done_callback<F>(&self, callback: F)
    where
        F: FnOnce(&CooperativeFuture<T>) + 'static,
    {
        let settled = self.done();
        if settled {
            self.invoke(Box::new(callback));
        } else {
            self.inner.borrow_mut().callbacks.push(Box::new(callback));
        }
    }

    fn invoke(&self, callback: DoneCallback<T>) {
        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| callback(self))) {
            error!(
                panic = %panic_message(payload.as_ref()),
                "Cooperative done callback panicked"
            );
        }
    }
}

impl<T: Clone + 'static> CooperativeFuture<T> {
    pub fn outcome(&self) -> Option<Outcome<T>> {
        self.inner.borrow().outcome.clone()
    }
}

impl<T: Clone + 'static> Future for CooperativeFuture<T> {
    type Output = Result<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut state = self.inner.borrow_mut();
        if let Some(outcome) = &state.outcome {
            return Poll::Ready(outcome.clone().into_result());
        }
        if !state.wakers.iter().any(|waker| waker.will_wake(cx.waker())) {
            state.wakers.push(cx.waker().clone());
        }
        Poll::Pending
    }
}

impl<T> fmt::Debug for CooperativeFuture<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match &self.inner.borrow().outcome {
            None => "pending",
            Some(Outcome::Value(_)) => "finished",
            Some(Outcome::Failed(_)) => "failed",
            Some(Outcome::Cancelled) => "cancelled",
        };
        f.debug_struct("CooperativeFuture")
            .field("state", &state)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_async::task;
    use std::cell::Cell;

    #[core_async::test]
    async fn test_await_result_set_by_other_task() {
        let future = CooperativeFuture::new();
        let setter = future.clone();
        task::spawn_local(async move {
            task::yield_now().await;
            setter.set_result(11).unwrap();
        });

        assert_eq!(future.await.unwrap(), 11);
    }

    #[core_async::test]
    async fn test_multiple_awaiters_see_same_value() {
        let future = CooperativeFuture::new();
        let first = task::spawn_local(future.clone());
        let second = task::spawn_local(future.clone());
        task::yield_now().await;

        future.set_result("shared").unwrap();
        assert_eq!(first.await.unwrap().unwrap(), "shared");
        assert_eq!(second.await.unwrap().unwrap(), "shared");
    }

    #[core_async::test]
    async fn test_exception_and_cancel() {
        let failed = CooperativeFuture::<u8>::new();
        failed.set_exception(TaskError::msg("loop error")).unwrap();
        assert_eq!(failed.await.unwrap_err().to_string(), "loop error");

        let cancelled = CooperativeFuture::<u8>::new();
        assert!(cancelled.cancel());
        assert!(!cancelled.cancel());
        assert!(cancelled.cancelled());
        assert!(cancelled.await.unwrap_err().is_cancelled());
    }

    #[test]
    fn test_settle_twice_rejected() {
        let future = CooperativeFuture::new();
        future.set_result(1).unwrap();
        assert!(matches!(future.set_result(2), Err(BridgeError::InvalidState)));
        assert!(!future.cancel());
    }

    #[test]
    fn test_callbacks_run_inline_in_order() {
        let future = CooperativeFuture::<u8>::new();
        let order = Rc::new(RefCell::new(Vec::new()));

        for i in 0..3 {
            let order = order.clone();
            future.add_done_callback(move |_| order.borrow_mut().push(i));
        }
        future.set_result(0).unwrap();
        assert_eq!(*order.borrow(), vec![0, 1, 2]);

        let late = Rc::new(Cell::new(false));
        let flag = late.clone();
        future.add_done_callback(move |done| flag.set(done.done()));
        assert!(late.get());
    }

    #[test]
    fn test_callback_can_inspect_outcome() {
        let future = CooperativeFuture::<u8>::new();
        let seen = Rc::new(Cell::new(0));
        let slot = seen.clone();
        future.add_done_callback(move |done| {
            if let Some(Outcome::Value(value)) = done.outcome() {
                slot.set(value);
            }
        });
        future.set_result(42).unwrap();
        assert_eq!(seen.get(), 42);
    }
}

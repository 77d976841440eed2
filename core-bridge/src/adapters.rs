//! Scoped resources and iteration driven from caller threads.
//!
//! These adapters let blocking code use loop-side resources with ordinary
//! closure scopes and iterators. Every step (entering, exiting, fetching the
//! next item) is a separate round trip onto the loop, waited on with the
//! scheduler's default timeout.

use std::fmt;
use std::iter::FusedIterator;
use std::panic::{self, AssertUnwindSafe};
use std::pin::Pin;
use std::rc::Rc;
use std::sync::Arc;

use async_trait::async_trait;
use core_async::dispatch::panic_message;
use core_async::sync::Mutex as AsyncMutex;
use futures::{Stream, StreamExt};
use tracing::debug;

use crate::bridge::into_thread_value;
use crate::context::LoopLocal;
use crate::error::{BridgeError, Result, TaskError};
use crate::scheduler::LoopScheduler;
use crate::value::{LoopValue, ThreadValue};

/// A resource with enter/exit hooks that run on the loop.
pub trait ScopedResource: Send + 'static {
    type Value: Clone + Send + 'static;

    fn enter(&mut self) -> anyhow::Result<Self::Value>;

    /// Called with the body's error, if any. Returning `true` suppresses it.
    fn exit(&mut self, error: Option<&TaskError>) -> anyhow::Result<bool>;
}

/// A loop-native resource whose hooks are cooperative units.
///
/// Implementations live on the loop thread and need not be `Send`.
#[async_trait(?Send)]
pub trait AsyncScopedResource: 'static {
    type Value: Clone + Send + 'static;

    async fn enter(&mut self) -> anyhow::Result<LoopValue<Self::Value>>;

    /// Called with the body's error, if any. Returning `true` suppresses it.
    async fn exit(&mut self, error: Option<&TaskError>) -> anyhow::Result<bool>;
}

enum BodyFailure {
    Error(TaskError),
    Panic(Box<dyn std::any::Any + Send>, TaskError),
}

impl BodyFailure {
    fn capture<U>(body: impl FnOnce() -> anyhow::Result<U>) -> std::result::Result<U, Self> {
        match panic::catch_unwind(AssertUnwindSafe(body)) {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(error)) => Err(BodyFailure::Error(TaskError::from(error))),
            Err(payload) => {
                let error = TaskError::panicked(panic_message(payload.as_ref()));
                Err(BodyFailure::Panic(payload, error))
            }
        }
    }

    fn error(&self) -> &TaskError {
        match self {
            BodyFailure::Error(error) | BodyFailure::Panic(_, error) => error,
        }
    }

    /// Re-raises the failure: errors are returned, panics resume unwinding.
    fn raise<U>(self) -> Result<U> {
        match self {
            BodyFailure::Error(error) => Err(BridgeError::Task(error)),
            BodyFailure::Panic(payload, _) => panic::resume_unwind(payload),
        }
    }
}

type LocalStream<T> = Pin<Box<dyn Stream<Item = anyhow::Result<T>>>>;
type SharedStream<T> = Arc<LoopLocal<Rc<AsyncMutex<LocalStream<T>>>>>;
type SharedResource<R> = Arc<LoopLocal<Rc<AsyncMutex<R>>>>;

impl LoopScheduler {
    /// Runs `body` inside `resource`'s scope, entering and exiting on the loop.
    ///
    /// Returns `Ok(None)` when the body failed and `exit` suppressed the
    /// failure. A panicking body resumes unwinding after `exit` runs, unless
    /// suppressed.
    ///
    /// # Errors
    ///
    /// Failures of `enter` (without calling `exit`), of `exit`, or of the body
    /// when not suppressed.
    pub fn ctx<R, F, U>(&self, resource: R, body: F) -> Result<Option<U>>
    where
        R: ScopedResource,
        F: FnOnce(&R::Value) -> anyhow::Result<U>,
    {
        let resource = Arc::new(parking_lot::Mutex::new(resource));

        let value = {
            let resource = resource.clone();
            self.run(move || resource.lock().enter())?
        };

        match BodyFailure::capture(|| body(&value)) {
            Ok(output) => {
                self.run(move || resource.lock().exit(None))?;
                Ok(Some(output))
            }
            Err(failure) => {
                let error = failure.error().clone();
                let suppressed = self.run(move || resource.lock().exit(Some(&error)))?;
                if suppressed {
                    debug!("Scope exit suppressed body failure");
                    Ok(None)
                } else {
                    failure.raise()
                }
            }
        }
    }

    /// Async-resource counterpart of [`ctx`](Self::ctx).
    ///
    /// `make` builds the resource on the loop thread. The entered value is
    /// handed to `body` as a [`ThreadValue`], so a deferred value can be
    /// resolved from the caller side.
    pub fn async_ctx<M, R, F, U>(&self, make: M, body: F) -> Result<Option<U>>
    where
        M: FnOnce() -> R + Send + 'static,
        R: AsyncScopedResource,
        F: FnOnce(ThreadValue<R::Value>) -> anyhow::Result<U>,
    {
        let (resource, value): (SharedResource<R>, ThreadValue<R::Value>) = self.await_value(
            move || async move {
                let resource = Rc::new(AsyncMutex::new(make()));
                let entered = resource.lock().await.enter().await?;
                let resource = Arc::new(LoopLocal::new(resource)?);
                anyhow::Ok((resource, into_thread_value(entered)))
            },
            Some("enter"),
        )?;

        let exit = |error: Option<TaskError>| -> Result<bool> {
            let resource = resource.clone();
            self.await_value(
                move || async move {
                    let resource = resource.get()?;
                    let mut guard = resource.lock().await;
                    let suppressed = guard.exit(error.as_ref()).await?;
                    anyhow::Ok(suppressed)
                },
                Some("exit"),
            )
        };

        match BodyFailure::capture(|| body(value)) {
            Ok(output) => {
                exit(None)?;
                Ok(Some(output))
            }
            Err(failure) => {
                if exit(Some(failure.error().clone()))? {
                    debug!("Async scope exit suppressed body failure");
                    Ok(None)
                } else {
                    failure.raise()
                }
            }
        }
    }

    /// Iterates a loop-side stream from the calling thread.
    ///
    /// `make` builds the stream on the loop when the first item is requested.
    /// Each item is fetched with the default timeout; the first error (a
    /// stream error or a timeout) is yielded once and ends the iteration.
    pub fn async_iter<M, S, T>(&self, make: M) -> AsyncIter<'_, T>
    where
        M: FnOnce() -> S + Send + 'static,
        S: Stream<Item = anyhow::Result<T>> + 'static,
        T: Clone + Send + 'static,
    {
        AsyncIter {
            scheduler: self,
            state: IterState::Unstarted(Box::new(move || Box::pin(make()) as LocalStream<T>)),
        }
    }
}

enum IterState<T> {
    Unstarted(Box<dyn FnOnce() -> LocalStream<T> + Send>),
    Active(SharedStream<T>),
    Finished,
}

/// Blocking iterator over a stream that lives on the loop.
pub struct AsyncIter<'a, T> {
    scheduler: &'a LoopScheduler,
    state: IterState<T>,
}

impl<T: Clone + Send + 'static> AsyncIter<'_, T> {
    fn open(&self, make: Box<dyn FnOnce() -> LocalStream<T> + Send>) -> Result<SharedStream<T>> {
        self.scheduler.await_value(
            move || async move {
                let stream = LoopLocal::new(Rc::new(AsyncMutex::new(make())))?;
                anyhow::Ok(Arc::new(stream))
            },
            Some("aiter"),
        )
    }

    fn fetch(&self, stream: &SharedStream<T>) -> Result<Option<T>> {
        let stream = stream.clone();
        self.scheduler.await_value(
            move || async move {
                let stream = stream.get()?;
                let mut stream = stream.lock().await;
                let item = (*stream).next().await;
                item.transpose()
            },
            Some("next"),
        )
    }
}

impl<T: Clone + Send + 'static> Iterator for AsyncIter<'_, T> {
    type Item = Result<T>;

    fn next(&mut self) -> Option<Self::Item> {
        let stream = match std::mem::replace(&mut self.state, IterState::Finished) {
            IterState::Finished => return None,
            IterState::Active(stream) => stream,
            IterState::Unstarted(make) => match self.open(make) {
                Ok(stream) => stream,
                Err(err) => return Some(Err(err)),
            },
        };

        match self.fetch(&stream) {
            Ok(Some(item)) => {
                self.state = IterState::Active(stream);
                Some(Ok(item))
            }
            Ok(None) => None,
            Err(err) => Some(Err(err)),
        }
    }
}

impl<T: Clone + Send + 'static> FusedIterator for AsyncIter<'_, T> {}

impl<T> fmt::Debug for AsyncIter<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match self.state {
            IterState::Unstarted(_) => "unstarted",
            IterState::Active(_) => "active",
            IterState::Finished => "finished",
        };
        f.debug_struct("AsyncIter")
            .field("scheduler", &self.scheduler.name())
            .field("state", &state)
            .finish()
    }
}

//! Values that may themselves be futures.
//!
//! Work submitted to the loop can hand back either a plain value or another
//! future. [`LoopValue`] is that choice on the loop side and [`ThreadValue`]
//! on the caller side; bridging converts one into the other level by level,
//! and `resolve` follows the chain until a plain value turns up.

use std::time::{Duration, Instant};

use crate::blocking::BlockingFuture;
use crate::cooperative::CooperativeFuture;
use crate::error::Result;

/// A result produced on the loop: ready now, or pending on the loop.
#[derive(Debug, Clone)]
pub enum LoopValue<T> {
    Ready(T),
    Deferred(CooperativeFuture<LoopValue<T>>),
}

impl<T> From<T> for LoopValue<T> {
    fn from(value: T) -> Self {
        LoopValue::Ready(value)
    }
}

/// A result as seen from a caller thread.
#[derive(Debug, Clone)]
pub enum ThreadValue<T> {
    Ready(T),
    Deferred(BlockingFuture<ThreadValue<T>>),
}

impl<T> From<T> for ThreadValue<T> {
    fn from(value: T) -> Self {
        ThreadValue::Ready(value)
    }
}

impl<T: Clone + Send + 'static> ThreadValue<T> {
    /// Returns the value if it needs no further waiting.
    pub fn ready(self) -> Option<T> {
        match self {
            ThreadValue::Ready(value) => Some(value),
            ThreadValue::Deferred(_) => None,
        }
    }

    /// Follows deferred levels until a plain value appears.
    pub fn resolve(self, timeout: Option<Duration>) -> Result<T> {
        match self {
            ThreadValue::Ready(value) => Ok(value),
            ThreadValue::Deferred(future) => future.resolve(timeout),
        }
    }
}

impl<T: Clone + Send + 'static> BlockingFuture<ThreadValue<T>> {
    /// Blocks until the chain of futures ends in a plain value.
    ///
    /// `timeout` bounds the whole chain, not each level.
    pub fn resolve(&self, timeout: Option<Duration>) -> Result<T> {
        let deadline = timeout.and_then(|timeout| Instant::now().checked_add(timeout));
        let mut current = self.clone();
        loop {
            match current.wait_until(deadline, timeout)? {
                ThreadValue::Ready(value) => return Ok(value),
                ThreadValue::Deferred(next) => current = next,
            }
        }
    }
}

impl<T: Clone + 'static> CooperativeFuture<LoopValue<T>> {
    /// Awaits the chain of futures until it ends in a plain value.
    pub async fn resolve(&self) -> Result<T> {
        let mut current = self.clone();
        loop {
            match current.await? {
                LoopValue::Ready(value) => return Ok(value),
                LoopValue::Deferred(next) => current = next,
            }
        }
    }
}

//! Thread-safe, blockingly-waitable futures.
//!
//! A [`BlockingFuture`] is the caller-side view of work running on the loop.
//! Any thread may settle it, wait on it, cancel it or attach completion
//! callbacks. Waiting is a plain condition-variable wait, so it must never
//! happen on the loop thread that is supposed to settle the future.

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Duration, Instant};

use core_async::dispatch::panic_message;
use tracing::{debug, error};

use crate::error::{BridgeError, Result, TaskError};
use crate::outcome::Outcome;

type DoneCallback<T> = Box<dyn FnOnce(&BlockingFuture<T>) + Send + 'static>;

enum Phase<T> {
    Pending,
    Running,
    Settled(Outcome<T>),
}

struct State<T> {
    phase: Phase<T>,
    callbacks: Vec<DoneCallback<T>>,
}

struct Inner<T> {
    state: parking_lot::Mutex<State<T>>,
    settled: parking_lot::Condvar,
}

/// A future that blocking threads can wait on.
///
/// Clones share the same underlying state.
///
/// ```
/// use core_bridge::BlockingFuture;
/// use std::thread;
/// use std::time::Duration;
///
/// let future = BlockingFuture::new();
/// let producer = future.clone();
/// thread::spawn(move || producer.set_result(7).unwrap());
///
/// assert_eq!(future.result(Some(Duration::from_secs(1))).unwrap(), 7);
/// ```
pub struct BlockingFuture<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for BlockingFuture<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T: Send + 'static> Default for BlockingFuture<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Send + 'static> BlockingFuture<T> {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                state: parking_lot::Mutex::new(State {
                    phase: Phase::Pending,
                    callbacks: Vec::new(),
                }),
                settled: parking_lot::Condvar::new(),
            }),
        }
    }

    /// Marks the work as started.
    ///
    /// Returns `false` if the future was cancelled first, in which case the
    /// work must not run. A running future can no longer be cancelled.
    pub fn set_running(&self) -> bool {
        let mut state = self.inner.state.lock();
        match state.phase {
            Phase::Pending => {
                state.phase = Phase::Running;
                true
            }
            Phase::Running => true,
            Phase::Settled(_) => false,
        }
    }

    pub fn set_result(&self, value: T) -> Result<()> {
        self.settle(Outcome::Value(value))
    }

    pub fn set_exception(&self, error: impl Into<TaskError>) -> Result<()> {
        self.settle(Outcome::Failed(error.into()))
    }

    /// Cancels the future if it has neither started nor settled.
    pub fn cancel(&self) -> bool {
        let callbacks = {
            let mut state = self.inner.state.lock();
            if !matches!(state.phase, Phase::Pending) {
                return false;
            }
            state.phase = Phase::Settled(Outcome::Cancelled);
            self.inner.settled.notify_all();
            std::mem::take(&mut state.callbacks)
        };
        self.run_callbacks(callbacks);
        true
    }

    fn settle(&self, outcome: Outcome<T>) -> Result<()> {
        let callbacks = {
            let mut state = self.inner.state.lock();
            if matches!(state.phase, Phase::Settled(_)) {
                return Err(BridgeError::InvalidState);
            }
            state.phase = Phase::Settled(outcome);
            self.inner.settled.notify_all();
            std::mem::take(&mut state.callbacks)
        };
        self.run_callbacks(callbacks);
        Ok(())
    }

    pub fn running(&self) -> bool {
        matches!(self.inner.state.lock().phase, Phase::Running)
    }

    pub fn done(&self) -> bool {
        matches!(self.inner.state.lock().phase, Phase::Settled(_))
    }

    pub fn cancelled(&self) -> bool {
        matches!(
            self.inner.state.lock().phase,
            Phase::Settled(Outcome::Cancelled)
        )
    }

    /// Registers `callback` to run once the future settles.
    ///
    /// Callbacks run in registration order on whichever thread settles the
    /// future, or immediately on this thread if it already has.
    pub fn add_done_callback<F>(&self, callback: F)
    where
        F: FnOnce(&BlockingFuture<T>) + Send + 'static,
    {
        let mut state = self.inner.state.lock();
        if matches!(state.phase, Phase::Settled(_)) {
            drop(state);
            self.invoke(Box::new(callback));
        } else {
            state.callbacks.push(Box::new(callback));
        }
    }

    fn run_callbacks(&self, callbacks: Vec<DoneCallback<T>>) {
        for callback in callbacks {
            self.invoke(callback);
        }
    }

    fn invoke(&self, callback: DoneCallback<T>) {
        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| callback(self))) {
            error!(
                panic = %panic_message(payload.as_ref()),
                "Done callback panicked"
            );
        }
    }
}

impl<T: Clone + Send + 'static> BlockingFuture<T> {
    /// The settled outcome, or `None` while pending or running.
    pub fn outcome(&self) -> Option<Outcome<T>> {
        match &self.inner.state.lock().phase {
            Phase::Settled(outcome) => Some(outcome.clone()),
            _ => None,
        }
    }

    /// Blocks until the future settles or `timeout` elapses.
    ///
    /// # Errors
    ///
    /// - [`BridgeError::Timeout`] if the deadline passes first (the future
    ///   itself is left untouched)
    /// - [`BridgeError::Cancelled`] if the future was cancelled
    /// - [`BridgeError::Task`] carrying the stored error
    pub fn result(&self, timeout: Option<Duration>) -> Result<T> {
        let deadline = timeout.and_then(|timeout| Instant::now().checked_add(timeout));
        self.wait_until(deadline, timeout)
    }

    pub(crate) fn wait_until(
        &self,
        deadline: Option<Instant>,
        timeout: Option<Duration>,
    ) -> Result<T> {
        let mut state = self.inner.state.lock();
        loop {
            if let Phase::Settled(outcome) = &state.phase {
                return outcome.clone().into_result();
            }
            match deadline {
                None => self.inner.settled.wait(&mut state),
                Some(deadline) => {
                    if self
                        .inner
                        .settled
                        .wait_until(&mut state, deadline)
                        .timed_out()
                    {
                        if let Phase::Settled(outcome) = &state.phase {
                            return outcome.clone().into_result();
                        }
                        return Err(BridgeError::Timeout {
                            name: None,
                            timeout: timeout.unwrap_or_default(),
                        });
                    }
                }
            }
        }
    }
}

impl<T> fmt::Debug for BlockingFuture<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match &self.inner.state.lock().phase {
            Phase::Pending => "pending",
            Phase::Running => "running",
            Phase::Settled(Outcome::Value(_)) => "finished",
            Phase::Settled(Outcome::Failed(_)) => "failed",
            Phase::Settled(Outcome::Cancelled) => "cancelled",
        };
        f.debug_struct("BlockingFuture")
            .field("state", &state)
            .finish()
    }
}

/// Cancels the wrapped future when dropped without being disarmed.
///
/// Rides along with callbacks posted to the loop: if the loop goes away
/// before running them, whoever waits on the future sees a cancellation.
pub(crate) struct CancelOnDrop<T: Send + 'static> {
    future: Option<BlockingFuture<T>>,
}

impl<T: Send + 'static> CancelOnDrop<T> {
    pub(crate) fn new(future: BlockingFuture<T>) -> Self {
        Self {
            future: Some(future),
        }
    }

    pub(crate) fn disarm(mut self) -> BlockingFuture<T> {
        match self.future.take() {
            Some(future) => future,
            None => unreachable!("CancelOnDrop disarmed twice"),
        }
    }
}

impl<T: Send + 'static> Drop for CancelOnDrop<T> {
    fn drop(&mut self) {
        if let Some(future) = self.future.take() {
            if future.cancel() {
                debug!("Cancelled future whose loop callback was dropped unrun");
            }
        }
    }
}

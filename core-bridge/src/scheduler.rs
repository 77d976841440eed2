//! # Loop Scheduler
//!
//! Owns one worker thread and the single-threaded loop it drives, and exposes
//! thread-safe entry points for running work on that loop.
//!
//! ## Lifecycle
//!
//! ```text
//! Pending --start--> Running --stop--> Stopped --start--> Running ...
//!    |                  |                 |
//!    +------close-------+------close------+--> Closed (terminal)
//! ```
//!
//! `start` spawns the worker, which binds the loop context to itself, spawns
//! the dispatch queue and confirms through a "started" future before `start`
//! returns. `stop` posts a stop request carrying an acknowledgement future,
//! waits for it, joins the worker and keeps the runtime for a later restart.
//! Any submission made while the scheduler is not running starts it first.
//!
//! ## Usage
//!
//! ```
//! use core_bridge::LoopScheduler;
//! use core_runtime::config::SchedulerConfig;
//!
//! let scheduler = LoopScheduler::new(SchedulerConfig::default()).unwrap();
//! {
//!     let scheduler = scheduler.enter().unwrap();
//!     assert_eq!(scheduler.run(|| Ok(40 + 2)).unwrap(), 42);
//!     let doubled = scheduler
//!         .await_value(|| async { Ok(21 * 2) }, Some("double"))
//!         .unwrap();
//!     assert_eq!(doubled, 42);
//! }
//! assert!(!scheduler.is_running());
//! ```

use std::any::type_name;
use std::fmt;
use std::future::Future;
use std::ops::Deref;
use std::thread::{self, JoinHandle, ThreadId};
use std::time::Duration;

use core_async::dispatch::{
    self, panic_message, Callback, DispatchQueue, LoopHandle, PostHandle,
};
use core_async::runtime::{self, Runtime};
use core_async::task;
use core_runtime::config::SchedulerConfig;
use parking_lot::MutexGuard;
use tracing::{debug, info, instrument, trace, warn};

use crate::blocking::{BlockingFuture, CancelOnDrop};
use crate::bridge::into_thread_value;
use crate::capture::{capture_exceptions, capture_exceptions_async};
use crate::context;
use crate::cooperative::CooperativeFuture;
use crate::error::{BridgeError, Result};
use crate::value::{LoopValue, ThreadValue};

/// Lifecycle state of a [`LoopScheduler`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Pending,
    Running,
    Stopped,
    Closed,
}

struct Status {
    state: SchedulerState,
    handle: Option<LoopHandle>,
    loop_thread: Option<ThreadId>,
}

struct Lifecycle {
    runtime: Option<Runtime>,
    worker: Option<JoinHandle<Runtime>>,
}

/// Runs a single-threaded cooperative loop on a dedicated worker thread.
///
/// The scheduler is `Send + Sync`; share it behind an `Arc` to submit from
/// many threads. Dropping a running scheduler stops it.
pub struct LoopScheduler {
    config: SchedulerConfig,
    // Held across the whole start/stop handshake
    lifecycle: parking_lot::Mutex<Lifecycle>,
    // Read by submissions without touching `lifecycle`
    status: parking_lot::RwLock<Status>,
}

impl LoopScheduler {
    /// Creates a scheduler with a fresh loop runtime.
    ///
    /// The worker thread is not started until [`start`](Self::start), or the
    /// first submission.
    pub fn new(config: SchedulerConfig) -> Result<Self> {
        let runtime =
            runtime::new_loop_runtime().map_err(|e| BridgeError::Runtime(e.to_string()))?;
        Self::with_runtime(runtime, config)
    }

    /// Creates a scheduler that drives an externally built runtime.
    ///
    /// The runtime must be a current-thread runtime; it moves onto the worker
    /// thread while the scheduler runs.
    pub fn with_runtime(runtime: Runtime, config: SchedulerConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            lifecycle: parking_lot::Mutex::new(Lifecycle {
                runtime: Some(runtime),
                worker: None,
            }),
            status: parking_lot::RwLock::new(Status {
                state: SchedulerState::Pending,
                handle: None,
                loop_thread: None,
            }),
        })
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// Default time blocking callers wait for results.
    pub fn timeout(&self) -> Duration {
        self.config.task_timeout
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub fn state(&self) -> SchedulerState {
        self.status.read().state
    }

    pub fn is_running(&self) -> bool {
        self.state() == SchedulerState::Running
    }

    pub fn is_closed(&self) -> bool {
        self.state() == SchedulerState::Closed
    }

    /// Handle for posting raw callbacks onto the running loop.
    pub fn handle(&self) -> Option<LoopHandle> {
        self.status.read().handle.clone()
    }

    /// Returns `true` when called from this scheduler's worker thread.
    pub fn is_loop_thread(&self) -> bool {
        self.status.read().loop_thread == Some(thread::current().id())
    }

    /// Starts the worker thread and waits until its loop is running.
    ///
    /// # Errors
    ///
    /// - [`BridgeError::AlreadyRunning`] if the loop is running
    /// - [`BridgeError::Closed`] after [`close`](Self::close)
    /// - [`BridgeError::StartFailed`] if the worker died before confirming
    /// - [`BridgeError::OnLoopThread`] when called from the loop itself
    #[instrument(skip(self), fields(scheduler = %self.config.name))]
    pub fn start(&self) -> Result<()> {
        let mut lifecycle = self.lock_lifecycle()?;
        self.start_locked(&mut lifecycle).map(|_| ())
    }

    /// The loop thread never waits on the lifecycle lock; a stop in progress
    /// holds it while waiting for that very thread.
    fn lock_lifecycle(&self) -> Result<MutexGuard<'_, Lifecycle>> {
        if self.is_loop_thread() {
            return Err(BridgeError::OnLoopThread);
        }
        Ok(self.lifecycle.lock())
    }

    fn start_locked(&self, lifecycle: &mut Lifecycle) -> Result<LoopHandle> {
        match self.state() {
            SchedulerState::Closed => return Err(BridgeError::Closed),
            SchedulerState::Running => return Err(BridgeError::AlreadyRunning),
            SchedulerState::Pending | SchedulerState::Stopped => {}
        }

        let runtime = match lifecycle.runtime.take() {
            Some(runtime) => runtime,
            None => runtime::new_loop_runtime()
                .map_err(|e| BridgeError::Runtime(e.to_string()))?,
        };

        let (handle, queue) = dispatch::channel();
        let started = BlockingFuture::<()>::new();

        let mut builder = thread::Builder::new().name(self.config.name.clone());
        if let Some(stack_size) = self.config.thread_stack_size {
            builder = builder.stack_size(stack_size);
        }

        let worker = {
            let handle = handle.clone();
            let started = CancelOnDrop::new(started.clone());
            let name = self.config.name.clone();
            builder
                .spawn(move || drive_loop(runtime, handle, queue, started, name))
                .map_err(|e| BridgeError::StartFailed(e.to_string()))?
        };

        if let Err(err) = started.result(None) {
            let reason = match worker.join() {
                Ok(runtime) => {
                    lifecycle.runtime = Some(runtime);
                    err.to_string()
                }
                Err(payload) => panic_message(payload.as_ref()),
            };
            warn!(%reason, "Loop worker did not start");
            return Err(BridgeError::StartFailed(reason));
        }

        let loop_thread = worker.thread().id();
        lifecycle.worker = Some(worker);
        {
            let mut status = self.status.write();
            status.state = SchedulerState::Running;
            status.handle = Some(handle.clone());
            status.loop_thread = Some(loop_thread);
        }

        info!(thread = ?loop_thread, "Loop scheduler started");
        Ok(handle)
    }

    /// Stops the loop and joins the worker thread.
    ///
    /// Does nothing when the loop is not running. Callbacks still queued when
    /// the loop stops are dropped, cancelling the futures they would have
    /// settled.
    ///
    /// # Errors
    ///
    /// - [`BridgeError::OnLoopThread`] when called from the loop itself
    /// - [`BridgeError::LoopPanicked`] if the worker thread panicked
    #[instrument(skip(self), fields(scheduler = %self.config.name))]
    pub fn stop(&self) -> Result<()> {
        let mut lifecycle = self.lock_lifecycle()?;
        self.stop_locked(&mut lifecycle)
    }

    fn stop_locked(&self, lifecycle: &mut Lifecycle) -> Result<()> {
        let Some(worker) = lifecycle.worker.take() else {
            return Ok(());
        };

        // Submitters now queue up on `lifecycle` and restart the loop afterwards
        let handle = self.status.write().handle.take();

        let mut outcome = Ok(());
        if let Some(handle) = handle {
            let ack = BlockingFuture::<()>::new();
            let guard = CancelOnDrop::new(ack.clone());
            match handle.post(move || context::signal_stop(guard.disarm())) {
                Ok(_) => match ack.result(None) {
                    Ok(()) | Err(BridgeError::Cancelled) => {}
                    Err(err) => outcome = Err(err),
                },
                Err(_) => trace!("Loop queue already closed"),
            }
        }

        let joined = worker.join();
        {
            let mut status = self.status.write();
            status.state = SchedulerState::Stopped;
            status.handle = None;
            status.loop_thread = None;
        }

        match joined {
            Ok(runtime) => lifecycle.runtime = Some(runtime),
            Err(payload) => {
                let reason = panic_message(payload.as_ref());
                warn!(%reason, "Loop worker panicked");
                return Err(BridgeError::LoopPanicked(reason));
            }
        }

        info!("Loop scheduler stopped");
        outcome
    }

    /// Stops the loop (once) and marks the scheduler closed.
    ///
    /// A closed scheduler cannot be restarted. Closing twice is a no-op.
    #[instrument(skip(self), fields(scheduler = %self.config.name))]
    pub fn close(&self) -> Result<()> {
        let mut lifecycle = self.lock_lifecycle()?;
        if self.is_closed() {
            return Ok(());
        }

        let stopped = self.stop_locked(&mut lifecycle);
        self.status.write().state = SchedulerState::Closed;
        release_runtime(lifecycle.runtime.take());
        debug!("Loop scheduler closed");
        stopped
    }

    /// Starts the loop if needed and returns a guard that stops it on drop.
    pub fn enter(&self) -> Result<SchedulerGuard<'_>> {
        self.ensure_running()?;
        Ok(SchedulerGuard { scheduler: self })
    }

    fn ensure_running(&self) -> Result<LoopHandle> {
        if let Some(handle) = self.handle() {
            return Ok(handle);
        }
        let mut lifecycle = self.lock_lifecycle()?;
        if let Some(handle) = self.handle() {
            return Ok(handle);
        }
        self.start_locked(&mut lifecycle)
    }

    /// Posts `callback` onto the running loop, starting it first if needed.
    ///
    /// A post can lose a race with `stop()` and find the queue closed. The
    /// callback then waits for the lifecycle lock and goes to the restarted
    /// loop instead, until it lands or the scheduler is closed.
    fn post_running(
        &self,
        callback: impl FnOnce() + Send + 'static,
    ) -> Result<(LoopHandle, PostHandle)> {
        let mut handle = self.ensure_running()?;
        let mut callback: Callback = Box::new(callback);
        loop {
            match handle.try_post(callback) {
                Ok(posted) => return Ok((handle, posted)),
                Err(rejected) => callback = rejected,
            }
            debug!("Loop went away during submission; restarting");
            handle = self.restart_stale()?;
        }
    }

    fn restart_stale(&self) -> Result<LoopHandle> {
        let mut lifecycle = self.lock_lifecycle()?;
        if let Some(handle) = self.handle() {
            if !handle.is_closed() {
                return Ok(handle);
            }
            // The worker exited without being stopped
            self.stop_locked(&mut lifecycle)?;
        }
        self.start_locked(&mut lifecycle)
    }

    /// Schedules `work` on the loop and returns immediately.
    ///
    /// Errors and panics raised by `work` are stored in the returned future;
    /// they never reach the loop. Cancelling the future before the loop gets
    /// to `work` keeps it from running.
    pub fn submit<F, T>(&self, work: F) -> Result<BlockingFuture<T>>
    where
        F: FnOnce() -> anyhow::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        self.post_work(work, |value| value)
    }

    /// Like [`submit`](Self::submit), for work that may hand back a loop
    /// future instead of a value.
    pub fn submit_chained<F, T>(&self, work: F) -> Result<BlockingFuture<ThreadValue<T>>>
    where
        F: FnOnce() -> anyhow::Result<LoopValue<T>> + Send + 'static,
        T: Clone + Send + 'static,
    {
        self.post_work(work, into_thread_value)
    }

    fn post_work<F, R, T, C>(&self, work: F, convert: C) -> Result<BlockingFuture<T>>
    where
        F: FnOnce() -> anyhow::Result<R> + Send + 'static,
        C: FnOnce(R) -> T + Send + 'static,
        T: Send + 'static,
    {
        let future = BlockingFuture::new();
        let guard = CancelOnDrop::new(future.clone());

        let (handle, posted) = self.post_running(move || {
            let future = guard.disarm();
            if !future.set_running() {
                trace!("Skipping work cancelled before it ran");
                return;
            }
            if let Some(value) = capture_exceptions(&future, work) {
                if future.set_result(convert(value)).is_err() {
                    debug!("Work finished after its future settled");
                }
            }
        })?;

        forward_cancel(&future, handle, posted);
        Ok(future)
    }

    /// Runs `work` on the loop and waits for its value with the default
    /// timeout.
    pub fn run<F, T>(&self, work: F) -> Result<T>
    where
        F: FnOnce() -> anyhow::Result<T> + Send + 'static,
        T: Clone + Send + 'static,
    {
        self.submit(work)?.result(Some(self.timeout()))
    }

    /// Spawns the cooperative unit built by `make` on the loop.
    ///
    /// `make` is called on the loop thread, so the unit itself need not be
    /// `Send`. Cancelling the returned future aborts the unit.
    pub fn await_submit<M, Fut, T>(&self, make: M) -> Result<BlockingFuture<T>>
    where
        M: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<T>> + 'static,
        T: Send + 'static,
    {
        self.spawn_unit(make, |value| value)
    }

    /// Like [`await_submit`](Self::await_submit), for units that may resolve
    /// to another loop future.
    pub fn await_submit_chained<M, Fut, T>(
        &self,
        make: M,
    ) -> Result<BlockingFuture<ThreadValue<T>>>
    where
        M: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<LoopValue<T>>> + 'static,
        T: Clone + Send + 'static,
    {
        self.spawn_unit(make, into_thread_value)
    }

    fn spawn_unit<M, Fut, R, T, C>(&self, make: M, convert: C) -> Result<BlockingFuture<T>>
    where
        M: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<R>> + 'static,
        C: FnOnce(R) -> T + Send + 'static,
        T: Send + 'static,
    {
        let future = BlockingFuture::new();
        let guard = CancelOnDrop::new(future.clone());

        self.post_running(move || {
            let future = guard.disarm();
            if future.cancelled() {
                trace!("Skipping unit cancelled before it was spawned");
                return;
            }

            let driver = {
                let target = future.clone();
                // Cancels the future if the loop drops the unit midway
                let unsettled = CancelOnDrop::new(future.clone());
                async move {
                    let _unsettled = unsettled;
                    let unit = async move { make().await };
                    if let Some(value) = capture_exceptions_async(&target, unit).await {
                        if target.set_result(convert(value)).is_err() {
                            debug!("Unit finished after its future settled");
                        }
                    }
                }
            };

            let abort = task::spawn_local(driver).abort_handle();
            future.add_done_callback(move |done| {
                if done.cancelled() {
                    abort.abort();
                }
            });
        })?;

        Ok(future)
    }

    /// Runs a cooperative unit and waits for its value with the default
    /// timeout.
    ///
    /// A timeout is reported under `name`, or the unit's type name when no
    /// name is given.
    pub fn await_value<M, Fut, T>(&self, make: M, name: Option<&str>) -> Result<T>
    where
        M: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<T>> + 'static,
        T: Clone + Send + 'static,
    {
        let timeout = self.timeout();
        self.await_submit(make)?
            .result(Some(timeout))
            .map_err(|err| match err {
                BridgeError::Timeout { .. } => BridgeError::Timeout {
                    name: Some(
                        name.map(str::to_owned)
                            .unwrap_or_else(|| type_name::<Fut>().to_owned()),
                    ),
                    timeout,
                },
                other => other,
            })
    }
}

/// Withdraws the queued callback when the caller cancels its future.
///
/// The withdrawal is itself posted, so it can arrive after the callback has
/// started; `set_running` covers that window.
fn forward_cancel<T: Send + 'static>(
    future: &BlockingFuture<T>,
    handle: LoopHandle,
    posted: PostHandle,
) {
    future.add_done_callback(move |done| {
        if done.cancelled() {
            let _ = handle.post(move || posted.cancel());
        }
    });
}

fn drive_loop(
    runtime: Runtime,
    handle: LoopHandle,
    queue: DispatchQueue,
    started: CancelOnDrop<()>,
    name: String,
) -> Runtime {
    debug!(scheduler = %name, thread = ?thread::current().id(), "Loop thread starting");

    let ack = context::enter_loop(handle, || {
        runtime::run_local(&runtime, async move {
            let stop_signal = CooperativeFuture::<BlockingFuture<()>>::new();
            context::install_stop_signal(stop_signal.clone());
            task::spawn_local(queue.run());

            let _ = started.disarm().set_result(());
            stop_signal.await
        })
    });

    debug!(scheduler = %name, "Loop thread exiting");
    match ack {
        Ok(ack) => {
            let _ = ack.set_result(());
        }
        Err(err) => warn!(%err, "Stop signal carried no acknowledgement"),
    }
    runtime
}

impl fmt::Debug for LoopScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoopScheduler")
            .field("name", &self.config.name)
            .field("state", &self.state())
            .field("timeout", &self.config.task_timeout)
            .finish()
    }
}

impl Drop for LoopScheduler {
    fn drop(&mut self) {
        if self.is_running() {
            if let Err(err) = self.stop() {
                warn!(scheduler = %self.config.name, %err, "Failed to stop loop on drop");
            }
        }
        release_runtime(self.lifecycle.get_mut().runtime.take());
    }
}

/// Drops a parked runtime without blocking, so it is safe inside async code.
fn release_runtime(runtime: Option<Runtime>) {
    if let Some(runtime) = runtime {
        runtime.shutdown_background();
    }
}

/// Keeps a scheduler running for a scope; stops it when dropped.
#[must_use = "the scheduler stops as soon as the guard is dropped"]
pub struct SchedulerGuard<'a> {
    scheduler: &'a LoopScheduler,
}

impl Deref for SchedulerGuard<'_> {
    type Target = LoopScheduler;

    fn deref(&self) -> &LoopScheduler {
        self.scheduler
    }
}

impl Drop for SchedulerGuard<'_> {
    fn drop(&mut self) {
        if let Err(err) = self.scheduler.stop() {
            warn!(scheduler = %self.scheduler.name(), %err, "Failed to stop loop at scope exit");
        }
    }
}

//! # Loop/Thread Bridge
//!
//! Lets code on ordinary blocking threads hand work to a single-threaded
//! cooperative loop running on a dedicated worker thread, and wait for the
//! results.
//!
//! ## Overview
//!
//! - [`LoopScheduler`] owns the worker thread and the loop, with `submit`,
//!   `run`, `await_submit` and `await_value` entry points plus scoped-resource
//!   and iteration adapters
//! - [`BlockingFuture`] is the caller-side handle: thread-safe, waitable with
//!   a timeout, cancellable until the work starts
//! - [`CooperativeFuture`] is the loop-side handle: `!Send`, awaited by loop
//!   tasks
//! - the [`bridge`] functions chain one kind onto the other, following values
//!   that are themselves futures ([`LoopValue`] / [`ThreadValue`])
//!
//! ## Example
//!
//! ```
//! use core_bridge::{LoopScheduler, LoopValue};
//! use core_runtime::config::SchedulerConfig;
//!
//! let scheduler = LoopScheduler::new(SchedulerConfig::default()).unwrap();
//!
//! let future = scheduler.submit(|| Ok("hello".len())).unwrap();
//! assert_eq!(future.result(None).unwrap(), 5);
//!
//! // Work may answer with another loop future; callers resolve the chain.
//! let chained = scheduler
//!     .submit_chained(|| {
//!         let inner = core_bridge::CooperativeFuture::new();
//!         inner.set_result(LoopValue::Ready(7)).unwrap();
//!         Ok(LoopValue::Deferred(inner))
//!     })
//!     .unwrap();
//! assert_eq!(chained.resolve(Some(scheduler.timeout())).unwrap(), 7);
//!
//! scheduler.close().unwrap();
//! ```

pub mod adapters;
pub mod blocking;
pub mod bridge;
pub mod capture;
pub mod context;
pub mod cooperative;
pub mod error;
pub mod outcome;
pub mod scheduler;
pub mod value;

pub use adapters::{AsyncIter, AsyncScopedResource, ScopedResource};
pub use blocking::BlockingFuture;
pub use bridge::{
    chain_blocking_to_cooperative, chain_cooperative_to_blocking, into_thread_value, to_blocking,
    to_cooperative,
};
pub use capture::{capture_exceptions, capture_exceptions_async};
pub use context::LoopLocal;
pub use cooperative::CooperativeFuture;
pub use error::{BridgeError, Panicked, Result, TaskError};
pub use outcome::Outcome;
pub use scheduler::{LoopScheduler, SchedulerGuard, SchedulerState};
pub use value::{LoopValue, ThreadValue};

// Re-exported so implementors of `AsyncScopedResource` need no direct dependency.
pub use async_trait::async_trait;

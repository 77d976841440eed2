//! Cooperative loop plumbing for looptray.
//!
//! This crate wraps the Tokio primitives the loop scheduler is built on so
//! that the bridge crate never has to reach into Tokio directly:
//!
//! - `runtime`: building the single-threaded loop runtime and driving a future
//!   to completion inside a `LocalSet`
//! - `dispatch`: the "post a callback onto the loop, from any thread" queue
//! - `task`: spawning `!Send` cooperative units on the loop
//! - `time`: sleeping and timeouts on the loop
//! - `sync`: channels and cancellation tokens
//!
//! # Architecture
//!
//! The loop is a Tokio current-thread runtime driving a `LocalSet` on one
//! dedicated worker thread. Everything that crosses into the loop from another
//! thread does so through [`dispatch::LoopHandle::post`], which is FIFO with
//! respect to the loop's own processing order.
//!
//! # Examples
//!
//! ```rust
//! use core_async::{dispatch, runtime, task};
//!
//! let (handle, queue) = dispatch::channel();
//! let result = runtime::block_on(async move {
//!     task::spawn_local(queue.run());
//!     let (tx, rx) = core_async::sync::oneshot::channel();
//!     handle.post(move || {
//!         let _ = tx.send(42);
//!     })
//!     .unwrap();
//!     rx.await.unwrap()
//! });
//! assert_eq!(result, 42);
//! ```

// Re-export the async entry-point/test macros so downstream crates never need
// direct Tokio dependencies.
pub use core_async_macros::{main, test};

pub mod dispatch;
pub mod runtime;
pub mod sync;
pub mod task;
pub mod time;

pub use dispatch::{LoopHandle, PostError, PostHandle};
pub use task::spawn_local;
pub use time::{sleep, Duration, Instant};

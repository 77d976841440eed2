//! Runtime utilities for the cooperative loop.
//!
//! The loop is always a Tokio current-thread runtime: tasks run one at a time
//! on whichever thread calls into the runtime, and only yield at `.await`
//! points. Loop code is driven through a [`LocalSet`] so that `!Send`
//! cooperative units can be spawned with [`crate::task::spawn_local`].

use std::future::Future;
use std::io;

pub use tokio::runtime::{Builder, Handle, Runtime};
pub use tokio::task::LocalSet;

/// Builds the runtime a loop scheduler drives on its worker thread.
///
/// Timers and I/O are enabled so that cooperative units may sleep or perform
/// network I/O while they run on the loop.
pub fn new_loop_runtime() -> io::Result<Runtime> {
    Builder::new_current_thread().enable_all().build()
}

/// Drives `future` to completion on `runtime` inside a fresh [`LocalSet`],
/// blocking the calling thread.
///
/// This is the call the loop worker thread sits in for its whole running
/// period.
pub fn run_local<F>(runtime: &Runtime, future: F) -> F::Output
where
    F: Future,
{
    LocalSet::new().block_on(runtime, future)
}

/// Runs the provided future to completion on a throwaway loop.
///
/// Used by `#[core_async::test]` and `#[core_async::main]`.
pub fn block_on<F>(future: F) -> F::Output
where
    F: Future,
{
    let runtime = new_loop_runtime()
        .expect("core_async::runtime::block_on: failed to build Tokio runtime");
    run_local(&runtime, future)
}

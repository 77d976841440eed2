//! Spawning cooperative units on the loop.
//!
//! Units spawned here run on the current loop thread only and may therefore
//! hold `!Send` state such as `Rc` or loop-native futures. They must be spawned
//! from inside a running `LocalSet` (the loop worker, or a
//! `#[core_async::test]` body).

pub use tokio::task::{spawn_local, yield_now, AbortHandle, JoinError, JoinHandle};

/// Result type for task operations.
pub type Result<T> = std::result::Result<T, JoinError>;

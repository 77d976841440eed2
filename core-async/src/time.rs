//! Time-related re-exports for code running on the loop.
//!
//! # Examples
//!
//! ```rust
//! use core_async::time::{sleep, Duration, Instant};
//!
//! # core_async::runtime::block_on(async {
//! let start = Instant::now();
//! sleep(Duration::from_millis(5)).await;
//! assert!(start.elapsed() >= Duration::from_millis(5));
//! # });
//! ```

pub use tokio::time::{sleep, timeout, Sleep, Timeout};

pub use std::time::{Duration, Instant};

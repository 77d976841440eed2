//! # looptray
//!
//! Runs a single-threaded cooperative loop on a dedicated worker thread and
//! lets ordinary blocking threads submit work to it and wait for the results.
//!
//! This crate re-exports the public surface of the workspace crates:
//!
//! - [`LoopScheduler`] and the future types from `core-bridge`
//! - [`SchedulerConfig`] and the logging setup from `core-runtime`
//! - the loop plumbing (`dispatch`, `runtime`, `task`, `time`) from `core-async`
//!
//! ```
//! use looptray::{LoopScheduler, SchedulerConfig};
//!
//! let scheduler = LoopScheduler::new(SchedulerConfig::default()).unwrap();
//! let guard = scheduler.enter().unwrap();
//! assert_eq!(guard.run(|| Ok(1 + 1)).unwrap(), 2);
//! ```

pub use core_bridge::*;

pub use core_runtime::config::{SchedulerConfig, SchedulerConfigBuilder};
pub use core_runtime::logging;
pub use core_runtime::Error as RuntimeError;

pub use core_async::{dispatch, runtime, task, time};

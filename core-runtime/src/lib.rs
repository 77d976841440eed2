//! # Core Runtime Module
//!
//! Provides the ambient infrastructure shared by the looptray crates:
//! - Scheduler configuration (builder, environment overrides, validation)
//! - Logging and tracing setup
//! - The configuration/logging error type
//!
//! ## Overview
//!
//! Nothing in here touches the loop itself. `core-bridge` consumes
//! [`config::SchedulerConfig`] when it builds a scheduler, and hosting
//! programs call [`logging::init_logging`] once at startup to see the
//! scheduler's `tracing` output.

pub mod config;
pub mod error;
pub mod logging;

pub use config::{SchedulerConfig, SchedulerConfigBuilder};
pub use error::{Error, Result};

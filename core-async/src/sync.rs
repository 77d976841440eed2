//! Synchronization primitives shared between caller threads and the loop.
//!
//! - Channels come from `tokio::sync` and can be used from both sides: the
//!   sending half never blocks, the receiving half is awaited on the loop.
//! - [`CancellationToken`] is the thread-safe flag the dispatch queue uses to
//!   withdraw a posted callback.
//! - The async [`Mutex`] is the `futures` lock; it guards loop-native state
//!   that is held across `.await` points.

pub use tokio::sync::{mpsc, oneshot};
pub use tokio_util::sync::CancellationToken;

pub use futures::lock::{Mutex, MutexGuard};

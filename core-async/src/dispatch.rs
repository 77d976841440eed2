//! Thread-safe dispatch onto the loop.
//!
//! A [`LoopHandle`] is the only way code outside the loop thread gets work onto
//! it. Posting never blocks: the callback is pushed onto an unbounded FIFO
//! queue which the loop drains from a [`DispatchQueue`] task. Callbacks run one
//! at a time, in the order the queue accepted them, on the loop thread.
//!
//! Every post returns a [`PostHandle`] which can withdraw the callback as long
//! as the loop has not reached it yet. Once the loop has started running a
//! callback, cancelling its handle has no effect.
//!
//! ```rust
//! use core_async::{dispatch, runtime, task};
//! use std::sync::{Arc, Mutex};
//!
//! let (handle, queue) = dispatch::channel();
//! let seen = Arc::new(Mutex::new(Vec::new()));
//!
//! for i in 0..3 {
//!     let seen = seen.clone();
//!     handle.post(move || seen.lock().unwrap().push(i)).unwrap();
//! }
//! handle.post(|| {}).unwrap().cancel();
//! drop(handle);
//!
//! runtime::block_on(queue.run());
//! assert_eq!(*seen.lock().unwrap(), vec![0, 1, 2]);
//! ```

use std::fmt;
use std::panic::{self, AssertUnwindSafe};

use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, trace};

/// A callback posted onto the loop.
pub type Callback = Box<dyn FnOnce() + Send + 'static>;

/// Error returned when the loop no longer accepts callbacks.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum PostError {
    #[error("Loop is not accepting callbacks (dispatch queue closed)")]
    Closed,
}

struct Posted {
    callback: Callback,
    cancel: CancellationToken,
}

/// Creates a connected handle/queue pair.
///
/// The queue side must be driven on the loop thread with
/// [`DispatchQueue::run`]; handles can be cloned and sent anywhere.
pub fn channel() -> (LoopHandle, DispatchQueue) {
    let (sender, receiver) = mpsc::unbounded_channel();
    (LoopHandle { sender }, DispatchQueue { receiver })
}

/// Cloneable, thread-safe handle for posting callbacks onto a loop.
#[derive(Clone)]
pub struct LoopHandle {
    sender: mpsc::UnboundedSender<Posted>,
}

impl LoopHandle {
    /// Posts `callback` to run on the loop thread.
    ///
    /// Safe to call from any thread, including the loop thread itself (the
    /// callback then runs after the current one returns).
    pub fn post<F>(&self, callback: F) -> Result<PostHandle, PostError>
    where
        F: FnOnce() + Send + 'static,
    {
        self.try_post(Box::new(callback))
            .map_err(|_| PostError::Closed)
    }

    /// Like [`post`](Self::post), but hands the callback back when the queue
    /// is closed so the caller can post it elsewhere.
    pub fn try_post(&self, callback: Callback) -> Result<PostHandle, Callback> {
        let cancel = CancellationToken::new();
        self.sender
            .send(Posted {
                callback,
                cancel: cancel.clone(),
            })
            .map_err(|rejected| rejected.0.callback)?;
        Ok(PostHandle { cancel })
    }

    /// Returns `true` once the queue side has gone away.
    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}

impl fmt::Debug for LoopHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoopHandle")
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Best-effort cancellation handle for one posted callback.
#[derive(Clone, Debug)]
pub struct PostHandle {
    cancel: CancellationToken,
}

impl PostHandle {
    /// Withdraws the callback if the loop has not started it yet.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

/// Loop-side end of the dispatch queue.
pub struct DispatchQueue {
    receiver: mpsc::UnboundedReceiver<Posted>,
}

impl DispatchQueue {
    /// Runs posted callbacks until every [`LoopHandle`] has been dropped.
    ///
    /// A panicking callback is logged and the queue keeps going; nothing a
    /// callback does can take the loop down.
    pub async fn run(mut self) {
        while let Some(posted) = self.receiver.recv().await {
            if posted.cancel.is_cancelled() {
                trace!("Skipping cancelled loop callback");
                continue;
            }
            if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(posted.callback)) {
                error!(
                    panic = %panic_message(payload.as_ref()),
                    "Loop callback panicked"
                );
            }
        }
        trace!("Dispatch queue closed");
    }
}

/// Extracts the message of a panic payload, if it carries one.
pub fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "Box<dyn Any>".to_string()
    }
}

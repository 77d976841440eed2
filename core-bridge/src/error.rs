use std::any::Any;
use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use core_async::dispatch::{panic_message, PostError};
use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum BridgeError {
    #[error("{} after {} seconds", timeout_label(.name), .timeout.as_secs_f64())]
    Timeout {
        name: Option<String>,
        timeout: Duration,
    },

    #[error("Future was cancelled")]
    Cancelled,

    #[error("{0}")]
    Task(TaskError),

    #[error("Scheduler is already running")]
    AlreadyRunning,

    #[error("Scheduler is closed")]
    Closed,

    #[error("Loop is not running")]
    NotRunning,

    #[error("Operation would block the loop thread it is waiting on")]
    OnLoopThread,

    #[error("Loop thread failed to start: {0}")]
    StartFailed(String),

    #[error("Loop thread panicked: {0}")]
    LoopPanicked(String),

    #[error("Future is already settled")]
    InvalidState,

    #[error("No loop is bound to the current thread")]
    NoLoop,

    #[error("Loop-local value accessed from a thread other than its loop")]
    WrongThread,

    #[error("Failed to build loop runtime: {0}")]
    Runtime(String),

    #[error(transparent)]
    Config(#[from] core_runtime::Error),
}

fn timeout_label(name: &Option<String>) -> &str {
    name.as_deref().unwrap_or("Timed out")
}

impl BridgeError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, BridgeError::Timeout { .. })
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, BridgeError::Cancelled)
    }

    /// The execution error carried by a `Task` error, if this is one.
    pub fn task_error(&self) -> Option<&TaskError> {
        match self {
            BridgeError::Task(error) => Some(error),
            _ => None,
        }
    }
}

impl From<PostError> for BridgeError {
    fn from(_: PostError) -> Self {
        BridgeError::NotRunning
    }
}

impl From<TaskError> for BridgeError {
    fn from(error: TaskError) -> Self {
        BridgeError::Task(error)
    }
}

pub type Result<T> = std::result::Result<T, BridgeError>;

/// Error raised by caller-supplied work.
///
/// Captured where the work runs and stored on the future that represents it;
/// cloning is cheap so every holder of the future can retrieve it. Panics are
/// captured into the same type (see [`TaskError::is_panic`]).
#[derive(Clone)]
pub struct TaskError {
    inner: Arc<anyhow::Error>,
}

/// Payload of a [`TaskError`] created from a caught panic.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("task panicked: {message}")]
pub struct Panicked {
    pub message: String,
}

impl TaskError {
    pub fn new<E>(error: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        Self::from(anyhow::Error::new(error))
    }

    pub fn msg<M>(message: M) -> Self
    where
        M: fmt::Display + fmt::Debug + Send + Sync + 'static,
    {
        Self::from(anyhow::Error::msg(message))
    }

    pub fn panicked(message: impl Into<String>) -> Self {
        Self::new(Panicked {
            message: message.into(),
        })
    }

    /// Converts a payload caught with `catch_unwind` into a task error.
    pub fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        Self::panicked(panic_message(payload.as_ref()))
    }

    pub fn is_panic(&self) -> bool {
        self.inner.is::<Panicked>()
    }

    pub fn downcast_ref<E>(&self) -> Option<&E>
    where
        E: fmt::Display + fmt::Debug + Send + Sync + 'static,
    {
        self.inner.downcast_ref::<E>()
    }

    pub fn as_anyhow(&self) -> &anyhow::Error {
        &self.inner
    }
}

impl From<anyhow::Error> for TaskError {
    fn from(error: anyhow::Error) -> Self {
        Self {
            inner: Arc::new(error),
        }
    }
}

impl From<BridgeError> for TaskError {
    fn from(error: BridgeError) -> Self {
        match error {
            BridgeError::Task(inner) => inner,
            other => Self::new(other),
        }
    }
}

impl fmt::Display for TaskError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&*self.inner, f)
    }
}

impl fmt::Debug for TaskError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&*self.inner, f)
    }
}

impl StdError for TaskError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        let inner: &(dyn StdError + 'static) = (*self.inner).as_ref();
        inner.source()
    }
}

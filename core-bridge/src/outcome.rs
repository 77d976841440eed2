use crate::error::{BridgeError, Result, TaskError};

/// How a settled future ended.
#[derive(Debug, Clone)]
pub enum Outcome<T> {
    Value(T),
    Failed(TaskError),
    Cancelled,
}

impl<T> Outcome<T> {
    pub fn is_value(&self) -> bool {
        matches!(self, Outcome::Value(_))
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Outcome::Cancelled)
    }

    pub fn error(&self) -> Option<&TaskError> {
        match self {
            Outcome::Failed(error) => Some(error),
            _ => None,
        }
    }

    pub fn map<U, F>(self, f: F) -> Outcome<U>
    where
        F: FnOnce(T) -> U,
    {
        match self {
            Outcome::Value(value) => Outcome::Value(f(value)),
            Outcome::Failed(error) => Outcome::Failed(error),
            Outcome::Cancelled => Outcome::Cancelled,
        }
    }

    /// Converts into the result a waiter observes.
    pub fn into_result(self) -> Result<T> {
        match self {
            Outcome::Value(value) => Ok(value),
            Outcome::Failed(error) => Err(BridgeError::Task(error)),
            Outcome::Cancelled => Err(BridgeError::Cancelled),
        }
    }
}

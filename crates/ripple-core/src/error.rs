#![forbid(unsafe_code)]

//! Error type shared by the engine and its collaborators.

use thiserror::Error;

use crate::subscriber::SubscriberId;

pub type Result<T> = std::result::Result<T, ReactiveError>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReactiveError {
    #[error("subscriber {subscriber} failed to update: {message}")]
    UpdateFailed {
        subscriber: SubscriberId,
        message: String,
    },

    #[error("subscriber {subscriber} panicked during update: {message}")]
    UpdatePanicked {
        subscriber: SubscriberId,
        message: String,
    },

    #[error("evaluation stack underflow: pop_active called with no active entry")]
    StackUnderflow,

    #[error("cannot mutate a frozen value")]
    FrozenValue,

    #[error("index {index} out of bounds for list of length {len}")]
    IndexOutOfBounds { index: usize, len: usize },

    #[error("watcher callback failed: {message}")]
    Callback { message: String },
}

impl ReactiveError {
    #[must_use]
    pub fn update_failed(subscriber: SubscriberId, message: impl Into<String>) -> Self {
        Self::UpdateFailed {
            subscriber,
            message: message.into(),
        }
    }

    #[must_use]
    pub fn callback(message: impl Into<String>) -> Self {
        Self::Callback {
            message: message.into(),
        }
    }

    /// Build an [`UpdatePanicked`](Self::UpdatePanicked) from a caught panic payload.
    #[must_use]
    pub fn from_panic(subscriber: SubscriberId, payload: &(dyn std::any::Any + Send)) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "non-string panic payload".to_string()
        };
        Self::UpdatePanicked {
            subscriber,
            message,
        }
    }
}

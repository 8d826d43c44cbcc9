//! Error payload carried by [`Event::Error`](crate::Event::Error).

use std::fmt;
use std::sync::Arc;

use thiserror::Error;

/// Shared, type-erased error produced by a source or user callback.
pub type BoxedError = Arc<dyn std::error::Error + Send + Sync + 'static>;

/// Failure flowing through a stream as an ordinary event.
///
/// Cloning is cheap: foreign errors are held behind an [`Arc`].
#[derive(Debug, Clone, Error)]
pub enum StreamError {
    /// Failure produced by a source or user callback.
    #[error("{0}")]
    Source(BoxedError),

    /// Plain-text failure.
    #[error("{0}")]
    Message(String),

    /// Two or more joined sources failed before every slot held a value.
    #[error("{} sources failed: {}", .0.len(), JointList(.0))]
    Joint(Vec<SlotError>),

    /// A user closure panicked. The panic message is preserved.
    #[error("callback panicked: {0}")]
    Panicked(String),

    /// A weakly held referent was released.
    #[error("referent was released")]
    Released,
}

impl StreamError {
    /// Wrap any error type.
    pub fn new<E>(error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Source(Arc::new(error))
    }

    /// A plain-text error.
    pub fn msg(message: impl Into<String>) -> Self {
        Self::Message(message.into())
    }

    /// Combine per-slot failures.
    ///
    /// A single cause is returned as itself; only two or more produce
    /// [`StreamError::Joint`].
    pub fn joint(mut errors: Vec<SlotError>) -> Self {
        if errors.len() == 1 {
            if let Some(only) = errors.pop() {
                return only.error;
            }
        }
        Self::Joint(errors)
    }

    /// Causes of a joint failure, or an empty slice.
    pub fn causes(&self) -> &[SlotError] {
        match self {
            Self::Joint(causes) => causes,
            _ => &[],
        }
    }

    /// Downcast a [`StreamError::Source`] to its concrete type.
    pub fn downcast_ref<E: std::error::Error + 'static>(&self) -> Option<&E> {
        match self {
            Self::Source(inner) => inner.downcast_ref::<E>(),
            _ => None,
        }
    }
}

impl From<String> for StreamError {
    fn from(message: String) -> Self {
        Self::Message(message)
    }
}

impl From<&str> for StreamError {
    fn from(message: &str) -> Self {
        Self::Message(message.to_owned())
    }
}

/// One failed input of a join, identified by its position.
#[derive(Debug, Clone)]
pub struct SlotError {
    pub index: usize,
    pub error: StreamError,
}

impl fmt::Display for SlotError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}: {}", self.index, self.error)
    }
}

struct JointList<'a>(&'a [SlotError]);

impl fmt::Display for JointList<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, cause) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{cause}")?;
        }
        Ok(())
    }
}

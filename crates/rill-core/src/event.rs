//! The value/error tag delivered to listeners.

use crate::error::StreamError;

/// One item of a stream: either a value or an error.
///
/// Errors are ordinary events. They travel through the same operators as
/// values and may be mapped, filtered or resolved back into values.
#[derive(Debug, Clone)]
pub enum Event<T> {
    Value(T),
    Error(StreamError),
}

impl<T> Event<T> {
    pub fn is_value(&self) -> bool {
        matches!(self, Self::Value(_))
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error(_))
    }

    pub fn value(&self) -> Option<&T> {
        match self {
            Self::Value(v) => Some(v),
            Self::Error(_) => None,
        }
    }

    pub fn error(&self) -> Option<&StreamError> {
        match self {
            Self::Value(_) => None,
            Self::Error(e) => Some(e),
        }
    }

    pub fn into_value(self) -> Option<T> {
        match self {
            Self::Value(v) => Some(v),
            Self::Error(_) => None,
        }
    }

    /// Transform the value, leaving an error untouched.
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Event<U> {
        match self {
            Self::Value(v) => Event::Value(f(v)),
            Self::Error(e) => Event::Error(e),
        }
    }

    /// Transform the value with a fallible function.
    pub fn and_then<U>(self, f: impl FnOnce(T) -> Result<U, StreamError>) -> Event<U> {
        match self {
            Self::Value(v) => f(v).into(),
            Self::Error(e) => Event::Error(e),
        }
    }

    pub fn into_result(self) -> Result<T, StreamError> {
        match self {
            Self::Value(v) => Ok(v),
            Self::Error(e) => Err(e),
        }
    }
}

impl<T> From<Result<T, StreamError>> for Event<T> {
    fn from(result: Result<T, StreamError>) -> Self {
        match result {
            Ok(v) => Self::Value(v),
            Err(e) => Self::Error(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn map_keeps_errors() {
        let ev: Event<i32> = Event::Error(StreamError::msg("x"));
        let mapped = ev.map(|v| v * 2);
        assert!(mapped.is_error());

        let ev = Event::Value(4).map(|v| v * 2);
        assert_eq!(ev.into_value(), Some(8));
    }

    #[test]
    fn and_then_converts_failure() {
        let ev = Event::Value(3).and_then(|v| {
            if v > 2 {
                Err(StreamError::msg("too big"))
            } else {
                Ok(v)
            }
        });
        assert_eq!(ev.error().map(ToString::to_string).as_deref(), Some("too big"));
    }

    #[test]
    fn result_round_trip() {
        let ev: Event<u8> = Ok(1).into();
        assert_eq!(ev.into_result().ok(), Some(1));
    }
}

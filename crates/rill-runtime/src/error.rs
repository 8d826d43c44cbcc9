#![forbid(unsafe_code)]

//! Construction errors for runtime stages.

use thiserror::Error;

/// Invalid parameters passed when building an operator.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("{stage} buffer size must be greater than zero")]
    ZeroBufferSize { stage: &'static str },
}

pub type Result<T> = std::result::Result<T, ConfigError>;

pub(crate) fn non_zero(size: usize, stage: &'static str) -> Result<usize> {
    if size == 0 {
        return Err(ConfigError::ZeroBufferSize { stage });
    }
    Ok(size)
}

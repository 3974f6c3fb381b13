use std::io;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, EmberError>;

#[derive(Debug, Error)]
pub enum EmberError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("configuration error: {0}")]
    Config(String),
    #[error("corruption detected: {0}")]
    Corruption(&'static str),
    #[error("invalid argument: {0}")]
    Invalid(&'static str),
    #[error("unsupported operation: {0}")]
    Unsupported(&'static str),
    #[error("engine failed: {0}")]
    Engine(String),
}

impl EmberError {
    /// Clones the error for fan-out to several waiters. `io::Error` is not
    /// `Clone`, so the kind and message are preserved textually.
    pub(crate) fn duplicate(&self) -> EmberError {
        match self {
            EmberError::Io(err) => EmberError::Io(io::Error::new(err.kind(), err.to_string())),
            EmberError::Config(msg) => EmberError::Config(msg.clone()),
            EmberError::Corruption(msg) => EmberError::Corruption(msg),
            EmberError::Invalid(msg) => EmberError::Invalid(msg),
            EmberError::Unsupported(msg) => EmberError::Unsupported(msg),
            EmberError::Engine(msg) => EmberError::Engine(msg.clone()),
        }
    }
}

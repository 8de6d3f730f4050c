//! Error taxonomy for postedit.
//!
//! Stage failures are not errors: they are recorded as data in the pipeline
//! run. The variants here cover everything that stops the pipeline before
//! any stage could execute.

/// Errors from the state store backing the debounce controller.
#[derive(Debug, thiserror::Error)]
pub enum StateError {
    #[error("invalid state key: {0}")]
    InvalidKey(String),

    #[error("corrupt state value for key {key}: {reason}")]
    Corrupt { key: String, reason: String },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// postedit domain errors.
#[derive(Debug, thiserror::Error)]
pub enum PosteditError {
    #[error("invalid configuration: {key}: {reason}")]
    Config { key: String, reason: String },

    #[error("setup error: {0}")]
    Setup(String),

    #[error("git error: {0}")]
    Git(String),

    #[error("trigger error: {0}")]
    Trigger(String),

    #[error("state error: {0}")]
    State(#[from] StateError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl PosteditError {
    pub(crate) fn config(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Config {
            key: key.into(),
            reason: reason.into(),
        }
    }
}

/// Result type for postedit domain operations.
pub type Result<T> = std::result::Result<T, PosteditError>;

use std::time::Duration;

use thiserror::Error;

/// Pool lifecycle and misuse errors. Exhaustion is not an error: acquire waits.
#[derive(Debug, Error)]
pub enum PoolError {
    #[error("Invalid pool configuration: {0}")]
    InvalidConfig(String),

    #[error("No generator instance could be created ({attempted} attempted): {last_error}")]
    NoInstances { attempted: usize, last_error: String },

    #[error("Pool is not initialized")]
    NotInitialized,

    #[error("Pool is already initialized")]
    AlreadyInitialized,

    #[error("Pool has been disposed")]
    Disposed,

    #[error("Acquire was cancelled")]
    Cancelled,

    #[error("No healthy instance became available after {0} attempts")]
    Unavailable(usize),
}

/// A single failed generation. Recoverable: callers turn it into a message.
#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("Failed to start inference process '{executable}': {reason}")]
    Spawn { executable: String, reason: String },

    #[error("I/O error while reading inference output: {0}")]
    Io(String),

    #[error("Inference output never contained the assistant marker")]
    MarkerNotFound,

    #[error("Inference timed out after {0:?}")]
    Timeout(Duration),

    #[error("Inference produced an empty answer")]
    EmptyAnswer,

    #[error("Inference process exited with {status}: {stderr}")]
    ProcessFailed { status: String, stderr: String },

    #[error("Inference process was shut down")]
    Shutdown,
}

//! Error types for host operations.

use runtime_api::{Code, RuntimeError};

/// Errors raised by the host while creating or driving matches.
///
/// Every variant maps onto a status [`Code`] so failures can be handed back
/// to plugin code as a [`RuntimeError`].
#[derive(Debug, thiserror::Error)]
pub enum HostError {
    /// No running match has this ID
    #[error("Match not found: {0}")]
    MatchNotFound(String),
    /// No match handler is registered under this module name
    #[error("Match module not found: {0}")]
    ModuleNotFound(String),
    /// The match is terminating and no longer accepts this request
    #[error("Match is stopping: {0}")]
    MatchStopping(String),
    /// The match's queue is full
    #[error("Match queue full: {0}")]
    QueueFull(String),
    /// Init asked for a tick rate outside the allowed range
    #[error("Invalid tick rate {tick_rate}, expected 1..={max}")]
    InvalidTickRate { tick_rate: u32, max: u32 },
    /// A label exceeds the configured limit
    #[error("Match label is {len} bytes, limit is {max}")]
    LabelTooLong { len: usize, max: usize },
    /// The handler's init callback failed
    #[error("Match init failed: {0}")]
    InitFailed(RuntimeError),
    /// Host settings are unusable
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
    /// A runtime error raised by plugin code
    #[error(transparent)]
    Runtime(#[from] RuntimeError),
}

impl HostError {
    /// Status code reported for this error.
    pub fn code(&self) -> Code {
        match self {
            HostError::MatchNotFound(_) | HostError::ModuleNotFound(_) => Code::NotFound,
            HostError::MatchStopping(_) => Code::FailedPrecondition,
            HostError::QueueFull(_) => Code::ResourceExhausted,
            HostError::InvalidTickRate { .. }
            | HostError::LabelTooLong { .. }
            | HostError::InvalidConfig(_) => Code::InvalidArgument,
            HostError::InitFailed(err) | HostError::Runtime(err) => err.code(),
        }
    }
}

impl From<HostError> for RuntimeError {
    fn from(err: HostError) -> Self {
        match err {
            HostError::InitFailed(inner) | HostError::Runtime(inner) => inner,
            other => RuntimeError::new(other.code(), other.to_string()),
        }
    }
}

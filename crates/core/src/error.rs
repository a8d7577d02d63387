use thiserror::Error;

/// Classification used by the worker runtime to decide ack/nack/DLQ routing.
///
/// Every fallible operation in the fabric ultimately resolves to one of these
/// kinds so retry decisions never depend on string matching (see the error
/// handling design: validation, transient-external, permanent-external,
/// deadline, poison).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    TransientExternal,
    PermanentExternal,
    Deadline,
    Poison,
}

impl ErrorKind {
    /// Whether a failure of this kind should be retried (nack+requeue) rather
    /// than routed straight to the DLQ.
    pub fn retryable(self) -> bool {
        matches!(self, ErrorKind::TransientExternal | ErrorKind::Deadline)
    }
}

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("transient failure: {0}")]
    Transient(String),

    #[error("permanent failure: {0}")]
    Permanent(String),

    #[error("deadline exceeded after {0:?}")]
    Deadline(std::time::Duration),

    #[error("poison message: {0}")]
    Poison(String),

    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl PipelineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PipelineError::Validation(_) | PipelineError::Serialize(_) => ErrorKind::Validation,
            PipelineError::Transient(_) | PipelineError::Io(_) => ErrorKind::TransientExternal,
            PipelineError::Permanent(_) | PipelineError::Other(_) => ErrorKind::PermanentExternal,
            PipelineError::Deadline(_) => ErrorKind::Deadline,
            PipelineError::Poison(_) => ErrorKind::Poison,
        }
    }
}

use thiserror::Error;

/// Errors from a generator call, already classified as transient (worth
/// retrying) or not.
#[derive(Debug, Error)]
pub enum GeneratorError {
    #[error("generator call timed out")]
    Timeout,
    #[error("transient generator failure: {0}")]
    Transient(String),
    #[error("generator rejected the request: {0}")]
    Permanent(String),
    #[error("http transport error: {0}")]
    Http(#[from] reqwest::Error),
}

impl GeneratorError {
    pub fn is_transient(&self) -> bool {
        match self {
            GeneratorError::Timeout | GeneratorError::Transient(_) => true,
            GeneratorError::Permanent(_) => false,
            GeneratorError::Http(e) => !e.is_status() || e.status().is_some_and(|s| s.is_server_error()),
        }
    }
}

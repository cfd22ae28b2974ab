use thiserror::Error;

/// Unified error type for the runner
#[derive(Error, Debug)]
pub enum RunnerError {
    // Pool errors
    #[error("Proxy pool is empty: no usable entries in the supplied or fallback lists")]
    EmptyPool,

    #[error("No proxies available")]
    NoProxyAvailable,

    #[error("Invalid proxy line: {0}")]
    InvalidProxyLine(String),

    #[error("Proxy not found: {0}")]
    ProxyNotFound(String),

    // Network errors
    #[error("Proxy connection failed: {0}")]
    ProxyConnectionFailed(String),

    #[error("Probe failed: {0}")]
    ProbeFailed(String),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Operation timed out")]
    Timeout,

    // Run errors
    #[error("Circuit breaker tripped after {consecutive_failures} consecutive failures")]
    CircuitBreakerTripped { consecutive_failures: u32 },

    // Configuration errors
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),

    // Collaborator errors
    #[error("Outcome sink error: {0}")]
    Sink(String),

    #[error("Collaborator not ready: {0}")]
    NotReady(String),

    // I/O errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // Internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias for runner operations
pub type Result<T> = std::result::Result<T, RunnerError>;

impl RunnerError {
    /// Errors that end a run and cross the orchestrator boundary
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            RunnerError::EmptyPool
                | RunnerError::InvalidConfig(_)
                | RunnerError::MissingEnvVar(_)
                | RunnerError::NotReady(_)
                | RunnerError::CircuitBreakerTripped { .. }
        )
    }

    /// Errors that are recorded against a proxy and retried with another one
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            RunnerError::ProxyConnectionFailed(_)
                | RunnerError::ProbeFailed(_)
                | RunnerError::Http(_)
                | RunnerError::Timeout
        )
    }
}

impl From<http::Error> for RunnerError {
    fn from(err: http::Error) -> Self {
        RunnerError::Http(err.to_string())
    }
}

impl From<url::ParseError> for RunnerError {
    fn from(err: url::ParseError) -> Self {
        RunnerError::InvalidConfig(format!("invalid URL: {}", err))
    }
}

//! Consumer error types

use thiserror::Error;

use crate::repository::RepositoryError;

/// Error code for a read or ack against a group that does not exist
pub(crate) const NOGROUP: &str = "NOGROUP";

/// Result type for consumer operations
pub type ConsumerResult<T> = Result<T, ConsumerError>;

/// Consumer error types
#[derive(Error, Debug)]
pub enum ConsumerError {
    /// Redis client errors
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// Stream unreachable or misbehaving outside the Redis client
    #[error("Transport error: {0}")]
    Transport(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Measurement could not be persisted; the message stays unacknowledged
    #[error("Persistence error: {0}")]
    Persistence(#[from] RepositoryError),
}

impl ConsumerError {
    /// Check if error is retryable
    pub fn is_retryable(&self) -> bool {
        match self {
            ConsumerError::Redis(e) => !matches!(
                e.kind(),
                redis::ErrorKind::InvalidClientConfig | redis::ErrorKind::AuthenticationFailed
            ),
            ConsumerError::Transport(_) => true,
            ConsumerError::Persistence(_) => true,
            ConsumerError::Config(_) => false,
        }
    }

    /// Get error severity
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            ConsumerError::Config(_) => ErrorSeverity::Fatal,
            ConsumerError::Redis(_) if !self.is_retryable() => ErrorSeverity::Fatal,
            ConsumerError::Redis(_) | ConsumerError::Transport(_) => ErrorSeverity::Warning,
            ConsumerError::Persistence(_) => ErrorSeverity::Error,
        }
    }

    /// The stream or its consumer group is gone (`NOGROUP`), e.g. after the
    /// key was deleted or Redis restarted without persistence
    pub fn is_missing_group(&self) -> bool {
        match self {
            ConsumerError::Redis(e) => e.code() == Some(NOGROUP) || e.to_string().contains(NOGROUP),
            ConsumerError::Transport(msg) => msg.starts_with(NOGROUP),
            _ => false,
        }
    }

    /// Whether the error came from the stream rather than from processing
    pub fn is_transport(&self) -> bool {
        matches!(self, ConsumerError::Redis(_) | ConsumerError::Transport(_))
    }
}

/// Error severity levels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorSeverity {
    /// Warnings that don't stop processing
    Warning,
    /// Errors that may be retried
    Error,
    /// Fatal errors that stop the consumer
    Fatal,
}

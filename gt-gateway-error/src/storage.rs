use thiserror::Error;

/// Errors raised by the session persistence layer.
///
/// The registry treats every one of these as a degradation, never as a
/// connection-fatal condition: reads fall back to the in-process indices
/// and writes are logged and retried on the next activity touch.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),
    #[error("session record serialization failed: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("storage backend unavailable: {0}")]
    Unavailable(String),
}

pub mod storage;

use anyhow::Error as AnyhowError;
use config::ConfigError;
use serde_json::Error as SerdeJsonError;
use std::io::Error as IoError;
use storage::StorageError;
use thiserror::Error;
use tokio::task::JoinError;

pub type GtResult<T, E = GtError> = Result<T, E>;
pub type StorageResult<T, E = StorageError> = Result<T, E>;

/// Top-level error type for the gateway binary and core services.
///
/// Protocol-level errors stay inside `gt-gateway-protocol`; they are
/// contained by the per-connection worker and never bubble up here.
#[derive(Debug, Error)]
pub enum GtError {
    #[error("{0}")]
    Msg(String),
    #[error("{0}")]
    Io(#[from] IoError),
    #[error("{0}")]
    Json(#[from] SerdeJsonError),
    #[error("{0}")]
    Config(#[from] ConfigError),
    #[error("{0}")]
    Join(#[from] JoinError),
    #[error("{0}")]
    Storage(#[from] StorageError),
    #[error("{0}")]
    Anyhow(#[from] AnyhowError),
    #[error("initialization error: {0}")]
    Initialization(String),
    #[error("shutdown error: {0}")]
    Shutdown(String),
}

impl From<String> for GtError {
    #[inline]
    fn from(e: String) -> Self {
        GtError::Msg(e)
    }
}

impl From<&str> for GtError {
    #[inline]
    fn from(e: &str) -> Self {
        GtError::Msg(e.to_string())
    }
}

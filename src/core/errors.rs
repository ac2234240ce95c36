use thiserror::Error;
use super::types::TaskId;

#[derive(Error, Debug)]
pub enum QueueError {
    #[error("IO error {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("HTTP error {0}")]
    Http(#[from] reqwest::Error),

    #[error("Transfer failed: {0}")]
    Transfer(String),

    #[error("Record creation failed: {0}")]
    Record(String),

    #[error("not authenticated")]
    NotAuthenticated,

    #[error("Upload was cancelled")]
    Cancelled,

    #[error("Task not found: {0}")]
    TaskNotFound(TaskId),

    #[error("Invalid transition from {from} to {to}")]
    InvalidTransition {
        from: &'static str,
        to: &'static str,
    },

    #[error("Corrupted task unit: {0}")]
    Corrupted(String),

    #[error("Config error: {0}")]
    Config(String),
}

impl QueueError {
    pub fn transfer(message: impl Into<String>) -> Self {
        Self::Transfer(message.into())
    }

    pub fn record(message: impl Into<String>) -> Self {
        Self::Record(message.into())
    }

    pub fn corrupted(message: impl Into<String>) -> Self {
        Self::Corrupted(message.into())
    }
}

/// Error alias
pub type Result<T, E = QueueError> = std::result::Result<T, E>;

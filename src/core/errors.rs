use thiserror::Error;

use super::types::{BulkItemError, TaskId, TaskStatus};

#[derive(Error, Debug)]
pub enum QueueError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Remote error: status {status}, message: {message}")]
    Remote { status: u16, message: String },

    #[error("Transfer failed: {0}")]
    Transfer(String),

    #[error("Retries exhausted for task {0}")]
    RetriesExhausted(TaskId),

    #[error("Task not found: {0}")]
    TaskNotFound(TaskId),

    #[error("Task {0} is uploading and cannot be removed")]
    TaskInFlight(TaskId),

    #[error("Task {id} cannot be retried from state {status:?}")]
    NotRetryable { id: TaskId, status: TaskStatus },

    #[error("Bulk operation failed for all {} item(s)", failed.len())]
    FatalBatch { failed: Vec<BulkItemError> },

    #[error("Config error: {0}")]
    Config(#[from] toml::de::Error),

    #[error("Manager shutdown")]
    ManagerShutdown,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl QueueError {
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }
}

/// Error alias
pub type Result<T, E = QueueError> = std::result::Result<T, E>;

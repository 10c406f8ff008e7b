use bridge_traits::BridgeError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Sync task {task_id} not found")]
    TaskNotFound { task_id: String },

    #[error("Sync cancelled")]
    Cancelled,

    #[error("{mode} mode cannot {operation}")]
    ModeViolation {
        mode: &'static str,
        operation: &'static str,
    },

    #[error("Handler {handler} declares no action bindings")]
    NoBindings { handler: &'static str },

    #[error("Invalid task ID: {0}")]
    InvalidTaskId(String),

    #[error("Invalid sync mode: {0}")]
    InvalidMode(String),

    #[error("Invalid sync status: {0}")]
    InvalidStatus(String),

    #[error("Invalid sync trigger: {0}")]
    InvalidTrigger(String),

    #[error("Bridge error: {0}")]
    Bridge(#[from] BridgeError),

    #[error("Configuration error: {0}")]
    Config(#[from] core_runtime::Error),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Migration error: {0}")]
    Migration(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Sync task panicked: {0}")]
    Panicked(String),

    #[error("Sync worker stopped before reporting a result")]
    WorkerStopped,
}

/// Rejection of a queue request by the sync manager.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QueueError {
    #[error("A sync task is already active: {task_id}")]
    TaskActive { task_id: String },

    #[error("Sync queue is full")]
    QueueFull,

    #[error("Sync manager is shutting down")]
    ShuttingDown,
}

pub type Result<T> = std::result::Result<T, SyncError>;

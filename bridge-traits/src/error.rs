use thiserror::Error;

#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("Bridge capability not available: {0}")]
    NotAvailable(String),

    #[error("Bridge operation failed: {0}")]
    OperationFailed(String),

    #[error("Item not found: {0}")]
    NotFound(String),

    #[error("Request rejected with status {status}: {message}")]
    Rejected { status: u16, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl BridgeError {
    /// Whether retrying the same call later may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            BridgeError::Rejected { status, .. } => *status == 429 || *status >= 500,
            BridgeError::Io(_) | BridgeError::OperationFailed(_) => true,
            BridgeError::NotAvailable(_) | BridgeError::NotFound(_) => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, BridgeError>;

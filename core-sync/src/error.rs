use bridge_traits::BridgeError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Source system error: {0}")]
    Source(#[source] BridgeError),

    #[error("Destination store error: {0}")]
    Destination(#[source] BridgeError),

    #[error("Cycle detected in project hierarchy at project {project_id}")]
    HierarchyCycle { project_id: String },

    #[error("Project {project_id} references unknown parent {parent_id}")]
    UnknownParent {
        project_id: String,
        parent_id: String,
    },

    #[error("Item {item_id} references unknown project {project_id}")]
    UnknownProject { item_id: String, project_id: String },

    #[error("Invalid sync state document {key}: {message}")]
    InvalidState { key: String, message: String },

    #[error("Staging error: {0}")]
    Staging(#[from] std::io::Error),

    #[error("Worker failure: {0}")]
    Worker(String),

    #[error("Sync timeout after {0} seconds")]
    Timeout(u64),

    #[error("Sync aborted: {0}")]
    Aborted(String),

    #[error("Invalid input for {field}: {message}")]
    InvalidInput { field: String, message: String },
}

impl SyncError {
    /// Authentication failures on either side end the whole run.
    pub fn is_fatal(&self) -> bool {
        match self {
            SyncError::Source(e) | SyncError::Destination(e) => e.is_fatal(),
            SyncError::Aborted(_) => true,
            _ => false,
        }
    }

    /// Whether another attempt of the same operation can succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Source(e) | SyncError::Destination(e) => {
                !e.is_fatal() && !e.is_not_found()
            }
            SyncError::Staging(_) | SyncError::Worker(_) => true,
            _ => false,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            SyncError::Source(e) | SyncError::Destination(e) if e.is_not_found()
        )
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Configuration error: {0}")]
    Config(#[from] core_runtime::Error),

    #[error("Sync error: {0}")]
    Sync(#[from] core_sync::SyncError),

    #[error("Bridge error: {0}")]
    Bridge(#[from] bridge_traits::BridgeError),
}

impl CoreError {
    /// Authentication failures anywhere end the run.
    pub fn is_fatal(&self) -> bool {
        match self {
            CoreError::Config(_) => false,
            CoreError::Sync(e) => e.is_fatal(),
            CoreError::Bridge(e) => e.is_fatal(),
        }
    }
}

pub type Result<T> = std::result::Result<T, CoreError>;

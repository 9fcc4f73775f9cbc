use hub_config::ConfigError;
use thiserror::Error;

/// Event manager errors
#[derive(Debug, Error)]
pub enum ManagerError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("a publisher is already configured")]
    PublisherAlreadySet,
}

/// Result type for manager operations
pub type ManagerResult<T> = Result<T, ManagerError>;

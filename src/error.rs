use crate::{config::ConfigError, logging::LoggingError, server::LifecycleError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum HandoverError {
    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Logging(#[from] LoggingError),

    #[error("failed to install signal handlers: {0}")]
    Signal(#[source] std::io::Error),
}

//! # Backend Assembly Errors

use thiserror::Error;

use crate::auth::AuthError;
use crate::config::ConfigError;
use crate::resolver::RegistryError;

pub type BackendResult<T> = Result<T, BackendError>;

/// Failure to assemble the backend from its configuration
#[derive(Debug, Error)]
pub enum BackendError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("User pool setup failed: {0}")]
    Auth(#[from] AuthError),

    #[error("API registration failed: {0}")]
    Registry(#[from] RegistryError),
}

impl BackendError {
    pub fn code(&self) -> &'static str {
        match self {
            BackendError::Config(e) => e.code(),
            BackendError::Auth(e) => e.code(),
            BackendError::Registry(_) => "REGISTRY_ERROR",
        }
    }
}

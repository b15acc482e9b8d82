//! Caller-facing error type

use crate::config::ConfigError;
use crate::providers::error::{ErrorKind, ProviderError};
use thiserror::Error;

/// Result type for client operations
pub type UllmResult<T> = Result<T, UllmError>;

/// Everything a client call can fail with
#[derive(Debug, Error)]
pub enum UllmError {
    /// `provider/model` named a provider that is not registered
    #[error("Provider '{provider}' is not supported (model: {model})")]
    UnsupportedProvider { provider: String, model: String },

    /// A bare model name matched no known provider pattern
    #[error("Could not determine provider from model: {model}")]
    ProviderNotFound { model: String },

    /// The request itself is malformed, caught before resolution
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// A classified provider failure
    #[error(transparent)]
    Provider(#[from] ProviderError),

    /// Client configuration could not be loaded or is invalid
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl UllmError {
    /// The classified kind; resolution and request errors count as bad requests
    pub fn kind(&self) -> ErrorKind {
        match self {
            UllmError::Provider(error) => error.kind,
            UllmError::UnsupportedProvider { .. }
            | UllmError::ProviderNotFound { .. }
            | UllmError::InvalidRequest(_)
            | UllmError::Config(_) => ErrorKind::BadRequest,
        }
    }

    /// Provider tag associated with the failure, if any
    pub fn provider(&self) -> Option<&str> {
        match self {
            UllmError::Provider(error) => error.provider.as_deref(),
            UllmError::UnsupportedProvider { provider, .. } => Some(provider),
            _ => None,
        }
    }

    /// Borrow the inner provider error
    pub fn as_provider_error(&self) -> Option<&ProviderError> {
        match self {
            UllmError::Provider(error) => Some(error),
            _ => None,
        }
    }
}

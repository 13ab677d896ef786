use std::io;
use thiserror::Error;

use crate::fileutil::PayloadError;

/// Error code reported when the provider could not be reached or answered
/// with something other than a domain error.
pub const GRPC_PROVIDER_ERROR: &str = "GRPCProviderError";
/// Error code reported when the mount response could not be applied locally.
pub const FILE_WRITE_ERROR: &str = "FileWriteError";
/// Error code reported for provider names that fail validation.
pub const INVALID_PROVIDER: &str = "InvalidProvider";
/// Error code reported when no socket exists for the provider.
pub const PROVIDER_NOT_FOUND: &str = "ProviderNotFound";

/// Main error type for provider client operations
#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("invalid provider: provider {0:?}")]
    InvalidProvider(String),

    #[error("provider not found: provider {0:?}")]
    ProviderNotFound(String),

    #[error("provider communication failed: {0}")]
    Transport(Box<tonic::Status>),

    #[error("mount request failed with provider error code {0}")]
    Provider(String),

    #[error("missing object versions")]
    MissingObjectVersions,

    #[error("failed to write mount payload: {0}")]
    FileWrite(#[source] PayloadError),

    #[error("provider server error: {0}")]
    Server(#[from] tonic::transport::Error),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl ProviderError {
    /// Classification code for this error.
    ///
    /// Domain failures return the provider's own code so callers can branch
    /// on plugin-specific semantics; everything else maps to one of the
    /// constants in this module.
    pub fn code(&self) -> &str {
        match self {
            ProviderError::InvalidProvider(_) => INVALID_PROVIDER,
            ProviderError::ProviderNotFound(_) => PROVIDER_NOT_FOUND,
            ProviderError::Transport(_) => GRPC_PROVIDER_ERROR,
            ProviderError::Provider(code) => code,
            ProviderError::MissingObjectVersions => GRPC_PROVIDER_ERROR,
            ProviderError::FileWrite(_) => FILE_WRITE_ERROR,
            ProviderError::Server(_) => GRPC_PROVIDER_ERROR,
            ProviderError::Io(_) => GRPC_PROVIDER_ERROR,
        }
    }

    /// True when the error came from the provider's domain logic rather
    /// than from connectivity or local processing.
    pub fn is_provider_error(&self) -> bool {
        matches!(self, ProviderError::Provider(_))
    }
}

impl From<tonic::Status> for ProviderError {
    fn from(status: tonic::Status) -> Self {
        ProviderError::Transport(Box::new(status))
    }
}

/// Result type alias for provider client operations
pub type Result<T> = std::result::Result<T, ProviderError>;

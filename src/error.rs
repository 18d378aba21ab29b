//! Error types for CodeForge

use thiserror::Error;

/// Result type alias using CodeForge's Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for CodeForge
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Sandbox could not be created (engine start failed, resources exhausted)
    #[error("Provision error: {0}")]
    Provision(String),

    /// Language image is not present on the engine
    #[error("Image not found: {0}")]
    ImageNotFound(String),

    /// Copying a file into a sandbox failed
    #[error("Transfer error: {0}")]
    Transfer(String),

    /// Command dispatch failed (as opposed to the command exiting non-zero)
    #[error("Exec error: {0}")]
    Exec(String),

    /// Reading a file back out of a sandbox failed
    #[error("Read error: {0}")]
    Read(String),

    /// Raw container engine error
    #[error("Container error: {0}")]
    Container(String),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Operation not supported for the requested language
    #[error("Unsupported: {0}")]
    Unsupported(String),

    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Unauthorized access
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Generic internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Check if the error means "the thing is absent"
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_))
    }

    /// Check if error is a client error (user's fault)
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Error::InvalidInput(_)
                | Error::NotFound(_)
                | Error::Unsupported(_)
                | Error::Unauthorized(_)
        )
    }
}

impl From<bollard::errors::Error> for Error {
    fn from(err: bollard::errors::Error) -> Self {
        match err {
            bollard::errors::Error::DockerResponseServerError {
                status_code: 404,
                message,
            } => Error::NotFound(message),
            other => Error::Container(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_404_maps_to_not_found() {
        let err: Error = bollard::errors::Error::DockerResponseServerError {
            status_code: 404,
            message: "No such container: code-session-x".to_string(),
        }
        .into();
        assert!(err.is_not_found());

        let err: Error = bollard::errors::Error::DockerResponseServerError {
            status_code: 500,
            message: "boom".to_string(),
        }
        .into();
        assert!(matches!(err, Error::Container(_)));
    }

    #[test]
    fn test_client_errors() {
        assert!(Error::Unsupported("verify".into()).is_client_error());
        assert!(!Error::Provision("engine down".into()).is_client_error());
    }
}

//! Common error types for Integrator.

use thiserror::Error;

/// Top-level error type for Integrator operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Secrets or settings are missing, unreadable, malformed or incomplete.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Token acquisition failed.
    #[error("Authentication error: {0}")]
    Authentication(String),

    /// The request never produced a response (connect, TLS, timeout).
    #[error("Network error: {0}")]
    Network(String),

    /// The API answered with a non-success status.
    #[error("API error {status}: {message}")]
    Api { status: u16, message: String },

    /// Resource not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// The API answered with a body that could not be interpreted.
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// Invalid input provided.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// I/O operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization or deserialization failed.
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl Error {
    /// Whether this error came from a REST call (transport failure, non-2xx
    /// status or malformed response body).
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            Error::Network(_) | Error::Api { .. } | Error::NotFound(_) | Error::InvalidResponse(_)
        )
    }

    /// HTTP status carried by the error, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            Error::Api { status, .. } => Some(*status),
            Error::NotFound(_) => Some(404),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

/// Result type alias using the common Error.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_classification() {
        assert!(Error::Network("reset".to_string()).is_transport());
        assert!(Error::NotFound("item".to_string()).is_transport());
        assert!(Error::Api {
            status: 500,
            message: "boom".to_string()
        }
        .is_transport());
        assert!(!Error::Config("CLIENT_ID".to_string()).is_transport());
        assert!(!Error::Authentication("denied".to_string()).is_transport());
    }

    #[test]
    fn test_status() {
        assert_eq!(Error::NotFound("x".to_string()).status(), Some(404));
        assert_eq!(
            Error::Api {
                status: 409,
                message: "conflict".to_string()
            }
            .status(),
            Some(409)
        );
        assert_eq!(Error::Network("x".to_string()).status(), None);
    }

    #[test]
    fn test_display() {
        let err = Error::Api {
            status: 403,
            message: "Access denied".to_string(),
        };
        assert_eq!(err.to_string(), "API error 403: Access denied");
    }
}

//! Common error types for davsync.

use thiserror::Error;

/// Top-level error type for davsync operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Remote store unreachable or protocol failure.
    #[error("Transport error: {0}")]
    Transport(String),

    /// Remote path does not exist. Distinguished from other transport
    /// failures so existence checks can tell "absent" from "unreachable".
    #[error("Not found: {0}")]
    NotFound(String),

    /// Local filesystem open/create/rename/stat failure.
    #[error("Local I/O error: {0}")]
    LocalIo(#[from] std::io::Error),

    /// Directory listing failure, fatal to the subtree being listed.
    #[error("Enumeration error: {0}")]
    Enumeration(String),

    /// All retry attempts failed; wraps the last underlying error.
    #[error("Operation failed after {attempts} attempts: {source}")]
    TransferExhausted {
        attempts: u32,
        #[source]
        source: Box<Error>,
    },

    /// Invalid configuration or input.
    #[error("Invalid config: {0}")]
    InvalidConfig(String),
}

impl Error {
    /// Whether this error means "the path does not exist", as opposed to a
    /// transport or I/O failure.
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::NotFound(_) => true,
            Self::LocalIo(e) => e.kind() == std::io::ErrorKind::NotFound,
            _ => false,
        }
    }
}

/// Result type alias using the common Error.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_is_distinguishable() {
        assert!(Error::NotFound("x".to_string()).is_not_found());
        assert!(!Error::Transport("x".to_string()).is_not_found());

        let io = Error::LocalIo(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "missing",
        ));
        assert!(io.is_not_found());
    }

    #[test]
    fn test_exhausted_reports_attempts_and_cause() {
        let err = Error::TransferExhausted {
            attempts: 3,
            source: Box::new(Error::Transport("connection reset".to_string())),
        };
        let msg = err.to_string();
        assert!(msg.contains("3 attempts"));
        assert!(msg.contains("connection reset"));
    }
}

// Error types for the Midlight versioning engine.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum MidlightError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid format: {0}")]
    InvalidFormat(String),

    #[error("Not initialized: {0}")]
    NotInitialized(String),

    #[error("Precondition failed: {0}")]
    Precondition(String),

    #[error("Unsafe path: {0}")]
    PathUnsafe(String),
}

pub type Result<T> = std::result::Result<T, MidlightError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_messages_are_stable() {
        assert_eq!(
            MidlightError::NotFound("checkpoint cp-1".into()).to_string(),
            "Not found: checkpoint cp-1"
        );
        assert_eq!(
            MidlightError::PathUnsafe("../escape.md".into()).to_string(),
            "Unsafe path: ../escape.md"
        );
    }

    #[test]
    fn io_error_converts_via_from() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let err: MidlightError = io_err.into();
        assert!(matches!(err, MidlightError::Io(_)));
    }
}

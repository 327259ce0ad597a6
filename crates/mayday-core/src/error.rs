//! Error types for the backend bridges.

use thiserror::Error;

/// Result type alias for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors from the remote collaborators (classifier, geocoding, dispatch)
/// and the device position source.
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Classifier error: {0}")]
    Classifier(String),

    #[error("Geocoding error: {0}")]
    Geocoding(String),

    #[error("Dispatch error: {0}")]
    Broadcast(String),

    #[error("Position error: {0}")]
    Position(String),

    #[error("Timed out waiting for {0}")]
    Timeout(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl CoreError {
    /// Geocoding failures are recoverable by design (coordinate-text fallback);
    /// classifier and dispatch failures keep the session open for a retry.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, CoreError::Config(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_detail() {
        let e = CoreError::Broadcast("503 from dispatch".to_string());
        assert!(e.to_string().contains("503"));
    }

    #[test]
    fn config_errors_are_not_recoverable() {
        assert!(!CoreError::Config("missing url".into()).is_recoverable());
        assert!(CoreError::Classifier("boom".into()).is_recoverable());
    }
}

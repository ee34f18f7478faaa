// Stepwise Core - Error types
//
// A single error enum covers every failure the engine can surface. The
// variants follow the engine's recovery classes: configuration errors are
// fatal at definition time, navigation/state errors are returned to the
// caller with the instance untouched, and persistence errors are reported
// out-of-band while in-memory state stays authoritative.

use thiserror::Error;

/// Result alias used across all Stepwise crates
pub type FlowResult<T> = Result<T, FlowError>;

/// Errors raised by flow definitions, instances, and persistence
#[derive(Debug, Error)]
pub enum FlowError {
    /// Malformed flow definition or resolver contract violation
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid branch target or navigation past a terminal step
    #[error("Navigation error: {0}")]
    Navigation(String),

    /// Operation not allowed in the instance's current lifecycle state
    #[error("State error: {0}")]
    State(String),

    /// Storage I/O or encoding failure
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// Persisted record no longer matches the flow definition
    #[error("Stale data: {0}")]
    StaleData(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Coarse error classes, mirroring how callers are expected to react
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Config,
    Navigation,
    State,
    Persistence,
    StaleData,
}

impl FlowError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn navigation(msg: impl Into<String>) -> Self {
        Self::Navigation(msg.into())
    }

    pub fn state(msg: impl Into<String>) -> Self {
        Self::State(msg.into())
    }

    pub fn persistence(msg: impl Into<String>) -> Self {
        Self::Persistence(msg.into())
    }

    pub fn stale(msg: impl Into<String>) -> Self {
        Self::StaleData(msg.into())
    }

    /// Classify the error. Encoding and I/O failures count as persistence
    /// errors; YAML failures only occur while loading flow documents.
    pub fn kind(&self) -> ErrorKind {
        match self {
            FlowError::Config(_) | FlowError::Yaml(_) => ErrorKind::Config,
            FlowError::Navigation(_) => ErrorKind::Navigation,
            FlowError::State(_) => ErrorKind::State,
            FlowError::Persistence(_) | FlowError::Serialization(_) | FlowError::Io(_) => {
                ErrorKind::Persistence
            }
            FlowError::StaleData(_) => ErrorKind::StaleData,
        }
    }

    /// Whether the instance remains usable after this error
    pub fn is_recoverable(&self) -> bool {
        !matches!(self.kind(), ErrorKind::Config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds() {
        assert_eq!(FlowError::config("x").kind(), ErrorKind::Config);
        assert_eq!(FlowError::navigation("x").kind(), ErrorKind::Navigation);
        assert_eq!(FlowError::state("x").kind(), ErrorKind::State);
        assert_eq!(FlowError::stale("x").kind(), ErrorKind::StaleData);

        let io = FlowError::from(std::io::Error::new(std::io::ErrorKind::Other, "disk"));
        assert_eq!(io.kind(), ErrorKind::Persistence);
    }

    #[test]
    fn test_recoverability() {
        assert!(!FlowError::config("bad start").is_recoverable());
        assert!(FlowError::navigation("terminal").is_recoverable());
        assert!(FlowError::persistence("quota").is_recoverable());
    }

    #[test]
    fn test_display() {
        let err = FlowError::navigation("step 'done' is terminal");
        assert_eq!(err.to_string(), "Navigation error: step 'done' is terminal");
    }
}

use thiserror::Error;

/// SOCI wrapper error types
#[derive(Error, Debug)]
pub enum SociError {
    /// Invocation arguments are malformed
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Image manifest cannot be indexed (wrong shape or media type)
    #[error("Manifest validation failed: {0}")]
    InvalidManifest(String),

    /// Scratch workspace could not be created or destroyed
    #[error("Scratch workspace error: {path} - {message}")]
    ResourceError { path: String, message: String },

    /// One of the storage handles failed to initialize
    #[error("Storage initialization error: {store} - {message}")]
    StorageInitError { store: String, message: String },

    /// Content store, layout or metadata database operation failed
    #[error("Storage error: {0}")]
    StorageError(String),

    /// Container registry error
    #[error("Registry error: {registry} - {message}")]
    RegistryError { registry: String, message: String },

    /// Index builder failed or produced nothing
    #[error("Index build error: {0}")]
    BuildError(String),

    /// Cancellation signal observed while a stage was running
    #[error("Cancelled during {0}")]
    Cancelled(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// I/O error
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),
}

/// How an invoker should treat a failed invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// Input can never succeed; report success so retriers stop.
    Skip,
    /// Unrecoverable without operator action.
    Terminal,
    /// Re-running the whole invocation may succeed.
    Retryable,
}

impl SociError {
    /// Classify this error for the invoker.
    pub fn class(&self) -> FailureClass {
        match self {
            SociError::InvalidManifest(_) => FailureClass::Skip,
            SociError::RegistryError { .. } | SociError::Cancelled(_) => FailureClass::Retryable,
            _ => FailureClass::Terminal,
        }
    }

    /// Whether an external invoker is expected to retry.
    pub fn is_retryable(&self) -> bool {
        self.class() == FailureClass::Retryable
    }
}

impl From<serde_json::Error> for SociError {
    fn from(err: serde_json::Error) -> Self {
        SociError::SerializationError(err.to_string())
    }
}

/// Result type alias for SOCI wrapper operations
pub type Result<T> = std::result::Result<T, SociError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_manifest_display() {
        let error = SociError::InvalidManifest("unsupported media type".to_string());
        assert_eq!(
            error.to_string(),
            "Manifest validation failed: unsupported media type"
        );
    }

    #[test]
    fn test_resource_error_display() {
        let error = SociError::ResourceError {
            path: "/tmp".to_string(),
            message: "No space left on device".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "Scratch workspace error: /tmp - No space left on device"
        );
    }

    #[test]
    fn test_storage_init_error_display() {
        let error = SociError::StorageInitError {
            store: "artifacts.db".to_string(),
            message: "corrupt file".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "Storage initialization error: artifacts.db - corrupt file"
        );
    }

    #[test]
    fn test_registry_error_display() {
        let error = SociError::RegistryError {
            registry: "123456789012.dkr.ecr.us-west-2.amazonaws.com".to_string(),
            message: "Authentication failed".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "Registry error: 123456789012.dkr.ecr.us-west-2.amazonaws.com - Authentication failed"
        );
    }

    #[test]
    fn test_cancelled_display() {
        let error = SociError::Cancelled("pull".to_string());
        assert_eq!(error.to_string(), "Cancelled during pull");
    }

    #[test]
    fn test_class_skip() {
        let error = SociError::InvalidManifest("index without linux/amd64".to_string());
        assert_eq!(error.class(), FailureClass::Skip);
        assert!(!error.is_retryable());
    }

    #[test]
    fn test_class_retryable() {
        let registry = SociError::RegistryError {
            registry: "r".to_string(),
            message: "503".to_string(),
        };
        assert_eq!(registry.class(), FailureClass::Retryable);
        assert!(SociError::Cancelled("build".to_string()).is_retryable());
    }

    #[test]
    fn test_class_terminal() {
        assert_eq!(
            SociError::BuildError("no SOCI indices found".to_string()).class(),
            FailureClass::Terminal
        );
        assert_eq!(
            SociError::StorageError("disk full".to_string()).class(),
            FailureClass::Terminal
        );
        assert_eq!(
            SociError::ResourceError {
                path: "/tmp".to_string(),
                message: "read-only".to_string(),
            }
            .class(),
            FailureClass::Terminal
        );
    }

    #[test]
    fn test_io_error_conversion() {
        let io_error = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let error: SociError = io_error.into();
        assert!(matches!(error, SociError::IoError(_)));
        assert!(error.to_string().contains("file not found"));
    }

    #[test]
    fn test_serde_json_error_conversion() {
        let result: std::result::Result<serde_json::Value, _> = serde_json::from_str("{ bad");
        let error: SociError = result.unwrap_err().into();
        assert!(matches!(error, SociError::SerializationError(_)));
    }
}

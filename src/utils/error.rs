use std::path::PathBuf;

/// Error type shared by the scaler, the persistence layer and both detectors
#[derive(Debug, thiserror::Error)]
pub enum AnalysisError {
    /// Validation errors (e.g., empty feature matrix, column mismatch, bad option name)
    #[error("ValidationError: {0}")]
    ValidationError(String),
    /// Model training/prediction errors
    #[error("ModelError: {0}")]
    ModelError(String),
    /// Unknown detector tag handed to the factory
    #[error("invalid anomaly detector type: {0}")]
    InvalidDetectorType(String),
    /// An operation needed a model that was neither built nor loaded
    #[error("model not built or loaded: {0}")]
    ModelNotBuilt(String),
    /// Detection was attempted before a threshold was determined or restored
    #[error("anomaly threshold has not been determined")]
    ThresholdNotSet,
    /// The persisted scaler could not be loaded
    #[error("scaler unavailable at {}", path.display())]
    ScalerUnavailable { path: PathBuf },
    #[error("io error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl AnalysisError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        AnalysisError::Io {
            path: path.into(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = AnalysisError::ValidationError("test error".to_string());
        assert_eq!(err.to_string(), "ValidationError: test error");

        let err = AnalysisError::ModelError("model test".to_string());
        assert_eq!(err.to_string(), "ModelError: model test");

        let err = AnalysisError::InvalidDetectorType("isolation_forest".to_string());
        assert_eq!(
            err.to_string(),
            "invalid anomaly detector type: isolation_forest"
        );

        let err = AnalysisError::ScalerUnavailable {
            path: PathBuf::from("velocity_scaler.pkl"),
        };
        assert_eq!(err.to_string(), "scaler unavailable at velocity_scaler.pkl");
    }

    #[test]
    fn test_io_error_keeps_path() {
        let err = AnalysisError::io(
            "GMM_location.pkl",
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        );
        assert!(err.to_string().contains("GMM_location.pkl"));
        assert!(err.to_string().contains("denied"));
    }

    #[test]
    fn test_error_is_send_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}
        assert_send::<AnalysisError>();
        assert_sync::<AnalysisError>();
    }
}

//! Error taxonomy for the scoring service

use thiserror::Error;

/// Failure raised by an inference backend while producing a probability.
#[derive(Debug, Clone, Error, PartialEq)]
#[error("{0}")]
pub struct InferenceError(pub String);

impl InferenceError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// Service-level errors, one variant per failure class the API reports.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// A required external identifier or token is absent.
    #[error("{0} is not configured")]
    Configuration(String),

    /// A status, signature or info file is absent on disk.
    #[error("{0} not found")]
    ArtifactMissing(String),

    #[error("Inference failed: {0}")]
    Inference(#[from] InferenceError),

    /// Fetching a fresh artifact from remote storage failed.
    #[error("Download failed: {0}")]
    Download(String),

    /// A downloaded artifact could not be turned into a backend.
    #[error("Load failed: {0}")]
    Load(String),
}

impl ServiceError {
    /// Stable machine-readable code used in API error payloads.
    pub fn code(&self) -> &'static str {
        match self {
            ServiceError::Configuration(_) => "configuration_error",
            ServiceError::ArtifactMissing(_) => "artifact_missing",
            ServiceError::Inference(_) => "inference_error",
            ServiceError::Download(_) => "download_error",
            ServiceError::Load(_) => "load_error",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = ServiceError::Configuration("HF_REPO_ID".to_string());
        assert_eq!(err.to_string(), "HF_REPO_ID is not configured");
        assert_eq!(err.code(), "configuration_error");

        let err: ServiceError = InferenceError::new("bad tensor").into();
        assert_eq!(err.to_string(), "Inference failed: bad tensor");
        assert_eq!(err.code(), "inference_error");
    }
}

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("API error {status}: {message}")]
    Api { status: u16, message: String },

    #[error("Storage upload failed for {file_name}: {reason}")]
    StorageUploadFailed { file_name: String, reason: String },

    #[error("Screenshot metadata write failed for {file_name} (stored at {url}): {reason}")]
    MetadataWriteFailed {
        file_name: String,
        url: String,
        reason: String,
    },

    #[error("Invalid upload target {experiment}/{variation}: {reason}")]
    InvalidTarget {
        experiment: String,
        variation: u32,
        reason: String,
    },

    #[error("Timed out during {phase}")]
    Timeout { phase: String },

    #[error("Invalid file type: {name}. Only image files are supported.")]
    InvalidFileType { name: String },

    #[error("File too large: {name} ({size} bytes, maximum is {limit} bytes)")]
    FileTooLarge { name: String, size: u64, limit: u64 },

    #[error("Validation error: {field} - {message}")]
    Validation { field: String, message: String },

    #[error("Configuration error: {0}")]
    Config(String),
}

/// Custom result type
pub type AppResult<T> = Result<T, AppError>;

/// Coarse classification of a per-file failure, as shown on the drop target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailureKind {
    StorageUploadFailed,
    MetadataWriteFailed,
    Timeout,
    Other,
}

impl AppError {
    pub fn validation(field: &str, message: &str) -> Self {
        Self::Validation {
            field: field.to_string(),
            message: message.to_string(),
        }
    }

    pub fn invalid_target(experiment: &str, variation: u32, reason: &str) -> Self {
        Self::InvalidTarget {
            experiment: experiment.to_string(),
            variation,
            reason: reason.to_string(),
        }
    }

    pub fn storage_upload_failed(file_name: &str, cause: impl std::fmt::Display) -> Self {
        Self::StorageUploadFailed {
            file_name: file_name.to_string(),
            reason: cause.to_string(),
        }
    }

    pub fn metadata_write_failed(
        file_name: &str,
        url: &str,
        cause: impl std::fmt::Display,
    ) -> Self {
        Self::MetadataWriteFailed {
            file_name: file_name.to_string(),
            url: url.to_string(),
            reason: cause.to_string(),
        }
    }

    pub fn timeout(phase: &str) -> Self {
        Self::Timeout {
            phase: phase.to_string(),
        }
    }

    pub fn kind(&self) -> FailureKind {
        match self {
            AppError::StorageUploadFailed { .. } => FailureKind::StorageUploadFailed,
            AppError::MetadataWriteFailed { .. } => FailureKind::MetadataWriteFailed,
            AppError::Timeout { .. } => FailureKind::Timeout,
            _ => FailureKind::Other,
        }
    }
}

/// A single file's pipeline failure. Never aggregated with sibling outcomes.
#[derive(Error, Debug)]
#[error("Upload failed for file #{index} ({file_name}): {error}")]
pub struct UploadFailed {
    pub index: usize,
    pub file_name: String,
    #[source]
    pub error: AppError,
}

impl UploadFailed {
    pub fn kind(&self) -> FailureKind {
        self.error.kind()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_classification() {
        let storage = AppError::storage_upload_failed("a.png", "bucket unavailable");
        let metadata = AppError::metadata_write_failed("a.png", "https://cdn/a.png", "403");

        assert_eq!(storage.kind(), FailureKind::StorageUploadFailed);
        assert_eq!(metadata.kind(), FailureKind::MetadataWriteFailed);
        assert_eq!(AppError::timeout("storage upload").kind(), FailureKind::Timeout);
        assert_eq!(AppError::Config("x".into()).kind(), FailureKind::Other);
    }

    #[test]
    fn test_upload_failed_message_includes_cause() {
        let failed = UploadFailed {
            index: 1,
            file_name: "shot.png".to_string(),
            error: AppError::storage_upload_failed("shot.png", "connection reset"),
        };

        let message = failed.to_string();
        assert!(message.contains("#1"));
        assert!(message.contains("connection reset"));
        assert_eq!(failed.kind(), FailureKind::StorageUploadFailed);
    }
}

pub mod commands;
pub mod config;
pub mod database;
pub mod errors;
pub mod image_processor;
pub mod security;
pub mod uploader;

pub use commands::{DropZone, PendingFile, UploadEvent, UploadResult, UploadTarget};
pub use errors::{AppError, AppResult, FailureKind, UploadFailed};
pub use uploader::{ScreenshotUploader, Submission, SubmissionProgress};

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, watch};

use crate::errors::{AppError, AppResult, FailureKind, UploadFailed};
use crate::image_processor;
use crate::security::InputValidator;
use crate::uploader::progress_tracker::Submission;
use crate::uploader::ScreenshotUploader;

/// Where a screenshot belongs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadTarget {
    pub experiment: String,
    pub variation: u32,
}

impl UploadTarget {
    pub fn new(experiment: impl Into<String>, variation: u32) -> Self {
        Self {
            experiment: experiment.into(),
            variation,
        }
    }

    pub fn screenshot_path(&self) -> String {
        format!(
            "/experiment/{}/variation/{}/screenshot",
            self.experiment, self.variation
        )
    }
}

/// A dropped file, owned by its pipeline until it settles.
#[derive(Clone, PartialEq, Eq)]
pub struct PendingFile {
    pub name: String,
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

impl std::fmt::Debug for PendingFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingFile")
            .field("name", &self.name)
            .field("mime_type", &self.mime_type)
            .field("len", &self.bytes.len())
            .finish()
    }
}

impl PendingFile {
    pub fn new(name: impl Into<String>, mime_type: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            mime_type: mime_type.into(),
            bytes,
        }
    }

    pub async fn from_path(file_path: impl AsRef<Path>) -> AppResult<Self> {
        let file_path = file_path.as_ref();
        let bytes = tokio::fs::read(file_path).await?;
        let name = InputValidator::sanitize_filename(
            &file_path.file_name().unwrap_or_default().to_string_lossy(),
        );

        let mime_type = image_processor::detect_mime_type(&bytes, &name)
            .ok_or_else(|| AppError::InvalidFileType { name: name.clone() })?;

        Ok(Self {
            name,
            mime_type,
            bytes,
        })
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// What the completion callback receives for each successful file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadResult {
    pub path: String,
    pub description: String,
}

/// Body recorded against the target after storage succeeds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScreenshotRecord {
    pub url: String,
    pub description: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct FailedUpload {
    pub index: usize,
    pub file_name: String,
    pub kind: FailureKind,
    pub error: String,
}

impl From<&UploadFailed> for FailedUpload {
    fn from(failed: &UploadFailed) -> Self {
        Self {
            index: failed.index,
            file_name: failed.file_name.clone(),
            kind: failed.kind(),
            error: failed.error.to_string(),
        }
    }
}

/// Per-file notifications for whoever renders the drop target.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "phase", rename_all = "snake_case")]
pub enum UploadEvent {
    Started {
        submission_id: String,
        index: usize,
        file_name: String,
    },
    Completed {
        submission_id: String,
        index: usize,
        file_name: String,
        url: String,
    },
    Failed {
        submission_id: String,
        failure: FailedUpload,
    },
}

pub type SuccessCallback = Arc<dyn Fn(u32, UploadResult) + Send + Sync>;

/// Headless drop target: forwards drops, reports busy and per-file failures.
///
/// Failures are collected only for drops made through this zone, even when
/// several zones share one uploader.
pub struct DropZone {
    uploader: Arc<ScreenshotUploader>,
    target: UploadTarget,
    on_success: SuccessCallback,
    failures_tx: mpsc::UnboundedSender<FailedUpload>,
    failures: Mutex<mpsc::UnboundedReceiver<FailedUpload>>,
}

impl DropZone {
    pub fn new<F>(uploader: Arc<ScreenshotUploader>, target: UploadTarget, on_success: F) -> Self
    where
        F: Fn(u32, UploadResult) + Send + Sync + 'static,
    {
        let (failures_tx, failures) = mpsc::unbounded_channel();
        Self {
            uploader,
            target,
            on_success: Arc::new(on_success),
            failures_tx,
            failures: Mutex::new(failures),
        }
    }

    pub fn on_files_dropped(&self, files: Vec<PendingFile>) -> AppResult<Submission> {
        if files.is_empty() {
            return Err(AppError::validation("files", "Nothing was dropped"));
        }

        let on_success = self.on_success.clone();
        Ok(self.uploader.submit_reporting(
            files,
            self.target.clone(),
            move |variation, result| on_success(variation, result),
            self.failures_tx.clone(),
        ))
    }

    pub fn is_busy(&self) -> bool {
        self.uploader.in_flight().is_busy()
    }

    /// Receiver notified on every in-flight change; busy is `*rx.borrow() > 0`.
    pub fn busy_watch(&self) -> watch::Receiver<usize> {
        self.uploader.in_flight().subscribe()
    }

    /// Failures of this zone's drops reported since the previous call.
    pub fn drain_failures(&self) -> Vec<FailedUpload> {
        let mut failures = Vec::new();
        let mut receiver = match self.failures.lock() {
            Ok(receiver) => receiver,
            Err(e) => {
                log::error!("Failed to acquire drop zone failure lock (non-critical): {}", e);
                return failures;
            }
        };

        while let Ok(failure) = receiver.try_recv() {
            failures.push(failure);
        }

        failures
    }
}

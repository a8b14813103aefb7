use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;

use super::upload_queue::{report_failure, FailureSink};
use crate::commands::{FailedUpload, UploadResult};
use crate::errors::{FailureKind, UploadFailed};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Active,
    Completed,
    CompletedWithFailures,
}

/// Outcome of one drop event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmissionProgress {
    pub submission_id: String,
    pub total_files: usize,
    pub completed: usize,
    pub successful_uploads: Vec<UploadResult>,
    pub failed_uploads: Vec<FailedUpload>,
    pub session_status: SessionStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(skip)]
    recorded: HashSet<usize>,
}

impl SubmissionProgress {
    pub fn new(submission_id: String, total_files: usize) -> Self {
        Self {
            submission_id,
            total_files,
            completed: 0,
            successful_uploads: Vec::new(),
            failed_uploads: Vec::new(),
            session_status: SessionStatus::Active,
            started_at: Utc::now(),
            finished_at: None,
            recorded: HashSet::new(),
        }
    }

    pub fn has_failures(&self) -> bool {
        !self.failed_uploads.is_empty()
    }
}

pub type ProgressState = Arc<Mutex<SubmissionProgress>>;

/// Safe progress state update
pub fn safe_progress_update<F>(progress_state: &ProgressState, operation: &str, f: F) -> bool
where
    F: FnOnce(&mut SubmissionProgress),
{
    match progress_state.lock() {
        Ok(mut progress) => {
            f(&mut progress);
            true
        }
        Err(e) => {
            log::error!(
                "Failed to acquire progress lock for {} (non-critical): {}",
                operation,
                e
            );
            false
        }
    }
}

/// Mark a file upload as successful. Returns false if file `index` already
/// had an outcome.
pub fn update_progress_success(
    progress_state: &ProgressState,
    index: usize,
    result: UploadResult,
) -> bool {
    let mut recorded = false;
    safe_progress_update(progress_state, "success update", |progress| {
        if !progress.recorded.insert(index) {
            return;
        }
        recorded = true;
        progress.completed += 1;
        log::info!(
            "Progress: Uploaded {} ({}/{})",
            result.path,
            progress.completed,
            progress.total_files
        );
        progress.successful_uploads.push(result);
    });
    recorded
}

/// Mark a file upload as failed. Returns false if the file already had an
/// outcome.
pub fn update_progress_failure(progress_state: &ProgressState, failure: FailedUpload) -> bool {
    let mut recorded = false;
    safe_progress_update(progress_state, "failure update", |progress| {
        if !progress.recorded.insert(failure.index) {
            return;
        }
        recorded = true;
        progress.completed += 1;
        log::warn!(
            "Progress: Failed to upload {} - {} ({}/{})",
            failure.file_name,
            failure.error,
            progress.completed,
            progress.total_files
        );
        progress.failed_uploads.push(failure);
    });
    recorded
}

/// Mark submission as settled
pub fn mark_session_completed(progress_state: &ProgressState) {
    safe_progress_update(progress_state, "mark completed", |progress| {
        progress.session_status = if progress.failed_uploads.is_empty() {
            SessionStatus::Completed
        } else {
            SessionStatus::CompletedWithFailures
        };
        progress.finished_at = Some(Utc::now());

        log::info!(
            "Submission {} settled: {}/{} successful, {} failed",
            progress.submission_id,
            progress.successful_uploads.len(),
            progress.total_files,
            progress.failed_uploads.len()
        );
    });
}

pub(crate) type PipelineHandle = JoinHandle<Result<UploadResult, UploadFailed>>;

/// Handle to the pipelines launched by one `submit` call.
///
/// Dropping it detaches the pipelines; they keep running and still settle the
/// in-flight counter.
pub struct Submission {
    id: String,
    handles: Vec<(usize, String, PipelineHandle)>,
    progress: ProgressState,
    failures: Option<FailureSink>,
}

impl Submission {
    pub(crate) fn new(
        id: String,
        handles: Vec<(usize, String, PipelineHandle)>,
        progress: ProgressState,
        failures: Option<FailureSink>,
    ) -> Self {
        Self {
            id,
            handles,
            progress,
            failures,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Snapshot of the report so far.
    pub fn progress(&self) -> Option<SubmissionProgress> {
        self.progress.lock().ok().map(|progress| progress.clone())
    }

    /// Wait for every pipeline and return the final report.
    pub async fn settle(self) -> SubmissionProgress {
        for (index, file_name, handle) in self.handles {
            // Outcomes are recorded by the pipelines themselves; only a task that
            // never got to record one needs handling here.
            let join_error = match handle.await {
                Ok(_) => continue,
                Err(join_error) => join_error,
            };

            let failure = FailedUpload {
                index,
                file_name,
                kind: FailureKind::Other,
                error: format!("Pipeline task did not finish: {}", join_error),
            };
            if update_progress_failure(&self.progress, failure.clone()) {
                log::error!(
                    "Pipeline for file #{} ({}) did not finish: {}",
                    index,
                    failure.file_name,
                    join_error
                );
                report_failure(self.failures.as_ref(), &failure);
            } else {
                log::warn!(
                    "Completion callback for file #{} ({}) panicked: {}",
                    index,
                    failure.file_name,
                    join_error
                );
            }
        }

        mark_session_completed(&self.progress);

        match self.progress.lock() {
            Ok(progress) => progress.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

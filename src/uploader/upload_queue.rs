use std::future::Future;
use std::sync::{Arc, Mutex};
use tokio::sync::{broadcast, mpsc};
use tokio::time::Duration;

use super::api_client::{put_json, ApiTransport};
use super::in_flight::InFlightCounter;
use super::progress_tracker::*;
use super::storage::StorageBackend;
use crate::commands::{
    FailedUpload, PendingFile, ScreenshotRecord, UploadEvent, UploadResult, UploadTarget,
};
use crate::errors::{AppError, AppResult, UploadFailed};

const EVENT_CAPACITY: usize = 256;

/// Lossless per-file failure channel owned by whoever submitted the files.
pub type FailureSink = mpsc::UnboundedSender<FailedUpload>;

/// Drives one storage -> metadata pipeline per dropped file.
pub struct ScreenshotUploader {
    storage: Arc<dyn StorageBackend>,
    api: Arc<dyn ApiTransport>,
    in_flight: InFlightCounter,
    events: broadcast::Sender<UploadEvent>,
    call_timeout: Option<Duration>,
}

impl ScreenshotUploader {
    pub fn new(storage: Arc<dyn StorageBackend>, api: Arc<dyn ApiTransport>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            storage,
            api,
            in_flight: InFlightCounter::new(),
            events,
            call_timeout: None,
        }
    }

    /// Bound each collaborator call separately; an elapsed call fails only its
    /// own file.
    pub fn with_call_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.call_timeout = timeout;
        self
    }

    pub fn in_flight(&self) -> &InFlightCounter {
        &self.in_flight
    }

    /// Live event stream shared by every submission. A receiver that falls
    /// more than `EVENT_CAPACITY` events behind skips the oldest ones; use
    /// `submit_reporting` for failures that must not be lost.
    pub fn subscribe_events(&self) -> broadcast::Receiver<UploadEvent> {
        self.events.subscribe()
    }

    /// Launch one independent pipeline per file.
    ///
    /// The in-flight counter is raised for every file before this returns.
    /// `on_item_complete` runs once per successful file, after that file's
    /// decrement, with the target's variation index. Must be called from within
    /// a tokio runtime.
    pub fn submit<F>(
        &self,
        files: Vec<PendingFile>,
        target: UploadTarget,
        on_item_complete: F,
    ) -> Submission
    where
        F: Fn(u32, UploadResult) + Send + Sync + 'static,
    {
        self.launch(files, target, on_item_complete, None)
    }

    /// Same as `submit`, additionally sending every per-file failure of this
    /// submission to `failures`.
    pub fn submit_reporting<F>(
        &self,
        files: Vec<PendingFile>,
        target: UploadTarget,
        on_item_complete: F,
        failures: FailureSink,
    ) -> Submission
    where
        F: Fn(u32, UploadResult) + Send + Sync + 'static,
    {
        self.launch(files, target, on_item_complete, Some(failures))
    }

    fn launch<F>(
        &self,
        files: Vec<PendingFile>,
        target: UploadTarget,
        on_item_complete: F,
        failures: Option<FailureSink>,
    ) -> Submission
    where
        F: Fn(u32, UploadResult) + Send + Sync + 'static,
    {
        let submission_id = uuid::Uuid::new_v4().to_string();
        let progress: ProgressState = Arc::new(Mutex::new(SubmissionProgress::new(
            submission_id.clone(),
            files.len(),
        )));
        let on_item_complete = Arc::new(on_item_complete);

        log::info!(
            "Submission {}: {} file(s) for experiment {} variation {}",
            submission_id,
            files.len(),
            target.experiment,
            target.variation
        );

        let mut handles = Vec::with_capacity(files.len());
        for (index, file) in files.into_iter().enumerate() {
            let guard = self.in_flight.acquire();
            let file_name = file.name.clone();

            let pipeline = Pipeline {
                submission_id: submission_id.clone(),
                index,
                storage: self.storage.clone(),
                api: self.api.clone(),
                events: self.events.clone(),
                timeout: self.call_timeout,
            };
            let target = target.clone();
            let progress = progress.clone();
            let on_item_complete = on_item_complete.clone();
            let failures = failures.clone();

            let handle = tokio::spawn(async move {
                let outcome = pipeline.run(file, &target).await;
                guard.release();

                match outcome {
                    Ok(result) => {
                        update_progress_success(&progress, index, result.clone());
                        on_item_complete(target.variation, result.clone());
                        Ok(result)
                    }
                    Err(failed) => {
                        let failure = FailedUpload::from(&failed);
                        update_progress_failure(&progress, failure.clone());
                        report_failure(failures.as_ref(), &failure);
                        pipeline.emit(UploadEvent::Failed {
                            submission_id: pipeline.submission_id.clone(),
                            failure,
                        });
                        Err(failed)
                    }
                }
            });

            handles.push((index, file_name, handle));
        }

        Submission::new(submission_id, handles, progress, failures)
    }
}

pub(crate) fn report_failure(sink: Option<&FailureSink>, failure: &FailedUpload) {
    if let Some(sink) = sink {
        if sink.send(failure.clone()).is_err() {
            log::debug!("Failure receiver for {} is gone (non-critical)", failure.file_name);
        }
    }
}

struct Pipeline {
    submission_id: String,
    index: usize,
    storage: Arc<dyn StorageBackend>,
    api: Arc<dyn ApiTransport>,
    events: broadcast::Sender<UploadEvent>,
    timeout: Option<Duration>,
}

impl Pipeline {
    async fn run(
        &self,
        file: PendingFile,
        target: &UploadTarget,
    ) -> Result<UploadResult, UploadFailed> {
        let file_name = file.name.clone();
        self.emit(UploadEvent::Started {
            submission_id: self.submission_id.clone(),
            index: self.index,
            file_name: file_name.clone(),
        });

        match self.upload_and_record(file, target).await {
            Ok(result) => {
                self.emit(UploadEvent::Completed {
                    submission_id: self.submission_id.clone(),
                    index: self.index,
                    file_name,
                    url: result.path.clone(),
                });
                Ok(result)
            }
            Err(error) => {
                log::error!(
                    "Submission {}: file #{} ({}) failed: {}",
                    self.submission_id,
                    self.index,
                    file_name,
                    error
                );
                Err(UploadFailed {
                    index: self.index,
                    file_name,
                    error,
                })
            }
        }
    }

    async fn upload_and_record(
        &self,
        file: PendingFile,
        target: &UploadTarget,
    ) -> AppResult<UploadResult> {
        let stored = with_timeout(self.timeout, "storage upload", self.storage.upload(&file))
            .await
            .map_err(|e| match e {
                AppError::Timeout { .. } => e,
                other => AppError::storage_upload_failed(&file.name, other),
            })?;

        // The bytes are no longer needed once stored.
        let file_name = file.name;
        let record = ScreenshotRecord {
            url: stored.file_url.clone(),
            description: String::new(),
        };

        let path = target.screenshot_path();
        let write = put_json(self.api.as_ref(), &path, &record);
        if let Err(e) = with_timeout(self.timeout, "metadata write", write).await {
            log::warn!(
                "Stored file {} for {} is orphaned: metadata write failed",
                stored.file_url,
                file_name
            );
            return Err(match e {
                AppError::Timeout { .. } => e,
                other => AppError::metadata_write_failed(&file_name, &stored.file_url, other),
            });
        }

        log::info!(
            "Recorded screenshot {} for experiment {} variation {}",
            stored.file_url,
            target.experiment,
            target.variation
        );

        Ok(UploadResult {
            path: stored.file_url,
            description: String::new(),
        })
    }

    /// Emit UI event with error handling
    fn emit(&self, event: UploadEvent) -> bool {
        match self.events.send(event) {
            Ok(receivers) => {
                log::debug!("Emitted upload event to {} receiver(s)", receivers);
                true
            }
            Err(_) => {
                log::debug!("No upload event subscribers (non-critical)");
                false
            }
        }
    }
}

async fn with_timeout<T, F>(timeout: Option<Duration>, phase: &str, fut: F) -> AppResult<T>
where
    F: Future<Output = AppResult<T>>,
{
    match timeout {
        Some(limit) => tokio::time::timeout(limit, fut)
            .await
            .map_err(|_| AppError::timeout(phase))?,
        None => fut.await,
    }
}

// Uploader module - orchestrates screenshot uploads
//
// Each dropped file gets its own storage -> metadata pipeline; the in-flight
// counter is the only state shared between them.

pub mod api_client;
pub mod in_flight;
pub mod progress_tracker;
pub mod storage;
pub mod upload_queue;

pub use api_client::{ApiTransport, HttpApiClient};
pub use in_flight::InFlightCounter;
pub use progress_tracker::{SessionStatus, Submission, SubmissionProgress};
pub use storage::{MultipartStorage, SignedUrlStorage, StorageBackend, StoredFile};
pub use upload_queue::{FailureSink, ScreenshotUploader};

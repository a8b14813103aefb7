use async_trait::async_trait;
use reqwest::{header, multipart, Client, Method};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::time::Duration;

use super::api_client::{check_api_response, ApiTransport};
use crate::commands::PendingFile;
use crate::errors::{AppError, AppResult};
use crate::image_processor;

/// Where the content store put a file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredFile {
    #[serde(rename = "fileURL")]
    pub file_url: String,
}

/// Uploads raw bytes and hands back a publicly addressable URL.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    async fn upload(&self, file: &PendingFile) -> AppResult<StoredFile>;
}

/// Upload slot handed out by the API before the bytes are sent.
#[derive(Debug, Clone, Deserialize)]
pub struct SignedUpload {
    #[serde(rename = "uploadURL")]
    pub upload_url: String,
    #[serde(rename = "fileURL")]
    pub file_url: String,
}

/// Asks the API for a signed upload URL, then PUTs the bytes there.
pub struct SignedUrlStorage {
    api: Arc<dyn ApiTransport>,
    client: Client,
}

impl SignedUrlStorage {
    pub fn new(api: Arc<dyn ApiTransport>, timeout: Duration) -> AppResult<Self> {
        Ok(Self {
            api,
            client: Client::builder().timeout(timeout).build()?,
        })
    }
}

#[async_trait]
impl StorageBackend for SignedUrlStorage {
    async fn upload(&self, file: &PendingFile) -> AppResult<StoredFile> {
        let ext = image_processor::extension_for(&file.name, &file.mime_type);
        let slot = self
            .api
            .call(Method::POST, &format!("/upload/{}", ext), None)
            .await?;
        let slot: SignedUpload = serde_json::from_value(slot)?;

        log::debug!("Uploading {} ({} bytes) to signed URL", file.name, file.len());

        let response = self
            .client
            .put(&slot.upload_url)
            .header(header::CONTENT_TYPE, file.mime_type.as_str())
            .body(file.bytes.clone())
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(AppError::Api {
                status: status.as_u16(),
                message: error_text,
            });
        }

        Ok(StoredFile {
            file_url: slot.file_url,
        })
    }
}

/// POSTs the file as a multipart form to an upload endpoint returning `{fileURL}`.
pub struct MultipartStorage {
    client: Client,
    endpoint: String,
    api_token: Option<String>,
}

impl MultipartStorage {
    pub fn new(endpoint: &str, api_token: Option<String>, timeout: Duration) -> AppResult<Self> {
        Ok(Self {
            client: Client::builder().timeout(timeout).build()?,
            endpoint: endpoint.to_string(),
            api_token,
        })
    }
}

#[async_trait]
impl StorageBackend for MultipartStorage {
    async fn upload(&self, file: &PendingFile) -> AppResult<StoredFile> {
        let form = UploadPayload::from_pending(file).build_form()?;

        let mut request = self.client.post(&self.endpoint).multipart(form);
        if let Some(token) = &self.api_token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;
        let status = response.status();
        let response_text = response.text().await?;

        let json = check_api_response(status, &response_text)?;
        Ok(serde_json::from_value(json)?)
    }
}

/// Helper struct to hold upload payload data
#[derive(Debug, Clone)]
pub struct UploadPayload {
    file_name: String,
    data: Vec<u8>,
    mime_type: String,
    field_name: String,
}

impl UploadPayload {
    pub fn from_pending(file: &PendingFile) -> Self {
        Self {
            file_name: file.name.clone(),
            data: file.bytes.clone(),
            mime_type: file.mime_type.clone(),
            field_name: "file".to_string(),
        }
    }

    pub fn build_form(self) -> AppResult<multipart::Form> {
        let part = multipart::Part::bytes(self.data)
            .file_name(self.file_name)
            .mime_str(&self.mime_type)?;

        Ok(multipart::Form::new().part(self.field_name, part))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stored_file_wire_name() {
        let stored: StoredFile =
            serde_json::from_str(r#"{"fileURL":"https://cdn.example.com/a.png"}"#).unwrap();
        assert_eq!(stored.file_url, "https://cdn.example.com/a.png");

        let json = serde_json::to_value(&stored).unwrap();
        assert_eq!(json["fileURL"], "https://cdn.example.com/a.png");
    }

    #[test]
    fn test_signed_upload_parse() {
        let slot: SignedUpload = serde_json::from_str(
            r#"{"uploadURL":"https://bucket/put?sig=1","fileURL":"https://cdn/a.png"}"#,
        )
        .unwrap();
        assert_eq!(slot.upload_url, "https://bucket/put?sig=1");
        assert_eq!(slot.file_url, "https://cdn/a.png");
    }

    #[test]
    fn test_build_form_rejects_bad_mime() {
        let file = PendingFile::new("a.png", "not a mime", vec![1, 2, 3]);
        assert!(UploadPayload::from_pending(&file).build_form().is_err());

        let file = PendingFile::new("a.png", "image/png", vec![1, 2, 3]);
        assert!(UploadPayload::from_pending(&file).build_form().is_ok());
    }
}

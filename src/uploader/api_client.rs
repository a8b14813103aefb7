use async_trait::async_trait;
use reqwest::{Client, Method, StatusCode};
use serde::Serialize;
use serde_json::Value;
use tokio::time::Duration;

use crate::errors::{AppError, AppResult};

/// Authenticated calls against the application API.
#[async_trait]
pub trait ApiTransport: Send + Sync {
    async fn call(&self, method: Method, path: &str, body: Option<Value>) -> AppResult<Value>;
}

pub async fn put_json<B>(api: &dyn ApiTransport, path: &str, body: &B) -> AppResult<Value>
where
    B: Serialize + Sync + ?Sized,
{
    let body = serde_json::to_value(body)?;
    api.call(Method::PUT, path, Some(body)).await
}

/// API client with bearer authentication
pub struct HttpApiClient {
    client: Client,
    base_url: String,
    api_token: Option<String>,
}

impl HttpApiClient {
    pub fn new(base_url: &str, api_token: Option<String>, timeout: Duration) -> AppResult<Self> {
        let client = Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_token,
        })
    }

    pub fn endpoint_url(&self, path: &str) -> String {
        join_url(&self.base_url, path)
    }
}

#[async_trait]
impl ApiTransport for HttpApiClient {
    async fn call(&self, method: Method, path: &str, body: Option<Value>) -> AppResult<Value> {
        let url = self.endpoint_url(path);
        log::debug!("API {} {}", method, url);

        let mut request = self.client.request(method.clone(), &url);
        if let Some(token) = &self.api_token {
            request = request.bearer_auth(token);
        }
        if let Some(body) = &body {
            request = request.json(body);
        }

        let response = request.send().await?;
        let status = response.status();
        let response_text = response.text().await?;

        log::debug!(
            "API response {} for {} {} (first 300 chars): {}",
            status,
            method,
            path,
            &response_text[..floor_char_boundary(&response_text, 300)]
        );

        check_api_response(status, &response_text)
    }
}

/// Join a resource path onto a base URL without doubling slashes.
pub fn join_url(base_url: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base_url.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

/// Turn a raw response into JSON, honouring the `{status, message}` error envelope.
pub fn check_api_response(status: StatusCode, response_text: &str) -> AppResult<Value> {
    let json = if response_text.trim().is_empty() {
        Value::Null
    } else {
        match serde_json::from_str::<Value>(response_text) {
            Ok(json) => json,
            Err(e) if status.is_success() => return Err(AppError::Json(e)),
            Err(_) => Value::String(response_text.to_string()),
        }
    };

    if !status.is_success() {
        return Err(AppError::Api {
            status: status.as_u16(),
            message: error_message(&json).unwrap_or_else(|| {
                status
                    .canonical_reason()
                    .unwrap_or("Unknown error")
                    .to_string()
            }),
        });
    }

    if let Some(envelope_status) = json.get("status").and_then(Value::as_u64) {
        if envelope_status >= 400 {
            return Err(AppError::Api {
                status: u16::try_from(envelope_status).unwrap_or(500),
                message: error_message(&json).unwrap_or_else(|| "Unknown error".to_string()),
            });
        }
    }

    Ok(json)
}

fn error_message(json: &Value) -> Option<String> {
    match json {
        Value::String(text) if !text.is_empty() => Some(text.clone()),
        _ => json
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_string),
    }
}

fn floor_char_boundary(text: &str, max: usize) -> usize {
    let mut end = max.min(text.len());
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    end
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join_url() {
        assert_eq!(
            join_url("https://api.example.com/", "/experiment/e/variation/0/screenshot"),
            "https://api.example.com/experiment/e/variation/0/screenshot"
        );
        assert_eq!(
            join_url("http://localhost:3100", "upload/png"),
            "http://localhost:3100/upload/png"
        );
    }

    #[test]
    fn test_check_api_response_success() {
        let json = check_api_response(StatusCode::OK, r#"{"status":200}"#).unwrap();
        assert_eq!(json["status"], 200);

        assert_eq!(check_api_response(StatusCode::NO_CONTENT, "").unwrap(), Value::Null);
    }

    #[test]
    fn test_check_api_response_http_error() {
        let result = check_api_response(StatusCode::FORBIDDEN, r#"{"message":"Not allowed"}"#);
        match result {
            Err(AppError::Api { status, message }) => {
                assert_eq!(status, 403);
                assert_eq!(message, "Not allowed");
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_check_api_response_plain_text_error() {
        let result = check_api_response(StatusCode::BAD_GATEWAY, "upstream down");
        assert!(matches!(
            result,
            Err(AppError::Api { status: 502, ref message }) if message == "upstream down"
        ));
    }

    #[test]
    fn test_check_api_response_error_envelope() {
        let result = check_api_response(
            StatusCode::OK,
            r#"{"status":404,"message":"Experiment not found"}"#,
        );
        assert!(matches!(
            result,
            Err(AppError::Api { status: 404, ref message }) if message == "Experiment not found"
        ));
    }

    #[test]
    fn test_check_api_response_out_of_range_envelope_status() {
        let result = check_api_response(StatusCode::OK, r#"{"status":70000,"message":"odd"}"#);
        assert!(matches!(
            result,
            Err(AppError::Api { status: 500, ref message }) if message == "odd"
        ));
    }

    #[test]
    fn test_check_api_response_invalid_json() {
        assert!(matches!(
            check_api_response(StatusCode::OK, "<html>"),
            Err(AppError::Json(_))
        ));
    }

    #[test]
    fn test_floor_char_boundary() {
        assert_eq!(floor_char_boundary("héllo", 2), 1);
        assert_eq!(floor_char_boundary("abc", 300), 3);
    }
}

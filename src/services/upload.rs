use anyhow::{Context, Result};
use async_trait::async_trait;
use camino::{Utf8Path, Utf8PathBuf};
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue, USER_AGENT};
use reqwest::multipart::{Form, Part};
use reqwest::{Client, StatusCode};
use std::fmt;
use std::io;
use std::time::Duration;
use thiserror::Error;

use crate::models::{ApiConfig, AuthMode, RetryPolicy};

/// Content type sent with the `file` part
pub const XML_MIME_TYPE: &str = "application/xml";

/// Timeout for the startup connectivity check
const PREFLIGHT_TIMEOUT: Duration = Duration::from_secs(10);

/// Failure of a single upload attempt
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum UploadError {
    #[error("Request timed out after {0} seconds")]
    Timeout(u64),

    #[error("Failed to connect to API endpoint")]
    Connection,

    #[error("Authentication failed - check your API credentials")]
    Unauthorized,

    #[error("API endpoint not found: {0}")]
    EndpointNotFound(String),

    #[error("File too large for API")]
    PayloadTooLarge,

    #[error("HTTP error {status}: {reason}")]
    Status { status: u16, reason: String },

    #[error("Unexpected error: {0}")]
    Unexpected(String),
}

impl UploadError {
    /// Map an error status to its specialised message.
    ///
    /// Retry behaviour does not depend on the variant; this only shapes what gets logged.
    pub fn from_status(status: StatusCode, endpoint: &str) -> Self {
        match status {
            StatusCode::UNAUTHORIZED => UploadError::Unauthorized,
            StatusCode::NOT_FOUND => UploadError::EndpointNotFound(endpoint.to_string()),
            StatusCode::PAYLOAD_TOO_LARGE => UploadError::PayloadTooLarge,
            other => UploadError::Status {
                status: other.as_u16(),
                reason: other.canonical_reason().unwrap_or("Unknown").to_string(),
            },
        }
    }
}

/// Problems with the file itself. These short-circuit the task without
/// consuming any upload attempts.
#[derive(Error, Debug)]
pub enum FileError {
    #[error("File not found: {0}")]
    NotFound(Utf8PathBuf),

    #[error("Not a file: {0}")]
    NotAFile(Utf8PathBuf),

    #[error("Error reading file {path}: {source}")]
    Read {
        path: Utf8PathBuf,
        #[source]
        source: io::Error,
    },
}

/// File content read once per task and re-sent on every attempt
#[derive(Debug, Clone)]
pub struct FilePayload {
    /// Absolute path of the source file
    pub path: Utf8PathBuf,
    pub file_name: String,
    pub content: Vec<u8>,
}

impl FilePayload {
    /// Read the whole file into memory.
    pub async fn read(path: &Utf8Path) -> Result<Self, FileError> {
        let metadata = match tokio::fs::metadata(path).await {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(FileError::NotFound(path.to_path_buf()));
            }
            Err(source) => {
                return Err(FileError::Read {
                    path: path.to_path_buf(),
                    source,
                });
            }
        };

        if !metadata.is_file() {
            return Err(FileError::NotAFile(path.to_path_buf()));
        }

        let content = tokio::fs::read(path).await.map_err(|source| {
            if source.kind() == io::ErrorKind::NotFound {
                FileError::NotFound(path.to_path_buf())
            } else {
                FileError::Read {
                    path: path.to_path_buf(),
                    source,
                }
            }
        })?;

        let absolute = std::path::absolute(path.as_std_path())
            .ok()
            .and_then(|p| Utf8PathBuf::from_path_buf(p).ok())
            .unwrap_or_else(|| path.to_path_buf());

        Ok(Self {
            file_name: path.file_name().unwrap_or(path.as_str()).to_string(),
            path: absolute,
            content,
        })
    }

    pub fn size(&self) -> usize {
        self.content.len()
    }
}

/// Parsed response body: JSON when possible, raw text otherwise
#[derive(Debug, Clone, PartialEq)]
pub enum ResponseBody {
    Json(serde_json::Value),
    Text(String),
}

/// Outcome of a successful attempt
#[derive(Debug, Clone, PartialEq)]
pub struct UploadResponse {
    pub status: u16,
    pub body: ResponseBody,
}

impl UploadResponse {
    pub fn from_text(status: u16, text: String) -> Self {
        let body = match serde_json::from_str(&text) {
            Ok(value) => ResponseBody::Json(value),
            Err(_) => ResponseBody::Text(text),
        };
        Self { status, body }
    }
}

impl fmt::Display for UploadResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.body {
            ResponseBody::Json(value) => write!(f, "{} {}", self.status, value),
            ResponseBody::Text(text) => write!(f, "{} {}", self.status, text.trim()),
        }
    }
}

/// One complete request/response round trip to the upload endpoint.
///
/// Implementations must be safe to share across all workers.
#[async_trait]
pub trait UploadTransport: Send + Sync {
    async fn send(&self, payload: &FilePayload) -> Result<UploadResponse, UploadError>;
}

/// reqwest-backed transport posting multipart forms.
///
/// Default headers (user agent, authorization) are fixed at construction; the
/// underlying connection pool is shared by every worker.
#[derive(Debug, Clone)]
pub struct HttpUploader {
    client: Client,
    endpoint: String,
    timeout: Duration,
}

impl HttpUploader {
    /// Build the HTTP client from the `api` configuration section.
    ///
    /// # Arguments
    /// * `api` - Endpoint, timeout and credentials
    /// * `service_name` - Used for the `User-Agent` header (`<name>/1.0`)
    pub fn new(api: &ApiConfig, service_name: &str) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("{}/1.0", service_name))
                .context("Service name is not a valid User-Agent")?,
        );

        let auth: AuthMode = api.auth_mode();
        if let Some(value) = auth.header_value() {
            let mut value =
                HeaderValue::from_str(&value).context("Credentials are not a valid header value")?;
            value.set_sensitive(true);
            headers.insert(AUTHORIZATION, value);
        }

        let client = Client::builder()
            .default_headers(headers)
            .timeout(api.timeout())
            .build()
            .context("Failed to build HTTP client")?;

        tracing::debug!("HTTP client ready for {} (auth: {:?})", api.endpoint, auth);

        Ok(Self {
            client,
            endpoint: api.endpoint.clone(),
            timeout: api.timeout(),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Check that the endpoint answers at all.
    ///
    /// Sends HEAD, falling back to GET when the server answers 405. Any status
    /// below 500 counts as reachable.
    pub async fn test_connection(&self) -> bool {
        let result = async {
            let response = self
                .client
                .head(&self.endpoint)
                .timeout(PREFLIGHT_TIMEOUT)
                .send()
                .await?;

            if response.status() == StatusCode::METHOD_NOT_ALLOWED {
                return self
                    .client
                    .get(&self.endpoint)
                    .timeout(PREFLIGHT_TIMEOUT)
                    .send()
                    .await;
            }
            Ok::<_, reqwest::Error>(response)
        }
        .await;

        match result {
            Ok(response) => response.status().as_u16() < 500,
            Err(e) => {
                tracing::error!("API connection test failed: {}", e);
                false
            }
        }
    }

    fn classify(&self, error: reqwest::Error) -> UploadError {
        if error.is_timeout() {
            UploadError::Timeout(self.timeout.as_secs())
        } else if error.is_connect() {
            UploadError::Connection
        } else {
            UploadError::Unexpected(error.to_string())
        }
    }
}

#[async_trait]
impl UploadTransport for HttpUploader {
    async fn send(&self, payload: &FilePayload) -> Result<UploadResponse, UploadError> {
        let file_part = Part::bytes(payload.content.clone())
            .file_name(payload.file_name.clone())
            .mime_str(XML_MIME_TYPE)
            .map_err(|e| UploadError::Unexpected(e.to_string()))?;

        let form = Form::new()
            .part("file", file_part)
            .text("filename", payload.file_name.clone())
            .text("size", payload.size().to_string())
            .text("path", payload.path.to_string());

        let response = self
            .client
            .post(&self.endpoint)
            .multipart(form)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| self.classify(e))?;

        let status = response.status();
        if status.is_client_error() || status.is_server_error() {
            return Err(UploadError::from_status(status, &self.endpoint));
        }

        let text = response.text().await.map_err(|e| self.classify(e))?;
        Ok(UploadResponse::from_text(status.as_u16(), text))
    }
}

/// Per-file upload state
#[derive(Debug)]
pub struct UploadTask {
    pub path: Utf8PathBuf,
    pub attempts: u32,
    pub last_error: Option<UploadError>,
}

/// A file that uploaded, and how many attempts it took
#[derive(Debug, Clone)]
pub struct UploadReport {
    pub response: UploadResponse,
    pub attempts: u32,
}

/// Every attempt failed
#[derive(Error, Debug, Clone)]
#[error("Failed to upload {file_name} after {attempts} attempts: {last_error}")]
pub struct UploadFailure {
    pub file_name: String,
    pub attempts: u32,
    pub last_error: UploadError,
}

impl UploadTask {
    pub fn new(path: Utf8PathBuf) -> Self {
        Self {
            path,
            attempts: 0,
            last_error: None,
        }
    }

    /// Drive the attempt loop.
    ///
    /// Makes up to `policy.attempts` attempts with a fixed `policy.delay` between
    /// them (none after the last one). Every error class is retried the same way.
    pub async fn run(
        &mut self,
        transport: &dyn UploadTransport,
        payload: &FilePayload,
        policy: &RetryPolicy,
    ) -> Result<UploadReport, UploadFailure> {
        let max_attempts = policy.attempts.max(1);

        while self.attempts < max_attempts {
            self.attempts += 1;
            tracing::info!(
                "Uploading {} (attempt {}/{})",
                payload.file_name,
                self.attempts,
                max_attempts
            );

            match transport.send(payload).await {
                Ok(response) => {
                    tracing::info!("Successfully uploaded {}", payload.file_name);
                    return Ok(UploadReport {
                        response,
                        attempts: self.attempts,
                    });
                }
                Err(e) => {
                    tracing::warn!(
                        "Upload attempt {} failed for {}: {}",
                        self.attempts,
                        payload.file_name,
                        e
                    );
                    self.last_error = Some(e);

                    if self.attempts < max_attempts && !policy.delay.is_zero() {
                        tokio::time::sleep(policy.delay).await;
                    }
                }
            }
        }

        Err(UploadFailure {
            file_name: payload.file_name.clone(),
            attempts: self.attempts,
            last_error: self
                .last_error
                .clone()
                .unwrap_or_else(|| UploadError::Unexpected("no attempt made".to_string())),
        })
    }
}

/// Upload `payload` with retries.
pub async fn upload_with_retry(
    transport: &dyn UploadTransport,
    payload: &FilePayload,
    policy: &RetryPolicy,
) -> Result<UploadReport, UploadFailure> {
    UploadTask::new(payload.path.clone())
        .run(transport, payload, policy)
        .await
}

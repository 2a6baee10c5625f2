//! reqwest-backed [`Transport`] for the document ingestion API.
//!
//! Uploads are sent as a multipart form whose file part is streamed in
//! chunks, so progress follows the bytes reqwest actually consumes.

use std::sync::{Arc, RwLock};
use std::time::Duration;

use anyhow::Context;
use bytes::Bytes;
use futures_util::{stream, Stream, StreamExt};
use reqwest::multipart::{Form, Part};
use reqwest::{Body, Client, Response};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use crate::transport::{ProcessingStatus, ProgressReporter, Transport, UploadReceipt};
use crate::types::FilePayload;

/// Errors produced while talking to the ingestion API.
#[derive(Error, Debug)]
pub enum HttpError {
    /// A credential provider is configured but holds no token.
    #[error("Not authenticated")]
    NotAuthenticated,

    /// The backend returned a non-success HTTP status.
    #[error("Backend returned HTTP {status}: {body}")]
    Http { status: u16, body: String },

    /// Network-level request failure with context.
    #[error("{context}: {source}")]
    Network {
        context: String,
        source: reqwest::Error,
    },

    /// The response body was missing expected fields.
    #[error("{0}")]
    InvalidResponse(String),
}

/// Supplies the bearer token attached to each request.
pub trait CredentialProvider: Send + Sync + 'static {
    fn bearer_token(&self) -> Option<String>;
}

/// A fixed token.
#[derive(Debug, Clone)]
pub struct StaticCredentials(String);

impl StaticCredentials {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }
}

impl CredentialProvider for StaticCredentials {
    fn bearer_token(&self) -> Option<String> {
        Some(self.0.clone())
    }
}

/// Shared, swappable token for apps where the user logs in and out while
/// the queue is running.
#[derive(Debug, Clone, Default)]
pub struct TokenHolder {
    token: Arc<RwLock<Option<String>>>,
}

impl TokenHolder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, token: impl Into<String>) {
        let mut guard = self.token.write().unwrap_or_else(|e| e.into_inner());
        *guard = Some(token.into());
    }

    pub fn clear(&self) {
        let mut guard = self.token.write().unwrap_or_else(|e| e.into_inner());
        *guard = None;
    }
}

impl CredentialProvider for TokenHolder {
    fn bearer_token(&self) -> Option<String> {
        self.token
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

/// Endpoint layout and timeouts for [`HttpTransport`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpTransportConfig {
    /// Scheme, host and port of the API. Slashes where it meets a path are
    /// ignored when URLs are built, here and in both paths below.
    pub base_url: String,

    /// Path of the multipart upload endpoint.
    pub upload_path: String,

    /// Prefix of the status endpoint; `/{document_id}/status` is appended.
    pub status_path: String,

    /// Timeout for status requests.
    pub request_timeout: Duration,

    /// Timeout for a whole upload request, body included.
    pub upload_timeout: Duration,

    /// Size of the body chunks progress is reported on.
    pub chunk_size: usize,
}

impl Default for HttpTransportConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8000".to_string(),
            upload_path: "/api/files/upload".to_string(),
            status_path: "/api/files/documents".to_string(),
            request_timeout: Duration::from_secs(30),
            upload_timeout: Duration::from_secs(300),
            chunk_size: 64 * 1024,
        }
    }
}

impl HttpTransportConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Self::default()
        }
    }

    pub fn with_upload_path(mut self, path: impl Into<String>) -> Self {
        self.upload_path = path.into();
        self
    }

    pub fn with_status_path(mut self, path: impl Into<String>) -> Self {
        self.status_path = path.into();
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_upload_timeout(mut self, timeout: Duration) -> Self {
        self.upload_timeout = timeout;
        self
    }

    pub fn with_chunk_size(mut self, size: usize) -> Self {
        self.chunk_size = size.max(1);
        self
    }

    pub fn upload_url(&self) -> String {
        join_url(&self.base_url, &self.upload_path)
    }

    pub fn status_url(&self, document_id: &str) -> String {
        format!(
            "{}/{}/status",
            join_url(&self.base_url, &self.status_path),
            document_id.trim_matches('/')
        )
    }
}

/// Join with exactly one slash between the segments.
fn join_url(base: &str, path: &str) -> String {
    let base = base.trim_end_matches('/');
    let path = path.trim_matches('/');
    if path.is_empty() {
        base.to_string()
    } else {
        format!("{}/{}", base, path)
    }
}

/// Talks to the ingestion API over HTTP.
///
/// # Example
/// ```no_run
/// use upload_queue::{HttpTransport, HttpTransportConfig, TokenHolder, UploadQueue, QueueConfig};
///
/// # async fn example() {
/// let token = TokenHolder::new();
/// token.set("eyJhbGciOi...");
///
/// let transport = HttpTransport::new(HttpTransportConfig::new("http://localhost:8000"))
///     .with_credentials(token.clone());
/// let queue = UploadQueue::new(QueueConfig::default(), transport);
/// # }
/// ```
#[derive(Clone)]
pub struct HttpTransport {
    http: Client,
    config: HttpTransportConfig,
    credentials: Option<Arc<dyn CredentialProvider>>,
}

impl HttpTransport {
    pub fn new(config: HttpTransportConfig) -> Self {
        Self {
            http: Client::new(),
            config,
            credentials: None,
        }
    }

    /// Use a custom `reqwest::Client` (for connection pooling, proxies, TLS).
    pub fn with_http_client(mut self, client: Client) -> Self {
        self.http = client;
        self
    }

    /// Attach a bearer token to every request. Once set, a missing token
    /// fails requests with [`HttpError::NotAuthenticated`].
    pub fn with_credentials(mut self, credentials: impl CredentialProvider) -> Self {
        self.credentials = Some(Arc::new(credentials));
        self
    }

    pub fn config(&self) -> &HttpTransportConfig {
        &self.config
    }

    fn token(&self) -> Result<Option<String>, HttpError> {
        match &self.credentials {
            None => Ok(None),
            Some(provider) => provider
                .bearer_token()
                .map(Some)
                .ok_or(HttpError::NotAuthenticated),
        }
    }

    /// Upload one file and return the backend's document id.
    pub async fn upload_file(
        &self,
        payload: &FilePayload,
        progress: Arc<dyn ProgressReporter>,
    ) -> Result<UploadReceipt, HttpError> {
        let token = self.token()?;
        let url = self.config.upload_url();

        let body = Body::wrap_stream(progress_stream(
            payload.data.clone(),
            self.config.chunk_size,
            progress,
        ));
        let part = Part::stream_with_length(body, payload.data.len() as u64)
            .file_name(payload.name.clone())
            .mime_str(&payload.mime_type)
            .map_err(|e| HttpError::Network {
                context: format!("Invalid MIME type {}", payload.mime_type),
                source: e,
            })?;
        let form = Form::new().part("file", part);

        let mut request = self
            .http
            .post(&url)
            .timeout(self.config.upload_timeout)
            .multipart(form);
        if let Some(token) = token {
            request = request.bearer_auth(token);
        }

        debug!(url = %url, filename = %payload.name, "Sending upload request");
        let resp = request.send().await.map_err(|e| HttpError::Network {
            context: format!("Cannot reach upload endpoint {}", url),
            source: e,
        })?;
        let json = json_body(resp, "upload").await?;

        document_id_from_response(&json).map(UploadReceipt::new)
    }

    /// Fetch the processing status of an uploaded document.
    pub async fn document_status(
        &self,
        receipt: &UploadReceipt,
    ) -> Result<ProcessingStatus, HttpError> {
        let token = self.token()?;
        let url = self.config.status_url(&receipt.document_id);

        let mut request = self.http.get(&url).timeout(self.config.request_timeout);
        if let Some(token) = token {
            request = request.bearer_auth(token);
        }

        let resp = request.send().await.map_err(|e| HttpError::Network {
            context: format!("Cannot reach status endpoint {}", url),
            source: e,
        })?;
        let json = json_body(resp, "status").await?;

        let status: StatusResponse = serde_json::from_value(json)
            .map_err(|e| HttpError::InvalidResponse(format!("Malformed status response: {}", e)))?;
        status_from_response(status)
    }
}

impl Transport for HttpTransport {
    async fn upload(
        &self,
        payload: &FilePayload,
        progress: Arc<dyn ProgressReporter>,
    ) -> anyhow::Result<UploadReceipt> {
        let receipt = self
            .upload_file(payload, progress)
            .await
            .with_context(|| format!("Upload of {} failed", payload.name))?;
        Ok(receipt)
    }

    async fn poll_status(&self, receipt: &UploadReceipt) -> anyhow::Result<ProcessingStatus> {
        let status = self
            .document_status(receipt)
            .await
            .with_context(|| format!("Status check for document {} failed", receipt.document_id))?;
        Ok(status)
    }
}

async fn json_body(resp: Response, endpoint: &str) -> Result<Value, HttpError> {
    if !resp.status().is_success() {
        let status = resp.status().as_u16();
        let body = error_detail(resp.text().await.unwrap_or_default());
        return Err(HttpError::Http { status, body });
    }

    resp.json().await.map_err(|e| HttpError::Network {
        context: format!("Failed to parse {} response", endpoint),
        source: e,
    })
}

/// FastAPI reports errors as `{"detail": "..."}`. Anything else is kept verbatim.
fn error_detail(body: String) -> String {
    match serde_json::from_str::<Value>(&body) {
        Ok(Value::Object(map)) => match map.get("detail") {
            Some(Value::String(detail)) => detail.clone(),
            _ => body,
        },
        _ => body,
    }
}

/// Split `data` into chunks, reporting the share handed out so far as each
/// chunk is pulled.
fn progress_stream(
    data: Bytes,
    chunk_size: usize,
    progress: Arc<dyn ProgressReporter>,
) -> impl Stream<Item = Result<Bytes, std::io::Error>> + Send + Sync + 'static {
    let total = data.len();
    let chunk_size = chunk_size.max(1);
    let chunks: Vec<Bytes> = (0..total)
        .step_by(chunk_size)
        .map(|start| data.slice(start..(start + chunk_size).min(total)))
        .collect();

    let mut sent = 0usize;
    stream::iter(chunks).map(move |chunk| {
        sent += chunk.len();
        progress.report(percent(sent, total));
        Ok(chunk)
    })
}

fn percent(sent: usize, total: usize) -> u8 {
    if total == 0 {
        return 100;
    }
    ((sent.min(total) as u128 * 100) / total as u128) as u8
}

fn document_id_from_response(json: &Value) -> Result<String, HttpError> {
    match json.get("document_id") {
        Some(Value::String(id)) if !id.is_empty() => Ok(id.clone()),
        Some(Value::Number(id)) => Ok(id.to_string()),
        _ => Err(HttpError::InvalidResponse(
            "Upload response missing document_id".into(),
        )),
    }
}

#[derive(Debug, Deserialize)]
struct StatusResponse {
    status: String,
    #[serde(default)]
    chunks_created: Option<u32>,
    #[serde(default)]
    error: Option<String>,
}

fn status_from_response(resp: StatusResponse) -> Result<ProcessingStatus, HttpError> {
    match resp.status.as_str() {
        "completed" => Ok(ProcessingStatus::Done {
            chunks_created: resp.chunks_created.unwrap_or(0),
        }),
        "failed" | "error" => Ok(ProcessingStatus::Failed {
            reason: resp
                .error
                .filter(|e| !e.is_empty())
                .unwrap_or_else(|| "Processing failed".to_string()),
        }),
        "processing" | "pending" | "queued" => Ok(ProcessingStatus::InProgress),
        other => Err(HttpError::InvalidResponse(format!(
            "Unknown processing status: {}",
            other
        ))),
    }
}
